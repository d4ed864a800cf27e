//! Counter and histogram families with Prometheus text exposition.
//!
//! A [`Registry`] is created once at startup and shared by reference; nothing
//! in this module is process-global.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Latency ladder in seconds, matching the conventional Prometheus defaults.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Default)]
pub struct Registry {
    families: RwLock<Vec<MetricFamily>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a counter family, or return the existing one with that name.
    pub fn register_counter(
        &self,
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
    ) -> CounterVec {
        let mut guard = self.families.write().expect("lock poisoned");
        for family in guard.iter() {
            if let MetricFamily::Counter(existing) = family {
                if existing.name == name {
                    return CounterVec {
                        inner: Arc::clone(existing),
                    };
                }
            }
        }
        let inner = Arc::new(CounterVecInner::new(name, help, label_names));
        guard.push(MetricFamily::Counter(Arc::clone(&inner)));
        CounterVec { inner }
    }

    /// Register a histogram family, or return the existing one with that name.
    pub fn register_histogram(
        &self,
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
        buckets: &'static [f64],
    ) -> HistogramVec {
        let mut guard = self.families.write().expect("lock poisoned");
        for family in guard.iter() {
            if let MetricFamily::Histogram(existing) = family {
                if existing.name == name {
                    return HistogramVec {
                        inner: Arc::clone(existing),
                    };
                }
            }
        }
        let inner = Arc::new(HistogramVecInner::new(name, help, label_names, buckets));
        guard.push(MetricFamily::Histogram(Arc::clone(&inner)));
        HistogramVec { inner }
    }

    /// Render every registered family in the Prometheus text format.
    pub fn encode(&self) -> String {
        let mut output = String::new();
        let guard = self.families.read().expect("lock poisoned");
        for family in guard.iter() {
            match family {
                MetricFamily::Counter(counter) => encode_counter(&mut output, counter),
                MetricFamily::Histogram(histogram) => encode_histogram(&mut output, histogram),
            }
        }
        output
    }
}

enum MetricFamily {
    Counter(Arc<CounterVecInner>),
    Histogram(Arc<HistogramVecInner>),
}

fn encode_counter(output: &mut String, counter: &CounterVecInner) {
    let _ = writeln!(output, "# HELP {} {}", counter.name, counter.help);
    let _ = writeln!(output, "# TYPE {} counter", counter.name);

    let mut samples = counter.collect();
    samples.sort_by(|a, b| a.0.cmp(&b.0));
    for (labels, value) in samples {
        output.push_str(counter.name);
        write_labels(output, counter.label_names, &labels);
        let _ = writeln!(output, " {}", value);
    }
}

fn encode_histogram(output: &mut String, histogram: &HistogramVecInner) {
    let _ = writeln!(output, "# HELP {} {}", histogram.name, histogram.help);
    let _ = writeln!(output, "# TYPE {} histogram", histogram.name);

    let mut bucket_labels = histogram.label_names.to_vec();
    bucket_labels.push("le");

    let mut samples = histogram.collect();
    samples.sort_by(|a, b| a.0.cmp(&b.0));
    for (labels, snapshot) in samples {
        let mut cumulative = 0;
        let bounds = histogram
            .buckets
            .iter()
            .map(|bound| format_float(*bound))
            .chain(std::iter::once("+Inf".to_string()));
        for (idx, bound) in bounds.enumerate() {
            cumulative += snapshot.counts.get(idx).copied().unwrap_or(0);
            let mut label_values = labels.clone();
            label_values.push(bound);
            let _ = write!(output, "{}_bucket", histogram.name);
            write_labels(output, &bucket_labels, &label_values);
            let _ = writeln!(output, " {}", cumulative);
        }

        let _ = write!(output, "{}_sum", histogram.name);
        write_labels(output, histogram.label_names, &labels);
        let _ = writeln!(output, " {}", snapshot.sum);

        let _ = write!(output, "{}_count", histogram.name);
        write_labels(output, histogram.label_names, &labels);
        let _ = writeln!(output, " {}", snapshot.count);
    }
}

#[derive(Default)]
struct CounterValue {
    value: AtomicU64,
}

impl CounterValue {
    fn increment(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

struct CounterVecInner {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: Mutex<HashMap<Vec<String>, Arc<CounterValue>>>,
}

impl CounterVecInner {
    fn new(name: &'static str, help: &'static str, label_names: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            label_names,
            values: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, label_values: &[&str]) -> Arc<CounterValue> {
        assert_eq!(
            self.label_names.len(),
            label_values.len(),
            "label value count mismatch",
        );
        let mut guard = self.values.lock().expect("lock poisoned");
        let key: Vec<String> = label_values.iter().map(|value| value.to_string()).collect();
        Arc::clone(guard.entry(key).or_default())
    }

    fn collect(&self) -> Vec<(Vec<String>, u64)> {
        let guard = self.values.lock().expect("lock poisoned");
        guard
            .iter()
            .map(|(labels, value)| (labels.clone(), value.get()))
            .collect()
    }
}

#[derive(Clone)]
pub struct CounterVec {
    inner: Arc<CounterVecInner>,
}

impl CounterVec {
    pub fn with_label_values(&self, labels: &[&str]) -> Counter {
        Counter {
            inner: self.inner.get_or_create(labels),
        }
    }

    pub fn inc(&self, labels: &[&str], amount: u64) {
        self.with_label_values(labels).inc(amount);
    }

    pub fn ensure(&self, labels: &[&str]) {
        let _ = self.inner.get_or_create(labels);
    }

    /// Current value of a cell; zero when the cell has never been touched.
    pub fn get(&self, labels: &[&str]) -> u64 {
        let key: Vec<String> = labels.iter().map(|value| value.to_string()).collect();
        let guard = self.inner.values.lock().expect("lock poisoned");
        guard.get(&key).map(|value| value.get()).unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct Counter {
    inner: Arc<CounterValue>,
}

impl Counter {
    pub fn inc(&self, amount: u64) {
        self.inner.increment(amount);
    }

    pub fn get(&self) -> u64 {
        self.inner.get()
    }
}

struct HistogramVecInner {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    buckets: &'static [f64],
    values: Mutex<HashMap<Vec<String>, Arc<HistogramValue>>>,
}

impl HistogramVecInner {
    fn new(
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
        buckets: &'static [f64],
    ) -> Self {
        Self {
            name,
            help,
            label_names,
            buckets,
            values: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, label_values: &[&str]) -> Arc<HistogramValue> {
        assert_eq!(
            self.label_names.len(),
            label_values.len(),
            "label value count mismatch",
        );
        let mut guard = self.values.lock().expect("lock poisoned");
        let key: Vec<String> = label_values.iter().map(|value| value.to_string()).collect();
        Arc::clone(
            guard
                .entry(key)
                .or_insert_with(|| HistogramValue::new(self.buckets.len())),
        )
    }

    fn collect(&self) -> Vec<(Vec<String>, HistogramSnapshot)> {
        let guard = self.values.lock().expect("lock poisoned");
        guard
            .iter()
            .map(|(labels, value)| (labels.clone(), value.snapshot()))
            .collect()
    }
}

#[derive(Clone)]
pub struct HistogramVec {
    inner: Arc<HistogramVecInner>,
}

impl HistogramVec {
    pub fn with_label_values(&self, labels: &[&str]) -> Histogram {
        Histogram {
            inner: self.inner.get_or_create(labels),
            buckets: self.inner.buckets,
        }
    }

    pub fn observe(&self, labels: &[&str], value: f64) {
        self.with_label_values(labels).observe(value);
    }

    pub fn ensure(&self, labels: &[&str]) {
        let _ = self.inner.get_or_create(labels);
    }

    /// Number of samples recorded for a cell.
    pub fn sample_count(&self, labels: &[&str]) -> u64 {
        let key: Vec<String> = labels.iter().map(|value| value.to_string()).collect();
        let guard = self.inner.values.lock().expect("lock poisoned");
        guard
            .get(&key)
            .map(|value| value.snapshot().count)
            .unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct Histogram {
    inner: Arc<HistogramValue>,
    buckets: &'static [f64],
}

impl Histogram {
    pub fn observe(&self, value: f64) {
        self.inner.observe(self.buckets, value);
    }
}

#[derive(Clone)]
struct HistogramSnapshot {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

struct HistogramValue {
    state: Mutex<HistogramSnapshot>,
}

impl HistogramValue {
    fn new(bucket_count: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HistogramSnapshot {
                counts: vec![0; bucket_count + 1],
                sum: 0.0,
                count: 0,
            }),
        })
    }

    fn observe(&self, buckets: &[f64], value: f64) {
        // Last slot is the implicit +Inf bucket.
        let idx = buckets
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(buckets.len());

        let mut state = self.state.lock().expect("lock poisoned");
        state.count += 1;
        state.sum += value;
        if let Some(slot) = state.counts.get_mut(idx) {
            *slot += 1;
        }
    }

    fn snapshot(&self) -> HistogramSnapshot {
        self.state.lock().expect("lock poisoned").clone()
    }
}

fn write_labels(output: &mut String, names: &[&str], values: &[String]) {
    if names.is_empty() {
        return;
    }

    output.push('{');
    for (idx, (name, value)) in names.iter().zip(values.iter()).enumerate() {
        if idx > 0 {
            output.push(',');
        }
        let _ = write!(output, r#"{}="{}""#, name, escape_label_value(value));
    }
    output.push('}');
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn format_float(value: f64) -> String {
    let mut formatted = format!("{value:.6}");
    while formatted.contains('.') && formatted.ends_with('0') {
        formatted.pop();
    }
    if formatted.ends_with('.') {
        formatted.push('0');
    }
    if formatted == "-0.0" {
        formatted = "0.0".to_string();
    }
    formatted
}
