//! In-memory log capture for tests.

use std::io;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing_subscriber::fmt::MakeWriter;

/// Shared byte buffer usable wherever a `MakeWriter` is accepted.
///
/// `chunked` caps every `write` call at a fixed size so callers must rely on
/// `write_all` looping, which exposes any missing line locking.
#[derive(Clone, Default)]
pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
    chunk: Option<usize>,
}

impl CaptureWriter {
    pub fn chunked(chunk: usize) -> Self {
        Self {
            buffer: Arc::default(),
            chunk: Some(chunk.max(1)),
        }
    }

    pub fn contents(&self) -> String {
        let guard = self.buffer.lock().expect("lock poisoned");
        String::from_utf8_lossy(&guard).into_owned()
    }

    /// Every captured line parsed as JSON; panics on a malformed line.
    pub fn lines(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .map(|line| serde_json::from_str(line).expect("log line is valid JSON"))
            .collect()
    }

    pub fn records_with_msg(&self, msg: &str) -> Vec<Value> {
        self.lines()
            .into_iter()
            .filter(|line| line["msg"] == msg)
            .collect()
    }
}

impl<'a> MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureHandle;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureHandle {
            buffer: Arc::clone(&self.buffer),
            chunk: self.chunk,
        }
    }
}

pub struct CaptureHandle {
    buffer: Arc<Mutex<Vec<u8>>>,
    chunk: Option<usize>,
}

impl io::Write for CaptureHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.chunk.map_or(buf.len(), |chunk| chunk.min(buf.len()));
        let mut guard = self.buffer.lock().expect("lock poisoned");
        guard.extend_from_slice(&buf[..len]);
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
