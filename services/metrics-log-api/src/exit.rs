//! Process termination as an injectable effect.

use std::io::{self, Write};

pub trait ProcessExit: Send + Sync {
    /// End the process with `code`. Production implementations do not return.
    fn terminate(&self, code: i32);
}

/// Flushes stdout and exits immediately, skipping graceful shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProcessExit;

impl ProcessExit for StdProcessExit {
    fn terminate(&self, code: i32) {
        let _ = io::stdout().flush();
        std::process::exit(code);
    }
}
