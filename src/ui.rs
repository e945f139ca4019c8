//! Progress sink for human readable build notices.

use std::io::{self, Write};

/// Receives progress and error notices from the pipeline.
///
/// Implementations must tolerate concurrent calls from per-zone tasks.
pub trait Ui: Send + Sync {
    /// Reports forward progress.
    fn say(&self, message: &str);

    /// Reports a failure. Called once when a step halts and for every
    /// cleanup failure.
    fn error(&self, message: &str);
}

/// [`Ui`] that writes notices to standard error.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleUi;

impl ConsoleUi {
    fn write_line(mut target: impl Write, prefix: &str, message: &str) {
        writeln!(target, "{prefix}{message}").ok();
    }
}

impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        tracing::info!(target: "templar::ui", "{message}");
        Self::write_line(io::stderr(), "==> ", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "templar::ui", "{message}");
        Self::write_line(io::stderr(), "==> error: ", message);
    }
}
