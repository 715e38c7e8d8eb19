//! Scoped capture of diagnostic output.
//!
//! While a [`LogCapture`] is alive, every `tracing` event emitted on the current thread is
//! formatted into its [`DiagnosticLog`]. Other threads, like the ones reading a child process
//! output, append to the same log through a clone of it.
//! The previous subscriber is restored when the capture is dropped, unwinding included.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::Level;
use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// A shared, append-only text buffer.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    buffer: Arc<Mutex<String>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `line` followed by a line break.
    pub fn append_line(&self, line: &str) {
        let mut buffer = self.lock();
        buffer.push_str(line);
        buffer.push('\n');
    }

    /// A copy of everything written so far.
    pub fn contents(&self) -> String {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        // A writer that panicked mid-line leaves a usable string behind
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`io::Write`] adapter used by the `tracing` formatter.
pub struct DiagnosticLogWriter {
    log: DiagnosticLog,
}

impl io::Write for DiagnosticLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.lock().push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DiagnosticLog {
    type Writer = DiagnosticLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DiagnosticLogWriter { log: self.clone() }
    }
}

/// Routes the current thread `tracing` events into a [`DiagnosticLog`] until dropped.
///
/// ```
/// use ontoscope::capture::LogCapture;
///
/// let capture = LogCapture::start(tracing::Level::INFO);
/// tracing::info!("classified 3 classes");
/// let log = capture.finish();
/// assert!(log.contains("classified 3 classes"));
/// ```
pub struct LogCapture {
    log: DiagnosticLog,
    _guard: DefaultGuard,
}

impl LogCapture {
    pub fn start(max_level: Level) -> Self {
        let log = DiagnosticLog::new();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log.clone())
            .with_max_level(max_level)
            .with_ansi(false)
            .with_target(false)
            .without_time()
            .finish();
        Self {
            _guard: tracing::subscriber::set_default(subscriber),
            log,
        }
    }

    /// The log being written to, to hand over to other writers.
    pub fn log(&self) -> &DiagnosticLog {
        &self.log
    }

    /// Stops capturing and returns the captured text.
    pub fn finish(self) -> String {
        let Self { log, _guard: guard } = self;
        drop(guard);
        log.contents()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn events_and_appended_lines_are_captured() {
        let capture = LogCapture::start(Level::INFO);
        tracing::info!("first round");
        let log = capture.log().clone();
        let handle = thread::spawn(move || log.append_line("from the reasoner process"));
        assert!(handle.join().is_ok());
        tracing::debug!("too verbose");
        let text = capture.finish();
        assert!(text.contains("first round"), "{text}");
        assert!(text.contains("from the reasoner process"), "{text}");
        assert!(!text.contains("too verbose"), "{text}");
    }

    #[test]
    fn capture_ends_on_drop() {
        let log = {
            let capture = LogCapture::start(Level::INFO);
            capture.log().clone()
        };
        tracing::warn!("after the capture");
        assert!(log.is_empty());
    }

    #[test]
    fn capture_ends_on_unwind() {
        let (sender, receiver) = mpsc::channel();
        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            let capture = LogCapture::start(Level::INFO);
            let _: Result<(), _> = sender.send(capture.log().clone());
            tracing::info!("before the failure");
            panic!("reasoner crashed");
        }));
        assert!(result.is_err());
        let Ok(log) = receiver.recv() else {
            unreachable!("the capture is sent before the panic")
        };
        tracing::info!("after the failure");
        assert!(log.contents().contains("before the failure"));
        assert!(!log.contents().contains("after the failure"));
    }
}
