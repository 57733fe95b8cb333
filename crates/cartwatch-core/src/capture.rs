//! Scoped capture of the shared output sink.
//!
//! The device agent writes its step-by-step trace to the same sink the
//! program's own messages go through, and the only externally observable
//! signal of success is embedded in that trace. `OutputSink` is the shared
//! handle; `CaptureGuard` redirects it into a private buffer for the
//! duration of one call and restores it on every exit path, including
//! panics, via `Drop`.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Where sink writes currently go.
#[derive(Debug)]
enum SinkTarget {
    /// Writes pass through to standard output.
    Passthrough,
    /// Writes accumulate in a private buffer.
    Buffer(String),
}

/// Cloneable handle to the shared output sink.
///
/// All clones refer to the same underlying target; redirecting one
/// redirects them all. This mirrors the process-wide stream the agent
/// writes to, made explicit instead of ambient.
#[derive(Debug, Clone)]
pub struct OutputSink {
    target: Arc<Mutex<SinkTarget>>,
}

impl OutputSink {
    /// Creates a new sink in passthrough mode.
    #[must_use]
    pub fn new() -> Self {
        Self { target: Arc::new(Mutex::new(SinkTarget::Passthrough)) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkTarget> {
        // A panic while holding the lock leaves the target itself intact,
        // so the poisoned value is still usable.
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes one line through the sink.
    pub fn write_line(&self, line: &str) {
        let mut target = self.lock();
        match &mut *target {
            SinkTarget::Passthrough => println!("{line}"),
            SinkTarget::Buffer(buf) => {
                buf.push_str(line);
                buf.push('\n');
            }
        }
    }

    /// Returns `true` if a capture is currently active.
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        matches!(*self.lock(), SinkTarget::Buffer(_))
    }

    /// Begins capturing sink output into a private buffer.
    ///
    /// The returned guard restores the previous target when finished or
    /// dropped. The previous target is saved whole, so a capture started
    /// while another is active hands the outer buffer back intact.
    #[must_use]
    pub fn capture(&self) -> CaptureGuard {
        let mut target = self.lock();
        let prior = std::mem::replace(&mut *target, SinkTarget::Buffer(String::new()));
        drop(target);
        debug!("Output sink redirected into capture buffer");
        CaptureGuard { sink: self.clone(), prior: Some(prior) }
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for one active capture.
///
/// Call `finish` to drain the buffered text; dropping the guard without
/// finishing discards the text but still restores the sink.
#[derive(Debug)]
pub struct CaptureGuard {
    sink: OutputSink,
    prior: Option<SinkTarget>,
}

impl CaptureGuard {
    /// Ends the capture, restoring the previous sink target.
    ///
    /// # Returns
    /// Everything written through the sink while the capture was active.
    #[must_use]
    pub fn finish(mut self) -> String {
        self.restore().unwrap_or_default()
    }

    /// Swaps the prior target back in and returns the buffered text.
    ///
    /// Idempotent: only the first call restores anything.
    fn restore(&mut self) -> Option<String> {
        let prior = self.prior.take()?;
        let mut target = self.sink.lock();
        let captured = std::mem::replace(&mut *target, prior);
        drop(target);
        debug!("Output sink restored");
        match captured {
            SinkTarget::Buffer(buf) => Some(buf),
            SinkTarget::Passthrough => None,
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}
