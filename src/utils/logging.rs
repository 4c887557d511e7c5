use log::{log_enabled, Level};
use std::time::Instant;

/// Simple scoped timer for profiling pipeline phases.
pub struct ScopedTimer<'a> {
    label: &'a str,
    start: Instant,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(label: &'a str) -> Self {
        if log_enabled!(Level::Trace) {
            log::trace!("start {label}");
        }
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl<'a> Drop for ScopedTimer<'a> {
    fn drop(&mut self) {
        if log_enabled!(Level::Trace) {
            let elapsed = self.start.elapsed();
            log::trace!("end {} ({} µs)", self.label, elapsed.as_micros());
        }
    }
}

/// Emits a warning exactly once per call site.
///
/// Degraded states (dormant resources, invalid joints, clamped configuration)
/// are reported on the transition rather than every step.
#[macro_export]
macro_rules! warn_once {
    ($($arg:tt)*) => {{
        use std::sync::atomic::{AtomicBool, Ordering};
        static WARNED: AtomicBool = AtomicBool::new(false);
        if !WARNED.swap(true, Ordering::Relaxed) {
            log::warn!($($arg)*);
        }
    }};
}
