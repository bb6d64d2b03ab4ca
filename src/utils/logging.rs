use log::{log_enabled, warn, Level};
use std::time::{Duration, Instant};

/// Scoped timer around one phase of a simulation step.
///
/// Emits `trace!` lines on entry and exit, and optionally adds the elapsed
/// time to a [`Duration`] slot of the step profile.
pub struct ScopedTimer<'a> {
    label: &'static str,
    start: Instant,
    sink: Option<&'a mut Duration>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(label: &'static str) -> Self {
        if log_enabled!(Level::Trace) {
            log::trace!("start {label}");
        }
        Self {
            label,
            start: Instant::now(),
            sink: None,
        }
    }

    /// Same as [`ScopedTimer::new`], accumulating into `sink` on drop.
    pub fn recording(label: &'static str, sink: &'a mut Duration) -> Self {
        let mut timer = Self::new(label);
        timer.sink = Some(sink);
        timer
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if let Some(sink) = self.sink.as_deref_mut() {
            *sink += elapsed;
        }
        if log_enabled!(Level::Trace) {
            log::trace!("end {} ({} µs)", self.label, elapsed.as_micros());
        }
    }
}

/// Logs a warning when a step took longer than `budget_ms`.
pub fn warn_if_frame_budget_exceeded(duration: Duration, budget_ms: f32) {
    let elapsed_ms = duration.as_secs_f32() * 1000.0;
    if elapsed_ms > budget_ms {
        warn!("step exceeded budget: {elapsed_ms:.2} ms > {budget_ms:.2} ms");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_timer_accumulates() {
        let mut total = Duration::ZERO;
        {
            let _timer = ScopedTimer::recording("test::phase", &mut total);
            std::thread::sleep(Duration::from_millis(1));
        }
        let first = total;
        assert!(first >= Duration::from_millis(1));
        {
            let _timer = ScopedTimer::recording("test::phase", &mut total);
        }
        assert!(total >= first);
    }
}
