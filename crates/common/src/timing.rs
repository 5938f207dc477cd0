//! Recording timeline and rate-limiting utilities.
//!
//! Elapsed recording time is always derived from a monotonic start instant
//! minus accumulated pause time, so wall-clock adjustments never corrupt the
//! displayed duration. The same module carries the interval gate used to cap
//! preview frame delivery.

use std::time::{Duration, Instant};

/// Tracks elapsed and paused time for one recording session.
///
/// Anchored to a monotonic instant; the wall-clock start is kept only for
/// display and file naming. `pause`/`resume` are guarded no-ops outside
/// their compatible states, so double-pause or resume-while-running cannot
/// skew the bookkeeping.
#[derive(Debug, Clone)]
pub struct RecordingTimeline {
    start: Instant,
    started_wall: String,
    paused_accum: Duration,
    last_pause: Option<Instant>,
    paused: bool,
    segment_index: u32,
}

impl RecordingTimeline {
    /// Start a new timeline anchored to now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            started_wall: chrono::Utc::now().to_rfc3339(),
            paused_accum: Duration::ZERO,
            last_pause: None,
            paused: false,
            segment_index: 0,
        }
    }

    /// Wall-clock time at recording start (RFC 3339).
    pub fn started_wall(&self) -> &str {
        &self.started_wall
    }

    /// Elapsed recording time, excluding completed pauses and any pause
    /// currently in progress.
    pub fn elapsed(&self) -> Duration {
        let mut paused = self.paused_accum;
        if let Some(pause_started) = self.last_pause {
            if self.paused {
                paused += pause_started.elapsed();
            }
        }
        self.start.elapsed().saturating_sub(paused)
    }

    /// Pause the timeline. No-op unless currently running.
    pub fn pause(&mut self) -> bool {
        if self.paused {
            return false;
        }
        self.paused = true;
        self.last_pause = Some(Instant::now());
        true
    }

    /// Resume the timeline. No-op unless currently paused.
    pub fn resume(&mut self) -> bool {
        if !self.paused {
            return false;
        }
        if let Some(pause_started) = self.last_pause.take() {
            self.paused_accum += pause_started.elapsed();
        }
        self.paused = false;
        true
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Total time spent paused so far, including an in-progress pause.
    pub fn paused_total(&self) -> Duration {
        let mut paused = self.paused_accum;
        if self.paused {
            if let Some(pause_started) = self.last_pause {
                paused += pause_started.elapsed();
            }
        }
        paused
    }

    /// Zero-based index of the segment currently being written.
    pub fn segment_index(&self) -> u32 {
        self.segment_index
    }

    /// Advance the current segment index by one.
    pub fn advance_segment(&mut self) {
        self.segment_index += 1;
    }
}

/// Format a duration as `HH:MM:SS` for display.
pub fn format_hms(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Interval gate capping delivery at a target Hz rate.
///
/// Driven by explicit nanosecond timestamps rather than reading the clock
/// itself, so callers in tests can replay arrival times deterministically.
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ns: 1_000_000_000 / target_hz.max(1) as u64,
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            _ => false,
        }
    }

    /// Target interval in nanoseconds.
    pub fn interval_ns(&self) -> u64 {
        self.target_interval_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_counts_up() {
        let timeline = RecordingTimeline::start();
        std::thread::sleep(Duration::from_millis(15));
        assert!(timeline.elapsed() >= Duration::from_millis(10));
        assert!(!timeline.started_wall().is_empty());
    }

    #[test]
    fn test_pause_resume_state_guards() {
        let mut timeline = RecordingTimeline::start();
        assert!(timeline.pause());
        assert!(!timeline.pause()); // already paused
        assert!(timeline.resume());
        assert!(!timeline.resume()); // not paused
    }

    #[test]
    fn test_immediate_pause_resume_keeps_elapsed() {
        let mut timeline = RecordingTimeline::start();
        std::thread::sleep(Duration::from_millis(20));
        let before = timeline.elapsed();
        timeline.pause();
        timeline.resume();
        let after = timeline.elapsed();
        // Bookkeeping error for a near-instant pause stays in the millisecond range.
        assert!(after.saturating_sub(before) < Duration::from_millis(10));
    }

    #[test]
    fn test_in_progress_pause_excluded_from_elapsed() {
        let mut timeline = RecordingTimeline::start();
        std::thread::sleep(Duration::from_millis(10));
        timeline.pause();
        let at_pause = timeline.elapsed();
        std::thread::sleep(Duration::from_millis(30));
        let later = timeline.elapsed();
        assert!(later.saturating_sub(at_pause) < Duration::from_millis(10));
        assert!(timeline.paused_total() >= Duration::from_millis(25));
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(59)), "00:00:59");
        assert_eq!(format_hms(Duration::from_secs(61)), "00:01:01");
        assert_eq!(format_hms(Duration::from_secs(3600 + 2 * 60 + 3)), "01:02:03");
        assert_eq!(format_hms(Duration::from_secs(100 * 3600)), "100:00:00");
    }

    #[test]
    fn test_rate_controller() {
        let mut ctrl = RateController::new(60);
        assert!(ctrl.should_tick(0)); // first tick always fires
        assert!(!ctrl.should_tick(1_000_000)); // 1ms later, too soon
        assert!(ctrl.should_tick(17_000_000)); // ~17ms later, should fire (60Hz ~ 16.67ms)
    }

    #[test]
    fn test_rate_controller_only_first_in_window() {
        let mut ctrl = RateController::new(10); // 100ms window
        assert!(ctrl.should_tick(0));
        assert!(!ctrl.should_tick(50_000_000));
        assert!(!ctrl.should_tick(99_000_000));
        assert!(ctrl.should_tick(100_000_000));
        assert!(!ctrl.should_tick(150_000_000));
    }
}
