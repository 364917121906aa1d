//! Stopwatch text formatting

use std::time::{Duration, Instant};

/// Text shown while no recording is running
pub const STOPWATCH_ZERO: &str = "00:00:00";

/// Format elapsed time as `HH:MM:SS`, truncating to whole seconds.
/// Hours widen past two digits instead of wrapping.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Start instant of a running stopwatch
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: Instant,
}

impl Stopwatch {
    pub fn start(now: Instant) -> Self {
        Self { started_at: now }
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn display_at(&self, now: Instant) -> String {
        format_elapsed(self.elapsed_at(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), STOPWATCH_ZERO);
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "00:00:59");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_elapsed(Duration::from_secs(100 * 3600 + 1)), "100:00:01");
    }

    #[test]
    fn test_stopwatch_elapsed() {
        let start = Instant::now();
        let watch = Stopwatch::start(start);
        assert_eq!(watch.display_at(start + Duration::from_secs(61)), "00:01:01");
        assert_eq!(watch.elapsed_at(start), Duration::ZERO);
    }
}
