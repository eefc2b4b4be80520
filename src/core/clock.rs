use crate::core::timestamp::Timestamp;
use std::time::Instant;

/// Wall-clock master clock shared by the video and audio queries.
///
/// Both consumers derive their deadline from the same start instant, which
/// is the only synchronization between the two streams: video catches up by
/// dropping frames and audio by emitting silence.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    start: Instant,
}

impl PlaybackClock {
    /// Starts a clock at time zero.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time since the clock started, usable as a query deadline.
    pub fn now(&self) -> Timestamp {
        self.at(Instant::now())
    }

    /// Deadline corresponding to `instant`. Instants before the start map
    /// to zero.
    pub fn at(&self, instant: Instant) -> Timestamp {
        Timestamp::from_duration(instant.saturating_duration_since(self.start))
    }

    pub fn start_instant(&self) -> Instant {
        self.start
    }

    /// Restarts the clock at time zero.
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_at_is_relative_to_start() {
        let clock = PlaybackClock::new();
        let later = clock.start_instant() + Duration::from_millis(40);
        assert_eq!(clock.at(later), Timestamp::from_millis(40));
    }

    #[test]
    fn test_now_is_monotonic() {
        let clock = PlaybackClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a);
        assert!(a >= Timestamp::ZERO);
    }
}
