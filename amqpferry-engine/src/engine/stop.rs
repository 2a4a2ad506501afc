//! Stop-condition evaluation.

// Layer 1: Standard library imports
use std::fmt;
use std::time::{Duration, Instant};

// Layer 3: Internal module imports
use crate::control::QuitFlag;

/// Why the engine left its step loop.
///
/// Every variant is a clean termination (exit code 0); fatal errors travel
/// separately as `Err` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The acknowledged-message counter reached the configured `count`.
    CountReached,
    /// Wall-clock time since start reached the configured `duration`.
    DurationElapsed,
    /// Wall-clock time since the last receipt reached `timeout-inactivity`.
    InactivityTimeout,
    /// The source reported it will never yield again.
    SourceExhausted,
    /// A quit was requested (signal or PID-file sentinel).
    QuitRequested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::CountReached => "count reached",
            Self::DurationElapsed => "duration elapsed",
            Self::InactivityTimeout => "inactivity timeout",
            Self::SourceExhausted => "source exhausted",
            Self::QuitRequested => "quit requested",
        };
        f.write_str(text)
    }
}

/// Configured stop conditions, evaluated at the top of every step.
#[derive(Debug, Clone)]
pub struct StopConditions {
    count: Option<u64>,
    duration: Option<Duration>,
    inactivity: Option<Duration>,
}

impl StopConditions {
    /// Build the evaluator from the configured bounds.
    pub fn new(
        count: Option<u64>,
        duration: Option<Duration>,
        inactivity: Option<Duration>,
    ) -> Self {
        Self {
            count,
            duration,
            inactivity,
        }
    }

    /// Return the first stop condition that fires, if any.
    pub fn check(
        &self,
        acked: u64,
        started: Instant,
        last_receipt: Instant,
        quit: &QuitFlag,
    ) -> Option<StopReason> {
        if let Some(count) = self.count {
            if acked >= count {
                return Some(StopReason::CountReached);
            }
        }
        if let Some(duration) = self.duration {
            if started.elapsed() >= duration {
                return Some(StopReason::DurationElapsed);
            }
        }
        if let Some(inactivity) = self.inactivity {
            if last_receipt.elapsed() >= inactivity {
                return Some(StopReason::InactivityTimeout);
            }
        }
        if quit.is_set() {
            return Some(StopReason::QuitRequested);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unbounded() -> StopConditions {
        StopConditions::new(None, None, None)
    }

    #[test]
    fn test_no_conditions_never_fire() {
        let now = Instant::now();
        assert_eq!(unbounded().check(1_000_000, now, now, &QuitFlag::new()), None);
    }

    #[test]
    fn test_count_fires_at_threshold() {
        let conditions = StopConditions::new(Some(5), None, None);
        let now = Instant::now();
        let quit = QuitFlag::new();
        assert_eq!(conditions.check(4, now, now, &quit), None);
        assert_eq!(conditions.check(5, now, now, &quit), Some(StopReason::CountReached));
        assert_eq!(conditions.check(6, now, now, &quit), Some(StopReason::CountReached));
    }

    #[test]
    fn test_duration_fires_after_elapsed() {
        let conditions = StopConditions::new(None, Some(Duration::from_millis(1)), None);
        let started = Instant::now() - Duration::from_millis(5);
        assert_eq!(
            conditions.check(0, started, Instant::now(), &QuitFlag::new()),
            Some(StopReason::DurationElapsed)
        );
    }

    #[test]
    fn test_inactivity_resets_with_receipts() {
        let conditions = StopConditions::new(None, None, Some(Duration::from_millis(50)));
        let started = Instant::now() - Duration::from_secs(10);
        let quit = QuitFlag::new();

        let fresh_receipt = Instant::now();
        assert_eq!(conditions.check(0, started, fresh_receipt, &quit), None);

        let stale_receipt = Instant::now() - Duration::from_millis(60);
        assert_eq!(
            conditions.check(0, started, stale_receipt, &quit),
            Some(StopReason::InactivityTimeout)
        );
    }

    #[test]
    fn test_quit_flag_fires() {
        let quit = QuitFlag::new();
        quit.set();
        let now = Instant::now();
        assert_eq!(
            unbounded().check(0, now, now, &quit),
            Some(StopReason::QuitRequested)
        );
    }

    #[test]
    fn test_count_evaluated_before_quit() {
        let conditions = StopConditions::new(Some(1), None, None);
        let quit = QuitFlag::new();
        quit.set();
        let now = Instant::now();
        assert_eq!(
            conditions.check(1, now, now, &quit),
            Some(StopReason::CountReached)
        );
    }
}
