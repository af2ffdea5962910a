//! Duplicate timestamp suppression.

use chrono::{DateTime, Utc};

/// Outcome of checking a timestamp against the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Write the point.
    Proceed,
    /// The timestamp does not advance past the last written one.
    Duplicate { last: DateTime<Utc> },
}

/// Tracks the last written timestamp and rejects points that do not advance it.
///
/// The guard only moves forward through [`DuplicateGuard::record_written`],
/// which callers invoke after the sink accepted the point.
#[derive(Debug, Clone)]
pub struct DuplicateGuard {
    enabled: bool,
    last_timestamp: DateTime<Utc>,
}

impl DuplicateGuard {
    /// Create a guard starting at the Unix epoch.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last_timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Timestamp of the last successful write (epoch if none yet).
    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.last_timestamp
    }

    /// Decide whether a point at `timestamp` should be written.
    pub fn check(&self, timestamp: DateTime<Utc>) -> GuardDecision {
        if !self.enabled || timestamp > self.last_timestamp {
            GuardDecision::Proceed
        } else {
            GuardDecision::Duplicate {
                last: self.last_timestamp,
            }
        }
    }

    /// Remember a successfully written timestamp.
    pub fn record_written(&mut self, timestamp: DateTime<Utc>) {
        self.last_timestamp = timestamp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_starts_at_epoch() {
        let guard = DuplicateGuard::new(true);
        assert_eq!(guard.last_timestamp(), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(guard.check(ts(1)), GuardDecision::Proceed);
        assert!(matches!(guard.check(ts(0)), GuardDecision::Duplicate { .. }));
    }

    #[test]
    fn test_later_then_earlier_is_suppressed() {
        let mut guard = DuplicateGuard::new(true);
        let (t1, t2) = (ts(100), ts(200));

        assert_eq!(guard.check(t2), GuardDecision::Proceed);
        guard.record_written(t2);

        assert_eq!(guard.check(t1), GuardDecision::Duplicate { last: t2 });
        assert_eq!(guard.check(t2), GuardDecision::Duplicate { last: t2 });
        assert_eq!(guard.last_timestamp(), t2);
    }

    #[test]
    fn test_strictly_increasing_accepted() {
        let mut guard = DuplicateGuard::new(true);

        for secs in [100, 101, 5000] {
            assert_eq!(guard.check(ts(secs)), GuardDecision::Proceed);
            guard.record_written(ts(secs));
        }
    }

    #[test]
    fn test_unrecorded_write_does_not_advance() {
        let guard = DuplicateGuard::new(true);

        // A failed write is never recorded, so the same timestamp stays writable.
        assert_eq!(guard.check(ts(100)), GuardDecision::Proceed);
        assert_eq!(guard.check(ts(100)), GuardDecision::Proceed);
    }

    #[test]
    fn test_disabled_always_proceeds() {
        let mut guard = DuplicateGuard::new(false);
        guard.record_written(ts(200));

        assert!(!guard.is_enabled());
        assert_eq!(guard.check(ts(200)), GuardDecision::Proceed);
        assert_eq!(guard.check(ts(100)), GuardDecision::Proceed);
    }
}
