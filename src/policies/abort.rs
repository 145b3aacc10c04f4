//! # Fast-failure abort policy.
//!
//! [`AbortPolicy`] decides when a crash-looping process stops being restarted.
//! Every unexpected exit is classified first:
//!
//! ```text
//! exit ──► reached ready? ──no──► Fast
//!               │
//!              yes ──► uptime < min_uptime? ──yes──► Fast
//!                             │
//!                             no ──► Healthy (counter reset)
//!
//! Fast ──► consecutive_fast_failures += 1 ──► >= threshold? ──► aborted
//! ```
//!
//! ## Sentinel values
//! - `threshold = 0` → never abort
//! - `min_uptime = 0s` → only exits before `ready` count as fast

use std::time::Duration;

/// Outcome of classifying one unexpected exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitClass {
    /// Exit before readiness (or within the minimum uptime).
    Fast,
    /// Exit after a healthy run.
    Healthy,
}

/// Crash-loop policy.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use procvisor::{AbortPolicy, ExitClass};
///
/// let policy = AbortPolicy { threshold: 3, min_uptime: Duration::from_secs(1) };
///
/// assert_eq!(policy.classify(false, Duration::from_secs(30)), ExitClass::Fast);
/// assert_eq!(policy.classify(true, Duration::from_millis(10)), ExitClass::Fast);
/// assert_eq!(policy.classify(true, Duration::from_secs(5)), ExitClass::Healthy);
/// assert!(!policy.is_exhausted(2));
/// assert!(policy.is_exhausted(3));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbortPolicy {
    /// Consecutive fast failures that abort the process (`0` = never).
    pub threshold: u32,
    /// Exits sooner than this after spawn count as fast even past `ready`.
    pub min_uptime: Duration,
}

impl Default for AbortPolicy {
    /// Returns `threshold = 3`, `min_uptime = 1s`.
    fn default() -> Self {
        Self {
            threshold: 3,
            min_uptime: Duration::from_secs(1),
        }
    }
}

impl AbortPolicy {
    /// Classifies an unexpected exit.
    ///
    /// - `reached_ready`: the instance completed its handshake before exiting
    /// - `uptime`: time since the instance was spawned
    pub fn classify(&self, reached_ready: bool, uptime: Duration) -> ExitClass {
        if !reached_ready || uptime < self.min_uptime {
            ExitClass::Fast
        } else {
            ExitClass::Healthy
        }
    }

    /// Returns `true` once `fast_failures` has reached the threshold.
    #[inline]
    pub fn is_exhausted(&self, fast_failures: u32) -> bool {
        self.threshold > 0 && fast_failures >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_before_ready_is_fast_regardless_of_uptime() {
        let policy = AbortPolicy::default();
        assert_eq!(policy.classify(false, Duration::from_secs(3600)), ExitClass::Fast);
    }

    #[test]
    fn zero_min_uptime_trusts_readiness() {
        let policy = AbortPolicy {
            threshold: 3,
            min_uptime: Duration::ZERO,
        };
        assert_eq!(policy.classify(true, Duration::ZERO), ExitClass::Healthy);
    }

    #[test]
    fn zero_threshold_never_aborts() {
        let policy = AbortPolicy {
            threshold: 0,
            min_uptime: Duration::ZERO,
        };
        assert!(!policy.is_exhausted(u32::MAX));
    }
}
