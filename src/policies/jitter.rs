//! # Jitter for respawn delays.
//!
//! [`JitterPolicy`] randomizes backoff delays so that many workers crashing at
//! the same moment (a bad deploy, a shared dependency going away) do not all
//! respawn in lockstep.
//!
//! - [`JitterPolicy::None`]: exact delay
//! - [`JitterPolicy::Full`]: random in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2 + random[0, delay/2]`
//! - [`JitterPolicy::Decorrelated`]: random in `[base, prev * 3]`, capped

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of respawn delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use exact backoff delay.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay/2 + random[0, delay/2]`.
    Equal,
    /// Random in `[base, prev * 3]`, capped at max.
    ///
    /// Needs context; see [`apply_decorrelated`](Self::apply_decorrelated).
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    ///
    /// `Decorrelated` returns the input unchanged here.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => delay,
            JitterPolicy::Full => random_up_to(delay.as_millis() as u64),
            JitterPolicy::Equal => {
                let half = delay.as_millis() as u64 / 2;
                Duration::from_millis(half) + random_up_to(half)
            }
        }
    }

    /// Applies decorrelated jitter with full context.
    ///
    /// Falls back to `apply(prev)` for other policies.
    pub fn apply_decorrelated(&self, base: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(prev);
        }

        let base_ms = base.as_millis() as u64;
        let upper = (prev.as_millis() as u64)
            .saturating_mul(3)
            .min(max.as_millis() as u64)
            .max(base_ms);

        if base_ms >= upper {
            return base;
        }
        Duration::from_millis(rand::rng().random_range(base_ms..=upper))
    }
}

fn random_up_to(ms: u64) -> Duration {
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_stays_zero() {
        for p in [JitterPolicy::Full, JitterPolicy::Equal, JitterPolicy::None] {
            assert_eq!(p.apply(Duration::ZERO), Duration::ZERO);
        }
    }

    #[test]
    fn decorrelated_upper_bound_is_capped() {
        let p = JitterPolicy::Decorrelated;
        for _ in 0..50 {
            let d = p.apply_decorrelated(
                Duration::from_millis(10),
                Duration::from_secs(100),
                Duration::from_secs(1),
            );
            assert!(d <= Duration::from_secs(1));
            assert!(d >= Duration::from_millis(10));
        }
    }
}
