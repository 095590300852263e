use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current Unix timestamp in seconds.
///
/// Dyn-safe so a set of reference sources can be passed to
/// [`crate::totp::TwoFactorAuth::ensure_correct_time`].
pub trait TimeProvider {
    /// Current Unix timestamp in seconds
    fn now(&self) -> u64;
}

/// A time source disagreed with the local clock by more than the leniency
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("time source #{reference} is off by {offset} seconds, more than the allowed {leniency}")]
pub struct TimeDriftError {
    /// Index of the reference source that disagreed
    pub reference: usize,
    /// Absolute offset between local and reference clocks, in seconds
    pub offset: u64,
    /// Maximum tolerated offset, in seconds
    pub leniency: u64,
}

/// The local machine clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeProvider for SystemClock {
    fn now(&self) -> u64 {
        // SAFE: the system clock is always after the UNIX epoch.
        #[allow(clippy::unwrap_used)]
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        elapsed.as_secs()
    }
}

/// A clock pinned to a fixed instant, for deterministic verification and replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub u64);

impl TimeProvider for FixedClock {
    fn now(&self) -> u64 {
        self.0
    }
}
