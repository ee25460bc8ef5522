//! Per-item exponential failure backoff

use std::time::Duration;

/// Default delay after the first failure
pub const DEFAULT_FLOOR: Duration = Duration::from_secs(5);

/// Default upper bound on the retry delay
pub const DEFAULT_CEILING: Duration = Duration::from_secs(60);

/// Exponential backoff bounded by a floor and a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    floor: Duration,
    ceiling: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_FLOOR, DEFAULT_CEILING)
    }
}

impl ExponentialBackoff {
    /// Create a backoff. A ceiling below the floor is raised to the floor.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
        }
    }

    /// Smallest delay, used after a key's first failure
    pub fn floor(&self) -> Duration {
        self.floor
    }

    /// Largest delay
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Delay for a key that has already failed `failures` times:
    /// `min(ceiling, floor * 2^failures)`
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.floor
            .checked_mul(factor)
            .map_or(self.ceiling, |d| d.min(self.ceiling))
    }
}
