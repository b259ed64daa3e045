//! Allocation configuration loaded from environment variables.

use chrono::Duration;

/// Lock duration used when neither the request nor the environment sets one.
pub const DEFAULT_LOCK_DURATION_SECS: i64 = 30 * 60;

/// Allocation settings with sensible defaults.
///
/// Reads from environment variables:
/// - `ALLOCATION_LOCK_DURATION_SECS`: how long allocation locks live (default: `1800`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationConfig {
    pub lock_duration_secs: i64,
}

impl AllocationConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`; unparsable or non-positive values
    /// fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            lock_duration_secs: lookup("ALLOCATION_LOCK_DURATION_SECS")
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|secs| *secs > 0 && Duration::try_seconds(*secs).is_some())
                .unwrap_or(DEFAULT_LOCK_DURATION_SECS),
        }
    }

    /// Returns the lock duration, or the default one if the configured
    /// seconds do not fit a `Duration`.
    pub fn lock_duration(&self) -> Duration {
        Duration::try_seconds(self.lock_duration_secs)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_LOCK_DURATION_SECS))
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            lock_duration_secs: DEFAULT_LOCK_DURATION_SECS,
        }
    }
}
