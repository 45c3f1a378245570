//! Cache store configuration.

use std::{path::PathBuf, time::Duration};

use super::persist::FlushPolicy;

const DEFAULT_CACHE_DIRECTORY: &str = "var/cache";
const DEFAULT_FLUSH_DEBOUNCE_MS: u64 = 250;

/// Resolved cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Persist stores to `directory`; when false stores live in memory only
    /// and calculation routes behave as if no client cache existed.
    pub enabled: bool,
    pub directory: PathBuf,
    /// Quiet period before a debounced flush. Zero flushes inside every `set`.
    pub flush_debounce: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from(DEFAULT_CACHE_DIRECTORY),
            flush_debounce: Duration::from_millis(DEFAULT_FLUSH_DEBOUNCE_MS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            directory: settings.directory.clone(),
            flush_debounce: settings.flush_debounce,
        }
    }
}

impl CacheConfig {
    pub fn flush_policy(&self) -> FlushPolicy {
        if self.flush_debounce.is_zero() {
            FlushPolicy::Eager
        } else {
            FlushPolicy::Debounced(self.flush_debounce)
        }
    }
}
