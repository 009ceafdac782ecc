//! Write-behind queue configuration.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_DRAIN_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriteBehindConfig {
    /// Retries after the first attempt; an intent is attempted at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    /// Pause between drain ticks while intents remain (ms).
    pub drain_delay_ms: u64,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            drain_delay_ms: DEFAULT_DRAIN_DELAY_MS,
        }
    }
}

impl From<&crate::config::WriteBehindSettings> for WriteBehindConfig {
    fn from(settings: &crate::config::WriteBehindSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            drain_delay_ms: settings.drain_delay.as_millis() as u64,
        }
    }
}

impl WriteBehindConfig {
    /// Returns the drain delay, clamping to 1ms so the worker never spins.
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms.max(1))
    }
}
