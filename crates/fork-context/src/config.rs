use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Settings of forked MESSAGE contexts and call push notifications
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ForkConfig {
    /// Keep message forks open for devices registering later
    pub fork_late: bool,
    /// Lifetime of a fork-late message context
    pub message_expiry_secs: u64,
    /// Delay between two call push notifications; 0 sends only one
    pub call_push_interval_secs: u64,
    /// Give up on a ringing call branch after this long
    pub call_ringing_timeout_secs: u64,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            fork_late: false,
            message_expiry_secs: 7 * 24 * 3600,
            call_push_interval_secs: 2,
            call_ringing_timeout_secs: 45,
        }
    }
}

impl ForkConfig {
    /// Optional settings file overlaid with `SIPFORK_FORK__*` variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("SIPFORK_FORK").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn message_expiry(&self) -> Duration {
        Duration::from_secs(self.message_expiry_secs)
    }

    pub fn call_push_interval(&self) -> Duration {
        Duration::from_secs(self.call_push_interval_secs)
    }

    pub fn call_ringing_timeout(&self) -> Duration {
        Duration::from_secs(self.call_ringing_timeout_secs)
    }
}
