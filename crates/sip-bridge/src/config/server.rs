use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Server level settings of the bridge
///
/// Loaded from an optional settings file (TOML, YAML or JSON, picked by
/// extension) overlaid with `SIPFORK_BRIDGE__*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeServerConfig {
    /// Path of the providers document
    pub providers: PathBuf,
    /// Upper bound on graceful un-registration at shutdown
    pub unregister_timeout_secs: u64,
    /// Expires value requested when registering accounts
    pub registration_expires_secs: u32,
    /// Contact address advertised in REGISTER requests
    pub contact: Option<String>,
}

impl Default for BridgeServerConfig {
    fn default() -> Self {
        Self {
            providers: PathBuf::from("providers.json"),
            unregister_timeout_secs: 5,
            registration_expires_secs: 3600,
            contact: None,
        }
    }
}

impl BridgeServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("SIPFORK_BRIDGE").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn unregister_timeout(&self) -> Duration {
        Duration::from_secs(self.unregister_timeout_secs)
    }
}
