//! Configuration for the bridging engine
//!
//! Two layers:
//! - the providers document (JSON, `schemaVersion` 2) describing providers
//!   and account pools, see [`ProvidersDocument`]
//! - server level settings (file locations, timeouts) in [`BridgeServerConfig`]

mod server;

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

pub use server::BridgeServerConfig;

/// The only providers document layout this crate understands
pub const SCHEMA_VERSION: u32 = 2;

/// Root of the providers document
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersDocument {
    pub schema_version: u32,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub account_pools: HashMap<String, AccountPoolConfig>,
}

impl ProvidersDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        let document: ProvidersDocument = serde_json::from_str(json)?;
        document.validate()?;
        Ok(document)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&json)
    }

    /// Structural checks serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(Error::Configuration(format!(
                "unsupported schemaVersion {} (expected {})",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        for provider in &self.providers {
            if !self.account_pools.contains_key(&provider.account_pool) {
                return Err(Error::Configuration(format!(
                    "provider '{}' references unknown account pool '{}'",
                    provider.name, provider.account_pool
                )));
            }
        }
        for (name, pool) in &self.account_pools {
            if pool.max_calls_per_line == 0 {
                return Err(Error::Configuration(format!("account pool '{}' has maxCallsPerLine = 0", name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    pub trigger_condition: TriggerConfig,
    pub account_to_use: AccountToUseConfig,
    pub on_account_not_found: OnAccountNotFound,
    pub outgoing_invite: OutgoingInviteConfig,
    pub account_pool: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy")]
pub enum TriggerConfig {
    Always,
    MatchRegex { pattern: String, source: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy")]
pub enum AccountToUseConfig {
    Random,
    FindInPool { source: String, by: FindBy },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindBy {
    Alias,
    Uri,
}

/// What a provider does when its selection strategy finds nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnAccountNotFound {
    NextProvider,
    Decline,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingInviteConfig {
    pub to: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub outbound_proxy: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPoolConfig {
    #[serde(default)]
    pub outbound_proxy: Option<String>,
    #[serde(default)]
    pub registration_required: bool,
    pub max_calls_per_line: u32,
    pub loader: LoaderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LoaderConfig {
    Static(Vec<StaticAccountConfig>),
    Sql(SqlLoaderConfig),
}

/// One entry of a static account list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticAccountConfig {
    pub uri: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default, alias = "userid")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub secret_type: Option<SecretType>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub outbound_proxy: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SecretType {
    #[serde(rename = "clrtxt")]
    ClearText,
    #[serde(rename = "md5")]
    Md5,
}

impl std::str::FromStr for SecretType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "clrtxt" => Ok(SecretType::ClearText),
            "md5" => Ok(SecretType::Md5),
            other => Err(Error::Configuration(format!("unsupported secret type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlLoaderConfig {
    pub db_backend: String,
    pub init_query: String,
    #[serde(default)]
    pub update_query: String,
    pub connection: String,
}
