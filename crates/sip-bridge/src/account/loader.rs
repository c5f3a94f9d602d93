//! Sources of account descriptions for a pool

use std::str::FromStr;

use async_trait::async_trait;
use sipfork_sip_core::SipUri;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info, warn};

use super::{AccountParams, Credential, parse_proxy};
use crate::config::{SecretType, SqlLoaderConfig, StaticAccountConfig};
use crate::error::{Error, Result};

/// Produces the account set a pool is (re)built from
#[async_trait]
pub trait AccountLoader: Send + Sync {
    async fn initial_load(&self) -> Result<Vec<AccountParams>>;
}

/// Accounts listed inline in the providers document
pub struct StaticLoader {
    entries: Vec<StaticAccountConfig>,
}

impl StaticLoader {
    pub fn new(entries: Vec<StaticAccountConfig>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl AccountLoader for StaticLoader {
    async fn initial_load(&self) -> Result<Vec<AccountParams>> {
        self.entries.iter().map(AccountParams::from_static).collect()
    }
}

/// Accounts read from a SQL database with the configured `initQuery`.
///
/// Result columns: `username`, `hostport`, `user_id` (or `userid`),
/// `secret_type`, `secret`, `alias_username`, `alias_hostport`,
/// `outbound_proxy`. Only `username` and `hostport` are mandatory; missing
/// or empty optional columns leave the matching field unset.
pub struct SqlLoader {
    config: SqlLoaderConfig,
}

impl SqlLoader {
    pub fn new(config: SqlLoaderConfig) -> Result<Self> {
        match config.db_backend.as_str() {
            "sqlite" | "sqlite3" => {}
            other => {
                return Err(Error::Configuration(format!("unsupported dbBackend '{}'", other)));
            }
        }
        if !config.update_query.trim().is_empty() {
            warn!("updateQuery is not supported yet and will be ignored");
        }
        Ok(Self { config })
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let connection = self.config.connection.trim();
        let options = if connection.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(connection)?
        } else {
            SqliteConnectOptions::new().filename(connection)
        };
        Ok(options.read_only(true))
    }
}

#[async_trait]
impl AccountLoader for SqlLoader {
    async fn initial_load(&self) -> Result<Vec<AccountParams>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(self.connect_options()?)
            .await?;

        let rows = sqlx::query(&self.config.init_query).fetch_all(&pool).await;
        pool.close().await;
        let rows = rows?;
        debug!("initQuery returned {} rows", rows.len());

        let accounts = rows.iter().map(account_from_row).collect::<Result<Vec<_>>>()?;
        info!("Loaded {} accounts from {}", accounts.len(), self.config.connection);
        Ok(accounts)
    }
}

fn account_from_row(row: &SqliteRow) -> Result<AccountParams> {
    let username = optional_column(row, &["username"])?;
    let hostport = optional_column(row, &["hostport"])?
        .ok_or_else(|| Error::Configuration("account row without hostport".into()))?;
    let uri = match username {
        Some(user) => format!("sip:{}@{}", user, hostport),
        None => format!("sip:{}", hostport),
    };

    let alias = match (
        optional_column(row, &["alias_username"])?,
        optional_column(row, &["alias_hostport"])?,
    ) {
        (Some(user), Some(host)) => Some(SipUri::parse(&format!("sip:{}@{}", user, host))?),
        _ => None,
    };

    let credential = match optional_column(row, &["secret"])? {
        None => None,
        Some(secret) => {
            let secret_type = optional_column(row, &["secret_type"])?
                .map(|s| SecretType::from_str(&s))
                .transpose()?
                .unwrap_or(SecretType::ClearText);
            Some(Credential::new(secret_type, secret))
        }
    };

    Ok(AccountParams {
        uri: SipUri::parse(&uri)?,
        alias,
        user_id: optional_column(row, &["user_id", "userid"])?,
        credential,
        outbound_proxy: optional_column(row, &["outbound_proxy"])?
            .as_deref()
            .map(parse_proxy)
            .transpose()?,
    })
}

/// First present column among `names`; absent, NULL and empty all read as `None`
fn optional_column(row: &SqliteRow, names: &[&str]) -> Result<Option<String>> {
    for name in names {
        match row.try_get::<Option<String>, _>(*name) {
            Ok(value) => return Ok(value.filter(|v| !v.is_empty())),
            Err(sqlx::Error::ColumnNotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}
