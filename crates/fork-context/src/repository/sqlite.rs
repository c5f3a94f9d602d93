use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::ForkMessageRepository;
use crate::error::{ForkError, Result};
use crate::record::ForkMessageRecord;

/// Fork records in a SQLite table:
/// `fork_message_context(uuid TEXT PRIMARY KEY, expiration_date, record TEXT)`
#[derive(Clone)]
pub struct SqliteForkRepository {
    pool: SqlitePool,
}

impl SqliteForkRepository {
    /// Open (creating if needed) the database at `url` and ensure the table exists
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;
        let repository = Self { pool };
        repository.migrate().await?;
        info!("Fork repository ready at {}", url);
        Ok(repository)
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fork_message_context (
                uuid TEXT PRIMARY KEY NOT NULL,
                expiration_date TEXT NOT NULL,
                record TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ForkMessageRepository for SqliteForkRepository {
    async fn save(&self, record: &ForkMessageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO fork_message_context (uuid, expiration_date, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(uuid) DO UPDATE SET expiration_date = excluded.expiration_date, record = excluded.record",
        )
        .bind(record.uuid.to_string())
        .bind(record.expires_at)
        .bind(record.to_json()?)
        .execute(&self.pool)
        .await?;
        debug!("Saved fork {}", record.uuid);
        Ok(())
    }

    async fn find(&self, uuid: Uuid) -> Result<Option<ForkMessageRecord>> {
        let row = sqlx::query("SELECT record FROM fork_message_context WHERE uuid = ?1")
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("record")?;
                Ok(Some(ForkMessageRecord::from_json(uuid, &json)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, uuid: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM fork_message_context WHERE uuid = ?1")
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_all_expiring(&self) -> Result<Vec<ForkMessageRecord>> {
        let rows = sqlx::query("SELECT uuid, record FROM fork_message_context ORDER BY expiration_date")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let uuid: String = row.try_get("uuid")?;
                let uuid = Uuid::parse_str(&uuid).map_err(|e| ForkError::Storage(format!("bad uuid '{}': {}", uuid, e)))?;
                let json: String = row.try_get("record")?;
                ForkMessageRecord::from_json(uuid, &json)
            })
            .collect()
    }
}
