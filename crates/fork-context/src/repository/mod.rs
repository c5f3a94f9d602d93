//! Durable storage of fork contexts

mod memory;
mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::record::ForkMessageRecord;

pub use memory::InMemoryForkRepository;
pub use sqlite::SqliteForkRepository;

#[async_trait]
pub trait ForkMessageRepository: Send + Sync {
    /// Insert or replace the record with the same uuid
    async fn save(&self, record: &ForkMessageRecord) -> Result<()>;

    async fn find(&self, uuid: Uuid) -> Result<Option<ForkMessageRecord>>;

    /// Deleting an absent record is not an error
    async fn delete(&self, uuid: Uuid) -> Result<()>;

    /// Every stored record, soonest expiry first
    async fn find_all_expiring(&self) -> Result<Vec<ForkMessageRecord>>;
}
