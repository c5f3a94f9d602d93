use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::ForkMessageRepository;
use crate::error::Result;
use crate::record::ForkMessageRecord;

/// Repository keeping serialized records in memory
#[derive(Debug, Default)]
pub struct InMemoryForkRepository {
    records: DashMap<Uuid, (DateTime<Utc>, String)>,
}

impl InMemoryForkRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.records.contains_key(&uuid)
    }
}

#[async_trait]
impl ForkMessageRepository for InMemoryForkRepository {
    async fn save(&self, record: &ForkMessageRecord) -> Result<()> {
        self.records.insert(record.uuid, (record.expires_at, record.to_json()?));
        Ok(())
    }

    async fn find(&self, uuid: Uuid) -> Result<Option<ForkMessageRecord>> {
        let json = self.records.get(&uuid).map(|entry| entry.value().1.clone());
        json.map(|json| ForkMessageRecord::from_json(uuid, &json)).transpose()
    }

    async fn delete(&self, uuid: Uuid) -> Result<()> {
        self.records.remove(&uuid);
        Ok(())
    }

    async fn find_all_expiring(&self) -> Result<Vec<ForkMessageRecord>> {
        let mut stored: Vec<(Uuid, DateTime<Utc>, String)> = self
            .records
            .iter()
            .map(|entry| (*entry.key(), entry.value().0, entry.value().1.clone()))
            .collect();
        stored.sort_by_key(|(_, expires_at, _)| *expires_at);
        stored
            .iter()
            .map(|(uuid, _, json)| ForkMessageRecord::from_json(*uuid, json))
            .collect()
    }
}
