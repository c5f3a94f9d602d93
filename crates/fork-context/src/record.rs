use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ForkMessageContext;
use crate::error::Result;

/// A fork context as stored in a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkMessageRecord {
    pub uuid: Uuid,
    pub expires_at: DateTime<Utc>,
    pub fork: ForkMessageContext,
}

impl ForkMessageRecord {
    pub fn new(uuid: Uuid, fork: ForkMessageContext) -> Self {
        Self {
            uuid,
            expires_at: fork.expires_at(),
            fork,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fork)?)
    }

    pub fn from_json(uuid: Uuid, json: &str) -> Result<Self> {
        let fork: ForkMessageContext = serde_json::from_str(json)?;
        Ok(Self::new(uuid, fork))
    }
}
