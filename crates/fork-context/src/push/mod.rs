//! Push notifications for destinations that cannot be reached directly.
//!
//! A [`PushBranch`] stands for one outgoing branch waiting on a device that
//! was woken up by push. [`RemotePushStrategy`] sends the notifications and
//! keeps re-sending call notifications until the branch concludes.

mod branch;
mod strategy;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use branch::{BranchListener, ForkCanceler, ForkStatus, PushBranch};
pub use strategy::RemotePushStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushType {
    Message,
    Call,
}

/// What a push notification carries; payload formatting belongs to the
/// delivery service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushInfo {
    pub push_type: PushType,
    pub call_id: String,
    pub from_name: Option<String>,
    pub from_uri: String,
    /// Device token or contact the notification is for
    pub destination: String,
    pub ttl: Duration,
    pub alert: Option<String>,
}

impl PushInfo {
    pub fn new(push_type: PushType, call_id: impl Into<String>, from_uri: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            push_type,
            call_id: call_id.into(),
            from_name: None,
            from_uri: from_uri.into(),
            destination: destination.into(),
            ttl: Duration::from_secs(30),
            alert: None,
        }
    }

    pub fn with_from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    pub fn with_alert(mut self, alert: impl Into<String>) -> Self {
        self.alert = Some(alert.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Delivery of push notifications, without delivery guarantees
#[async_trait]
pub trait PushService: Send + Sync {
    async fn send_push(&self, info: &PushInfo) -> Result<()>;
}
