//! State of one MESSAGE forked to every registered device of its recipient

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sipfork_sip_core::SipUri;
use tracing::debug;

use crate::config::ForkConfig;
use crate::error::{ForkError, Result};

/// Default q-value of a contact, times 1000
pub const DEFAULT_PRIORITY: u16 = 1000;

/// What the fork keeps of the incoming request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub method: String,
    pub request_uri: SipUri,
    pub from: SipUri,
    pub to: SipUri,
    pub call_id: String,
    pub body: Option<String>,
}

/// One destination device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Device instance id (`+sip.instance`) or contact when there is none
    pub uid: String,
    pub contact: SipUri,
    /// q-value times 1000; higher goes first
    pub priority: u16,
    /// Last status received, provisional ones included
    pub status: Option<u16>,
    pub push_sent: bool,
    /// Request sent to this branch
    pub dispatched: bool,
}

impl Branch {
    pub fn is_final(&self) -> bool {
        self.status.is_some_and(|s| s >= 200)
    }

    fn failed_with_error_or_timeout(&self) -> bool {
        matches!(self.status, Some(408) | Some(503))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub status: u16,
    pub phrase: String,
}

/// 2xx, then 6xx, 3xx, 4xx, 5xx; the lower code wins within a class
fn response_rank(status: u16) -> (u8, u16) {
    let class = match status / 100 {
        2 => 0,
        6 => 1,
        3 => 2,
        4 => 3,
        _ => 4,
    };
    (class, status)
}

/// Aggregated state of a forked MESSAGE.
///
/// Without fork-late the context finishes on the first 2xx or 6xx, or once
/// every branch answered. With fork-late it stays open for devices that
/// register later and only finishes on a 6xx, an internal error or expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkMessageContext {
    request: RequestSummary,
    fork_late: bool,
    expires_at: DateTime<Utc>,
    branches: Vec<Branch>,
    keys: Vec<String>,
    best_response: Option<FinalResponse>,
    started: bool,
    finished: bool,
}

impl ForkMessageContext {
    pub fn new(request: RequestSummary, config: &ForkConfig) -> Self {
        let expiry = chrono::Duration::from_std(config.message_expiry()).unwrap_or(chrono::Duration::weeks(1));
        Self {
            request,
            fork_late: config.fork_late,
            expires_at: Utc::now() + expiry,
            branches: Vec::new(),
            keys: Vec::new(),
            best_response: None,
            started: false,
            finished: false,
        }
    }

    pub fn request(&self) -> &RequestSummary {
        &self.request
    }

    pub fn call_id(&self) -> &str {
        &self.request.call_id
    }

    pub fn is_fork_late(&self) -> bool {
        self.fork_late
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn branch(&self, uid: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.uid == uid)
    }

    pub fn best_response(&self) -> Option<&FinalResponse> {
        self.best_response.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Dispatch the highest priority branches. Returns their uids.
    pub fn start(&mut self) -> Result<Vec<String>> {
        self.ensure_not_finished()?;
        self.started = true;
        Ok(self.dispatch_next_branches())
    }

    /// Add a destination. A branch with the same uid replaces the old one.
    ///
    /// Once started, new branches are dispatched right away.
    pub fn add_branch(&mut self, uid: impl Into<String>, contact: SipUri, priority: u16) -> Result<()> {
        self.ensure_not_finished()?;
        let branch = Branch {
            uid: uid.into(),
            contact,
            priority,
            status: None,
            push_sent: false,
            dispatched: self.started,
        };
        match self.branches.iter_mut().find(|b| b.uid == branch.uid) {
            Some(existing) => *existing = branch,
            None => self.branches.push(branch),
        }
        Ok(())
    }

    /// Whether some branches still wait for a lower priority wave
    pub fn has_next_branches(&self) -> bool {
        self.branches.iter().any(|b| !b.dispatched)
    }

    /// Dispatch the next priority wave. Returns the uids dispatched.
    pub fn dispatch_next_branches(&mut self) -> Vec<String> {
        let Some(priority) = self.branches.iter().filter(|b| !b.dispatched).map(|b| b.priority).max() else {
            return Vec::new();
        };
        self.branches
            .iter_mut()
            .filter(|b| !b.dispatched && b.priority == priority)
            .map(|b| {
                b.dispatched = true;
                b.uid.clone()
            })
            .collect()
    }

    /// Whether every dispatched branch has a final response.
    ///
    /// With `ignore_errors_and_timeouts`, branches that failed with 408 or
    /// 503 do not count as answered: the message still has to reach them.
    pub fn all_current_branches_answered(&self, ignore_errors_and_timeouts: bool) -> bool {
        self.branches.iter().filter(|b| b.dispatched).all(|b| {
            if ignore_errors_and_timeouts && b.failed_with_error_or_timeout() {
                return false;
            }
            b.is_final()
        })
    }

    /// Record a response from branch `uid`. Responses after the fork
    /// finished are ignored.
    pub fn on_response(&mut self, uid: &str, status: u16, phrase: &str) -> Result<()> {
        if self.finished {
            debug!("Fork {} already finished, ignoring {} from {}", self.call_id(), status, uid);
            return Ok(());
        }
        let branch = self
            .branches
            .iter_mut()
            .find(|b| b.uid == uid)
            .ok_or_else(|| ForkError::UnknownBranch(uid.to_string()))?;
        branch.status = Some(status);
        if status < 200 {
            return Ok(());
        }

        let better = self
            .best_response
            .as_ref()
            .is_none_or(|best| response_rank(status) < response_rank(best.status));
        if better {
            self.best_response = Some(FinalResponse {
                status,
                phrase: phrase.to_string(),
            });
        }

        let class = status / 100;
        if class == 6 {
            self.finished = true;
        } else if !self.fork_late {
            if class == 2 || (self.all_current_branches_answered(false) && !self.has_next_branches()) {
                self.finished = true;
            }
        }
        Ok(())
    }

    pub fn add_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Terminate the fork with a locally generated response
    pub fn process_internal_error(&mut self, status: u16, phrase: &str) {
        if self.finished {
            return;
        }
        self.best_response = Some(FinalResponse {
            status,
            phrase: phrase.to_string(),
        });
        self.finished = true;
    }

    pub fn on_push_sent(&mut self, uid: &str) -> Result<()> {
        let branch = self
            .branches
            .iter_mut()
            .find(|b| b.uid == uid)
            .ok_or_else(|| ForkError::UnknownBranch(uid.to_string()))?;
        branch.push_sent = true;
        Ok(())
    }

    /// Should the message be sent to a device that just registered?
    ///
    /// Only fork-late contexts follow new registrations, and a device that
    /// already accepted the message is not sent it again.
    pub fn on_new_register(&self, dest: &SipUri, uid: &str) -> bool {
        if self.finished || !self.fork_late {
            return false;
        }
        match self.branch(uid) {
            Some(branch) if branch.status.is_some_and(|s| (200..300).contains(&s)) => {
                debug!("Message {} already delivered to {} ({})", self.call_id(), uid, dest);
                false
            }
            _ => true,
        }
    }

    /// Finish an expired fork, answering 408 if nobody answered
    pub fn expire(&mut self) {
        if self.best_response.is_none() {
            self.best_response = Some(FinalResponse {
                status: 408,
                phrase: "Request Timeout".to_string(),
            });
        }
        self.finished = true;
    }

    fn ensure_not_finished(&self) -> Result<()> {
        if self.finished { Err(ForkError::Finished) } else { Ok(()) }
    }
}
