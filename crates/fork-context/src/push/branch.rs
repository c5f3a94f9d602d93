use std::sync::Weak;

use parking_lot::Mutex;
use tracing::debug;

/// How the fork ended for a branch that did not answer itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkStatus {
    #[default]
    Standard,
    AcceptedElsewhere,
    DeclinedElsewhere,
}

/// Observer of one branch's conclusion
pub trait BranchListener: Send + Sync {
    fn on_branch_canceled(&self, reason: ForkStatus);

    /// The branch got its final response
    fn on_branch_completed(&self);
}

/// Cancels the whole fork a branch belongs to
pub trait ForkCanceler: Send + Sync {
    fn cancel_fork(&self, branch_uid: &str);
}

/// Handle on an outgoing branch woken up by push
pub struct PushBranch {
    uid: String,
    listener: Mutex<Option<Weak<dyn BranchListener>>>,
    canceler: Option<Weak<dyn ForkCanceler>>,
    status: Mutex<Option<ForkStatus>>,
}

impl PushBranch {
    pub fn new(uid: impl Into<String>, canceler: Option<Weak<dyn ForkCanceler>>) -> Self {
        Self {
            uid: uid.into(),
            listener: Mutex::new(None),
            canceler,
            status: Mutex::new(None),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn set_listener(&self, listener: Weak<dyn BranchListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Set once the branch completed or was canceled
    pub fn status(&self) -> Option<ForkStatus> {
        *self.status.lock()
    }

    fn listener(&self) -> Option<std::sync::Arc<dyn BranchListener>> {
        self.listener.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn notify_completed(&self) {
        if !self.conclude(ForkStatus::Standard) {
            return;
        }
        if let Some(listener) = self.listener() {
            listener.on_branch_completed();
        }
    }

    pub fn notify_canceled(&self, reason: ForkStatus) {
        if !self.conclude(reason) {
            return;
        }
        if let Some(listener) = self.listener() {
            listener.on_branch_canceled(reason);
        }
    }

    pub fn cancel_fork(&self) {
        match self.canceler.as_ref().and_then(Weak::upgrade) {
            Some(canceler) => canceler.cancel_fork(&self.uid),
            None => debug!("Branch {}: fork already gone, nothing to cancel", self.uid),
        }
    }

    /// First conclusion wins
    fn conclude(&self, status: ForkStatus) -> bool {
        let mut current = self.status.lock();
        if current.is_some() {
            return false;
        }
        *current = Some(status);
        true
    }
}

impl std::fmt::Debug for PushBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushBranch")
            .field("uid", &self.uid)
            .field("status", &self.status())
            .finish()
    }
}
