use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::warn;

use crate::account::Account;

/// Which account each in-flight call occupies a slot on.
///
/// Holds weak references so a call never keeps an account alive after a
/// reload removed it from its pool.
#[derive(Debug, Default)]
pub struct OccupiedSlots {
    calls: DashMap<String, Weak<Account>>,
}

impl OccupiedSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a slot on `account` for `call_id`; `false` when the account is full
    pub fn reserve(&self, call_id: &str, account: &Arc<Account>) -> bool {
        if !account.take_slot() {
            return false;
        }
        if let Some(previous) = self.calls.insert(call_id.to_string(), Arc::downgrade(account)) {
            warn!("Call {} reserved a slot twice, releasing the previous one", call_id);
            if let Some(previous) = previous.upgrade() {
                previous.release_slot();
            }
        }
        true
    }

    /// Give back the slot held by `call_id`, if any
    pub fn release(&self, call_id: &str) -> bool {
        match self.calls.remove(call_id) {
            Some((_, account)) => {
                if let Some(account) = account.upgrade() {
                    account.release_slot();
                }
                true
            }
            None => false,
        }
    }

    /// Account still backing `call_id`, if both are alive
    pub fn account_for(&self, call_id: &str) -> Option<Arc<Account>> {
        self.calls.get(call_id).and_then(|entry| entry.value().upgrade())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
