//! A [`ForkMessageContext`] that moves itself to storage while idle.
//!
//! ```text
//!   IN_MEMORY ──(all branches answered)──▶ SAVING ──ok──▶ IN_DATABASE
//!       ▲                                    │                 │
//!       └──────────────(save failed)─────────┘                 │
//!       ▲                                                      │
//!       └──────ok── RESTORING ◀──(response, register, check)───┘
//! ```
//!
//! Every operation takes the proxy mutex for its whole duration, so a save
//! or restore never interleaves with a branch update. The state is mirrored
//! in an atomic for lock-free observation.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use sipfork_infra_common::LogContext;
use sipfork_sip_core::SipUri;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{Instrument, Level, debug, error, info, warn};
use uuid::Uuid;

use crate::context::{Branch, FinalResponse, ForkMessageContext};
use crate::error::{ForkError, Result};
use crate::record::ForkMessageRecord;
use crate::repository::ForkMessageRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProxyState {
    InMemory = 0,
    Saving = 1,
    InDatabase = 2,
    Restoring = 3,
}

impl ProxyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProxyState::InMemory,
            1 => ProxyState::Saving,
            2 => ProxyState::InDatabase,
            _ => ProxyState::Restoring,
        }
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyState::InMemory => write!(f, "IN_MEMORY"),
            ProxyState::Saving => write!(f, "SAVING"),
            ProxyState::InDatabase => write!(f, "IN_DATABASE"),
            ProxyState::Restoring => write!(f, "RESTORING"),
        }
    }
}

/// Told when a proxied fork finishes, after its stored copy is deleted
pub trait ForkContextListener: Send + Sync {
    fn on_fork_context_finished(&self, call_id: &str, uuid: Option<Uuid>);
}

struct Inner {
    /// Live context; `None` while in the database
    fork: Option<ForkMessageContext>,
    /// Storage key, assigned at first save
    uuid: Option<Uuid>,
}

pub struct ForkMessageContextDbProxy {
    call_id: String,
    inner: Mutex<Inner>,
    state: AtomicU8,
    repository: Arc<dyn ForkMessageRepository>,
    listener: Option<Weak<dyn ForkContextListener>>,
}

impl ForkMessageContextDbProxy {
    pub fn new(
        fork: ForkMessageContext,
        repository: Arc<dyn ForkMessageRepository>,
        listener: Option<Weak<dyn ForkContextListener>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            call_id: fork.call_id().to_string(),
            inner: Mutex::new(Inner {
                fork: Some(fork),
                uuid: None,
            }),
            state: AtomicU8::new(ProxyState::InMemory as u8),
            repository,
            listener,
        })
    }

    /// Proxy for a record found in storage at startup; the context stays
    /// there until an operation needs it.
    pub fn from_record(
        record: &ForkMessageRecord,
        repository: Arc<dyn ForkMessageRepository>,
        listener: Option<Weak<dyn ForkContextListener>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            call_id: record.fork.call_id().to_string(),
            inner: Mutex::new(Inner {
                fork: None,
                uuid: Some(record.uuid),
            }),
            state: AtomicU8::new(ProxyState::InDatabase as u8),
            repository,
            listener,
        })
    }

    /// Recreate proxies for every fork left in storage
    pub async fn restore_all(
        repository: Arc<dyn ForkMessageRepository>,
        listener: Option<Weak<dyn ForkContextListener>>,
    ) -> Result<Vec<Arc<Self>>> {
        let records = repository.find_all_expiring().await?;
        info!("Found {} fork contexts in storage", records.len());
        Ok(records
            .iter()
            .map(|record| Self::from_record(record, repository.clone(), listener.clone()))
            .collect())
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn state(&self) -> ProxyState {
        ProxyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProxyState) {
        debug!("Fork {}: {} -> {}", self.call_id, self.state(), state);
        self.state.store(state as u8, Ordering::Release);
    }

    pub async fn uuid(&self) -> Option<Uuid> {
        self.inner.lock().await.uuid
    }

    /// Copy of the live context, `None` while it is stored
    pub async fn snapshot(&self) -> Option<ForkMessageContext> {
        self.inner.lock().await.fork.clone()
    }

    pub async fn start(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let fork = self.live("start", &mut inner)?;
        fork.start()
    }

    pub async fn add_branch(&self, uid: &str, contact: SipUri, priority: u16) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.live("add_branch", &mut inner)?.add_branch(uid, contact, priority)
    }

    /// Dispatch the next priority wave
    pub async fn dispatch_next_branches(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        Ok(self.live("dispatch_next_branches", &mut inner)?.dispatch_next_branches())
    }

    pub async fn add_key(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.live("add_key", &mut inner)?.add_key(key);
        Ok(())
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        Ok(self.live("keys", &mut inner)?.keys().to_vec())
    }

    pub async fn on_push_sent(&self, uid: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.live("on_push_sent", &mut inner)?.on_push_sent(uid)
    }

    pub async fn branches(&self) -> Result<Vec<Branch>> {
        let mut inner = self.inner.lock().await;
        Ok(self.live("branches", &mut inner)?.branches().to_vec())
    }

    pub async fn best_response(&self) -> Result<Option<FinalResponse>> {
        let mut inner = self.inner.lock().await;
        Ok(self.live("best_response", &mut inner)?.best_response().cloned())
    }

    /// A stored fork has every current branch answered
    pub async fn all_current_branches_answered(&self, ignore_errors_and_timeouts: bool) -> bool {
        let inner = self.inner.lock().await;
        match &inner.fork {
            Some(fork) => fork.all_current_branches_answered(ignore_errors_and_timeouts),
            None => true,
        }
    }

    /// A stored fork has no pending wave
    pub async fn has_next_branches(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.fork.as_ref().is_some_and(|fork| fork.has_next_branches())
    }

    pub async fn process_internal_error(&self, status: u16, phrase: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let fork = self.live("process_internal_error", &mut inner)?;
        if fork.is_finished() {
            debug!("Fork {} already finished, ignoring internal error {}", self.call_id, status);
            return Ok(());
        }
        fork.process_internal_error(status, phrase);
        self.finish(inner).await;
        Ok(())
    }

    /// Record a branch response, restoring the fork first if needed.
    ///
    /// Finishing deletes the stored copy and notifies the listener; once
    /// every branch answered an unfinished fork is moved to storage.
    pub async fn on_response(&self, uid: &str, status: u16, phrase: &str) -> Result<()> {
        let span = self.log_context("on_response").span(Level::DEBUG);
        async {
            let mut inner = self.inner.lock().await;
            self.ensure_in_memory(&mut inner).await?;
            let fork = self.live("on_response", &mut inner)?;
            let was_finished = fork.is_finished();
            fork.on_response(uid, status, phrase)?;

            if fork.is_finished() {
                if !was_finished {
                    self.finish(inner).await;
                }
            } else if fork.all_current_branches_answered(true) && !fork.has_next_branches() {
                self.save(&mut inner).await;
            }
            Ok::<(), ForkError>(())
        }
        .instrument(span)
        .await
    }

    /// Should the message go to a newly registered device?
    ///
    /// Restores the fork to answer. When the answer is yes the fork stays in
    /// memory for the caller to add the branch; otherwise it goes back to
    /// storage.
    pub async fn on_new_register(&self, dest: &SipUri, uid: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let was_stored = inner.fork.is_none();
        self.ensure_in_memory(&mut inner).await?;
        let fork = self.live("on_new_register", &mut inner)?;
        let dispatch = fork.on_new_register(dest, uid);
        if !dispatch && was_stored && !fork.is_finished() {
            self.save(&mut inner).await;
        }
        Ok(dispatch)
    }

    /// A stored fork is restored to answer and saved again when still open
    pub async fn is_finished(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let was_stored = inner.fork.is_none();
        self.ensure_in_memory(&mut inner).await?;
        let finished = self.live("is_finished", &mut inner)?.is_finished();
        if was_stored && !finished {
            self.save(&mut inner).await;
        }
        Ok(finished)
    }

    /// Finish the fork because its lifetime ran out; no-op once finished
    pub async fn expire(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_in_memory(&mut inner).await?;
        let fork = self.live("expire", &mut inner)?;
        if fork.is_finished() {
            return Ok(());
        }
        fork.expire();
        self.finish(inner).await;
        Ok(())
    }

    /// The live context, or a state violation
    fn live<'a>(&self, method: &'static str, inner: &'a mut Inner) -> Result<&'a mut ForkMessageContext> {
        let actual = self.state();
        match inner.fork.as_mut() {
            Some(fork) if actual == ProxyState::InMemory => Ok(fork),
            _ => {
                error!("Fork {}: {} called in state {}", self.call_id, method, actual);
                Err(ForkError::StateViolation {
                    method,
                    expected: ProxyState::InMemory,
                    actual,
                })
            }
        }
    }

    async fn ensure_in_memory(&self, inner: &mut Inner) -> Result<()> {
        if inner.fork.is_some() {
            return Ok(());
        }
        let Some(uuid) = inner.uuid else {
            return Err(ForkError::StateViolation {
                method: "restore",
                expected: ProxyState::InDatabase,
                actual: self.state(),
            });
        };

        self.set_state(ProxyState::Restoring);
        let found = self.repository.find(uuid).await;
        match found {
            Ok(Some(record)) => {
                debug!("Fork {} restored from storage ({})", self.call_id, uuid);
                inner.fork = Some(record.fork);
                self.set_state(ProxyState::InMemory);
                Ok(())
            }
            Ok(None) => {
                self.set_state(ProxyState::InDatabase);
                error!("Fork {} ({}) vanished from storage", self.call_id, uuid);
                Err(ForkError::Restore {
                    uuid,
                    reason: "record not found".into(),
                })
            }
            Err(e) => {
                self.set_state(ProxyState::InDatabase);
                error!("Fork {} ({}) could not be restored: {}", self.call_id, uuid, e);
                Err(ForkError::Restore {
                    uuid,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Move the live context to storage; on failure it stays in memory
    async fn save(&self, inner: &mut Inner) {
        let Some(fork) = inner.fork.take() else {
            return;
        };
        self.set_state(ProxyState::Saving);
        let uuid = *inner.uuid.get_or_insert_with(Uuid::new_v4);
        let record = ForkMessageRecord::new(uuid, fork);

        match self.repository.save(&record).await {
            Ok(()) => {
                debug!("Fork {} saved as {}", self.call_id, uuid);
                self.set_state(ProxyState::InDatabase);
            }
            Err(e) => {
                warn!("Fork {} could not be saved, keeping it in memory: {}", self.call_id, e);
                inner.fork = Some(record.fork);
                self.set_state(ProxyState::InMemory);
            }
        }
    }

    async fn finish(&self, inner: MutexGuard<'_, Inner>) {
        let uuid = inner.uuid;
        if let Some(uuid) = uuid {
            if let Err(e) = self.repository.delete(uuid).await {
                warn!("Fork {}: stored copy {} could not be deleted: {}", self.call_id, uuid, e);
            }
        }
        drop(inner);

        info!("Fork {} finished", self.call_id);
        if let Some(listener) = self.listener.as_ref().and_then(Weak::upgrade) {
            listener.on_fork_context_finished(&self.call_id, uuid);
        }
    }

    fn log_context(&self, operation: &str) -> LogContext {
        LogContext::with_operation("fork-context", operation).with_field("call_id", self.call_id.as_str())
    }
}

impl fmt::Debug for ForkMessageContextDbProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkMessageContextDbProxy")
            .field("call_id", &self.call_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForkConfig;
    use crate::context::DEFAULT_PRIORITY;
    use crate::context::tests::{context, request, uri};
    use crate::repository::InMemoryForkRepository;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Finished(SyncMutex<Vec<(String, Option<Uuid>)>>);

    impl ForkContextListener for Finished {
        fn on_fork_context_finished(&self, call_id: &str, uuid: Option<Uuid>) {
            self.0.lock().push((call_id.to_string(), uuid));
        }
    }

    /// Storage that can be switched off
    #[derive(Default)]
    struct Flaky {
        inner: InMemoryForkRepository,
        failing: AtomicBool,
    }

    impl Flaky {
        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(ForkError::Storage("database is down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ForkMessageRepository for Flaky {
        async fn save(&self, record: &ForkMessageRecord) -> Result<()> {
            self.check()?;
            self.inner.save(record).await
        }
        async fn find(&self, uuid: Uuid) -> Result<Option<ForkMessageRecord>> {
            self.check()?;
            self.inner.find(uuid).await
        }
        async fn delete(&self, uuid: Uuid) -> Result<()> {
            self.check()?;
            self.inner.delete(uuid).await
        }
        async fn find_all_expiring(&self) -> Result<Vec<ForkMessageRecord>> {
            self.check()?;
            self.inner.find_all_expiring().await
        }
    }

    async fn started(repository: Arc<dyn ForkMessageRepository>, listener: &Arc<Finished>) -> Arc<ForkMessageContextDbProxy> {
        let listener: Arc<dyn ForkContextListener> = listener.clone();
        let proxy = ForkMessageContextDbProxy::new(context(true), repository, Some(Arc::downgrade(&listener)));
        proxy.add_key("sip:bob@sip.example.org").await.unwrap();
        proxy.start().await.unwrap();
        proxy
    }

    #[tokio::test]
    async fn saves_when_idle_and_restores_identically() {
        let repository = Arc::new(InMemoryForkRepository::new());
        let listener = Arc::new(Finished::default());
        let proxy = started(repository.clone(), &listener).await;

        proxy.on_response("phone", 200, "OK").await.unwrap();
        assert_eq!(proxy.state(), ProxyState::InMemory);
        let before_save = {
            let mut expected = proxy.snapshot().await.unwrap();
            expected.on_response("laptop", 202, "Accepted").unwrap();
            expected
        };

        proxy.on_response("laptop", 202, "Accepted").await.unwrap();
        assert_eq!(proxy.state(), ProxyState::InDatabase);
        assert!(proxy.snapshot().await.is_none());
        let uuid = proxy.uuid().await.unwrap();
        assert!(repository.contains(uuid));

        // checking restores, then the idle fork goes back to storage
        assert!(!proxy.is_finished().await.unwrap());
        assert_eq!(proxy.state(), ProxyState::InDatabase);
        assert_eq!(repository.find(uuid).await.unwrap().unwrap().fork, before_save);

        assert!(proxy.on_new_register(&uri("sip:bob@10.0.0.3"), "tablet").await.unwrap());
        assert_eq!(proxy.state(), ProxyState::InMemory);
        assert_eq!(proxy.snapshot().await.unwrap(), before_save);
        assert_eq!(proxy.keys().await.unwrap(), vec!["sip:bob@sip.example.org".to_string()]);
        assert_eq!(proxy.uuid().await, Some(uuid));
    }

    #[tokio::test]
    async fn memory_only_operations_fail_loudly_when_stored() {
        let repository = Arc::new(InMemoryForkRepository::new());
        let listener = Arc::new(Finished::default());
        let proxy = started(repository, &listener).await;
        proxy.on_response("phone", 200, "OK").await.unwrap();
        proxy.on_response("laptop", 200, "OK").await.unwrap();
        assert_eq!(proxy.state(), ProxyState::InDatabase);

        let err = proxy.add_branch("tablet", uri("sip:bob@10.0.0.3"), DEFAULT_PRIORITY).await.unwrap_err();
        assert!(matches!(
            err,
            ForkError::StateViolation { method: "add_branch", expected: ProxyState::InMemory, actual: ProxyState::InDatabase }
        ));
        assert!(proxy.keys().await.is_err());
        assert!(proxy.start().await.is_err());
        assert!(proxy.all_current_branches_answered(false).await);
        assert!(!proxy.has_next_branches().await);
    }

    #[tokio::test]
    async fn new_register_restores_then_branch_can_be_added() {
        let repository = Arc::new(InMemoryForkRepository::new());
        let listener = Arc::new(Finished::default());
        let proxy = started(repository.clone(), &listener).await;
        proxy.on_response("phone", 200, "OK").await.unwrap();
        proxy.on_response("laptop", 408, "Request Timeout").await.unwrap();
        // laptop timed out: the message still has to reach it
        assert_eq!(proxy.state(), ProxyState::InMemory);
        proxy.on_response("laptop", 200, "OK").await.unwrap();
        assert_eq!(proxy.state(), ProxyState::InDatabase);

        // already delivered to the phone: back to storage
        assert!(!proxy.on_new_register(&uri("sip:bob@10.0.0.1"), "phone").await.unwrap());
        assert_eq!(proxy.state(), ProxyState::InDatabase);

        assert!(proxy.on_new_register(&uri("sip:bob@10.0.0.3"), "tablet").await.unwrap());
        assert_eq!(proxy.state(), ProxyState::InMemory);
        proxy.add_branch("tablet", uri("sip:bob@10.0.0.3"), DEFAULT_PRIORITY).await.unwrap();
        proxy.on_response("tablet", 200, "OK").await.unwrap();
        assert_eq!(proxy.state(), ProxyState::InDatabase);
    }

    #[tokio::test]
    async fn save_failure_keeps_the_fork_in_memory() {
        let repository = Arc::new(Flaky::default());
        let listener = Arc::new(Finished::default());
        let proxy = started(repository.clone(), &listener).await;

        repository.failing.store(true, Ordering::SeqCst);
        proxy.on_response("phone", 200, "OK").await.unwrap();
        proxy.on_response("laptop", 200, "OK").await.unwrap();
        assert_eq!(proxy.state(), ProxyState::InMemory);
        assert_eq!(proxy.branches().await.unwrap().len(), 2);

        // next idle point retries
        repository.failing.store(false, Ordering::SeqCst);
        proxy.add_branch("tablet", uri("sip:bob@10.0.0.3"), DEFAULT_PRIORITY).await.unwrap();
        proxy.on_response("tablet", 200, "OK").await.unwrap();
        assert_eq!(proxy.state(), ProxyState::InDatabase);
    }

    #[tokio::test]
    async fn restore_failure_is_reported() {
        let repository = Arc::new(Flaky::default());
        let listener = Arc::new(Finished::default());
        let proxy = started(repository.clone(), &listener).await;
        proxy.on_response("phone", 200, "OK").await.unwrap();
        proxy.on_response("laptop", 200, "OK").await.unwrap();

        repository.failing.store(true, Ordering::SeqCst);
        let err = proxy.on_response("laptop", 200, "OK").await.unwrap_err();
        assert!(matches!(err, ForkError::Restore { .. }));
        assert_eq!(proxy.state(), ProxyState::InDatabase);

        repository.failing.store(false, Ordering::SeqCst);
        assert!(!proxy.is_finished().await.unwrap());
    }

    #[tokio::test]
    async fn finishing_deletes_storage_and_notifies() {
        let repository = Arc::new(InMemoryForkRepository::new());
        let listener = Arc::new(Finished::default());
        let proxy = started(repository.clone(), &listener).await;
        proxy.on_response("phone", 200, "OK").await.unwrap();
        proxy.on_response("laptop", 200, "OK").await.unwrap();
        let uuid = proxy.uuid().await;
        assert_eq!(repository.len(), 1);

        proxy.expire().await.unwrap();
        assert!(repository.is_empty());
        assert_eq!(*listener.0.lock(), vec![("msg-1".to_string(), uuid)]);
        assert!(proxy.is_finished().await.unwrap());
    }

    #[tokio::test]
    async fn proxies_come_back_from_storage() {
        let repository: Arc<dyn ForkMessageRepository> = Arc::new(InMemoryForkRepository::new());
        let listener = Arc::new(Finished::default());
        let proxy = started(repository.clone(), &listener).await;
        proxy.on_response("phone", 200, "OK").await.unwrap();
        proxy.on_response("laptop", 200, "OK").await.unwrap();
        let uuid = proxy.uuid().await;

        let restored = ForkMessageContextDbProxy::restore_all(repository, None).await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].state(), ProxyState::InDatabase);
        assert_eq!(restored[0].uuid().await, uuid);
        assert_eq!(restored[0].call_id(), "msg-1");
        restored[0].process_internal_error(500, "boom").await.unwrap_err();
    }

    #[tokio::test]
    async fn finished_fork_notifies_once() {
        let repository = Arc::new(InMemoryForkRepository::new());
        let listener = Arc::new(Finished::default());
        let as_listener: Arc<dyn ForkContextListener> = listener.clone();
        let proxy = ForkMessageContextDbProxy::new(context(false), repository, Some(Arc::downgrade(&as_listener)));
        proxy.start().await.unwrap();

        proxy.on_response("phone", 200, "OK").await.unwrap();
        proxy.on_response("laptop", 200, "OK").await.unwrap();
        proxy.on_response("laptop", 486, "Busy Here").await.unwrap();
        proxy.expire().await.unwrap();
        proxy.process_internal_error(500, "Server Internal Error").await.unwrap();

        assert_eq!(*listener.0.lock(), vec![("msg-1".to_string(), None)]);
        assert_eq!(proxy.best_response().await.unwrap().unwrap().status, 200);
        assert_eq!(proxy.state(), ProxyState::InMemory);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_operations_lose_no_update() {
        let repository = Arc::new(InMemoryForkRepository::new());
        let listener = Arc::new(Finished::default());
        let as_listener: Arc<dyn ForkContextListener> = listener.clone();
        let config = ForkConfig {
            fork_late: true,
            ..ForkConfig::default()
        };
        let proxy = ForkMessageContextDbProxy::new(
            ForkMessageContext::new(request(), &config),
            repository.clone(),
            Some(Arc::downgrade(&as_listener)),
        );
        proxy.start().await.unwrap();

        let uids: Vec<String> = (0..32).map(|i| format!("device-{}", i)).collect();
        let adds: Vec<_> = uids
            .iter()
            .map(|uid| {
                let proxy = proxy.clone();
                let uid = uid.clone();
                tokio::spawn(async move { proxy.add_branch(&uid, uri("sip:bob@10.0.0.9"), DEFAULT_PRIORITY).await })
            })
            .collect();
        for add in adds {
            add.await.unwrap().unwrap();
        }
        assert_eq!(proxy.branches().await.unwrap().len(), 32);

        let mut tasks = Vec::new();
        for uid in &uids {
            let responder = proxy.clone();
            let uid = uid.clone();
            tasks.push(tokio::spawn(async move { responder.on_response(&uid, 200, "OK").await.map(|_| ()) }));
            let checker = proxy.clone();
            tasks.push(tokio::spawn(async move { checker.is_finished().await.map(|_| ()) }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(proxy.state(), ProxyState::InDatabase);
        let uuid = proxy.uuid().await.unwrap();
        let stored = repository.find(uuid).await.unwrap().unwrap();
        assert!(stored.fork.branches().iter().all(|b| b.status == Some(200)));
        assert_eq!(stored.fork.branches().len(), 32);
        assert!(listener.0.lock().is_empty());
    }
}
