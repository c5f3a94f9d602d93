use std::collections::HashMap;
use std::collections::hash_map::Values;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::future::join_all;
use sipfork_infra_common::errors::ErrorExt;
use sipfork_infra_common::{TaskPriority, TaskTracker};
use sipfork_sip_core::SipUri;
use tracing::{debug, info, warn};

use super::loader::AccountLoader;
use super::registration::Registrar;
use super::{Account, AccountParams, RegistrationState, parse_proxy};
use crate::config::{AccountPoolConfig, StaticAccountConfig};
use crate::error::{Error, Result};

/// Settings applied uniformly to every account of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub outbound_proxy: Option<SipUri>,
    pub registration_required: bool,
    pub max_calls_per_line: u32,
}

impl PoolSettings {
    pub fn from_config(config: &AccountPoolConfig) -> Result<Self> {
        if config.max_calls_per_line == 0 {
            return Err(Error::Configuration("maxCallsPerLine must be at least 1".into()));
        }
        Ok(Self {
            outbound_proxy: config.outbound_proxy.as_deref().map(parse_proxy).transpose()?,
            registration_required: config.registration_required,
            max_calls_per_line: config.max_calls_per_line,
        })
    }
}

/// Immutable view of a pool's accounts at one point in time
#[derive(Debug, Default)]
pub struct PoolSnapshot {
    by_uri: HashMap<String, Arc<Account>>,
    by_alias: HashMap<String, Arc<Account>>,
}

impl PoolSnapshot {
    pub fn len(&self) -> usize {
        self.by_uri.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uri.is_empty()
    }

    pub fn get_by_uri(&self, uri: &SipUri) -> Option<&Arc<Account>> {
        self.by_uri.get(&uri.lookup_key())
    }

    pub fn get_by_alias(&self, alias: &SipUri) -> Option<&Arc<Account>> {
        self.by_alias.get(&alias.lookup_key())
    }

    pub fn iter(&self) -> PoolIter<'_> {
        PoolIter(self.by_uri.values())
    }
}

impl<'a> IntoIterator for &'a PoolSnapshot {
    type Item = (&'a SipUri, &'a Arc<Account>);
    type IntoIter = PoolIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy `(uri, account)` iterator over a [`PoolSnapshot`]
pub struct PoolIter<'a>(Values<'a, String, Arc<Account>>);

impl<'a> Iterator for PoolIter<'a> {
    type Item = (&'a SipUri, &'a Arc<Account>);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|account| (account.uri(), account))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

/// Outcome of a (re)load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub added: usize,
    pub kept: usize,
    pub removed: usize,
}

/// A named set of accounts sharing one outbound proxy and registration policy.
///
/// Readers never lock: lookups and iteration go through the current
/// [`PoolSnapshot`], which reloads replace atomically.
pub struct AccountPool {
    name: String,
    settings: PoolSettings,
    snapshot: ArcSwap<PoolSnapshot>,
    registrar: Option<Arc<Registrar>>,
    tasks: TaskTracker,
    reload_lock: tokio::sync::Mutex<()>,
}

impl AccountPool {
    pub fn new(name: impl Into<String>, settings: PoolSettings, registrar: Option<Arc<Registrar>>) -> Self {
        let name = name.into();
        if registrar.is_none() && settings.registration_required {
            warn!("Pool {} requires registration but has no registrar: its accounts will stay unavailable", name);
        }
        Self {
            tasks: TaskTracker::new(format!("pool-{}", name)),
            name,
            settings,
            snapshot: ArcSwap::from_pointee(PoolSnapshot::default()),
            registrar,
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    /// Current accounts; iterate with `for (uri, account) in &*pool.snapshot()`
    pub fn snapshot(&self) -> Arc<PoolSnapshot> {
        self.snapshot.load_full()
    }

    pub fn accounts(&self) -> Vec<Arc<Account>> {
        self.snapshot().iter().map(|(_, account)| account.clone()).collect()
    }

    pub fn get_account_by_uri(&self, uri: &SipUri) -> Option<Arc<Account>> {
        self.snapshot.load().get_by_uri(uri).cloned()
    }

    pub fn get_account_by_alias(&self, alias: &SipUri) -> Option<Arc<Account>> {
        self.snapshot.load().get_by_alias(alias).cloned()
    }

    pub fn acquire_slot(&self, account: &Account) -> bool {
        account.take_slot()
    }

    pub fn release_slot(&self, account: &Account) {
        account.release_slot()
    }

    /// Populate the pool from `loader`, diffing against what is already there
    pub async fn load(&self, loader: &dyn AccountLoader) -> Result<ReloadReport> {
        let entries = loader.initial_load().await?;
        self.apply(entries).await
    }

    /// Replace the account set with a new static list.
    ///
    /// Unchanged accounts keep their identity and slot counts, new ones are
    /// registered, vanished ones are un-registered. The whole list is
    /// validated before anything changes.
    pub async fn reload_static(&self, entries: &[StaticAccountConfig]) -> Result<ReloadReport> {
        let params = entries.iter().map(AccountParams::from_static).collect::<Result<Vec<_>>>()?;
        self.apply(params).await
    }

    async fn apply(&self, entries: Vec<AccountParams>) -> Result<ReloadReport> {
        let _guard = self.reload_lock.lock().await;
        let current = self.snapshot.load_full();
        let mut next = PoolSnapshot::default();
        let mut added = Vec::new();
        // same AOR, new params: the old binding goes before the new one is made
        let mut replaced: Vec<(Arc<Account>, Arc<Account>)> = Vec::new();
        let mut kept = 0;

        for mut params in entries {
            if params.outbound_proxy.is_none() {
                params.outbound_proxy = self.settings.outbound_proxy.clone();
            }
            let key = params.uri.lookup_key();
            if next.by_uri.contains_key(&key) {
                warn!("Pool {}: duplicate account {}, keeping the first one", self.name, params.uri);
                continue;
            }

            let account = match current.by_uri.get(&key) {
                Some(existing) if existing.params() == &params => {
                    kept += 1;
                    existing.clone()
                }
                existing => {
                    let account = Arc::new(Account::new(
                        params,
                        self.settings.max_calls_per_line,
                        self.settings.registration_required,
                    ));
                    match existing {
                        Some(old) => replaced.push((old.clone(), account.clone())),
                        None => added.push(account.clone()),
                    }
                    account
                }
            };

            if let Some(alias) = account.alias() {
                let alias_key = alias.lookup_key();
                if next.by_alias.contains_key(&alias_key) {
                    warn!("Pool {}: alias {} used by several accounts, keeping the first one", self.name, alias);
                } else {
                    next.by_alias.insert(alias_key, account.clone());
                }
            }
            next.by_uri.insert(key, account);
        }

        let removed: Vec<Arc<Account>> = current
            .by_uri
            .iter()
            .filter(|(key, _)| !next.by_uri.contains_key(*key))
            .map(|(_, account)| account.clone())
            .collect();

        self.snapshot.store(Arc::new(next));
        let report = ReloadReport {
            added: added.len() + replaced.len(),
            kept,
            removed: removed.len() + replaced.len(),
        };
        info!(
            "Pool {} loaded: {} added, {} kept, {} removed",
            self.name, report.added, report.kept, report.removed
        );

        for account in added {
            self.spawn_registration(account).await;
        }
        for account in removed {
            self.spawn_unregistration(account).await;
        }
        for (old, new) in replaced {
            self.spawn_replacement(old, new).await;
        }
        Ok(report)
    }

    fn needs_registration(&self, account: &Account) -> bool {
        self.settings.registration_required || account.credential().is_some()
    }

    async fn spawn_registration(&self, account: Arc<Account>) {
        let Some(registrar) = self.registrar.clone() else {
            return;
        };
        if !self.needs_registration(&account) {
            return;
        }
        let name = format!("register {}", account.uri());
        let spawned = self
            .tasks
            .spawn(name, TaskPriority::Normal, async move {
                // failures are recorded in the account state
                let _ = registrar.register(&account).await;
            })
            .await;
        if let Err(e) = spawned {
            warn!("{}", e.with_context(format!("pool {}", self.name), "register"));
        }
    }

    async fn spawn_unregistration(&self, account: Arc<Account>) {
        let Some(registrar) = self.registrar.clone() else {
            return;
        };
        let name = format!("unregister {}", account.uri());
        let spawned = self
            .tasks
            .spawn(name, TaskPriority::Low, async move {
                let _ = registrar.unregister(&account).await;
            })
            .await;
        if let Err(e) = spawned {
            warn!("{}", e.with_context(format!("pool {}", self.name), "unregister"));
        }
    }

    /// Remove the binding of `old`, then register `new` for the same AOR
    async fn spawn_replacement(&self, old: Arc<Account>, new: Arc<Account>) {
        let Some(registrar) = self.registrar.clone() else {
            return;
        };
        let register = self.needs_registration(&new);
        let name = format!("re-register {}", new.uri());
        let spawned = self
            .tasks
            .spawn(name, TaskPriority::Normal, async move {
                let _ = registrar.unregister(&old).await;
                if register {
                    let _ = registrar.register(&new).await;
                }
            })
            .await;
        if let Err(e) = spawned {
            warn!("{}", e.with_context(format!("pool {}", self.name), "re-register"));
        }
    }

    /// Wait until every account that needs it has settled its registration.
    /// Returns `true` when all of them are registered.
    pub async fn wait_until_registered(&self, timeout: Duration) -> bool {
        let accounts = self.accounts();
        let settle = join_all(
            accounts
                .iter()
                .filter(|a| a.registration_required() || a.credential().is_some())
                .map(|a| a.registration_settled()),
        );
        match tokio::time::timeout(timeout, settle).await {
            Ok(states) => states.iter().all(|s| *s == RegistrationState::Registered),
            Err(_) => false,
        }
    }

    /// Un-register every registered account, in parallel.
    /// Returns the number of failures.
    pub async fn unregister_all(&self) -> usize {
        self.tasks.cancel_all();
        let Some(registrar) = self.registrar.clone() else {
            return 0;
        };
        let accounts = self.accounts();
        debug!("Pool {}: un-registering {} accounts", self.name, accounts.len());
        let results = join_all(accounts.iter().map(|account| registrar.unregister(account))).await;
        results.iter().filter(|r| r.is_err()).count()
    }
}
