//! The bridge application: ordered providers, their pools, and the slot
//! bookkeeping for in-flight calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use sipfork_sip_core::CallView;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::account::{AccountLoader, AccountPool, PoolSettings, Registrar, RegistrationClient, SqlLoader, StaticLoader};
use crate::config::{BridgeServerConfig, LoaderConfig, ProvidersDocument};
use crate::error::{Error, Result};
use crate::provider::{Action, DeclineReason, SipProvider};
use crate::slots::OccupiedSlots;

pub struct BridgeApplication {
    providers: Vec<SipProvider>,
    pools: HashMap<String, Arc<AccountPool>>,
    slots: OccupiedSlots,
    unregister_timeout: Duration,
    stopping: AtomicBool,
}

impl BridgeApplication {
    pub fn new(providers: Vec<SipProvider>, unregister_timeout: Duration) -> Self {
        let mut pools = HashMap::new();
        for provider in &providers {
            let pool = provider.account_pool();
            pools.entry(pool.name().to_string()).or_insert_with(|| pool.clone());
        }
        Self {
            providers,
            pools,
            slots: OccupiedSlots::new(),
            unregister_timeout,
            stopping: AtomicBool::new(false),
        }
    }

    /// Build pools and providers from a providers document.
    ///
    /// Every pool is loaded before this returns; registrations continue in
    /// the background. Any configuration error aborts the whole build.
    pub async fn from_document(
        document: &ProvidersDocument,
        registrar: Option<Arc<Registrar>>,
        unregister_timeout: Duration,
    ) -> Result<Self> {
        document.validate()?;

        let mut pools = HashMap::new();
        for (name, pool_config) in &document.account_pools {
            let settings = PoolSettings::from_config(pool_config)
                .map_err(|e| Error::Configuration(format!("account pool '{}': {}", name, e)))?;
            let pool = Arc::new(AccountPool::new(name.clone(), settings, registrar.clone()));
            let loader: Box<dyn AccountLoader> = match &pool_config.loader {
                LoaderConfig::Static(entries) => Box::new(StaticLoader::new(entries.clone())),
                LoaderConfig::Sql(sql) => Box::new(SqlLoader::new(sql.clone())?),
            };
            pool.load(loader.as_ref()).await?;
            pools.insert(name.clone(), pool);
        }

        let mut providers = Vec::with_capacity(document.providers.len());
        for provider_config in &document.providers {
            let pool = pools.get(&provider_config.account_pool).cloned().ok_or_else(|| {
                Error::Configuration(format!("unknown account pool '{}'", provider_config.account_pool))
            })?;
            let provider = SipProvider::from_config(provider_config, pool)
                .map_err(|e| Error::Configuration(format!("provider '{}': {}", provider_config.name, e)))?;
            providers.push(provider);
        }

        let mut application = Self::new(providers, unregister_timeout);
        // pools no provider uses still get registered and shut down
        for (name, pool) in pools {
            application.pools.entry(name).or_insert(pool);
        }
        info!(
            "Bridge started with {} providers and {} account pools",
            application.providers.len(),
            application.pools.len()
        );
        Ok(application)
    }

    /// Load the providers document named by `config`
    pub async fn from_config(config: &BridgeServerConfig, client: Option<Arc<dyn RegistrationClient>>) -> Result<Self> {
        let document = ProvidersDocument::from_file(&config.providers).await?;
        let registrar = client.map(|client| {
            let registrar = Registrar::new(client, config.registration_expires_secs);
            Arc::new(match &config.contact {
                Some(contact) => registrar.with_contact(contact.clone()),
                None => registrar,
            })
        });
        Self::from_document(&document, registrar, config.unregister_timeout()).await
    }

    pub fn providers(&self) -> &[SipProvider] {
        &self.providers
    }

    pub fn pool(&self, name: &str) -> Option<&Arc<AccountPool>> {
        self.pools.get(name)
    }

    pub fn occupied_slots(&self) -> &OccupiedSlots {
        &self.slots
    }

    /// Walk the providers in order; the first one returning an action wins.
    /// A call no provider handles is declined.
    pub fn on_call_create(&self, call: &dyn CallView) -> Action {
        if self.stopping.load(Ordering::Acquire) {
            debug!("Bridge stopping, declining call {}", call.call_id());
            return Action::Decline(DeclineReason::NotAcceptable);
        }
        for provider in &self.providers {
            if let Some(action) = provider.on_call_create(call, &self.slots) {
                return action;
            }
        }
        debug!("No provider handled call {}", call.call_id());
        Action::Decline(DeclineReason::NotAcceptable)
    }

    pub fn on_message(&self, message: &dyn CallView) -> Action {
        for provider in &self.providers {
            if let Some(action) = provider.on_message(message) {
                return action;
            }
        }
        debug!("No provider handled message {}", message.call_id());
        Action::Decline(DeclineReason::NotAcceptable)
    }

    /// Release the slot held by a finished call
    pub fn on_call_end(&self, call_id: &str) {
        if !self.slots.release(call_id) {
            debug!("Call {} ended without holding a slot", call_id);
        }
    }

    /// Start graceful shutdown: new calls are declined and every account is
    /// un-registered in parallel, bounded by the configured timeout.
    ///
    /// Returns immediately; poll or await the handle for completion.
    pub fn stop(&self) -> ShutdownHandle {
        self.stopping.store(true, Ordering::Release);
        let pools: Vec<Arc<AccountPool>> = self.pools.values().cloned().collect();
        let timeout = self.unregister_timeout;
        let accounts: usize = pools.iter().map(|p| p.len()).sum();

        let task = tokio::spawn(async move {
            info!("Un-registering {} accounts (timeout {:?})", accounts, timeout);
            let unregistration = join_all(pools.iter().map(|pool| pool.unregister_all()));
            match tokio::time::timeout(timeout, unregistration).await {
                Ok(failures) => {
                    let failed: usize = failures.iter().sum();
                    if failed > 0 {
                        warn!("{} accounts failed to un-register", failed);
                    }
                    ShutdownReport { accounts, failed, timed_out: false }
                }
                Err(_) => {
                    warn!("Un-registration did not complete within {:?}", timeout);
                    ShutdownReport { accounts, failed: 0, timed_out: true }
                }
            }
        });
        ShutdownHandle { task }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub accounts: usize,
    pub failed: usize,
    pub timed_out: bool,
}

/// Completion handle returned by [`BridgeApplication::stop`]
pub struct ShutdownHandle {
    task: JoinHandle<ShutdownReport>,
}

impl ShutdownHandle {
    pub fn finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> ShutdownReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Shutdown task failed: {}", e);
                ShutdownReport { accounts: 0, failed: 0, timed_out: true }
            }
        }
    }
}
