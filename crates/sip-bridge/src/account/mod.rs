//! External SIP accounts and the pools that own them

mod loader;
mod pool;
mod registration;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use sipfork_sip_core::SipUri;
use sipfork_sip_core::auth::compute_ha1;
use tokio::sync::watch;
use tracing::warn;

use crate::config::{SecretType, StaticAccountConfig};
use crate::error::{Error, Result};

pub use loader::{AccountLoader, SqlLoader, StaticLoader};
pub use pool::{AccountPool, PoolIter, PoolSettings, PoolSnapshot, ReloadReport};
pub use registration::{RegisterRequest, RegisterResponse, Registrar, RegistrationClient};

/// Secret used to answer digest challenges
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ClearText(String),
    /// Precomputed `MD5(username:realm:password)`
    Md5(String),
}

impl Credential {
    pub fn new(secret_type: SecretType, secret: impl Into<String>) -> Self {
        match secret_type {
            SecretType::ClearText => Credential::ClearText(secret.into()),
            SecretType::Md5 => Credential::Md5(secret.into()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ClearText(_) => f.write_str("ClearText(***)"),
            Credential::Md5(_) => f.write_str("Md5(***)"),
        }
    }
}

/// Registration status of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Never registered, or un-registered
    Unregistered,
    /// REGISTER in flight
    Registering,
    /// Registrar accepted the binding
    Registered,
    /// Last attempt was rejected or could not be sent
    Failed,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "Unregistered"),
            RegistrationState::Registering => write!(f, "Registering"),
            RegistrationState::Registered => write!(f, "Registered"),
            RegistrationState::Failed => write!(f, "Failed"),
        }
    }
}

/// Immutable description of an account, as loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountParams {
    pub uri: SipUri,
    pub alias: Option<SipUri>,
    /// Overrides the URI user part as digest username
    pub user_id: Option<String>,
    pub credential: Option<Credential>,
    pub outbound_proxy: Option<SipUri>,
}

impl AccountParams {
    pub fn new(uri: SipUri) -> Self {
        Self {
            uri,
            alias: None,
            user_id: None,
            credential: None,
            outbound_proxy: None,
        }
    }

    pub fn from_static(entry: &StaticAccountConfig) -> Result<Self> {
        let credential = match (entry.secret_type, &entry.secret) {
            (_, None) => None,
            (_, Some(secret)) if secret.is_empty() => None,
            (Some(secret_type), Some(secret)) => Some(Credential::new(secret_type, secret.clone())),
            (None, Some(_)) => {
                return Err(Error::Configuration(format!("account {} has a secret but no secretType", entry.uri)));
            }
        };

        Ok(Self {
            uri: SipUri::parse(&entry.uri)?,
            alias: entry.alias.as_deref().map(SipUri::parse).transpose()?,
            user_id: entry.user_id.clone().filter(|id| !id.is_empty()),
            credential,
            outbound_proxy: entry.outbound_proxy.as_deref().map(parse_proxy).transpose()?,
        })
    }
}

/// Proxies are often configured as a bare `host[:port]`
pub(crate) fn parse_proxy(value: &str) -> Result<SipUri> {
    let trimmed = value.trim();
    let lower = trimmed.trim_start_matches('<').to_ascii_lowercase();
    if lower.starts_with("sip:") || lower.starts_with("sips:") {
        Ok(SipUri::parse(trimmed)?)
    } else {
        Ok(SipUri::parse(&format!("sip:{}", trimmed))?)
    }
}

/// One external identity the bridge can present on an outgoing leg.
///
/// Slot accounting is lock free: [`Account::take_slot`] is a bounded
/// compare-and-increment, so concurrent calls racing for the last slot see
/// exactly one winner.
#[derive(Debug)]
pub struct Account {
    params: AccountParams,
    max_calls: u32,
    occupied: AtomicU32,
    registration_required: bool,
    state: watch::Sender<RegistrationState>,
}

impl Account {
    pub fn new(params: AccountParams, max_calls: u32, registration_required: bool) -> Self {
        let (state, _) = watch::channel(RegistrationState::Unregistered);
        Self {
            params,
            max_calls,
            occupied: AtomicU32::new(0),
            registration_required,
            state,
        }
    }

    pub fn params(&self) -> &AccountParams {
        &self.params
    }

    pub fn uri(&self) -> &SipUri {
        &self.params.uri
    }

    pub fn alias(&self) -> Option<&SipUri> {
        self.params.alias.as_ref()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.params.credential.as_ref()
    }

    pub fn outbound_proxy(&self) -> Option<&SipUri> {
        self.params.outbound_proxy.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.params.user_id.as_deref()
    }

    /// Username presented in digest authorizations
    pub fn auth_username(&self) -> &str {
        self.user_id().or(self.uri().user()).unwrap_or_default()
    }

    /// HA1 for `realm`, if the account has a credential
    pub fn ha1(&self, realm: &str) -> Option<String> {
        match self.credential()? {
            Credential::ClearText(password) => Some(compute_ha1(self.auth_username(), realm, password)),
            Credential::Md5(ha1) => Some(ha1.clone()),
        }
    }

    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    pub fn occupied_slots(&self) -> u32 {
        self.occupied.load(Ordering::Acquire)
    }

    pub fn free_slots(&self) -> u32 {
        self.max_calls.saturating_sub(self.occupied_slots())
    }

    /// Reserve one call slot; `false` when the account is full
    pub fn take_slot(&self) -> bool {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max_calls).then_some(n + 1))
            .is_ok()
    }

    pub fn release_slot(&self) {
        if self
            .occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
        {
            warn!("Released a slot on {} while none was taken", self.uri());
        }
    }

    pub fn registration_required(&self) -> bool {
        self.registration_required
    }

    pub fn registration_state(&self) -> RegistrationState {
        *self.state.borrow()
    }

    pub(crate) fn set_registration_state(&self, state: RegistrationState) {
        self.state.send_replace(state);
    }

    /// Resolves once the account reaches a settled registration state
    /// (registered or failed)
    pub async fn registration_settled(&self) -> RegistrationState {
        let mut rx = self.state.subscribe();
        match rx
            .wait_for(|s| matches!(s, RegistrationState::Registered | RegistrationState::Failed))
            .await
        {
            Ok(state) => *state,
            Err(_) => self.registration_state(),
        }
    }

    /// Usable for a new call right now
    pub fn is_available(&self) -> bool {
        let registered = !self.registration_required || self.registration_state() == RegistrationState::Registered;
        registered && self.free_slots() > 0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.params.uri)
    }
}
