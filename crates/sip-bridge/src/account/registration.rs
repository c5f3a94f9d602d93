use std::sync::Arc;

use async_trait::async_trait;
use sipfork_sip_core::{DigestAuthorization, DigestChallenge, SipUri};
use tracing::{debug, info, warn};

use super::{Account, RegistrationState};
use crate::error::{Error, Result};

/// A REGISTER to send on behalf of an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Request-URI: the account's domain
    pub registrar: SipUri,
    /// Address of record (To/From)
    pub aor: SipUri,
    pub contact: Option<String>,
    /// Next hop, when the pool or the account sets one
    pub outbound_proxy: Option<SipUri>,
    /// 0 removes the binding
    pub expires: u32,
}

impl RegisterRequest {
    fn for_account(account: &Account, expires: u32, contact: Option<String>) -> Self {
        let aor = account.uri().clone();
        let mut registrar = SipUri::sip(aor.host.clone());
        registrar.scheme = aor.scheme;
        registrar.port = aor.port;
        Self {
            registrar,
            aor,
            contact,
            outbound_proxy: account.outbound_proxy().cloned(),
            expires,
        }
    }
}

/// Final outcome of one REGISTER transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterResponse {
    /// 2xx
    Ok { expires: u32 },
    /// 401/407 with a digest challenge
    Challenge(DigestChallenge),
    /// Any other final response
    Rejected { status: u16, reason: String },
}

/// Sends REGISTER requests; implemented by the SIP transaction layer.
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    async fn send_register(
        &self,
        request: &RegisterRequest,
        authorization: Option<&DigestAuthorization>,
    ) -> Result<RegisterResponse>;
}

/// Drives registration and un-registration of accounts through a
/// [`RegistrationClient`], answering at most one challenge per attempt.
pub struct Registrar {
    client: Arc<dyn RegistrationClient>,
    expires: u32,
    contact: Option<String>,
}

impl Registrar {
    pub fn new(client: Arc<dyn RegistrationClient>, expires: u32) -> Self {
        Self {
            client,
            expires,
            contact: None,
        }
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }

    pub async fn register(&self, account: &Account) -> Result<()> {
        account.set_registration_state(RegistrationState::Registering);
        match self.exchange(account, self.expires).await {
            Ok(()) => {
                info!("Account {} registered", account.uri());
                account.set_registration_state(RegistrationState::Registered);
                Ok(())
            }
            Err(e) => {
                warn!("Registration of {} failed: {}", account.uri(), e);
                account.set_registration_state(RegistrationState::Failed);
                Err(e)
            }
        }
    }

    /// Remove the binding of a registered account; no-op otherwise
    pub async fn unregister(&self, account: &Account) -> Result<()> {
        if account.registration_state() != RegistrationState::Registered {
            return Ok(());
        }
        let result = self.exchange(account, 0).await;
        match &result {
            Ok(()) => info!("Account {} un-registered", account.uri()),
            Err(e) => warn!("Un-registration of {} failed: {}", account.uri(), e),
        }
        account.set_registration_state(RegistrationState::Unregistered);
        result
    }

    async fn exchange(&self, account: &Account, expires: u32) -> Result<()> {
        let request = RegisterRequest::for_account(account, expires, self.contact.clone());
        let mut authorization: Option<DigestAuthorization> = None;

        loop {
            match self.client.send_register(&request, authorization.as_ref()).await? {
                RegisterResponse::Ok { expires } => {
                    debug!("REGISTER for {} accepted (expires={})", request.aor, expires);
                    return Ok(());
                }
                RegisterResponse::Rejected { status, reason } => {
                    return Err(Error::registration(account.uri(), format!("{} {}", status, reason)));
                }
                RegisterResponse::Challenge(_) if authorization.is_some() => {
                    return Err(Error::registration(account.uri(), "credentials rejected"));
                }
                RegisterResponse::Challenge(challenge) => {
                    debug!("REGISTER for {} challenged (realm={})", request.aor, challenge.realm);
                    let ha1 = account
                        .ha1(&challenge.realm)
                        .ok_or_else(|| Error::registration(account.uri(), "challenged but no credential configured"))?;
                    let answer = DigestAuthorization::answer(
                        &challenge,
                        "REGISTER",
                        &request.registrar.to_string(),
                        account.auth_username(),
                        &ha1,
                    )
                    .map_err(|e| Error::registration(account.uri(), e.to_string()))?;
                    authorization = Some(answer);
                }
            }
        }
    }
}
