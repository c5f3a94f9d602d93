#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sipfork_infra_common::{LoggingConfig, setup_logging};
use sipfork_sip_bridge::account::{RegisterRequest, RegisterResponse};
use sipfork_sip_bridge::{RegistrationClient, Result};
use sipfork_sip_core::auth::compute_ha1;
use sipfork_sip_core::{DigestAuthorization, DigestChallenge, IncomingCall, SipUri};

pub const REALM: &str = "sip.example.org";

/// Debug output for failing tests; only the first call installs a subscriber
pub fn init_logging() {
    let _ = setup_logging(LoggingConfig::for_tests(tracing::Level::DEBUG));
}

/// Registrar that challenges every first REGISTER and checks the digest
/// against the passwords it knows.
pub struct ChallengingRegistrar {
    passwords: HashMap<String, String>,
    bindings: Mutex<HashSet<String>>,
    requests: Mutex<Vec<(String, u32, bool)>>,
    /// Never answer un-REGISTERs
    hang_on_unregister: bool,
}

impl ChallengingRegistrar {
    pub fn new(users: &[(&str, &str)]) -> Self {
        Self {
            passwords: users.iter().map(|(u, p)| (u.to_string(), p.to_string())).collect(),
            bindings: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            hang_on_unregister: false,
        }
    }

    pub fn hanging_on_unregister(mut self) -> Self {
        self.hang_on_unregister = true;
        self
    }

    pub fn bindings(&self) -> HashSet<String> {
        self.bindings.lock().clone()
    }

    /// (aor, expires, authorized) of every REGISTER received
    pub fn requests(&self) -> Vec<(String, u32, bool)> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl RegistrationClient for ChallengingRegistrar {
    async fn send_register(
        &self,
        request: &RegisterRequest,
        authorization: Option<&DigestAuthorization>,
    ) -> Result<RegisterResponse> {
        self.requests
            .lock()
            .push((request.aor.to_string(), request.expires, authorization.is_some()));

        if request.expires == 0 && self.hang_on_unregister {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let Some(auth) = authorization else {
            return Ok(RegisterResponse::Challenge(DigestChallenge::new(REALM, "a1b2c3").with_qop_auth()));
        };
        let Some(password) = self.passwords.get(&auth.username) else {
            return Ok(RegisterResponse::Rejected { status: 403, reason: "Forbidden".into() });
        };
        if !auth.verify(&compute_ha1(&auth.username, REALM, password), "REGISTER") {
            return Ok(RegisterResponse::Challenge(DigestChallenge::new(REALM, "d4e5f6")));
        }

        let mut bindings = self.bindings.lock();
        if request.expires == 0 {
            bindings.remove(&request.aor.to_string());
        } else {
            bindings.insert(request.aor.to_string());
        }
        Ok(RegisterResponse::Ok { expires: request.expires })
    }
}

pub fn uri(s: &str) -> SipUri {
    SipUri::parse(s).unwrap()
}

pub fn call(id: &str, from: &str, to: &str) -> IncomingCall {
    IncomingCall::new(id, uri(from), uri(to))
}
