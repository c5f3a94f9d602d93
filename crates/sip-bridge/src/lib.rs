//! # sipfork sip-bridge
//!
//! Decides, for every call entering the B2BUA, which external account the
//! outgoing leg uses and what it looks like.
//!
//! A [`BridgeApplication`] walks an ordered list of [`SipProvider`]s. Each
//! provider combines:
//!
//! - a [`TriggerStrategy`] deciding whether it handles the call
//! - an [`AccountSelectionStrategy`] picking an [`Account`] from its [`AccountPool`]
//! - an [`InviteTweaker`] rewriting To/From/outbound proxy from templates
//! - a policy for calls no account matches (next provider or decline)
//!
//! The first provider returning an [`Action`] wins. Accepted calls hold a
//! slot on their account until [`BridgeApplication::on_call_end`].
//!
//! ```no_run
//! # use std::time::Duration;
//! # use sipfork_sip_bridge::{BridgeApplication, ProvidersDocument};
//! # async fn run(json: &str, call: &sipfork_sip_core::IncomingCall) -> sipfork_sip_bridge::Result<()> {
//! let document = ProvidersDocument::from_json(json)?;
//! let bridge = BridgeApplication::from_document(&document, None, Duration::from_secs(5)).await?;
//! let action = bridge.on_call_create(call);
//! bridge.on_call_end(&call.call_id);
//! bridge.stop().wait().await;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod application;
pub mod config;
pub mod error;
pub mod provider;
pub mod slots;
pub mod strategy;
pub mod template;
pub mod tweaker;

pub use account::{Account, AccountParams, AccountPool, Credential, RegistrationClient, RegistrationState, Registrar};
pub use application::{BridgeApplication, ShutdownHandle, ShutdownReport};
pub use self::config::{BridgeServerConfig, ProvidersDocument};
pub use error::{Error, Result};
pub use provider::{Action, BridgedCall, DeclineReason, SipProvider};
pub use strategy::{AccountSelectionStrategy, TriggerStrategy};
pub use tweaker::{InviteTweaker, OutgoingInvite};
