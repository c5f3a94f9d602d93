//! One bridging policy: trigger, account selection, outgoing invite template
//! and what to do when no account matches.

use std::sync::Arc;

use sipfork_infra_common::LogContext;
use sipfork_sip_core::CallView;
use tracing::{Level, debug, error, info, warn};

use crate::account::{Account, AccountPool};
use crate::config::{OnAccountNotFound, ProviderConfig};
use crate::error::{Error, Result};
use crate::slots::OccupiedSlots;
use crate::strategy::{AccountSelectionStrategy, TriggerStrategy};
use crate::tweaker::{InviteTweaker, OutgoingInvite};

/// Why a call was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    /// No usable account or no provider for the call
    NotAcceptable,
}

impl DeclineReason {
    /// SIP status sent back on the incoming leg
    pub fn status_code(&self) -> u16 {
        match self {
            DeclineReason::NotAcceptable => 488,
        }
    }
}

/// A call accepted by a provider
#[derive(Debug, Clone)]
pub struct BridgedCall {
    pub provider: String,
    pub account: Arc<Account>,
    pub invite: OutgoingInvite,
}

/// Outcome of evaluating a call
#[derive(Debug, Clone)]
pub enum Action {
    Bridge(BridgedCall),
    Decline(DeclineReason),
}

impl Action {
    pub fn is_decline(&self) -> bool {
        matches!(self, Action::Decline(_))
    }
}

pub struct SipProvider {
    name: String,
    trigger: TriggerStrategy,
    account_strategy: AccountSelectionStrategy,
    on_account_not_found: OnAccountNotFound,
    invite_tweaker: InviteTweaker,
}

impl SipProvider {
    pub fn new(
        name: impl Into<String>,
        trigger: TriggerStrategy,
        account_strategy: AccountSelectionStrategy,
        on_account_not_found: OnAccountNotFound,
        invite_tweaker: InviteTweaker,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            account_strategy,
            on_account_not_found,
            invite_tweaker,
        }
    }

    pub fn from_config(config: &ProviderConfig, pool: Arc<AccountPool>) -> Result<Self> {
        Ok(Self::new(
            config.name.clone(),
            TriggerStrategy::from_config(&config.trigger_condition)?,
            AccountSelectionStrategy::from_config(&config.account_to_use, pool)?,
            config.on_account_not_found,
            InviteTweaker::from_config(&config.outgoing_invite)?,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account_pool(&self) -> &Arc<AccountPool> {
        self.account_strategy.account_pool()
    }

    /// Evaluate an incoming call.
    ///
    /// `None` means this provider does not handle the call and the next one
    /// should be tried. A returned [`Action::Bridge`] holds a slot on its
    /// account until [`OccupiedSlots::release`] is called for the call-id.
    pub fn on_call_create(&self, call: &dyn CallView, slots: &OccupiedSlots) -> Option<Action> {
        let span = self.log_context("on_call_create", call).span(Level::DEBUG);
        let _enter = span.enter();

        match self.try_on_call_create(call, slots) {
            Ok(action) => action,
            Err(e) => {
                error!("Unexpected error while handling call {}: {}", call.call_id(), e);
                slots.release(call.call_id());
                Some(Action::Decline(DeclineReason::NotAcceptable))
            }
        }
    }

    fn try_on_call_create(&self, call: &dyn CallView, slots: &OccupiedSlots) -> Result<Option<Action>> {
        let account = match self.select(call) {
            Selection::NotTriggered => return Ok(None),
            Selection::NotFound(outcome) => return Ok(outcome),
            Selection::Found(account) => account,
        };

        if !account.is_available() {
            warn!(
                "Account {} is not available ({}, {}/{} slots used), declining call {}",
                account.uri(),
                account.registration_state(),
                account.occupied_slots(),
                account.max_calls(),
                call.call_id()
            );
            return Ok(Some(Action::Decline(DeclineReason::NotAcceptable)));
        }

        if !slots.reserve(call.call_id(), &account) {
            warn!("Account {} ran out of slots, declining call {}", account.uri(), call.call_id());
            return Ok(Some(Action::Decline(DeclineReason::NotAcceptable)));
        }

        match self.invite_tweaker.tweak_invite(call, &account) {
            Ok(invite) => {
                info!("Bridging call {} through {} to {}", call.call_id(), account.uri(), invite.to);
                Ok(Some(Action::Bridge(BridgedCall {
                    provider: self.name.clone(),
                    account,
                    invite,
                })))
            }
            Err(e @ (Error::Tweak(_) | Error::Uri(_))) => {
                warn!("Could not build outgoing INVITE for call {}: {}", call.call_id(), e);
                slots.release(call.call_id());
                Ok(Some(Action::Decline(DeclineReason::NotAcceptable)))
            }
            Err(e) => Err(e),
        }
    }

    /// Same pipeline for an out-of-dialog MESSAGE, which holds no slot
    pub fn on_message(&self, message: &dyn CallView) -> Option<Action> {
        let span = self.log_context("on_message", message).span(Level::DEBUG);
        let _enter = span.enter();

        let account = match self.select(message) {
            Selection::NotTriggered => return None,
            Selection::NotFound(outcome) => return outcome,
            Selection::Found(account) => account,
        };
        if !account.is_available() {
            warn!("Account {} is not available, declining message {}", account.uri(), message.call_id());
            return Some(Action::Decline(DeclineReason::NotAcceptable));
        }
        match self.invite_tweaker.tweak_invite(message, &account) {
            Ok(invite) => Some(Action::Bridge(BridgedCall {
                provider: self.name.clone(),
                account,
                invite,
            })),
            Err(e) => {
                warn!("Could not build outgoing MESSAGE for {}: {}", message.call_id(), e);
                Some(Action::Decline(DeclineReason::NotAcceptable))
            }
        }
    }

    fn select(&self, call: &dyn CallView) -> Selection {
        if !self.trigger.should_handle_this_call(call) {
            return Selection::NotTriggered;
        }
        match self.account_strategy.choose_account_for_this_call(call) {
            Some(account) => Selection::Found(account),
            None => match self.on_account_not_found {
                OnAccountNotFound::NextProvider => {
                    debug!("No account found for {}, trying next provider", call.call_id());
                    Selection::NotFound(None)
                }
                OnAccountNotFound::Decline => {
                    debug!("No account found for {}, declining", call.call_id());
                    Selection::NotFound(Some(Action::Decline(DeclineReason::NotAcceptable)))
                }
            },
        }
    }

    fn log_context(&self, operation: &str, call: &dyn CallView) -> LogContext {
        LogContext::with_operation("sip-bridge", operation)
            .with_field("provider", self.name.as_str())
            .with_field("call_id", call.call_id())
    }
}

enum Selection {
    NotTriggered,
    NotFound(Option<Action>),
    Found(Arc<Account>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::PoolSettings;
    use crate::config::{OutgoingInviteConfig, StaticAccountConfig};
    use sipfork_sip_core::{IncomingCall, SipUri};

    async fn provider(trigger: TriggerStrategy, to: &str, max_calls: u32) -> SipProvider {
        let pool = Arc::new(AccountPool::new(
            "p",
            PoolSettings {
                outbound_proxy: None,
                registration_required: false,
                max_calls_per_line: max_calls,
            },
            None,
        ));
        pool.reload_static(&[StaticAccountConfig {
            uri: "sip:bridge@provider.com".into(),
            alias: None,
            user_id: None,
            secret_type: None,
            secret: None,
            outbound_proxy: None,
        }])
        .await
        .unwrap();
        SipProvider::new(
            "test",
            trigger,
            AccountSelectionStrategy::Random { pool },
            OnAccountNotFound::Decline,
            InviteTweaker::from_config(&OutgoingInviteConfig {
                to: to.into(),
                from: None,
                outbound_proxy: None,
            })
            .unwrap(),
        )
    }

    fn call(id: &str) -> IncomingCall {
        IncomingCall::new(
            id,
            SipUri::parse("sip:felix@example.org").unwrap(),
            SipUri::parse("sip:+3312@example.org").unwrap(),
        )
    }

    fn account_of(provider: &SipProvider) -> Arc<Account> {
        provider.account_pool().accounts().remove(0)
    }

    #[tokio::test]
    async fn untriggered_provider_touches_nothing() {
        let never = TriggerStrategy::from_config(&crate::config::TriggerConfig::MatchRegex {
            pattern: "nomatch".into(),
            source: "{from}".into(),
        })
        .unwrap();
        let provider = provider(never, "{incoming.to}", 1).await;
        let slots = OccupiedSlots::new();
        assert!(provider.on_call_create(&call("c1"), &slots).is_none());
        assert!(slots.is_empty());
        assert_eq!(account_of(&provider).occupied_slots(), 0);
    }

    #[tokio::test]
    async fn bridges_and_holds_a_slot() {
        let provider = provider(TriggerStrategy::Always, "sip:{incoming.to.user}@{account.uri.hostport}", 1).await;
        let slots = OccupiedSlots::new();
        let Some(Action::Bridge(bridged)) = provider.on_call_create(&call("c1"), &slots) else {
            panic!("call should be bridged");
        };
        assert_eq!(bridged.invite.to.to_string(), "sip:+3312@provider.com");
        assert_eq!(bridged.account.occupied_slots(), 1);

        // account full: Random finds nothing available, policy declines
        assert!(provider.on_call_create(&call("c2"), &slots).unwrap().is_decline());
        slots.release("c1");
        assert_eq!(bridged.account.occupied_slots(), 0);
    }

    #[tokio::test]
    async fn tweak_failure_declines_and_releases() {
        let provider = provider(TriggerStrategy::Always, "{incoming.to.user};woops=invalid-uri", 1).await;
        let slots = OccupiedSlots::new();
        let action = provider.on_call_create(&call("c1"), &slots).unwrap();
        assert!(action.is_decline());
        assert!(slots.is_empty());
        assert_eq!(account_of(&provider).occupied_slots(), 0);
    }

    #[tokio::test]
    async fn messages_do_not_take_slots() {
        let provider = provider(TriggerStrategy::Always, "{incoming.to}", 1).await;
        assert!(matches!(provider.on_message(&call("m1")), Some(Action::Bridge(_))));
        assert_eq!(account_of(&provider).occupied_slots(), 0);
    }

    #[test]
    fn decline_maps_to_488() {
        assert_eq!(DeclineReason::NotAcceptable.status_code(), 488);
    }
}
