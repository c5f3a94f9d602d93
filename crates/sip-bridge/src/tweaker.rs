use sipfork_sip_core::{CallView, SipUri};

use crate::account::Account;
use crate::config::OutgoingInviteConfig;
use crate::error::Result;
use crate::template::Template;

/// Addresses of the outgoing leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingInvite {
    pub to: SipUri,
    pub from: SipUri,
    pub outbound_proxy: Option<SipUri>,
}

/// Rewrites To/From/outbound proxy of the outgoing INVITE.
///
/// Either every field resolves to a valid URI or the tweak fails as a whole.
#[derive(Debug, Clone)]
pub struct InviteTweaker {
    to: Template,
    from: Option<Template>,
    outbound_proxy: Option<Template>,
}

impl InviteTweaker {
    pub fn from_config(config: &OutgoingInviteConfig) -> Result<Self> {
        Ok(Self {
            to: Template::compile(&config.to)?,
            from: config.from.as_deref().map(Template::compile).transpose()?,
            outbound_proxy: config.outbound_proxy.as_deref().map(Template::compile).transpose()?,
        })
    }

    pub fn tweak_invite(&self, call: &dyn CallView, account: &Account) -> Result<OutgoingInvite> {
        let to = self.to.render_uri(call, Some(account))?;
        let from = match &self.from {
            Some(template) => template.render_uri(call, Some(account))?,
            None => account.uri().clone(),
        };
        let outbound_proxy = match &self.outbound_proxy {
            Some(template) => Some(template.render_uri(call, Some(account))?),
            None => account.outbound_proxy().cloned(),
        };
        Ok(OutgoingInvite { to, from, outbound_proxy })
    }
}
