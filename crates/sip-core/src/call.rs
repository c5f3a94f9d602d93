//! Read-only view of an incoming call or message, as seen by routing logic.

use crate::uri::SipUri;

/// What the bridging pipeline needs to know about an incoming call.
///
/// Implemented by the transport layer's call object; [`IncomingCall`] is the
/// owned version used when the data has already been extracted.
pub trait CallView: Send + Sync {
    fn call_id(&self) -> &str;

    /// Address from the From header
    fn from(&self) -> &SipUri;

    /// Address from the To header
    fn to(&self) -> &SipUri;

    /// Request-URI of the INVITE/MESSAGE
    fn request_address(&self) -> &SipUri;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub call_id: String,
    pub from: SipUri,
    pub to: SipUri,
    pub request_address: SipUri,
}

impl IncomingCall {
    /// A call whose request URI is its To address (the common case)
    pub fn new(call_id: impl Into<String>, from: SipUri, to: SipUri) -> Self {
        Self {
            call_id: call_id.into(),
            from,
            request_address: to.clone(),
            to,
        }
    }

    pub fn with_request_address(mut self, request_address: SipUri) -> Self {
        self.request_address = request_address;
        self
    }
}

impl CallView for IncomingCall {
    fn call_id(&self) -> &str {
        &self.call_id
    }

    fn from(&self) -> &SipUri {
        &self.from
    }

    fn to(&self) -> &SipUri {
        &self.to
    }

    fn request_address(&self) -> &SipUri {
        &self.request_address
    }
}
