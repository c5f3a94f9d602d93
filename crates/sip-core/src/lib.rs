//! # sipfork sip-core
//!
//! The small slice of SIP the bridging and forking engines need:
//!
//! - [`SipUri`]: parsing, rendering and component access for `sip:`/`sips:` URIs
//! - [`CallView`]: read-only view of an incoming call (From, To, request URI, Call-ID)
//! - [`auth`]: MD5 digest computation for answering registrar challenges
//!
//! Message parsing and transport live elsewhere; this crate only models the
//! values that routing decisions are made on.

pub mod auth;
pub mod call;
pub mod error;
pub mod uri;

pub use auth::{DigestAuthorization, DigestChallenge};
pub use call::{CallView, IncomingCall};
pub use error::{Error, Result};
pub use uri::{Host, Scheme, SipUri};
