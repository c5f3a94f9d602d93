//! `{placeholder}` templates resolved against an incoming call and an account
//!
//! Grammar of a placeholder: `{[incoming.]<field>[.<part>]}` or
//! `{account.<field>[.<part>]}` where
//! - incoming fields are `to`, `from`, `requestAddress`
//! - account fields are `uri`, `alias`, `outboundProxy`
//! - parts are `user`, `hostport`, `uriParameters`
//!
//! Templates are compiled once at load time so a typo in the providers
//! document fails startup instead of every call.

use std::fmt;

use sipfork_sip_core::{CallView, SipUri};

use crate::account::Account;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    IncomingTo,
    IncomingFrom,
    IncomingRequestAddress,
    AccountUri,
    AccountAlias,
    AccountOutboundProxy,
}

impl Subject {
    fn is_account(self) -> bool {
        matches!(self, Subject::AccountUri | Subject::AccountAlias | Subject::AccountOutboundProxy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Whole,
    User,
    Hostport,
    UriParameters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Placeholder { subject: Subject, part: Part },
}

/// A compiled template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    pieces: Vec<Piece>,
}

impl Template {
    /// Compile a template that may reference both the incoming call and the account
    pub fn compile(source: &str) -> Result<Self> {
        Self::parse(source, true)
    }

    /// Compile a template evaluated before any account is chosen
    /// (trigger sources, pool lookup keys)
    pub fn compile_call_only(source: &str) -> Result<Self> {
        Self::parse(source, false)
    }

    fn parse(source: &str, allow_account: bool) -> Result<Self> {
        let invalid = |reason: String| Error::Template {
            template: source.to_string(),
            reason,
        };

        let mut pieces = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                pieces.push(Piece::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unterminated '{'".into()))?;
            let name = &after[..close];
            let (subject, part) = parse_placeholder(name).ok_or_else(|| invalid(format!("unknown placeholder '{{{}}}'", name)))?;
            if subject.is_account() && !allow_account {
                return Err(invalid(format!("'{{{}}}' is not available before an account is chosen", name)));
            }
            pieces.push(Piece::Placeholder { subject, part });
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(invalid("unmatched '}'".into()));
        }
        if !rest.is_empty() {
            pieces.push(Piece::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            pieces,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Substitute every placeholder.
    ///
    /// `account` may only be `None` for templates compiled with
    /// [`Template::compile_call_only`].
    pub fn render(&self, call: &dyn CallView, account: Option<&Account>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Placeholder { subject, part } => {
                    let uri = self.subject_uri(*subject, call, account)?;
                    self.push_part(&mut out, uri, *part)?;
                }
            }
        }
        Ok(out)
    }

    /// Render then parse the result as a SIP URI
    pub fn render_uri(&self, call: &dyn CallView, account: Option<&Account>) -> Result<SipUri> {
        let rendered = self.render(call, account)?;
        SipUri::parse(&rendered).map_err(|e| Error::Tweak(format!("'{}' from template '{}': {}", rendered, self.source, e)))
    }

    fn subject_uri<'a>(&self, subject: Subject, call: &'a dyn CallView, account: Option<&'a Account>) -> Result<&'a SipUri> {
        let account = || {
            account.ok_or_else(|| Error::Tweak(format!("template '{}' needs an account", self.source)))
        };
        match subject {
            Subject::IncomingTo => Ok(call.to()),
            Subject::IncomingFrom => Ok(call.from()),
            Subject::IncomingRequestAddress => Ok(call.request_address()),
            Subject::AccountUri => Ok(account()?.uri()),
            Subject::AccountAlias => {
                let account = account()?;
                account
                    .alias()
                    .ok_or_else(|| Error::Tweak(format!("account {} has no alias", account.uri())))
            }
            Subject::AccountOutboundProxy => {
                let account = account()?;
                account
                    .outbound_proxy()
                    .ok_or_else(|| Error::Tweak(format!("account {} has no outbound proxy", account.uri())))
            }
        }
    }

    fn push_part(&self, out: &mut String, uri: &SipUri, part: Part) -> Result<()> {
        use std::fmt::Write;

        // Writing into a String cannot fail
        let _ = match part {
            Part::Whole => write!(out, "{}", uri),
            Part::User => {
                let user = uri
                    .user()
                    .ok_or_else(|| Error::Tweak(format!("{} has no user part (template '{}')", uri, self.source)))?;
                write!(out, "{}", user)
            }
            Part::Hostport => write!(out, "{}", uri.hostport()),
            Part::UriParameters => write!(out, "{}", uri.uri_parameters()),
        };
        Ok(())
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_placeholder(name: &str) -> Option<(Subject, Part)> {
    let mut segments = name.split('.');
    let first = segments.next()?;

    let subject = match first {
        "incoming" => incoming_field(segments.next()?)?,
        "account" => match segments.next()? {
            "uri" => Subject::AccountUri,
            "alias" => Subject::AccountAlias,
            "outboundProxy" => Subject::AccountOutboundProxy,
            _ => return None,
        },
        // `{from}` is shorthand for `{incoming.from}`
        other => incoming_field(other)?,
    };

    let part = match segments.next() {
        None => Part::Whole,
        Some("user") => Part::User,
        Some("hostport") => Part::Hostport,
        Some("uriParameters") => Part::UriParameters,
        Some(_) => return None,
    };

    if segments.next().is_some() {
        return None;
    }
    Some((subject, part))
}

fn incoming_field(field: &str) -> Option<Subject> {
    match field {
        "to" => Some(Subject::IncomingTo),
        "from" => Some(Subject::IncomingFrom),
        "requestAddress" => Some(Subject::IncomingRequestAddress),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountParams};
    use sipfork_sip_core::IncomingCall;

    fn uri(s: &str) -> SipUri {
        SipUri::parse(s).unwrap()
    }

    fn call() -> IncomingCall {
        IncomingCall::new(
            "call-1",
            uri("sip:felix@sip.example.org;user=phone"),
            uri("sip:+33612345678@sip.example.org;user=phone"),
        )
    }

    fn account() -> Account {
        let mut params = AccountParams::new(uri("sip:bridge@sip.provider1.com"));
        params.alias = Some(uri("sip:felix@sip.example.org"));
        Account::new(params, 1, false)
    }

    #[test]
    fn renders_incoming_and_account_parts() {
        let template = Template::compile("sip:{incoming.to.user}@{account.uri.hostport}{incoming.to.uriParameters}").unwrap();
        assert_eq!(
            template.render(&call(), Some(&account())).unwrap(),
            "sip:+33612345678@sip.provider1.com;user=phone"
        );

        let alias = Template::compile("{account.alias}").unwrap();
        assert_eq!(alias.render_uri(&call(), Some(&account())).unwrap(), uri("sip:felix@sip.example.org"));
    }

    #[test]
    fn shorthand_fields_refer_to_the_incoming_call() {
        let template = Template::compile_call_only("{from}").unwrap();
        assert_eq!(template.render(&call(), None).unwrap(), "sip:felix@sip.example.org;user=phone");
        let template = Template::compile_call_only("{requestAddress.user}").unwrap();
        assert_eq!(template.render(&call(), None).unwrap(), "+33612345678");
    }

    #[test]
    fn compile_errors() {
        for bad in [
            "{incoming.cc}",
            "{account.uri.host}",
            "{incoming.to.user.extra}",
            "sip:{incoming.to.user@example.org",
            "sip:x}@example.org",
            "{}",
        ] {
            assert!(matches!(Template::compile(bad), Err(Error::Template { .. })), "{} should not compile", bad);
        }
        assert!(Template::compile_call_only("{account.uri}").is_err());
    }

    #[test]
    fn invalid_result_is_a_tweak_error() {
        let template = Template::compile("{account.alias.user};woops=invalid-uri").unwrap();
        assert!(matches!(template.render_uri(&call(), Some(&account())), Err(Error::Tweak(_))));
    }

    #[test]
    fn missing_alias_fails_resolution() {
        let bare = Account::new(AccountParams::new(uri("sip:bare@sip.provider1.com")), 1, false);
        let template = Template::compile("{account.alias}").unwrap();
        assert!(matches!(template.render(&call(), Some(&bare)), Err(Error::Tweak(_))));
    }
}
