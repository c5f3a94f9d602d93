//! # SIP URI
//!
//! A `sip:`/`sips:` URI as used in From/To headers, request URIs, outbound
//! proxies and account identities:
//!
//! ```text
//! sip:user:password@host:port;uri-parameters?headers
//! ```
//!
//! Parsing also accepts the name-addr form (`"Alice" <sip:alice@example.org>`,
//! `<sip:proxy.example.org;transport=tcp>`); the display name is dropped.
//!
//! ```rust
//! use sipfork_sip_core::SipUri;
//!
//! let uri: SipUri = "<sip:alice@Example.org:5070;transport=tcp>".parse().unwrap();
//! assert_eq!(uri.user(), Some("alice"));
//! assert_eq!(uri.hostport(), "Example.org:5070");
//! assert_eq!(uri.uri_parameters(), ";transport=tcp");
//! assert_eq!(uri.lookup_key(), "sip:alice@example.org:5070");
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, value},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// URI scheme; only the SIP schemes are meaningful for bridging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Sip,
    Sips,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host part of a URI: a domain name or an IP address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Domain(String),
    Address(IpAddr),
}

impl Host {
    pub fn domain(domain: impl Into<String>) -> Self {
        Host::Domain(domain.into())
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Domain(domain) => f.write_str(domain),
            Host::Address(IpAddr::V4(addr)) => write!(f, "{}", addr),
            Host::Address(IpAddr::V6(addr)) => write!(f, "[{}]", addr),
        }
    }
}

impl FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(inner) = s.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            return inner
                .parse::<Ipv6Addr>()
                .map(|addr| Host::Address(IpAddr::V6(addr)))
                .map_err(|_| Error::invalid_uri(s, "invalid IPv6 reference"));
        }
        if let Ok(addr) = s.parse::<Ipv4Addr>() {
            return Ok(Host::Address(IpAddr::V4(addr)));
        }

        // a single trailing dot (fully qualified name) is allowed
        let name = s.strip_suffix('.').unwrap_or(s);
        let labels_ok = !name.is_empty()
            && name.split('.').all(|label| {
                !label.is_empty()
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            });
        if labels_ok {
            Ok(Host::Domain(s.to_string()))
        } else {
            Err(Error::invalid_uri(s, "invalid host name"))
        }
    }
}

/// A parsed SIP or SIPS URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Host,
    pub port: Option<u16>,
    /// URI parameters in order of appearance (`;name` or `;name=value`)
    pub params: Vec<(String, Option<String>)>,
    /// Raw header part, without the leading `?`
    pub headers: Option<String>,
}

impl SipUri {
    pub fn sip(host: Host) -> Self {
        Self {
            scheme: Scheme::Sip,
            user: None,
            password: None,
            host,
            port: None,
            params: Vec::new(),
            headers: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.params.push((name.into(), value));
        self
    }

    pub fn parse(input: &str) -> Result<Self> {
        match all_consuming(delimited(multispace0, alt((name_addr, sip_uri)), multispace0))(input) {
            Ok((_, uri)) => Ok(uri),
            Err(_) => {
                let lower = input.trim_start().trim_start_matches('<').to_ascii_lowercase();
                let reason = if lower.starts_with("sip:") || lower.starts_with("sips:") {
                    "malformed URI"
                } else {
                    "missing sip/sips scheme"
                };
                Err(Error::invalid_uri(input, reason))
            }
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// `host[:port]`
    pub fn hostport(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.to_string(),
        }
    }

    /// All URI parameters rendered as `;a=b;c`, or an empty string
    pub fn uri_parameters(&self) -> String {
        let mut out = String::new();
        for (name, val) in &self.params {
            out.push(';');
            out.push_str(name);
            if let Some(val) = val {
                out.push('=');
                out.push_str(val);
            }
        }
        out
    }

    /// Look up a parameter; `Some(None)` for a flag parameter such as `;lr`
    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref())
    }

    pub fn transport(&self) -> Option<&str> {
        self.param("transport").flatten()
    }

    /// Normalized identity used for pool indexes: scheme, user and
    /// lowercased host:port, ignoring parameters and headers.
    pub fn lookup_key(&self) -> String {
        let hostport = self.hostport().to_ascii_lowercase();
        match &self.user {
            Some(user) => format!("{}:{}@{}", self.scheme, user, hostport),
            None => format!("{}:{}", self.scheme, hostport),
        }
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.hostport())?;
        f.write_str(&self.uri_parameters())?;
        if let Some(headers) = &self.headers {
            write!(f, "?{}", headers)?;
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SipUri::parse(s)
    }
}

impl Serialize for SipUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SipUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SipUri::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// RFC 3261 character classes, slightly narrowed: ';' is never accepted in
// the user part so that parameters stay unambiguous.

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_.!~*'()%".contains(c)
}

fn is_user_char(c: char) -> bool {
    is_unreserved(c) || "&=+$,?/".contains(c)
}

fn is_password_char(c: char) -> bool {
    is_unreserved(c) || "&=+$,".contains(c)
}

fn is_param_char(c: char) -> bool {
    is_unreserved(c) || "[]/:&+$".contains(c)
}

fn is_header_char(c: char) -> bool {
    is_unreserved(c) || "[]/?:+$=&".contains(c)
}

fn scheme(input: &str) -> IResult<&str, Scheme> {
    terminated(
        alt((
            value(Scheme::Sips, tag_no_case("sips")),
            value(Scheme::Sip, tag_no_case("sip")),
        )),
        char(':'),
    )(input)
}

fn userinfo(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    terminated(
        pair(
            take_while1(is_user_char),
            opt(preceded(char(':'), take_while(is_password_char))),
        ),
        char('@'),
    )(input)
}

fn host(input: &str) -> IResult<&str, Host> {
    alt((
        map_res(
            delimited(
                char('['),
                take_while1(|c: char| c.is_ascii_hexdigit() || c == ':' || c == '.'),
                char(']'),
            ),
            |inner: &str| inner.parse::<Ipv6Addr>().map(|addr| Host::Address(IpAddr::V6(addr))),
        ),
        map_res(
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '.'),
            Host::from_str,
        ),
    ))(input)
}

fn port(input: &str) -> IResult<&str, u16> {
    preceded(char(':'), map_res(digit1, |digits: &str| digits.parse::<u16>()))(input)
}

fn uri_param(input: &str) -> IResult<&str, (String, Option<String>)> {
    map(
        preceded(
            char(';'),
            pair(
                take_while1(is_param_char),
                opt(preceded(char('='), take_while(is_param_char))),
            ),
        ),
        |(name, val): (&str, Option<&str>)| (name.to_string(), val.map(str::to_string)),
    )(input)
}

fn sip_uri(input: &str) -> IResult<&str, SipUri> {
    let (input, scheme) = scheme(input)?;
    let (input, userinfo) = opt(userinfo)(input)?;
    let (input, host) = host(input)?;
    let (input, port) = opt(port)(input)?;
    let (input, params) = many0(uri_param)(input)?;
    let (input, headers) = opt(preceded(char('?'), take_while1(is_header_char)))(input)?;

    let (user, password) = match userinfo {
        Some((user, password)) => (Some(user.to_string()), password.map(str::to_string)),
        None => (None, None),
    };

    Ok((
        input,
        SipUri {
            scheme,
            user,
            password,
            host,
            port,
            params,
            headers: headers.map(str::to_string),
        },
    ))
}

fn display_name(input: &str) -> IResult<&str, &str> {
    terminated(
        alt((
            delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
            take_while1(|c: char| c != '<' && c != '"'),
        )),
        multispace0,
    )(input)
}

fn name_addr(input: &str) -> IResult<&str, SipUri> {
    preceded(opt(display_name), delimited(char('<'), sip_uri, char('>')))(input)
}
