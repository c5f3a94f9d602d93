//! MD5 digest authentication (RFC 2617 / RFC 3261 §22.4).
//!
//! Accounts may be configured with either the clear-text password or only the
//! precomputed `HA1 = MD5(username:realm:password)`; both end up as an HA1
//! when answering a challenge.

use std::fmt;

use md5::{Digest, Md5};

use crate::error::{Error, Result};

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `MD5(username:realm:password)` as lowercase hex
pub fn compute_ha1(username: &str, realm: &str, password: &str) -> String {
    md5_hex(&format!("{}:{}:{}", username, realm, password))
}

/// A `WWW-Authenticate` / `Proxy-Authenticate` digest challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// Raw qop options as offered, e.g. `auth` or `auth,auth-int`
    pub qop: Option<String>,
    pub algorithm: Option<String>,
    pub stale: bool,
}

impl DigestChallenge {
    pub fn new(realm: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            nonce: nonce.into(),
            opaque: None,
            qop: None,
            algorithm: None,
            stale: false,
        }
    }

    pub fn with_qop_auth(mut self) -> Self {
        self.qop = Some("auth".to_string());
        self
    }

    pub fn with_opaque(mut self, opaque: impl Into<String>) -> Self {
        self.opaque = Some(opaque.into());
        self
    }

    /// Parse the value of an authenticate header
    pub fn parse(value: &str) -> Result<Self> {
        let rest = value.trim();
        let params = match rest.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("digest ") => &rest[7..],
            _ => return Err(Error::InvalidChallenge(format!("not a Digest challenge: {}", value))),
        };

        let mut realm = None;
        let mut nonce = None;
        let mut challenge = DigestChallenge::new("", "");
        for (name, val) in split_auth_params(params) {
            match name.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(val),
                "nonce" => nonce = Some(val),
                "opaque" => challenge.opaque = Some(val),
                "qop" => challenge.qop = Some(val),
                "algorithm" => challenge.algorithm = Some(val),
                "stale" => challenge.stale = val.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        challenge.realm = realm.ok_or_else(|| Error::InvalidChallenge("missing realm".into()))?;
        challenge.nonce = nonce.ok_or_else(|| Error::InvalidChallenge("missing nonce".into()))?;
        Ok(challenge)
    }

    fn offers_qop_auth(&self) -> Result<bool> {
        match &self.qop {
            None => Ok(false),
            Some(options) => {
                if options.split(',').any(|o| o.trim().eq_ignore_ascii_case("auth")) {
                    Ok(true)
                } else {
                    Err(Error::InvalidChallenge(format!("unsupported qop '{}'", options)))
                }
            }
        }
    }
}

impl fmt::Display for DigestChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest realm=\"{}\", nonce=\"{}\"", self.realm, self.nonce)?;
        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque)?;
        }
        if let Some(qop) = &self.qop {
            write!(f, ", qop=\"{}\"", qop)?;
        }
        if let Some(algorithm) = &self.algorithm {
            write!(f, ", algorithm={}", algorithm)?;
        }
        if self.stale {
            f.write_str(", stale=true")?;
        }
        Ok(())
    }
}

/// The `Authorization` answering a [`DigestChallenge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestAuthorization {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub nc: Option<String>,
    pub cnonce: Option<String>,
}

impl DigestAuthorization {
    /// Answer `challenge` for a request `method uri` using a precomputed HA1
    pub fn answer(challenge: &DigestChallenge, method: &str, uri: &str, username: &str, ha1: &str) -> Result<Self> {
        if let Some(algorithm) = &challenge.algorithm {
            if !algorithm.eq_ignore_ascii_case("MD5") {
                return Err(Error::InvalidChallenge(format!("unsupported algorithm '{}'", algorithm)));
            }
        }

        let mut auth = DigestAuthorization {
            username: username.to_string(),
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            uri: uri.to_string(),
            response: String::new(),
            opaque: challenge.opaque.clone(),
            qop: None,
            nc: None,
            cnonce: None,
        };
        if challenge.offers_qop_auth()? {
            auth.qop = Some("auth".to_string());
            auth.nc = Some("00000001".to_string());
            auth.cnonce = Some(format!("{:016x}", rand::random::<u64>()));
        }
        auth.response = auth.expected_response(ha1, method);
        Ok(auth)
    }

    /// The response value a server holding `ha1` expects for this authorization
    pub fn expected_response(&self, ha1: &str, method: &str) -> String {
        let ha2 = md5_hex(&format!("{}:{}", method, self.uri));
        match (&self.qop, &self.nc, &self.cnonce) {
            (Some(qop), Some(nc), Some(cnonce)) => {
                md5_hex(&format!("{}:{}:{}:{}:{}:{}", ha1, self.nonce, nc, cnonce, qop, ha2))
            }
            _ => md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2)),
        }
    }

    pub fn verify(&self, ha1: &str, method: &str) -> bool {
        self.response == self.expected_response(ha1, method)
    }
}

impl fmt::Display for DigestAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm=MD5",
            self.username, self.realm, self.nonce, self.uri, self.response
        )?;
        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque)?;
        }
        if let (Some(qop), Some(nc), Some(cnonce)) = (&self.qop, &self.nc, &self.cnonce) {
            write!(f, ", qop={}, nc={}, cnonce=\"{}\"", qop, nc, cnonce)?;
        }
        Ok(())
    }
}

/// Split `a="x, y", b=z` into name/value pairs, honoring quotes
fn split_auth_params(input: &str) -> Vec<(String, String)> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    parts
        .iter()
        .filter_map(|part| {
            let (name, val) = part.split_once('=')?;
            Some((name.trim().to_string(), val.trim().trim_matches('"').to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 2617 §3.5 example
    #[test]
    fn rfc2617_reference_response() {
        let challenge = DigestChallenge::parse(
            "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        )
        .unwrap();
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.qop.as_deref(), Some("auth,auth-int"));

        let ha1 = compute_ha1("Mufasa", "testrealm@host.com", "Circle Of Life");
        let mut auth = DigestAuthorization::answer(&challenge, "GET", "/dir/index.html", "Mufasa", &ha1).unwrap();
        auth.cnonce = Some("0a4f113b".into());
        auth.response = auth.expected_response(&ha1, "GET");
        assert_eq!(auth.response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn clear_text_and_ha1_give_same_answer() {
        let challenge = DigestChallenge::new("example.org", "abc123");
        let ha1 = compute_ha1("ha1-md5", "example.org", "a-clear-text-password");
        let from_ha1 = DigestAuthorization::answer(&challenge, "REGISTER", "sip:example.org", "ha1-md5", &ha1).unwrap();
        assert!(from_ha1.verify(&ha1, "REGISTER"));
        assert!(!from_ha1.verify(&compute_ha1("ha1-md5", "example.org", "wrong"), "REGISTER"));
        assert!(from_ha1.qop.is_none());
    }

    #[test]
    fn rejects_unsupported_challenges() {
        assert!(DigestChallenge::parse("Basic realm=\"x\"").is_err());
        assert!(DigestChallenge::parse("Digest nonce=\"n\"").is_err());

        let mut challenge = DigestChallenge::new("r", "n");
        challenge.algorithm = Some("SHA-256".into());
        assert!(DigestAuthorization::answer(&challenge, "REGISTER", "sip:r", "u", "h").is_err());

        let mut challenge = DigestChallenge::new("r", "n");
        challenge.qop = Some("auth-int".into());
        assert!(DigestAuthorization::answer(&challenge, "REGISTER", "sip:r", "u", "h").is_err());
    }

    #[test]
    fn challenge_display_round_trips_through_parse() {
        let challenge = DigestChallenge::new("example.org", "n0nce").with_qop_auth().with_opaque("op");
        assert_eq!(DigestChallenge::parse(&challenge.to_string()).unwrap(), challenge);
    }
}
