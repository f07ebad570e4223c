//! Normalized domain names.
//!
//! Certificates are keyed by domain everywhere in snicert: the record store,
//! the issuance ticket table and the SNI resolver. All of them must agree on
//! what "the same domain" means, so raw input (an SNI value, a `Host` header,
//! an admin request body) is funnelled through [`DomainName::parse`] first.
//!
//! Normalization:
//! - surrounding whitespace is trimmed
//! - a trailing `:port` is stripped
//! - ASCII letters are lower-cased
//! - a single trailing root dot is dropped (`example.com.` → `example.com`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of a DNS name in presentation format.
const MAX_NAME_LEN: usize = 253;

/// Maximum length of a single DNS label.
const MAX_LABEL_LEN: usize = 63;

/// Reasons a string cannot be used as a certificate domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("domain is empty")]
    Empty,

    #[error("domain is longer than 253 characters")]
    TooLong,

    #[error("invalid port in '{0}'")]
    InvalidPort(String),

    #[error("IP literal '{0}' cannot carry a certificate")]
    IpLiteral(String),

    #[error("invalid label '{label}' in '{domain}'")]
    InvalidLabel { domain: String, label: String },
}

/// A lower-cased, port-less DNS name.
///
/// Two inputs that refer to the same host always produce equal values:
///
/// ```
/// use snicert_common::DomainName;
///
/// let a = DomainName::parse("Example.COM:443").unwrap();
/// let b = DomainName::parse("example.com.").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainName(String);

impl DomainName {
    /// Normalize and validate a raw host string.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Empty);
        }

        let host = strip_port(trimmed)?;
        let host = host.strip_suffix('.').unwrap_or(host);
        if host.is_empty() {
            return Err(DomainError::Empty);
        }

        if host.parse::<IpAddr>().is_ok() {
            return Err(DomainError::IpLiteral(host.to_string()));
        }

        let name = host.to_ascii_lowercase();
        if name.len() > MAX_NAME_LEN {
            return Err(DomainError::TooLong);
        }

        for label in name.split('.') {
            if !is_valid_label(label) {
                return Err(DomainError::InvalidLabel {
                    domain: name.clone(),
                    label: label.to_string(),
                });
            }
        }

        Ok(Self(name))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

fn strip_port(host: &str) -> Result<&str, DomainError> {
    // Bracketed IPv6 literal, with or without port.
    if let Some(rest) = host.strip_prefix('[') {
        let inner = rest.split(']').next().unwrap_or(rest);
        return Err(DomainError::IpLiteral(inner.to_string()));
    }

    match host.rsplit_once(':') {
        // More than one colon: bare IPv6, rejected later as an IP literal or
        // as an invalid label.
        Some((name, _)) if name.contains(':') => Ok(host),
        Some((name, port)) => {
            if port.is_empty() || port.parse::<u16>().is_err() {
                return Err(DomainError::InvalidPort(host.to_string()));
            }
            Ok(name)
        }
        None => Ok(host),
    }
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DomainName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DomainName {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<DomainName> for String {
    fn from(name: DomainName) -> Self {
        name.0
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
