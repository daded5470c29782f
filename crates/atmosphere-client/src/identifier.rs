//! Syntax types for addressing an account: DIDs, handles, and the
//! `ActorIdentifier` union of the two.
//!
//! Validation here is purely syntactic. Anything that passes can still turn
//! out not to exist on the network; that failure belongs to the resolver.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Invalid DID: {0:?}")]
    InvalidDid(String),
    #[error("Invalid handle: {0:?}")]
    InvalidHandle(String),
    #[error("Invalid actor identifier: {0:?}")]
    InvalidIdentifier(String),
}

/// A decentralized identifier, the stable account identifier in the
/// AT Protocol (e.g. `did:plc:abc123`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Did(String);

impl Did {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The DID method segment (e.g. `plc` for `did:plc:abc123`).
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }
}

impl FromStr for Did {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (scheme, method, rest) = (parts.next(), parts.next(), parts.next());
        let valid = scheme == Some("did")
            && method.is_some_and(|m| {
                !m.is_empty() && m.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            })
            && rest.is_some_and(|r| {
                !r.is_empty()
                    && r.chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '%' | ':'))
            });
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(IdentifierError::InvalidDid(s.to_string()))
        }
    }
}

impl Display for Did {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A human-facing handle: a domain name like `alice.bsky.social`.
///
/// Stored lowercased so comparisons are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(String);

impl Handle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Handle {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        let labels: Vec<&str> = lowered.split('.').collect();
        let label_ok = |label: &&str| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        };
        // Handles need at least two labels and a non-numeric TLD.
        let valid = lowered.len() <= 253
            && labels.len() >= 2
            && labels.iter().all(label_ok)
            && labels
                .last()
                .is_some_and(|tld| tld.chars().next().is_some_and(|c| c.is_ascii_lowercase()));
        if valid {
            Ok(Self(lowered))
        } else {
            Err(IdentifierError::InvalidHandle(s.to_string()))
        }
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Either form of account address accepted at API boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActorIdentifier {
    Did(Did),
    Handle(Handle),
}

impl ActorIdentifier {
    pub fn as_str(&self) -> &str {
        match self {
            ActorIdentifier::Did(did) => did.as_str(),
            ActorIdentifier::Handle(handle) => handle.as_str(),
        }
    }
}

impl FromStr for ActorIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("did:") {
            return s.parse().map(ActorIdentifier::Did);
        }
        s.parse()
            .map(ActorIdentifier::Handle)
            .map_err(|_| IdentifierError::InvalidIdentifier(s.to_string()))
    }
}

impl Display for ActorIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Did> for ActorIdentifier {
    fn from(did: Did) -> Self {
        ActorIdentifier::Did(did)
    }
}

impl From<Handle> for ActorIdentifier {
    fn from(handle: Handle) -> Self {
        ActorIdentifier::Handle(handle)
    }
}

// Serialize as plain strings so identifiers read naturally in JSON and logs.
macro_rules! string_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Did);
string_serde!(Handle);
string_serde!(ActorIdentifier);
