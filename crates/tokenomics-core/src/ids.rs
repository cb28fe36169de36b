//! Identifier types for the token economy.
//!
//! This module provides strongly-typed identifiers for users, token packs,
//! ledger entries, rate snapshots, and idempotency keys.
//!
//! # Macro-based ID Types
//!
//! `uuid_id_type!` and `ulid_id_type!` generate the newtype wrappers so every
//! identifier gets the same serialization, parsing, and display behaviour.
//! ULID-based identifiers are time-ordered, which the store relies on for
//! range scans.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Maximum length of an idempotency key in bytes.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new identifier from a UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the bytes of the UUID (16 bytes).
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

macro_rules! ulid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier with the current timestamp.
            ///
            /// Identifiers from one process are strictly increasing, even
            /// within the same millisecond.
            #[must_use]
            pub fn generate() -> Self {
                static LAST: std::sync::Mutex<u128> = std::sync::Mutex::new(0);

                let fresh = Ulid::new().0;
                let mut last = LAST
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let next = if fresh > *last {
                    fresh
                } else {
                    last.saturating_add(1)
                };
                *last = next;
                Self(Ulid(next))
            }

            /// Generate an identifier whose timestamp component is `at`.
            #[must_use]
            pub fn at(at: DateTime<Utc>) -> Self {
                Self(Ulid::from_datetime(at.into()))
            }

            /// The smallest identifier whose timestamp is `at`.
            #[must_use]
            pub fn lower_bound(at: DateTime<Utc>) -> Self {
                Self(Ulid::from_parts(millis(at), 0))
            }

            /// The largest identifier whose timestamp is `at`.
            #[must_use]
            pub fn upper_bound(at: DateTime<Utc>) -> Self {
                Self(Ulid::from_parts(millis(at), u128::MAX))
            }

            /// Return the bytes of the ULID (16 bytes, big-endian, time first).
            #[must_use]
            pub fn to_bytes(&self) -> [u8; 16] {
                self.0.to_bytes()
            }

            /// Create an identifier from bytes.
            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Ulid::from_bytes(bytes))
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
                Ok(Self(ulid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

fn millis(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_millis()).unwrap_or(0)
}

uuid_id_type!(UserId, "A user identifier (UUID).\n\nProvided by the payment processor as `client_reference_id` and by the chat subsystem on usage calls.");
uuid_id_type!(PackId, "A token pack catalogue identifier (UUID).");

ulid_id_type!(EntryId, "A ledger entry identifier (ULID, time-ordered).");
ulid_id_type!(SnapshotId, "An exchange-rate snapshot identifier (ULID, time-ordered).");
ulid_id_type!(FailedEventId, "A dead-letter record identifier (ULID, time-ordered).");

/// A deterministic key derived from an upstream event.
///
/// At most one ledger entry exists per key; replaying the same upstream event
/// always derives the same key, which is what makes at-least-once delivery safe.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Key for a purchase confirmation, derived from the payment session id.
    ///
    /// # Errors
    ///
    /// Returns an error if the session id is empty or too long.
    pub fn purchase(session_id: &str) -> Result<Self, IdError> {
        Self::scoped("purchase", session_id)
    }

    /// Key for a usage debit, derived from the per-message request id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request id is empty or too long.
    pub fn usage(request_id: &str) -> Result<Self, IdError> {
        Self::scoped("usage", request_id)
    }

    /// Key for an administrator-issued compensating entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is empty or too long.
    pub fn compensation(reference: &str) -> Result<Self, IdError> {
        Self::scoped("compensation", reference)
    }

    fn scoped(scope: &str, upstream_id: &str) -> Result<Self, IdError> {
        let upstream_id = upstream_id.trim();
        if upstream_id.is_empty() {
            return Err(IdError::EmptyKey);
        }
        format!("{scope}:{upstream_id}").parse()
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for IdempotencyKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdError::EmptyKey);
        }
        if s.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(IdError::KeyTooLong(s.len()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdempotencyKey({})", self.0)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,

    /// The idempotency key is empty.
    #[error("idempotency key must not be empty")]
    EmptyKey,

    /// The idempotency key exceeds the maximum length.
    #[error("idempotency key too long: {0} bytes")]
    KeyTooLong(usize),
}
