//! Key encoding utilities for `RocksDB`.
//!
//! ULID-keyed families sort by time because ULID bytes are big-endian with the
//! timestamp first.

use tokenomics_core::{EntryId, IdempotencyKey, UserId};

const ID_LEN: usize = 16;

/// Create a ledger entry key from an idempotency key.
#[must_use]
pub fn entry_key(key: &IdempotencyKey) -> Vec<u8> {
    key.as_str().as_bytes().to_vec()
}

/// Create a balance key from a user ID.
#[must_use]
pub fn balance_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a user-entry index key.
///
/// Format: `user_id (16 bytes) || entry_id (16 bytes)`
#[must_use]
pub fn user_entry_key(user_id: &UserId, entry_id: &EntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN * 2);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Create a prefix for iterating all entries for a user.
#[must_use]
pub fn user_entries_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// The largest possible index key for a user, for newest-first iteration.
#[must_use]
pub fn user_entries_upper_bound(user_id: &UserId) -> Vec<u8> {
    let mut key = user_entries_prefix(user_id);
    key.extend_from_slice(&[0xFF; ID_LEN]);
    key
}

/// Decode an idempotency key stored as an index value.
#[must_use]
pub fn decode_idempotency_key(value: &[u8]) -> Option<IdempotencyKey> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_entry_key_format() {
        let user_id = UserId::generate();
        let entry_id = EntryId::generate();
        let key = user_entry_key(&user_id, &entry_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], user_id.as_bytes());
        assert_eq!(&key[16..], entry_id.to_bytes());
        assert!(key.starts_with(&user_entries_prefix(&user_id)));
        assert!(key <= user_entries_upper_bound(&user_id));
    }

    #[test]
    fn idempotency_key_value_decodes() {
        let key = IdempotencyKey::usage("req_9").unwrap();
        assert_eq!(decode_idempotency_key(&entry_key(&key)), Some(key));
        assert_eq!(decode_idempotency_key(&[0xFF, 0xFE]), None);
    }
}
