//! `RocksDB` storage implementation.
//!
//! Writes go through a pessimistic `TransactionDB`. Each grant or debit takes
//! an exclusive lock on its idempotency key and then on the user's balance row,
//! always in that order, so duplicate keys resolve to a single winner and
//! per-user balance updates are linearised.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, ErrorKind, IteratorMode, MultiThreaded, Options,
    TransactionDB, TransactionDBOptions,
};

use tokenomics_core::{
    ApplyOutcome, Balance, Direction, EntryId, EntryMeta, ExchangeRateSnapshot, FailedEvent,
    IdempotencyKey, LedgerEntry, PackId, SnapshotId, TokenPack, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{duplicate_outcome, prepare_entry, validate_tokens, LedgerStore};

/// Default time a write waits for a row lock before reporting a conflict.
pub const DEFAULT_LOCK_TIMEOUT_MS: i64 = 2_000;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<TransactionDB<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_lock_timeout(path, DEFAULT_LOCK_TIMEOUT_MS)
    }

    /// Open with a custom row-lock timeout in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open_with_lock_timeout<P: AsRef<Path>>(path: P, lock_timeout_ms: i64) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(lock_timeout_ms);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = TransactionDB::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Map a transaction error, treating lock contention as a retryable conflict.
    fn txn_error(e: &rocksdb::Error) -> StoreError {
        match e.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                StoreError::Conflict(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }

    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_value<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Collect up to `limit` values from a ULID-keyed family, newest first.
    fn newest_first<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        limit: usize,
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            if values.len() >= limit {
                break;
            }
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            values.push(Self::deserialize(&value)?);
        }
        Ok(values)
    }

    /// Insert an entry and update the balance in one transaction.
    fn apply(
        &self,
        key: &IdempotencyKey,
        user_id: &UserId,
        direction: Direction,
        tokens: i64,
        meta: EntryMeta,
    ) -> Result<ApplyOutcome> {
        validate_tokens(tokens)?;

        let cf_entries = self.cf(cf::LEDGER_ENTRIES)?;
        let cf_entry_ids = self.cf(cf::ENTRY_IDS)?;
        let cf_by_user = self.cf(cf::ENTRIES_BY_USER)?;
        let cf_balances = self.cf(cf::BALANCES)?;

        let entry_key = keys::entry_key(key);
        let txn = self.db.transaction();

        // Lock the key first. A concurrent writer of the same key blocks here
        // until we commit, then observes our entry.
        if let Some(data) = txn
            .get_for_update_cf(&cf_entries, &entry_key, true)
            .map_err(|e| Self::txn_error(&e))?
        {
            let existing: LedgerEntry = Self::deserialize(&data)?;
            let balance = txn
                .get_cf(&cf_balances, keys::balance_key(&existing.user_id))
                .map_err(|e| Self::txn_error(&e))?
                .map(|data| Self::deserialize::<Balance>(&data))
                .transpose()?
                .map_or(0, |b| b.tokens);
            return Ok(duplicate_outcome(&existing, user_id, balance));
        }

        let balance_key = keys::balance_key(user_id);
        let mut balance = txn
            .get_for_update_cf(&cf_balances, &balance_key, true)
            .map_err(|e| Self::txn_error(&e))?
            .map(|data| Self::deserialize::<Balance>(&data))
            .transpose()?
            .unwrap_or_else(|| Balance::new(*user_id));

        let entry = prepare_entry(&mut balance, key, direction, tokens, meta)?;

        txn.put_cf(&cf_entries, &entry_key, Self::serialize(&entry)?)
            .map_err(|e| Self::txn_error(&e))?;
        txn.put_cf(&cf_entry_ids, entry.id.to_bytes(), &entry_key)
            .map_err(|e| Self::txn_error(&e))?;
        txn.put_cf(
            &cf_by_user,
            keys::user_entry_key(user_id, &entry.id),
            &entry_key,
        )
        .map_err(|e| Self::txn_error(&e))?;
        txn.put_cf(&cf_balances, &balance_key, Self::serialize(&balance)?)
            .map_err(|e| Self::txn_error(&e))?;

        txn.commit().map_err(|e| Self::txn_error(&e))?;

        tracing::debug!(
            idempotency_key = %key,
            user_id = %user_id,
            direction = ?direction,
            tokens,
            balance = balance.tokens,
            "Ledger entry applied"
        );

        Ok(ApplyOutcome {
            applied: true,
            balance: balance.tokens,
            entry_id: entry.id,
        })
    }
}

impl LedgerStore for RocksStore {
    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn apply_grant(
        &self,
        key: &IdempotencyKey,
        user_id: &UserId,
        tokens: i64,
        meta: EntryMeta,
    ) -> Result<ApplyOutcome> {
        self.apply(key, user_id, Direction::Grant, tokens, meta)
    }

    fn apply_debit(
        &self,
        key: &IdempotencyKey,
        user_id: &UserId,
        tokens: i64,
        meta: EntryMeta,
    ) -> Result<ApplyOutcome> {
        self.apply(key, user_id, Direction::Debit, tokens, meta)
    }

    fn get_balance(&self, user_id: &UserId) -> Result<Option<Balance>> {
        self.get_value(cf::BALANCES, &keys::balance_key(user_id))
    }

    fn get_entry(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>> {
        self.get_value(cf::LEDGER_ENTRIES, &keys::entry_key(key))
    }

    fn get_entry_by_id(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(cf::ENTRY_IDS)?;
        let Some(value) = self
            .db
            .get_cf(&cf, entry_id.to_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };
        let key = keys::decode_idempotency_key(&value)
            .ok_or_else(|| StoreError::Serialization("corrupt entry id index".into()))?;
        self.get_entry(&key)
    }

    fn list_entries_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let cf_by_user = self.cf(cf::ENTRIES_BY_USER)?;
        let prefix = keys::user_entries_prefix(user_id);
        let upper = keys::user_entries_upper_bound(user_id);

        // Walk backwards from the end of the user's range (newest first).
        let iter = self.db.iterator_cf(
            &cf_by_user,
            IteratorMode::From(&upper, rocksdb::Direction::Reverse),
        );

        let mut entries = Vec::new();
        for item in iter.skip(offset) {
            if entries.len() >= limit {
                break;
            }
            let (index_key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !index_key.starts_with(&prefix) {
                break;
            }
            let key = keys::decode_idempotency_key(&value)
                .ok_or_else(|| StoreError::Serialization("corrupt user index".into()))?;
            if let Some(entry) = self.get_entry(&key)? {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    fn list_entries(&self) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf(cf::ENTRY_IDS)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let key = keys::decode_idempotency_key(&value)
                .ok_or_else(|| StoreError::Serialization("corrupt entry id index".into()))?;
            if let Some(entry) = self.get_entry(&key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    // =========================================================================
    // Exchange-Rate History
    // =========================================================================

    fn append_rate_snapshot(&self, snapshot: &ExchangeRateSnapshot) -> Result<()> {
        self.put_value(cf::RATE_SNAPSHOTS, &snapshot.id.to_bytes(), snapshot)
    }

    fn latest_rate_snapshot(&self) -> Result<Option<ExchangeRateSnapshot>> {
        let cf = self.cf(cf::RATE_SNAPSHOTS)?;
        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let snapshot: ExchangeRateSnapshot = Self::deserialize(&value)?;
            if !snapshot.is_fallback {
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }

    fn rate_snapshot_as_of(&self, at: DateTime<Utc>) -> Result<Option<ExchangeRateSnapshot>> {
        let cf = self.cf(cf::RATE_SNAPSHOTS)?;
        let upper = SnapshotId::upper_bound(at).to_bytes();
        let mut iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&upper, rocksdb::Direction::Reverse));

        iter.next()
            .map(|item| {
                let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
                Self::deserialize(&value)
            })
            .transpose()
    }

    fn list_rate_snapshots(&self, limit: usize) -> Result<Vec<ExchangeRateSnapshot>> {
        self.newest_first(cf::RATE_SNAPSHOTS, limit)
    }

    // =========================================================================
    // Token Pack Catalogue
    // =========================================================================

    fn put_token_pack(&self, pack: &TokenPack) -> Result<()> {
        self.put_value(cf::TOKEN_PACKS, pack.id.as_bytes(), pack)
    }

    fn get_token_pack(&self, pack_id: &PackId) -> Result<Option<TokenPack>> {
        self.get_value(cf::TOKEN_PACKS, pack_id.as_bytes())
    }

    fn list_token_packs(&self) -> Result<Vec<TokenPack>> {
        let cf = self.cf(cf::TOKEN_PACKS)?;
        let mut packs = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            packs.push(Self::deserialize::<TokenPack>(&value)?);
        }
        packs.sort_by(|a, b| a.price_jpy.cmp(&b.price_jpy).then(a.created_at.cmp(&b.created_at)));
        Ok(packs)
    }

    // =========================================================================
    // Dead Letters
    // =========================================================================

    fn record_failed_event(&self, event: &FailedEvent) -> Result<()> {
        self.put_value(cf::FAILED_EVENTS, &event.id.to_bytes(), event)
    }

    fn list_failed_events(&self, limit: usize) -> Result<Vec<FailedEvent>> {
        self.newest_first(cf::FAILED_EVENTS, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;
    use tokenomics_core::EntryKind;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn purchase(id: &str) -> (IdempotencyKey, EntryMeta) {
        (
            IdempotencyKey::purchase(id).unwrap(),
            EntryMeta::purchase(id, 1000),
        )
    }

    fn usage(id: &str) -> (IdempotencyKey, EntryMeta) {
        (
            IdempotencyKey::usage(id).unwrap(),
            EntryMeta::usage(id, "gpt-4o-mini"),
        )
    }

    #[test]
    fn grant_then_debit() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        let (key, meta) = purchase("cs_1");
        let granted = store.apply_grant(&key, &user_id, 500, meta).unwrap();
        assert!(granted.applied);
        assert_eq!(granted.balance, 500);

        let (key, meta) = usage("req_1");
        let debited = store.apply_debit(&key, &user_id, 120, meta).unwrap();
        assert!(debited.applied);
        assert_eq!(debited.balance, 380);

        let balance = store.get_balance(&user_id).unwrap().unwrap();
        assert_eq!(balance.tokens, 380);
        assert_eq!(balance.lifetime_granted, 500);
        assert_eq!(balance.lifetime_debited, 120);

        let entry = store.get_entry_by_id(&debited.entry_id).unwrap().unwrap();
        assert_eq!(entry.meta.kind, EntryKind::Usage);
        assert_eq!(entry.balance_after, 380);
    }

    #[test]
    fn replayed_key_is_a_noop_returning_current_balance() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        let (key, meta) = purchase("cs_dup");
        let first = store.apply_grant(&key, &user_id, 500, meta.clone()).unwrap();

        let (other, other_meta) = usage("req_after");
        store.apply_debit(&other, &user_id, 100, other_meta).unwrap();

        for _ in 0..3 {
            let replay = store.apply_grant(&key, &user_id, 500, meta.clone()).unwrap();
            assert!(!replay.applied);
            assert_eq!(replay.balance, 400);
            assert_eq!(replay.entry_id, first.entry_id);
        }

        assert_eq!(store.list_entries_by_user(&user_id, 10, 0).unwrap().len(), 2);
    }

    #[test]
    fn insufficient_balance_writes_nothing() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        let (key, meta) = purchase("cs_low");
        store.apply_grant(&key, &user_id, 5, meta).unwrap();

        let (key, meta) = usage("req_big");
        let result = store.apply_debit(&key, &user_id, 100, meta);
        assert!(matches!(
            result,
            Err(StoreError::InsufficientBalance {
                balance: 5,
                required: 100
            })
        ));

        assert!(store.get_entry(&key).unwrap().is_none());
        assert_eq!(store.get_balance(&user_id).unwrap().unwrap().tokens, 5);
    }

    #[test]
    fn debit_without_balance_is_insufficient() {
        let (store, _dir) = create_test_store();
        let (key, meta) = usage("req_new_user");
        let result = store.apply_debit(&key, &UserId::generate(), 1, meta);
        assert!(matches!(
            result,
            Err(StoreError::InsufficientBalance { balance: 0, .. })
        ));
    }

    #[test]
    fn entries_list_newest_first_with_pagination() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        for i in 0..3 {
            let (key, meta) = purchase(&format!("cs_page_{i}"));
            store.apply_grant(&key, &user_id, 10, meta).unwrap();
        }
        // Another user's entries stay out of the listing.
        let (key, meta) = purchase("cs_other");
        store.apply_grant(&key, &UserId::generate(), 10, meta).unwrap();

        let all = store.list_entries_by_user(&user_id, 10, 0).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].balance_after, 30);
        assert_eq!(all[2].balance_after, 10);

        let page = store.list_entries_by_user(&user_id, 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].balance_after, 20);

        assert_eq!(store.list_entries().unwrap().len(), 4);
    }

    #[test]
    fn log_reconstructs_balance() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        let (key, meta) = purchase("cs_a");
        store.apply_grant(&key, &user_id, 1000, meta).unwrap();
        for i in 0..5 {
            let (key, meta) = usage(&format!("req_{i}"));
            store.apply_debit(&key, &user_id, 37, meta).unwrap();
        }
        let (key, meta) = usage("req_too_much");
        assert!(store.apply_debit(&key, &user_id, 10_000, meta).is_err());

        let audit = store.audit_balance(&user_id).unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.recomputed, 1000 - 5 * 37);
        assert_eq!(audit.entries, 6);
    }

    #[test]
    fn concurrent_duplicate_grants_apply_once() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let (key, meta) = purchase("cs_race");

        let applied: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..100)
                .map(|_| s.spawn(|| store.apply_grant(&key, &user_id, 500, meta.clone()).unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap().applied))
                .sum()
        });

        assert_eq!(applied, 1);
        assert_eq!(store.get_balance(&user_id).unwrap().unwrap().tokens, 500);
        assert_eq!(store.list_entries_by_user(&user_id, 200, 0).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let (key, meta) = purchase("cs_pool");
        store.apply_grant(&key, &user_id, 50, meta).unwrap();

        let succeeded: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..20)
                .map(|i| {
                    let store = &store;
                    s.spawn(move || {
                        let (key, meta) = usage(&format!("req_pool_{i}"));
                        match store.apply_debit(&key, &user_id, 10, meta) {
                            Ok(_) => 1,
                            Err(StoreError::InsufficientBalance { .. }) => 0,
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(succeeded, 5);
        assert_eq!(store.get_balance(&user_id).unwrap().unwrap().tokens, 0);
    }

    #[test]
    fn rate_snapshot_as_of() {
        let (store, _dir) = create_test_store();
        let now = Utc::now();
        let old = ExchangeRateSnapshot::fetched(dec!(140), "test", now - Duration::days(30)).unwrap();
        let mid = ExchangeRateSnapshot::fetched(dec!(150), "test", now - Duration::days(10)).unwrap();
        let new = ExchangeRateSnapshot::fetched(dec!(160), "test", now - Duration::days(1)).unwrap();
        for snapshot in [&mid, &new, &old] {
            store.append_rate_snapshot(snapshot).unwrap();
        }

        let at = store.rate_snapshot_as_of(now - Duration::days(5)).unwrap().unwrap();
        assert_eq!(at.rate, dec!(150));
        let exact = store.rate_snapshot_as_of(old.fetched_at).unwrap().unwrap();
        assert_eq!(exact.rate, dec!(140));
        assert!(store
            .rate_snapshot_as_of(now - Duration::days(60))
            .unwrap()
            .is_none());

        assert_eq!(store.latest_rate_snapshot().unwrap().unwrap().rate, dec!(160));
        let listed = store.list_rate_snapshots(2).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].rate, dec!(150));
    }

    #[test]
    fn rapid_grants_list_in_write_order() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        for i in 0..50 {
            let (key, meta) = purchase(&format!("cs_burst_{i}"));
            store.apply_grant(&key, &user_id, 1, meta).unwrap();
        }

        let listed = store.list_entries_by_user(&user_id, 100, 0).unwrap();
        let balances: Vec<i64> = listed.iter().map(|e| e.balance_after).collect();
        let expected: Vec<i64> = (1..=50).rev().collect();
        assert_eq!(balances, expected);
    }

    #[test]
    fn latest_rate_snapshot_skips_fallbacks() {
        let (store, _dir) = create_test_store();
        let now = Utc::now();
        let live = ExchangeRateSnapshot::fetched(dec!(148), "test", now - Duration::hours(2)).unwrap();
        let fallback = ExchangeRateSnapshot::fallback(
            &tokenomics_core::RateQuote::constant(dec!(150)),
            now - Duration::hours(1),
        );
        store.append_rate_snapshot(&live).unwrap();
        store.append_rate_snapshot(&fallback).unwrap();

        assert_eq!(store.latest_rate_snapshot().unwrap().unwrap().rate, dec!(148));
        let at = store.rate_snapshot_as_of(now).unwrap().unwrap();
        assert!(at.is_fallback);
        assert_eq!(at.rate, dec!(150));
        assert_eq!(store.list_rate_snapshots(10).unwrap().len(), 2);
    }

    #[test]
    fn failed_events_newest_first() {
        let (store, _dir) = create_test_store();
        let first = FailedEvent::new(EntryKind::Purchase, "bad amount", serde_json::json!({"a": 1}));
        let second = FailedEvent::new(EntryKind::Usage, "conflict", serde_json::Value::Null)
            .with_attempts(3);
        store.record_failed_event(&first).unwrap();
        store.record_failed_event(&second).unwrap();

        let listed = store.list_failed_events(10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].reason, "conflict");
        assert_eq!(listed[0].attempts, 3);
        assert_eq!(listed[1].payload, serde_json::json!({"a": 1}));
    }

    #[test]
    fn reopen_preserves_ledger() {
        let dir = TempDir::new().unwrap();
        let user_id = UserId::generate();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            let (key, meta) = purchase("cs_persist");
            store.apply_grant(&key, &user_id, 77, meta).unwrap();
        }
        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.get_balance(&user_id).unwrap().unwrap().tokens, 77);
        let (key, meta) = purchase("cs_persist");
        assert!(!store.apply_grant(&key, &user_id, 77, meta).unwrap().applied);
    }
}
