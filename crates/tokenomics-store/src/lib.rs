//! Ledger storage for tokenomics.
//!
//! This crate persists the append-only ledger, the per-user balance projection,
//! the token pack catalogue, exchange-rate history, and dead-letter records.
//!
//! # Exactly-once application
//!
//! Every grant or debit carries an idempotency key. A key is applied at most
//! once: the entry insert and the balance update commit together, and a
//! replayed key is a no-op that reports the current balance.
//!
//! # Architecture
//!
//! `RocksStore` uses the following column families:
//!
//! - `ledger_entries`: Ledger entries, keyed by idempotency key
//! - `entry_ids`: Index from entry ID to idempotency key
//! - `entries_by_user`: Index for listing entries by user
//! - `balances`: Balance projections, keyed by `user_id`
//! - `token_packs`: Token pack catalogue
//! - `rate_snapshots`: Exchange-rate history, time-ordered
//! - `failed_events`: Dead-letter records
//!
//! # Example
//!
//! ```no_run
//! use tokenomics_store::{LedgerStore, RocksStore};
//! use tokenomics_core::{EntryMeta, IdempotencyKey, UserId};
//!
//! let store = RocksStore::open("/tmp/tokenomics-db").unwrap();
//!
//! let user_id = UserId::generate();
//! let key = IdempotencyKey::purchase("cs_test_1").unwrap();
//! let outcome = store
//!     .apply_grant(&key, &user_id, 500, EntryMeta::purchase("cs_test_1", 1000))
//!     .unwrap();
//! assert!(outcome.applied);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use tokenomics_core::{
    ApplyOutcome, Balance, BalanceAudit, Direction, EntryId, EntryMeta, ExchangeRateSnapshot,
    FailedEvent, IdempotencyKey, LedgerEntry, PackId, TokenPack, UserId,
};

/// The storage trait defining all ledger operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait LedgerStore: Send + Sync {
    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Grant tokens under an idempotency key.
    ///
    /// The entry insert and balance update are one atomic write. A key that
    /// was already applied returns `applied: false` with the current balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::Invalid` for a non-positive token count.
    /// - `StoreError::Conflict` if the write could not acquire its locks.
    fn apply_grant(
        &self,
        key: &IdempotencyKey,
        user_id: &UserId,
        tokens: i64,
        meta: EntryMeta,
    ) -> Result<ApplyOutcome>;

    /// Debit tokens under an idempotency key.
    ///
    /// # Errors
    ///
    /// - `StoreError::InsufficientBalance` if the debit exceeds the balance;
    ///   nothing is written.
    /// - `StoreError::Invalid` for a non-positive token count.
    /// - `StoreError::Conflict` if the write could not acquire its locks.
    fn apply_debit(
        &self,
        key: &IdempotencyKey,
        user_id: &UserId,
        tokens: i64,
        meta: EntryMeta,
    ) -> Result<ApplyOutcome>;

    /// Get a user's balance. `None` if the user has no entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_balance(&self, user_id: &UserId) -> Result<Option<Balance>>;

    /// Get the entry written for an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_entry(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>>;

    /// Get an entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_entry_by_id(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>>;

    /// List entries for a user, ordered by time (newest first).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_entries_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// List every entry, ordered by time (oldest first).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_entries(&self) -> Result<Vec<LedgerEntry>>;

    /// Recompute a user's balance from the log and compare with the projection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn audit_balance(&self, user_id: &UserId) -> Result<BalanceAudit> {
        let stored = self.get_balance(user_id)?.map_or(0, |b| b.tokens);
        let entries = self.list_entries_by_user(user_id, usize::MAX, 0)?;
        Ok(BalanceAudit::from_entries(*user_id, stored, &entries))
    }

    // =========================================================================
    // Exchange-Rate History
    // =========================================================================

    /// Append a snapshot. Snapshots are never modified.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_rate_snapshot(&self, snapshot: &ExchangeRateSnapshot) -> Result<()>;

    /// The most recent live snapshot. Fallback snapshots are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn latest_rate_snapshot(&self) -> Result<Option<ExchangeRateSnapshot>>;

    /// The latest snapshot, live or fallback, recorded at or before `at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn rate_snapshot_as_of(&self, at: DateTime<Utc>) -> Result<Option<ExchangeRateSnapshot>>;

    /// List snapshots, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_rate_snapshots(&self, limit: usize) -> Result<Vec<ExchangeRateSnapshot>>;

    // =========================================================================
    // Token Pack Catalogue
    // =========================================================================

    /// Insert or replace a pack.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_token_pack(&self, pack: &TokenPack) -> Result<()>;

    /// Get a pack by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_token_pack(&self, pack_id: &PackId) -> Result<Option<TokenPack>>;

    /// List all packs, cheapest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_token_packs(&self) -> Result<Vec<TokenPack>>;

    // =========================================================================
    // Dead Letters
    // =========================================================================

    /// Record an event that could not be applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_failed_event(&self, event: &FailedEvent) -> Result<()>;

    /// List failed events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_failed_events(&self, limit: usize) -> Result<Vec<FailedEvent>>;
}

/// Apply an entry to a balance and build the entry to persist.
///
/// Shared by the backends; the caller holds whatever lock serialises the user.
pub(crate) fn prepare_entry(
    balance: &mut Balance,
    key: &IdempotencyKey,
    direction: Direction,
    tokens: i64,
    meta: EntryMeta,
) -> Result<LedgerEntry> {
    let mut next = balance.clone();
    let balance_after = next.apply(direction, tokens)?;
    let entry = LedgerEntry::new(
        key.clone(),
        balance.user_id,
        direction,
        tokens,
        balance_after,
        meta,
    )?;
    *balance = next;
    Ok(entry)
}

/// Outcome for a key that was already applied.
pub(crate) fn duplicate_outcome(
    existing: &LedgerEntry,
    user_id: &UserId,
    balance: i64,
) -> ApplyOutcome {
    if existing.user_id != *user_id {
        tracing::warn!(
            idempotency_key = %existing.idempotency_key,
            original_user = %existing.user_id,
            replayed_user = %user_id,
            "Idempotency key replayed for a different user"
        );
    }
    tracing::info!(
        idempotency_key = %existing.idempotency_key,
        user_id = %existing.user_id,
        "Duplicate event, no-op"
    );
    ApplyOutcome {
        applied: false,
        balance,
        entry_id: existing.id,
    }
}

pub(crate) fn validate_tokens(tokens: i64) -> Result<()> {
    if tokens <= 0 {
        return Err(StoreError::Invalid(
            tokenomics_core::BillingError::InvalidTokens(tokens),
        ));
    }
    Ok(())
}
