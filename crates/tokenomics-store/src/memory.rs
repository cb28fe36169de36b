//! In-memory storage implementation.
//!
//! Every operation runs under one mutex, which serialises all writers. Used by
//! tests and by the service when no data directory is configured.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokenomics_core::{
    ApplyOutcome, Balance, Direction, EntryId, EntryMeta, ExchangeRateSnapshot, FailedEvent,
    FailedEventId, IdempotencyKey, LedgerEntry, PackId, SnapshotId, TokenPack, UserId,
};

use crate::error::{Result, StoreError};
use crate::{duplicate_outcome, prepare_entry, validate_tokens, LedgerStore};

#[derive(Default)]
struct State {
    entries: HashMap<IdempotencyKey, LedgerEntry>,
    entry_ids: BTreeMap<EntryId, IdempotencyKey>,
    balances: HashMap<UserId, Balance>,
    packs: HashMap<PackId, TokenPack>,
    snapshots: BTreeMap<SnapshotId, ExchangeRateSnapshot>,
    failed: BTreeMap<FailedEventId, FailedEvent>,
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    fn apply(
        &self,
        key: &IdempotencyKey,
        user_id: &UserId,
        direction: Direction,
        tokens: i64,
        meta: EntryMeta,
    ) -> Result<ApplyOutcome> {
        validate_tokens(tokens)?;
        let mut state = self.lock()?;

        if let Some(existing) = state.entries.get(key) {
            let balance = state
                .balances
                .get(&existing.user_id)
                .map_or(0, |b| b.tokens);
            return Ok(duplicate_outcome(existing, user_id, balance));
        }

        let mut balance = state
            .balances
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Balance::new(*user_id));
        let entry = prepare_entry(&mut balance, key, direction, tokens, meta)?;
        let outcome = ApplyOutcome {
            applied: true,
            balance: balance.tokens,
            entry_id: entry.id,
        };

        state.entry_ids.insert(entry.id, key.clone());
        state.entries.insert(key.clone(), entry);
        state.balances.insert(*user_id, balance);
        Ok(outcome)
    }
}

impl LedgerStore for MemoryStore {
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
        Ok(self.lock()?.balances.get(user_id).cloned())
    }

    fn get_entry(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn get_entry_by_id(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        let state = self.lock()?;
        Ok(state
            .entry_ids
            .get(entry_id)
            .and_then(|key| state.entries.get(key))
            .cloned())
    }

    fn list_entries_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.lock()?;
        Ok(state
            .entry_ids
            .values()
            .rev()
            .filter_map(|key| state.entries.get(key))
            .filter(|entry| entry.user_id == *user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn list_entries(&self) -> Result<Vec<LedgerEntry>> {
        let state = self.lock()?;
        Ok(state
            .entry_ids
            .values()
            .filter_map(|key| state.entries.get(key))
            .cloned()
            .collect())
    }

    fn append_rate_snapshot(&self, snapshot: &ExchangeRateSnapshot) -> Result<()> {
        self.lock()?.snapshots.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    fn latest_rate_snapshot(&self) -> Result<Option<ExchangeRateSnapshot>> {
        Ok(self
            .lock()?
            .snapshots
            .values()
            .rev()
            .find(|snapshot| !snapshot.is_fallback)
            .cloned())
    }

    fn rate_snapshot_as_of(&self, at: DateTime<Utc>) -> Result<Option<ExchangeRateSnapshot>> {
        Ok(self
            .lock()?
            .snapshots
            .range(..=SnapshotId::upper_bound(at))
            .next_back()
            .map(|(_, snapshot)| snapshot.clone()))
    }

    fn list_rate_snapshots(&self, limit: usize) -> Result<Vec<ExchangeRateSnapshot>> {
        Ok(self
            .lock()?
            .snapshots
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn put_token_pack(&self, pack: &TokenPack) -> Result<()> {
        self.lock()?.packs.insert(pack.id, pack.clone());
        Ok(())
    }

    fn get_token_pack(&self, pack_id: &PackId) -> Result<Option<TokenPack>> {
        Ok(self.lock()?.packs.get(pack_id).cloned())
    }

    fn list_token_packs(&self) -> Result<Vec<TokenPack>> {
        let mut packs: Vec<_> = self.lock()?.packs.values().cloned().collect();
        packs.sort_by(|a, b| {
            a.price_jpy
                .cmp(&b.price_jpy)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(packs)
    }

    fn record_failed_event(&self, event: &FailedEvent) -> Result<()> {
        self.lock()?.failed.insert(event.id, event.clone());
        Ok(())
    }

    fn list_failed_events(&self, limit: usize) -> Result<Vec<FailedEvent>> {
        Ok(self
            .lock()?
            .failed
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
