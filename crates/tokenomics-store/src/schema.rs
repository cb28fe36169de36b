//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Ledger entries, keyed by idempotency key. Presence of a key is the
    /// exactly-once guard.
    pub const LEDGER_ENTRIES: &str = "ledger_entries";

    /// Index: idempotency key by entry ID, keyed by `entry_id` (ULID).
    pub const ENTRY_IDS: &str = "entry_ids";

    /// Index: entries by user, keyed by `user_id || entry_id`.
    /// Value is the idempotency key.
    pub const ENTRIES_BY_USER: &str = "entries_by_user";

    /// Balance projections, keyed by `user_id`.
    pub const BALANCES: &str = "balances";

    /// Token pack catalogue, keyed by `pack_id`.
    pub const TOKEN_PACKS: &str = "token_packs";

    /// Exchange-rate history, keyed by `snapshot_id` (ULID, fetch-time ordered).
    pub const RATE_SNAPSHOTS: &str = "rate_snapshots";

    /// Dead-letter records, keyed by `failed_event_id` (ULID).
    pub const FAILED_EVENTS: &str = "failed_events";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::LEDGER_ENTRIES,
        cf::ENTRY_IDS,
        cf::ENTRIES_BY_USER,
        cf::BALANCES,
        cf::TOKEN_PACKS,
        cf::RATE_SNAPSHOTS,
        cf::FAILED_EVENTS,
    ]
}
