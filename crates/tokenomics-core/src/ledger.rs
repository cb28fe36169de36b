//! Ledger types.
//!
//! Every balance change is a `LedgerEntry`, keyed by an idempotency key and
//! never mutated after it is written. `Balance` is the per-user projection of
//! the log, written in the same transaction as each entry.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::ids::{EntryId, FailedEventId, IdempotencyKey, UserId};

/// Whether an entry adds or removes tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Adds tokens.
    Grant,
    /// Removes tokens.
    Debit,
}

/// What caused a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Tokens bought through the payment processor.
    Purchase,
    /// Tokens consumed by an AI call.
    Usage,
    /// Administrator correction of an earlier entry or pack.
    Compensation,
}

impl EntryKind {
    /// Check whether this kind may be written in the given direction.
    #[must_use]
    pub const fn allows(&self, direction: Direction) -> bool {
        match self {
            Self::Purchase => matches!(direction, Direction::Grant),
            Self::Usage => matches!(direction, Direction::Debit),
            Self::Compensation => true,
        }
    }
}

/// Caller-supplied context recorded on a ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// What caused the entry.
    pub kind: EntryKind,
    /// Yen paid, for purchases.
    pub source_amount_jpy: Option<i64>,
    /// JPY per USD used to price the entry.
    pub exchange_rate_used: Option<Decimal>,
    /// Whether the rate was a fallback.
    pub rate_was_fallback: bool,
    /// Model the entry was priced against.
    pub model: Option<String>,
    /// Margin the entry was priced at.
    pub target_margin: Option<Decimal>,
    /// Upstream reference (payment session, request id, correction id).
    pub reference: Option<String>,
    /// For compensations, the entry key or pack ID being corrected.
    #[serde(default)]
    pub corrects: Option<String>,
    /// Human-readable description.
    pub memo: String,
}

impl EntryMeta {
    /// Metadata for a purchase grant.
    #[must_use]
    pub fn purchase(session_id: &str, amount_jpy: i64) -> Self {
        Self {
            kind: EntryKind::Purchase,
            source_amount_jpy: Some(amount_jpy),
            exchange_rate_used: None,
            rate_was_fallback: false,
            model: None,
            target_margin: None,
            reference: Some(session_id.to_string()),
            corrects: None,
            memo: format!("Purchase of {amount_jpy} JPY"),
        }
    }

    /// Metadata for a usage debit.
    #[must_use]
    pub fn usage(request_id: &str, model: &str) -> Self {
        Self {
            kind: EntryKind::Usage,
            source_amount_jpy: None,
            exchange_rate_used: None,
            rate_was_fallback: false,
            model: Some(model.to_string()),
            target_margin: None,
            reference: Some(request_id.to_string()),
            corrects: None,
            memo: format!("Usage of {model}"),
        }
    }

    /// Metadata for an administrator correction.
    #[must_use]
    pub fn compensation(reference: &str, corrects: Option<String>, memo: String) -> Self {
        Self {
            kind: EntryKind::Compensation,
            source_amount_jpy: None,
            exchange_rate_used: None,
            rate_was_fallback: false,
            model: None,
            target_margin: None,
            reference: Some(reference.to_string()),
            corrects,
            memo,
        }
    }

    /// Record the pricing inputs used.
    #[must_use]
    pub fn priced(mut self, rate: Decimal, rate_was_fallback: bool, margin: Decimal) -> Self {
        self.exchange_rate_used = Some(rate);
        self.rate_was_fallback = rate_was_fallback;
        self.target_margin = Some(margin);
        self
    }

    /// Record the model the entry was priced against.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// An immutable record of one balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID (ULID for time-ordering).
    pub id: EntryId,

    /// Unique key derived from the upstream event.
    pub idempotency_key: IdempotencyKey,

    /// The user whose balance changed.
    pub user_id: UserId,

    /// Grant or debit.
    pub direction: Direction,

    /// Tokens moved, always positive.
    pub tokens: i64,

    /// Balance after this entry was applied.
    pub balance_after: i64,

    /// Pricing context and description.
    #[serde(flatten)]
    pub meta: EntryMeta,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create a validated entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTokens` for a non-positive token count, or
    /// `InvalidEntity` for a negative resulting balance or a kind that does not
    /// match the direction.
    pub fn new(
        idempotency_key: IdempotencyKey,
        user_id: UserId,
        direction: Direction,
        tokens: i64,
        balance_after: i64,
        meta: EntryMeta,
    ) -> Result<Self> {
        if tokens <= 0 {
            return Err(BillingError::InvalidTokens(tokens));
        }
        if balance_after < 0 {
            return Err(BillingError::InvalidEntity {
                entity: "ledger entry",
                reason: format!("negative balance after entry: {balance_after}"),
            });
        }
        if !meta.kind.allows(direction) {
            return Err(BillingError::InvalidEntity {
                entity: "ledger entry",
                reason: format!("{:?} entries cannot be a {direction:?}", meta.kind),
            });
        }
        // Generated IDs increase strictly, so entries created within the same
        // millisecond still list in creation order.
        let id = EntryId::generate();
        Ok(Self {
            id,
            idempotency_key,
            user_id,
            direction,
            tokens,
            balance_after,
            meta,
            created_at: Utc::now(),
        })
    }

    /// Token delta with sign: positive for grants, negative for debits.
    #[must_use]
    pub const fn signed_tokens(&self) -> i64 {
        match self.direction {
            Direction::Grant => self.tokens,
            Direction::Debit => -self.tokens,
        }
    }
}

/// A user's current token balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// The user.
    pub user_id: UserId,
    /// Spendable tokens, never negative.
    pub tokens: i64,
    /// Sum of all granted tokens.
    pub lifetime_granted: i64,
    /// Sum of all debited tokens.
    pub lifetime_debited: i64,
    /// When the first entry was applied.
    pub created_at: DateTime<Utc>,
    /// When the last entry was applied.
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// A zero balance for a user with no entries.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            tokens: 0,
            lifetime_granted: 0,
            lifetime_debited: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the balance covers a debit.
    #[must_use]
    pub const fn has_sufficient_tokens(&self, tokens: i64) -> bool {
        self.tokens >= tokens
    }

    /// Apply a grant or debit and return the new balance.
    ///
    /// The balance is left unchanged on error.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientBalance` if a debit exceeds the balance,
    /// `InvalidTokens` for a non-positive amount, or `Overflow`.
    pub fn apply(&mut self, direction: Direction, tokens: i64) -> Result<i64> {
        if tokens <= 0 {
            return Err(BillingError::InvalidTokens(tokens));
        }
        match direction {
            Direction::Grant => {
                let balance = self
                    .tokens
                    .checked_add(tokens)
                    .ok_or(BillingError::Overflow("granting tokens"))?;
                let granted = self
                    .lifetime_granted
                    .checked_add(tokens)
                    .ok_or(BillingError::Overflow("granting tokens"))?;
                self.tokens = balance;
                self.lifetime_granted = granted;
            }
            Direction::Debit => {
                if !self.has_sufficient_tokens(tokens) {
                    return Err(BillingError::InsufficientBalance {
                        balance: self.tokens,
                        required: tokens,
                    });
                }
                let debited = self
                    .lifetime_debited
                    .checked_add(tokens)
                    .ok_or(BillingError::Overflow("debiting tokens"))?;
                self.tokens -= tokens;
                self.lifetime_debited = debited;
            }
        }
        self.updated_at = Utc::now();
        Ok(self.tokens)
    }
}

/// Result of applying a grant or debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// False when the idempotency key had already been applied.
    pub applied: bool,
    /// Balance after the call (the current balance for duplicates).
    pub balance: i64,
    /// The entry written now, or the one written by the first application.
    pub entry_id: EntryId,
}

/// Balance recomputed from the log and compared with the stored projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAudit {
    /// The user.
    pub user_id: UserId,
    /// Balance as stored.
    pub stored: i64,
    /// Sum of grants minus sum of debits.
    pub recomputed: i64,
    /// Number of entries summed.
    pub entries: usize,
    /// Whether stored and recomputed agree.
    pub consistent: bool,
}

impl BalanceAudit {
    /// Audit a user's entries against a stored balance.
    #[must_use]
    pub fn from_entries(user_id: UserId, stored: i64, entries: &[LedgerEntry]) -> Self {
        let recomputed = entries.iter().map(LedgerEntry::signed_tokens).sum();
        Self {
            user_id,
            stored,
            recomputed,
            entries: entries.len(),
            consistent: stored == recomputed,
        }
    }
}

/// An event that could not be applied and needs operator attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEvent {
    /// Record ID (ULID).
    pub id: FailedEventId,
    /// Key the event would have been applied under, if one could be derived.
    pub idempotency_key: Option<IdempotencyKey>,
    /// What the event was.
    pub kind: EntryKind,
    /// The affected user, if known.
    pub user_id: Option<UserId>,
    /// Why it failed.
    pub reason: String,
    /// The inbound payload as received.
    pub payload: serde_json::Value,
    /// Ledger write attempts made (0 for validation failures).
    pub attempts: u32,
    /// When it was recorded.
    pub failed_at: DateTime<Utc>,
}

impl FailedEvent {
    /// Create a failure record stamped now.
    #[must_use]
    pub fn new(kind: EntryKind, reason: impl Into<String>, payload: serde_json::Value) -> Self {
        let failed_at = Utc::now();
        Self {
            id: FailedEventId::generate(),
            idempotency_key: None,
            kind,
            user_id: None,
            reason: reason.into(),
            payload,
            attempts: 0,
            failed_at,
        }
    }

    /// Attach the idempotency key.
    #[must_use]
    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Attach the user.
    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Record how many write attempts were made.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> IdempotencyKey {
        IdempotencyKey::purchase(id).unwrap()
    }

    #[test]
    fn debit_beyond_balance_leaves_balance_unchanged() {
        let mut balance = Balance::new(UserId::generate());
        balance.apply(Direction::Grant, 100).unwrap();

        let err = balance.apply(Direction::Debit, 101).unwrap_err();
        assert_eq!(
            err,
            BillingError::InsufficientBalance {
                balance: 100,
                required: 101
            }
        );
        assert_eq!(balance.tokens, 100);
        assert_eq!(balance.lifetime_debited, 0);

        assert_eq!(balance.apply(Direction::Debit, 100).unwrap(), 0);
        assert_eq!(balance.lifetime_granted, 100);
        assert_eq!(balance.lifetime_debited, 100);
    }

    #[test]
    fn balance_rejects_non_positive_amounts() {
        let mut balance = Balance::new(UserId::generate());
        assert!(balance.apply(Direction::Grant, 0).is_err());
        assert!(balance.apply(Direction::Debit, -5).is_err());
    }

    #[test]
    fn back_to_back_entries_keep_creation_order() {
        let user_id = UserId::generate();
        let ids: Vec<EntryId> = (0..200)
            .map(|i| {
                let session = format!("cs_{i}");
                LedgerEntry::new(
                    key(&session),
                    user_id,
                    Direction::Grant,
                    1,
                    i + 1,
                    EntryMeta::purchase(&session, 1),
                )
                .unwrap()
                .id
            })
            .collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn entry_signed_tokens() {
        let user_id = UserId::generate();
        let grant = LedgerEntry::new(
            key("cs_1"),
            user_id,
            Direction::Grant,
            500,
            500,
            EntryMeta::purchase("cs_1", 1000),
        )
        .unwrap();
        let debit = LedgerEntry::new(
            IdempotencyKey::usage("req_1").unwrap(),
            user_id,
            Direction::Debit,
            20,
            480,
            EntryMeta::usage("req_1", "gpt-4o-mini"),
        )
        .unwrap();

        assert_eq!(grant.signed_tokens(), 500);
        assert_eq!(debit.signed_tokens(), -20);

        let audit = BalanceAudit::from_entries(user_id, 480, &[grant, debit]);
        assert!(audit.consistent);
        assert_eq!(audit.entries, 2);
    }

    #[test]
    fn entry_rejects_kind_direction_mismatch() {
        let err = LedgerEntry::new(
            key("cs_2"),
            UserId::generate(),
            Direction::Debit,
            10,
            0,
            EntryMeta::purchase("cs_2", 1000),
        );
        assert!(matches!(err, Err(BillingError::InvalidEntity { .. })));

        assert!(EntryKind::Compensation.allows(Direction::Debit));
        assert!(EntryKind::Compensation.allows(Direction::Grant));
    }

    #[test]
    fn entry_rejects_zero_tokens() {
        let err = LedgerEntry::new(
            key("cs_3"),
            UserId::generate(),
            Direction::Grant,
            0,
            0,
            EntryMeta::purchase("cs_3", 1000),
        );
        assert_eq!(err, Err(BillingError::InvalidTokens(0)));
    }

    #[test]
    fn entry_serializes_meta_inline() {
        let entry = LedgerEntry::new(
            key("cs_4"),
            UserId::generate(),
            Direction::Grant,
            42,
            42,
            EntryMeta::purchase("cs_4", 500).with_model("gpt-4o"),
        )
        .unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "purchase");
        assert_eq!(json["direction"], "grant");
        assert_eq!(json["source_amount_jpy"], 500);
        assert_eq!(json["idempotency_key"], "purchase:cs_4");

        let parsed: LedgerEntry = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, entry);
    }
}
