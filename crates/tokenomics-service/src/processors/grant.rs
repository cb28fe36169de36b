//! Purchase confirmations into token grants.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokenomics_core::{
    EntryId, EntryKind, EntryMeta, FailedEvent, IdempotencyKey, LedgerEntry, PricingEngine, UserId,
};
use tokenomics_store::LedgerStore;

use super::{record_failure, ProcessError, RetryPolicy};
use crate::exchange::ExchangeRateProvider;

/// The only currency purchases are accepted in.
pub const PURCHASE_CURRENCY: &str = "jpy";

/// A completed checkout, as reported by the payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseConfirmation {
    /// Payment-processor event ID (for logs only; retries reuse the session).
    pub event_id: String,
    /// Checkout session ID. The idempotency key is derived from it.
    pub session_id: String,
    /// User the purchase belongs to.
    pub user_ref: Option<String>,
    /// Amount paid, in yen.
    pub amount_total: Option<i64>,
    /// ISO currency code.
    pub currency: Option<String>,
    /// Processor payment status (`paid` once funds are captured).
    pub payment_status: Option<String>,
    /// Model the purchase should be priced against.
    pub model_id: Option<String>,
}

/// Result of a grant that reached the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GrantReceipt {
    /// `false` when the session had already been granted.
    pub applied: bool,
    /// Tokens granted for this session.
    pub tokens: i64,
    /// The user's current balance.
    pub balance: i64,
    /// The ledger entry for this session.
    pub entry_id: EntryId,
}

/// What happened to a purchase confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Tokens were granted now or by an earlier delivery.
    Granted(GrantReceipt),
    /// Acknowledged without a grant.
    Skipped {
        /// Why no grant was made.
        reason: String,
    },
}

/// Applies purchase confirmations to the ledger exactly once.
#[derive(Clone)]
pub struct GrantProcessor {
    store: Arc<dyn LedgerStore>,
    rates: ExchangeRateProvider,
    engine: PricingEngine,
    retry: RetryPolicy,
}

impl GrantProcessor {
    /// Create a processor with the default retry policy.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        rates: ExchangeRateProvider,
        engine: PricingEngine,
    ) -> Self {
        Self {
            store,
            rates,
            engine,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Process one confirmation.
    ///
    /// Replays of an already granted session return the original grant with
    /// `applied: false`.
    pub async fn process(
        &self,
        event: &PurchaseConfirmation,
    ) -> Result<GrantOutcome, ProcessError> {
        let key = IdempotencyKey::purchase(&event.session_id)
            .map_err(|e| self.reject(event, None, None, format!("invalid session id: {e}")))?;

        if event.payment_status.as_deref() != Some("paid") {
            let reason = format!(
                "payment not completed (status: {})",
                event.payment_status.as_deref().unwrap_or("missing")
            );
            tracing::info!(
                event_id = %event.event_id,
                idempotency_key = %key,
                reason = %reason,
                "Purchase skipped"
            );
            return Ok(GrantOutcome::Skipped { reason });
        }

        let user_id = event
            .user_ref
            .as_deref()
            .ok_or_else(|| "missing user reference".to_string())
            .and_then(|s| {
                s.parse::<UserId>()
                    .map_err(|_| format!("invalid user reference: {s}"))
            })
            .map_err(|reason| self.reject(event, Some(&key), None, reason))?;

        let currency = event.currency.as_deref().unwrap_or("missing");
        if !currency.eq_ignore_ascii_case(PURCHASE_CURRENCY) {
            let reason = format!("unsupported currency: {currency}");
            // Money was taken but nothing is granted; keep it visible.
            self.fail(event, &key, Some(user_id), &reason, 0);
            return Ok(GrantOutcome::Skipped { reason });
        }

        let amount_jpy = match event.amount_total {
            Some(amount) if amount > 0 => amount,
            other => {
                return Err(self.reject(
                    event,
                    Some(&key),
                    Some(user_id),
                    format!("invalid amount: {other:?}"),
                ))
            }
        };

        if let Some(existing) = self.store.get_entry(&key).map_err(ProcessError::Store)? {
            return self.already_granted(&key, &existing);
        }

        let rate = self.rates.get_rate().await;
        let margin = self.engine.config().target_margin;
        let model_id = event
            .model_id
            .as_deref()
            .unwrap_or_else(|| self.engine.cost_model().default_model());

        let quote = match self
            .engine
            .with_rate(rate)
            .tokens_to_grant(amount_jpy, model_id, margin)
        {
            Ok(quote) => quote,
            Err(e) => {
                self.fail(event, &key, Some(user_id), &e.to_string(), 0);
                return Err(ProcessError::Pricing(e));
            }
        };

        if quote.rate.is_fallback {
            tracing::warn!(
                idempotency_key = %key,
                rate = %quote.rate.rate,
                source = %quote.rate.source,
                "Pricing purchase at fallback exchange rate"
            );
        }

        let meta = EntryMeta::purchase(&event.session_id, amount_jpy)
            .priced(quote.rate.rate, quote.rate.is_fallback, margin)
            .with_model(quote.model_id.clone());

        let (result, attempts) = self
            .retry
            .run(&key, || {
                self.store
                    .apply_grant(&key, &user_id, quote.tokens, meta.clone())
            })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = ProcessError::from_store(e, &key, attempts);
                tracing::error!(
                    idempotency_key = %key,
                    user_id = %user_id,
                    attempts = %attempts,
                    error = %err,
                    "Purchase grant failed"
                );
                self.fail(event, &key, Some(user_id), &err.to_string(), attempts);
                return Err(err);
            }
        };

        if !outcome.applied {
            // Lost the race to a concurrent delivery of the same session.
            let existing = self
                .store
                .get_entry_by_id(&outcome.entry_id)
                .map_err(ProcessError::Store)?;
            let tokens = existing.map_or(quote.tokens, |e| e.tokens);
            return Ok(GrantOutcome::Granted(GrantReceipt {
                applied: false,
                tokens,
                balance: outcome.balance,
                entry_id: outcome.entry_id,
            }));
        }

        tracing::info!(
            event_id = %event.event_id,
            idempotency_key = %key,
            user_id = %user_id,
            amount_jpy = %amount_jpy,
            tokens = %quote.tokens,
            rate = %quote.rate.rate,
            model = %quote.model_id,
            balance = %outcome.balance,
            "Purchase granted"
        );

        Ok(GrantOutcome::Granted(GrantReceipt {
            applied: true,
            tokens: quote.tokens,
            balance: outcome.balance,
            entry_id: outcome.entry_id,
        }))
    }

    fn already_granted(
        &self,
        key: &IdempotencyKey,
        existing: &LedgerEntry,
    ) -> Result<GrantOutcome, ProcessError> {
        let balance = self
            .store
            .get_balance(&existing.user_id)
            .map_err(ProcessError::Store)?
            .map_or(0, |b| b.tokens);
        tracing::info!(
            idempotency_key = %key,
            user_id = %existing.user_id,
            "Duplicate event, no-op"
        );
        Ok(GrantOutcome::Granted(GrantReceipt {
            applied: false,
            tokens: existing.tokens,
            balance,
            entry_id: existing.id,
        }))
    }

    fn reject(
        &self,
        event: &PurchaseConfirmation,
        key: Option<&IdempotencyKey>,
        user_id: Option<UserId>,
        reason: String,
    ) -> ProcessError {
        tracing::warn!(
            event_id = %event.event_id,
            session_id = %event.session_id,
            reason = %reason,
            "Rejected purchase confirmation"
        );
        let mut failed = FailedEvent::new(EntryKind::Purchase, &reason, payload(event));
        if let Some(key) = key {
            failed = failed.with_key(key.clone());
        }
        if let Some(user_id) = user_id {
            failed = failed.with_user(user_id);
        }
        record_failure(self.store.as_ref(), &failed);
        ProcessError::InvalidEvent(reason)
    }

    fn fail(
        &self,
        event: &PurchaseConfirmation,
        key: &IdempotencyKey,
        user_id: Option<UserId>,
        reason: &str,
        attempts: u32,
    ) {
        tracing::warn!(
            event_id = %event.event_id,
            idempotency_key = %key,
            reason = %reason,
            "Purchase not granted"
        );
        let mut failed = FailedEvent::new(EntryKind::Purchase, reason, payload(event))
            .with_key(key.clone())
            .with_attempts(attempts);
        if let Some(user_id) = user_id {
            failed = failed.with_user(user_id);
        }
        record_failure(self.store.as_ref(), &failed);
    }
}

fn payload(event: &PurchaseConfirmation) -> serde_json::Value {
    serde_json::to_value(event).unwrap_or_default()
}
