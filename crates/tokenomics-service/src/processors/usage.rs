//! Usage events into token debits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokenomics_core::{
    EntryId, EntryKind, EntryMeta, FailedEvent, IdempotencyKey, PricingEngine, UserId,
};
use tokenomics_store::LedgerStore;

use super::{record_failure, ProcessError, RetryPolicy};

/// One completed AI call to be charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Per-message request ID. The idempotency key is derived from it.
    pub request_id: String,
    /// User to charge.
    pub user_id: String,
    /// Model that served the call.
    pub model_id: String,
    /// Input units consumed.
    pub input_units: u64,
    /// Output units produced.
    pub output_units: u64,
}

/// Result of a usage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageReceipt {
    /// `false` for replays and for zero usage (nothing written).
    pub applied: bool,
    /// Tokens debited for this request.
    pub tokens_debited: i64,
    /// The user's current balance.
    pub balance: i64,
    /// Ledger entry for this request, if one exists.
    pub entry_id: Option<EntryId>,
}

/// Applies usage events to the ledger exactly once.
///
/// Prices against the cached exchange rate; never waits on a rate fetch.
#[derive(Clone)]
pub struct UsageProcessor {
    store: Arc<dyn LedgerStore>,
    engine: PricingEngine,
    retry: RetryPolicy,
}

impl UsageProcessor {
    /// Create a processor with the default retry policy.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, engine: PricingEngine) -> Self {
        Self {
            store,
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

    /// Process one usage event.
    pub async fn process(&self, event: &UsageEvent) -> Result<UsageReceipt, ProcessError> {
        let key = IdempotencyKey::usage(&event.request_id)
            .map_err(|e| self.reject(event, None, None, format!("invalid request id: {e}")))?;
        let user_id = event
            .user_id
            .parse::<UserId>()
            .map_err(|_| {
                self.reject(
                    event,
                    Some(&key),
                    None,
                    format!("invalid user id: {}", event.user_id),
                )
            })?;
        if event.model_id.trim().is_empty() {
            return Err(self.reject(event, Some(&key), Some(user_id), "missing model id".into()));
        }

        if let Some(existing) = self.store.get_entry(&key).map_err(ProcessError::Store)? {
            let balance = self.balance_of(&existing.user_id)?;
            tracing::info!(
                idempotency_key = %key,
                user_id = %existing.user_id,
                "Duplicate event, no-op"
            );
            return Ok(UsageReceipt {
                applied: false,
                tokens_debited: existing.tokens,
                balance,
                entry_id: Some(existing.id),
            });
        }

        let margin = self.engine.config().target_margin;
        let quote = match self.engine.tokens_to_debit(
            event.input_units,
            event.output_units,
            &event.model_id,
            margin,
        ) {
            Ok(quote) => quote,
            Err(e) => {
                self.fail(event, &key, user_id, &e.to_string(), 0);
                return Err(ProcessError::Pricing(e));
            }
        };

        if quote.tokens == 0 {
            tracing::debug!(idempotency_key = %key, "Zero usage, nothing to debit");
            return Ok(UsageReceipt {
                applied: false,
                tokens_debited: 0,
                balance: self.balance_of(&user_id)?,
                entry_id: None,
            });
        }

        let meta = EntryMeta::usage(&event.request_id, &quote.model_id)
            .priced(quote.rate.rate, quote.rate.is_fallback, margin);

        let (result, attempts) = self
            .retry
            .run(&key, || {
                self.store
                    .apply_debit(&key, &user_id, quote.tokens, meta.clone())
            })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = ProcessError::from_store(e, &key, attempts);
                if matches!(err, ProcessError::InsufficientBalance { .. }) {
                    tracing::warn!(
                        idempotency_key = %key,
                        user_id = %user_id,
                        required = %quote.tokens,
                        "Insufficient balance for usage"
                    );
                } else {
                    tracing::error!(
                        idempotency_key = %key,
                        user_id = %user_id,
                        attempts = %attempts,
                        error = %err,
                        "Usage debit failed"
                    );
                }
                self.fail(event, &key, user_id, &err.to_string(), attempts);
                return Err(err);
            }
        };

        let tokens_debited = if outcome.applied {
            tracing::info!(
                idempotency_key = %key,
                user_id = %user_id,
                model = %quote.model_id,
                input_units = %event.input_units,
                output_units = %event.output_units,
                tokens = %quote.tokens,
                balance = %outcome.balance,
                "Usage debited"
            );
            quote.tokens
        } else {
            self.store
                .get_entry_by_id(&outcome.entry_id)
                .map_err(ProcessError::Store)?
                .map_or(quote.tokens, |e| e.tokens)
        };

        Ok(UsageReceipt {
            applied: outcome.applied,
            tokens_debited,
            balance: outcome.balance,
            entry_id: Some(outcome.entry_id),
        })
    }

    fn balance_of(&self, user_id: &UserId) -> Result<i64, ProcessError> {
        Ok(self
            .store
            .get_balance(user_id)
            .map_err(ProcessError::Store)?
            .map_or(0, |b| b.tokens))
    }

    fn reject(
        &self,
        event: &UsageEvent,
        key: Option<&IdempotencyKey>,
        user_id: Option<UserId>,
        reason: String,
    ) -> ProcessError {
        tracing::warn!(
            request_id = %event.request_id,
            reason = %reason,
            "Rejected usage event"
        );
        let mut failed = FailedEvent::new(EntryKind::Usage, &reason, payload(event));
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
        event: &UsageEvent,
        key: &IdempotencyKey,
        user_id: UserId,
        reason: &str,
        attempts: u32,
    ) {
        let failed = FailedEvent::new(EntryKind::Usage, reason, payload(event))
            .with_key(key.clone())
            .with_user(user_id)
            .with_attempts(attempts);
        record_failure(self.store.as_ref(), &failed);
    }
}

fn payload(event: &UsageEvent) -> serde_json::Value {
    serde_json::to_value(event).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::{harness, FlakyStore};
    use rust_decimal_macros::dec;
    use tokenomics_core::Direction;

    fn event(request_id: &str, user_id: UserId, input: u64, output: u64) -> UsageEvent {
        UsageEvent {
            request_id: request_id.into(),
            user_id: user_id.to_string(),
            model_id: "model-a".into(),
            input_units: input,
            output_units: output,
        }
    }

    fn fund(store: &dyn LedgerStore, user_id: UserId, tokens: i64) {
        let key = IdempotencyKey::purchase(&format!("cs_fund_{user_id}")).unwrap();
        store
            .apply_grant(&key, &user_id, tokens, EntryMeta::purchase("cs_fund", 1000))
            .unwrap();
    }

    #[tokio::test]
    async fn debits_priced_tokens() {
        let h = harness(dec!(150)).await;
        let user_id = UserId::generate();
        fund(h.store.as_ref(), user_id, 10_000);
        let usage = UsageProcessor::new(h.store.clone(), h.engine.clone());

        // 1000 in + 1000 out of model-a: $0.00075 * 150 = 0.1125 JPY cost.
        // Blended token cost is 0.0000675 JPY, so 1666.67 tokens, rounded up.
        let receipt = usage
            .process(&event("req_1", user_id, 1000, 1000))
            .await
            .unwrap();
        assert!(receipt.applied);
        assert_eq!(receipt.tokens_debited, 1667);
        assert_eq!(receipt.balance, 10_000 - 1667);

        let entry = h.store.get_entry_by_id(&receipt.entry_id.unwrap()).unwrap().unwrap();
        assert_eq!(entry.direction, Direction::Debit);
        assert_eq!(entry.meta.model.as_deref(), Some("model-a"));
    }

    #[tokio::test]
    async fn replayed_request_is_a_no_op() {
        let h = harness(dec!(150)).await;
        let user_id = UserId::generate();
        fund(h.store.as_ref(), user_id, 10_000);
        let usage = UsageProcessor::new(h.store.clone(), h.engine.clone());
        let event = event("req_dup", user_id, 100, 100);

        let first = usage.process(&event).await.unwrap();
        let second = usage.process(&event).await.unwrap();
        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(second.tokens_debited, first.tokens_debited);
        assert_eq!(second.balance, first.balance);
        assert_eq!(h.store.list_entries_by_user(&user_id, 10, 0).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn zero_usage_writes_nothing() {
        let h = harness(dec!(150)).await;
        let user_id = UserId::generate();
        fund(h.store.as_ref(), user_id, 50);
        let usage = UsageProcessor::new(h.store.clone(), h.engine.clone());

        let receipt = usage.process(&event("req_zero", user_id, 0, 0)).await.unwrap();
        assert!(!receipt.applied);
        assert_eq!(receipt.tokens_debited, 0);
        assert_eq!(receipt.balance, 50);
        assert!(receipt.entry_id.is_none());
        assert!(h
            .store
            .get_entry(&IdempotencyKey::usage("req_zero").unwrap())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn insufficient_balance_is_surfaced_and_recorded() {
        let h = harness(dec!(150)).await;
        let user_id = UserId::generate();
        fund(h.store.as_ref(), user_id, 10);
        let usage = UsageProcessor::new(h.store.clone(), h.engine.clone());

        let err = usage
            .process(&event("req_big", user_id, 1000, 1000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::InsufficientBalance {
                balance: 10,
                required: 1667
            }
        ));
        assert_eq!(h.store.get_balance(&user_id).unwrap().unwrap().tokens, 10);

        let failed = h.store.list_failed_events(10).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].kind, EntryKind::Usage);
        assert_eq!(failed[0].user_id, Some(user_id));
    }

    #[tokio::test]
    async fn unknown_user_has_nothing_to_debit() {
        let h = harness(dec!(150)).await;
        let usage = UsageProcessor::new(h.store.clone(), h.engine.clone());

        let err = usage
            .process(&event("req_nobody", UserId::generate(), 1, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::InsufficientBalance { balance: 0, .. }
        ));
    }

    #[tokio::test]
    async fn malformed_user_id_is_rejected() {
        let h = harness(dec!(150)).await;
        let usage = UsageProcessor::new(h.store.clone(), h.engine.clone());
        let mut bad = event("req_bad", UserId::generate(), 1, 1);
        bad.user_id = "not-a-uuid".into();

        let err = usage.process(&bad).await.unwrap_err();
        assert!(matches!(err, ProcessError::InvalidEvent(_)));
        assert_eq!(h.store.list_failed_events(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_debits_never_overdraw() {
        let h = harness(dec!(150)).await;
        let user_id = UserId::generate();
        // Each 1-input-unit call costs the minimum single token.
        fund(h.store.as_ref(), user_id, 5);
        let usage = UsageProcessor::new(h.store.clone(), h.engine.clone());

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let usage = usage.clone();
                let event = event(&format!("req_c{i}"), user_id, 1, 0);
                tokio::spawn(async move { usage.process(&event).await })
            })
            .collect();

        let mut debited = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                debited += 1;
            }
        }
        assert_eq!(debited, 5);
        assert_eq!(h.store.get_balance(&user_id).unwrap().unwrap().tokens, 0);
        assert!(h.store.audit_balance(&user_id).unwrap().consistent);
    }

    #[tokio::test]
    async fn conflicts_exhaust_retries() {
        let h = harness(dec!(150)).await;
        let store = Arc::new(FlakyStore::always_conflicting());
        let usage = UsageProcessor::new(store.clone(), h.engine.clone()).with_retry(RetryPolicy {
            initial_backoff: std::time::Duration::from_millis(1),
            ..RetryPolicy::default()
        });

        let err = usage
            .process(&event("req_busy", UserId::generate(), 5, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::LedgerWriteConflict { .. }));
        assert_eq!(store.list_failed_events(10).unwrap()[0].attempts, 3);
    }
}
