//! Payment processor webhook.
//!
//! Signature verification happens upstream of this service; the handler only
//! interprets the event body. Events that can never be granted are recorded
//! as failed events and acknowledged, so the sender does not redeliver them.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::processors::{GrantOutcome, ProcessError, PurchaseConfirmation};
use crate::state::AppState;

/// Payment processor event envelope.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event ID.
    pub id: String,
    /// Event data.
    pub data: PaymentEventData,
}

/// Event data container.
#[derive(Debug, Deserialize)]
pub struct PaymentEventData {
    /// Event object.
    pub object: serde_json::Value,
}

/// Webhook response.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Whether the webhook was received.
    pub received: bool,
    /// Whether this delivery changed the ledger.
    pub applied: bool,
    /// Tokens granted for the session (new or earlier delivery).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<i64>,
    /// The user's balance after the grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    /// Why the event was acknowledged without a grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookResponse {
    fn acknowledged(reason: impl Into<String>) -> Self {
        Self {
            received: true,
            applied: false,
            tokens: None,
            balance: None,
            reason: Some(reason.into()),
        }
    }
}

/// Handle payment processor webhooks.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let webhook: PaymentWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %webhook.event_type,
        event_id = %webhook.id,
        "Received payment webhook"
    );

    match webhook.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let confirmation = confirmation_from(&webhook.id, &webhook.data.object)?;
            let response = match state.grants.process(&confirmation).await {
                Ok(GrantOutcome::Granted(receipt)) => WebhookResponse {
                    received: true,
                    applied: receipt.applied,
                    tokens: Some(receipt.tokens),
                    balance: Some(receipt.balance),
                    reason: None,
                },
                Ok(GrantOutcome::Skipped { reason }) => WebhookResponse::acknowledged(reason),
                // Already dead-lettered; a redelivery cannot succeed.
                Err(e @ (ProcessError::InvalidEvent(_) | ProcessError::Pricing(_))) => {
                    WebhookResponse::acknowledged(e.to_string())
                }
                Err(e) => return Err(e.into()),
            };
            Ok(Json(response))
        }
        _ => {
            tracing::debug!(event_type = %webhook.event_type, "Unhandled payment event");
            Ok(Json(WebhookResponse::acknowledged("event type not handled")))
        }
    }
}

/// Read a checkout session object.
fn confirmation_from(
    event_id: &str,
    object: &serde_json::Value,
) -> Result<PurchaseConfirmation, ApiError> {
    let text = |field: &str| object.get(field).and_then(|v| v.as_str()).map(String::from);

    let session_id =
        text("id").ok_or_else(|| ApiError::BadRequest("Missing checkout session id".into()))?;

    Ok(PurchaseConfirmation {
        event_id: event_id.to_string(),
        session_id,
        user_ref: text("client_reference_id"),
        amount_total: object.get("amount_total").and_then(serde_json::Value::as_i64),
        currency: text("currency"),
        payment_status: text("payment_status"),
        model_id: object
            .get("metadata")
            .and_then(|m| m.get("model_id"))
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}
