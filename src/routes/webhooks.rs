use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::db::models::AppointmentSnapshot;
use crate::db::AppointmentRepository;
use crate::error::{AppError, AppResult};
use crate::services::billing::BillingService;
use crate::services::lifecycle::LifecycleRouter;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const BOOKING_EVENT_ID_HEADER: &str = "x-booking-event-id";
const BOOKING_TIMESTAMP_HEADER: &str = "x-booking-timestamp";
const BOOKING_SIGNATURE_HEADER: &str = "x-booking-signature";
const BILLING_SIGNATURE_HEADER: &str = "stripe-signature";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/booking", post(handle_booking_webhook))
        .route("/billing", post(handle_billing_webhook))
}

/// One appointment lifecycle event from the booking system: a creation
/// snapshot, or a before/after pair on update. Delivered at-least-once,
/// possibly out of order.
#[derive(Debug, Deserialize)]
pub struct BookingEventPayload {
    pub appointment_id: String,
    #[serde(default)]
    pub before: Option<AppointmentSnapshot>,
    pub after: AppointmentSnapshot,
}

fn get_header(headers: &HeaderMap, name: &str) -> AppResult<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .ok_or_else(|| AppError::BadRequest(format!("Missing header: {}", name)))
}

/// Verify the booking system's `sha256=<hex>` signature over
/// event id + timestamp + raw body, and reject stale messages.
fn verify_booking_signature(
    secret: &str,
    event_id: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
) -> AppResult<()> {
    let mut message = Vec::new();
    message.extend_from_slice(event_id.as_bytes());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
    mac.update(&message);

    let expected_sig = if let Some(hex_sig) = signature.strip_prefix("sha256=") {
        hex::decode(hex_sig)
            .map_err(|_| AppError::BadRequest("Invalid signature format".to_string()))?
    } else {
        return Err(AppError::BadRequest("Invalid signature format".to_string()));
    };

    mac.verify_slice(&expected_sig)
        .map_err(|_| AppError::Unauthorized)?;

    // Check timestamp is not too old (within 10 minutes)
    if let Ok(msg_time) = chrono::DateTime::parse_from_rfc3339(timestamp) {
        let now = chrono::Utc::now();
        let diff = now.signed_duration_since(msg_time);
        if diff.num_minutes().abs() > 10 {
            return Err(AppError::BadRequest("Message too old".to_string()));
        }
    }

    Ok(())
}

async fn handle_booking_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, String), AppError> {
    let event_id = get_header(&headers, BOOKING_EVENT_ID_HEADER)?;
    let timestamp = get_header(&headers, BOOKING_TIMESTAMP_HEADER)?;
    let signature = get_header(&headers, BOOKING_SIGNATURE_HEADER)?;

    verify_booking_signature(
        &state.config.webhooks.booking_secret,
        &event_id,
        &timestamp,
        &body,
        &signature,
    )?;

    let payload: BookingEventPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))?;

    tracing::info!(
        "Received booking event {} for appointment {}",
        event_id,
        payload.appointment_id
    );

    // Keep the local mirror current before routing, so freshness re-reads in
    // the handlers observe this event's state.
    AppointmentRepository::upsert_snapshot(&state.db, &payload.appointment_id, &payload.after)
        .await?;

    LifecycleRouter::new(&state)
        .route(&payload.appointment_id, payload.before.as_ref(), &payload.after)
        .await?;

    Ok((StatusCode::OK, "OK".to_string()))
}

async fn handle_billing_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = get_header(&headers, BILLING_SIGNATURE_HEADER)?;

    BillingService::verify_signature(&state.config.webhooks.billing_secret, &signature, &body)?;

    let event: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))?;

    BillingService::handle_event(&state.db, &event).await?;

    Ok(Json(serde_json::json!({ "received": true })))
}
