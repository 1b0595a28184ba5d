use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::SqlitePool;

use crate::db::models::SubscriptionUpdate;
use crate::db::BrandRepository;
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

const EVENT_SUBSCRIPTION_CREATED: &str = "customer.subscription.created";
const EVENT_SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
const EVENT_SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
const EVENT_CHECKOUT_COMPLETED: &str = "checkout.session.completed";
const EVENT_INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";

/// Mirrors payment-provider subscription state onto brand records. Pure 1:1
/// field mapping; the provider's subscription lifecycle drives ours.
pub struct BillingService;

impl BillingService {
    /// Verify the provider's `t=<unix>,v1=<hex>` signature header over
    /// `"{t}.{body}"` and reject messages older than 10 minutes.
    pub fn verify_signature(secret: &str, signature_header: &str, body: &[u8]) -> AppResult<()> {
        let mut timestamp: Option<&str> = None;
        let mut signature: Option<&str> = None;
        for part in signature_header.split(',') {
            if let Some(v) = part.trim().strip_prefix("t=") {
                timestamp = Some(v);
            } else if let Some(v) = part.trim().strip_prefix("v1=") {
                signature = Some(v);
            }
        }

        let (timestamp, signature) = match (timestamp, signature) {
            (Some(t), Some(s)) => (t, s),
            _ => return Err(AppError::BadRequest("Invalid signature format".to_string())),
        };

        let mut message = Vec::new();
        message.extend_from_slice(timestamp.as_bytes());
        message.push(b'.');
        message.extend_from_slice(body);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
        mac.update(&message);

        let expected_sig = hex::decode(signature)
            .map_err(|_| AppError::BadRequest("Invalid signature format".to_string()))?;
        mac.verify_slice(&expected_sig)
            .map_err(|_| AppError::Unauthorized)?;

        // Check timestamp is not too old (within 10 minutes)
        if let Ok(ts) = timestamp.parse::<i64>() {
            if let Some(msg_time) = DateTime::<Utc>::from_timestamp(ts, 0) {
                let diff = Utc::now().signed_duration_since(msg_time);
                if diff.num_minutes().abs() > 10 {
                    return Err(AppError::BadRequest("Message too old".to_string()));
                }
            }
        }

        Ok(())
    }

    pub async fn handle_event(pool: &SqlitePool, event: &serde_json::Value) -> AppResult<()> {
        let event_type = event
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default();
        let object = event
            .pointer("/data/object")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        match event_type {
            EVENT_SUBSCRIPTION_CREATED | EVENT_SUBSCRIPTION_UPDATED => {
                let brand_id = match object.pointer("/metadata/brand_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => {
                        tracing::warn!(
                            "Subscription event missing brand_id metadata: {}",
                            object.get("id").and_then(|v| v.as_str()).unwrap_or("?")
                        );
                        return Ok(());
                    }
                };

                let status = object
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let update = SubscriptionUpdate {
                    stripe_subscription_id: object
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    subscription_status: status.clone(),
                    subscription_end: object
                        .get("current_period_end")
                        .and_then(|v| v.as_i64())
                        .and_then(unix_to_naive),
                    subscription_trial_end: object
                        .get("trial_end")
                        .and_then(|v| v.as_i64())
                        .and_then(unix_to_naive),
                    plan_id: object
                        .pointer("/items/data/0/price/id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                };

                BrandRepository::update_subscription(pool, &brand_id, &update).await?;
                tracing::info!("Updated subscription status for brand {}: {}", brand_id, status);
            }
            EVENT_SUBSCRIPTION_DELETED => {
                let brand_id = match object.pointer("/metadata/brand_id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => return Ok(()),
                };
                BrandRepository::update_subscription(
                    pool,
                    &brand_id,
                    &SubscriptionUpdate {
                        stripe_subscription_id: None,
                        subscription_status: "canceled".to_string(),
                        subscription_end: None,
                        subscription_trial_end: None,
                        plan_id: None,
                    },
                )
                .await?;
                tracing::info!("Subscription canceled for brand {}", brand_id);
            }
            EVENT_CHECKOUT_COMPLETED => {
                tracing::info!(
                    "Checkout session completed for brand {}",
                    object
                        .pointer("/metadata/brand_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?")
                );
            }
            EVENT_INVOICE_PAYMENT_FAILED => {
                // subscription.updated (status 'past_due') drives the state;
                // this is operator signal only.
                tracing::warn!(
                    "Invoice payment failed for subscription {}",
                    object
                        .get("subscription")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?")
                );
            }
            other => {
                tracing::debug!("Ignoring billing event type '{}'", other);
            }
        }

        Ok(())
    }
}

fn unix_to_naive(secs: i64) -> Option<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|t| t.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;
    use crate::db::test_pool;
    use serde_json::json;

    fn sign(secret: &str, body: &[u8]) -> String {
        let timestamp = Utc::now().timestamp().to_string();
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signature_roundtrip() {
        let body = br#"{"type":"customer.subscription.updated"}"#;
        let header = sign("whsec_test", body);
        BillingService::verify_signature("whsec_test", &header, body).unwrap();

        assert!(matches!(
            BillingService::verify_signature("other_secret", &header, body),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            BillingService::verify_signature("whsec_test", "garbage", body),
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn subscription_updated_mirrors_fields() {
        let pool = test_pool().await;
        seed_brand(&pool, "T1", "Brada Zagreb", None).await;

        let event = json!({
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_123",
                "status": "trialing",
                "current_period_end": 1_750_000_000i64,
                "trial_end": 1_749_000_000i64,
                "metadata": { "brand_id": "T1" },
                "items": { "data": [ { "price": { "id": "price_basic" } } ] }
            }}
        });
        BillingService::handle_event(&pool, &event).await.unwrap();

        let brand = BrandRepository::find_by_id(&pool, "T1").await.unwrap().unwrap();
        assert_eq!(brand.stripe_subscription_id.as_deref(), Some("sub_123"));
        assert_eq!(brand.subscription_status.as_deref(), Some("trialing"));
        assert_eq!(brand.plan_id.as_deref(), Some("price_basic"));
        assert!(brand.subscription_end.is_some());
        assert!(brand.subscription_trial_end.is_some());
    }

    #[tokio::test]
    async fn subscription_deleted_marks_canceled() {
        let pool = test_pool().await;
        seed_brand(&pool, "T1", "Brada Zagreb", None).await;

        let event = json!({
            "type": "customer.subscription.deleted",
            "data": { "object": {
                "id": "sub_123",
                "metadata": { "brand_id": "T1" }
            }}
        });
        BillingService::handle_event(&pool, &event).await.unwrap();

        let brand = BrandRepository::find_by_id(&pool, "T1").await.unwrap().unwrap();
        assert_eq!(brand.subscription_status.as_deref(), Some("canceled"));
    }

    #[tokio::test]
    async fn event_without_brand_metadata_is_tolerated() {
        let pool = test_pool().await;
        let event = json!({
            "type": "customer.subscription.updated",
            "data": { "object": { "id": "sub_999", "status": "active", "metadata": {} } }
        });
        BillingService::handle_event(&pool, &event).await.unwrap();
    }
}
