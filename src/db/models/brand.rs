use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A tenant of the platform (an independent business account).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Brand {
    pub id: String,
    pub name: String,
    pub contact_email: Option<String>,
    /// Catalog language for customer-facing copy ('hr', 'en'); None uses the
    /// deployment default.
    pub locale: Option<String>,
    /// IANA time zone name; None uses the deployment time zone.
    pub timezone: Option<String>,

    // Payment-provider mirror, written only by the billing webhook.
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_status: Option<String>,
    pub subscription_end: Option<NaiveDateTime>,
    pub subscription_trial_end: Option<NaiveDateTime>,
    pub plan_id: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub brand_id: String,
    pub name: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Staff {
    pub id: String,
    pub brand_id: String,
    pub name: String,
    pub push_token: Option<String>,
}

/// Field set mirrored from a `customer.subscription.*` event.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub stripe_subscription_id: Option<String>,
    pub subscription_status: String,
    pub subscription_end: Option<NaiveDateTime>,
    pub subscription_trial_end: Option<NaiveDateTime>,
    pub plan_id: Option<String>,
}
