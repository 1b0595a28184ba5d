use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Platform-level customer account. Carries the push credential used by both
/// the reminder dispatcher and the retention fan-out.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub full_name: Option<String>,
    pub push_token: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Per-customer, per-brand retention state.
///
/// `last_processed_appointment_id` strictly gates re-application of a
/// completion event: once it equals an appointment id, that event is never
/// applied again. `reminded_this_cycle` is single-use per visit cycle; it is
/// set by the fan-out and reset to false by the next completed appointment.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CustomerMetric {
    pub brand_id: String,
    pub customer_id: String,

    pub lifetime_value: f64,
    /// Rolling average days between visits; None means "no history yet" and
    /// the configured deployment default applies.
    pub average_visit_interval: Option<i64>,
    pub next_visit_due: Option<NaiveDateTime>,
    pub reminded_this_cycle: bool,
    pub preferred_staff_id: Option<String>,
    pub last_processed_appointment_id: Option<String>,
    pub last_booking_date: Option<NaiveDateTime>,
    pub loyalty_points: i64,
    pub joined_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A fan-out page row: metric record joined with the customer's credential
/// and display name.
#[derive(Debug, Clone, FromRow)]
pub struct DueCustomer {
    pub brand_id: String,
    pub customer_id: String,
    pub next_visit_due: NaiveDateTime,
    pub preferred_staff_id: Option<String>,
    pub full_name: Option<String>,
    pub push_token: Option<String>,
}
