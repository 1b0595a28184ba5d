use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const STATUS_SCHEDULED: &str = "scheduled";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_NO_SHOW: &str = "no_show";

/// Locally mirrored appointment record.
///
/// All booking fields are owned by the booking system and arrive via webhook
/// snapshots. `no_show_counted` and `reminder_sent` are owned by this service:
/// each is set exactly once and never reset, which makes replayed events and
/// duplicate job deliveries safe.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub brand_id: String,
    pub customer_id: String,
    pub staff_id: Option<String>,
    pub location_id: Option<String>,

    /// Start of the appointment, stored as naive UTC.
    pub start_time: NaiveDateTime,
    pub total_price: f64,

    /// JSON array of service ids booked in this appointment.
    pub service_ids: String,

    /// Booking status string. Cancellations carry sub-states
    /// (e.g. 'cancelled_by_customer'), so classification is substring-based.
    pub status: String,

    pub no_show_counted: bool,
    pub reminder_sent: bool,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    /// Parsed `service_ids`, dropping anything that is not a non-empty string.
    pub fn service_id_list(&self) -> Vec<String> {
        serde_json::from_str::<Vec<serde_json::Value>>(&self.service_ids)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .filter(|s| !s.is_empty())
            .collect()
    }
}

pub fn status_is_cancelled(status: &str) -> bool {
    status.contains("cancelled")
}

/// Appointment state as delivered by the booking system's webhook.
///
/// Every field except the status is optional: upstream snapshots are not
/// guaranteed complete and missing references are handled downstream as
/// validation gaps, not deserialization failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSnapshot {
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub staff_id: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_price: Option<f64>,
    #[serde(default)]
    pub service_ids: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
}

impl AppointmentSnapshot {
    pub fn status_str(&self) -> &str {
        self.status.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_list_filters_junk() {
        let apt = Appointment {
            id: "a1".into(),
            brand_id: "b1".into(),
            customer_id: "c1".into(),
            staff_id: None,
            location_id: None,
            start_time: chrono::Utc::now().naive_utc(),
            total_price: 0.0,
            service_ids: r#"["cut", "", 42, "beard"]"#.into(),
            status: STATUS_SCHEDULED.into(),
            no_show_counted: false,
            reminder_sent: false,
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        };
        assert_eq!(apt.service_id_list(), vec!["cut".to_string(), "beard".to_string()]);
    }

    #[test]
    fn cancelled_classification_matches_substates() {
        assert!(status_is_cancelled("cancelled"));
        assert!(status_is_cancelled("cancelled_by_customer"));
        assert!(!status_is_cancelled(STATUS_SCHEDULED));
        assert!(!status_is_cancelled(STATUS_NO_SHOW));
    }
}
