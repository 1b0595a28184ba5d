use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-location daily aggregate, keyed by the brand-local calendar date
/// (`yyyy-MM-dd`). All columns grow through atomic increments only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DailyStats {
    pub location_id: String,
    pub stat_date: String,
    pub total_revenue: f64,
    pub appointments_count: i64,
    pub new_customers: i64,
    pub no_shows: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DailyServiceStat {
    pub location_id: String,
    pub stat_date: String,
    pub service_id: String,
    pub appointments_count: i64,
}

/// Per-location monthly aggregate, keyed `yyyy-MM`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MonthlyStats {
    pub location_id: String,
    pub stat_month: String,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MonthlyStaffStat {
    pub location_id: String,
    pub stat_month: String,
    pub staff_id: String,
    pub appointments_count: i64,
}
