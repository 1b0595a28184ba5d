use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::db::{
    AppointmentRepository, BrandRepository, CompletionApply, CustomerMetricRepository,
    StatsRepository,
};
use crate::db::models::Appointment;
use crate::error::{AppError, AppResult};
use crate::services::localtime;
use crate::AppState;

/// Applies one appointment outcome to the revenue/retention bookkeeping,
/// exactly once per appointment.
pub struct StatAggregator {
    pool: SqlitePool,
    state: Arc<AppState>,
}

impl StatAggregator {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            state: state.clone(),
        }
    }

    /// Handle a transition to 'completed'.
    ///
    /// Everything runs in one transaction: the idempotency-token check, the
    /// metric upsert and both aggregate upserts commit together or not at
    /// all, so partial aggregation is never observable. A replay of an
    /// already-processed appointment reads its own token inside the
    /// transaction and ends with zero writes.
    pub async fn apply_completed(&self, apt: &Appointment) -> AppResult<()> {
        if apt.customer_id.is_empty() {
            tracing::warn!("apply_completed: appointment {} missing customer id", apt.id);
            return Ok(());
        }

        let brand = BrandRepository::find_by_id(&self.pool, &apt.brand_id).await?;
        let tz = localtime::brand_tz(brand.as_ref(), self.state.config.retention.timezone);
        let date_key = localtime::date_key(apt.start_time, tz);
        let month_key = localtime::month_key(apt.start_time, tz);

        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        let metric =
            CustomerMetricRepository::find(&mut *tx, &apt.brand_id, &apt.customer_id).await?;

        if let Some(ref metric) = metric {
            if metric.last_processed_appointment_id.as_deref() == Some(apt.id.as_str()) {
                tracing::info!(
                    "apply_completed: appointment {} already processed for customer {}",
                    apt.id,
                    apt.customer_id
                );
                return Ok(());
            }
        }

        let prev_lifetime = metric.as_ref().map(|m| m.lifetime_value).unwrap_or(0.0);
        let is_new_customer = prev_lifetime == 0.0;

        let interval_days = metric
            .as_ref()
            .and_then(|m| m.average_visit_interval)
            .unwrap_or(self.state.config.retention.default_visit_interval_days);
        let next_visit_due = Utc::now().naive_utc() + Duration::days(interval_days);

        CustomerMetricRepository::apply_completion(
            &mut *tx,
            &CompletionApply {
                brand_id: apt.brand_id.clone(),
                customer_id: apt.customer_id.clone(),
                appointment_id: apt.id.clone(),
                amount: apt.total_price,
                loyalty_points: apt.total_price.max(0.0).floor() as i64,
                next_visit_due,
                preferred_staff_id: apt.staff_id.clone(),
            },
        )
        .await?;

        if let Some(ref location_id) = apt.location_id {
            StatsRepository::increment_daily_completion(
                &mut *tx,
                location_id,
                &date_key,
                apt.total_price,
                is_new_customer,
            )
            .await?;
            StatsRepository::increment_daily_services(
                &mut *tx,
                location_id,
                &date_key,
                &apt.service_id_list(),
            )
            .await?;
            StatsRepository::increment_monthly(
                &mut *tx,
                location_id,
                &month_key,
                apt.total_price,
                apt.staff_id.as_deref(),
            )
            .await?;
        }

        tx.commit().await.map_err(AppError::Database)?;

        tracing::info!(
            "apply_completed: recorded appointment {} (customer {}, brand {}, total {}, new_customer {})",
            apt.id,
            apt.customer_id,
            apt.brand_id,
            apt.total_price,
            is_new_customer
        );
        Ok(())
    }

    /// Handle a transition to 'no_show': a flag-gated daily counter bump.
    /// The gate and the increment share one transaction; a replay fails the
    /// gate and writes nothing.
    pub async fn apply_no_show(&self, apt: &Appointment) -> AppResult<()> {
        let location_id = match apt.location_id {
            Some(ref id) => id.clone(),
            None => {
                tracing::warn!("apply_no_show: appointment {} missing location id", apt.id);
                return Ok(());
            }
        };

        let brand = BrandRepository::find_by_id(&self.pool, &apt.brand_id).await?;
        let tz = localtime::brand_tz(brand.as_ref(), self.state.config.retention.timezone);
        let date_key = localtime::date_key(apt.start_time, tz);

        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        if !AppointmentRepository::claim_no_show(&mut *tx, &apt.id).await? {
            tracing::info!("apply_no_show: appointment {} already counted", apt.id);
            return Ok(());
        }

        StatsRepository::increment_no_show(&mut *tx, &location_id, &date_key).await?;

        tx.commit().await.map_err(AppError::Database)?;

        tracing::info!(
            "apply_no_show: recorded no-show for appointment {} at {}",
            apt.id,
            location_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::AppointmentSnapshot;
    use crate::db::testing::*;
    use crate::db::test_pool;
    use crate::services::test_state;
    use chrono::{DateTime, NaiveDate};

    fn may_first_noon_utc() -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(
            NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            Utc,
        )
    }

    async fn seed_completed_appointment(pool: &SqlitePool, id: &str, status: &str) -> Appointment {
        AppointmentRepository::upsert_snapshot(
            pool,
            id,
            &AppointmentSnapshot {
                brand_id: Some("T1".into()),
                customer_id: Some("C1".into()),
                staff_id: Some("S1".into()),
                location_id: Some("L1".into()),
                start_time: Some(may_first_noon_utc()),
                total_price: Some(50.0),
                service_ids: Some(vec!["cut".into(), "beard".into()]),
                status: Some(status.into()),
            },
        )
        .await
        .unwrap();
        AppointmentRepository::find_by_id(pool, id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn first_completion_creates_metric_and_aggregates() {
        let pool = test_pool().await;
        seed_brand(&pool, "T1", "Brada Zagreb", None).await;
        let apt = seed_completed_appointment(&pool, "A1", "completed").await;

        let state = test_state(pool.clone());
        StatAggregator::new(&state).apply_completed(&apt).await.unwrap();

        let metric = CustomerMetricRepository::find_from_pool(&pool, "T1", "C1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metric.lifetime_value, 50.0);
        assert!(!metric.reminded_this_cycle);
        assert_eq!(metric.last_processed_appointment_id.as_deref(), Some("A1"));
        assert_eq!(metric.preferred_staff_id.as_deref(), Some("S1"));
        assert_eq!(metric.loyalty_points, 50);
        assert!(metric.next_visit_due.is_some());

        let daily = StatsRepository::get_daily(&pool, "L1", "2024-05-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(daily.total_revenue, 50.0);
        assert_eq!(daily.appointments_count, 1);
        assert_eq!(daily.new_customers, 1);
        assert_eq!(daily.no_shows, 0);

        let per_service = StatsRepository::get_daily_service(&pool, "L1", "2024-05-01", "cut")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(per_service.appointments_count, 1);

        let monthly = StatsRepository::get_monthly(&pool, "L1", "2024-05")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(monthly.total_revenue, 50.0);

        let per_staff = StatsRepository::get_monthly_staff(&pool, "L1", "2024-05", "S1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(per_staff.appointments_count, 1);
    }

    #[tokio::test]
    async fn replayed_completion_changes_nothing() {
        let pool = test_pool().await;
        seed_brand(&pool, "T1", "Brada Zagreb", None).await;
        let apt = seed_completed_appointment(&pool, "A1", "completed").await;

        let state = test_state(pool.clone());
        let aggregator = StatAggregator::new(&state);
        aggregator.apply_completed(&apt).await.unwrap();
        aggregator.apply_completed(&apt).await.unwrap();

        let metric = CustomerMetricRepository::find_from_pool(&pool, "T1", "C1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metric.lifetime_value, 50.0);
        assert_eq!(metric.loyalty_points, 50);

        let daily = StatsRepository::get_daily(&pool, "L1", "2024-05-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(daily.total_revenue, 50.0);
        assert_eq!(daily.appointments_count, 1);
        assert_eq!(daily.new_customers, 1);
    }

    #[tokio::test]
    async fn gate_aborts_before_any_aggregate_write() {
        let pool = test_pool().await;
        seed_brand(&pool, "T1", "Brada Zagreb", None).await;
        let apt = seed_completed_appointment(&pool, "A1", "completed").await;

        // Token already stamped with this appointment id, but zero value:
        // the gate must abort the whole unit, leaving every table untouched.
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO customer_metrics (
                brand_id, customer_id, lifetime_value,
                last_processed_appointment_id, joined_at, updated_at
            ) VALUES ('T1', 'C1', 0, 'A1', ?, ?)
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        let state = test_state(pool.clone());
        StatAggregator::new(&state).apply_completed(&apt).await.unwrap();

        let metric = CustomerMetricRepository::find_from_pool(&pool, "T1", "C1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metric.lifetime_value, 0.0);

        assert!(StatsRepository::get_daily(&pool, "L1", "2024-05-01")
            .await
            .unwrap()
            .is_none());
        assert!(StatsRepository::get_monthly(&pool, "L1", "2024-05")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn second_visit_is_not_a_new_customer() {
        let pool = test_pool().await;
        seed_brand(&pool, "T1", "Brada Zagreb", None).await;

        let state = test_state(pool.clone());
        let aggregator = StatAggregator::new(&state);

        let first = seed_completed_appointment(&pool, "A1", "completed").await;
        aggregator.apply_completed(&first).await.unwrap();
        let second = seed_completed_appointment(&pool, "A2", "completed").await;
        aggregator.apply_completed(&second).await.unwrap();

        let metric = CustomerMetricRepository::find_from_pool(&pool, "T1", "C1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metric.lifetime_value, 100.0);
        assert_eq!(metric.last_processed_appointment_id.as_deref(), Some("A2"));

        let daily = StatsRepository::get_daily(&pool, "L1", "2024-05-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(daily.appointments_count, 2);
        // Only the first visit counted as a new customer.
        assert_eq!(daily.new_customers, 1);
    }

    #[tokio::test]
    async fn no_show_counts_once() {
        let pool = test_pool().await;
        seed_brand(&pool, "T1", "Brada Zagreb", None).await;
        let apt = seed_completed_appointment(&pool, "A3", "no_show").await;

        let state = test_state(pool.clone());
        let aggregator = StatAggregator::new(&state);
        aggregator.apply_no_show(&apt).await.unwrap();

        // Replays see the flag and write nothing.
        let apt = AppointmentRepository::find_by_id(&pool, "A3").await.unwrap().unwrap();
        assert!(apt.no_show_counted);
        aggregator.apply_no_show(&apt).await.unwrap();

        let daily = StatsRepository::get_daily(&pool, "L1", "2024-05-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(daily.no_shows, 1);
        assert_eq!(daily.appointments_count, 0);
    }
}
