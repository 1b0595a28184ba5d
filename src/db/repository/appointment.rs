use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{Appointment, AppointmentSnapshot};
use crate::error::{AppError, AppResult};

pub struct AppointmentRepository;

impl AppointmentRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Appointment>> {
        let row = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT
                id, brand_id, customer_id, staff_id, location_id,
                start_time, total_price, service_ids, status,
                no_show_counted, reminder_sent,
                created_at, updated_at
            FROM appointments
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Mirror an incoming snapshot into the local appointments table.
    ///
    /// Only booking-owned fields are written; `no_show_counted` and
    /// `reminder_sent` belong to this service and survive every upsert.
    /// Snapshots missing their brand or customer reference are dropped with a
    /// warning (the booking system owns data quality for those).
    pub async fn upsert_snapshot(
        pool: &SqlitePool,
        appointment_id: &str,
        snapshot: &AppointmentSnapshot,
    ) -> AppResult<()> {
        let (brand_id, customer_id) = match (&snapshot.brand_id, &snapshot.customer_id) {
            (Some(b), Some(c)) => (b.clone(), c.clone()),
            _ => {
                tracing::warn!(
                    "Skipping appointment mirror for {}: missing brand or customer reference",
                    appointment_id
                );
                return Ok(());
            }
        };

        let now = Utc::now().naive_utc();
        let start_time = snapshot
            .start_time
            .map(|t| t.naive_utc())
            .unwrap_or(now);
        let service_ids = serde_json::to_string(
            &snapshot.service_ids.clone().unwrap_or_default(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO appointments (
                id, brand_id, customer_id, staff_id, location_id,
                start_time, total_price, service_ids, status,
                no_show_counted, reminder_sent,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                brand_id = excluded.brand_id,
                customer_id = excluded.customer_id,
                staff_id = excluded.staff_id,
                location_id = excluded.location_id,
                start_time = excluded.start_time,
                total_price = excluded.total_price,
                service_ids = excluded.service_ids,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(appointment_id)
        .bind(brand_id)
        .bind(customer_id)
        .bind(&snapshot.staff_id)
        .bind(&snapshot.location_id)
        .bind(start_time)
        .bind(snapshot.total_price.unwrap_or(0.0))
        .bind(service_ids)
        .bind(snapshot.status_str())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Set the sent flag once. Returns false when it was already set, which
    /// callers treat as an idempotency short-circuit.
    pub async fn mark_reminder_sent(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE appointments
            SET reminder_sent = 1, updated_at = ?
            WHERE id = ? AND reminder_sent = 0
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim the no-show flag inside a transaction. Returns false when the
    /// no-show was already counted (the gating WHERE clause did not match).
    pub async fn claim_no_show(conn: &mut SqliteConnection, id: &str) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE appointments
            SET no_show_counted = 1, updated_at = ?
            WHERE id = ? AND no_show_counted = 0
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
