use chrono::{NaiveDateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{CustomerMetric, DueCustomer};
use crate::error::{AppError, AppResult};

/// How many flag updates are grouped into one transaction. Mirrors the bulk
/// write limit of the original document store.
const FLAG_WRITE_CHUNK: usize = 500;

/// One completion event's worth of metric changes, applied atomically.
#[derive(Debug, Clone)]
pub struct CompletionApply {
    pub brand_id: String,
    pub customer_id: String,
    pub appointment_id: String,
    pub amount: f64,
    pub loyalty_points: i64,
    pub next_visit_due: NaiveDateTime,
    pub preferred_staff_id: Option<String>,
}

pub struct CustomerMetricRepository;

impl CustomerMetricRepository {
    pub async fn find(
        conn: &mut SqliteConnection,
        brand_id: &str,
        customer_id: &str,
    ) -> AppResult<Option<CustomerMetric>> {
        let row = sqlx::query_as::<_, CustomerMetric>(
            r#"
            SELECT
                brand_id, customer_id, lifetime_value, average_visit_interval,
                next_visit_due, reminded_this_cycle, preferred_staff_id,
                last_processed_appointment_id, last_booking_date,
                loyalty_points, joined_at, updated_at
            FROM customer_metrics
            WHERE brand_id = ? AND customer_id = ?
            "#,
        )
        .bind(brand_id)
        .bind(customer_id)
        .fetch_optional(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    #[allow(dead_code)]
    pub async fn find_from_pool(
        pool: &SqlitePool,
        brand_id: &str,
        customer_id: &str,
    ) -> AppResult<Option<CustomerMetric>> {
        let mut conn = pool.acquire().await.map_err(AppError::Database)?;
        Self::find(&mut conn, brand_id, customer_id).await
    }

    /// Apply one completion to the metric record: increment lifetime value
    /// and loyalty points, refresh the due date, reset the reminder cycle and
    /// stamp the idempotency token. Creates the record on the customer's
    /// first completed appointment for this brand.
    ///
    /// Runs on the caller's transaction; the idempotency-token check happens
    /// before this is called, inside the same transaction.
    pub async fn apply_completion(
        conn: &mut SqliteConnection,
        apply: &CompletionApply,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO customer_metrics (
                brand_id, customer_id, lifetime_value, average_visit_interval,
                next_visit_due, reminded_this_cycle, preferred_staff_id,
                last_processed_appointment_id, last_booking_date,
                loyalty_points, joined_at, updated_at
            ) VALUES (?, ?, ?, NULL, ?, 0, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (brand_id, customer_id) DO UPDATE SET
                lifetime_value = customer_metrics.lifetime_value + excluded.lifetime_value,
                next_visit_due = excluded.next_visit_due,
                reminded_this_cycle = 0,
                preferred_staff_id = excluded.preferred_staff_id,
                last_processed_appointment_id = excluded.last_processed_appointment_id,
                last_booking_date = excluded.last_booking_date,
                loyalty_points = customer_metrics.loyalty_points + excluded.loyalty_points,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&apply.brand_id)
        .bind(&apply.customer_id)
        .bind(apply.amount)
        .bind(apply.next_visit_due)
        .bind(&apply.preferred_staff_id)
        .bind(&apply.appointment_id)
        .bind(now)
        .bind(apply.loyalty_points)
        .bind(now)
        .bind(now)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// One page of due retention candidates across all brands, joined with
    /// the customer's credential and display name.
    ///
    /// Keyset pagination: ordered by (next_visit_due, customer_id, brand_id)
    /// and resumed strictly after the cursor triple, so replays of a page job
    /// never re-read earlier pages.
    pub async fn fetch_due_page(
        pool: &SqlitePool,
        cutoff: NaiveDateTime,
        cursor: Option<(NaiveDateTime, String, String)>,
        limit: i64,
    ) -> AppResult<Vec<DueCustomer>> {
        let rows = match cursor {
            Some((due, customer_id, brand_id)) => {
                sqlx::query_as::<_, DueCustomer>(
                    r#"
                    SELECT
                        m.brand_id, m.customer_id, m.next_visit_due,
                        m.preferred_staff_id, c.full_name, c.push_token
                    FROM customer_metrics m
                    JOIN customers c ON c.id = m.customer_id
                    WHERE m.reminded_this_cycle = 0
                      AND m.next_visit_due IS NOT NULL
                      AND m.next_visit_due <= ?
                      AND (m.next_visit_due, m.customer_id, m.brand_id) > (?, ?, ?)
                    ORDER BY m.next_visit_due ASC, m.customer_id ASC, m.brand_id ASC
                    LIMIT ?
                    "#,
                )
                .bind(cutoff)
                .bind(due)
                .bind(customer_id)
                .bind(brand_id)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, DueCustomer>(
                    r#"
                    SELECT
                        m.brand_id, m.customer_id, m.next_visit_due,
                        m.preferred_staff_id, c.full_name, c.push_token
                    FROM customer_metrics m
                    JOIN customers c ON c.id = m.customer_id
                    WHERE m.reminded_this_cycle = 0
                      AND m.next_visit_due IS NOT NULL
                      AND m.next_visit_due <= ?
                    ORDER BY m.next_visit_due ASC, m.customer_id ASC, m.brand_id ASC
                    LIMIT ?
                    "#,
                )
                .bind(cutoff)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
        }
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Set `reminded_this_cycle` for every attempted record of a page, in
    /// grouped transactions of up to 500 rows.
    pub async fn mark_reminded(
        pool: &SqlitePool,
        keys: &[(String, String)],
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        for chunk in keys.chunks(FLAG_WRITE_CHUNK) {
            let mut tx = pool.begin().await.map_err(AppError::Database)?;
            for (brand_id, customer_id) in chunk {
                sqlx::query(
                    r#"
                    UPDATE customer_metrics
                    SET reminded_this_cycle = 1, updated_at = ?
                    WHERE brand_id = ? AND customer_id = ?
                    "#,
                )
                .bind(now)
                .bind(brand_id)
                .bind(customer_id)
                .execute(&mut *tx)
                .await
                .map_err(AppError::Database)?;
            }
            tx.commit().await.map_err(AppError::Database)?;
        }

        Ok(())
    }
}
