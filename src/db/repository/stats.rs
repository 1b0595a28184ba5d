use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{DailyServiceStat, DailyStats, MonthlyStaffStat, MonthlyStats};
use crate::error::{AppError, AppResult};

/// Append-only aggregate writes. Every mutation is an upsert whose UPDATE arm
/// increments the existing counters, so replays of an already-gated event can
/// never overwrite a total wholesale.
pub struct StatsRepository;

impl StatsRepository {
    pub async fn increment_daily_completion(
        conn: &mut SqliteConnection,
        location_id: &str,
        stat_date: &str,
        revenue: f64,
        is_new_customer: bool,
    ) -> AppResult<()> {
        let new_customers = if is_new_customer { 1i64 } else { 0i64 };
        sqlx::query(
            r#"
            INSERT INTO daily_stats (
                location_id, stat_date, total_revenue, appointments_count,
                new_customers, no_shows
            ) VALUES (?, ?, ?, 1, ?, 0)
            ON CONFLICT (location_id, stat_date) DO UPDATE SET
                total_revenue = daily_stats.total_revenue + excluded.total_revenue,
                appointments_count = daily_stats.appointments_count + 1,
                new_customers = daily_stats.new_customers + excluded.new_customers
            "#,
        )
        .bind(location_id)
        .bind(stat_date)
        .bind(revenue)
        .bind(new_customers)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn increment_daily_services(
        conn: &mut SqliteConnection,
        location_id: &str,
        stat_date: &str,
        service_ids: &[String],
    ) -> AppResult<()> {
        for service_id in service_ids {
            sqlx::query(
                r#"
                INSERT INTO daily_service_stats (
                    location_id, stat_date, service_id, appointments_count
                ) VALUES (?, ?, ?, 1)
                ON CONFLICT (location_id, stat_date, service_id) DO UPDATE SET
                    appointments_count = daily_service_stats.appointments_count + 1
                "#,
            )
            .bind(location_id)
            .bind(stat_date)
            .bind(service_id)
            .execute(&mut *conn)
            .await
            .map_err(AppError::Database)?;
        }

        Ok(())
    }

    pub async fn increment_monthly(
        conn: &mut SqliteConnection,
        location_id: &str,
        stat_month: &str,
        revenue: f64,
        staff_id: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO monthly_stats (location_id, stat_month, total_revenue)
            VALUES (?, ?, ?)
            ON CONFLICT (location_id, stat_month) DO UPDATE SET
                total_revenue = monthly_stats.total_revenue + excluded.total_revenue
            "#,
        )
        .bind(location_id)
        .bind(stat_month)
        .bind(revenue)
        .execute(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        if let Some(staff_id) = staff_id {
            sqlx::query(
                r#"
                INSERT INTO monthly_staff_stats (
                    location_id, stat_month, staff_id, appointments_count
                ) VALUES (?, ?, ?, 1)
                ON CONFLICT (location_id, stat_month, staff_id) DO UPDATE SET
                    appointments_count = monthly_staff_stats.appointments_count + 1
                "#,
            )
            .bind(location_id)
            .bind(stat_month)
            .bind(staff_id)
            .execute(conn)
            .await
            .map_err(AppError::Database)?;
        }

        Ok(())
    }

    pub async fn increment_no_show(
        conn: &mut SqliteConnection,
        location_id: &str,
        stat_date: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_stats (
                location_id, stat_date, total_revenue, appointments_count,
                new_customers, no_shows
            ) VALUES (?, ?, 0, 0, 0, 1)
            ON CONFLICT (location_id, stat_date) DO UPDATE SET
                no_shows = daily_stats.no_shows + 1
            "#,
        )
        .bind(location_id)
        .bind(stat_date)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    #[allow(dead_code)]
    pub async fn get_daily(
        pool: &SqlitePool,
        location_id: &str,
        stat_date: &str,
    ) -> AppResult<Option<DailyStats>> {
        let row = sqlx::query_as::<_, DailyStats>(
            r#"
            SELECT location_id, stat_date, total_revenue, appointments_count,
                   new_customers, no_shows
            FROM daily_stats
            WHERE location_id = ? AND stat_date = ?
            "#,
        )
        .bind(location_id)
        .bind(stat_date)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    #[allow(dead_code)]
    pub async fn get_daily_service(
        pool: &SqlitePool,
        location_id: &str,
        stat_date: &str,
        service_id: &str,
    ) -> AppResult<Option<DailyServiceStat>> {
        let row = sqlx::query_as::<_, DailyServiceStat>(
            r#"
            SELECT location_id, stat_date, service_id, appointments_count
            FROM daily_service_stats
            WHERE location_id = ? AND stat_date = ? AND service_id = ?
            "#,
        )
        .bind(location_id)
        .bind(stat_date)
        .bind(service_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    #[allow(dead_code)]
    pub async fn get_monthly(
        pool: &SqlitePool,
        location_id: &str,
        stat_month: &str,
    ) -> AppResult<Option<MonthlyStats>> {
        let row = sqlx::query_as::<_, MonthlyStats>(
            r#"
            SELECT location_id, stat_month, total_revenue
            FROM monthly_stats
            WHERE location_id = ? AND stat_month = ?
            "#,
        )
        .bind(location_id)
        .bind(stat_month)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    #[allow(dead_code)]
    pub async fn get_monthly_staff(
        pool: &SqlitePool,
        location_id: &str,
        stat_month: &str,
        staff_id: &str,
    ) -> AppResult<Option<MonthlyStaffStat>> {
        let row = sqlx::query_as::<_, MonthlyStaffStat>(
            r#"
            SELECT location_id, stat_month, staff_id, appointments_count
            FROM monthly_staff_stats
            WHERE location_id = ? AND stat_month = ? AND staff_id = ?
            "#,
        )
        .bind(location_id)
        .bind(stat_month)
        .bind(staff_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
