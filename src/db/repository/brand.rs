use std::collections::HashMap;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{Brand, Location, Staff, SubscriptionUpdate};
use crate::error::{AppError, AppResult};

pub struct BrandRepository;

impl BrandRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Brand>> {
        let row = sqlx::query_as::<_, Brand>(
            r#"
            SELECT
                id, name, contact_email, locale, timezone,
                stripe_customer_id, stripe_subscription_id, subscription_status,
                subscription_end, subscription_trial_end, plan_id,
                created_at, updated_at
            FROM brands
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Bulk lookup keyed by id, used by the fan-out to resolve brand locale
    /// and terminology once per page instead of once per record.
    pub async fn find_many(pool: &SqlitePool, ids: &[String]) -> AppResult<HashMap<String, Brand>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            r#"
            SELECT
                id, name, contact_email, locale, timezone,
                stripe_customer_id, stripe_subscription_id, subscription_status,
                subscription_end, subscription_trial_end, plan_id,
                created_at, updated_at
            FROM brands
            WHERE id IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query_as::<_, Brand>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(pool).await.map_err(AppError::Database)?;
        Ok(rows.into_iter().map(|b| (b.id.clone(), b)).collect())
    }

    /// Mirror a payment-provider subscription event onto the brand record.
    pub async fn update_subscription(
        pool: &SqlitePool,
        brand_id: &str,
        update: &SubscriptionUpdate,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE brands
            SET
                stripe_subscription_id = COALESCE(?, stripe_subscription_id),
                subscription_status = ?,
                subscription_end = COALESCE(?, subscription_end),
                subscription_trial_end = COALESCE(?, subscription_trial_end),
                plan_id = COALESCE(?, plan_id),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.stripe_subscription_id)
        .bind(&update.subscription_status)
        .bind(update.subscription_end)
        .bind(update.subscription_trial_end)
        .bind(&update.plan_id)
        .bind(now)
        .bind(brand_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}

pub struct LocationRepository;

impl LocationRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Location>> {
        let row = sqlx::query_as::<_, Location>(
            r#"
            SELECT id, brand_id, name
            FROM locations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}

pub struct StaffRepository;

impl StaffRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Staff>> {
        let row = sqlx::query_as::<_, Staff>(
            r#"
            SELECT id, brand_id, name, push_token
            FROM staff
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Bulk display-name resolution for a page of reminders.
    pub async fn names_by_ids(
        pool: &SqlitePool,
        ids: &[String],
    ) -> AppResult<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT id, brand_id, name, push_token FROM staff WHERE id IN ({})",
            placeholders
        );

        let mut query = sqlx::query_as::<_, Staff>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(pool).await.map_err(AppError::Database)?;
        Ok(rows.into_iter().map(|s| (s.id, s.name)).collect())
    }
}
