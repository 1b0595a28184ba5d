use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::Customer;
use crate::error::{AppError, AppResult};

/// Customer lookups plus the push-credential registry.
pub struct CustomerRepository;

impl CustomerRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Customer>> {
        let row = sqlx::query_as::<_, Customer>(
            r#"
            SELECT id, full_name, push_token, created_at, updated_at
            FROM customers
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Remove a credential the transport reported as permanently invalid.
    /// No further send attempt may target this customer until a new token is
    /// registered by the app.
    pub async fn clear_push_token(pool: &SqlitePool, customer_id: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE customers
            SET push_token = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(customer_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        tracing::info!("Removed invalid push credential for customer {}", customer_id);
        Ok(())
    }
}
