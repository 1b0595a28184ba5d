pub mod models;
pub mod repository;

pub use models::*;
pub use repository::*;

#[cfg(test)]
pub(crate) use testing::test_pool;

/// Shared fixtures for repository and service tests: an in-memory database
/// with the real migrations applied, plus seed helpers for reference rows
/// that are normally written by the platform, not by this service.
#[cfg(test)]
pub(crate) mod testing {
    use chrono::{NaiveDateTime, Utc};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    pub async fn test_pool() -> SqlitePool {
        // A single connection keeps every handle on the same in-memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        pool
    }

    pub async fn seed_brand(pool: &SqlitePool, id: &str, name: &str, locale: Option<&str>) {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO brands (id, name, locale, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(locale)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    pub async fn seed_location(pool: &SqlitePool, id: &str, brand_id: &str, name: &str) {
        sqlx::query("INSERT INTO locations (id, brand_id, name) VALUES (?, ?, ?)")
            .bind(id)
            .bind(brand_id)
            .bind(name)
            .execute(pool)
            .await
            .unwrap();
    }

    pub async fn seed_staff(
        pool: &SqlitePool,
        id: &str,
        brand_id: &str,
        name: &str,
        push_token: Option<&str>,
    ) {
        sqlx::query("INSERT INTO staff (id, brand_id, name, push_token) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(brand_id)
            .bind(name)
            .bind(push_token)
            .execute(pool)
            .await
            .unwrap();
    }

    pub async fn seed_customer(
        pool: &SqlitePool,
        id: &str,
        full_name: Option<&str>,
        push_token: Option<&str>,
    ) {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO customers (id, full_name, push_token, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(full_name)
        .bind(push_token)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    pub async fn seed_metric(
        pool: &SqlitePool,
        brand_id: &str,
        customer_id: &str,
        next_visit_due: Option<NaiveDateTime>,
        reminded_this_cycle: bool,
        preferred_staff_id: Option<&str>,
    ) {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO customer_metrics (
                brand_id, customer_id, lifetime_value, next_visit_due,
                reminded_this_cycle, preferred_staff_id, joined_at, updated_at
            ) VALUES (?, ?, 100.0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(brand_id)
        .bind(customer_id)
        .bind(next_visit_due)
        .bind(reminded_this_cycle)
        .bind(preferred_staff_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }
}
