use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateDeferredJob, DeferredJob};
use crate::error::{AppError, AppResult};

/// Repository for the persistent deferred-job queue.
///
/// Implementation notes:
/// - Claiming uses an atomic single-statement UPDATE with a subselect:
///   `UPDATE ... WHERE id = (SELECT id FROM ... LIMIT 1) RETURNING ...`
///   This avoids a long-lived transaction and reduces contention on SQLite.
/// - Completion/retry updates are guarded with `status = 'processing'` so a
///   job that was cancel-and-replaced while an old run was still in flight is
///   not clobbered when that run finishes.
pub struct JobQueueRepository;

impl JobQueueRepository {
    /// Enqueue a deferred job.
    ///
    /// When `job.id` is provided it is the job's stable identity: an existing
    /// row under that id is replaced in place (attempts reset, status back to
    /// 'pending'), which is what makes reschedule-by-cancel-and-replace hold
    /// even if the old job is mid-flight.
    pub async fn create(pool: &SqlitePool, job: CreateDeferredJob) -> AppResult<DeferredJob> {
        let id = job.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().naive_utc();
        let max_attempts = job.max_attempts.unwrap_or(5);

        let row = sqlx::query_as::<_, DeferredJob>(
            r#"
            INSERT INTO deferred_jobs (
                id, kind, payload_json, fire_at,
                attempts, max_attempts, last_error, status,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, 0, ?, NULL, 'pending', ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                kind = excluded.kind,
                payload_json = excluded.payload_json,
                fire_at = excluded.fire_at,
                attempts = 0,
                max_attempts = excluded.max_attempts,
                last_error = NULL,
                status = 'pending',
                updated_at = excluded.updated_at
            RETURNING
                id, kind, payload_json, fire_at,
                attempts, max_attempts, last_error, status,
                created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(job.kind.as_str())
        .bind(job.payload_json)
        .bind(job.fire_at)
        .bind(max_attempts)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Delete a pending job by identity. Returns false when no such job
    /// existed (callers treat absence as success).
    pub async fn cancel(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM deferred_jobs
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim up to `limit` due jobs and return them.
    ///
    /// Atomically claims one job per statement in a loop so other writers are
    /// never blocked behind a long transaction.
    pub async fn fetch_and_claim_due(pool: &SqlitePool, limit: i64) -> AppResult<Vec<DeferredJob>> {
        let mut jobs: Vec<DeferredJob> = Vec::new();
        if limit <= 0 {
            return Ok(jobs);
        }

        for _ in 0..(limit as usize) {
            let now = Utc::now().naive_utc();

            let opt = sqlx::query_as::<_, DeferredJob>(
                r#"
                UPDATE deferred_jobs
                SET status = 'processing', updated_at = ?
                WHERE id = (
                    SELECT id FROM deferred_jobs
                    WHERE status = 'pending'
                      AND fire_at <= ?
                    ORDER BY fire_at ASC
                    LIMIT 1
                )
                RETURNING
                    id, kind, payload_json, fire_at,
                    attempts, max_attempts, last_error, status,
                    created_at, updated_at
                "#,
            )
            .bind(now)
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

            if let Some(job) = opt {
                jobs.push(job);
            } else {
                break;
            }
        }

        Ok(jobs)
    }

    /// Mark a claimed job as succeeded.
    pub async fn mark_succeeded(pool: &SqlitePool, id: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE deferred_jobs
            SET status = 'succeeded', updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Increment attempts, set `fire_at` for the next try and record the
    /// error. When the new attempt count reaches `max_attempts` the job is
    /// moved to 'dead' instead.
    ///
    /// Returns the updated job row, or None when the claimed row no longer
    /// exists in 'processing' (it was replaced mid-flight).
    pub async fn register_attempt_and_schedule(
        pool: &SqlitePool,
        id: &str,
        next_fire_at: chrono::NaiveDateTime,
        last_error: Option<String>,
    ) -> AppResult<Option<DeferredJob>> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, DeferredJob>(
            r#"
            UPDATE deferred_jobs
            SET
                attempts = attempts + 1,
                fire_at = ?,
                last_error = ?,
                status = CASE WHEN attempts + 1 >= max_attempts THEN 'dead' ELSE 'pending' END,
                updated_at = ?
            WHERE id = ? AND status = 'processing'
            RETURNING
                id, kind, payload_json, fire_at,
                attempts, max_attempts, last_error, status,
                created_at, updated_at
            "#,
        )
        .bind(next_fire_at)
        .bind(last_error)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Move a claimed job straight to the dead-letter state.
    pub async fn mark_dead(
        pool: &SqlitePool,
        id: &str,
        last_error: Option<String>,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE deferred_jobs
            SET status = 'dead', last_error = ?, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(last_error)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Fetch a job by id.
    #[allow(dead_code)]
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<DeferredJob>> {
        let row = sqlx::query_as::<_, DeferredJob>(
            r#"
            SELECT
                id, kind, payload_json, fire_at,
                attempts, max_attempts, last_error, status,
                created_at, updated_at
            FROM deferred_jobs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Pending jobs of one kind, oldest trigger first.
    #[allow(dead_code)]
    pub async fn list_pending_by_kind(
        pool: &SqlitePool,
        kind: &str,
    ) -> AppResult<Vec<DeferredJob>> {
        let rows = sqlx::query_as::<_, DeferredJob>(
            r#"
            SELECT
                id, kind, payload_json, fire_at,
                attempts, max_attempts, last_error, status,
                created_at, updated_at
            FROM deferred_jobs
            WHERE kind = ? AND status = 'pending'
            ORDER BY fire_at ASC
            "#,
        )
        .bind(kind)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::JobKind;
    use crate::db::test_pool;
    use chrono::Duration;

    fn reminder_job(id: &str, fire_at: chrono::NaiveDateTime) -> CreateDeferredJob {
        CreateDeferredJob {
            id: Some(id.to_string()),
            kind: JobKind::AppointmentReminder,
            payload_json: format!(r#"{{"appointment_id":"{}"}}"#, id),
            fire_at,
            max_attempts: Some(3),
        }
    }

    #[tokio::test]
    async fn create_with_identity_replaces_in_place() {
        let pool = test_pool().await;
        let t1 = Utc::now().naive_utc() + Duration::hours(1);
        let t2 = Utc::now().naive_utc() + Duration::hours(3);

        JobQueueRepository::create(&pool, reminder_job("apt-1", t1))
            .await
            .unwrap();
        let replaced = JobQueueRepository::create(&pool, reminder_job("apt-1", t2))
            .await
            .unwrap();

        assert_eq!(replaced.fire_at, t2);
        assert_eq!(replaced.status, "pending");

        let pending =
            JobQueueRepository::list_pending_by_kind(&pool, JobKind::AppointmentReminder.as_str())
                .await
                .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "apt-1");
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let pool = test_pool().await;
        let fire_at = Utc::now().naive_utc() + Duration::hours(1);

        JobQueueRepository::create(&pool, reminder_job("apt-2", fire_at))
            .await
            .unwrap();

        assert!(JobQueueRepository::cancel(&pool, "apt-2").await.unwrap());
        // Second cancel reports absence without erroring.
        assert!(!JobQueueRepository::cancel(&pool, "apt-2").await.unwrap());
        assert!(JobQueueRepository::find_by_id(&pool, "apt-2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn claim_only_returns_due_jobs() {
        let pool = test_pool().await;
        let due = Utc::now().naive_utc() - Duration::minutes(1);
        let future = Utc::now().naive_utc() + Duration::hours(1);

        JobQueueRepository::create(&pool, reminder_job("due", due))
            .await
            .unwrap();
        JobQueueRepository::create(&pool, reminder_job("future", future))
            .await
            .unwrap();

        let claimed = JobQueueRepository::fetch_and_claim_due(&pool, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "due");
        assert_eq!(claimed[0].status, "processing");

        // A second poll does not hand the same job out again.
        let again = JobQueueRepository::fetch_and_claim_due(&pool, 10).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn retry_bookkeeping_moves_to_dead_after_max_attempts() {
        let pool = test_pool().await;
        let due = Utc::now().naive_utc() - Duration::minutes(1);
        JobQueueRepository::create(
            &pool,
            CreateDeferredJob {
                max_attempts: Some(2),
                ..reminder_job("apt-3", due)
            },
        )
        .await
        .unwrap();

        let job = JobQueueRepository::fetch_and_claim_due(&pool, 1)
            .await
            .unwrap()
            .remove(0);
        let next = Utc::now().naive_utc() - Duration::seconds(1);

        let after_first = JobQueueRepository::register_attempt_and_schedule(
            &pool,
            &job.id,
            next,
            Some("transport timeout".into()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(after_first.status, "pending");
        assert_eq!(after_first.attempts, 1);

        let job = JobQueueRepository::fetch_and_claim_due(&pool, 1)
            .await
            .unwrap()
            .remove(0);
        let after_second = JobQueueRepository::register_attempt_and_schedule(
            &pool,
            &job.id,
            next,
            Some("transport timeout".into()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(after_second.status, "dead");
    }
}
