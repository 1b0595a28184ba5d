use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::db::models::{
    status_is_cancelled, AppointmentSnapshot, STATUS_COMPLETED, STATUS_NO_SHOW, STATUS_SCHEDULED,
};
use crate::db::{AppointmentRepository, BrandRepository, StaffRepository};
use crate::error::AppResult;
use crate::i18n;
use crate::services::aggregation::StatAggregator;
use crate::services::localtime;
use crate::services::push::PushMessage;
use crate::services::reminders::ReminderService;
use crate::AppState;

/// Entry point for appointment lifecycle events.
///
/// Classifies the before/after status pair and delegates; holds no state of
/// its own. Events arrive at-least-once and possibly out of order, so every
/// delegate re-reads current store state before acting.
pub struct LifecycleRouter {
    pool: SqlitePool,
    state: Arc<AppState>,
}

impl LifecycleRouter {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            state: state.clone(),
        }
    }

    pub async fn route(
        &self,
        appointment_id: &str,
        before: Option<&AppointmentSnapshot>,
        after: &AppointmentSnapshot,
    ) -> AppResult<()> {
        let status_before = before.map(|b| b.status_str()).unwrap_or("");
        let status_after = after.status_str();

        if status_before == status_after {
            tracing::debug!(
                "Appointment {} update without status change ('{}'), ignoring",
                appointment_id,
                status_after
            );
            return Ok(());
        }

        tracing::info!(
            "Appointment {} transition: '{}' -> '{}'",
            appointment_id,
            status_before,
            status_after
        );

        if status_after == STATUS_SCHEDULED {
            let start_time = match after.start_time {
                Some(t) => t.naive_utc(),
                None => {
                    tracing::warn!(
                        "Appointment {} scheduled without a start time, no reminder",
                        appointment_id
                    );
                    return Ok(());
                }
            };
            return ReminderService::new(&self.state)
                .schedule(appointment_id, start_time)
                .await;
        }

        if status_is_cancelled(status_after) {
            // Best effort: a missed cancellation notice is not business
            // critical, so failures are logged and never retried.
            if let Err(e) = self.notify_staff_cancellation(appointment_id, after).await {
                tracing::warn!(
                    "Failed to notify staff about cancellation of {}: {:?}",
                    appointment_id,
                    e
                );
            }
            return Ok(());
        }

        if status_after == STATUS_COMPLETED {
            let apt = match AppointmentRepository::find_by_id(&self.pool, appointment_id).await? {
                Some(apt) => apt,
                None => {
                    tracing::warn!(
                        "Completed appointment {} not found in mirror, skipping aggregation",
                        appointment_id
                    );
                    return Ok(());
                }
            };
            return StatAggregator::new(&self.state).apply_completed(&apt).await;
        }

        if status_after == STATUS_NO_SHOW {
            let apt = match AppointmentRepository::find_by_id(&self.pool, appointment_id).await? {
                Some(apt) => apt,
                None => {
                    tracing::warn!(
                        "No-show appointment {} not found in mirror, skipping aggregation",
                        appointment_id
                    );
                    return Ok(());
                }
            };
            return StatAggregator::new(&self.state).apply_no_show(&apt).await;
        }

        tracing::debug!(
            "Appointment {} transition to '{}' needs no action",
            appointment_id,
            status_after
        );
        Ok(())
    }

    async fn notify_staff_cancellation(
        &self,
        appointment_id: &str,
        after: &AppointmentSnapshot,
    ) -> AppResult<()> {
        let staff_id = match after.staff_id {
            Some(ref id) => id.clone(),
            None => {
                tracing::debug!(
                    "Cancelled appointment {} has no assigned staff member",
                    appointment_id
                );
                return Ok(());
            }
        };

        let staff = StaffRepository::find_by_id(&self.pool, &staff_id).await?;
        let token = match staff.and_then(|s| s.push_token) {
            Some(token) => token,
            None => {
                tracing::debug!(
                    "Staff member {} has no push credential, skipping cancellation notice",
                    staff_id
                );
                return Ok(());
            }
        };

        let brand = match after.brand_id {
            Some(ref id) => BrandRepository::find_by_id(&self.pool, id).await?,
            None => None,
        };
        let lang = i18n::resolve_language(brand.as_ref().and_then(|b| b.locale.as_deref()));
        let lang = lang.as_deref();
        let tz = localtime::brand_tz(brand.as_ref(), self.state.config.retention.timezone);

        let time_hm = after
            .start_time
            .map(|t| localtime::time_hm(t.naive_utc(), tz))
            .unwrap_or_else(|| "-".to_string());
        let customer = after.customer_id.as_deref().unwrap_or("-");

        let title = i18n::tr(lang, "messages.cancellation_staff_title", None);
        let body = i18n::tr(
            lang,
            "messages.cancellation_staff_body",
            Some(&[("time", time_hm.as_str()), ("customer", customer)]),
        );

        let message = PushMessage {
            token,
            title,
            body,
            data: HashMap::from([
                ("type".to_string(), "appointment_cancelled".to_string()),
                ("appointment_id".to_string(), appointment_id.to_string()),
            ]),
        };

        let outcomes = self.state.push.send_bulk(&[message]).await?;
        if let Some(Err(failure)) = outcomes.into_iter().next() {
            tracing::warn!(
                "Cancellation notice for {} not delivered: {}",
                appointment_id,
                failure.message
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::JobKind;
    use crate::db::testing::*;
    use crate::db::test_pool;
    use crate::db::{CustomerMetricRepository, JobQueueRepository};
    use crate::services::push::testing::RecordingTransport;
    use crate::services::test_state_with_transport;
    use chrono::{Duration, Utc};

    fn snapshot(status: &str, start_in_minutes: i64) -> AppointmentSnapshot {
        AppointmentSnapshot {
            brand_id: Some("T1".into()),
            customer_id: Some("C1".into()),
            staff_id: Some("S1".into()),
            location_id: Some("L1".into()),
            start_time: Some(Utc::now() + Duration::minutes(start_in_minutes)),
            total_price: Some(40.0),
            service_ids: Some(vec!["cut".into()]),
            status: Some(status.into()),
        }
    }

    async fn seed_references(pool: &sqlx::SqlitePool) {
        seed_brand(pool, "T1", "Brada Zagreb", None).await;
        seed_location(pool, "L1", "T1", "Centar").await;
        seed_staff(pool, "S1", "T1", "Ivan", Some("staff-tok")).await;
        seed_customer(pool, "C1", Some("Marko"), Some("tok-1")).await;
    }

    #[tokio::test]
    async fn unchanged_status_is_a_noop() {
        let pool = test_pool().await;
        seed_references(&pool).await;

        let transport = Arc::new(RecordingTransport::new());
        let state = test_state_with_transport(pool.clone(), transport.clone());
        let router = LifecycleRouter::new(&state);

        let after = snapshot(STATUS_SCHEDULED, 300);
        router.route("A1", Some(&after), &after).await.unwrap();

        let pending =
            JobQueueRepository::list_pending_by_kind(&pool, JobKind::AppointmentReminder.as_str())
                .await
                .unwrap();
        assert!(pending.is_empty());
        assert!(transport.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn transition_to_scheduled_schedules_a_reminder() {
        let pool = test_pool().await;
        seed_references(&pool).await;

        let state = test_state_with_transport(pool.clone(), Arc::new(RecordingTransport::new()));
        let router = LifecycleRouter::new(&state);

        // Creation event: no before snapshot.
        router
            .route("A1", None, &snapshot(STATUS_SCHEDULED, 300))
            .await
            .unwrap();

        let pending =
            JobQueueRepository::list_pending_by_kind(&pool, JobKind::AppointmentReminder.as_str())
                .await
                .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "A1");
    }

    #[tokio::test]
    async fn transition_to_completed_runs_aggregation() {
        let pool = test_pool().await;
        seed_references(&pool).await;

        let after = snapshot(STATUS_COMPLETED, -30);
        AppointmentRepository::upsert_snapshot(&pool, "A1", &after)
            .await
            .unwrap();

        let state = test_state_with_transport(pool.clone(), Arc::new(RecordingTransport::new()));
        LifecycleRouter::new(&state)
            .route("A1", Some(&snapshot(STATUS_SCHEDULED, -30)), &after)
            .await
            .unwrap();

        let metric = CustomerMetricRepository::find_from_pool(&pool, "T1", "C1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metric.lifetime_value, 40.0);
        assert_eq!(metric.last_processed_appointment_id.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn cancellation_notifies_assigned_staff_best_effort() {
        let pool = test_pool().await;
        seed_references(&pool).await;

        let transport = Arc::new(RecordingTransport::new());
        let state = test_state_with_transport(pool.clone(), transport.clone());
        let router = LifecycleRouter::new(&state);

        router
            .route(
                "A1",
                Some(&snapshot(STATUS_SCHEDULED, 120)),
                &snapshot("cancelled_by_customer", 120),
            )
            .await
            .unwrap();

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token, "staff-tok");
        assert_eq!(sent[0].data.get("type").unwrap(), "appointment_cancelled");
    }

    #[tokio::test]
    async fn failed_cancellation_notice_does_not_fail_the_event() {
        let pool = test_pool().await;
        seed_references(&pool).await;

        let transport = Arc::new(RecordingTransport::failing_permanently(&["staff-tok"]));
        let state = test_state_with_transport(pool.clone(), transport.clone());

        LifecycleRouter::new(&state)
            .route(
                "A1",
                Some(&snapshot(STATUS_SCHEDULED, 120)),
                &snapshot("cancelled_by_customer", 120),
            )
            .await
            .unwrap();
    }
}
