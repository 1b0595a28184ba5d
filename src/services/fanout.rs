use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::models::{CreateDeferredJob, JobKind};
use crate::db::{BrandRepository, CustomerMetricRepository, CustomerRepository, JobQueueRepository, StaffRepository};
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::services::localtime;
use crate::services::push::PushMessage;
use crate::AppState;

/// Position of the last record a previous page handled. The next page resumes
/// strictly after this triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutCursor {
    pub next_visit_due: NaiveDateTime,
    pub customer_id: String,
    pub brand_id: String,
}

/// Payload carried by every job of one fan-out chain. The cutoff is fixed at
/// chain start so late pages never widen the due-set mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutPagePayload {
    pub cutoff: NaiveDateTime,
    pub cursor: Option<FanoutCursor>,
}

/// Everything needed to word one "come back" nudge.
#[derive(Debug, Clone)]
pub struct VisitReminderContext<'a> {
    pub customer_name: Option<&'a str>,
    pub staff_name: Option<&'a str>,
}

/// Pure copy rendering, kept apart from the transactional flow.
pub fn render_visit_reminder(lang: Option<&str>, ctx: &VisitReminderContext) -> (String, String) {
    let title = match ctx.customer_name {
        Some(name) => i18n::tr(
            lang,
            "messages.visit_reminder_title_named",
            Some(&[("name", name)]),
        ),
        None => i18n::tr(lang, "messages.visit_reminder_title", None),
    };
    let body = match ctx.staff_name {
        Some(staff) => i18n::tr(
            lang,
            "messages.visit_reminder_body_named",
            Some(&[("staff", staff)]),
        ),
        None => i18n::tr(lang, "messages.visit_reminder_body", None),
    };
    (title, body)
}

/// The daily retention nudge, run as a self-continuing chain of fixed-size
/// page jobs instead of one unbounded unit of work.
pub struct FanoutService {
    pool: SqlitePool,
    state: Arc<AppState>,
}

impl FanoutService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            state: state.clone(),
        }
    }

    /// Kick off today's chain: cutoff is the end of the current local day.
    pub async fn start_daily_run(&self) -> AppResult<()> {
        let cutoff = localtime::end_of_local_day(
            Utc::now().naive_utc(),
            self.state.config.retention.timezone,
        );
        self.enqueue_page(FanoutPagePayload {
            cutoff,
            cursor: None,
        })
        .await?;

        tracing::info!("Retention fan-out chain started, cutoff {}", cutoff);
        Ok(())
    }

    /// Process one page of the chain.
    ///
    /// Flags are written only after the page's bulk send, and the next page
    /// is enqueued only when this one was full, so a replayed page job simply
    /// resumes at the first still-unflagged record. A transient transport
    /// failure propagates before any flag is written, leaving the whole page
    /// retryable.
    pub async fn process_page(&self, payload: &FanoutPagePayload) -> AppResult<()> {
        let page_size = self.state.config.retention.page_size;
        let cursor = payload
            .cursor
            .as_ref()
            .map(|c| (c.next_visit_due, c.customer_id.clone(), c.brand_id.clone()));

        let page =
            CustomerMetricRepository::fetch_due_page(&self.pool, payload.cutoff, cursor, page_size)
                .await?;

        if page.is_empty() {
            tracing::info!("Retention fan-out chain complete: no due customers remain");
            return Ok(());
        }

        // Resolve staff names and brand profiles once per page, not per record.
        let staff_ids: Vec<String> = page
            .iter()
            .filter_map(|r| r.preferred_staff_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let staff_names = StaffRepository::names_by_ids(&self.pool, &staff_ids).await?;

        let brand_ids: Vec<String> = page
            .iter()
            .map(|r| r.brand_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let brands = BrandRepository::find_many(&self.pool, &brand_ids).await?;

        let mut messages: Vec<PushMessage> = Vec::new();
        let mut message_customers: Vec<String> = Vec::new();

        for record in &page {
            let token = match record.push_token {
                Some(ref token) => token.clone(),
                None => {
                    // Still handled this cycle: the flag below suppresses
                    // re-attempts until the customer's next visit.
                    tracing::warn!(
                        "Retention nudge skipped: customer {} has no push credential",
                        record.customer_id
                    );
                    continue;
                }
            };

            let lang = i18n::resolve_language(
                brands
                    .get(&record.brand_id)
                    .and_then(|b| b.locale.as_deref()),
            );
            let staff_name = record
                .preferred_staff_id
                .as_ref()
                .and_then(|id| staff_names.get(id))
                .map(|s| s.as_str());

            let (title, body) = render_visit_reminder(
                lang.as_deref(),
                &VisitReminderContext {
                    customer_name: record.full_name.as_deref(),
                    staff_name,
                },
            );

            messages.push(PushMessage {
                token,
                title,
                body,
                data: HashMap::from([
                    ("type".to_string(), "visit_reminder".to_string()),
                    ("user_id".to_string(), record.customer_id.clone()),
                    (
                        "preferred_staff_id".to_string(),
                        record.preferred_staff_id.clone().unwrap_or_default(),
                    ),
                ]),
            });
            message_customers.push(record.customer_id.clone());
        }

        let mut success = 0usize;
        let mut failure = 0usize;
        if !messages.is_empty() {
            let outcomes = self.state.push.send_bulk(&messages).await?;

            let mut invalid: HashSet<String> = HashSet::new();
            for (outcome, customer_id) in outcomes.iter().zip(&message_customers) {
                match outcome {
                    Ok(()) => success += 1,
                    Err(f) => {
                        failure += 1;
                        if f.permanent {
                            invalid.insert(customer_id.clone());
                        } else {
                            tracing::warn!(
                                "Retention nudge to customer {} failed: {}",
                                customer_id,
                                f.message
                            );
                        }
                    }
                }
            }

            for customer_id in invalid {
                CustomerRepository::clear_push_token(&self.pool, &customer_id).await?;
            }
        }

        // Every record of the page counts as handled this cycle, sent or not.
        let keys: Vec<(String, String)> = page
            .iter()
            .map(|r| (r.brand_id.clone(), r.customer_id.clone()))
            .collect();
        CustomerMetricRepository::mark_reminded(&self.pool, &keys).await?;

        tracing::info!(
            "Retention fan-out page: {} records, {} sent, {} failed",
            page.len(),
            success,
            failure
        );

        if page.len() as i64 == page_size {
            let last = &page[page.len() - 1];
            self.enqueue_page(FanoutPagePayload {
                cutoff: payload.cutoff,
                cursor: Some(FanoutCursor {
                    next_visit_due: last.next_visit_due,
                    customer_id: last.customer_id.clone(),
                    brand_id: last.brand_id.clone(),
                }),
            })
            .await?;
        }

        Ok(())
    }

    async fn enqueue_page(&self, payload: FanoutPagePayload) -> AppResult<()> {
        JobQueueRepository::create(
            &self.pool,
            CreateDeferredJob {
                id: None,
                kind: JobKind::RetentionFanout,
                payload_json: serde_json::to_string(&payload)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?,
                fire_at: Utc::now().naive_utc(),
                max_attempts: Some(self.state.config.job_queue.max_attempts as i32),
            },
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;
    use crate::db::test_pool;
    use crate::services::push::testing::RecordingTransport;
    use crate::services::test_state_with_transport;
    use chrono::Duration;

    /// Drive a chain by hand: process the first page, then keep claiming and
    /// processing pending fan-out jobs until none remain. Returns the number
    /// of page invocations.
    async fn drive_chain(
        pool: &SqlitePool,
        service: &FanoutService,
        cutoff: NaiveDateTime,
    ) -> usize {
        let mut invocations = 1usize;
        service
            .process_page(&FanoutPagePayload {
                cutoff,
                cursor: None,
            })
            .await
            .unwrap();

        loop {
            let pending = JobQueueRepository::list_pending_by_kind(
                pool,
                JobKind::RetentionFanout.as_str(),
            )
            .await
            .unwrap();
            let Some(job) = pending.into_iter().next() else {
                break;
            };
            let payload: FanoutPagePayload = serde_json::from_str(&job.payload_json).unwrap();
            service.process_page(&payload).await.unwrap();
            JobQueueRepository::cancel(pool, &job.id).await.unwrap();
            invocations += 1;
        }
        invocations
    }

    async fn seed_due_customers(pool: &SqlitePool, n: usize, token: impl Fn(usize) -> Option<String>) {
        seed_brand(pool, "T1", "Brada Zagreb", None).await;
        seed_staff(pool, "S1", "T1", "Ivan", None).await;
        let base_due = Utc::now().naive_utc() - Duration::days(1);
        for i in 0..n {
            let id = format!("C{:02}", i);
            seed_customer(pool, &id, Some("Marko"), token(i).as_deref()).await;
            seed_metric(
                pool,
                "T1",
                &id,
                Some(base_due + Duration::minutes(i as i64)),
                false,
                Some("S1"),
            )
            .await;
        }
    }

    fn cutoff_now() -> NaiveDateTime {
        Utc::now().naive_utc() + Duration::hours(12)
    }

    #[test]
    fn render_uses_named_variants_when_known() {
        let (title, body) = render_visit_reminder(
            None,
            &VisitReminderContext {
                customer_name: Some("Marko"),
                staff_name: Some("Ivan"),
            },
        );
        assert_eq!(title, "Marko, nedostaješ nam!");
        assert!(body.starts_with("Ivan te čeka"));

        let (title, body) = render_visit_reminder(
            Some("en"),
            &VisitReminderContext {
                customer_name: None,
                staff_name: None,
            },
        );
        assert_eq!(title, "We miss you!");
        assert!(body.starts_with("We're waiting for you"));
    }

    #[tokio::test]
    async fn chain_covers_all_records_in_page_sized_steps() {
        let pool = test_pool().await;
        seed_due_customers(&pool, 7, |i| Some(format!("tok-{}", i))).await;

        let transport = Arc::new(RecordingTransport::new());
        let mut state = test_state_with_transport(pool.clone(), transport.clone());
        Arc::get_mut(&mut state).unwrap().config.retention.page_size = 3;
        let service = FanoutService::new(&state);

        let invocations = drive_chain(&pool, &service, cutoff_now()).await;

        // ceil(7 / 3) = 3 pages; the short third page ends the chain.
        assert_eq!(invocations, 3);
        assert_eq!(transport.sent_messages().len(), 7);

        let leftover = CustomerMetricRepository::fetch_due_page(&pool, cutoff_now(), None, 10)
            .await
            .unwrap();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn full_last_page_terminates_on_empty_follow_up() {
        let pool = test_pool().await;
        seed_due_customers(&pool, 6, |i| Some(format!("tok-{}", i))).await;

        let transport = Arc::new(RecordingTransport::new());
        let mut state = test_state_with_transport(pool.clone(), transport.clone());
        Arc::get_mut(&mut state).unwrap().config.retention.page_size = 3;
        let service = FanoutService::new(&state);

        // 2 full pages plus the empty page that ends the chain.
        let invocations = drive_chain(&pool, &service, cutoff_now()).await;
        assert_eq!(invocations, 3);
        assert_eq!(transport.sent_messages().len(), 6);
    }

    #[tokio::test]
    async fn already_reminded_and_not_yet_due_are_excluded() {
        let pool = test_pool().await;
        seed_brand(&pool, "T1", "Brada Zagreb", None).await;
        seed_customer(&pool, "C1", Some("Marko"), Some("tok-1")).await;
        seed_customer(&pool, "C2", Some("Ana"), Some("tok-2")).await;
        seed_customer(&pool, "C3", Some("Iva"), Some("tok-3")).await;

        let due = Utc::now().naive_utc() - Duration::hours(3);
        let not_due = Utc::now().naive_utc() + Duration::days(10);
        seed_metric(&pool, "T1", "C1", Some(due), false, None).await;
        seed_metric(&pool, "T1", "C2", Some(due), true, None).await;
        seed_metric(&pool, "T1", "C3", Some(not_due), false, None).await;

        let transport = Arc::new(RecordingTransport::new());
        let state = test_state_with_transport(pool.clone(), transport.clone());
        FanoutService::new(&state)
            .process_page(&FanoutPagePayload {
                cutoff: cutoff_now(),
                cursor: None,
            })
            .await
            .unwrap();

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data.get("user_id").unwrap(), "C1");
    }

    #[tokio::test]
    async fn skipped_records_are_still_flagged_for_this_cycle() {
        let pool = test_pool().await;
        seed_due_customers(&pool, 3, |i| {
            if i == 1 {
                None
            } else {
                Some(format!("tok-{}", i))
            }
        })
        .await;

        let transport = Arc::new(RecordingTransport::new());
        let state = test_state_with_transport(pool.clone(), transport.clone());
        FanoutService::new(&state)
            .process_page(&FanoutPagePayload {
                cutoff: cutoff_now(),
                cursor: None,
            })
            .await
            .unwrap();

        assert_eq!(transport.sent_messages().len(), 2);

        // The credential-less record is handled for this cycle too.
        let leftover = CustomerMetricRepository::fetch_due_page(&pool, cutoff_now(), None, 10)
            .await
            .unwrap();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn permanently_invalid_credentials_are_removed() {
        let pool = test_pool().await;
        seed_due_customers(&pool, 2, |i| Some(format!("tok-{}", i))).await;

        let transport = Arc::new(RecordingTransport::failing_permanently(&["tok-0"]));
        let state = test_state_with_transport(pool.clone(), transport.clone());
        FanoutService::new(&state)
            .process_page(&FanoutPagePayload {
                cutoff: cutoff_now(),
                cursor: None,
            })
            .await
            .unwrap();

        let broken = CustomerRepository::find_by_id(&pool, "C00").await.unwrap().unwrap();
        assert!(broken.push_token.is_none());
        let healthy = CustomerRepository::find_by_id(&pool, "C01").await.unwrap().unwrap();
        assert_eq!(healthy.push_token.as_deref(), Some("tok-1"));

        // Both were attempted, so both are flagged for this cycle.
        let leftover = CustomerMetricRepository::fetch_due_page(&pool, cutoff_now(), None, 10)
            .await
            .unwrap();
        assert!(leftover.is_empty());
    }
}
