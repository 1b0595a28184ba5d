use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::models::{CreateDeferredJob, JobKind, STATUS_SCHEDULED};
use crate::db::{
    AppointmentRepository, BrandRepository, CustomerRepository, JobQueueRepository,
    LocationRepository, StaffRepository,
};
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::services::localtime;
use crate::services::push::PushMessage;
use crate::AppState;

/// Payload of an appointment-reminder job. The job id doubles as the
/// appointment id; the payload keeps the reference explicit for operators
/// reading the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderJobPayload {
    pub appointment_id: String,
}

/// Everything needed to word one appointment reminder.
#[derive(Debug, Clone)]
pub struct ReminderContext<'a> {
    pub venue: &'a str,
    pub staff: Option<&'a str>,
    pub time_hm: &'a str,
}

/// Pure copy rendering, kept apart from the transactional flow.
pub fn render_appointment_reminder(lang: Option<&str>, ctx: &ReminderContext) -> (String, String) {
    let title = i18n::tr(lang, "messages.appointment_reminder_title", None);
    let body = match ctx.staff {
        Some(staff) => i18n::tr(
            lang,
            "messages.appointment_reminder_body_named",
            Some(&[("venue", ctx.venue), ("staff", staff), ("time", ctx.time_hm)]),
        ),
        None => i18n::tr(
            lang,
            "messages.appointment_reminder_body",
            Some(&[("venue", ctx.venue), ("time", ctx.time_hm)]),
        ),
    };
    (title, body)
}

/// Schedules and dispatches the single-shot "2 hours before" reminders.
pub struct ReminderService {
    pool: SqlitePool,
    state: Arc<AppState>,
}

impl ReminderService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            state: state.clone(),
        }
    }

    /// Map an appointment's start time to exactly one pending reminder job.
    ///
    /// The job's identity is the appointment id, so a reschedule replaces any
    /// previous job: at most one pending reminder exists per appointment.
    /// A fire time already in the past is skipped, not an error; the stale
    /// window check at dispatch covers any job left behind.
    pub async fn schedule(&self, appointment_id: &str, start_time: NaiveDateTime) -> AppResult<()> {
        let lead = Duration::minutes(self.state.config.reminder.lead_minutes);
        let fire_at = start_time - lead;

        if fire_at <= Utc::now().naive_utc() {
            tracing::info!(
                "Reminder for appointment {} skipped: fire time {} already passed",
                appointment_id,
                fire_at
            );
            return Ok(());
        }

        // Idempotent delete-if-exists before the insert; absence is fine.
        JobQueueRepository::cancel(&self.pool, appointment_id).await?;

        let payload = ReminderJobPayload {
            appointment_id: appointment_id.to_string(),
        };
        JobQueueRepository::create(
            &self.pool,
            CreateDeferredJob {
                id: Some(appointment_id.to_string()),
                kind: JobKind::AppointmentReminder,
                payload_json: serde_json::to_string(&payload)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?,
                fire_at,
                max_attempts: Some(self.state.config.job_queue.max_attempts as i32),
            },
        )
        .await?;

        tracing::info!(
            "Scheduled reminder for appointment {} at {}",
            appointment_id,
            fire_at
        );
        Ok(())
    }

    /// Execute a reminder job.
    ///
    /// Every decision is re-derived from freshly read state, so duplicate or
    /// out-of-order deliveries degrade to no-ops:
    /// missing appointment, a status that moved off 'scheduled', an already
    /// sent reminder and a start time outside the tolerance window all
    /// terminate cleanly without side effects. Only a transient send failure
    /// propagates, which lets the queue retry with backoff.
    pub async fn dispatch(&self, appointment_id: &str) -> AppResult<()> {
        let apt = match AppointmentRepository::find_by_id(&self.pool, appointment_id).await? {
            Some(apt) => apt,
            None => {
                tracing::info!("Reminder {}: appointment no longer exists", appointment_id);
                return Ok(());
            }
        };

        if apt.status != STATUS_SCHEDULED {
            tracing::info!(
                "Reminder {}: status is '{}', nothing to send",
                appointment_id,
                apt.status
            );
            return Ok(());
        }

        if apt.reminder_sent {
            tracing::info!("Reminder {}: already sent", appointment_id);
            return Ok(());
        }

        // Guard against a job firing for a start time it no longer matches
        // (reschedule raced the cancel). The window is in minutes-to-start.
        let minutes_until = (apt.start_time - Utc::now().naive_utc()).num_minutes();
        let window = &self.state.config.reminder;
        if minutes_until < window.window_min_minutes || minutes_until > window.window_max_minutes {
            tracing::info!(
                "Reminder {}: start is {} minutes away, outside [{}, {}] window",
                appointment_id,
                minutes_until,
                window.window_min_minutes,
                window.window_max_minutes
            );
            return Ok(());
        }

        let customer = CustomerRepository::find_by_id(&self.pool, &apt.customer_id).await?;
        let token = match customer.as_ref().and_then(|c| c.push_token.clone()) {
            Some(token) => token,
            None => {
                tracing::info!(
                    "Reminder {}: customer {} has no push credential",
                    appointment_id,
                    apt.customer_id
                );
                return Ok(());
            }
        };

        let brand = BrandRepository::find_by_id(&self.pool, &apt.brand_id).await?;
        let lang = i18n::resolve_language(brand.as_ref().and_then(|b| b.locale.as_deref()));
        let lang = lang.as_deref();
        let tz = localtime::brand_tz(brand.as_ref(), self.state.config.retention.timezone);

        let venue = match apt.location_id {
            Some(ref id) => LocationRepository::find_by_id(&self.pool, id)
                .await?
                .map(|l| l.name),
            None => None,
        }
        .unwrap_or_else(|| i18n::tr(lang, "fallback.venue_name", None));

        let staff_name = match apt.staff_id {
            Some(ref id) => StaffRepository::find_by_id(&self.pool, id)
                .await?
                .map(|s| s.name),
            None => None,
        };

        let time_hm = localtime::time_hm(apt.start_time, tz);
        let (title, body) = render_appointment_reminder(
            lang,
            &ReminderContext {
                venue: &venue,
                staff: staff_name.as_deref(),
                time_hm: &time_hm,
            },
        );

        let message = PushMessage {
            token,
            title,
            body,
            data: HashMap::from([
                ("type".to_string(), "appointment_reminder".to_string()),
                ("appointment_id".to_string(), apt.id.clone()),
                ("user_id".to_string(), apt.customer_id.clone()),
            ]),
        };

        let outcomes = self.state.push.send_bulk(&[message]).await?;
        if let Some(Err(failure)) = outcomes.into_iter().next() {
            if failure.permanent {
                // Retrying a doomed credential cannot succeed; remove it so
                // the next attempt short-circuits at the credential check.
                CustomerRepository::clear_push_token(&self.pool, &apt.customer_id).await?;
            }
            return Err(AppError::Transport(failure.message));
        }

        AppointmentRepository::mark_reminder_sent(&self.pool, &apt.id).await?;
        tracing::info!("Reminder sent for appointment {}", apt.id);
        Ok(())
    }
}
