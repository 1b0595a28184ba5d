use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kinds of deferred work executed by the background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Single-shot "2 hours before" reminder for one appointment. The job id
    /// is the appointment id, so rescheduling is cancel-and-replace.
    AppointmentReminder,
    /// One page of the daily retention fan-out chain.
    RetentionFanout,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::AppointmentReminder => "appointment_reminder",
            JobKind::RetentionFanout => "retention_fanout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "appointment_reminder" => Some(JobKind::AppointmentReminder),
            "retention_fanout" => Some(JobKind::RetentionFanout),
            _ => None,
        }
    }
}

/// A persisted deferred job.
///
/// Delivery is at-least-once: the worker claims a due job, runs it, and on a
/// transient failure reschedules it with exponential backoff until
/// `max_attempts` is exhausted, after which the job is moved to 'dead'.
/// Handlers are therefore written to be idempotent.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeferredJob {
    /// Stable identity. Appointment id for reminders; UUID for fan-out pages.
    pub id: String,

    /// Job kind discriminator (see `JobKind`).
    pub kind: String,

    /// JSON payload interpreted by the kind's handler.
    pub payload_json: String,

    /// Earliest time the job may run.
    pub fire_at: NaiveDateTime,

    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,

    /// 'pending', 'processing', 'succeeded', 'cancelled' or 'dead'.
    pub status: String,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Data required to enqueue a deferred job.
#[derive(Debug, Clone)]
pub struct CreateDeferredJob {
    /// Explicit identity; None generates a UUID.
    pub id: Option<String>,
    pub kind: JobKind,
    pub payload_json: String,
    pub fire_at: NaiveDateTime,
    /// Optional override; the configured queue default applies when None.
    pub max_attempts: Option<i32>,
}
