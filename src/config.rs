use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub webhooks: WebhookConfig,
    pub push: PushConfig,
    pub retention: RetentionConfig,
    pub reminder: ReminderConfig,
    pub job_queue: JobQueueConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for the booking system's event signatures.
    pub booking_secret: String,
    /// Signing secret for the payment provider's webhook endpoint.
    pub billing_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Base endpoint of the push delivery HTTP API.
    pub endpoint: String,
    /// Bearer token used to authenticate against the push API.
    pub auth_token: Option<String>,
    /// Maximum messages submitted to the transport in one chunk.
    pub send_chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Visit interval (days) assumed for customers without enough history.
    /// 30 for most deployments; some run 21.
    pub default_visit_interval_days: i64,
    /// Page size for the daily fan-out chain.
    pub page_size: i64,
    /// Hour of the local day at which the fan-out chain starts.
    pub daily_send_hour: u32,
    /// Deployment time zone; brands may override with their own.
    pub timezone: chrono_tz::Tz,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReminderConfig {
    /// How long before the appointment start the reminder fires (minutes).
    pub lead_minutes: i64,
    /// Tolerance window for a firing job: a reminder is only sent when the
    /// current time-to-start falls inside [window_min, window_max] minutes.
    pub window_min_minutes: i64,
    pub window_max_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobQueueConfig {
    /// Whether the deferred-job worker is enabled.
    pub enabled: bool,
    /// How often (seconds) the worker polls for due jobs.
    pub poll_interval_seconds: u64,
    /// Maximum jobs claimed per poll.
    pub worker_concurrency: u32,
    /// Maximum attempts before a job is moved to the dead-letter state.
    pub max_attempts: u32,
    /// Execution deadline for a single job run (seconds); exceeding it counts
    /// as a failed attempt.
    pub job_timeout_seconds: u64,
    /// Initial backoff (seconds) for the first retry of a failed job.
    pub initial_backoff_seconds: u64,
    /// Cap for exponential backoff (seconds).
    pub max_backoff_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for webhook endpoints
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints
    pub webhook_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let timezone_str = env::var("RETENTION_TIMEZONE").unwrap_or_else(|_| "Europe/Zagreb".to_string());
        let timezone: chrono_tz::Tz = timezone_str
            .parse()
            .map_err(|_| ConfigError::InvalidValue("RETENTION_TIMEZONE".to_string()))?;

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/app.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            webhooks: WebhookConfig {
                booking_secret: env::var("BOOKING_WEBHOOK_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("BOOKING_WEBHOOK_SECRET".to_string()))?,
                billing_secret: env::var("BILLING_WEBHOOK_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("BILLING_WEBHOOK_SECRET".to_string()))?,
            },
            push: PushConfig {
                endpoint: env::var("PUSH_ENDPOINT")
                    .unwrap_or_else(|_| "https://fcm.googleapis.com/v1/messages:send".to_string()),
                auth_token: env::var("PUSH_AUTH_TOKEN").ok(),
                send_chunk_size: env::var("PUSH_SEND_CHUNK_SIZE")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
            },
            retention: RetentionConfig {
                default_visit_interval_days: env::var("RETENTION_DEFAULT_VISIT_INTERVAL_DAYS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                page_size: env::var("RETENTION_PAGE_SIZE")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
                daily_send_hour: env::var("RETENTION_DAILY_SEND_HOUR")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                timezone,
            },
            reminder: ReminderConfig {
                lead_minutes: env::var("REMINDER_LEAD_MINUTES")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .unwrap_or(120),
                window_min_minutes: env::var("REMINDER_WINDOW_MIN_MINUTES")
                    .unwrap_or_else(|_| "90".to_string())
                    .parse()
                    .unwrap_or(90),
                window_max_minutes: env::var("REMINDER_WINDOW_MAX_MINUTES")
                    .unwrap_or_else(|_| "150".to_string())
                    .parse()
                    .unwrap_or(150),
            },
            job_queue: JobQueueConfig {
                enabled: match env::var("JOB_QUEUE_ENABLED") {
                    Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
                    Err(_) => true,
                },
                poll_interval_seconds: env::var("JOB_QUEUE_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5u64),
                worker_concurrency: env::var("JOB_QUEUE_WORKER_CONCURRENCY")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10u32),
                max_attempts: env::var("JOB_QUEUE_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5u32),
                job_timeout_seconds: env::var("JOB_QUEUE_JOB_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60u64),
                initial_backoff_seconds: env::var("JOB_QUEUE_INITIAL_BACKOFF_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30u64),
                max_backoff_seconds: env::var("JOB_QUEUE_MAX_BACKOFF_SECONDS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600u64),
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: env::var("RATE_LIMIT_WEBHOOKS_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_burst: env::var("RATE_LIMIT_WEBHOOKS_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            webhooks: WebhookConfig {
                booking_secret: String::new(),
                billing_secret: String::new(),
            },
            push: PushConfig {
                endpoint: "https://fcm.googleapis.com/v1/messages:send".to_string(),
                auth_token: None,
                send_chunk_size: 500,
            },
            retention: RetentionConfig {
                default_visit_interval_days: 30,
                page_size: 500,
                daily_send_hour: 10,
                timezone: chrono_tz::Europe::Zagreb,
            },
            reminder: ReminderConfig {
                lead_minutes: 120,
                window_min_minutes: 90,
                window_max_minutes: 150,
            },
            job_queue: JobQueueConfig {
                enabled: true,
                poll_interval_seconds: 5,
                worker_concurrency: 10,
                max_attempts: 5,
                job_timeout_seconds: 60,
                initial_backoff_seconds: 30,
                max_backoff_seconds: 3600,
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: 10,
                webhook_burst: 50,
            },
        }
    }
}
