// src/config.rs

use std::str::FromStr;
use std::time::Duration;

use crate::gateway::{ChapaConfig, CHAPA_API_BASE};
use crate::notifications::{RetryPolicy, SmtpConfig, SmtpTls};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub currency: String,
    pub callback_base_url: String,
    pub return_url: Option<String>,
}

impl PaymentSettings {
    /// Where the gateway reports transaction results.
    pub fn callback_url(&self) -> String {
        format!("{}/api/payments/verify", self.callback_base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// `None` runs the worker in process.
    pub amqp_url: Option<String>,
    pub queue_name: String,
    pub dead_letter_queue: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub from_email: String,
    pub from_name: String,
    /// `None` logs mail instead of sending it.
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct BookingPolicy {
    pub reject_overlaps: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_ttl_days: i64,
    pub bind_addr: String,
    pub port: u16,
    pub chapa: ChapaConfig,
    pub payments: PaymentSettings,
    pub queue: QueueConfig,
    pub email: EmailConfig,
    pub booking: BookingPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let queue_name = env.or("NOTIFY_QUEUE", "notifications.email");
        let smtp = match env.get("SMTP_HOST") {
            Some(host) => {
                let port = env.parse("SMTP_PORT", 587u16)?;
                let tls_default = if port == 465 { "tls" } else { "starttls" };
                let tls_raw = env.or("SMTP_TLS", tls_default);
                let tls = SmtpTls::parse(&tls_raw).ok_or(ConfigError::Invalid {
                    key: "SMTP_TLS",
                    value: tls_raw.clone(),
                })?;
                Some(SmtpConfig {
                    host,
                    port,
                    username: env.get("SMTP_USERNAME"),
                    password: env.get("SMTP_PASSWORD"),
                    tls,
                })
            }
            None => None,
        };

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            jwt_secret: env.required("JWT_SECRET")?,
            jwt_ttl_days: env.parse("JWT_TTL_DAYS", 30i64)?,
            bind_addr: env.or("BIND_ADDR", "0.0.0.0"),
            port: env.parse("PORT", 8000u16)?,
            chapa: ChapaConfig {
                secret_key: env.required("CHAPA_SECRET_KEY")?,
                base_url: env.or("CHAPA_BASE_URL", CHAPA_API_BASE),
                webhook_secret: env.get("CHAPA_WEBHOOK_SECRET"),
                timeout: Duration::from_secs(env.parse("CHAPA_TIMEOUT_SECS", 15u64)?),
            },
            payments: PaymentSettings {
                currency: env.or("PAYMENT_CURRENCY", "ETB"),
                callback_base_url: env.or("CALLBACK_BASE_URL", "http://localhost:8000"),
                return_url: env.get("PAYMENT_RETURN_URL"),
            },
            queue: QueueConfig {
                amqp_url: env.get("RABBITMQ_URL"),
                dead_letter_queue: format!("{queue_name}.dead"),
                queue_name,
                retry: RetryPolicy {
                    max_retries: env.parse("NOTIFY_MAX_RETRIES", 3u32)?,
                    initial_delay: Duration::from_secs(env.parse("NOTIFY_BACKOFF_SECS", 60u64)?),
                    ..RetryPolicy::default()
                },
            },
            email: EmailConfig {
                from_email: env.or("EMAIL_FROM", "noreply@alxtravelapp.com"),
                from_name: env.or("EMAIL_FROM_NAME", "ALX Travel App"),
                smtp,
            },
            booking: BookingPolicy {
                reject_overlaps: env.flag("BOOKING_REJECT_OVERLAPS")?,
            },
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Empty values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value: raw }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value: v }),
            },
        }
    }
}
