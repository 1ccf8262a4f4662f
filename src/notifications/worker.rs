// src/notifications/worker.rs

use std::sync::Arc;
use std::time::Duration;

use super::email::render;
use super::mailer::{MailError, Mailer};
use super::JobEnvelope;
use crate::db::Store;
use crate::queue::JobQueue;

/// Exponential backoff between delivery attempts.
///
/// `delay = initial_delay * multiplier ^ attempt`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60 * 60),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// The job id was already delivered; nothing was sent.
    Duplicate,
    DeadLettered { attempts: u32, reason: String },
}

#[derive(Clone)]
pub struct NotificationWorker {
    mailer: Arc<dyn Mailer>,
    store: Arc<dyn Store>,
    dead_letters: Arc<dyn JobQueue>,
    policy: RetryPolicy,
    app_name: String,
}

impl NotificationWorker {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        store: Arc<dyn Store>,
        dead_letters: Arc<dyn JobQueue>,
        policy: RetryPolicy,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            store,
            dead_letters,
            policy,
            app_name: app_name.into(),
        }
    }

    pub async fn handle(&self, envelope: &JobEnvelope) -> DeliveryOutcome {
        let kind = envelope.job.kind();

        match self.store.delivery_recorded(envelope.id).await {
            Ok(true) => {
                log::info!("notification already delivered, skipping kind={kind} job_id={}", envelope.id);
                return DeliveryOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => log::warn!("delivery log lookup failed job_id={}: {e}", envelope.id),
        }

        let email = render(&envelope.job, &self.app_name);
        let mut attempt: u32 = 0;
        loop {
            match self.mailer.send(&email).await {
                Ok(()) => {
                    self.record(envelope).await;
                    log::info!(
                        "notification delivered kind={kind} job_id={} to={} attempts={}",
                        envelope.id,
                        email.to,
                        attempt + 1
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt + 1 };
                }
                Err(MailError::Permanent(reason)) => {
                    return self.give_up(envelope, attempt + 1, reason).await;
                }
                Err(MailError::Transient(reason)) => {
                    if attempt >= self.policy.max_retries {
                        return self.give_up(envelope, attempt + 1, reason).await;
                    }
                    let delay = self.policy.delay_for_attempt(attempt);
                    log::warn!(
                        "notification send failed kind={kind} job_id={} attempt={}: {reason}; retrying in {:?}",
                        envelope.id,
                        attempt + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn record(&self, envelope: &JobEnvelope) {
        match self
            .store
            .record_delivery(envelope.id, envelope.job.kind(), envelope.job.recipient())
            .await
        {
            Ok(true) => {}
            Ok(false) => log::warn!("delivery already recorded job_id={}", envelope.id),
            Err(e) => log::error!("failed to record delivery job_id={}: {e}", envelope.id),
        }
    }

    async fn give_up(&self, envelope: &JobEnvelope, attempts: u32, reason: String) -> DeliveryOutcome {
        log::error!(
            "notification dead-lettered kind={} job_id={} attempts={attempts}: {reason}",
            envelope.job.kind(),
            envelope.id
        );
        if let Err(e) = self.dead_letters.dead_letter(envelope, &reason).await {
            log::error!("failed to publish dead letter job_id={}: {e}", envelope.id);
        }
        DeliveryOutcome::DeadLettered { attempts, reason }
    }
}
