// src/notifications/mod.rs

pub mod email;
pub mod mailer;
pub mod worker;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::booking::BookingContext;
use crate::models::Payment;
use crate::queue::JobQueue;

pub use email::EmailMessage;
pub use mailer::{LogMailer, MailError, Mailer, SmtpConfig, SmtpMailer, SmtpTls};
pub use worker::{DeliveryOutcome, NotificationWorker, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingConfirmationEmail {
    pub booking_id: Uuid,
    pub guest_email: String,
    pub guest_name: String,
    pub listing_title: String,
    pub listing_location: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfirmationEmail {
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    pub guest_email: String,
    pub guest_name: String,
    pub listing_title: String,
    pub listing_location: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailureEmail {
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    pub guest_email: String,
    pub guest_name: String,
    pub listing_title: String,
    pub amount: Decimal,
    pub currency: String,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum NotificationJob {
    BookingConfirmation(BookingConfirmationEmail),
    PaymentConfirmation(PaymentConfirmationEmail),
    PaymentFailure(PaymentFailureEmail),
}

impl NotificationJob {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationJob::BookingConfirmation(_) => "booking_confirmation",
            NotificationJob::PaymentConfirmation(_) => "payment_confirmation",
            NotificationJob::PaymentFailure(_) => "payment_failure",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            NotificationJob::BookingConfirmation(j) => &j.guest_email,
            NotificationJob::PaymentConfirmation(j) => &j.guest_email,
            NotificationJob::PaymentFailure(j) => &j.guest_email,
        }
    }

    pub fn booking_id(&self) -> Uuid {
        match self {
            NotificationJob::BookingConfirmation(j) => j.booking_id,
            NotificationJob::PaymentConfirmation(j) => j.booking_id,
            NotificationJob::PaymentFailure(j) => j.booking_id,
        }
    }
}

/// Queue message. `id` is the idempotency key the worker deduplicates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub job: NotificationJob,
}

impl JobEnvelope {
    pub fn new(job: NotificationJob) -> Self {
        Self {
            id: Uuid::new_v4(),
            enqueued_at: Utc::now(),
            job,
        }
    }
}

const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Fire-and-forget front of the job queue. Enqueue failures are logged and
/// swallowed so they never reach the request that triggered them.
#[derive(Clone)]
pub struct Notifier {
    queue: Arc<dyn JobQueue>,
}

impl Notifier {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    pub async fn send_booking_confirmation(&self, ctx: &BookingContext) -> Option<Uuid> {
        let job = NotificationJob::BookingConfirmation(BookingConfirmationEmail {
            booking_id: ctx.booking.id,
            guest_email: ctx.guest.email.clone(),
            guest_name: ctx.guest.display_name().to_string(),
            listing_title: ctx.listing.title.clone(),
            listing_location: ctx.listing.location.clone(),
            check_in_date: ctx.booking.check_in_date,
            check_out_date: ctx.booking.check_out_date,
            total_price: ctx.booking.total_price,
        });
        self.dispatch(job).await
    }

    pub async fn send_payment_confirmation(
        &self,
        payment: &Payment,
        ctx: &BookingContext,
    ) -> Option<Uuid> {
        let job = NotificationJob::PaymentConfirmation(PaymentConfirmationEmail {
            booking_id: ctx.booking.id,
            payment_id: payment.id,
            guest_email: ctx.guest.email.clone(),
            guest_name: ctx.guest.display_name().to_string(),
            listing_title: ctx.listing.title.clone(),
            listing_location: ctx.listing.location.clone(),
            check_in_date: ctx.booking.check_in_date,
            check_out_date: ctx.booking.check_out_date,
            amount: payment.amount,
            currency: payment.currency.clone(),
            transaction_id: payment.transaction_id.clone(),
        });
        self.dispatch(job).await
    }

    pub async fn send_payment_failure(
        &self,
        payment: &Payment,
        ctx: &BookingContext,
    ) -> Option<Uuid> {
        let job = NotificationJob::PaymentFailure(PaymentFailureEmail {
            booking_id: ctx.booking.id,
            payment_id: payment.id,
            guest_email: ctx.guest.email.clone(),
            guest_name: ctx.guest.display_name().to_string(),
            listing_title: ctx.listing.title.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            error_message: payment
                .error_message
                .clone()
                .unwrap_or_else(|| "Your payment failed. Please try again.".to_string()),
        });
        self.dispatch(job).await
    }

    async fn dispatch(&self, job: NotificationJob) -> Option<Uuid> {
        let envelope = JobEnvelope::new(job);
        let kind = envelope.job.kind();

        match tokio::time::timeout(ENQUEUE_TIMEOUT, self.queue.enqueue(&envelope)).await {
            Ok(Ok(())) => {
                log::info!(
                    "notification enqueued kind={kind} job_id={} booking_id={}",
                    envelope.id,
                    envelope.job.booking_id()
                );
                Some(envelope.id)
            }
            Ok(Err(e)) => {
                log::error!(
                    "notification enqueue failed kind={kind} job_id={}: {e}",
                    envelope.id
                );
                None
            }
            Err(_) => {
                log::error!(
                    "notification enqueue timed out kind={kind} job_id={} after {:?}",
                    envelope.id,
                    ENQUEUE_TIMEOUT
                );
                None
            }
        }
    }
}
