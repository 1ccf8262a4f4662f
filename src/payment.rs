// src/payment.rs

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::booking::{load_context, BookingContext};
use crate::config::PaymentSettings;
use crate::db::{Settlement, Store};
use crate::error::{AppError, AppResult};
use crate::gateway::{CheckoutRequest, GatewayStatus, PaymentGateway};
use crate::models::{BookingStatus, Payment, PaymentFilter, PaymentStatus, UserId};
use crate::notifications::Notifier;

const CHECKOUT_TITLE: &str = "Travel Booking";

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStarted {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub checkout_url: String,
    pub tx_ref: String,
    pub amount: Decimal,
    pub currency: String,
}

impl CheckoutStarted {
    fn from_payment(payment: &Payment, checkout_url: String, tx_ref: String) -> Self {
        Self {
            payment_id: payment.id,
            booking_id: payment.booking_id,
            checkout_url,
            tx_ref,
            amount: payment.amount,
            currency: payment.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub payment: Payment,
    pub booking_status: BookingStatus,
    /// True when this call moved the payment out of pending.
    pub changed: bool,
}

/// Chapa only accepts letters, digits, spaces, `-`, `_` and `.` in descriptions.
fn checkout_description(listing_title: &str) -> String {
    let cleaned: String = format!("Payment for {listing_title}")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .collect();
    cleaned.trim().to_string()
}

#[derive(Clone)]
pub struct PaymentManager {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Notifier,
    settings: PaymentSettings,
}

impl PaymentManager {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Notifier,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            settings,
        }
    }

    async fn payment(&self, id: Uuid) -> AppResult<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or(AppError::NotFound("payment"))
    }

    async fn context_for(&self, payment: &Payment) -> AppResult<BookingContext> {
        let booking = self
            .store
            .get_booking(payment.booking_id)
            .await?
            .ok_or(AppError::NotFound("booking"))?;
        load_context(self.store.as_ref(), booking).await
    }

    /// Starts (or resumes) a gateway checkout for the booking's payment.
    pub async fn initiate(&self, booking_id: Uuid, actor: UserId) -> AppResult<CheckoutStarted> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(AppError::NotFound("booking"))?;
        let ctx = load_context(self.store.as_ref(), booking).await?;
        if !ctx.is_guest(actor) {
            return Err(AppError::permission(
                "only the guest can pay for this booking",
            ));
        }
        if ctx.booking.status == BookingStatus::Cancelled {
            return Err(AppError::conflict("cannot pay for a cancelled booking"));
        }

        let payment = self
            .store
            .get_payment_for_booking(booking_id)
            .await?
            .ok_or(AppError::NotFound("payment"))?;
        if payment.status != PaymentStatus::Pending {
            return Err(AppError::conflict(format!(
                "cannot initiate a {} payment",
                payment.status
            )));
        }

        if let (Some(url), Some(tx_ref)) = (&payment.checkout_url, &payment.tx_ref) {
            log::info!("payment checkout reused payment_id={} tx_ref={tx_ref}", payment.id);
            return Ok(CheckoutStarted::from_payment(&payment, url.clone(), tx_ref.clone()));
        }

        let tx_ref = payment.id.to_string();
        let request = CheckoutRequest {
            tx_ref: tx_ref.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            email: ctx.guest.email.clone(),
            first_name: ctx.guest.first_name.clone(),
            last_name: None,
            callback_url: self.settings.callback_url(),
            return_url: self.settings.return_url.clone(),
            title: CHECKOUT_TITLE.to_string(),
            description: checkout_description(&ctx.listing.title),
        };

        let session = match self.gateway.create_checkout(&request).await {
            Ok(s) => s,
            Err(e) => {
                log::error!(
                    "payment checkout failed payment_id={} booking_id={booking_id}: {e}",
                    payment.id
                );
                return Err(e.into());
            }
        };

        let updated = self
            .store
            .attach_checkout(payment.id, &session.reference, &session.checkout_url)
            .await?
            .ok_or_else(|| AppError::conflict("payment is no longer pending"))?;

        log::info!(
            "payment checkout started payment_id={} booking_id={booking_id} tx_ref={}",
            updated.id,
            session.reference
        );
        Ok(CheckoutStarted::from_payment(
            &updated,
            session.checkout_url,
            session.reference,
        ))
    }

    pub async fn initiate_for_payment(
        &self,
        payment_id: Uuid,
        actor: UserId,
    ) -> AppResult<CheckoutStarted> {
        let payment = self.payment(payment_id).await?;
        self.initiate(payment.booking_id, actor).await
    }

    /// Reconciles a payment with the gateway. `reference` is a tx_ref or a payment id.
    pub async fn verify(&self, reference: &str) -> AppResult<VerifyOutcome> {
        let payment = self
            .store
            .find_payment_by_reference(reference.trim())
            .await?
            .ok_or(AppError::NotFound("payment"))?;
        self.reconcile(payment).await
    }

    pub async fn verify_status(&self, payment_id: Uuid, actor: UserId) -> AppResult<VerifyOutcome> {
        let payment = self.payment(payment_id).await?;
        let ctx = self.context_for(&payment).await?;
        if !ctx.is_guest(actor) && !ctx.is_host(actor) {
            return Err(AppError::permission("you can only verify your own payments"));
        }
        if payment.tx_ref.is_none() {
            return Err(AppError::validation(
                "payment",
                "payment has not been initiated yet",
            ));
        }
        self.reconcile(payment).await
    }

    async fn reconcile(&self, payment: Payment) -> AppResult<VerifyOutcome> {
        if payment.status.is_terminal() {
            return self.unchanged(payment).await;
        }

        let tx_ref = payment
            .tx_ref
            .clone()
            .unwrap_or_else(|| payment.id.to_string());
        let verification = self.gateway.verify(&tx_ref).await?;

        let settlement = match verification.status {
            GatewayStatus::Success => match (verification.amount, verification.currency.as_deref()) {
                (_, Some(currency)) if !currency.eq_ignore_ascii_case(&payment.currency) => {
                    log::warn!(
                        "payment currency mismatch payment_id={} expected={} paid={currency}",
                        payment.id,
                        payment.currency
                    );
                    Settlement::Failed {
                        reason: format!(
                            "currency mismatch: expected {}, paid {currency}",
                            payment.currency
                        ),
                    }
                }
                (Some(paid), _) if paid != payment.amount => {
                    log::warn!(
                        "payment amount mismatch payment_id={} expected={} paid={paid}",
                        payment.id,
                        payment.amount
                    );
                    Settlement::Failed {
                        reason: format!("amount mismatch: expected {}, paid {paid}", payment.amount),
                    }
                }
                _ => Settlement::Completed {
                    transaction_id: verification.reference.clone(),
                    method: verification.method.clone(),
                },
            },
            GatewayStatus::Failed => Settlement::Failed {
                reason: "payment failed at the gateway".to_string(),
            },
            GatewayStatus::Pending => {
                log::info!("payment still pending payment_id={} tx_ref={tx_ref}", payment.id);
                return self.unchanged(payment).await;
            }
        };

        let Some(updated) = self.store.settle_payment(payment.id, &settlement).await? else {
            // Another verification settled it first.
            let current = self.payment(payment.id).await?;
            return self.unchanged(current).await;
        };

        let ctx = self.context_for(&updated).await?;
        match updated.status {
            PaymentStatus::Completed if ctx.booking.status == BookingStatus::Cancelled => {
                log::warn!(
                    "payment completed for cancelled booking payment_id={} booking_id={}",
                    updated.id,
                    updated.booking_id
                );
            }
            PaymentStatus::Completed => {
                log::info!(
                    "payment completed payment_id={} booking_id={} transaction_id={:?}",
                    updated.id,
                    updated.booking_id,
                    updated.transaction_id
                );
                self.notifier.send_payment_confirmation(&updated, &ctx).await;
            }
            PaymentStatus::Failed => {
                log::warn!(
                    "payment failed payment_id={} booking_id={} reason={:?}",
                    updated.id,
                    updated.booking_id,
                    updated.error_message
                );
                self.notifier.send_payment_failure(&updated, &ctx).await;
            }
            PaymentStatus::Pending => {}
        }

        Ok(VerifyOutcome {
            booking_status: ctx.booking.status,
            payment: updated,
            changed: true,
        })
    }

    async fn unchanged(&self, payment: Payment) -> AppResult<VerifyOutcome> {
        let booking = self
            .store
            .get_booking(payment.booking_id)
            .await?
            .ok_or(AppError::NotFound("booking"))?;
        Ok(VerifyOutcome {
            booking_status: booking.status,
            payment,
            changed: false,
        })
    }

    pub async fn get(&self, id: Uuid, actor: UserId) -> AppResult<Payment> {
        let payment = self.payment(id).await?;
        let ctx = self.context_for(&payment).await?;
        if !ctx.is_guest(actor) && !ctx.is_host(actor) {
            return Err(AppError::NotFound("payment"));
        }
        Ok(payment)
    }

    pub async fn list(&self, actor: UserId, mut filter: PaymentFilter) -> AppResult<Vec<Payment>> {
        filter.participant = Some(actor);
        Ok(self.store.list_payments(&filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_drops_disallowed_characters() {
        assert_eq!(
            checkout_description("Sunny Loft, NYC!"),
            "Payment for Sunny Loft NYC"
        );
    }
}
