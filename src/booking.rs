// src/booking.rs

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::BookingPolicy;
use crate::db::{NewBooking, Store};
use crate::error::{AppError, AppResult};
use crate::models::{
    max_money, Booking, BookingFilter, BookingRequest, BookingStatus, Listing, Payment,
    PaymentStatus, RescheduleRequest, User, UserId,
};
use crate::notifications::Notifier;

/// A booking with the rows notifications and permission checks need.
#[derive(Debug, Clone)]
pub struct BookingContext {
    pub booking: Booking,
    pub listing: Listing,
    pub guest: User,
}

impl BookingContext {
    pub fn is_guest(&self, user: UserId) -> bool {
        self.booking.guest_id == user
    }

    pub fn is_host(&self, user: UserId) -> bool {
        self.listing.host_id == user
    }
}

pub async fn load_context(store: &dyn Store, booking: Booking) -> AppResult<BookingContext> {
    let listing = store
        .get_listing(booking.listing_id)
        .await?
        .ok_or(AppError::NotFound("listing"))?;
    let guest = store
        .get_user(booking.guest_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(BookingContext {
        booking,
        listing,
        guest,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingDetail {
    #[serde(flatten)]
    pub booking: Booking,
    pub payment: Option<Payment>,
}

fn validate_dates(check_in: NaiveDate, check_out: NaiveDate) -> AppResult<i64> {
    let nights = (check_out - check_in).num_days();
    if nights <= 0 {
        return Err(AppError::validation(
            "check_out_date",
            "check-out date must be after check-in date",
        ));
    }
    Ok(nights)
}

/// Nightly rate times number of nights, in currency units with two decimals.
pub fn quote(listing: &Listing, check_in: NaiveDate, check_out: NaiveDate) -> AppResult<Decimal> {
    let nights = validate_dates(check_in, check_out)?;
    let mut total = listing
        .price_per_night
        .checked_mul(Decimal::from(nights))
        .map(|t| t.round_dp(2))
        .filter(|t| *t < max_money())
        .ok_or_else(|| {
            AppError::validation(
                "total_price",
                format!("total price must be less than {}", max_money()),
            )
        })?;
    total.rescale(2);
    Ok(total)
}

#[derive(Clone)]
pub struct BookingManager {
    store: Arc<dyn Store>,
    notifier: Notifier,
    policy: BookingPolicy,
    currency: String,
}

impl BookingManager {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Notifier,
        policy: BookingPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
            currency: currency.into(),
        }
    }

    async fn booking(&self, id: Uuid) -> AppResult<Booking> {
        self.store
            .get_booking(id)
            .await?
            .ok_or(AppError::NotFound("booking"))
    }

    async fn context(&self, id: Uuid) -> AppResult<BookingContext> {
        let booking = self.booking(id).await?;
        load_context(self.store.as_ref(), booking).await
    }

    async fn ensure_no_overlap(
        &self,
        listing_id: Uuid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        exclude: Option<Uuid>,
    ) -> AppResult<()> {
        if !self.policy.reject_overlaps {
            return Ok(());
        }
        if self
            .store
            .has_overlapping_booking(listing_id, check_in, check_out, exclude)
            .await?
        {
            return Err(AppError::conflict(
                "listing is already booked for the selected dates",
            ));
        }
        Ok(())
    }

    pub async fn create(&self, guest: UserId, req: BookingRequest) -> AppResult<BookingDetail> {
        validate_dates(req.check_in_date, req.check_out_date)?;

        let listing = self
            .store
            .get_listing(req.listing_id)
            .await?
            .ok_or(AppError::NotFound("listing"))?;
        if !listing.is_available {
            return Err(AppError::validation("listing_id", "listing is not available"));
        }

        let total_price = quote(&listing, req.check_in_date, req.check_out_date)?;
        if let Some(supplied) = req.total_price {
            if supplied != total_price {
                return Err(AppError::validation(
                    "total_price",
                    format!("total price must be {total_price}"),
                ));
            }
        }

        self.ensure_no_overlap(listing.id, req.check_in_date, req.check_out_date, None)
            .await?;

        let (booking, payment) = self
            .store
            .create_booking(NewBooking {
                listing_id: listing.id,
                guest_id: guest,
                check_in_date: req.check_in_date,
                check_out_date: req.check_out_date,
                total_price,
                currency: self.currency.clone(),
            })
            .await?;

        log::info!(
            "booking created booking_id={} listing_id={} guest_id={guest} total={total_price} payment_id={}",
            booking.id,
            listing.id,
            payment.id
        );
        Ok(BookingDetail {
            booking,
            payment: Some(payment),
        })
    }

    pub async fn cancel(&self, id: Uuid, actor: UserId) -> AppResult<Booking> {
        let booking = self.booking(id).await?;
        if booking.guest_id != actor {
            return Err(AppError::permission("only the guest can cancel this booking"));
        }
        if !booking.status.can_transition_to(BookingStatus::Cancelled) {
            return Err(AppError::conflict(format!(
                "cannot cancel a {} booking",
                booking.status
            )));
        }
        if let Some(payment) = self.store.get_payment_for_booking(id).await? {
            if payment.status == PaymentStatus::Pending && payment.tx_ref.is_some() {
                return Err(AppError::conflict(
                    "payment is in progress for this booking",
                ));
            }
        }

        let cancelled = self
            .store
            .transition_booking(id, BookingStatus::Pending, BookingStatus::Cancelled)
            .await?
            .ok_or_else(|| AppError::conflict("booking is no longer pending"))?;

        log::info!("booking cancelled booking_id={id} guest_id={actor}");
        Ok(cancelled)
    }

    pub async fn confirm(&self, id: Uuid, actor: UserId) -> AppResult<Booking> {
        let ctx = self.context(id).await?;
        if !ctx.is_host(actor) {
            return Err(AppError::permission("only the listing host can confirm bookings"));
        }
        if !ctx.booking.status.can_transition_to(BookingStatus::Confirmed) {
            return Err(AppError::conflict(format!(
                "cannot confirm a {} booking",
                ctx.booking.status
            )));
        }

        let confirmed = self
            .store
            .transition_booking(id, BookingStatus::Pending, BookingStatus::Confirmed)
            .await?
            .ok_or_else(|| AppError::conflict("booking is no longer pending"))?;

        log::info!("booking confirmed booking_id={id} host_id={actor}");
        let ctx = BookingContext {
            booking: confirmed.clone(),
            ..ctx
        };
        self.notifier.send_booking_confirmation(&ctx).await;
        Ok(confirmed)
    }

    /// Guests and hosts see the booking; anyone else gets NotFound.
    pub async fn get(&self, id: Uuid, actor: UserId) -> AppResult<BookingDetail> {
        let ctx = self.context(id).await?;
        if !ctx.is_guest(actor) && !ctx.is_host(actor) {
            return Err(AppError::NotFound("booking"));
        }
        let payment = self.store.get_payment_for_booking(id).await?;
        Ok(BookingDetail {
            booking: ctx.booking,
            payment,
        })
    }

    pub async fn list(&self, actor: UserId, mut filter: BookingFilter) -> AppResult<Vec<Booking>> {
        filter.participant = Some(actor);
        filter.guest_id = None;
        Ok(self.store.list_bookings(&filter).await?)
    }

    pub async fn my_bookings(&self, actor: UserId) -> AppResult<Vec<Booking>> {
        let filter = BookingFilter {
            guest_id: Some(actor),
            ..BookingFilter::default()
        };
        Ok(self.store.list_bookings(&filter).await?)
    }

    pub async fn reschedule(
        &self,
        id: Uuid,
        actor: UserId,
        req: RescheduleRequest,
    ) -> AppResult<BookingDetail> {
        let ctx = self.context(id).await?;
        if !ctx.is_guest(actor) {
            return Err(AppError::permission("only the guest can change this booking"));
        }
        if ctx.booking.status != BookingStatus::Pending {
            return Err(AppError::conflict(format!(
                "cannot change a {} booking",
                ctx.booking.status
            )));
        }
        if let Some(payment) = self.store.get_payment_for_booking(id).await? {
            if payment.tx_ref.is_some() || payment.status != PaymentStatus::Pending {
                return Err(AppError::conflict(
                    "payment has already been started for this booking",
                ));
            }
        }

        let total_price = quote(&ctx.listing, req.check_in_date, req.check_out_date)?;
        self.ensure_no_overlap(ctx.listing.id, req.check_in_date, req.check_out_date, Some(id))
            .await?;

        let booking = self
            .store
            .reschedule_booking(id, req.check_in_date, req.check_out_date, total_price)
            .await?
            .ok_or_else(|| AppError::conflict("booking is no longer pending"))?;

        log::info!(
            "booking rescheduled booking_id={id} check_in={} check_out={} total={total_price}",
            booking.check_in_date,
            booking.check_out_date
        );
        let payment = self.store.get_payment_for_booking(id).await?;
        Ok(BookingDetail { booking, payment })
    }

    pub async fn delete(&self, id: Uuid, actor: UserId) -> AppResult<()> {
        let booking = self.booking(id).await?;
        if booking.guest_id != actor {
            return Err(AppError::permission("only the guest can delete this booking"));
        }
        if let Some(payment) = self.store.get_payment_for_booking(id).await? {
            if payment.status == PaymentStatus::Completed {
                return Err(AppError::conflict("cannot delete a paid booking"));
            }
        }
        if !self.store.delete_booking(id).await? {
            return Err(AppError::NotFound("booking"));
        }
        log::info!("booking deleted booking_id={id} guest_id={actor}");
        Ok(())
    }
}
