// src/db/mod.rs

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    Booking, BookingFilter, BookingStatus, Listing, ListingFilter, ListingInput, Payment,
    PaymentFilter, PaymentStatus, Review, ReviewFilter, ReviewInput, ReviewUpdate, User, UserId,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("duplicate {0}")]
    Duplicate(&'static str),

    #[error("still referenced by {0}")]
    Referenced(&'static str),

    #[error("corrupt row: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub listing_id: Uuid,
    pub guest_id: UserId,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub total_price: Decimal,
    /// Currency of the payment shell created alongside the booking.
    pub currency: String,
}

/// Terminal outcome applied to a pending payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Completed {
        transaction_id: Option<String>,
        method: Option<String>,
    },
    Failed {
        reason: String,
    },
}

impl Settlement {
    pub fn status(&self) -> PaymentStatus {
        match self {
            Settlement::Completed { .. } => PaymentStatus::Completed,
            Settlement::Failed { .. } => PaymentStatus::Failed,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    /// Returns the user together with its password hash.
    async fn find_user_credentials(&self, email: &str)
        -> Result<Option<(User, String)>, StoreError>;

    async fn create_listing(&self, host_id: UserId, input: &ListingInput)
        -> Result<Listing, StoreError>;
    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError>;
    async fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError>;
    async fn update_listing(&self, id: Uuid, input: &ListingInput)
        -> Result<Option<Listing>, StoreError>;
    async fn delete_listing(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Inserts the booking and its pending payment in one transaction.
    async fn create_booking(&self, new: NewBooking) -> Result<(Booking, Payment), StoreError>;
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;
    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError>;
    /// Moves the booking to `to` only if it is currently `from`.
    async fn transition_booking(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<Option<Booking>, StoreError>;
    /// Changes dates and price of a pending booking and its pending payment.
    async fn reschedule_booking(
        &self,
        id: Uuid,
        check_in_date: NaiveDate,
        check_out_date: NaiveDate,
        total_price: Decimal,
    ) -> Result<Option<Booking>, StoreError>;
    async fn delete_booking(&self, id: Uuid) -> Result<bool, StoreError>;
    /// True when a non-cancelled booking of the listing intersects `[check_in, check_out)`.
    async fn has_overlapping_booking(
        &self,
        listing_id: Uuid,
        check_in_date: NaiveDate,
        check_out_date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<bool, StoreError>;

    async fn create_review(&self, reviewer_id: UserId, input: &ReviewInput)
        -> Result<Review, StoreError>;
    async fn get_review(&self, id: Uuid) -> Result<Option<Review>, StoreError>;
    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Vec<Review>, StoreError>;
    async fn update_review(&self, id: Uuid, update: &ReviewUpdate)
        -> Result<Option<Review>, StoreError>;
    async fn delete_review(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;
    async fn get_payment_for_booking(&self, booking_id: Uuid)
        -> Result<Option<Payment>, StoreError>;
    /// Looks a payment up by gateway reference, falling back to its id.
    async fn find_payment_by_reference(&self, reference: &str)
        -> Result<Option<Payment>, StoreError>;
    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError>;
    /// Stores the checkout session on a payment that is still pending.
    async fn attach_checkout(
        &self,
        id: Uuid,
        tx_ref: &str,
        checkout_url: &str,
    ) -> Result<Option<Payment>, StoreError>;
    /// Applies a terminal outcome to a pending payment. On completion the
    /// booking is confirmed in the same transaction if it is still pending.
    /// Returns `None` when the payment was no longer pending, so at most one
    /// caller ever observes the transition.
    async fn settle_payment(&self, id: Uuid, settlement: &Settlement)
        -> Result<Option<Payment>, StoreError>;

    async fn delivery_recorded(&self, job_id: Uuid) -> Result<bool, StoreError>;
    /// Returns false if the job was already recorded.
    async fn record_delivery(&self, job_id: Uuid, kind: &str, recipient: &str)
        -> Result<bool, StoreError>;
}
