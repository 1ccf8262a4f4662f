// src/models.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub type UserId = i32;

/// Exclusive upper bound for stored amounts; money columns are NUMERIC(10, 2).
pub fn max_money() -> Decimal {
    Decimal::new(100_000_000, 0)
}

#[derive(Debug, thiserror::Error)]
#[error("unknown status `{0}`")]
pub struct UnknownStatus(pub String);

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Name used to greet the user in emails: first name when set, username otherwise.
    pub fn display_name(&self) -> &str {
        match self.first_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => &self.username,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub id: Uuid,
    pub host_id: UserId,
    pub title: String,
    pub description: String,
    pub location: String,
    pub price_per_night: Decimal,
    pub amenities: Vec<String>,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Bookings only ever leave `pending`.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub guest_id: UserId,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub reviewer_id: UserId,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    /// Reference sent to the gateway when the checkout was created.
    pub tx_ref: Option<String>,
    /// Gateway-side transaction id, known after verification.
    pub transaction_id: Option<String>,
    pub payment_method: Option<String>,
    pub checkout_url: Option<String>,
    pub status: PaymentStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Request bodies

fn positive_price(value: &Decimal) -> Result<(), ValidationError> {
    if !value.is_sign_positive() || value.is_zero() {
        let mut err = ValidationError::new("positive");
        err.message = Some("price must be greater than zero".into());
        return Err(err);
    }
    if *value >= max_money() {
        let mut err = ValidationError::new("range");
        err.message = Some(format!("price must be less than {}", max_money()).into());
        return Err(err);
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ListingInput {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, max = 255))]
    pub location: String,
    #[validate(custom(function = "positive_price"))]
    pub price_per_night: Decimal,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

/// Partial listing update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub price_per_night: Option<Decimal>,
    pub amenities: Option<Vec<String>>,
    pub is_available: Option<bool>,
}

impl ListingPatch {
    pub fn apply(self, current: &Listing) -> ListingInput {
        ListingInput {
            title: self.title.unwrap_or_else(|| current.title.clone()),
            description: self
                .description
                .unwrap_or_else(|| current.description.clone()),
            location: self.location.unwrap_or_else(|| current.location.clone()),
            price_per_night: self.price_per_night.unwrap_or(current.price_per_night),
            amenities: self.amenities.unwrap_or_else(|| current.amenities.clone()),
            is_available: self.is_available.unwrap_or(current.is_available),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub listing_id: Uuid,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    /// Optional client-computed total; rejected when it disagrees with the listing price.
    #[serde(default)]
    pub total_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReviewInput {
    pub listing_id: Uuid,
    #[validate(range(min = 1, max = 5))]
    pub rating: i16,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReviewUpdate {
    #[validate(range(min = 1, max = 5))]
    pub rating: i16,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub comment: String,
}

// Query filters

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingFilter {
    pub location: Option<String>,
    pub is_available: Option<bool>,
    pub search: Option<String>,
    #[serde(skip)]
    pub host_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub listing_id: Option<Uuid>,
    /// Bookings where this user is the guest or the listing's host.
    #[serde(skip)]
    pub participant: Option<UserId>,
    #[serde(skip)]
    pub guest_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewFilter {
    pub listing_id: Option<Uuid>,
    pub reviewer_id: Option<UserId>,
    pub rating: Option<i16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub booking_id: Option<Uuid>,
    pub currency: Option<String>,
    #[serde(skip)]
    pub participant: Option<UserId>,
}
