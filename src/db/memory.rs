// src/db/memory.rs

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewBooking, NewUser, Settlement, Store, StoreError};
use crate::models::{
    Booking, BookingFilter, BookingStatus, Listing, ListingFilter, ListingInput, Payment,
    PaymentFilter, PaymentStatus, Review, ReviewFilter, ReviewInput, ReviewUpdate, User, UserId,
};

#[derive(Default)]
struct Tables {
    next_user_id: UserId,
    users: HashMap<UserId, (User, String)>,
    listings: HashMap<Uuid, Listing>,
    bookings: HashMap<Uuid, Booking>,
    reviews: HashMap<Uuid, Review>,
    payments: HashMap<Uuid, Payment>,
    deliveries: HashSet<Uuid>,
}

impl Tables {
    fn is_participant(&self, booking: &Booking, user: UserId) -> bool {
        booking.guest_id == user
            || self
                .listings
                .get(&booking.listing_id)
                .is_some_and(|l| l.host_id == user)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn newest_first<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    items.sort_by_key(|item| std::cmp::Reverse(key(item)));
    items
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|(u, _)| u.email == new.email) {
            return Err(StoreError::Duplicate("email"));
        }
        t.next_user_id += 1;
        let user = User {
            id: t.next_user_id,
            username: new.username,
            email: new.email,
            first_name: new.first_name,
            created_at: Utc::now(),
        };
        t.users.insert(user.id, (user.clone(), new.password_hash));
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.users.get(&id).map(|(u, _)| u.clone()))
    }

    async fn find_user_credentials(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.users.values().find(|(u, _)| u.email == email).cloned())
    }

    async fn create_listing(
        &self,
        host_id: UserId,
        input: &ListingInput,
    ) -> Result<Listing, StoreError> {
        let now = Utc::now();
        let listing = Listing {
            id: Uuid::new_v4(),
            host_id,
            title: input.title.clone(),
            description: input.description.clone(),
            location: input.location.clone(),
            price_per_night: input.price_per_night,
            amenities: input.amenities.clone(),
            is_available: input.is_available,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .lock()
            .await
            .listings
            .insert(listing.id, listing.clone());
        Ok(listing)
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        Ok(self.tables.lock().await.listings.get(&id).cloned())
    }

    async fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError> {
        let t = self.tables.lock().await;
        let items = t
            .listings
            .values()
            .filter(|l| filter.host_id.map_or(true, |h| l.host_id == h))
            .filter(|l| {
                filter
                    .location
                    .as_deref()
                    .map_or(true, |loc| l.location.eq_ignore_ascii_case(loc))
            })
            .filter(|l| filter.is_available.map_or(true, |a| l.is_available == a))
            .filter(|l| {
                filter.search.as_deref().map_or(true, |q| {
                    contains_ci(&l.title, q)
                        || contains_ci(&l.description, q)
                        || contains_ci(&l.location, q)
                })
            })
            .cloned()
            .collect();
        Ok(newest_first(items, |l: &Listing| l.created_at))
    }

    async fn update_listing(
        &self,
        id: Uuid,
        input: &ListingInput,
    ) -> Result<Option<Listing>, StoreError> {
        let mut t = self.tables.lock().await;
        let Some(listing) = t.listings.get_mut(&id) else {
            return Ok(None);
        };
        listing.title = input.title.clone();
        listing.description = input.description.clone();
        listing.location = input.location.clone();
        listing.price_per_night = input.price_per_night;
        listing.amenities = input.amenities.clone();
        listing.is_available = input.is_available;
        listing.updated_at = Utc::now();
        Ok(Some(listing.clone()))
    }

    async fn delete_listing(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.lock().await;
        if !t.listings.contains_key(&id) {
            return Ok(false);
        }
        let booking_ids: Vec<Uuid> = t
            .bookings
            .values()
            .filter(|b| b.listing_id == id)
            .map(|b| b.id)
            .collect();
        if t.payments.values().any(|p| {
            booking_ids.contains(&p.booking_id) && p.status == PaymentStatus::Completed
        }) {
            return Err(StoreError::Referenced("completed payment"));
        }
        t.listings.remove(&id);
        for booking_id in booking_ids {
            t.bookings.remove(&booking_id);
            t.payments.retain(|_, p| p.booking_id != booking_id);
        }
        t.reviews.retain(|_, r| r.listing_id != id);
        Ok(true)
    }

    async fn create_booking(&self, new: NewBooking) -> Result<(Booking, Payment), StoreError> {
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            listing_id: new.listing_id,
            guest_id: new.guest_id,
            check_in_date: new.check_in_date,
            check_out_date: new.check_out_date,
            total_price: new.total_price,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let payment = Payment {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            amount: new.total_price,
            currency: new.currency,
            tx_ref: None,
            transaction_id: None,
            payment_method: None,
            checkout_url: None,
            status: PaymentStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        let mut t = self.tables.lock().await;
        t.bookings.insert(booking.id, booking.clone());
        t.payments.insert(payment.id, payment.clone());
        Ok((booking, payment))
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.lock().await.bookings.get(&id).cloned())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let t = self.tables.lock().await;
        let items = t
            .bookings
            .values()
            .filter(|b| filter.participant.map_or(true, |u| t.is_participant(b, u)))
            .filter(|b| filter.guest_id.map_or(true, |g| b.guest_id == g))
            .filter(|b| filter.status.map_or(true, |s| b.status == s))
            .filter(|b| filter.listing_id.map_or(true, |l| b.listing_id == l))
            .cloned()
            .collect();
        Ok(newest_first(items, |b: &Booking| b.created_at))
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<Option<Booking>, StoreError> {
        let mut t = self.tables.lock().await;
        match t.bookings.get_mut(&id) {
            Some(booking) if booking.status == from => {
                booking.status = to;
                booking.updated_at = Utc::now();
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn reschedule_booking(
        &self,
        id: Uuid,
        check_in_date: NaiveDate,
        check_out_date: NaiveDate,
        total_price: Decimal,
    ) -> Result<Option<Booking>, StoreError> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let updated = match t.bookings.get_mut(&id) {
            Some(booking) if booking.status == BookingStatus::Pending => {
                booking.check_in_date = check_in_date;
                booking.check_out_date = check_out_date;
                booking.total_price = total_price;
                booking.updated_at = now;
                booking.clone()
            }
            _ => return Ok(None),
        };
        for payment in t.payments.values_mut() {
            if payment.booking_id == id && payment.status == PaymentStatus::Pending {
                payment.amount = total_price;
                payment.updated_at = now;
            }
        }
        Ok(Some(updated))
    }

    async fn delete_booking(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.lock().await;
        if t.bookings.remove(&id).is_none() {
            return Ok(false);
        }
        t.payments.retain(|_, p| p.booking_id != id);
        Ok(true)
    }

    async fn has_overlapping_booking(
        &self,
        listing_id: Uuid,
        check_in_date: NaiveDate,
        check_out_date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.bookings.values().any(|b| {
            b.listing_id == listing_id
                && b.status != BookingStatus::Cancelled
                && Some(b.id) != exclude
                && b.check_in_date < check_out_date
                && check_in_date < b.check_out_date
        }))
    }

    async fn create_review(
        &self,
        reviewer_id: UserId,
        input: &ReviewInput,
    ) -> Result<Review, StoreError> {
        let review = Review {
            id: Uuid::new_v4(),
            listing_id: input.listing_id,
            reviewer_id,
            rating: input.rating,
            comment: input.comment.clone(),
            created_at: Utc::now(),
        };
        self.tables
            .lock()
            .await
            .reviews
            .insert(review.id, review.clone());
        Ok(review)
    }

    async fn get_review(&self, id: Uuid) -> Result<Option<Review>, StoreError> {
        Ok(self.tables.lock().await.reviews.get(&id).cloned())
    }

    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Vec<Review>, StoreError> {
        let t = self.tables.lock().await;
        let items = t
            .reviews
            .values()
            .filter(|r| filter.listing_id.map_or(true, |l| r.listing_id == l))
            .filter(|r| filter.reviewer_id.map_or(true, |u| r.reviewer_id == u))
            .filter(|r| filter.rating.map_or(true, |x| r.rating == x))
            .cloned()
            .collect();
        Ok(newest_first(items, |r: &Review| r.created_at))
    }

    async fn update_review(
        &self,
        id: Uuid,
        update: &ReviewUpdate,
    ) -> Result<Option<Review>, StoreError> {
        let mut t = self.tables.lock().await;
        let Some(review) = t.reviews.get_mut(&id) else {
            return Ok(None);
        };
        review.rating = update.rating;
        review.comment = update.comment.clone();
        Ok(Some(review.clone()))
    }

    async fn delete_review(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.reviews.remove(&id).is_some())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables.lock().await.payments.get(&id).cloned())
    }

    async fn get_payment_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.payments
            .values()
            .find(|p| p.booking_id == booking_id)
            .cloned())
    }

    async fn find_payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.payments
            .values()
            .find(|p| p.tx_ref.as_deref() == Some(reference) || p.id.to_string() == reference)
            .cloned())
    }

    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError> {
        let t = self.tables.lock().await;
        let items = t
            .payments
            .values()
            .filter(|p| {
                filter.participant.map_or(true, |u| {
                    t.bookings
                        .get(&p.booking_id)
                        .is_some_and(|b| t.is_participant(b, u))
                })
            })
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .filter(|p| filter.booking_id.map_or(true, |b| p.booking_id == b))
            .filter(|p| {
                filter
                    .currency
                    .as_deref()
                    .map_or(true, |c| p.currency == c)
            })
            .cloned()
            .collect();
        Ok(newest_first(items, |p: &Payment| p.created_at))
    }

    async fn attach_checkout(
        &self,
        id: Uuid,
        tx_ref: &str,
        checkout_url: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let mut t = self.tables.lock().await;
        if t
            .payments
            .values()
            .any(|p| p.id != id && p.tx_ref.as_deref() == Some(tx_ref))
        {
            return Err(StoreError::Duplicate("tx_ref"));
        }
        match t.payments.get_mut(&id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                payment.tx_ref = Some(tx_ref.to_string());
                payment.checkout_url = Some(checkout_url.to_string());
                payment.updated_at = Utc::now();
                Ok(Some(payment.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn settle_payment(
        &self,
        id: Uuid,
        settlement: &Settlement,
    ) -> Result<Option<Payment>, StoreError> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let settled = match t.payments.get_mut(&id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                payment.status = settlement.status();
                match settlement {
                    Settlement::Completed {
                        transaction_id,
                        method,
                    } => {
                        if transaction_id.is_some() {
                            payment.transaction_id = transaction_id.clone();
                        }
                        if method.is_some() {
                            payment.payment_method = method.clone();
                        }
                        payment.error_message = None;
                    }
                    Settlement::Failed { reason } => {
                        payment.error_message = Some(reason.clone());
                    }
                }
                payment.updated_at = now;
                payment.clone()
            }
            _ => return Ok(None),
        };

        if settled.status == PaymentStatus::Completed {
            if let Some(booking) = t.bookings.get_mut(&settled.booking_id) {
                if booking.status == BookingStatus::Pending {
                    booking.status = BookingStatus::Confirmed;
                    booking.updated_at = now;
                }
            }
        }
        Ok(Some(settled))
    }

    async fn delivery_recorded(&self, job_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.deliveries.contains(&job_id))
    }

    async fn record_delivery(
        &self,
        job_id: Uuid,
        _kind: &str,
        _recipient: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.deliveries.insert(job_id))
    }
}
