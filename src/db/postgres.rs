// src/db/postgres.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::{NewBooking, NewUser, Settlement, Store, StoreError};
use crate::models::{
    Booking, BookingFilter, BookingStatus, Listing, ListingFilter, ListingInput, Payment,
    PaymentFilter, PaymentStatus, Review, ReviewFilter, ReviewInput, ReviewUpdate, User, UserId,
};

const USER_COLUMNS: &str = "id, username, email, first_name, created_at";

const LISTING_COLUMNS: &str = "id, host_id, title, description, location, price_per_night, \
     amenities, is_available, created_at, updated_at";

const BOOKING_COLUMNS: &str = "b.id, b.listing_id, b.guest_id, b.check_in_date, b.check_out_date, \
     b.total_price, b.status, b.created_at, b.updated_at";

const REVIEW_COLUMNS: &str = "id, listing_id, reviewer_id, rating, comment, created_at";

const PAYMENT_COLUMNS: &str = "p.id, p.booking_id, p.amount, p.currency, p.tx_ref, p.transaction_id, \
     p.payment_method, p.checkout_url, p.status, p.error_message, p.created_at, p.updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn user_from_row(r: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: r.try_get("id")?,
        username: r.try_get("username")?,
        email: r.try_get("email")?,
        first_name: r.try_get("first_name")?,
        created_at: r.try_get("created_at")?,
    })
}

fn listing_from_row(r: &PgRow) -> Result<Listing, sqlx::Error> {
    Ok(Listing {
        id: r.try_get("id")?,
        host_id: r.try_get("host_id")?,
        title: r.try_get("title")?,
        description: r.try_get("description")?,
        location: r.try_get("location")?,
        price_per_night: r.try_get("price_per_night")?,
        amenities: r.try_get("amenities")?,
        is_available: r.try_get("is_available")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn booking_from_row(r: &PgRow) -> Result<Booking, sqlx::Error> {
    Ok(Booking {
        id: r.try_get("id")?,
        listing_id: r.try_get("listing_id")?,
        guest_id: r.try_get("guest_id")?,
        check_in_date: r.try_get("check_in_date")?,
        check_out_date: r.try_get("check_out_date")?,
        total_price: r.try_get("total_price")?,
        status: status_column::<BookingStatus>(r, "status")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn review_from_row(r: &PgRow) -> Result<Review, sqlx::Error> {
    Ok(Review {
        id: r.try_get("id")?,
        listing_id: r.try_get("listing_id")?,
        reviewer_id: r.try_get("reviewer_id")?,
        rating: r.try_get("rating")?,
        comment: r.try_get("comment")?,
        created_at: r.try_get("created_at")?,
    })
}

fn payment_from_row(r: &PgRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        id: r.try_get("id")?,
        booking_id: r.try_get("booking_id")?,
        amount: r.try_get("amount")?,
        currency: r.try_get("currency")?,
        tx_ref: r.try_get("tx_ref")?,
        transaction_id: r.try_get("transaction_id")?,
        payment_method: r.try_get("payment_method")?,
        checkout_url: r.try_get("checkout_url")?,
        status: status_column::<PaymentStatus>(r, "status")?,
        error_message: r.try_get("error_message")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn map_unique(err: sqlx::Error, what: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what),
        _ => StoreError::Database(err),
    }
}

fn map_foreign_key(err: sqlx::Error, what: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::Referenced(what),
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO users (username, email, password_hash, first_name)
               VALUES ($1, $2, $3, $4)
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.first_name.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique(e, "email"))?;

        Ok(user_from_row(&row)?)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_user_credentials(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let hash: String = row.try_get("password_hash")?;
        Ok(Some((user_from_row(&row)?, hash)))
    }

    async fn create_listing(
        &self,
        host_id: UserId,
        input: &ListingInput,
    ) -> Result<Listing, StoreError> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO listings
                   (id, host_id, title, description, location, price_per_night, amenities, is_available)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING {LISTING_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(host_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.location)
        .bind(input.price_per_night)
        .bind(&input.amenities)
        .bind(input.is_available)
        .fetch_one(&self.pool)
        .await?;

        Ok(listing_from_row(&row)?)
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        let row = sqlx::query(&format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(listing_from_row).transpose()?)
    }

    async fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {LISTING_COLUMNS}
               FROM listings
               WHERE ($1::int IS NULL OR host_id = $1)
                 AND ($2::text IS NULL OR location ILIKE $2)
                 AND ($3::bool IS NULL OR is_available = $3)
                 AND ($4::text IS NULL
                      OR title ILIKE '%' || $4 || '%'
                      OR description ILIKE '%' || $4 || '%'
                      OR location ILIKE '%' || $4 || '%')
               ORDER BY created_at DESC"#
        ))
        .bind(filter.host_id)
        .bind(filter.location.as_deref())
        .bind(filter.is_available)
        .bind(filter.search.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(listing_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn update_listing(
        &self,
        id: Uuid,
        input: &ListingInput,
    ) -> Result<Option<Listing>, StoreError> {
        let row = sqlx::query(&format!(
            r#"UPDATE listings
               SET title = $2, description = $3, location = $4, price_per_night = $5,
                   amenities = $6, is_available = $7, updated_at = NOW()
               WHERE id = $1
               RETURNING {LISTING_COLUMNS}"#
        ))
        .bind(id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.location)
        .bind(input.price_per_night)
        .bind(&input.amenities)
        .bind(input.is_available)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(listing_from_row).transpose()?)
    }

    async fn delete_listing(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query("SELECT id FROM listings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(false);
        }

        let paid: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (
                   SELECT 1 FROM payments p
                   JOIN bookings b ON b.id = p.booking_id
                   WHERE b.listing_id = $1 AND p.status = 'completed'
               )"#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if paid {
            return Err(StoreError::Referenced("completed payment"));
        }

        sqlx::query("DELETE FROM bookings WHERE listing_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_foreign_key(e, "booking"))?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_booking(&self, new: NewBooking) -> Result<(Booking, Payment), StoreError> {
        let mut tx = self.pool.begin().await?;

        let booking_row = sqlx::query(&format!(
            r#"INSERT INTO bookings AS b
                   (id, listing_id, guest_id, check_in_date, check_out_date, total_price, status)
               VALUES ($1, $2, $3, $4, $5, $6, 'pending')
               RETURNING {BOOKING_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(new.listing_id)
        .bind(new.guest_id)
        .bind(new.check_in_date)
        .bind(new.check_out_date)
        .bind(new.total_price)
        .fetch_one(&mut *tx)
        .await?;
        let booking = booking_from_row(&booking_row)?;

        let payment_row = sqlx::query(&format!(
            r#"INSERT INTO payments AS p (id, booking_id, amount, currency, status)
               VALUES ($1, $2, $3, $4, 'pending')
               RETURNING {PAYMENT_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(booking.id)
        .bind(booking.total_price)
        .bind(&new.currency)
        .fetch_one(&mut *tx)
        .await?;
        let payment = payment_from_row(&payment_row)?;

        tx.commit().await?;
        Ok((booking, payment))
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings b WHERE b.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(booking_from_row).transpose()?)
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {BOOKING_COLUMNS}
               FROM bookings b
               JOIN listings l ON l.id = b.listing_id
               WHERE ($1::int IS NULL OR b.guest_id = $1 OR l.host_id = $1)
                 AND ($2::int IS NULL OR b.guest_id = $2)
                 AND ($3::text IS NULL OR b.status = $3)
                 AND ($4::uuid IS NULL OR b.listing_id = $4)
               ORDER BY b.created_at DESC"#
        ))
        .bind(filter.participant)
        .bind(filter.guest_id)
        .bind(filter.status.map(BookingStatus::as_str))
        .bind(filter.listing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(booking_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(&format!(
            r#"UPDATE bookings AS b
               SET status = $3, updated_at = NOW()
               WHERE b.id = $1 AND b.status = $2
               RETURNING {BOOKING_COLUMNS}"#
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(booking_from_row).transpose()?)
    }

    async fn reschedule_booking(
        &self,
        id: Uuid,
        check_in_date: NaiveDate,
        check_out_date: NaiveDate,
        total_price: Decimal,
    ) -> Result<Option<Booking>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"UPDATE bookings AS b
               SET check_in_date = $2, check_out_date = $3, total_price = $4, updated_at = NOW()
               WHERE b.id = $1 AND b.status = 'pending'
               RETURNING {BOOKING_COLUMNS}"#
        ))
        .bind(id)
        .bind(check_in_date)
        .bind(check_out_date)
        .bind(total_price)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let booking = booking_from_row(&row)?;

        sqlx::query(
            r#"UPDATE payments
               SET amount = $2, updated_at = NOW()
               WHERE booking_id = $1 AND status = 'pending'"#,
        )
        .bind(id)
        .bind(total_price)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(booking))
    }

    async fn delete_booking(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn has_overlapping_booking(
        &self,
        listing_id: Uuid,
        check_in_date: NaiveDate,
        check_out_date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"SELECT EXISTS (
                   SELECT 1 FROM bookings
                   WHERE listing_id = $1
                     AND status <> 'cancelled'
                     AND check_in_date < $3
                     AND $2 < check_out_date
                     AND ($4::uuid IS NULL OR id <> $4)
               ) AS overlaps"#,
        )
        .bind(listing_id)
        .bind(check_in_date)
        .bind(check_out_date)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("overlaps")?)
    }

    async fn create_review(
        &self,
        reviewer_id: UserId,
        input: &ReviewInput,
    ) -> Result<Review, StoreError> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO reviews (id, listing_id, reviewer_id, rating, comment)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {REVIEW_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(input.listing_id)
        .bind(reviewer_id)
        .bind(input.rating)
        .bind(&input.comment)
        .fetch_one(&self.pool)
        .await?;

        Ok(review_from_row(&row)?)
    }

    async fn get_review(&self, id: Uuid) -> Result<Option<Review>, StoreError> {
        let row = sqlx::query(&format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(review_from_row).transpose()?)
    }

    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Vec<Review>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {REVIEW_COLUMNS}
               FROM reviews
               WHERE ($1::uuid IS NULL OR listing_id = $1)
                 AND ($2::int IS NULL OR reviewer_id = $2)
                 AND ($3::smallint IS NULL OR rating = $3)
               ORDER BY created_at DESC"#
        ))
        .bind(filter.listing_id)
        .bind(filter.reviewer_id)
        .bind(filter.rating)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(review_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn update_review(
        &self,
        id: Uuid,
        update: &ReviewUpdate,
    ) -> Result<Option<Review>, StoreError> {
        let row = sqlx::query(&format!(
            r#"UPDATE reviews SET rating = $2, comment = $3
               WHERE id = $1
               RETURNING {REVIEW_COLUMNS}"#
        ))
        .bind(id)
        .bind(update.rating)
        .bind(&update.comment)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(review_from_row).transpose()?)
    }

    async fn delete_review(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(payment_from_row).transpose()?)
    }

    async fn get_payment_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.booking_id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(payment_from_row).transpose()?)
    }

    async fn find_payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(&format!(
            r#"SELECT {PAYMENT_COLUMNS}
               FROM payments p
               WHERE p.tx_ref = $1 OR p.id::text = $1
               LIMIT 1"#
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(payment_from_row).transpose()?)
    }

    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {PAYMENT_COLUMNS}
               FROM payments p
               JOIN bookings b ON b.id = p.booking_id
               JOIN listings l ON l.id = b.listing_id
               WHERE ($1::int IS NULL OR b.guest_id = $1 OR l.host_id = $1)
                 AND ($2::text IS NULL OR p.status = $2)
                 AND ($3::uuid IS NULL OR p.booking_id = $3)
                 AND ($4::text IS NULL OR p.currency = $4)
               ORDER BY p.created_at DESC"#
        ))
        .bind(filter.participant)
        .bind(filter.status.map(PaymentStatus::as_str))
        .bind(filter.booking_id)
        .bind(filter.currency.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(payment_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn attach_checkout(
        &self,
        id: Uuid,
        tx_ref: &str,
        checkout_url: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(&format!(
            r#"UPDATE payments AS p
               SET tx_ref = $2, checkout_url = $3, updated_at = NOW()
               WHERE p.id = $1 AND p.status = 'pending'
               RETURNING {PAYMENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(tx_ref)
        .bind(checkout_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique(e, "tx_ref"))?;

        Ok(row.as_ref().map(payment_from_row).transpose()?)
    }

    async fn settle_payment(
        &self,
        id: Uuid,
        settlement: &Settlement,
    ) -> Result<Option<Payment>, StoreError> {
        let (transaction_id, method, error_message) = match settlement {
            Settlement::Completed {
                transaction_id,
                method,
            } => (transaction_id.as_deref(), method.as_deref(), None),
            Settlement::Failed { reason } => (None, None, Some(reason.as_str())),
        };

        let mut tx = self.pool.begin().await?;

        // The status guard makes this the single winner among concurrent verifications.
        let row = sqlx::query(&format!(
            r#"UPDATE payments AS p
               SET status = $2,
                   transaction_id = COALESCE($3, p.transaction_id),
                   payment_method = COALESCE($4, p.payment_method),
                   error_message = $5,
                   updated_at = NOW()
               WHERE p.id = $1 AND p.status = 'pending'
               RETURNING {PAYMENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(settlement.status().as_str())
        .bind(transaction_id)
        .bind(method)
        .bind(error_message)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let payment = payment_from_row(&row)?;

        if matches!(settlement, Settlement::Completed { .. }) {
            sqlx::query(
                r#"UPDATE bookings
                   SET status = 'confirmed', updated_at = NOW()
                   WHERE id = $1 AND status = 'pending'"#,
            )
            .bind(payment.booking_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(payment))
    }

    async fn delivery_recorded(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM notification_deliveries WHERE job_id = $1) AS seen",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("seen")?)
    }

    async fn record_delivery(
        &self,
        job_id: Uuid,
        kind: &str,
        recipient: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO notification_deliveries (job_id, kind, recipient)
               VALUES ($1, $2, $3)
               ON CONFLICT (job_id) DO NOTHING"#,
        )
        .bind(job_id)
        .bind(kind)
        .bind(recipient)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
