// src/api/mod.rs

pub mod auth;
pub mod bookings;
pub mod listings;
pub mod payments;
pub mod reviews;
pub mod webhooks;

use actix_web::{get, web, HttpResponse, Responder};

use crate::error::AppError;

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

fn bad_request(message: String) -> actix_web::Error {
    AppError::Validation {
        field: None,
        message,
    }
    .into()
}

/// Registers every route. Fixed segments (`my_listings`, `available`,
/// `my_bookings`, `verify`) go before their `{id}` siblings.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _| bad_request(err.to_string())))
        .app_data(web::QueryConfig::default().error_handler(|err, _| bad_request(err.to_string())))
        .service(health)
        .service(auth::register)
        .service(auth::login)
        .service(
            web::scope("/api")
                .wrap(auth::JwtMiddleware)
                .service(listings::list_listings)
                .service(listings::create_listing)
                .service(listings::my_listings)
                .service(listings::available_listings)
                .service(listings::listing_reviews)
                .service(listings::get_listing)
                .service(listings::replace_listing)
                .service(listings::update_listing)
                .service(listings::delete_listing)
                .service(bookings::list_bookings)
                .service(bookings::create_booking)
                .service(bookings::my_bookings)
                .service(bookings::cancel_booking)
                .service(bookings::confirm_booking)
                .service(bookings::initiate_booking_payment)
                .service(bookings::get_booking)
                .service(bookings::reschedule_booking)
                .service(bookings::delete_booking)
                .service(reviews::list_reviews)
                .service(reviews::create_review)
                .service(reviews::get_review)
                .service(reviews::update_review)
                .service(reviews::delete_review)
                .service(webhooks::chapa_callback)
                .service(payments::list_payments)
                .service(payments::initiate_payment)
                .service(payments::verify_status)
                .service(payments::get_payment),
        );
}
