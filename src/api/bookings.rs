// src/api/bookings.rs

use actix_web::{delete, get, patch, post, put, web, HttpResponse};
use uuid::Uuid;

use crate::api::auth::AuthUser;
use crate::error::AppResult;
use crate::models::{BookingFilter, BookingRequest, RescheduleRequest};
use crate::AppState;

#[get("/bookings")]
pub async fn list_bookings(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<BookingFilter>,
) -> AppResult<HttpResponse> {
    let bookings = state.bookings.list(user.0, query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(bookings))
}

#[post("/bookings")]
pub async fn create_booking(
    state: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<BookingRequest>,
) -> AppResult<HttpResponse> {
    let detail = state.bookings.create(user.0, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(detail))
}

#[get("/bookings/my_bookings")]
pub async fn my_bookings(state: web::Data<AppState>, user: AuthUser) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.bookings.my_bookings(user.0).await?))
}

#[get("/bookings/{id}")]
pub async fn get_booking(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let detail = state.bookings.get(path.into_inner(), user.0).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[put("/bookings/{id}")]
pub async fn reschedule_booking(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    payload: web::Json<RescheduleRequest>,
) -> AppResult<HttpResponse> {
    let detail = state
        .bookings
        .reschedule(path.into_inner(), user.0, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[delete("/bookings/{id}")]
pub async fn delete_booking(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    state.bookings.delete(path.into_inner(), user.0).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[patch("/bookings/{id}/cancel")]
pub async fn cancel_booking(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let booking = state.bookings.cancel(path.into_inner(), user.0).await?;
    Ok(HttpResponse::Ok().json(booking))
}

#[patch("/bookings/{id}/confirm")]
pub async fn confirm_booking(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let booking = state.bookings.confirm(path.into_inner(), user.0).await?;
    Ok(HttpResponse::Ok().json(booking))
}

#[post("/bookings/{id}/initiate_payment")]
pub async fn initiate_booking_payment(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let started = state.payments.initiate(path.into_inner(), user.0).await?;
    Ok(HttpResponse::Ok().json(started))
}
