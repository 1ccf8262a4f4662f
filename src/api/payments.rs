// src/api/payments.rs

use actix_web::{get, post, web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use crate::api::auth::AuthUser;
use crate::error::AppResult;
use crate::models::PaymentFilter;
use crate::payment::VerifyOutcome;
use crate::AppState;

pub(crate) fn verify_response(outcome: &VerifyOutcome) -> serde_json::Value {
    json!({
        "status": outcome.payment.status,
        "payment_id": outcome.payment.id,
        "booking_id": outcome.payment.booking_id,
        "booking_status": outcome.booking_status,
        "amount": outcome.payment.amount,
        "currency": outcome.payment.currency,
        "transaction_id": outcome.payment.transaction_id,
        "changed": outcome.changed,
    })
}

#[get("/payments")]
pub async fn list_payments(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<PaymentFilter>,
) -> AppResult<HttpResponse> {
    let payments = state.payments.list(user.0, query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(payments))
}

#[get("/payments/{id}")]
pub async fn get_payment(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let payment = state.payments.get(path.into_inner(), user.0).await?;
    Ok(HttpResponse::Ok().json(payment))
}

#[post("/payments/{id}/initiate_payment")]
pub async fn initiate_payment(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let started = state
        .payments
        .initiate_for_payment(path.into_inner(), user.0)
        .await?;
    Ok(HttpResponse::Ok().json(started))
}

#[post("/payments/{id}/verify_status")]
pub async fn verify_status(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let outcome = state.payments.verify_status(path.into_inner(), user.0).await?;
    Ok(HttpResponse::Ok().json(verify_response(&outcome)))
}
