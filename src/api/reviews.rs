// src/api/reviews.rs

use actix_web::{delete, get, post, put, web, HttpResponse};
use uuid::Uuid;
use validator::Validate;

use crate::api::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::{Review, ReviewFilter, ReviewInput, ReviewUpdate};
use crate::AppState;

async fn load_own(state: &AppState, id: Uuid, user: AuthUser) -> AppResult<Review> {
    let review = state
        .store
        .get_review(id)
        .await?
        .ok_or(AppError::NotFound("review"))?;
    if review.reviewer_id != user.0 {
        return Err(AppError::permission("you can only modify your own reviews"));
    }
    Ok(review)
}

#[get("/reviews")]
pub async fn list_reviews(
    state: web::Data<AppState>,
    query: web::Query<ReviewFilter>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.store.list_reviews(&query).await?))
}

#[post("/reviews")]
pub async fn create_review(
    state: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<ReviewInput>,
) -> AppResult<HttpResponse> {
    let input = payload.into_inner();
    input.validate()?;

    if state.store.get_listing(input.listing_id).await?.is_none() {
        return Err(AppError::NotFound("listing"));
    }

    let review = state.store.create_review(user.0, &input).await?;
    log::info!(
        "review created review_id={} listing_id={} reviewer_id={}",
        review.id,
        review.listing_id,
        user.0
    );
    Ok(HttpResponse::Created().json(review))
}

#[get("/reviews/{id}")]
pub async fn get_review(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let review = state
        .store
        .get_review(path.into_inner())
        .await?
        .ok_or(AppError::NotFound("review"))?;
    Ok(HttpResponse::Ok().json(review))
}

#[put("/reviews/{id}")]
pub async fn update_review(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    payload: web::Json<ReviewUpdate>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    load_own(&state, id, user).await?;

    let update = payload.into_inner();
    update.validate()?;
    let review = state
        .store
        .update_review(id, &update)
        .await?
        .ok_or(AppError::NotFound("review"))?;
    Ok(HttpResponse::Ok().json(review))
}

#[delete("/reviews/{id}")]
pub async fn delete_review(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    load_own(&state, id, user).await?;

    if !state.store.delete_review(id).await? {
        return Err(AppError::NotFound("review"));
    }
    Ok(HttpResponse::NoContent().finish())
}
