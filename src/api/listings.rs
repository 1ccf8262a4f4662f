// src/api/listings.rs

use actix_web::{delete, get, patch, post, put, web, HttpResponse};
use uuid::Uuid;
use validator::Validate;

use crate::api::auth::AuthUser;
use crate::db::StoreError;
use crate::error::{AppError, AppResult};
use crate::models::{Listing, ListingFilter, ListingInput, ListingPatch, ReviewFilter};
use crate::AppState;

async fn load(state: &AppState, id: Uuid) -> AppResult<Listing> {
    state
        .store
        .get_listing(id)
        .await?
        .ok_or(AppError::NotFound("listing"))
}

async fn load_owned(state: &AppState, id: Uuid, user: AuthUser) -> AppResult<Listing> {
    let listing = load(state, id).await?;
    if listing.host_id != user.0 {
        return Err(AppError::permission("you can only modify your own listings"));
    }
    Ok(listing)
}

#[get("/listings")]
pub async fn list_listings(
    state: web::Data<AppState>,
    query: web::Query<ListingFilter>,
) -> AppResult<HttpResponse> {
    let mut filter = query.into_inner();
    filter.host_id = None;
    let listings = state.store.list_listings(&filter).await?;
    Ok(HttpResponse::Ok().json(listings))
}

#[post("/listings")]
pub async fn create_listing(
    state: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<ListingInput>,
) -> AppResult<HttpResponse> {
    let input = payload.into_inner();
    input.validate()?;

    let listing = state.store.create_listing(user.0, &input).await?;
    log::info!("listing created listing_id={} host_id={}", listing.id, user.0);
    Ok(HttpResponse::Created().json(listing))
}

#[get("/listings/my_listings")]
pub async fn my_listings(state: web::Data<AppState>, user: AuthUser) -> AppResult<HttpResponse> {
    let filter = ListingFilter {
        host_id: Some(user.0),
        ..ListingFilter::default()
    };
    Ok(HttpResponse::Ok().json(state.store.list_listings(&filter).await?))
}

#[get("/listings/available")]
pub async fn available_listings(
    state: web::Data<AppState>,
    query: web::Query<ListingFilter>,
) -> AppResult<HttpResponse> {
    let filter = ListingFilter {
        is_available: Some(true),
        host_id: None,
        ..query.into_inner()
    };
    Ok(HttpResponse::Ok().json(state.store.list_listings(&filter).await?))
}

#[get("/listings/{id}")]
pub async fn get_listing(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let listing = load(&state, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[put("/listings/{id}")]
pub async fn replace_listing(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    payload: web::Json<ListingInput>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    load_owned(&state, id, user).await?;

    let input = payload.into_inner();
    input.validate()?;
    let listing = state
        .store
        .update_listing(id, &input)
        .await?
        .ok_or(AppError::NotFound("listing"))?;
    Ok(HttpResponse::Ok().json(listing))
}

#[patch("/listings/{id}")]
pub async fn update_listing(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    payload: web::Json<ListingPatch>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let current = load_owned(&state, id, user).await?;

    let input = payload.into_inner().apply(&current);
    input.validate()?;
    let listing = state
        .store
        .update_listing(id, &input)
        .await?
        .ok_or(AppError::NotFound("listing"))?;
    Ok(HttpResponse::Ok().json(listing))
}

#[delete("/listings/{id}")]
pub async fn delete_listing(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    load_owned(&state, id, user).await?;

    let deleted = state.store.delete_listing(id).await.map_err(|e| match e {
        StoreError::Referenced(_) => {
            AppError::conflict("cannot delete a listing with paid bookings")
        }
        other => other.into(),
    })?;
    if !deleted {
        return Err(AppError::NotFound("listing"));
    }
    log::info!("listing deleted listing_id={id} host_id={}", user.0);
    Ok(HttpResponse::NoContent().finish())
}

#[get("/listings/{id}/reviews")]
pub async fn listing_reviews(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let listing = load(&state, path.into_inner()).await?;
    let filter = ReviewFilter {
        listing_id: Some(listing.id),
        ..ReviewFilter::default()
    };
    Ok(HttpResponse::Ok().json(state.store.list_reviews(&filter).await?))
}
