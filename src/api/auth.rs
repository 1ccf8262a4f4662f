// src/api/auth.rs

use actix_web::body::MessageBody;
use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{post, web, Error, FromRequest, HttpMessage, HttpRequest, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::task::{Context, Poll};
use validator::Validate;

use crate::db::{NewUser, StoreError};
use crate::error::{AppError, AppResult};
use crate::models::{User, UserId};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: UserId,
    exp: usize,
}

/// HS256 signing settings for access tokens.
#[derive(Debug, Clone)]
pub struct JwtKeys {
    secret: String,
    ttl_days: i64,
}

impl JwtKeys {
    pub fn new(secret: impl Into<String>, ttl_days: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_days,
        }
    }

    pub fn issue(&self, user_id: UserId) -> AppResult<String> {
        let expiration = Utc::now()
            .checked_add_signed(Duration::days(self.ttl_days))
            .ok_or_else(|| AppError::Internal("token expiry overflow".to_string()))?
            .timestamp() as usize;

        let claims = Claims {
            sub: user_id,
            exp: expiration,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("jwt encode error: {e}")))
    }

    pub fn verify(&self, token: &str) -> Option<UserId> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .ok()
        .map(|data| data.claims.sub)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 150))]
    pub username: Option<String>,
    #[validate(length(max = 150))]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[post("/auth/register")]
pub async fn register(
    state: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> AppResult<HttpResponse> {
    let payload = payload.into_inner();
    payload.validate()?;

    let email = payload.email.trim().to_ascii_lowercase();
    let username = payload
        .username
        .clone()
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

    let password_hash = hash(&payload.password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("bcrypt hash error: {e}")))?;

    let user = state
        .store
        .create_user(NewUser {
            username,
            email,
            password_hash,
            first_name: payload.first_name,
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(_) => AppError::validation("email", "email is already registered"),
            other => other.into(),
        })?;

    let token = state.jwt.issue(user.id)?;
    log::info!("user registered user_id={}", user.id);
    Ok(HttpResponse::Created().json(AuthResponse { token, user }))
}

#[post("/auth/login")]
pub async fn login(
    state: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> AppResult<HttpResponse> {
    let invalid = || AppError::Unauthorized("invalid credentials".to_string());

    let email = payload.email.trim().to_ascii_lowercase();
    let Some((user, password_hash)) = state.store.find_user_credentials(&email).await? else {
        return Err(invalid());
    };

    match verify(&payload.password, &password_hash) {
        Ok(true) => {}
        Ok(false) => return Err(invalid()),
        Err(e) => return Err(AppError::Internal(format!("bcrypt verify error: {e}"))),
    }

    let token = state.jwt.issue(user.id)?;
    Ok(HttpResponse::Ok().json(AuthResponse { token, user }))
}

/// Middleware that:
/// - reads `Authorization: Bearer <jwt>` when present
/// - validates the JWT against the app's signing key
/// - puts the `UserId` into `req.extensions_mut()`
///
/// Requests without a token pass through anonymously; handlers that need a
/// user take an [`AuthUser`].
pub struct JwtMiddleware;

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtMiddlewareInner<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtMiddlewareInner { service }))
    }
}

pub struct JwtMiddlewareInner<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareInner<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        if let Some(token) = token {
            let Some(state) = req.app_data::<web::Data<AppState>>() else {
                return Box::pin(async {
                    Err(AppError::Internal("application state missing".to_string()).into())
                });
            };
            match state.jwt.verify(&token) {
                Some(user_id) => {
                    req.extensions_mut().insert(user_id);
                }
                None => {
                    return Box::pin(async {
                        Err(AppError::Unauthorized("invalid token".to_string()).into())
                    });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await })
    }
}

/// The authenticated caller. Rejects anonymous requests with 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<UserId>()
                .copied()
                .map(AuthUser)
                .ok_or_else(|| AppError::Unauthorized("authentication required".to_string())),
        )
    }
}
