// src/api/webhooks.rs

use actix_web::{route, web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::api::payments::verify_response;
use crate::error::{AppError, AppResult};
use crate::gateway::verify_signature;
use crate::AppState;

const SIGNATURE_HEADERS: [&str; 2] = ["x-chapa-signature", "chapa-signature"];

#[derive(Debug, Default, Deserialize)]
pub struct ChapaCallback {
    #[serde(default)]
    pub tx_ref: Option<String>,
    #[serde(default)]
    pub trx_ref: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ChapaCallback {
    pub fn reference(&self) -> Option<&str> {
        self.tx_ref
            .as_deref()
            .or(self.trx_ref.as_deref())
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

/// Parses a callback body as JSON or as a urlencoded form.
pub fn parse_callback_body(content_type: &str, body: &[u8]) -> Result<ChapaCallback, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ChapaCallback::default());
    }
    if content_type.contains("application/x-www-form-urlencoded") {
        return serde_urlencoded::from_bytes(body).map_err(|e| format!("invalid form body: {e}"));
    }
    match serde_json::from_slice(body) {
        Ok(parsed) => Ok(parsed),
        Err(json_err) if content_type.contains("json") => {
            Err(format!("invalid json body: {json_err}"))
        }
        Err(json_err) => serde_urlencoded::from_bytes(body)
            .map_err(|_| format!("invalid callback body: {json_err}")),
    }
}

pub fn extract_signature(req: &HttpRequest) -> Option<String> {
    SIGNATURE_HEADERS.iter().find_map(|name| {
        req.headers()
            .get(*name)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.trim().to_string())
    })
}

/// Chapa callback: server POST (JSON or form) or browser GET redirect.
/// The payment is always re-verified with the gateway.
#[route("/payments/verify", method = "GET", method = "POST")]
pub async fn chapa_callback(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let from_query: ChapaCallback = web::Query::<ChapaCallback>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .unwrap_or_default();

    let from_body = if body.is_empty() {
        ChapaCallback::default()
    } else {
        if let Some(secret) = state.webhook_secret.as_deref() {
            let signature = extract_signature(&req)
                .ok_or_else(|| AppError::Unauthorized("missing webhook signature".to_string()))?;
            if !verify_signature(secret, &body, &signature) {
                log::warn!("chapa callback rejected: bad signature");
                return Err(AppError::Unauthorized("invalid webhook signature".to_string()));
            }
        }
        let content_type = req
            .headers()
            .get(actix_web::http::header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");
        parse_callback_body(content_type, &body).map_err(|e| AppError::Validation {
            field: None,
            message: e,
        })?
    };

    let reference = from_body
        .reference()
        .or_else(|| from_query.reference())
        .map(str::to_string)
        .ok_or_else(|| AppError::validation("tx_ref", "tx_ref is required"))?;

    log::info!(
        "chapa callback received tx_ref={reference} reported_status={:?}",
        from_body.status.as_deref().or(from_query.status.as_deref())
    );

    let outcome = state.payments.verify(&reference).await?;
    Ok(HttpResponse::Ok().json(verify_response(&outcome)))
}
