// src/gateway.rs
//
// Chapa payment gateway (https://api.chapa.co).
// Auth: `Authorization: Bearer <secret key>`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;

pub const CHAPA_API_BASE: &str = "https://api.chapa.co";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway api error status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub tx_ref: String,
    pub amount: Decimal,
    pub currency: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub callback_url: String,
    pub return_url: Option<String>,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
}

impl GatewayStatus {
    pub fn from_gateway(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "successful" | "completed" => GatewayStatus::Success,
            "failed" | "failure" | "cancelled" | "canceled" => GatewayStatus::Failed,
            _ => GatewayStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub status: GatewayStatus,
    /// Gateway-side transaction reference.
    pub reference: Option<String>,
    pub method: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(&self, req: &CheckoutRequest) -> Result<CheckoutSession, GatewayError>;

    /// Fetches the authoritative status of a transaction.
    async fn verify(&self, tx_ref: &str) -> Result<Verification, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct ChapaConfig {
    pub secret_key: String,
    pub base_url: String,
    pub webhook_secret: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    amount: String,
    currency: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
    tx_ref: &'a str,
    callback_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_url: Option<&'a str>,
    customization: Customization<'a>,
}

#[derive(Debug, Serialize)]
struct Customization<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    message: serde_json::Value,
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    checkout_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: Option<String>,
    reference: Option<String>,
    method: Option<String>,
    #[serde(default)]
    amount: serde_json::Value,
    currency: Option<String>,
}

fn message_text(message: &serde_json::Value) -> String {
    match message {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "no message".to_string(),
        other => other.to_string(),
    }
}

fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

#[derive(Clone)]
pub struct ChapaClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl ChapaClient {
    pub fn new(config: &ChapaConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn send_verify(&self, tx_ref: &str) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .get(format!("{}/v1/transaction/verify/{tx_ref}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await
    }
}

#[async_trait]
impl PaymentGateway for ChapaClient {
    async fn create_checkout(&self, req: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        let body = InitializeRequest {
            amount: req.amount.to_string(),
            currency: &req.currency,
            email: &req.email,
            first_name: req.first_name.as_deref(),
            last_name: req.last_name.as_deref(),
            tx_ref: &req.tx_ref,
            callback_url: &req.callback_url,
            return_url: req.return_url.as_deref(),
            customization: Customization {
                title: &req.title,
                description: &req.description,
            },
        };

        let resp = self
            .http
            .post(format!("{}/v1/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: Envelope<InitializeData> = serde_json::from_str(&text)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={text}")))?;
        if parsed.status != "success" {
            return Err(GatewayError::Rejected(message_text(&parsed.message)));
        }

        let data = parsed
            .data
            .ok_or_else(|| GatewayError::InvalidResponse("missing data".to_string()))?;
        Ok(CheckoutSession {
            checkout_url: data.checkout_url,
            reference: req.tx_ref.clone(),
        })
    }

    async fn verify(&self, tx_ref: &str) -> Result<Verification, GatewayError> {
        // Verification is a read, so one retry on a transport failure is safe.
        let resp = match self.send_verify(tx_ref).await {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                log::warn!("chapa verify transport error tx_ref={tx_ref}: {e}; retrying once");
                self.send_verify(tx_ref).await?
            }
            Err(e) => return Err(e.into()),
        };

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: Envelope<VerifyData> = serde_json::from_str(&text)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={text}")))?;
        if parsed.status != "success" {
            return Err(GatewayError::Rejected(message_text(&parsed.message)));
        }

        let data = parsed
            .data
            .ok_or_else(|| GatewayError::InvalidResponse("missing data".to_string()))?;
        Ok(Verification {
            status: data
                .status
                .as_deref()
                .map_or(GatewayStatus::Pending, GatewayStatus::from_gateway),
            reference: data.reference,
            method: data.method,
            amount: decimal_from_json(&data.amount),
            currency: data.currency,
        })
    }
}

/// HMAC-SHA256 of `data` keyed with `secret`, hex encoded.
pub fn sign_hmac_sha256_hex(secret: &str, data: &[u8]) -> String {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature against the body.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
