use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha512;

use crate::{config::AppConfig, money::Money};

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured")]
    NotConfigured,
    #[error("payment gateway timed out")]
    Timeout,
    #[error("payment gateway request failed: {0}")]
    Transport(String),
    #[error("payment gateway error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("unexpected payment gateway response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Whether the caller should try again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::NotConfigured | Self::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            tracing::error!(error = %error, "Payment gateway request timed out");
            return Self::Timeout;
        }
        tracing::error!(error = %error, "Payment gateway request failed");
        Self::Transport(error.to_string())
    }
}

/// Verify the gateway's webhook signature: hex HMAC-SHA512 of the raw body.
pub fn verify_signature(payload: &[u8], signature_hex: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex_decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

/// Successful charge as reported by the gateway. `amount` is in minor units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChargeData {
    pub reference: String,
    pub amount: i64,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl ChargeData {
    pub fn gross(&self) -> Money {
        Money::from_minor(self.amount)
    }
}

/// Webhook events, decoded once from the raw body.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    ChargeSuccess(ChargeData),
    /// Any other event type; acknowledged and ignored.
    Other(String),
}

#[derive(Deserialize)]
struct EventEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl GatewayEvent {
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: EventEnvelope = serde_json::from_slice(body)?;
        match envelope.event.as_str() {
            "charge.success" => Ok(Self::ChargeSuccess(serde_json::from_value(envelope.data)?)),
            _ => Ok(Self::Other(envelope.event)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    pub amount: Money,
    pub reference: String,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitializedSession {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Success,
    Failed,
    Abandoned,
    /// Still in flight at the gateway.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedTransaction {
    pub state: TransactionState,
    pub charge: ChargeData,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializedSession, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<VerifiedTransaction, GatewayError>;
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    #[serde(flatten)]
    charge: ChargeData,
}

#[derive(Clone)]
pub struct PaystackGateway {
    http_client: Client,
    api_base: String,
    secret_key: Option<String>,
    currency: String,
}

impl PaystackGateway {
    pub fn new(http_client: Client, config: &AppConfig) -> Self {
        Self {
            http_client,
            api_base: config.gateway_api_base.trim_end_matches('/').to_string(),
            secret_key: config.gateway_secret_key.clone(),
            currency: config.currency.clone(),
        }
    }

    pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
    }

    fn secret_key(&self) -> Result<&str, GatewayError> {
        self.secret_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(GatewayError::NotConfigured)
    }

    async fn read_envelope<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let body: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|error| GatewayError::Malformed(error.to_string()))?;

        if !status.is_success() || !body.status {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: if body.message.is_empty() {
                    "Unknown gateway error".to_string()
                } else {
                    body.message
                },
            });
        }
        body.data
            .ok_or_else(|| GatewayError::Malformed("response has no data".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializedSession, GatewayError> {
        let secret_key = self.secret_key()?;
        let amount = request
            .amount
            .to_minor()
            .ok_or_else(|| GatewayError::Malformed("amount out of range".to_string()))?;

        let mut body = json!({
            "email": request.email,
            "amount": amount,
            "currency": self.currency,
            "reference": request.reference,
        });
        if let Some(callback_url) = &request.callback_url {
            body["callback_url"] = Value::String(callback_url.clone());
        }

        let response = self
            .http_client
            .post(format!("{}/transaction/initialize", self.api_base))
            .bearer_auth(secret_key)
            .json(&body)
            .send()
            .await?;

        Self::read_envelope(response).await
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedTransaction, GatewayError> {
        let secret_key = self.secret_key()?;
        let response = self
            .http_client
            .get(format!("{}/transaction/verify/{reference}", self.api_base))
            .bearer_auth(secret_key)
            .send()
            .await?;

        let data: VerifyData = Self::read_envelope(response).await?;
        let state = match data.status.as_str() {
            "success" => TransactionState::Success,
            "failed" | "reversed" => TransactionState::Failed,
            "abandoned" => TransactionState::Abandoned,
            _ => TransactionState::Pending,
        };
        Ok(VerifiedTransaction {
            state,
            charge: data.charge,
        })
    }
}
