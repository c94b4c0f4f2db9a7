use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    routes::settlement_response,
    services::{
        gateway::{verify_signature, GatewayError, GatewayEvent, SIGNATURE_HEADER},
        settlement::{GatewayCharge, SettlementRequest},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/webhooks/gateway", axum::routing::post(gateway_webhook))
}

/// 4xx tells the gateway not to retry, 5xx asks it to.
async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<Value>)> {
    let secret = state
        .config
        .gateway_secret_key
        .as_deref()
        .filter(|secret| !secret.is_empty())
        .ok_or(GatewayError::NotConfigured)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(&body, signature, secret) {
        tracing::warn!(
            has_signature = !signature.is_empty(),
            body_bytes = body.len(),
            "Rejected gateway webhook with invalid signature"
        );
        return Err(AppError::Unauthorized(
            "Invalid webhook signature.".to_string(),
        ));
    }

    let event = GatewayEvent::decode(&body).map_err(|error| {
        tracing::warn!(error = %error, "Malformed gateway webhook payload");
        AppError::BadRequest(format!("Malformed webhook payload: {error}"))
    })?;

    let charge = match event {
        GatewayEvent::ChargeSuccess(charge) => charge,
        GatewayEvent::Other(event) => {
            tracing::debug!(event = %event, "Ignoring gateway webhook event");
            return Ok((
                StatusCode::OK,
                Json(json!({ "status": "ignored", "event": event })),
            ));
        }
    };

    if let Some(currency) = charge.currency.as_deref() {
        if !currency.eq_ignore_ascii_case(&state.config.currency) {
            tracing::warn!(
                reference = %charge.reference,
                currency = %currency,
                expected = %state.config.currency,
                "Gateway charge currency differs from the configured currency"
            );
        }
    }

    let outcome = state
        .settlement
        .settle(SettlementRequest::Gateway(GatewayCharge {
            amount: charge.gross(),
            reference: charge.reference,
            paid_at: charge.paid_at,
            channel: charge.channel,
        }))
        .await?;
    Ok(settlement_response(outcome))
}
