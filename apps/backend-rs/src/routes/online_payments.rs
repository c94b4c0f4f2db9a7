use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::require_user_id,
    domain::{OnlinePayment, OnlinePaymentStatus},
    error::{AppError, AppResult},
    money::Money,
    routes::settlement_response,
    schemas::{validate_input, LeasePath, ReferencePath, StartOnlinePaymentInput},
    services::{
        gateway::{InitializeRequest, TransactionState},
        settlement::{GatewayCharge, SettlementRequest},
    },
    state::AppState,
    tenancy::{assert_lease_party, assert_lease_role, LeaseRole},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/leases/{lease_id}/online-payments",
            axum::routing::post(start_online_payment),
        )
        .route(
            "/online-payments/{reference}/verify",
            axum::routing::post(verify_online_payment),
        )
}

fn new_reference() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("RP_{}", hex[..12].to_ascii_uppercase())
}

async fn start_online_payment(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<StartOnlinePaymentInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let lease = assert_lease_role(&state, user_id, path.lease_id, LeaseRole::Tenant).await?;

    let amount = match payload.amount {
        Some(amount) => amount,
        None => state
            .store
            .list_charges(lease.id)
            .await?
            .iter()
            .filter(|charge| charge.status.is_open())
            .map(|charge| charge.outstanding())
            .sum::<Money>(),
    };
    if !amount.is_positive() {
        return Err(AppError::UnprocessableEntity(
            "Nothing to pay: amount must be greater than zero.".to_string(),
        ));
    }
    if !amount.is_storable() {
        return Err(AppError::UnprocessableEntity(format!(
            "amount {amount} is out of range."
        )));
    }

    let reference = new_reference();
    let session = state
        .gateway
        .initialize(&InitializeRequest {
            email: payload.email.trim().to_string(),
            amount,
            reference: reference.clone(),
            callback_url: state.config.gateway_callback_url.clone(),
        })
        .await?;

    let now = Utc::now();
    let online_payment = OnlinePayment {
        id: Uuid::new_v4(),
        reference: reference.clone(),
        lease_id: lease.id,
        tenant_id: lease.tenant_id,
        amount,
        status: OnlinePaymentStatus::Pending,
        access_code: Some(session.access_code.clone()),
        authorization_url: Some(session.authorization_url.clone()),
        created_at: now,
        updated_at: now,
    };
    if let Err(error) = state.store.insert_online_payment(&online_payment).await {
        // The gateway session exists but nothing here will recognise its webhook.
        tracing::error!(
            reference = %reference,
            lease_id = %lease.id,
            error = %error,
            "Could not persist initiated online payment"
        );
        return Err(error.into());
    }

    tracing::info!(reference = %reference, lease_id = %lease.id, amount = %amount, "Online payment initiated");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "reference": reference,
            "amount": amount,
            "status": OnlinePaymentStatus::Pending,
            "authorization_url": session.authorization_url,
            "access_code": session.access_code,
        })),
    ))
}

async fn verify_online_payment(
    State(state): State<AppState>,
    Path(path): Path<ReferencePath>,
    headers: HeaderMap,
) -> AppResult<(StatusCode, Json<Value>)> {
    let user_id = require_user_id(&state, &headers).await?;
    let reference = path.reference.trim().to_string();
    let session = state
        .store
        .get_online_payment(&reference)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Online payment {reference} was not found.")))?;
    assert_lease_party(&state, user_id, session.lease_id).await?;

    let verified = state.gateway.verify(&reference).await?;
    match verified.state {
        TransactionState::Success => {
            let outcome = state
                .settlement
                .settle(SettlementRequest::Gateway(GatewayCharge {
                    reference,
                    amount: verified.charge.gross(),
                    paid_at: verified.charge.paid_at,
                    channel: verified.charge.channel,
                }))
                .await?;
            Ok(settlement_response(outcome))
        }
        TransactionState::Failed | TransactionState::Abandoned => {
            let status = state.settlement.fail_online_payment(&reference).await?;
            Ok((
                StatusCode::OK,
                Json(json!({ "reference": reference, "status": status })),
            ))
        }
        TransactionState::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "reference": reference, "status": session.status })),
        )),
    }
}
