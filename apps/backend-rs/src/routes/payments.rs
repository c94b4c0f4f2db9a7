use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::{
    auth::require_user_id,
    error::AppResult,
    routes::settlement_response,
    schemas::{validate_input, CreateManualPaymentInput, LeasePath},
    services::settlement::{ManualEntry, SettlementRequest},
    state::AppState,
    tenancy::{assert_lease_party, assert_lease_role, LeaseRole},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/leases/{lease_id}/payments",
        axum::routing::get(list_payments).post(create_manual_payment),
    )
}

async fn list_payments(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_lease_party(&state, user_id, path.lease_id).await?;

    let payments = state.store.list_payments(path.lease_id).await?;
    Ok(Json(json!({ "data": payments })))
}

async fn create_manual_payment(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<CreateManualPaymentInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    assert_lease_role(&state, user_id, path.lease_id, LeaseRole::Landlord).await?;

    let outcome = state
        .settlement
        .settle(SettlementRequest::Manual(ManualEntry {
            actor_id: user_id,
            lease_id: path.lease_id,
            amount: payload.amount,
            method: payload.method,
            date_paid: payload.date_paid.unwrap_or_else(|| Utc::now().date_naive()),
            reference: payload.reference,
            notes: payload.notes,
        }))
        .await?;

    Ok(settlement_response(outcome))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::routes::test_support::{get_request, json_request, test_app, FakeGateway};

    #[tokio::test]
    async fn landlord_records_manual_payment_across_charges() {
        let app = test_app(FakeGateway::default()).await;
        let uri = format!("/v1/leases/{}/payments", app.lease.id);

        let (status, body) = app
            .send(json_request(
                "POST",
                &uri,
                Some(app.lease.landlord_id),
                json!({ "amount": "1500.00", "method": "CASH", "date_paid": "2026-02-05" }),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "settled");
        assert_eq!(body["allocations"].as_array().unwrap().len(), 2);
        assert_eq!(body["ledger"]["status"], "SUCCESS");
        assert!(body["ledger"]["reference"]
            .as_str()
            .unwrap()
            .starts_with("MANUAL_"));

        let (_, charges) = app
            .send(get_request(
                &format!("/v1/leases/{}/charges", app.lease.id),
                Some(app.lease.tenant_id),
            ))
            .await;
        assert_eq!(charges["data"][0]["status"], "PAID");
        assert_eq!(charges["data"][1]["status"], "PARTIAL");
        assert_eq!(charges["data"][1]["amount_paid"], "500.00");

        let (status, listed) = app.send(get_request(&uri, Some(app.lease.tenant_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_reference_is_already_processed() {
        let app = test_app(FakeGateway::default()).await;
        let uri = format!("/v1/leases/{}/payments", app.lease.id);
        let payload = json!({ "amount": 200, "method": "BANK_TRANSFER", "reference": "EFT-778" });

        let (first, _) = app
            .send(json_request("POST", &uri, Some(app.lease.landlord_id), payload.clone()))
            .await;
        let (second, body) = app
            .send(json_request("POST", &uri, Some(app.lease.landlord_id), payload))
            .await;
        assert_eq!(first, StatusCode::CREATED);
        assert_eq!(second, StatusCode::OK);
        assert_eq!(body["status"], "already_processed");
        assert_eq!(body["reference"], "EFT-778");
        assert_eq!(app.store.snapshot().await.payments.len(), 1);
    }

    #[tokio::test]
    async fn rejects_tenants_and_invalid_amounts() {
        let app = test_app(FakeGateway::default()).await;
        let uri = format!("/v1/leases/{}/payments", app.lease.id);

        let (status, _) = app
            .send(json_request(
                "POST",
                &uri,
                Some(app.lease.tenant_id),
                json!({ "amount": 100, "method": "CASH" }),
            ))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .send(json_request(
                "POST",
                &uri,
                Some(app.lease.landlord_id),
                json!({ "amount": 0, "method": "CASH" }),
            ))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());

        let (status, _) = app
            .send(json_request(
                "POST",
                &uri,
                Some(app.lease.landlord_id),
                json!({ "amount": 100, "method": "ONLINE" }),
            ))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = app
            .send(json_request(
                "POST",
                &uri,
                Some(app.lease.landlord_id),
                json!({ "amount": "79228162514264337593543950335", "method": "CASH" }),
            ))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(app.store.snapshot().await.payments.is_empty());
    }
}
