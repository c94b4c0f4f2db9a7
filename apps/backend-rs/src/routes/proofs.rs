use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{
    auth::require_user_id,
    domain::LedgerSource,
    error::{AppError, AppResult},
    money::Money,
    routes::settlement_response,
    schemas::{validate_input, LeasePath, LedgerPath, ProofsQuery, RejectProofInput},
    services::{
        documents::validate_proof,
        settlement::{ProofApproval, ProofReceipt, ProofSubmission, SettlementRequest},
    },
    state::AppState,
    tenancy::{assert_lease_role, LeaseRole},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/leases/{lease_id}/payment-proofs",
            axum::routing::post(submit_proof),
        )
        .route("/payment-proofs", axum::routing::get(list_proofs))
        .route(
            "/payment-proofs/{ledger_id}/approve",
            axum::routing::post(approve_proof),
        )
        .route(
            "/payment-proofs/{ledger_id}/reject",
            axum::routing::post(reject_proof),
        )
}

struct UploadedFile {
    file_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct ProofForm {
    file: Option<UploadedFile>,
    amount: Option<String>,
    reference: Option<String>,
}

async fn read_proof_form(mut multipart: Multipart, max_bytes: usize) -> AppResult<ProofForm> {
    let mut form = ProofForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::BadRequest(format!("Invalid multipart body: {error}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                let file_name = field.file_name().unwrap_or("proof").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|error| {
                    AppError::BadRequest(format!("Could not read uploaded file: {error}"))
                })?;
                if bytes.len() > max_bytes {
                    return Err(AppError::PayloadTooLarge(format!(
                        "file exceeds the {max_bytes} byte limit"
                    )));
                }
                form.file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "amount" => form.amount = Some(read_text(field).await?),
            "reference" => form.reference = Some(read_text(field).await?),
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map(|value| value.trim().to_string())
        .map_err(|error| AppError::BadRequest(format!("Invalid form field: {error}")))
}

async fn submit_proof(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let lease = assert_lease_role(&state, user_id, path.lease_id, LeaseRole::Tenant).await?;

    let form = read_proof_form(multipart, state.config.proof_max_bytes).await?;
    let file = form
        .file
        .ok_or_else(|| AppError::UnprocessableEntity("file is required.".to_string()))?;
    let amount = form
        .amount
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::UnprocessableEntity("amount is required.".to_string()))
        .and_then(|raw| {
            Money::parse(raw).map_err(|_| {
                AppError::UnprocessableEntity(format!("amount '{raw}' is not a number."))
            })
        })?;
    if !amount.is_positive() || !amount.is_storable() {
        return Err(AppError::UnprocessableEntity(format!(
            "amount {amount} is out of range."
        )));
    }
    let reference = form
        .reference
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::UnprocessableEntity("reference is required.".to_string()))?;

    let content_type = validate_proof(
        file.content_type.as_deref(),
        &file.bytes,
        state.config.proof_max_bytes,
    )?;
    let document = state
        .documents
        .put(lease.id, &file.file_name, content_type, &file.bytes)
        .await?;
    let document_key = document.key.clone();

    let result = state
        .settlement
        .submit_proof(ProofSubmission {
            actor_id: user_id,
            lease_id: lease.id,
            amount,
            reference,
            document,
        })
        .await;

    let (status, entry) = match result {
        Ok(ProofReceipt::Created(entry)) => (StatusCode::CREATED, entry),
        Ok(ProofReceipt::Existing(entry)) => {
            discard_document(&state, &document_key).await;
            (StatusCode::OK, entry)
        }
        Err(error) => {
            discard_document(&state, &document_key).await;
            return Err(error.into());
        }
    };
    Ok((status, Json(entry)))
}

/// Best effort; an orphaned file is only wasted space.
async fn discard_document(state: &AppState, key: &str) {
    if let Err(error) = state.documents.remove(key).await {
        tracing::warn!(key = %key, error = %error, "Could not remove unused payment proof");
    }
}

async fn list_proofs(
    State(state): State<AppState>,
    Query(query): Query<ProofsQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let entries: Vec<_> = state
        .store
        .list_ledger_for_landlord(user_id, query.status)
        .await?
        .into_iter()
        .filter(|entry| entry.source == LedgerSource::Proof)
        .collect();
    Ok(Json(json!({ "data": entries })))
}

async fn approve_proof(
    State(state): State<AppState>,
    Path(path): Path<LedgerPath>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let outcome = state
        .settlement
        .settle(SettlementRequest::ProofApproval(ProofApproval {
            actor_id: user_id,
            ledger_id: path.ledger_id,
        }))
        .await?;
    Ok(settlement_response(outcome))
}

async fn reject_proof(
    State(state): State<AppState>,
    Path(path): Path<LedgerPath>,
    headers: HeaderMap,
    payload: Option<Json<RejectProofInput>>,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = payload.unwrap_or_default();
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;

    let entry = state
        .settlement
        .reject_proof(user_id, path.ledger_id, payload.reason)
        .await?;
    Ok(Json(entry))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use uuid::Uuid;

    use crate::{
        domain::Notice,
        routes::test_support::{get_request, json_request, test_app, FakeGateway, TestApp},
    };

    const BOUNDARY: &str = "proof-boundary";
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn proof_upload(
        app: &TestApp,
        user: Uuid,
        amount: &str,
        reference: &str,
        file: &[u8],
        content_type: &str,
    ) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in [("amount", amount), ("reference", reference)] {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"slip.png\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(file);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(format!("/v1/leases/{}/payment-proofs", app.lease.id))
            .header("x-user-id", user.to_string())
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn tenant_submits_and_landlord_approves() {
        let app = test_app(FakeGateway::default()).await;
        let tenant = app.lease.tenant_id;
        let landlord = app.lease.landlord_id;

        let (status, entry) = app
            .send(proof_upload(&app, tenant, "1000", "EFT-2026-01", PNG, "image/png"))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(entry["status"], "PENDING");
        assert_eq!(entry["source"], "PROOF");
        assert_eq!(entry["platform_fee"], "0.00");
        assert_eq!(entry["document"]["content_type"], "image/png");

        let (status, again) = app
            .send(proof_upload(&app, tenant, "1000", "EFT-2026-01", PNG, "image/png"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["id"], entry["id"]);

        let (_, queue) = app
            .send(get_request("/v1/payment-proofs?status=PENDING", Some(landlord)))
            .await;
        assert_eq!(queue["data"].as_array().unwrap().len(), 1);

        let approve = format!("/v1/payment-proofs/{}/approve", entry["id"].as_str().unwrap());
        let (status, _) = app
            .send(json_request("POST", &approve, Some(tenant), json!({})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, receipt) = app
            .send(json_request("POST", &approve, Some(landlord), json!({})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(receipt["ledger"]["status"], "SUCCESS");
        assert_eq!(receipt["payment"]["reference"], "EFT-2026-01");

        let (status, replay) = app
            .send(json_request("POST", &approve, Some(landlord), json!({})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay["status"], "already_processed");

        let snapshot = app.store.snapshot().await;
        assert_eq!(snapshot.payments.len(), 1);
        assert!(snapshot.payouts.is_empty());
    }

    #[tokio::test]
    async fn landlord_rejects_with_reason() {
        let app = test_app(FakeGateway::default()).await;
        let (_, entry) = app
            .send(proof_upload(&app, app.lease.tenant_id, "250.5", "EFT-9", PNG, "image/png"))
            .await;
        let reject = format!("/v1/payment-proofs/{}/reject", entry["id"].as_str().unwrap());

        let (status, rejected) = app
            .send(json_request(
                "POST",
                &reject,
                Some(app.lease.landlord_id),
                json!({ "reason": "  Amount does not match the slip " }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rejected["status"], "FAILED");
        assert_eq!(rejected["failure_reason"], "Amount does not match the slip");

        let approve = format!("/v1/payment-proofs/{}/approve", entry["id"].as_str().unwrap());
        let (status, _) = app
            .send(json_request("POST", &approve, Some(app.lease.landlord_id), json!({})))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let snapshot = app.store.snapshot().await;
        assert!(snapshot.payments.is_empty());
        assert!(snapshot
            .notifications
            .iter()
            .any(|event| matches!(event.notice, Notice::ProofRejected { .. })
                && event.recipient_id == app.lease.tenant_id));
    }

    #[tokio::test]
    async fn rejects_bad_uploads() {
        let app = test_app(FakeGateway::default()).await;
        let tenant = app.lease.tenant_id;

        let (status, _) = app
            .send(proof_upload(&app, tenant, "100", "EFT-1", b"plain text", "text/plain"))
            .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let (status, _) = app
            .send(proof_upload(&app, tenant, "100", "EFT-1", &[0xFF; 2048], "image/jpeg"))
            .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let (status, _) = app
            .send(proof_upload(&app, tenant, "abc", "EFT-1", PNG, "image/png"))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = app
            .send(proof_upload(
                &app,
                tenant,
                "79228162514264337593543950335",
                "EFT-1",
                PNG,
                "image/png",
            ))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = app
            .send(proof_upload(&app, app.lease.landlord_id, "100", "EFT-1", PNG, "image/png"))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        assert!(app.store.snapshot().await.ledger.is_empty());
    }
}
