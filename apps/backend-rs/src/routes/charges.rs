use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{
    auth::require_user_id, error::AppResult, schemas::LeasePath, state::AppState,
    tenancy::assert_lease_party,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/leases/{lease_id}/charges",
        axum::routing::get(list_charges),
    )
}

async fn list_charges(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_lease_party(&state, user_id, path.lease_id).await?;

    let charges = state.store.list_charges(path.lease_id).await?;
    Ok(Json(json!({ "data": charges })))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use uuid::Uuid;

    use crate::routes::test_support::{get_request, test_app, FakeGateway};

    #[tokio::test]
    async fn lists_charges_for_lease_parties_only() {
        let app = test_app(FakeGateway::default()).await;
        let uri = format!("/v1/leases/{}/charges", app.lease.id);

        let (status, body) = app.send(get_request(&uri, Some(app.lease.tenant_id))).await;
        assert_eq!(status, StatusCode::OK);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["month"], "2026-01");
        assert_eq!(data[0]["status"], "UNPAID");

        let (status, _) = app.send(get_request(&uri, Some(Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.send(get_request(&uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
