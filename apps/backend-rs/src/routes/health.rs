use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let (store, db_ok) = if let Some(pool) = &state.db_pool {
        // Short timeout so the healthcheck answers even when the first
        // connection hangs.
        let ok = match tokio::time::timeout(
            Duration::from_secs(3),
            sqlx::query("SELECT 1").fetch_one(pool),
        )
        .await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Health check DB query failed");
                false
            }
            Err(_) => {
                tracing::error!("Health check DB query timed out (3s)");
                false
            }
        };
        ("postgres", ok)
    } else {
        ("memory", true)
    };

    let status = if db_ok { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "app": state.config.app_name,
        "store": store,
        "now": Utc::now().to_rfc3339(),
        "db": db_ok
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::routes::test_support::{get_request, test_app, FakeGateway};

    #[tokio::test]
    async fn reports_memory_store_as_healthy() {
        let app = test_app(FakeGateway::default()).await;
        let (status, body) = app.send(get_request("/v1/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "memory");
    }
}
