use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::{services::settlement::SettlementOutcome, state::AppState};

pub mod charges;
pub mod cron;
pub mod health;
pub mod online_payments;
pub mod payments;
pub mod proofs;
pub mod webhooks;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(charges::router())
        .merge(payments::router())
        .merge(proofs::router())
        .merge(online_payments::router())
        .merge(webhooks::router())
        .merge(cron::router())
}

/// 201 with the receipt for a new settlement, 200 for an idempotent replay.
pub(crate) fn settlement_response(outcome: SettlementOutcome) -> (StatusCode, Json<Value>) {
    let status = if outcome.is_settled() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let body = serde_json::to_value(&outcome)
        .unwrap_or_else(|_| json!({ "status": "settled" }));
    (status, Json(body))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::v1_router;
    use crate::{
        config::AppConfig,
        domain::{BillingMonth, Lease, LeaseStatus, RentCharge},
        money::Money,
        repository::memory::MemoryStore,
        services::{
            documents::LocalDocumentStore,
            gateway::{
                ChargeData, GatewayError, InitializeRequest, InitializedSession, PaymentGateway,
                TransactionState, VerifiedTransaction,
            },
        },
        state::AppState,
    };

    pub const WEBHOOK_SECRET: &str = "sk_test_webhook";
    pub const CRON_SECRET: &str = "cron-test-secret";

    #[derive(Debug, Clone, Default)]
    pub struct FakeGateway {
        pub verify_state: Option<TransactionState>,
        pub verify_amount_minor: i64,
        pub times_out: bool,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn initialize(
            &self,
            request: &InitializeRequest,
        ) -> Result<InitializedSession, GatewayError> {
            if self.times_out {
                return Err(GatewayError::Timeout);
            }
            Ok(InitializedSession {
                authorization_url: format!("https://checkout.test/{}", request.reference),
                access_code: "ac_test".to_string(),
                reference: request.reference.clone(),
            })
        }

        async fn verify(&self, reference: &str) -> Result<VerifiedTransaction, GatewayError> {
            if self.times_out {
                return Err(GatewayError::Timeout);
            }
            Ok(VerifiedTransaction {
                state: self.verify_state.unwrap_or(TransactionState::Pending),
                charge: ChargeData {
                    reference: reference.to_string(),
                    amount: self.verify_amount_minor,
                    paid_at: None,
                    channel: Some("card".to_string()),
                    currency: Some("ZAR".to_string()),
                },
            })
        }
    }

    pub struct TestApp {
        pub store: MemoryStore,
        pub state: AppState,
        pub lease: Lease,
    }

    pub fn test_config() -> AppConfig {
        let mut config = AppConfig::from_env();
        config.environment = "test".to_string();
        config.api_prefix = "/v1".to_string();
        config.dev_auth_overrides_enabled = true;
        config.gateway_secret_key = Some(WEBHOOK_SECRET.to_string());
        config.cron_secret = Some(CRON_SECRET.to_string());
        config.platform_fee_percent = rust_decimal::Decimal::TWO;
        config.proof_max_bytes = 1024;
        config.document_storage_dir = std::env::temp_dir()
            .join(format!("rent-ledger-test-{}", Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        config
    }

    /// Lease with unpaid 1000.00 charges for January and February 2026.
    pub async fn test_app(gateway: FakeGateway) -> TestApp {
        let store = MemoryStore::new();
        let lease = Lease {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            landlord_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            rent_amount: Money::from_major(1000),
            due_day: 1,
            status: LeaseStatus::Active,
        };
        store.insert_lease(lease.clone()).await;
        for month in ["2026-01", "2026-02"] {
            let month: BillingMonth = month.parse().unwrap();
            store
                .insert_charge(RentCharge::new_unpaid(&lease, month, month.day(1).unwrap()))
                .await;
        }

        let config = test_config();
        let documents = Arc::new(LocalDocumentStore::new(config.document_storage_dir.clone()));
        let state = AppState::from_parts(
            config,
            None,
            reqwest::Client::new(),
            Arc::new(store.clone()),
            Arc::new(gateway),
            documents,
        );
        TestApp { store, state, lease }
    }

    impl TestApp {
        pub fn router(&self) -> Router {
            Router::new()
                .nest("/v1", v1_router())
                .with_state(self.state.clone())
        }

        pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }
    }

    pub fn json_request(method: &str, uri: &str, user: Option<Uuid>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    pub fn get_request(uri: &str, user: Option<Uuid>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        builder.body(Body::empty()).unwrap()
    }
}
