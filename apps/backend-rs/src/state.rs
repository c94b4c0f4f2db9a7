use std::sync::Arc;

use reqwest::Client;
use sqlx::PgPool;

use crate::{
    config::AppConfig,
    db,
    repository::{memory::MemoryStore, postgres::PgLedgerStore, LedgerStore},
    services::{
        cache::SettledReferenceCache,
        documents::{DocumentStore, LocalDocumentStore},
        gateway::{PaymentGateway, PaystackGateway},
        idempotency::IdempotencyGuard,
        settlement::SettlementService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: Client,
    pub store: Arc<dyn LedgerStore>,
    pub settlement: SettlementService,
    pub gateway: Arc<dyn PaymentGateway>,
    pub documents: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config)?;
        let store: Arc<dyn LedgerStore> = match &db_pool {
            Some(pool) => Arc::new(PgLedgerStore::new(pool.clone())),
            None => {
                tracing::warn!(
                    "DATABASE_URL is not set, using the in-memory ledger store (data is lost on restart)"
                );
                Arc::new(MemoryStore::new())
            }
        };

        let http_client = PaystackGateway::build_http_client(config.gateway_timeout())?;
        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(PaystackGateway::new(http_client.clone(), &config));
        let documents: Arc<dyn DocumentStore> =
            Arc::new(LocalDocumentStore::new(config.document_storage_dir.clone()));

        Ok(Self::from_parts(config, db_pool, http_client, store, gateway, documents))
    }

    pub fn from_parts(
        config: AppConfig,
        db_pool: Option<PgPool>,
        http_client: Client,
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let guard = IdempotencyGuard::new(Arc::new(SettledReferenceCache::from_config(&config)));
        let settlement = SettlementService::new(store.clone(), guard, config.fee_percent());
        Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            store,
            settlement,
            gateway,
            documents,
        }
    }
}
