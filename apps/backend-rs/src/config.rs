use std::env;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_seconds: u64,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub run_migrations: bool,
    pub auth_jwt_secret: Option<String>,
    pub dev_auth_overrides_enabled: bool,
    pub gateway_secret_key: Option<String>,
    pub gateway_api_base: String,
    pub gateway_timeout_seconds: u64,
    pub gateway_callback_url: Option<String>,
    pub currency: String,
    pub platform_fee_percent: Decimal,
    pub cron_secret: Option<String>,
    pub charge_scheduler_enabled: bool,
    pub proof_max_bytes: usize,
    pub document_storage_dir: String,
    pub settled_reference_cache_ttl_seconds: u64,
    pub settled_reference_cache_max_entries: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Rent Ledger API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            request_timeout_seconds: env_parse_or("REQUEST_TIMEOUT_SECONDS", 30),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            run_migrations: env_parse_bool_or("RUN_MIGRATIONS", false),
            auth_jwt_secret: env_opt("AUTH_JWT_SECRET"),
            dev_auth_overrides_enabled: env_parse_bool_or("DEV_AUTH_OVERRIDES_ENABLED", false),
            gateway_secret_key: env_opt("GATEWAY_SECRET_KEY"),
            gateway_api_base: env_or("GATEWAY_API_BASE", "https://api.paystack.co"),
            gateway_timeout_seconds: env_parse_or("GATEWAY_TIMEOUT_SECONDS", 10),
            gateway_callback_url: env_opt("GATEWAY_CALLBACK_URL"),
            currency: env_or("CURRENCY", "ZAR").to_ascii_uppercase(),
            platform_fee_percent: env_parse_or("PLATFORM_FEE_PERCENT", dec!(2)),
            cron_secret: env_opt("CRON_SECRET"),
            charge_scheduler_enabled: env_parse_bool_or("CHARGE_SCHEDULER_ENABLED", false),
            proof_max_bytes: env_parse_or("PROOF_MAX_BYTES", 5 * 1024 * 1024),
            document_storage_dir: env_or("DOCUMENT_STORAGE_DIR", "./data/payment-proofs"),
            settled_reference_cache_ttl_seconds: env_parse_or(
                "SETTLED_REFERENCE_CACHE_TTL_SECONDS",
                3600,
            ),
            settled_reference_cache_max_entries: env_parse_or(
                "SETTLED_REFERENCE_CACHE_MAX_ENTRIES",
                10000,
            ),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn auth_dev_overrides_enabled(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.dev_auth_overrides_enabled
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_seconds.max(1))
    }

    /// Platform fee in percent, clamped to 0..=100.
    pub fn fee_percent(&self) -> Decimal {
        self.platform_fee_percent.clamp(Decimal::ZERO, dec!(100))
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}
