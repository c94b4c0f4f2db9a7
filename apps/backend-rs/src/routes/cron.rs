use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;

use crate::{
    auth::bearer_token,
    error::{AppError, AppResult},
    schemas::GenerateChargesQuery,
    services::charge_generator::{generate_charges, target_month},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/cron/generate-charges",
        axum::routing::post(run_charge_generation),
    )
}

async fn run_charge_generation(
    State(state): State<AppState>,
    Query(query): Query<GenerateChargesQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    validate_cron_secret(
        state.config.is_production(),
        state.config.cron_secret.as_deref(),
        bearer_token(&headers).unwrap_or_default(),
    )?;

    let month = query
        .month
        .unwrap_or_else(|| target_month(Utc::now().date_naive()));
    let report = generate_charges(state.store.as_ref(), month).await?;
    tracing::info!(
        month = %report.month,
        created = report.created,
        skipped = report.skipped,
        errors = report.errors.len(),
        "Cron: rent charge generation completed"
    );
    Ok(Json(report))
}

fn validate_cron_secret(
    is_production: bool,
    expected_secret: Option<&str>,
    provided_secret: &str,
) -> AppResult<()> {
    let expected = expected_secret.map(str::trim).unwrap_or_default();

    if is_production && expected.is_empty() {
        return Err(AppError::Dependency(
            "CRON_SECRET must be set in production to run scheduled jobs.".to_string(),
        ));
    }

    if expected.is_empty() {
        tracing::warn!("CRON_SECRET is not set, accepting unauthenticated cron call");
        return Ok(());
    }

    if provided_secret != expected {
        return Err(AppError::Unauthorized(
            "Invalid or missing cron secret.".to_string(),
        ));
    }

    Ok(())
}
