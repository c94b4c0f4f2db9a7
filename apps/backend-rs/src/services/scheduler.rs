use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use tokio::time::sleep;

use crate::{services::charge_generator, state::AppState};

/// Spawn the background scheduler that runs periodic jobs.
///
/// Each job runs in its own `tokio::spawn` so a failure in one job
/// never crashes the scheduler loop.
pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("Background scheduler started");

    let mut last_daily_run: Option<(i32, u32)> = None;

    loop {
        sleep(Duration::from_secs(15)).await;

        let now_utc = Utc::now();
        let today = now_utc.date_naive();

        // --- Daily jobs (run once per calendar day) ---
        let today_key = (today.year(), today.ordinal());
        if last_daily_run == Some(today_key) {
            continue;
        }

        // Run daily jobs at or after 05:00 UTC
        if now_utc.hour() < 5 {
            continue;
        }

        last_daily_run = Some(today_key);
        tracing::info!("Scheduler: running daily jobs for {today}");

        // 05:00: next month's rent charges
        {
            let store = state.store.clone();
            let month = charge_generator::target_month(today);
            tokio::spawn(async move {
                match charge_generator::generate_charges(store.as_ref(), month).await {
                    Ok(report) => tracing::info!(
                        month = %report.month,
                        created = report.created,
                        skipped = report.skipped,
                        errors = report.errors.len(),
                        "Scheduler: rent charge generation completed"
                    ),
                    Err(error) => tracing::error!(
                        month = %month,
                        error = %error,
                        "Scheduler: rent charge generation failed"
                    ),
                }
            });
        }
    }
}
