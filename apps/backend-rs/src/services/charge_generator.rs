use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    domain::{BillingMonth, Lease, RentCharge},
    repository::{LedgerStore, StoreError},
};

/// Why one lease could not be billed. Never aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("due day {0} is outside 1..=28")]
    InvalidDueDay(i32),
    #[error("rent amount {0} must be positive")]
    InvalidRent(String),
    #[error("no day {day} in {month}")]
    NoSuchDay { day: i32, month: BillingMonth },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationFailure {
    pub lease_id: Uuid,
    pub message: String,
}

/// Result of one generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub month: BillingMonth,
    pub created: u32,
    pub skipped: u32,
    pub errors: Vec<GenerationFailure>,
}

/// Month the generator bills when run on `today`: the next calendar month.
pub fn target_month(today: NaiveDate) -> BillingMonth {
    BillingMonth::of(today).next()
}

fn charge_for(lease: &Lease, month: BillingMonth) -> Result<RentCharge, GenerationError> {
    if !(1..=28).contains(&lease.due_day) {
        return Err(GenerationError::InvalidDueDay(lease.due_day));
    }
    if !lease.rent_amount.is_positive() {
        return Err(GenerationError::InvalidRent(lease.rent_amount.to_string()));
    }
    let due_date = u32::try_from(lease.due_day)
        .ok()
        .and_then(|day| month.day(day))
        .ok_or(GenerationError::NoSuchDay {
            day: lease.due_day,
            month,
        })?;
    Ok(RentCharge::new_unpaid(lease, month, due_date))
}

/// Create the `month` charge for every ACTIVE lease that does not have one.
///
/// Safe to re-run: an existing (lease, month) charge counts as skipped.
/// Only failing to list leases aborts the run.
pub async fn generate_charges(
    store: &dyn LedgerStore,
    month: BillingMonth,
) -> Result<GenerationReport, StoreError> {
    let leases = store.list_active_leases().await?;
    let mut report = GenerationReport {
        month,
        created: 0,
        skipped: 0,
        errors: Vec::new(),
    };

    for lease in &leases {
        let outcome = match charge_for(lease, month) {
            Ok(charge) => store
                .insert_charge_if_absent(&charge)
                .await
                .map_err(GenerationError::from),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(true) => report.created += 1,
            Ok(false) => report.skipped += 1,
            Err(error) => {
                warn!(lease_id = %lease.id, month = %month, error = %error, "Rent charge generation failed");
                report.errors.push(GenerationFailure {
                    lease_id: lease.id,
                    message: error.to_string(),
                });
            }
        }
    }

    info!(
        month = %month,
        leases = leases.len(),
        created = report.created,
        skipped = report.skipped,
        errors = report.errors.len(),
        "Rent charge generation completed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{generate_charges, target_month};
    use crate::{
        domain::{BillingMonth, ChargeStatus, Lease, LeaseStatus},
        money::Money,
        repository::{memory::MemoryStore, LedgerStore},
    };

    fn lease(due_day: i32, status: LeaseStatus) -> Lease {
        Lease {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            landlord_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            rent_amount: Money::from_major(1200),
            due_day,
            status,
        }
    }

    #[test]
    fn targets_the_following_month() {
        let today = NaiveDate::from_ymd_opt(2026, 12, 15).unwrap();
        assert_eq!(target_month(today).to_string(), "2027-01");
        let today = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(target_month(today).to_string(), "2026-02");
    }

    #[tokio::test]
    async fn second_run_skips_existing_charges() {
        let store = MemoryStore::new();
        let active = lease(5, LeaseStatus::Active);
        store.insert_lease(active.clone()).await;
        store.insert_lease(lease(5, LeaseStatus::Ended)).await;
        let month: BillingMonth = "2026-03".parse().unwrap();

        let first = generate_charges(&store, month).await.unwrap();
        assert_eq!((first.created, first.skipped), (1, 0));
        let second = generate_charges(&store, month).await.unwrap();
        assert_eq!((second.created, second.skipped), (0, 1));

        let charges = store.list_charges(active.id).await.unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].amount_due, Money::from_major(1200));
        assert_eq!(charges[0].amount_paid, Money::ZERO);
        assert_eq!(charges[0].status, ChargeStatus::Unpaid);
        assert_eq!(charges[0].due_date, NaiveDate::from_ymd_opt(2026, 3, 5).unwrap());
    }

    #[tokio::test]
    async fn one_bad_lease_does_not_stop_the_rest() {
        let store = MemoryStore::new();
        let broken = lease(31, LeaseStatus::Active);
        let mut free = lease(1, LeaseStatus::Active);
        free.rent_amount = Money::ZERO;
        store.insert_lease(broken.clone()).await;
        store.insert_lease(free.clone()).await;
        store.insert_lease(lease(28, LeaseStatus::Active)).await;

        let report = generate_charges(&store, "2026-02".parse().unwrap()).await.unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.lease_id == broken.id));
        assert!(report.errors.iter().any(|e| e.lease_id == free.id));
    }
}
