use std::sync::Arc;

use crate::{
    domain::{LedgerEntry, LedgerSource, LedgerStatus},
    repository::{LedgerTx, StoreError, StoreResult},
    services::cache::ReferenceCache,
};

/// What the ledger already knows about a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceState {
    Fresh,
    Settled(LedgerEntry),
    /// PENDING or FAILED row holding the reference.
    Open(LedgerEntry),
}

/// Keeps every settlement reference to at most one successful ledger row.
///
/// The authoritative check runs inside the settlement unit of work, after the
/// lease lock is held. The unique constraint on the ledger reference backs it
/// up when two writers race past the check.
///
/// The cache only ever holds settled gateway references. Manual and proof
/// references are scoped to a lease, so they always go to the ledger.
#[derive(Clone)]
pub struct IdempotencyGuard {
    cache: Arc<dyn ReferenceCache>,
}

impl IdempotencyGuard {
    pub fn new(cache: Arc<dyn ReferenceCache>) -> Self {
        Self { cache }
    }

    /// Cheap pre-check for gateway references before any lock is taken.
    pub async fn known_settled(&self, reference: &str) -> bool {
        self.cache.contains(reference).await
    }

    pub async fn inspect(&self, tx: &mut dyn LedgerTx, reference: &str) -> StoreResult<ReferenceState> {
        let state = match tx.ledger_by_reference(reference).await? {
            None => ReferenceState::Fresh,
            Some(entry) if entry.status == LedgerStatus::Success => {
                if entry.source == LedgerSource::Online {
                    self.cache.insert(reference).await;
                }
                ReferenceState::Settled(entry)
            }
            Some(entry) => ReferenceState::Open(entry),
        };
        Ok(state)
    }

    /// Call only after an ONLINE ledger row for `reference` committed.
    pub async fn record_settled(&self, reference: &str) {
        self.cache.insert(reference).await;
    }

    /// Drop a cached claim the ledger turned out not to back.
    pub async fn forget(&self, reference: &str) {
        self.cache.invalidate(reference).await;
    }

    /// A concurrent writer already committed this reference.
    pub fn is_duplicate(error: &StoreError) -> bool {
        error.is_unique_violation()
    }
}
