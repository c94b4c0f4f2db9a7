use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LedgerStore, LedgerTx, PaymentWithAllocations, StoreError, StoreResult};
use crate::{
    domain::{
        ChargeStatus, Lease, LeaseStatus, LedgerEntry, LedgerStatus, NotificationEvent,
        OnlinePayment, OnlinePaymentStatus, Payment, PaymentAllocation, Payout, RentCharge,
    },
    money::Money,
};

/// Write steps that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    UpdateCharge,
    InsertPayment,
    InsertAllocation,
    InsertLedger,
    UpdateLedger,
    InsertPayout,
    Commit,
    /// Another writer commits a row with the same reference and this status
    /// just before the ledger insert, which then hits the unique constraint.
    RacedLedger(LedgerStatus),
}

impl FaultPoint {
    fn label(self) -> &'static str {
        match self {
            Self::UpdateCharge => "update_charge",
            Self::InsertPayment => "insert_payment",
            Self::InsertAllocation => "insert_allocation",
            Self::InsertLedger => "insert_ledger",
            Self::UpdateLedger => "update_ledger",
            Self::InsertPayout => "insert_payout",
            Self::Commit => "commit",
            Self::RacedLedger(_) => "raced_ledger",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub leases: HashMap<Uuid, Lease>,
    pub charges: Vec<RentCharge>,
    pub payments: Vec<Payment>,
    pub allocations: Vec<PaymentAllocation>,
    pub ledger: Vec<LedgerEntry>,
    pub payouts: Vec<Payout>,
    pub online_payments: Vec<OnlinePayment>,
    pub notifications: Vec<NotificationEvent>,
}

impl MemoryState {
    fn sorted_charges(&self, lease_id: Uuid) -> Vec<RentCharge> {
        let mut charges = self
            .charges
            .iter()
            .filter(|charge| charge.lease_id == lease_id)
            .cloned()
            .collect::<Vec<_>>();
        charges.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.month.cmp(&b.month)));
        charges
    }
}

/// Process-local store. One lock guards all state; a unit of work edits a
/// staged copy and swaps it in on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fault: Arc<std::sync::Mutex<Option<FaultPoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn insert_lease(&self, lease: Lease) {
        self.state.lock().await.leases.insert(lease.id, lease);
    }

    #[cfg(test)]
    pub async fn insert_charge(&self, charge: RentCharge) {
        self.state.lock().await.charges.push(charge);
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Make every following unit of work fail at `point` until cleared.
    #[cfg(test)]
    pub fn fail_at(&self, point: Option<FaultPoint>) {
        if let Ok(mut fault) = self.fault.lock() {
            *fault = point;
        }
    }

    fn current_fault(&self) -> Option<FaultPoint> {
        self.fault.lock().ok().and_then(|fault| *fault)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_lease(&self, lease_id: Uuid) -> StoreResult<Option<Lease>> {
        Ok(self.state.lock().await.leases.get(&lease_id).cloned())
    }

    async fn list_active_leases(&self) -> StoreResult<Vec<Lease>> {
        let state = self.state.lock().await;
        let mut leases = state
            .leases
            .values()
            .filter(|lease| lease.status == LeaseStatus::Active)
            .cloned()
            .collect::<Vec<_>>();
        leases.sort_by_key(|lease| lease.id);
        Ok(leases)
    }

    async fn list_charges(&self, lease_id: Uuid) -> StoreResult<Vec<RentCharge>> {
        Ok(self.state.lock().await.sorted_charges(lease_id))
    }

    async fn insert_charge_if_absent(&self, charge: &RentCharge) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let exists = state
            .charges
            .iter()
            .any(|existing| existing.lease_id == charge.lease_id && existing.month == charge.month);
        if exists {
            return Ok(false);
        }
        state.charges.push(charge.clone());
        Ok(true)
    }

    async fn list_payments(&self, lease_id: Uuid) -> StoreResult<Vec<PaymentWithAllocations>> {
        let state = self.state.lock().await;
        let mut payments = state
            .payments
            .iter()
            .filter(|payment| payment.lease_id == lease_id)
            .map(|payment| PaymentWithAllocations {
                payment: payment.clone(),
                allocations: state
                    .allocations
                    .iter()
                    .filter(|allocation| allocation.payment_id == payment.id)
                    .cloned()
                    .collect(),
            })
            .collect::<Vec<_>>();
        payments.sort_by(|a, b| b.payment.created_at.cmp(&a.payment.created_at));
        Ok(payments)
    }

    async fn list_ledger_for_landlord(
        &self,
        landlord_id: Uuid,
        status: Option<LedgerStatus>,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        let mut entries = state
            .ledger
            .iter()
            .filter(|entry| entry.landlord_id == landlord_id)
            .filter(|entry| status.map_or(true, |status| entry.status == status))
            .cloned()
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn find_ledger_by_reference(&self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .find(|entry| entry.reference == reference)
            .cloned())
    }

    async fn get_online_payment(&self, reference: &str) -> StoreResult<Option<OnlinePayment>> {
        let state = self.state.lock().await;
        Ok(state
            .online_payments
            .iter()
            .find(|session| session.reference == reference)
            .cloned())
    }

    async fn insert_online_payment(&self, session: &OnlinePayment) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state
            .online_payments
            .iter()
            .any(|existing| existing.reference == session.reference)
        {
            return Err(StoreError::UniqueViolation(
                "online_payments_reference_key".to_string(),
            ));
        }
        state.online_payments.push(session.clone());
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            fault: self.current_fault(),
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    fault: Option<FaultPoint>,
}

impl MemoryTx {
    fn check(&self, point: FaultPoint) -> StoreResult<()> {
        if self.fault == Some(point) {
            return Err(StoreError::Injected(point.label()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_lease(&mut self, lease_id: Uuid) -> StoreResult<Option<Lease>> {
        Ok(self.staged.leases.get(&lease_id).cloned())
    }

    async fn outstanding_charges(&mut self, lease_id: Uuid) -> StoreResult<Vec<RentCharge>> {
        let mut charges = self.staged.sorted_charges(lease_id);
        charges.retain(|charge| charge.status.is_open());
        Ok(charges)
    }

    async fn ledger_by_reference(&mut self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        Ok(self
            .staged
            .ledger
            .iter()
            .find(|entry| entry.reference == reference)
            .cloned())
    }

    async fn ledger_for_update(&mut self, ledger_id: Uuid) -> StoreResult<Option<LedgerEntry>> {
        Ok(self
            .staged
            .ledger
            .iter()
            .find(|entry| entry.id == ledger_id)
            .cloned())
    }

    async fn online_payment_for_update(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<OnlinePayment>> {
        Ok(self
            .staged
            .online_payments
            .iter()
            .find(|session| session.reference == reference)
            .cloned())
    }

    async fn online_payment_exists(&mut self, reference: &str) -> StoreResult<bool> {
        Ok(self
            .staged
            .online_payments
            .iter()
            .any(|session| session.reference == reference))
    }

    async fn update_charge(
        &mut self,
        charge_id: Uuid,
        amount_paid: Money,
        status: ChargeStatus,
    ) -> StoreResult<()> {
        self.check(FaultPoint::UpdateCharge)?;
        let charge = self
            .staged
            .charges
            .iter_mut()
            .find(|charge| charge.id == charge_id)
            .ok_or_else(|| StoreError::Corrupt {
                table: "rent_charges",
                message: format!("charge {charge_id} vanished mid-settlement"),
            })?;
        if amount_paid > charge.amount_due || amount_paid < charge.amount_paid {
            return Err(StoreError::Corrupt {
                table: "rent_charges",
                message: format!("amount_paid {amount_paid} violates bounds for {charge_id}"),
            });
        }
        charge.amount_paid = amount_paid;
        charge.status = status;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        self.check(FaultPoint::InsertPayment)?;
        self.staged.payments.push(payment.clone());
        Ok(())
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> StoreResult<()> {
        self.check(FaultPoint::InsertAllocation)?;
        self.staged.allocations.push(allocation.clone());
        Ok(())
    }

    async fn insert_ledger(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        self.check(FaultPoint::InsertLedger)?;
        if let Some(FaultPoint::RacedLedger(status)) = self.fault {
            let mut competitor = entry.clone();
            competitor.id = Uuid::new_v4();
            competitor.status = status;
            if status != LedgerStatus::Success {
                competitor.payment_id = None;
            }
            // Straight into committed state, as if the other writer got there first.
            self.guard.ledger.push(competitor);
            return Err(StoreError::UniqueViolation(
                "transaction_ledger_reference_key".to_string(),
            ));
        }
        if self
            .staged
            .ledger
            .iter()
            .any(|existing| existing.reference == entry.reference)
        {
            return Err(StoreError::UniqueViolation(
                "transaction_ledger_reference_key".to_string(),
            ));
        }
        self.staged.ledger.push(entry.clone());
        Ok(())
    }

    async fn update_ledger(
        &mut self,
        ledger_id: Uuid,
        status: LedgerStatus,
        payment_id: Option<Uuid>,
        failure_reason: Option<&str>,
    ) -> StoreResult<()> {
        self.check(FaultPoint::UpdateLedger)?;
        if let Some(entry) = self.staged.ledger.iter_mut().find(|entry| entry.id == ledger_id) {
            entry.status = status;
            entry.payment_id = payment_id.or(entry.payment_id);
            entry.failure_reason = failure_reason.map(ToOwned::to_owned);
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_online_payment_status(
        &mut self,
        reference: &str,
        status: OnlinePaymentStatus,
    ) -> StoreResult<()> {
        if let Some(session) = self
            .staged
            .online_payments
            .iter_mut()
            .find(|session| session.reference == reference)
        {
            session.status = status;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_payout(&mut self, payout: &Payout) -> StoreResult<()> {
        self.check(FaultPoint::InsertPayout)?;
        self.staged.payouts.push(payout.clone());
        Ok(())
    }

    async fn insert_notification(&mut self, event: &NotificationEvent) -> StoreResult<()> {
        self.staged.notifications.push(event.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.check(FaultPoint::Commit)?;
        let MemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}
