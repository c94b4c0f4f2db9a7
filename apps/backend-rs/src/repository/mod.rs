use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    domain::{
        ChargeStatus, Lease, LedgerEntry, LedgerStatus, NotificationEvent, OnlinePayment,
        OnlinePaymentStatus, Payment, PaymentAllocation, Payout, RentCharge,
    },
    money::Money,
};

pub mod memory;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("malformed {table} row: {message}")]
    Corrupt {
        table: &'static str,
        message: String,
    },
    #[error("injected fault: {0}")]
    Injected(&'static str),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.code().as_deref() == Some("23505") {
                let constraint = db_error.constraint().unwrap_or("unknown").to_string();
                return Self::UniqueViolation(constraint);
            }
        }
        tracing::error!(db_error = %error, "Database query failed");
        Self::Database(error)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentWithAllocations {
    #[serde(flatten)]
    pub payment: Payment,
    pub allocations: Vec<PaymentAllocation>,
}

/// Durable home of leases, rent charges and everything settlement writes.
///
/// Plain methods are single statements. Anything that must be all-or-nothing
/// goes through [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_lease(&self, lease_id: Uuid) -> StoreResult<Option<Lease>>;

    async fn list_active_leases(&self) -> StoreResult<Vec<Lease>>;

    /// All charges of a lease, ascending by due date.
    async fn list_charges(&self, lease_id: Uuid) -> StoreResult<Vec<RentCharge>>;

    /// Returns `false` when the lease already has a charge for that month.
    async fn insert_charge_if_absent(&self, charge: &RentCharge) -> StoreResult<bool>;

    async fn list_payments(&self, lease_id: Uuid) -> StoreResult<Vec<PaymentWithAllocations>>;

    async fn list_ledger_for_landlord(
        &self,
        landlord_id: Uuid,
        status: Option<LedgerStatus>,
    ) -> StoreResult<Vec<LedgerEntry>>;

    async fn find_ledger_by_reference(&self, reference: &str) -> StoreResult<Option<LedgerEntry>>;

    async fn get_online_payment(&self, reference: &str) -> StoreResult<Option<OnlinePayment>>;

    async fn insert_online_payment(&self, session: &OnlinePayment) -> StoreResult<()>;

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>>;
}

/// Unit of work. Dropping it without [`LedgerTx::commit`] discards every write.
#[async_trait]
pub trait LedgerTx: Send {
    /// Loads the lease and holds it until the unit of work ends, which
    /// serializes settlement per lease.
    async fn lock_lease(&mut self, lease_id: Uuid) -> StoreResult<Option<Lease>>;

    /// Charges in UNPAID, PARTIAL or OVERDUE, ascending by due date then month.
    async fn outstanding_charges(&mut self, lease_id: Uuid) -> StoreResult<Vec<RentCharge>>;

    async fn ledger_by_reference(&mut self, reference: &str) -> StoreResult<Option<LedgerEntry>>;

    async fn ledger_for_update(&mut self, ledger_id: Uuid) -> StoreResult<Option<LedgerEntry>>;

    async fn online_payment_for_update(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<OnlinePayment>>;

    /// Whether a gateway session was initiated under this reference. Takes no lock.
    async fn online_payment_exists(&mut self, reference: &str) -> StoreResult<bool>;

    async fn update_charge(
        &mut self,
        charge_id: Uuid,
        amount_paid: Money,
        status: ChargeStatus,
    ) -> StoreResult<()>;

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()>;

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> StoreResult<()>;

    async fn insert_ledger(&mut self, entry: &LedgerEntry) -> StoreResult<()>;

    async fn update_ledger(
        &mut self,
        ledger_id: Uuid,
        status: LedgerStatus,
        payment_id: Option<Uuid>,
        failure_reason: Option<&str>,
    ) -> StoreResult<()>;

    async fn update_online_payment_status(
        &mut self,
        reference: &str,
        status: OnlinePaymentStatus,
    ) -> StoreResult<()>;

    async fn insert_payout(&mut self, payout: &Payout) -> StoreResult<()>;

    async fn insert_notification(&mut self, event: &NotificationEvent) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
