use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    domain::{
        DocumentHandle, Lease, LedgerEntry, LedgerSource, LedgerStatus, Notice, NotificationEvent,
        OnlinePaymentStatus, Payment, PaymentAllocation, PaymentMethod, Payout, PayoutStatus,
    },
    money::Money,
    repository::{LedgerStore, LedgerTx, StoreError},
    services::{
        allocation::{allocate, AllocationError, ChargeAllocation},
        idempotency::{IdempotencyGuard, ReferenceState},
    },
};

const MAX_REFERENCE_LEN: usize = 120;

/// Lifecycle of one payment event, whichever channel it came in through.
///
/// Manual entry goes `Initiated -> Settled`, a proof upload goes
/// `Initiated -> PendingReview -> Settled | Failed`, and a gateway session goes
/// `Initiated -> Settled | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementState {
    Initiated,
    PendingReview,
    Settled,
    Failed,
}

impl SettlementState {
    pub fn of_ledger(status: LedgerStatus) -> Self {
        match status {
            LedgerStatus::Pending => Self::PendingReview,
            LedgerStatus::Success => Self::Settled,
            LedgerStatus::Failed => Self::Failed,
        }
    }

    pub fn of_session(status: OnlinePaymentStatus) -> Self {
        match status {
            OnlinePaymentStatus::Pending => Self::Initiated,
            OnlinePaymentStatus::Success => Self::Settled,
            OnlinePaymentStatus::Failed => Self::Failed,
        }
    }

    pub fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initiated, Self::PendingReview | Self::Settled | Self::Failed)
                | (Self::PendingReview, Self::Settled | Self::Failed)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("{0}")]
    Validation(String),
    #[error("lease {0} was not found")]
    LeaseNotFound(Uuid),
    #[error("ledger entry {0} was not found")]
    LedgerNotFound(Uuid),
    #[error("no payment session exists for reference {0}")]
    UnknownReference(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("payment {reference} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        reference: String,
        from: SettlementState,
        to: SettlementState,
    },
    #[error("reference {0} is already used by another payment")]
    DuplicateReference(String),
    #[error("gateway reference {reference} is held by unsettled ledger entry {holder_id}")]
    ReferenceHeld { reference: String, holder_id: Uuid },
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Landlord records money received outside the platform.
#[derive(Debug, Clone)]
pub struct ManualEntry {
    pub actor_id: Uuid,
    pub lease_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub date_paid: NaiveDate,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Landlord accepts a tenant's uploaded proof of payment.
#[derive(Debug, Clone)]
pub struct ProofApproval {
    pub actor_id: Uuid,
    pub ledger_id: Uuid,
}

/// Charge the gateway reports as completed.
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub reference: String,
    pub amount: Money,
    pub paid_at: Option<DateTime<Utc>>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SettlementRequest {
    Manual(ManualEntry),
    ProofApproval(ProofApproval),
    Gateway(GatewayCharge),
}

impl SettlementRequest {
    fn normalized(self) -> Self {
        match self {
            Self::Manual(mut entry) => {
                entry.reference = entry.reference.map(|reference| reference.trim().to_string());
                Self::Manual(entry)
            }
            Self::Gateway(mut charge) => {
                charge.reference = charge.reference.trim().to_string();
                Self::Gateway(charge)
            }
            approval @ Self::ProofApproval(_) => approval,
        }
    }

    fn validate(&self) -> Result<(), SettlementError> {
        match self {
            Self::Manual(entry) => {
                validate_amount(entry.amount)?;
                if entry.method == PaymentMethod::Online {
                    return Err(SettlementError::Validation(
                        "ONLINE payments can only be recorded by the payment gateway.".to_string(),
                    ));
                }
                if let Some(reference) = &entry.reference {
                    validate_reference(reference)?;
                }
                Ok(())
            }
            Self::ProofApproval(_) => Ok(()),
            Self::Gateway(charge) => {
                validate_amount(charge.amount)?;
                validate_reference(&charge.reference)
            }
        }
    }

    /// Gateway references name exactly one session, so a cached settlement
    /// of one can answer before any lock is taken.
    fn cacheable_reference(&self) -> Option<&str> {
        match self {
            Self::Gateway(charge) => Some(&charge.reference),
            Self::Manual(_) | Self::ProofApproval(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementReceipt {
    pub payment: Payment,
    pub allocations: Vec<PaymentAllocation>,
    pub charges: Vec<ChargeAllocation>,
    pub ledger: LedgerEntry,
    pub payout: Option<Payout>,
    /// Not attached to any charge and not credited forward.
    pub remainder: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Settled(Box<SettlementReceipt>),
    AlreadyProcessed { reference: String },
}

impl SettlementOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

#[derive(Debug, Clone)]
pub struct ProofSubmission {
    pub actor_id: Uuid,
    pub lease_id: Uuid,
    pub amount: Money,
    pub reference: String,
    pub document: DocumentHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProofReceipt {
    Created(LedgerEntry),
    /// Same reference already submitted for this lease.
    Existing(LedgerEntry),
}

impl ProofReceipt {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Created(entry) | Self::Existing(entry) => entry,
        }
    }
}

enum LedgerWrite {
    Insert(LedgerSource),
    Promote(LedgerEntry),
}

impl LedgerWrite {
    fn source(&self) -> LedgerSource {
        match self {
            Self::Insert(source) => *source,
            Self::Promote(entry) => entry.source,
        }
    }
}

struct SettlementPlan {
    lease: Lease,
    amount: Money,
    platform_fee: Money,
    method: PaymentMethod,
    date_paid: NaiveDate,
    reference: String,
    notes: Option<String>,
    ledger: LedgerWrite,
    closes_session: bool,
}

enum Step {
    Apply(Box<SettlementPlan>),
    AlreadyProcessed(String),
}

#[derive(Clone)]
pub struct SettlementService {
    store: Arc<dyn LedgerStore>,
    guard: IdempotencyGuard,
    fee_percent: Decimal,
}

impl SettlementService {
    pub fn new(store: Arc<dyn LedgerStore>, guard: IdempotencyGuard, fee_percent: Decimal) -> Self {
        Self {
            store,
            guard,
            fee_percent,
        }
    }

    /// Turn a money-received event into payment, allocations, ledger and
    /// payout records, all in one unit of work.
    pub async fn settle(&self, request: SettlementRequest) -> Result<SettlementOutcome, SettlementError> {
        let request = request.normalized();
        request.validate()?;

        if let Some(reference) = request.cacheable_reference() {
            if self.guard.known_settled(reference).await {
                tracing::info!(reference = %reference, "Settlement skipped, reference already settled");
                return Ok(SettlementOutcome::AlreadyProcessed {
                    reference: reference.to_string(),
                });
            }
        }

        let mut tx = self.store.begin().await?;
        let step = match request {
            SettlementRequest::Manual(entry) => self.plan_manual(tx.as_mut(), entry).await?,
            SettlementRequest::ProofApproval(approval) => {
                self.plan_approval(tx.as_mut(), approval).await?
            }
            SettlementRequest::Gateway(charge) => self.plan_gateway(tx.as_mut(), charge).await?,
        };
        let plan = match step {
            Step::Apply(plan) => plan,
            Step::AlreadyProcessed(reference) => {
                tracing::info!(reference = %reference, "Settlement skipped, reference already settled");
                return Ok(SettlementOutcome::AlreadyProcessed { reference });
            }
        };

        let reference = plan.reference.clone();
        let lease_id = plan.lease.id;
        let channel = plan.ledger.source();
        let receipt = match self.apply(tx.as_mut(), *plan).await {
            Ok(receipt) => receipt,
            Err(SettlementError::Store(error)) if IdempotencyGuard::is_duplicate(&error) => {
                drop(tx);
                return self.lost_race(reference, lease_id, channel, error).await;
            }
            Err(error) => return Err(error),
        };
        if let Err(error) = tx.commit().await {
            if IdempotencyGuard::is_duplicate(&error) {
                return self.lost_race(reference, lease_id, channel, error).await;
            }
            return Err(error.into());
        }
        if channel == LedgerSource::Online {
            self.guard.record_settled(&reference).await;
        }

        tracing::info!(
            reference = %reference,
            lease_id = %receipt.payment.lease_id,
            payment_id = %receipt.payment.id,
            amount = %receipt.payment.amount,
            method = %receipt.payment.method,
            charges_touched = receipt.charges.len(),
            "Payment settled"
        );
        Ok(SettlementOutcome::Settled(Box::new(receipt)))
    }

    /// The ledger insert hit the reference's unique constraint. Only a
    /// committed SUCCESS row for the same payment makes this a replay; the
    /// unit of work must already be dropped.
    async fn lost_race(
        &self,
        reference: String,
        lease_id: Uuid,
        channel: LedgerSource,
        error: StoreError,
    ) -> Result<SettlementOutcome, SettlementError> {
        let Some(winner) = self.store.find_ledger_by_reference(&reference).await? else {
            return Err(error.into());
        };
        if !is_replay(&winner, lease_id, channel) {
            return Err(self.collision(reference, channel, &winner).await);
        }

        tracing::warn!(
            reference = %reference,
            ledger_id = %winner.id,
            error = %error,
            "Concurrent settlement already committed this reference"
        );
        if winner.source == LedgerSource::Online {
            self.guard.record_settled(&reference).await;
        }
        Ok(SettlementOutcome::AlreadyProcessed { reference })
    }

    /// A reference is taken by a row that is not this payment. Money the
    /// gateway collected must not be acknowledged as settled.
    async fn collision(
        &self,
        reference: String,
        channel: LedgerSource,
        holder: &LedgerEntry,
    ) -> SettlementError {
        tracing::warn!(
            reference = %reference,
            channel = %channel,
            holder_id = %holder.id,
            holder_source = %holder.source,
            holder_status = %holder.status,
            "Settlement reference is held by another ledger entry"
        );
        self.guard.forget(&reference).await;
        match channel {
            LedgerSource::Online => SettlementError::ReferenceHeld {
                reference,
                holder_id: holder.id,
            },
            LedgerSource::Manual | LedgerSource::Proof => {
                SettlementError::DuplicateReference(reference)
            }
        }
    }

    async fn plan_manual(&self, tx: &mut dyn LedgerTx, entry: ManualEntry) -> Result<Step, SettlementError> {
        let lease = tx
            .lock_lease(entry.lease_id)
            .await?
            .ok_or(SettlementError::LeaseNotFound(entry.lease_id))?;
        if lease.landlord_id != entry.actor_id {
            return Err(SettlementError::Unauthorized(
                "Only the lease's landlord can record payments.".to_string(),
            ));
        }

        let reference = match entry.reference {
            Some(reference) => {
                match self.guard.inspect(tx, &reference).await? {
                    ReferenceState::Fresh => {}
                    ReferenceState::Settled(existing)
                        if is_replay(&existing, lease.id, LedgerSource::Manual) =>
                    {
                        return Ok(Step::AlreadyProcessed(reference));
                    }
                    ReferenceState::Settled(_) | ReferenceState::Open(_) => {
                        return Err(SettlementError::DuplicateReference(reference));
                    }
                }
                if tx.online_payment_exists(&reference).await? {
                    return Err(SettlementError::DuplicateReference(reference));
                }
                reference
            }
            None => format!("MANUAL_{}", Uuid::new_v4().simple()).to_ascii_uppercase(),
        };

        Ok(Step::Apply(Box::new(SettlementPlan {
            lease,
            amount: entry.amount,
            platform_fee: Money::ZERO,
            method: entry.method,
            date_paid: entry.date_paid,
            reference,
            notes: entry.notes,
            ledger: LedgerWrite::Insert(LedgerSource::Manual),
            closes_session: false,
        })))
    }

    async fn plan_approval(
        &self,
        tx: &mut dyn LedgerTx,
        approval: ProofApproval,
    ) -> Result<Step, SettlementError> {
        let entry = tx
            .ledger_for_update(approval.ledger_id)
            .await?
            .ok_or(SettlementError::LedgerNotFound(approval.ledger_id))?;
        let lease = tx
            .lock_lease(entry.lease_id)
            .await?
            .ok_or(SettlementError::LeaseNotFound(entry.lease_id))?;
        if entry.landlord_id != approval.actor_id || lease.landlord_id != approval.actor_id {
            return Err(SettlementError::Unauthorized(
                "Only the lease's landlord can approve this payment.".to_string(),
            ));
        }

        let from = SettlementState::of_ledger(entry.status);
        if from == SettlementState::Settled {
            return Ok(Step::AlreadyProcessed(entry.reference));
        }
        ensure_transition(&entry.reference, from, SettlementState::Settled)?;

        Ok(Step::Apply(Box::new(SettlementPlan {
            amount: entry.amount,
            platform_fee: entry.platform_fee,
            method: entry.payment_method,
            date_paid: entry.created_at.date_naive(),
            reference: entry.reference.clone(),
            notes: None,
            lease,
            ledger: LedgerWrite::Promote(entry),
            closes_session: false,
        })))
    }

    async fn plan_gateway(&self, tx: &mut dyn LedgerTx, charge: GatewayCharge) -> Result<Step, SettlementError> {
        let Some(session) = tx.online_payment_for_update(&charge.reference).await? else {
            tracing::warn!(
                reference = %charge.reference,
                amount = %charge.amount,
                "Gateway charge for a reference this system never initiated"
            );
            return Err(SettlementError::UnknownReference(charge.reference));
        };

        match SettlementState::of_session(session.status) {
            SettlementState::Settled => return Ok(Step::AlreadyProcessed(charge.reference)),
            SettlementState::Failed => tracing::warn!(
                reference = %charge.reference,
                "Gateway reports success for a session marked failed, settling anyway"
            ),
            _ => {}
        }

        let lease = tx
            .lock_lease(session.lease_id)
            .await?
            .ok_or(SettlementError::LeaseNotFound(session.lease_id))?;
        match self.guard.inspect(tx, &charge.reference).await? {
            ReferenceState::Fresh => {}
            ReferenceState::Settled(existing)
                if is_replay(&existing, lease.id, LedgerSource::Online) =>
            {
                return Ok(Step::AlreadyProcessed(charge.reference));
            }
            ReferenceState::Settled(holder) | ReferenceState::Open(holder) => {
                return Err(self
                    .collision(charge.reference, LedgerSource::Online, &holder)
                    .await);
            }
        }

        if charge.amount != session.amount {
            tracing::warn!(
                reference = %charge.reference,
                expected = %session.amount,
                received = %charge.amount,
                "Gateway amount differs from the initiated session, settling the received amount"
            );
        }

        let platform_fee = charge.amount.percentage(self.fee_percent);
        Ok(Step::Apply(Box::new(SettlementPlan {
            lease,
            amount: charge.amount,
            platform_fee,
            method: PaymentMethod::Online,
            date_paid: charge
                .paid_at
                .map(|paid_at| paid_at.date_naive())
                .unwrap_or_else(|| Utc::now().date_naive()),
            reference: charge.reference,
            notes: charge.channel.map(|channel| format!("Gateway channel: {channel}")),
            ledger: LedgerWrite::Insert(LedgerSource::Online),
            closes_session: true,
        })))
    }

    async fn apply(
        &self,
        tx: &mut dyn LedgerTx,
        plan: SettlementPlan,
    ) -> Result<SettlementReceipt, SettlementError> {
        let lease = plan.lease;
        let outstanding = tx.outstanding_charges(lease.id).await?;
        let outcome = allocate(plan.amount, &outstanding)?;
        let now = Utc::now();

        let payment = Payment {
            id: Uuid::new_v4(),
            lease_id: lease.id,
            tenant_id: lease.tenant_id,
            amount: plan.amount,
            method: plan.method,
            date_paid: plan.date_paid,
            reference: Some(plan.reference.clone()),
            notes: plan.notes,
            created_at: now,
        };
        tx.insert_payment(&payment).await?;

        let mut allocations = Vec::with_capacity(outcome.allocations.len());
        for charge in &outcome.allocations {
            tx.update_charge(charge.charge_id, charge.amount_paid, charge.status)
                .await?;
            let allocation = PaymentAllocation {
                id: Uuid::new_v4(),
                payment_id: payment.id,
                rent_charge_id: charge.charge_id,
                amount: charge.amount,
            };
            tx.insert_allocation(&allocation).await?;
            allocations.push(allocation);
        }

        let net_amount = plan.amount - plan.platform_fee;
        let ledger = match plan.ledger {
            LedgerWrite::Insert(source) => {
                let entry = LedgerEntry {
                    id: Uuid::new_v4(),
                    lease_id: lease.id,
                    tenant_id: lease.tenant_id,
                    landlord_id: lease.landlord_id,
                    reference: plan.reference.clone(),
                    amount: plan.amount,
                    platform_fee: plan.platform_fee,
                    net_amount,
                    payment_method: plan.method,
                    source,
                    status: LedgerStatus::Success,
                    payment_id: Some(payment.id),
                    document: None,
                    failure_reason: None,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_ledger(&entry).await?;
                entry
            }
            LedgerWrite::Promote(mut entry) => {
                tx.update_ledger(entry.id, LedgerStatus::Success, Some(payment.id), None)
                    .await?;
                entry.status = LedgerStatus::Success;
                entry.payment_id = Some(payment.id);
                entry.failure_reason = None;
                entry.updated_at = now;
                entry
            }
        };

        if plan.closes_session {
            tx.update_online_payment_status(&plan.reference, OnlinePaymentStatus::Success)
                .await?;
        }

        let payout = if ledger.source == LedgerSource::Online {
            let payout = Payout {
                id: Uuid::new_v4(),
                ledger_id: ledger.id,
                landlord_id: lease.landlord_id,
                amount: ledger.amount,
                platform_fee: ledger.platform_fee,
                net_amount: ledger.net_amount,
                status: PayoutStatus::Completed,
                processed_at: Some(now),
            };
            tx.insert_payout(&payout).await?;
            Some(payout)
        } else {
            None
        };

        let received = Notice::PaymentReceived {
            payment_id: payment.id,
            amount: payment.amount,
            method: payment.method,
        };
        for recipient in [lease.tenant_id, lease.landlord_id] {
            tx.insert_notification(&NotificationEvent::new(recipient, lease.id, received.clone()))
                .await?;
        }

        if outcome.remainder.is_positive() {
            tracing::warn!(
                lease_id = %lease.id,
                payment_id = %payment.id,
                remainder = %outcome.remainder,
                "Payment exceeds outstanding charges, remainder left unallocated"
            );
            tx.insert_notification(&NotificationEvent::new(
                lease.landlord_id,
                lease.id,
                Notice::OverpaymentUnallocated {
                    payment_id: payment.id,
                    remainder: outcome.remainder,
                },
            ))
            .await?;
        }

        Ok(SettlementReceipt {
            payment,
            allocations,
            charges: outcome.allocations,
            ledger,
            payout,
            remainder: outcome.remainder,
        })
    }

    /// Record a tenant's proof of payment as a PENDING ledger row awaiting
    /// the landlord's review. Nothing is allocated yet.
    pub async fn submit_proof(&self, submission: ProofSubmission) -> Result<ProofReceipt, SettlementError> {
        validate_amount(submission.amount)?;
        let reference = submission.reference.trim().to_string();
        validate_reference(&reference)?;

        let mut tx = self.store.begin().await?;
        let lease = tx
            .lock_lease(submission.lease_id)
            .await?
            .ok_or(SettlementError::LeaseNotFound(submission.lease_id))?;
        if lease.tenant_id != submission.actor_id {
            return Err(SettlementError::Unauthorized(
                "Only the lease's tenant can submit proof of payment.".to_string(),
            ));
        }

        match self.guard.inspect(tx.as_mut(), &reference).await? {
            ReferenceState::Fresh => {}
            ReferenceState::Settled(existing) | ReferenceState::Open(existing)
                if existing.lease_id == lease.id && existing.source == LedgerSource::Proof =>
            {
                return Ok(ProofReceipt::Existing(existing));
            }
            ReferenceState::Settled(_) | ReferenceState::Open(_) => {
                return Err(SettlementError::DuplicateReference(reference));
            }
        }
        if tx.online_payment_exists(&reference).await? {
            return Err(SettlementError::DuplicateReference(reference));
        }

        let now = Utc::now();
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            lease_id: lease.id,
            tenant_id: lease.tenant_id,
            landlord_id: lease.landlord_id,
            reference,
            amount: submission.amount,
            platform_fee: Money::ZERO,
            net_amount: submission.amount,
            payment_method: PaymentMethod::BankTransfer,
            source: LedgerSource::Proof,
            status: LedgerStatus::Pending,
            payment_id: None,
            document: Some(submission.document),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        tx.insert_ledger(&entry).await?;
        tx.insert_notification(&NotificationEvent::new(
            lease.landlord_id,
            lease.id,
            Notice::ProofSubmitted {
                ledger_id: entry.id,
                amount: entry.amount,
                reference: entry.reference.clone(),
            },
        ))
        .await?;
        tx.commit().await?;

        tracing::info!(
            ledger_id = %entry.id,
            lease_id = %lease.id,
            reference = %entry.reference,
            amount = %entry.amount,
            "Proof of payment submitted for review"
        );
        Ok(ProofReceipt::Created(entry))
    }

    /// Move a PENDING proof to FAILED. Never creates a payment.
    pub async fn reject_proof(
        &self,
        actor_id: Uuid,
        ledger_id: Uuid,
        reason: Option<String>,
    ) -> Result<LedgerEntry, SettlementError> {
        let mut tx = self.store.begin().await?;
        let mut entry = tx
            .ledger_for_update(ledger_id)
            .await?
            .ok_or(SettlementError::LedgerNotFound(ledger_id))?;
        if entry.landlord_id != actor_id {
            return Err(SettlementError::Unauthorized(
                "Only the lease's landlord can reject this payment.".to_string(),
            ));
        }

        let from = SettlementState::of_ledger(entry.status);
        if from == SettlementState::Failed {
            return Ok(entry);
        }
        ensure_transition(&entry.reference, from, SettlementState::Failed)?;

        let reason = reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty());
        tx.update_ledger(entry.id, LedgerStatus::Failed, None, reason.as_deref())
            .await?;
        tx.insert_notification(&NotificationEvent::new(
            entry.tenant_id,
            entry.lease_id,
            Notice::ProofRejected {
                ledger_id: entry.id,
                reason: reason.clone(),
            },
        ))
        .await?;
        tx.commit().await?;

        entry.status = LedgerStatus::Failed;
        entry.failure_reason = reason;
        entry.updated_at = Utc::now();
        tracing::info!(ledger_id = %entry.id, reference = %entry.reference, "Proof of payment rejected");
        Ok(entry)
    }

    /// Mark a gateway session FAILED. A session that already settled is left
    /// alone. Returns the session's resulting status.
    pub async fn fail_online_payment(&self, reference: &str) -> Result<OnlinePaymentStatus, SettlementError> {
        let mut tx = self.store.begin().await?;
        let session = tx
            .online_payment_for_update(reference)
            .await?
            .ok_or_else(|| SettlementError::UnknownReference(reference.to_string()))?;
        if session.status != OnlinePaymentStatus::Pending {
            return Ok(session.status);
        }

        tx.update_online_payment_status(reference, OnlinePaymentStatus::Failed)
            .await?;
        tx.insert_notification(&NotificationEvent::new(
            session.tenant_id,
            session.lease_id,
            Notice::PaymentFailed {
                reference: reference.to_string(),
            },
        ))
        .await?;
        tx.commit().await?;

        tracing::warn!(reference = %reference, lease_id = %session.lease_id, "Online payment failed");
        Ok(OnlinePaymentStatus::Failed)
    }
}

/// Whether a SUCCESS row is this same payment arriving again. Gateway
/// references never replay as off-platform payments, nor the other way round.
fn is_replay(existing: &LedgerEntry, lease_id: Uuid, channel: LedgerSource) -> bool {
    existing.status == LedgerStatus::Success
        && existing.lease_id == lease_id
        && (existing.source == LedgerSource::Online) == (channel == LedgerSource::Online)
}

fn validate_amount(amount: Money) -> Result<(), SettlementError> {
    if !amount.is_positive() {
        return Err(SettlementError::Validation(
            "amount must be greater than zero.".to_string(),
        ));
    }
    if !amount.is_storable() {
        return Err(SettlementError::Validation(format!(
            "amount {amount} exceeds the largest amount a payment can record."
        )));
    }
    Ok(())
}

fn validate_reference(reference: &str) -> Result<(), SettlementError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(SettlementError::Validation("reference is required.".to_string()));
    }
    if reference.len() > MAX_REFERENCE_LEN {
        return Err(SettlementError::Validation(format!(
            "reference must be at most {MAX_REFERENCE_LEN} characters."
        )));
    }
    Ok(())
}

fn ensure_transition(
    reference: &str,
    from: SettlementState,
    to: SettlementState,
) -> Result<(), SettlementError> {
    if from.can_become(to) {
        return Ok(());
    }
    Err(SettlementError::InvalidTransition {
        reference: reference.to_string(),
        from,
        to,
    })
}
