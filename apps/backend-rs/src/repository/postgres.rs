use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, types::Json, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{LedgerStore, LedgerTx, PaymentWithAllocations, StoreError, StoreResult};
use crate::{
    domain::{
        BillingMonth, ChargeStatus, DocumentHandle, Lease, LedgerEntry, LedgerStatus,
        NotificationEvent, OnlinePayment, OnlinePaymentStatus, Payment, PaymentAllocation, Payout,
        RentCharge,
    },
    money::Money,
};

const LEASE_COLUMNS: &str = "id, tenant_id, landlord_id, unit_id, rent_amount, due_day, status";
const CHARGE_COLUMNS: &str =
    "id, lease_id, month, amount_due, amount_paid, status, due_date, created_at";
const PAYMENT_COLUMNS: &str =
    "id, lease_id, tenant_id, amount, method, date_paid, reference, notes, created_at";
const LEDGER_COLUMNS: &str = "id, lease_id, tenant_id, landlord_id, reference, amount, \
     platform_fee, net_amount, payment_method, source, status, payment_id, document, \
     failure_reason, created_at, updated_at";
const ONLINE_PAYMENT_COLUMNS: &str = "id, reference, lease_id, tenant_id, amount, status, \
     access_code, authorization_url, created_at, updated_at";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_lease(&self, lease_id: Uuid) -> StoreResult<Option<Lease>> {
        let row = sqlx::query(&format!("SELECT {LEASE_COLUMNS} FROM leases WHERE id = $1"))
            .bind(lease_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lease_from_row).transpose()
    }

    async fn list_active_leases(&self) -> StoreResult<Vec<Lease>> {
        let rows = sqlx::query(&format!(
            "SELECT {LEASE_COLUMNS} FROM leases WHERE status = 'ACTIVE' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(lease_from_row).collect()
    }

    async fn list_charges(&self, lease_id: Uuid) -> StoreResult<Vec<RentCharge>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHARGE_COLUMNS} FROM rent_charges
             WHERE lease_id = $1
             ORDER BY due_date ASC, month ASC"
        ))
        .bind(lease_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(charge_from_row).collect()
    }

    async fn insert_charge_if_absent(&self, charge: &RentCharge) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO rent_charges
                (id, lease_id, month, amount_due, amount_paid, status, due_date, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT ON CONSTRAINT rent_charges_lease_month_key DO NOTHING",
        )
        .bind(charge.id)
        .bind(charge.lease_id)
        .bind(charge.month.to_string())
        .bind(charge.amount_due.as_decimal())
        .bind(charge.amount_paid.as_decimal())
        .bind(charge.status.as_str())
        .bind(charge.due_date)
        .bind(charge.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_payments(&self, lease_id: Uuid) -> StoreResult<Vec<PaymentWithAllocations>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE lease_id = $1
             ORDER BY created_at DESC
             LIMIT 500"
        ))
        .bind(lease_id)
        .fetch_all(&self.pool)
        .await?;
        let payments = rows.iter().map(payment_from_row).collect::<StoreResult<Vec<_>>>()?;

        let payment_ids = payments.iter().map(|payment| payment.id).collect::<Vec<_>>();
        let allocation_rows = sqlx::query(
            "SELECT id, payment_id, rent_charge_id, amount FROM payment_allocations
             WHERE payment_id = ANY($1)
             ORDER BY created_at ASC",
        )
        .bind(&payment_ids)
        .fetch_all(&self.pool)
        .await?;
        let mut by_payment: HashMap<Uuid, Vec<PaymentAllocation>> = HashMap::new();
        for row in &allocation_rows {
            let allocation = allocation_from_row(row)?;
            by_payment.entry(allocation.payment_id).or_default().push(allocation);
        }

        Ok(payments
            .into_iter()
            .map(|payment| PaymentWithAllocations {
                allocations: by_payment.remove(&payment.id).unwrap_or_default(),
                payment,
            })
            .collect())
    }

    async fn list_ledger_for_landlord(
        &self,
        landlord_id: Uuid,
        status: Option<LedgerStatus>,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM transaction_ledger
             WHERE landlord_id = $1 AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC
             LIMIT 500"
        ))
        .bind(landlord_id)
        .bind(status.map(|status| status.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ledger_from_row).collect()
    }

    async fn find_ledger_by_reference(&self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM transaction_ledger WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(ledger_from_row).transpose()
    }

    async fn get_online_payment(&self, reference: &str) -> StoreResult<Option<OnlinePayment>> {
        let row = sqlx::query(&format!(
            "SELECT {ONLINE_PAYMENT_COLUMNS} FROM online_payments WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(online_payment_from_row).transpose()
    }

    async fn insert_online_payment(&self, session: &OnlinePayment) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO online_payments
                (id, reference, lease_id, tenant_id, amount, status, access_code,
                 authorization_url, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(session.id)
        .bind(&session.reference)
        .bind(session.lease_id)
        .bind(session.tenant_id)
        .bind(session.amount.as_decimal())
        .bind(session.status.as_str())
        .bind(session.access_code.as_deref())
        .bind(session.authorization_url.as_deref())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_lease(&mut self, lease_id: Uuid) -> StoreResult<Option<Lease>> {
        let row = sqlx::query(&format!(
            "SELECT {LEASE_COLUMNS} FROM leases WHERE id = $1 FOR UPDATE"
        ))
        .bind(lease_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(lease_from_row).transpose()
    }

    async fn outstanding_charges(&mut self, lease_id: Uuid) -> StoreResult<Vec<RentCharge>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHARGE_COLUMNS} FROM rent_charges
             WHERE lease_id = $1 AND status IN ('UNPAID', 'PARTIAL', 'OVERDUE')
             ORDER BY due_date ASC, month ASC
             FOR UPDATE"
        ))
        .bind(lease_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(charge_from_row).collect()
    }

    async fn ledger_by_reference(&mut self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM transaction_ledger WHERE reference = $1 FOR UPDATE"
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(ledger_from_row).transpose()
    }

    async fn ledger_for_update(&mut self, ledger_id: Uuid) -> StoreResult<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM transaction_ledger WHERE id = $1 FOR UPDATE"
        ))
        .bind(ledger_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(ledger_from_row).transpose()
    }

    async fn online_payment_for_update(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<OnlinePayment>> {
        let row = sqlx::query(&format!(
            "SELECT {ONLINE_PAYMENT_COLUMNS} FROM online_payments WHERE reference = $1 FOR UPDATE"
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(online_payment_from_row).transpose()
    }

    async fn online_payment_exists(&mut self, reference: &str) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM online_payments WHERE reference = $1)",
        )
        .bind(reference)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn update_charge(
        &mut self,
        charge_id: Uuid,
        amount_paid: Money,
        status: ChargeStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE rent_charges SET amount_paid = $2, status = $3
             WHERE id = $1 AND amount_paid <= $2",
        )
        .bind(charge_id)
        .bind(amount_paid.as_decimal())
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() != 1 {
            return Err(StoreError::Corrupt {
                table: "rent_charges",
                message: format!("charge {charge_id} could not move to amount_paid {amount_paid}"),
            });
        }
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payments
                (id, lease_id, tenant_id, amount, method, date_paid, reference, notes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(payment.id)
        .bind(payment.lease_id)
        .bind(payment.tenant_id)
        .bind(payment.amount.as_decimal())
        .bind(payment.method.as_str())
        .bind(payment.date_paid)
        .bind(payment.reference.as_deref())
        .bind(payment.notes.as_deref())
        .bind(payment.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payment_allocations (id, payment_id, rent_charge_id, amount)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(allocation.id)
        .bind(allocation.payment_id)
        .bind(allocation.rent_charge_id)
        .bind(allocation.amount.as_decimal())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_ledger(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO transaction_ledger
                (id, lease_id, tenant_id, landlord_id, reference, amount, platform_fee,
                 net_amount, payment_method, source, status, payment_id, document,
                 failure_reason, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(entry.id)
        .bind(entry.lease_id)
        .bind(entry.tenant_id)
        .bind(entry.landlord_id)
        .bind(&entry.reference)
        .bind(entry.amount.as_decimal())
        .bind(entry.platform_fee.as_decimal())
        .bind(entry.net_amount.as_decimal())
        .bind(entry.payment_method.as_str())
        .bind(entry.source.as_str())
        .bind(entry.status.as_str())
        .bind(entry.payment_id)
        .bind(entry.document.as_ref().map(Json))
        .bind(entry.failure_reason.as_deref())
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_ledger(
        &mut self,
        ledger_id: Uuid,
        status: LedgerStatus,
        payment_id: Option<Uuid>,
        failure_reason: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE transaction_ledger
             SET status = $2,
                 payment_id = COALESCE($3, payment_id),
                 failure_reason = $4,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(ledger_id)
        .bind(status.as_str())
        .bind(payment_id)
        .bind(failure_reason)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_online_payment_status(
        &mut self,
        reference: &str,
        status: OnlinePaymentStatus,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE online_payments SET status = $2, updated_at = now() WHERE reference = $1",
        )
        .bind(reference)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_payout(&mut self, payout: &Payout) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payouts
                (id, ledger_id, landlord_id, amount, platform_fee, net_amount, status, processed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(payout.id)
        .bind(payout.ledger_id)
        .bind(payout.landlord_id)
        .bind(payout.amount.as_decimal())
        .bind(payout.platform_fee.as_decimal())
        .bind(payout.net_amount.as_decimal())
        .bind(payout.status.as_str())
        .bind(payout.processed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_notification(&mut self, event: &NotificationEvent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO notification_events (id, recipient_id, lease_id, kind, payload, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.recipient_id)
        .bind(event.lease_id)
        .bind(event.notice.kind())
        .bind(Json(&event.notice))
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }
}

fn corrupt(table: &'static str, message: impl ToString) -> StoreError {
    StoreError::Corrupt {
        table,
        message: message.to_string(),
    }
}

fn text_column<T>(row: &PgRow, table: &'static str, column: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: ToString,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|error| corrupt(table, error))
}

fn money_column(row: &PgRow, column: &str) -> StoreResult<Money> {
    Ok(Money::from_decimal(row.try_get::<Decimal, _>(column)?))
}

fn lease_from_row(row: &PgRow) -> StoreResult<Lease> {
    Ok(Lease {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        landlord_id: row.try_get("landlord_id")?,
        unit_id: row.try_get("unit_id")?,
        rent_amount: money_column(row, "rent_amount")?,
        due_day: row.try_get("due_day")?,
        status: text_column(row, "leases", "status")?,
    })
}

fn charge_from_row(row: &PgRow) -> StoreResult<RentCharge> {
    Ok(RentCharge {
        id: row.try_get("id")?,
        lease_id: row.try_get("lease_id")?,
        month: text_column::<BillingMonth>(row, "rent_charges", "month")?,
        amount_due: money_column(row, "amount_due")?,
        amount_paid: money_column(row, "amount_paid")?,
        status: text_column(row, "rent_charges", "status")?,
        due_date: row.try_get("due_date")?,
        created_at: row.try_get("created_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> StoreResult<Payment> {
    Ok(Payment {
        id: row.try_get("id")?,
        lease_id: row.try_get("lease_id")?,
        tenant_id: row.try_get("tenant_id")?,
        amount: money_column(row, "amount")?,
        method: text_column(row, "payments", "method")?,
        date_paid: row.try_get("date_paid")?,
        reference: row.try_get("reference")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
    })
}

fn allocation_from_row(row: &PgRow) -> StoreResult<PaymentAllocation> {
    Ok(PaymentAllocation {
        id: row.try_get("id")?,
        payment_id: row.try_get("payment_id")?,
        rent_charge_id: row.try_get("rent_charge_id")?,
        amount: money_column(row, "amount")?,
    })
}

fn ledger_from_row(row: &PgRow) -> StoreResult<LedgerEntry> {
    let document: Option<Json<DocumentHandle>> = row.try_get("document")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        lease_id: row.try_get("lease_id")?,
        tenant_id: row.try_get("tenant_id")?,
        landlord_id: row.try_get("landlord_id")?,
        reference: row.try_get("reference")?,
        amount: money_column(row, "amount")?,
        platform_fee: money_column(row, "platform_fee")?,
        net_amount: money_column(row, "net_amount")?,
        payment_method: text_column(row, "transaction_ledger", "payment_method")?,
        source: text_column(row, "transaction_ledger", "source")?,
        status: text_column(row, "transaction_ledger", "status")?,
        payment_id: row.try_get("payment_id")?,
        document: document.map(|Json(handle)| handle),
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn online_payment_from_row(row: &PgRow) -> StoreResult<OnlinePayment> {
    Ok(OnlinePayment {
        id: row.try_get("id")?,
        reference: row.try_get("reference")?,
        lease_id: row.try_get("lease_id")?,
        tenant_id: row.try_get("tenant_id")?,
        amount: money_column(row, "amount")?,
        status: text_column(row, "online_payments", "status")?,
        access_code: row.try_get("access_code")?,
        authorization_url: row.try_get("authorization_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
