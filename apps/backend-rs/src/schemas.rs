use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    domain::{BillingMonth, LedgerStatus, PaymentMethod},
    error::AppError,
    money::Money,
};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn storable_amount(amount: &Money) -> Result<(), ValidationError> {
    if amount.is_storable() {
        return Ok(());
    }
    Err(ValidationError::new("amount_out_of_range"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasePath {
    pub lease_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerPath {
    pub ledger_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferencePath {
    pub reference: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateManualPaymentInput {
    #[validate(custom(function = "storable_amount"))]
    pub amount: Money,
    pub method: PaymentMethod,
    /// Defaults to today.
    pub date_paid: Option<NaiveDate>,
    #[validate(length(min = 1, max = 120))]
    pub reference: Option<String>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RejectProofInput {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProofsQuery {
    pub status: Option<LedgerStatus>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StartOnlinePaymentInput {
    /// Defaults to everything outstanding on the lease.
    #[validate(custom(function = "storable_amount"))]
    pub amount: Option<Money>,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateChargesQuery {
    pub month: Option<BillingMonth>,
}
