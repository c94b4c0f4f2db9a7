use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

/// Generates `as_str`, `Display` and `FromStr` for status-like enums stored as text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: raw.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseStatus {
    Active,
    Terminated,
    Ended,
    Pending,
}

text_enum!(LeaseStatus {
    Active => "ACTIVE",
    Terminated => "TERMINATED",
    Ended => "ENDED",
    Pending => "PENDING",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub landlord_id: Uuid,
    pub unit_id: Uuid,
    pub rent_amount: Money,
    /// Day of month rent falls due, 1 to 28.
    pub due_day: i32,
    pub status: LeaseStatus,
}

impl Lease {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.landlord_id == user_id || self.tenant_id == user_id
    }
}

/// Calendar month a charge belongs to, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingMonth {
    year: i32,
    month: u32,
}

impl BillingMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    /// `None` when `day` does not exist in this month.
    pub fn day(self, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, day)
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid billing month '{0}', expected YYYY-MM")]
pub struct InvalidBillingMonth(pub String);

impl FromStr for BillingMonth {
    type Err = InvalidBillingMonth;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidBillingMonth(raw.to_string());
        let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl TryFrom<String> for BillingMonth {
    type Error = InvalidBillingMonth;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingMonth> for String {
    fn from(value: BillingMonth) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Unpaid,
    Partial,
    Paid,
    Overdue,
}

text_enum!(ChargeStatus {
    Unpaid => "UNPAID",
    Partial => "PARTIAL",
    Paid => "PAID",
    Overdue => "OVERDUE",
});

impl ChargeStatus {
    /// Status implied by the amounts alone.
    pub fn derive(amount_due: Money, amount_paid: Money) -> Self {
        if amount_paid >= amount_due {
            Self::Paid
        } else if amount_paid.is_positive() {
            Self::Partial
        } else {
            Self::Unpaid
        }
    }

    /// Status after a payment touched the charge. An OVERDUE escalation is
    /// kept until the charge is fully paid.
    pub fn after_payment(self, amount_due: Money, amount_paid: Money) -> Self {
        match Self::derive(amount_due, amount_paid) {
            Self::Paid => Self::Paid,
            _ if self == Self::Overdue => Self::Overdue,
            derived => derived,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Unpaid | Self::Partial | Self::Overdue)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RentCharge {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub month: BillingMonth,
    pub amount_due: Money,
    pub amount_paid: Money,
    pub status: ChargeStatus,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl RentCharge {
    pub fn new_unpaid(lease: &Lease, month: BillingMonth, due_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            lease_id: lease.id,
            month,
            amount_due: lease.rent_amount,
            amount_paid: Money::ZERO,
            status: ChargeStatus::Unpaid,
            due_date,
            created_at: Utc::now(),
        }
    }

    pub fn outstanding(&self) -> Money {
        (self.amount_due - self.amount_paid).max(Money::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
    Online,
    Other,
}

text_enum!(PaymentMethod {
    Cash => "CASH",
    BankTransfer => "BANK_TRANSFER",
    Card => "CARD",
    Online => "ONLINE",
    Other => "OTHER",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub tenant_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub date_paid: NaiveDate,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentAllocation {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub rent_charge_id: Uuid,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Pending,
    Success,
    Failed,
}

text_enum!(LedgerStatus {
    Pending => "PENDING",
    Success => "SUCCESS",
    Failed => "FAILED",
});

/// Channel a ledger row came in through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerSource {
    Manual,
    Proof,
    Online,
}

text_enum!(LedgerSource {
    Manual => "MANUAL",
    Proof => "PROOF",
    Online => "ONLINE",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub tenant_id: Uuid,
    pub landlord_id: Uuid,
    pub reference: String,
    pub amount: Money,
    pub platform_fee: Money,
    pub net_amount: Money,
    pub payment_method: PaymentMethod,
    pub source: LedgerSource,
    pub status: LedgerStatus,
    pub payment_id: Option<Uuid>,
    pub document: Option<DocumentHandle>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Opaque pointer to a stored proof-of-payment file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentHandle {
    pub key: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
}

text_enum!(PayoutStatus {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payout {
    pub id: Uuid,
    pub ledger_id: Uuid,
    pub landlord_id: Uuid,
    pub amount: Money,
    pub platform_fee: Money,
    pub net_amount: Money,
    pub status: PayoutStatus,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnlinePaymentStatus {
    Pending,
    Success,
    Failed,
}

text_enum!(OnlinePaymentStatus {
    Pending => "PENDING",
    Success => "SUCCESS",
    Failed => "FAILED",
});

/// Session opened with the gateway; bridges "payment initiated" and the webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnlinePayment {
    pub id: Uuid,
    pub reference: String,
    pub lease_id: Uuid,
    pub tenant_id: Uuid,
    pub amount: Money,
    pub status: OnlinePaymentStatus,
    pub access_code: Option<String>,
    pub authorization_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    PaymentReceived {
        payment_id: Uuid,
        amount: Money,
        method: PaymentMethod,
    },
    ProofSubmitted {
        ledger_id: Uuid,
        amount: Money,
        reference: String,
    },
    ProofRejected {
        ledger_id: Uuid,
        reason: Option<String>,
    },
    OverpaymentUnallocated {
        payment_id: Uuid,
        remainder: Money,
    },
    PaymentFailed {
        reference: String,
    },
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PaymentReceived { .. } => "payment_received",
            Self::ProofSubmitted { .. } => "proof_submitted",
            Self::ProofRejected { .. } => "proof_rejected",
            Self::OverpaymentUnallocated { .. } => "overpayment_unallocated",
            Self::PaymentFailed { .. } => "payment_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub lease_id: Uuid,
    pub notice: Notice,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(recipient_id: Uuid, lease_id: Uuid, notice: Notice) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id,
            lease_id,
            notice,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{BillingMonth, ChargeStatus, PaymentMethod};
    use crate::money::Money;

    #[test]
    fn derives_status_from_amounts() {
        let due = Money::from_major(1500);
        assert_eq!(ChargeStatus::derive(due, Money::from_major(1500)), ChargeStatus::Paid);
        assert_eq!(ChargeStatus::derive(due, Money::from_major(750)), ChargeStatus::Partial);
        assert_eq!(ChargeStatus::derive(due, Money::ZERO), ChargeStatus::Unpaid);
    }

    #[test]
    fn overdue_sticks_until_paid() {
        let due = Money::from_major(1000);
        let partial = Money::from_decimal(dec!(0.01));
        assert_eq!(
            ChargeStatus::Overdue.after_payment(due, partial),
            ChargeStatus::Overdue
        );
        assert_eq!(ChargeStatus::Overdue.after_payment(due, due), ChargeStatus::Paid);
        assert_eq!(
            ChargeStatus::Unpaid.after_payment(due, partial),
            ChargeStatus::Partial
        );
    }

    #[test]
    fn billing_month_parsing_and_rollover() {
        let month: BillingMonth = "2026-12".parse().unwrap();
        assert_eq!(month.next().to_string(), "2027-01");
        assert!("2026-13".parse::<BillingMonth>().is_err());
        assert!("26-01".parse::<BillingMonth>().is_err());
        assert_eq!(month.day(28).unwrap().to_string(), "2026-12-28");
        assert!(BillingMonth::new(2026, 2).unwrap().day(30).is_none());
    }

    #[test]
    fn payment_method_text_round_trip() {
        assert_eq!("bank_transfer".parse::<PaymentMethod>().unwrap(), PaymentMethod::BankTransfer);
        assert_eq!(PaymentMethod::Online.as_str(), "ONLINE");
        assert!("cheque".parse::<PaymentMethod>().is_err());
    }
}
