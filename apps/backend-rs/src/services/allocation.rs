use serde::Serialize;
use uuid::Uuid;

use crate::{
    domain::{ChargeStatus, RentCharge},
    money::Money,
};

/// Portion of a payment applied to one charge, with the charge's resulting state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeAllocation {
    pub charge_id: Uuid,
    pub amount: Money,
    pub amount_paid: Money,
    pub status: ChargeStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AllocationOutcome {
    pub allocations: Vec<ChargeAllocation>,
    /// Money left after every outstanding charge was cleared.
    pub remainder: Money,
}

impl AllocationOutcome {
    pub fn allocated(&self) -> Money {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocationError {
    #[error("payment amount must not be negative (got {0})")]
    NegativeAmount(Money),
    #[error("charge {0} is not outstanding")]
    ChargeNotOutstanding(Uuid),
    #[error("charge {0} is out of due-date order")]
    ChargesOutOfOrder(Uuid),
}

/// Spread `amount` over `charges`, oldest due date first.
///
/// The caller passes outstanding charges already sorted by ascending due
/// date; the order is checked, never changed. Whatever is left once all
/// charges are cleared comes back as `remainder` and is not attached to any
/// charge.
pub fn allocate(amount: Money, charges: &[RentCharge]) -> Result<AllocationOutcome, AllocationError> {
    if amount.is_negative() {
        return Err(AllocationError::NegativeAmount(amount));
    }

    for pair in charges.windows(2) {
        if pair[1].due_date < pair[0].due_date {
            return Err(AllocationError::ChargesOutOfOrder(pair[1].id));
        }
    }
    if let Some(closed) = charges
        .iter()
        .find(|charge| !charge.status.is_open() || charge.outstanding().is_zero())
    {
        return Err(AllocationError::ChargeNotOutstanding(closed.id));
    }

    let mut remaining = amount;
    let mut allocations = Vec::new();

    for charge in charges {
        if remaining.is_zero() {
            break;
        }

        let applied = charge.outstanding().min(remaining);
        let amount_paid = charge.amount_paid + applied;
        remaining -= applied;

        allocations.push(ChargeAllocation {
            charge_id: charge.id,
            amount: applied,
            amount_paid,
            status: charge.status.after_payment(charge.amount_due, amount_paid),
        });
    }

    Ok(AllocationOutcome {
        allocations,
        remainder: remaining,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::{allocate, AllocationError};
    use crate::{
        domain::{BillingMonth, ChargeStatus, RentCharge},
        money::Money,
    };

    fn charge(month: &str, due: Money, paid: Money) -> RentCharge {
        let month: BillingMonth = month.parse().expect("valid month");
        RentCharge {
            id: Uuid::new_v4(),
            lease_id: Uuid::nil(),
            month,
            amount_due: due,
            amount_paid: paid,
            status: ChargeStatus::derive(due, paid),
            due_date: month.day(1).expect("valid day"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pays_oldest_charge_first() {
        let jan = charge("2026-01", Money::from_major(500), Money::ZERO);
        let feb = charge("2026-02", Money::from_major(1000), Money::ZERO);

        let outcome = allocate(Money::from_major(700), &[jan.clone(), feb.clone()]).unwrap();

        assert_eq!(outcome.allocations.len(), 2);
        assert_eq!(outcome.allocations[0].charge_id, jan.id);
        assert_eq!(outcome.allocations[0].amount, Money::from_major(500));
        assert_eq!(outcome.allocations[0].status, ChargeStatus::Paid);
        assert_eq!(outcome.allocations[1].charge_id, feb.id);
        assert_eq!(outcome.allocations[1].amount, Money::from_major(200));
        assert_eq!(outcome.allocations[1].status, ChargeStatus::Partial);
        assert_eq!(outcome.remainder, Money::ZERO);
    }

    #[test]
    fn conserves_the_payment_exactly() {
        let charges = vec![
            charge("2026-01", Money::from_decimal(dec!(333.33)), Money::from_decimal(dec!(0.01))),
            charge("2026-02", Money::from_decimal(dec!(333.33)), Money::ZERO),
            charge("2026-03", Money::from_decimal(dec!(333.34)), Money::ZERO),
        ];
        for raw in [dec!(0.01), dec!(333.32), dec!(666.65), dec!(999.99), dec!(1500.10)] {
            let amount = Money::from_decimal(raw);
            let outcome = allocate(amount, &charges).unwrap();
            assert_eq!(outcome.allocated() + outcome.remainder, amount);
            for (allocation, charge) in outcome.allocations.iter().zip(&charges) {
                assert!(allocation.amount_paid <= charge.amount_due);
            }
        }
    }

    #[test]
    fn returns_overpayment_as_remainder() {
        let jan = charge("2026-01", Money::from_major(500), Money::from_major(200));
        let outcome = allocate(Money::from_major(400), &[jan]).unwrap();

        assert_eq!(outcome.allocations[0].amount, Money::from_major(300));
        assert_eq!(outcome.allocations[0].amount_paid, Money::from_major(500));
        assert_eq!(outcome.remainder, Money::from_major(100));
    }

    #[test]
    fn zero_amount_is_a_noop() {
        let jan = charge("2026-01", Money::from_major(500), Money::ZERO);
        let outcome = allocate(Money::ZERO, &[jan]).unwrap();
        assert!(outcome.allocations.is_empty());
        assert_eq!(outcome.remainder, Money::ZERO);
    }

    #[test]
    fn no_charges_leaves_everything_as_remainder() {
        let outcome = allocate(Money::from_major(250), &[]).unwrap();
        assert!(outcome.allocations.is_empty());
        assert_eq!(outcome.remainder, Money::from_major(250));
    }

    #[test]
    fn rejects_bad_input() {
        let jan = charge("2026-01", Money::from_major(500), Money::ZERO);
        let feb = charge("2026-02", Money::from_major(500), Money::ZERO);
        let paid = charge("2026-03", Money::from_major(500), Money::from_major(500));

        assert!(matches!(
            allocate(Money::from_major(-1), &[jan.clone()]),
            Err(AllocationError::NegativeAmount(_))
        ));
        assert_eq!(
            allocate(Money::from_major(10), &[feb.clone(), jan.clone()]),
            Err(AllocationError::ChargesOutOfOrder(jan.id))
        );
        assert_eq!(
            allocate(Money::from_major(10), &[jan, paid.clone()]),
            Err(AllocationError::ChargeNotOutstanding(paid.id))
        );
    }

    #[test]
    fn same_due_date_keeps_caller_order() {
        let mut first = charge("2026-01", Money::from_major(100), Money::ZERO);
        let mut second = charge("2026-01", Money::from_major(100), Money::ZERO);
        let due = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        first.due_date = due;
        second.due_date = due;

        let outcome = allocate(Money::from_major(150), &[first.clone(), second.clone()]).unwrap();
        assert_eq!(outcome.allocations[0].charge_id, first.id);
        assert_eq!(outcome.allocations[0].status, ChargeStatus::Paid);
        assert_eq!(outcome.allocations[1].charge_id, second.id);
        assert_eq!(outcome.allocations[1].amount, Money::from_major(50));
    }
}
