//! Loan and ransom arithmetic. Everything here is exact decimal math with no I/O.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::domain::{Money, Tariff, TariffId};

/// Days counted as one interest month.
pub const DAYS_PER_MONTH: Decimal = dec!(30);

/// Standard loan term in days.
pub const DEFAULT_LOAN_TERM_DAYS: u32 = 30;

/// Fraction of the estimated cost advanced as a loan, clamped to the
/// tariff's bounds. A missing bound leaves that side unclamped.
pub fn loan_amount(estimated_cost: Money, tariff: &Tariff) -> Money {
    let mut amount = estimated_cost * tariff.loan_percent / Decimal::ONE_HUNDRED;
    if let Some(max) = tariff.max_loan {
        amount = amount.min(max);
    }
    if let Some(min) = tariff.min_loan {
        amount = amount.max(min);
    }
    amount
}

/// Principal plus simple monthly interest over `loan_days`, months being fractional.
pub fn ransom_amount(loan_amount: Money, interest_rate: Decimal, loan_days: u32) -> Money {
    let months = Decimal::from(loan_days) / DAYS_PER_MONTH;
    let monthly_rate = interest_rate / Decimal::ONE_HUNDRED;
    loan_amount * (Decimal::ONE + monthly_rate * months)
}

/// Round to cents, half away from zero, and carry exactly two fractional
/// digits as the ledger stores amounts.
pub fn to_cents(amount: Money) -> Money {
    let mut cents = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    cents.rescale(2);
    cents
}

/// Amounts a ticket is issued with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub tariff_id: TariffId,
    pub loan_amount: Money,
    pub ransom_amount: Money,
    pub term_days: u32,
}

impl LoanTerms {
    /// Ledger amounts for a pledge: the loan is rounded to cents first and the
    /// ransom is computed from the rounded loan. Tariff bounds are whole cents,
    /// so rounding never moves the loan outside them.
    pub fn for_pledge(estimated_cost: Money, tariff: &Tariff, term_days: u32) -> Self {
        let loan_amount = to_cents(loan_amount(estimated_cost, tariff));
        let ransom_amount = to_cents(ransom_amount(loan_amount, tariff.interest_rate, term_days));
        Self {
            tariff_id: tariff.id,
            loan_amount,
            ransom_amount,
            term_days,
        }
    }
}
