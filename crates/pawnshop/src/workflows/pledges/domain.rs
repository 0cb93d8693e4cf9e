use std::fmt;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed-point currency amount. Persisted with two fractional digits.
pub type Money = Decimal;

macro_rules! record_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )+
    };
}

record_id!(
    /// Customer or staff member acting on the ledger.
    UserId,
    BranchId,
    CategoryId,
    TariffId,
    RequestId,
    ItemId,
    TicketId,
    PaymentId,
    AuditEntryId,
);

/// Versioned rate rule. A `None` category or branch applies to all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub id: TariffId,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub branch_id: Option<BranchId>,
    pub loan_percent: Decimal,
    pub interest_rate: Decimal,
    pub min_loan: Option<Money>,
    pub max_loan: Option<Money>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub is_active: bool,
    pub description: Option<String>,
}

impl Tariff {
    /// Active and inside the validity window on `date` (both ends inclusive).
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.is_active
            && self.effective_from <= date
            && self.effective_to.map_or(true, |to| to >= date)
    }

    pub fn covers_amount(&self, amount: Money) -> bool {
        self.min_loan.map_or(true, |min| amount >= min)
            && self.max_loan.map_or(true, |max| amount <= max)
    }

    pub fn applies_to(&self, category_id: CategoryId, branch_id: BranchId) -> bool {
        self.category_id.map_or(true, |id| id == category_id)
            && self.branch_id.map_or(true, |id| id == branch_id)
    }
}

/// Tariff as configured, before the store assigns an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTariff {
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub branch_id: Option<BranchId>,
    pub loan_percent: Decimal,
    pub interest_rate: Decimal,
    pub min_loan: Option<Money>,
    pub max_loan: Option<Money>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub is_active: bool,
    pub description: Option<String>,
}

impl NewTariff {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.loan_percent < Decimal::ZERO || self.loan_percent > Decimal::ONE_HUNDRED {
            return Err(ValidationError::LoanPercentOutOfRange(self.loan_percent));
        }
        if self.interest_rate < Decimal::ZERO {
            return Err(ValidationError::NegativeAmount {
                field: "interest_rate",
                value: self.interest_rate,
            });
        }
        for (field, bound) in [("min_loan", self.min_loan), ("max_loan", self.max_loan)] {
            let Some(value) = bound else { continue };
            if value < Decimal::ZERO {
                return Err(ValidationError::NegativeAmount { field, value });
            }
            if value.normalize().scale() > 2 {
                return Err(ValidationError::SubCentAmount { field, value });
            }
        }
        if let (Some(min), Some(max)) = (self.min_loan, self.max_loan) {
            if min > max {
                return Err(ValidationError::InvertedLoanBounds { min, max });
            }
        }
        if let Some(to) = self.effective_to {
            if to <= self.effective_from {
                return Err(ValidationError::InvertedValidity {
                    from: self.effective_from,
                    to,
                });
            }
        }
        Ok(())
    }

    pub fn into_tariff(self, id: TariffId) -> Tariff {
        Tariff {
            id,
            name: self.name,
            category_id: self.category_id,
            branch_id: self.branch_id,
            loan_percent: self.loan_percent,
            interest_rate: self.interest_rate,
            min_loan: self.min_loan,
            max_loan: self.max_loan,
            effective_from: self.effective_from,
            effective_to: self.effective_to,
            is_active: self.is_active,
            description: self.description,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Submitted,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Values a customer provides when pledging an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSubmission {
    pub user_id: UserId,
    pub branch_id: BranchId,
    pub category_id: CategoryId,
    pub item_name: String,
    pub item_description: Option<String>,
    pub estimated_cost: Money,
}

impl RequestSubmission {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.item_name.trim().is_empty() {
            return Err(ValidationError::MissingField("item_name"));
        }
        if self.estimated_cost < Decimal::ZERO {
            return Err(ValidationError::NegativeAmount {
                field: "estimated_cost",
                value: self.estimated_cost,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequest {
    pub request_number: String,
    pub submission: RequestSubmission,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PledgeRequest {
    pub id: RequestId,
    pub request_number: String,
    pub user_id: UserId,
    pub branch_id: BranchId,
    pub category_id: CategoryId,
    pub item_name: String,
    pub item_description: Option<String>,
    pub estimated_cost: Money,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Physical pledge, materialized when its request is approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner_user_id: UserId,
    pub branch_id: BranchId,
    pub category_id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub estimated_cost: Money,
    pub declared_characteristics: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub owner_user_id: UserId,
    pub branch_id: BranchId,
    pub category_id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub estimated_cost: Money,
    pub declared_characteristics: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl NewItem {
    pub fn from_request(request: &PledgeRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            owner_user_id: request.user_id,
            branch_id: request.branch_id,
            category_id: request.category_id,
            name: request.item_name.clone(),
            description: request.item_description.clone(),
            estimated_cost: request.estimated_cost,
            declared_characteristics: None,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Issued,
    Redeemed,
    Defaulted,
}

impl TicketStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Redeemed => "redeemed",
            Self::Defaulted => "defaulted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "issued" => Some(Self::Issued),
            "redeemed" => Some(Self::Redeemed),
            "defaulted" => Some(Self::Defaulted),
            _ => None,
        }
    }
}

/// The loan contract issued against a pledged item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PawnTicket {
    pub id: TicketId,
    pub ticket_number: String,
    pub request_id: RequestId,
    pub user_id: UserId,
    pub item_id: ItemId,
    pub branch_id: BranchId,
    pub admission_date: NaiveDate,
    pub end_date: NaiveDate,
    pub loan_amount: Money,
    pub ransom_amount: Money,
    pub tariff_id: TariffId,
    pub status: TicketStatus,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PawnTicket {
    /// Still `issued` after its end date has passed.
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        self.status == TicketStatus::Issued && self.end_date < as_of
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    pub ticket_number: String,
    pub request_id: RequestId,
    pub user_id: UserId,
    pub item_id: ItemId,
    pub branch_id: BranchId,
    pub admission_date: NaiveDate,
    pub end_date: NaiveDate,
    pub loan_amount: Money,
    pub ransom_amount: Money,
    pub tariff_id: TariffId,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Ticket number for a request approved on `date`: `TKT-YYYYMMDD-<request id>`.
pub fn ticket_number(date: NaiveDate, request_id: RequestId) -> String {
    format!("TKT-{}-{}", date.format("%Y%m%d"), request_id)
}

/// Due date of a loan; a term running past the calendar is rejected.
pub fn loan_end_date(
    admission_date: NaiveDate,
    term_days: u32,
) -> Result<NaiveDate, ValidationError> {
    admission_date
        .checked_add_days(Days::new(u64::from(term_days)))
        .ok_or(ValidationError::LoanTermOutOfRange {
            admission_date,
            term_days,
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Ransom,
    Extension,
    Fee,
    Penalty,
}

impl PaymentType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ransom => "ransom",
            Self::Extension => "extension",
            Self::Fee => "fee",
            Self::Penalty => "penalty",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ransom" => Some(Self::Ransom),
            "extension" => Some(Self::Extension),
            "fee" => Some(Self::Fee),
            "penalty" => Some(Self::Penalty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub ticket_id: TicketId,
    pub amount: Money,
    pub payment_type: PaymentType,
    pub paid_at: DateTime<Utc>,
    pub processed_by: Option<UserId>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub ticket_id: TicketId,
    pub amount: Money,
    pub payment_type: PaymentType,
    pub paid_at: DateTime<Utc>,
    pub processed_by: Option<UserId>,
    pub note: Option<String>,
}

/// State-changing actions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CreateRequest,
    ApproveRequest,
    RejectRequest,
    RedeemTicket,
    TicketExpiredAuto,
}

impl AuditAction {
    pub const fn key(self) -> &'static str {
        match self {
            Self::CreateRequest => "create_request",
            Self::ApproveRequest => "approve_request",
            Self::RejectRequest => "reject_request",
            Self::RedeemTicket => "redeem_ticket",
            Self::TicketExpiredAuto => "ticket_expired_auto",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create_request" => Some(Self::CreateRequest),
            "approve_request" => Some(Self::ApproveRequest),
            "reject_request" => Some(Self::RejectRequest),
            "redeem_ticket" => Some(Self::RedeemTicket),
            "ticket_expired_auto" => Some(Self::TicketExpiredAuto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    /// `None` for actions the system takes on its own.
    pub actor: Option<UserId>,
    pub action: AuditAction,
    pub recorded_at: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub actor: Option<UserId>,
    pub action: AuditAction,
    pub recorded_at: DateTime<Utc>,
    pub payload: Value,
}

/// Out-of-range monetary or date values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    MissingField(&'static str),
    #[error("{field} must not be negative (got {value})")]
    NegativeAmount { field: &'static str, value: Decimal },
    #[error("loan percent must be within 0..=100 (got {0})")]
    LoanPercentOutOfRange(Decimal),
    #[error("min_loan {min} exceeds max_loan {max}")]
    InvertedLoanBounds { min: Decimal, max: Decimal },
    #[error("effective_to {to} must be after effective_from {from}")]
    InvertedValidity { from: NaiveDate, to: NaiveDate },
    #[error("{field} must be a whole number of cents (got {value})")]
    SubCentAmount { field: &'static str, value: Decimal },
    #[error("a {term_days}-day term from {admission_date} runs past the calendar")]
    LoanTermOutOfRange {
        admission_date: NaiveDate,
        term_days: u32,
    },
}
