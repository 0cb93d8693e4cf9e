use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, Utc};

use super::domain::{
    AuditLogEntry, BranchId, Item, NewAuditEntry, NewItem, NewPayment, NewRequest, NewTariff,
    NewTicket, PawnTicket, Payment, PledgeRequest, RequestId, RequestStatus, Tariff, TicketId,
    TicketStatus, UserId,
};

/// Transactional storage for the pledge ledger.
///
/// `transaction` runs `work` against a consistent view of the ledger. When
/// `work` returns `Ok` every write it made is committed together; when it
/// returns `Err` none of them become visible.
pub trait PledgeStore: Send + Sync {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PledgeTx) -> Result<T, E>,
        E: From<RepositoryError>;
}

/// Reads and writes available inside one transaction.
///
/// Status changes are compare-and-set: they apply only while the row still
/// holds `from`, and report whether they did.
pub trait PledgeTx {
    fn tariffs(&self) -> Result<Vec<Tariff>, RepositoryError>;
    fn insert_tariff(&mut self, tariff: NewTariff) -> Result<Tariff, RepositoryError>;

    fn insert_request(&mut self, request: NewRequest) -> Result<PledgeRequest, RepositoryError>;
    fn fetch_request(&self, id: RequestId) -> Result<Option<PledgeRequest>, RepositoryError>;
    fn requests(&self, filter: &LedgerFilter) -> Result<Vec<PledgeRequest>, RepositoryError>;
    /// Number of requests a user has submitted so far; feeds request numbering.
    fn count_requests_by_user(&self, user_id: UserId) -> Result<u64, RepositoryError>;
    fn transition_request(
        &mut self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    fn insert_item(&mut self, item: NewItem) -> Result<Item, RepositoryError>;

    fn insert_ticket(&mut self, ticket: NewTicket) -> Result<PawnTicket, RepositoryError>;
    fn fetch_ticket(&self, id: TicketId) -> Result<Option<PawnTicket>, RepositoryError>;
    fn tickets(&self, filter: &LedgerFilter) -> Result<Vec<PawnTicket>, RepositoryError>;
    /// `issued` tickets whose end date is strictly before `as_of`.
    fn overdue_tickets(&self, as_of: NaiveDate) -> Result<Vec<PawnTicket>, RepositoryError>;
    fn transition_ticket(
        &mut self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, RepositoryError>;
    fn payments_for_ticket(&self, id: TicketId) -> Result<Vec<Payment>, RepositoryError>;

    fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditLogEntry, RepositoryError>;
    fn audit_log(&self) -> Result<Vec<AuditLogEntry>, RepositoryError>;
}

/// Narrows request and ticket listings. Empty `branches` means every branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFilter {
    pub branches: Vec<BranchId>,
    pub user_id: Option<UserId>,
}

impl LedgerFilter {
    pub fn for_branches(branches: &[BranchId]) -> Self {
        Self {
            branches: branches.to_vec(),
            user_id: None,
        }
    }

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            branches: Vec::new(),
            user_id: Some(user_id),
        }
    }

    pub fn matches(&self, branch_id: BranchId, user_id: UserId) -> bool {
        (self.branches.is_empty() || self.branches.contains(&branch_id))
            && self.user_id.map_or(true, |id| id == user_id)
    }
}

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Source of the current date and time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Wall-clock time in the shop's timezone; drives the daily schedule.
    fn local_now(&self) -> NaiveDateTime;

    /// Business date used for ticket terms and expiry.
    fn today(&self) -> NaiveDate {
        self.local_now().date()
    }
}

/// Host clock; the business date follows the local calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to. Local time is treated as UTC.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(current: NaiveDateTime) -> Self {
        Self {
            current: Mutex::new(current),
        }
    }

    /// Midday on `date`.
    pub fn on(date: NaiveDate) -> Self {
        Self::new(date.and_hms_opt(12, 0, 0).unwrap_or_default())
    }

    pub fn set(&self, current: NaiveDateTime) {
        *self.lock() = current;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NaiveDateTime> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().and_utc()
    }

    fn local_now(&self) -> NaiveDateTime {
        *self.lock()
    }
}
