use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::workflows::pledges::domain::{
    AuditLogEntry, BranchId, CategoryId, Item, NewAuditEntry, NewItem, NewPayment, NewRequest,
    NewTariff, NewTicket, PawnTicket, Payment, PledgeRequest, RequestId, RequestStatus,
    RequestSubmission, Tariff, TicketId, TicketStatus, UserId,
};
use crate::workflows::pledges::repository::{
    LedgerFilter, ManualClock, PledgeStore, PledgeTx, RepositoryError,
};
use crate::workflows::pledges::service::{LendingPolicy, PledgeService};
use crate::workflows::pledges::storage::MemoryStore;

pub(super) const CUSTOMER: UserId = UserId(7);
pub(super) const APPRAISER: UserId = UserId(90);
pub(super) const CASHIER: UserId = UserId(91);

pub(super) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Category 1 at branch 1: 50% of the estimate, 8% a month, loans 50..=2000.
pub(super) fn jewelry_tariff() -> NewTariff {
    NewTariff {
        name: "Jewelry, main branch".to_string(),
        category_id: Some(CategoryId(1)),
        branch_id: Some(BranchId(1)),
        loan_percent: dec!(50),
        interest_rate: dec!(8),
        min_loan: Some(dec!(50)),
        max_loan: Some(dec!(2000)),
        effective_from: date(2024, 1, 1),
        effective_to: None,
        is_active: true,
        description: None,
    }
}

pub(super) fn general_tariff(min: Option<Decimal>, max: Option<Decimal>) -> NewTariff {
    NewTariff {
        name: "General".to_string(),
        category_id: None,
        branch_id: None,
        loan_percent: dec!(40),
        interest_rate: dec!(10),
        min_loan: min,
        max_loan: max,
        effective_from: date(2023, 1, 1),
        effective_to: None,
        is_active: true,
        description: Some("catch-all rate".to_string()),
    }
}

pub(super) fn submission(branch: i64, cost: Decimal) -> RequestSubmission {
    RequestSubmission {
        user_id: CUSTOMER,
        branch_id: BranchId(branch),
        category_id: CategoryId(1),
        item_name: "Gold ring".to_string(),
        item_description: Some("18k, 4g".to_string()),
        estimated_cost: cost,
    }
}

pub(super) type MemoryService = PledgeService<MemoryStore, ManualClock>;

/// Service over an empty in-memory ledger whose clock reads midday on `today`.
pub(super) fn build_service(today: NaiveDate) -> (Arc<MemoryService>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::on(today));
    let service = PledgeService::new(store, clock.clone(), LendingPolicy::default());
    (Arc::new(service), clock)
}

/// Submit a request for `cost` at branch 1 and approve it.
pub(super) fn issue_ticket<S: PledgeStore>(
    service: &Arc<PledgeService<S, ManualClock>>,
    cost: Decimal,
) -> PawnTicket {
    let request = service
        .submit_request(submission(1, cost))
        .expect("request submitted");
    service
        .approve_request(request.id, APPRAISER)
        .expect("request approved")
}

/// In-memory store that injects failures on demand.
#[derive(Default)]
pub(super) struct FaultyStore {
    inner: MemoryStore,
    fail_audit: AtomicBool,
    fail_ticket: Mutex<Option<TicketId>>,
}

impl FaultyStore {
    pub(super) fn fail_audit_appends(&self, enabled: bool) {
        self.fail_audit.store(enabled, Ordering::SeqCst);
    }

    pub(super) fn fail_transitions_of(&self, ticket: TicketId) {
        *self.fail_ticket.lock().expect("fault lock") = Some(ticket);
    }
}

impl PledgeStore for FaultyStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PledgeTx) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let fail_audit = self.fail_audit.load(Ordering::SeqCst);
        let fail_ticket = *self.fail_ticket.lock().expect("fault lock");
        self.inner.transaction(|tx| {
            work(&mut FaultyTx {
                inner: tx,
                fail_audit,
                fail_ticket,
            })
        })
    }
}

struct FaultyTx<'a> {
    inner: &'a mut dyn PledgeTx,
    fail_audit: bool,
    fail_ticket: Option<TicketId>,
}

fn injected() -> RepositoryError {
    RepositoryError::Unavailable("injected fault".to_string())
}

impl PledgeTx for FaultyTx<'_> {
    fn tariffs(&self) -> Result<Vec<Tariff>, RepositoryError> {
        self.inner.tariffs()
    }

    fn insert_tariff(&mut self, tariff: NewTariff) -> Result<Tariff, RepositoryError> {
        self.inner.insert_tariff(tariff)
    }

    fn insert_request(&mut self, request: NewRequest) -> Result<PledgeRequest, RepositoryError> {
        self.inner.insert_request(request)
    }

    fn fetch_request(&self, id: RequestId) -> Result<Option<PledgeRequest>, RepositoryError> {
        self.inner.fetch_request(id)
    }

    fn requests(&self, filter: &LedgerFilter) -> Result<Vec<PledgeRequest>, RepositoryError> {
        self.inner.requests(filter)
    }

    fn count_requests_by_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        self.inner.count_requests_by_user(user_id)
    }

    fn transition_request(
        &mut self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner.transition_request(id, from, to, at)
    }

    fn insert_item(&mut self, item: NewItem) -> Result<Item, RepositoryError> {
        self.inner.insert_item(item)
    }

    fn insert_ticket(&mut self, ticket: NewTicket) -> Result<PawnTicket, RepositoryError> {
        self.inner.insert_ticket(ticket)
    }

    fn fetch_ticket(&self, id: TicketId) -> Result<Option<PawnTicket>, RepositoryError> {
        self.inner.fetch_ticket(id)
    }

    fn tickets(&self, filter: &LedgerFilter) -> Result<Vec<PawnTicket>, RepositoryError> {
        self.inner.tickets(filter)
    }

    fn overdue_tickets(&self, as_of: NaiveDate) -> Result<Vec<PawnTicket>, RepositoryError> {
        self.inner.overdue_tickets(as_of)
    }

    fn transition_ticket(
        &mut self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        if self.fail_ticket == Some(id) {
            return Err(injected());
        }
        self.inner.transition_ticket(id, from, to, at)
    }

    fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, RepositoryError> {
        self.inner.insert_payment(payment)
    }

    fn payments_for_ticket(&self, id: TicketId) -> Result<Vec<Payment>, RepositoryError> {
        self.inner.payments_for_ticket(id)
    }

    fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditLogEntry, RepositoryError> {
        if self.fail_audit {
            return Err(injected());
        }
        self.inner.append_audit(entry)
    }

    fn audit_log(&self) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        self.inner.audit_log()
    }
}

pub(super) fn faulty_service(
    today: NaiveDate,
) -> (Arc<PledgeService<FaultyStore, ManualClock>>, Arc<FaultyStore>) {
    let store = Arc::new(FaultyStore::default());
    let clock = Arc::new(ManualClock::on(today));
    let service = PledgeService::new(store.clone(), clock, LendingPolicy::default());
    (Arc::new(service), store)
}
