use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

use super::super::domain::{
    AuditEntryId, AuditLogEntry, Item, ItemId, NewAuditEntry, NewItem, NewPayment, NewRequest,
    NewTariff, NewTicket, PawnTicket, Payment, PaymentId, PledgeRequest, RequestId,
    RequestStatus, Tariff, TariffId, TicketId, TicketStatus, UserId,
};
use super::super::repository::{LedgerFilter, PledgeStore, PledgeTx, RepositoryError};

/// In-process ledger.
///
/// A transaction works on a copy of the whole ledger while holding the lock
/// and swaps it in on success, so transactions are serializable and a failed
/// one leaves nothing behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: Mutex<Ledger>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PledgeStore for MemoryStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PledgeTx) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut committed = self
            .ledger
            .lock()
            .map_err(|_| RepositoryError::Unavailable("ledger lock poisoned".to_string()))?;
        let mut working = committed.clone();
        let outcome = work(&mut working)?;
        *committed = working;
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Default)]
struct Ledger {
    sequence: i64,
    tariffs: BTreeMap<TariffId, Tariff>,
    requests: BTreeMap<RequestId, PledgeRequest>,
    items: BTreeMap<ItemId, Item>,
    tickets: BTreeMap<TicketId, PawnTicket>,
    payments: BTreeMap<PaymentId, Payment>,
    audit: Vec<AuditLogEntry>,
}

impl Ledger {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }
}

impl PledgeTx for Ledger {
    fn tariffs(&self) -> Result<Vec<Tariff>, RepositoryError> {
        Ok(self.tariffs.values().cloned().collect())
    }

    fn insert_tariff(&mut self, tariff: NewTariff) -> Result<Tariff, RepositoryError> {
        let tariff = tariff.into_tariff(TariffId(self.next_id()));
        self.tariffs.insert(tariff.id, tariff.clone());
        Ok(tariff)
    }

    fn insert_request(&mut self, request: NewRequest) -> Result<PledgeRequest, RepositoryError> {
        if self
            .requests
            .values()
            .any(|existing| existing.request_number == request.request_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "request number {}",
                request.request_number
            )));
        }

        let submission = request.submission;
        let record = PledgeRequest {
            id: RequestId(self.next_id()),
            request_number: request.request_number,
            user_id: submission.user_id,
            branch_id: submission.branch_id,
            category_id: submission.category_id,
            item_name: submission.item_name,
            item_description: submission.item_description,
            estimated_cost: submission.estimated_cost,
            status: RequestStatus::Submitted,
            created_at: request.created_at,
            updated_at: request.created_at,
        };
        self.requests.insert(record.id, record.clone());
        Ok(record)
    }

    fn fetch_request(&self, id: RequestId) -> Result<Option<PledgeRequest>, RepositoryError> {
        Ok(self.requests.get(&id).cloned())
    }

    fn requests(&self, filter: &LedgerFilter) -> Result<Vec<PledgeRequest>, RepositoryError> {
        Ok(self
            .requests
            .values()
            .filter(|request| filter.matches(request.branch_id, request.user_id))
            .cloned()
            .collect())
    }

    fn count_requests_by_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        Ok(self
            .requests
            .values()
            .filter(|request| request.user_id == user_id)
            .count() as u64)
    }

    fn transition_request(
        &mut self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        match self.requests.get_mut(&id) {
            Some(request) if request.status == from => {
                request.status = to;
                request.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("request {id}"))),
        }
    }

    fn insert_item(&mut self, item: NewItem) -> Result<Item, RepositoryError> {
        let record = Item {
            id: ItemId(self.next_id()),
            owner_user_id: item.owner_user_id,
            branch_id: item.branch_id,
            category_id: item.category_id,
            name: item.name,
            description: item.description,
            estimated_cost: item.estimated_cost,
            declared_characteristics: item.declared_characteristics,
            created_at: item.created_at,
        };
        self.items.insert(record.id, record.clone());
        Ok(record)
    }

    fn insert_ticket(&mut self, ticket: NewTicket) -> Result<PawnTicket, RepositoryError> {
        if self
            .tickets
            .values()
            .any(|existing| existing.ticket_number == ticket.ticket_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "ticket number {}",
                ticket.ticket_number
            )));
        }
        if !self.items.contains_key(&ticket.item_id) {
            return Err(RepositoryError::NotFound(format!("item {}", ticket.item_id)));
        }

        let record = PawnTicket {
            id: TicketId(self.next_id()),
            ticket_number: ticket.ticket_number,
            request_id: ticket.request_id,
            user_id: ticket.user_id,
            item_id: ticket.item_id,
            branch_id: ticket.branch_id,
            admission_date: ticket.admission_date,
            end_date: ticket.end_date,
            loan_amount: ticket.loan_amount,
            ransom_amount: ticket.ransom_amount,
            tariff_id: ticket.tariff_id,
            status: TicketStatus::Issued,
            created_by: ticket.created_by,
            created_at: ticket.created_at,
            updated_at: ticket.created_at,
        };
        self.tickets.insert(record.id, record.clone());
        Ok(record)
    }

    fn fetch_ticket(&self, id: TicketId) -> Result<Option<PawnTicket>, RepositoryError> {
        Ok(self.tickets.get(&id).cloned())
    }

    fn tickets(&self, filter: &LedgerFilter) -> Result<Vec<PawnTicket>, RepositoryError> {
        Ok(self
            .tickets
            .values()
            .filter(|ticket| filter.matches(ticket.branch_id, ticket.user_id))
            .cloned()
            .collect())
    }

    fn overdue_tickets(&self, as_of: NaiveDate) -> Result<Vec<PawnTicket>, RepositoryError> {
        Ok(self
            .tickets
            .values()
            .filter(|ticket| ticket.is_overdue(as_of))
            .cloned()
            .collect())
    }

    fn transition_ticket(
        &mut self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        match self.tickets.get_mut(&id) {
            Some(ticket) if ticket.status == from => {
                ticket.status = to;
                ticket.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("ticket {id}"))),
        }
    }

    fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, RepositoryError> {
        if !self.tickets.contains_key(&payment.ticket_id) {
            return Err(RepositoryError::NotFound(format!(
                "ticket {}",
                payment.ticket_id
            )));
        }

        let record = Payment {
            id: PaymentId(self.next_id()),
            ticket_id: payment.ticket_id,
            amount: payment.amount,
            payment_type: payment.payment_type,
            paid_at: payment.paid_at,
            processed_by: payment.processed_by,
            note: payment.note,
        };
        self.payments.insert(record.id, record.clone());
        Ok(record)
    }

    fn payments_for_ticket(&self, id: TicketId) -> Result<Vec<Payment>, RepositoryError> {
        Ok(self
            .payments
            .values()
            .filter(|payment| payment.ticket_id == id)
            .cloned()
            .collect())
    }

    fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditLogEntry, RepositoryError> {
        let record = AuditLogEntry {
            id: AuditEntryId(self.next_id()),
            actor: entry.actor,
            action: entry.action,
            recorded_at: entry.recorded_at,
            payload: entry.payload,
        };
        self.audit.push(record.clone());
        Ok(record)
    }

    fn audit_log(&self) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        Ok(self.audit.clone())
    }
}
