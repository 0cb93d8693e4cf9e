use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::domain::{
    loan_end_date, ticket_number, AuditAction, AuditLogEntry, BranchId, CategoryId, Money,
    NewAuditEntry, NewItem, NewPayment, NewRequest, NewTariff, NewTicket, PawnTicket, Payment,
    PaymentType, PledgeRequest, RequestId, RequestStatus, RequestSubmission, Tariff, TicketId,
    TicketStatus, UserId, ValidationError,
};
use super::pricing::{LoanTerms, DEFAULT_LOAN_TERM_DAYS};
use super::report::PortfolioReport;
use super::repository::{Clock, LedgerFilter, PledgeStore, PledgeTx, RepositoryError};
use super::tariffs::{self, ResolvedTariff, TariffQuery};

/// Lending parameters applied at approval time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingPolicy {
    pub loan_term_days: u32,
}

impl Default for LendingPolicy {
    fn default() -> Self {
        Self {
            loan_term_days: DEFAULT_LOAN_TERM_DAYS,
        }
    }
}

/// Preview of the amounts an approval would issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanQuote {
    pub request_id: RequestId,
    pub as_of: NaiveDate,
    pub tariff: ResolvedTariff,
    pub loan_amount: Money,
    pub ransom_amount: Money,
    pub term_days: u32,
    pub end_date: NaiveDate,
}

/// Ticket lifecycle over a transactional store and a clock.
///
/// Every mutating operation runs in a single store transaction, re-reads the
/// status it depends on inside that transaction, and flips it with a
/// compare-and-set, so concurrent redemption and expiry resolve to whichever
/// commits first.
pub struct PledgeService<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    policy: LendingPolicy,
}

impl<S, C> PledgeService<S, C>
where
    S: PledgeStore,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: Arc<C>, policy: LendingPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn policy(&self) -> LendingPolicy {
        self.policy
    }

    /// Validate and persist tariff rows in one transaction; nothing is stored
    /// when any row is invalid.
    pub fn import_tariffs(&self, drafts: Vec<NewTariff>) -> Result<Vec<Tariff>, LendingError> {
        for draft in &drafts {
            draft.validate()?;
        }

        let stored = self.store.transaction(|tx| {
            drafts
                .into_iter()
                .map(|draft| tx.insert_tariff(draft))
                .collect::<Result<Vec<_>, _>>()
        })?;
        info!(count = stored.len(), "tariffs imported");
        Ok(stored)
    }

    pub fn tariffs(&self) -> Result<Vec<Tariff>, LendingError> {
        Ok(self.store.transaction(|tx| tx.tariffs())?)
    }

    /// Best tariff for the given pledge, or `None` when nothing applies.
    pub fn resolve_tariff(
        &self,
        category_id: CategoryId,
        branch_id: BranchId,
        estimated_value: Money,
        as_of: NaiveDate,
    ) -> Result<Option<ResolvedTariff>, LendingError> {
        let query = TariffQuery {
            category_id,
            branch_id,
            estimated_value,
            as_of,
        };
        let candidates = self.tariffs()?;
        Ok(tariffs::resolve(&candidates, &query))
    }

    /// Record a new pledge request as `submitted`.
    pub fn submit_request(
        &self,
        submission: RequestSubmission,
    ) -> Result<PledgeRequest, LendingError> {
        submission.validate()?;
        let created_at = self.clock.now();
        let today = self.clock.today();

        let request = self.store.transaction(|tx| {
            let sequence = tx.count_requests_by_user(submission.user_id)? + 1;
            let request_number = format!(
                "REQ-{}-{}-{}",
                today.format("%Y%m%d"),
                submission.user_id,
                sequence
            );
            let actor = submission.user_id;
            let request = tx.insert_request(NewRequest {
                request_number,
                submission,
                created_at,
            })?;
            tx.append_audit(NewAuditEntry {
                actor: Some(actor),
                action: AuditAction::CreateRequest,
                recorded_at: created_at,
                payload: json!({
                    "request_id": request.id,
                    "request_number": request.request_number,
                    "item_name": request.item_name,
                    "estimated_cost": request.estimated_cost.to_string(),
                }),
            })?;
            Ok::<_, LendingError>(request)
        })?;

        info!(
            request_id = %request.id,
            request_number = %request.request_number,
            user_id = %request.user_id,
            "pledge request submitted"
        );
        Ok(request)
    }

    /// Amounts an approval would issue for `request_id` on `as_of` (defaults to today).
    pub fn quote(
        &self,
        request_id: RequestId,
        as_of: Option<NaiveDate>,
    ) -> Result<LoanQuote, LendingError> {
        let as_of = as_of.unwrap_or_else(|| self.clock.today());
        let term_days = self.policy.loan_term_days;

        self.store.transaction(|tx| {
            let request = fetch_request(tx, request_id)?;
            let resolved = resolve_for(tx, &request, as_of)?;
            let terms = LoanTerms::for_pledge(request.estimated_cost, &resolved.tariff, term_days);
            let end_date = loan_end_date(as_of, term_days)?;
            Ok(LoanQuote {
                request_id,
                as_of,
                tariff: resolved,
                loan_amount: terms.loan_amount,
                ransom_amount: terms.ransom_amount,
                term_days,
                end_date,
            })
        })
    }

    /// Approve a submitted request: materialize the item, issue the ticket,
    /// and mark the request `approved`, all or nothing.
    pub fn approve_request(
        &self,
        request_id: RequestId,
        approver: UserId,
    ) -> Result<PawnTicket, LendingError> {
        let now = self.clock.now();
        let today = self.clock.today();
        let term_days = self.policy.loan_term_days;

        let (ticket, resolved) = self.store.transaction(|tx| {
            let request = fetch_request(tx, request_id)?;
            ensure_request_status(&request, RequestStatus::Submitted)?;

            let resolved = resolve_for(tx, &request, today)?;
            let terms = LoanTerms::for_pledge(request.estimated_cost, &resolved.tariff, term_days);
            let end_date = loan_end_date(today, term_days)?;

            let item = tx.insert_item(NewItem::from_request(&request, now))?;
            let ticket = tx.insert_ticket(NewTicket {
                ticket_number: ticket_number(today, request.id),
                request_id: request.id,
                user_id: request.user_id,
                item_id: item.id,
                branch_id: request.branch_id,
                admission_date: today,
                end_date,
                loan_amount: terms.loan_amount,
                ransom_amount: terms.ransom_amount,
                tariff_id: terms.tariff_id,
                created_by: Some(approver),
                created_at: now,
            })?;

            if !tx.transition_request(
                request.id,
                RequestStatus::Submitted,
                RequestStatus::Approved,
                now,
            )? {
                return Err(LendingError::request_state(&request, RequestStatus::Submitted));
            }

            tx.append_audit(NewAuditEntry {
                actor: Some(approver),
                action: AuditAction::ApproveRequest,
                recorded_at: now,
                payload: json!({
                    "request_id": request.id,
                    "request_number": request.request_number,
                    "ticket_id": ticket.id,
                    "ticket_number": ticket.ticket_number,
                    "tariff_id": resolved.tariff.id,
                    "tariff_phase": resolved.phase,
                    "loan_amount": ticket.loan_amount.to_string(),
                    "ransom_amount": ticket.ransom_amount.to_string(),
                }),
            })?;
            Ok::<_, LendingError>((ticket, resolved))
        })?;

        info!(
            request_id = %request_id,
            ticket_number = %ticket.ticket_number,
            tariff_id = %resolved.tariff.id,
            tier = resolved.tier.rank(),
            loan_amount = %ticket.loan_amount,
            ransom_amount = %ticket.ransom_amount,
            "pledge request approved"
        );
        Ok(ticket)
    }

    /// Reject a submitted request. No ticket is created.
    pub fn reject_request(
        &self,
        request_id: RequestId,
        approver: UserId,
    ) -> Result<PledgeRequest, LendingError> {
        let now = self.clock.now();

        let request = self.store.transaction(|tx| {
            let request = fetch_request(tx, request_id)?;
            ensure_request_status(&request, RequestStatus::Submitted)?;

            if !tx.transition_request(
                request.id,
                RequestStatus::Submitted,
                RequestStatus::Rejected,
                now,
            )? {
                return Err(LendingError::request_state(&request, RequestStatus::Submitted));
            }
            tx.append_audit(NewAuditEntry {
                actor: Some(approver),
                action: AuditAction::RejectRequest,
                recorded_at: now,
                payload: json!({
                    "request_id": request.id,
                    "request_number": request.request_number,
                }),
            })?;
            fetch_request(tx, request_id)
        })?;

        info!(request_id = %request_id, approver = %approver, "pledge request rejected");
        Ok(request)
    }

    /// Buy back an issued ticket, recording the ransom payment.
    pub fn redeem_ticket(
        &self,
        ticket_id: TicketId,
        processor: UserId,
    ) -> Result<Payment, LendingError> {
        let now = self.clock.now();

        let payment = self.store.transaction(|tx| {
            let ticket = fetch_ticket(tx, ticket_id)?;
            ensure_ticket_status(&ticket, TicketStatus::Issued)?;

            if !tx.transition_ticket(ticket.id, TicketStatus::Issued, TicketStatus::Redeemed, now)? {
                return Err(LendingError::ticket_state(&ticket, TicketStatus::Issued));
            }
            let payment = tx.insert_payment(NewPayment {
                ticket_id: ticket.id,
                amount: ticket.ransom_amount,
                payment_type: PaymentType::Ransom,
                paid_at: now,
                processed_by: Some(processor),
                note: Some(format!("ransom for {}", ticket.ticket_number)),
            })?;
            tx.append_audit(NewAuditEntry {
                actor: Some(processor),
                action: AuditAction::RedeemTicket,
                recorded_at: now,
                payload: json!({
                    "ticket_id": ticket.id,
                    "ticket_number": ticket.ticket_number,
                    "payment_id": payment.id,
                    "amount": payment.amount.to_string(),
                }),
            })?;
            Ok::<_, LendingError>(payment)
        })?;

        info!(
            ticket_id = %ticket_id,
            processor = %processor,
            amount = %payment.amount,
            "ticket redeemed"
        );
        Ok(payment)
    }

    /// Default every `issued` ticket whose end date is before `as_of`.
    ///
    /// Each ticket is flipped in its own transaction. A ticket that fails is
    /// logged and skipped; the return value counts only tickets this call
    /// actually defaulted, so a repeated sweep for the same day returns zero.
    pub fn sweep_expired(&self, as_of: NaiveDate) -> Result<usize, LendingError> {
        let overdue = self.store.transaction(|tx| tx.overdue_tickets(as_of))?;
        let mut defaulted = 0;

        for ticket in &overdue {
            match self.expire_ticket(ticket, as_of) {
                Ok(true) => defaulted += 1,
                Ok(false) => debug!(
                    ticket_number = %ticket.ticket_number,
                    "ticket left issued state before expiry"
                ),
                Err(err) => warn!(
                    ticket_number = %ticket.ticket_number,
                    error = %err,
                    "failed to default expired ticket"
                ),
            }
        }

        info!(%as_of, candidates = overdue.len(), defaulted, "expiry sweep finished");
        Ok(defaulted)
    }

    fn expire_ticket(&self, ticket: &PawnTicket, as_of: NaiveDate) -> Result<bool, LendingError> {
        let now = self.clock.now();
        self.store.transaction(|tx| {
            if !tx.transition_ticket(ticket.id, TicketStatus::Issued, TicketStatus::Defaulted, now)? {
                return Ok(false);
            }
            tx.append_audit(NewAuditEntry {
                actor: None,
                action: AuditAction::TicketExpiredAuto,
                recorded_at: now,
                payload: json!({
                    "ticket_id": ticket.id,
                    "ticket_number": ticket.ticket_number,
                    "end_date": ticket.end_date,
                    "as_of": as_of,
                }),
            })?;
            Ok(true)
        })
    }

    /// A borrower's tickets, newest first. Expired tickets are swept before
    /// listing so the borrower never sees a stale `issued` status.
    pub fn borrower_tickets(&self, user_id: UserId) -> Result<Vec<PawnTicket>, LendingError> {
        if let Err(err) = self.sweep_expired(self.clock.today()) {
            warn!(user_id = %user_id, error = %err, "opportunistic expiry sweep failed");
        }

        let mut tickets = self
            .store
            .transaction(|tx| tx.tickets(&LedgerFilter::for_user(user_id)))?;
        tickets.sort_by(|left, right| {
            right
                .created_at
                .cmp(&left.created_at)
                .then_with(|| right.id.cmp(&left.id))
        });
        Ok(tickets)
    }

    /// Tickets of the given branches (empty = all), soonest end date first.
    pub fn branch_tickets(
        &self,
        branches: &[BranchId],
        status: Option<TicketStatus>,
    ) -> Result<Vec<PawnTicket>, LendingError> {
        let mut tickets = self
            .store
            .transaction(|tx| tx.tickets(&LedgerFilter::for_branches(branches)))?;
        tickets.retain(|ticket| status.map_or(true, |status| ticket.status == status));
        tickets.sort_by(|left, right| {
            left.end_date
                .cmp(&right.end_date)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(tickets)
    }

    pub fn portfolio_report(&self, branches: &[BranchId]) -> Result<PortfolioReport, LendingError> {
        let filter = LedgerFilter::for_branches(branches);
        let (requests, tickets) = self.store.transaction(|tx| {
            Ok::<_, RepositoryError>((tx.requests(&filter)?, tx.tickets(&filter)?))
        })?;
        Ok(PortfolioReport::build(
            branches,
            self.clock.today(),
            &requests,
            &tickets,
        ))
    }

    pub fn request(&self, request_id: RequestId) -> Result<PledgeRequest, LendingError> {
        self.store.transaction(|tx| fetch_request(tx, request_id))
    }

    pub fn ticket(&self, ticket_id: TicketId) -> Result<PawnTicket, LendingError> {
        self.store.transaction(|tx| fetch_ticket(tx, ticket_id))
    }

    pub fn payments(&self, ticket_id: TicketId) -> Result<Vec<Payment>, LendingError> {
        self.store.transaction(|tx| {
            fetch_ticket(tx, ticket_id)?;
            Ok(tx.payments_for_ticket(ticket_id)?)
        })
    }

    pub fn audit_log(&self) -> Result<Vec<AuditLogEntry>, LendingError> {
        Ok(self.store.transaction(|tx| tx.audit_log())?)
    }
}

fn fetch_request(tx: &dyn PledgeTx, id: RequestId) -> Result<PledgeRequest, LendingError> {
    tx.fetch_request(id)?.ok_or(LendingError::NotFound {
        entity: "request",
        id: id.0,
    })
}

fn fetch_ticket(tx: &dyn PledgeTx, id: TicketId) -> Result<PawnTicket, LendingError> {
    tx.fetch_ticket(id)?.ok_or(LendingError::NotFound {
        entity: "ticket",
        id: id.0,
    })
}

fn resolve_for(
    tx: &dyn PledgeTx,
    request: &PledgeRequest,
    as_of: NaiveDate,
) -> Result<ResolvedTariff, LendingError> {
    let query = TariffQuery {
        category_id: request.category_id,
        branch_id: request.branch_id,
        estimated_value: request.estimated_cost,
        as_of,
    };
    tariffs::resolve(&tx.tariffs()?, &query).ok_or(LendingError::NoApplicableTariff {
        category_id: request.category_id,
        branch_id: request.branch_id,
    })
}

fn ensure_request_status(
    request: &PledgeRequest,
    expected: RequestStatus,
) -> Result<(), LendingError> {
    if request.status == expected {
        Ok(())
    } else {
        Err(LendingError::request_state(request, expected))
    }
}

fn ensure_ticket_status(ticket: &PawnTicket, expected: TicketStatus) -> Result<(), LendingError> {
    if ticket.status == expected {
        Ok(())
    } else {
        Err(LendingError::ticket_state(ticket, expected))
    }
}

/// Error raised by the lending workflow.
#[derive(Debug, thiserror::Error)]
pub enum LendingError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{entity} {id} is {actual}, expected {expected}")]
    InvalidState {
        entity: &'static str,
        id: i64,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("no applicable tariff for category {category_id} at branch {branch_id}")]
    NoApplicableTariff {
        category_id: CategoryId,
        branch_id: BranchId,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

impl LendingError {
    fn request_state(request: &PledgeRequest, expected: RequestStatus) -> Self {
        Self::InvalidState {
            entity: "request",
            id: request.id.0,
            expected: expected.label(),
            actual: request.status.label(),
        }
    }

    fn ticket_state(ticket: &PawnTicket, expected: TicketStatus) -> Self {
        Self::InvalidState {
            entity: "ticket",
            id: ticket.id.0,
            expected: expected.label(),
            actual: ticket.status.label(),
        }
    }
}
