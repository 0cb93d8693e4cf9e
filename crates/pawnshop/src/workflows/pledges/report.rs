use chrono::NaiveDate;
use serde::Serialize;

use super::domain::{BranchId, Money, PawnTicket, PledgeRequest, RequestStatus, TicketStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TicketStats {
    pub total: usize,
    pub active: usize,
    pub redeemed: usize,
    pub defaulted: usize,
    /// Still `issued` although the end date has passed; the next sweep defaults them.
    pub overdue: usize,
    pub loaned: Money,
    pub ransom_due: Money,
    /// Loan principal of tickets that are still `issued`.
    pub outstanding: Money,
}

/// Branch-level snapshot of the pledge book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortfolioReport {
    /// Branches covered; empty means all of them.
    pub branches: Vec<BranchId>,
    pub as_of: NaiveDate,
    pub requests: RequestStats,
    pub tickets: TicketStats,
}

impl PortfolioReport {
    pub fn build(
        branches: &[BranchId],
        as_of: NaiveDate,
        requests: &[PledgeRequest],
        tickets: &[PawnTicket],
    ) -> Self {
        let mut request_stats = RequestStats::default();
        for request in requests {
            request_stats.total += 1;
            match request.status {
                RequestStatus::Submitted => request_stats.pending += 1,
                RequestStatus::Approved => request_stats.approved += 1,
                RequestStatus::Rejected => request_stats.rejected += 1,
            }
        }

        let mut ticket_stats = TicketStats::default();
        for ticket in tickets {
            ticket_stats.total += 1;
            ticket_stats.loaned += ticket.loan_amount;
            ticket_stats.ransom_due += ticket.ransom_amount;
            match ticket.status {
                TicketStatus::Issued => {
                    ticket_stats.active += 1;
                    ticket_stats.outstanding += ticket.loan_amount;
                    if ticket.is_overdue(as_of) {
                        ticket_stats.overdue += 1;
                    }
                }
                TicketStatus::Redeemed => ticket_stats.redeemed += 1,
                TicketStatus::Defaulted => ticket_stats.defaulted += 1,
            }
        }

        Self {
            branches: branches.to_vec(),
            as_of,
            requests: request_stats,
            tickets: ticket_stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::pledges::domain::{
        CategoryId, ItemId, RequestId, TariffId, TicketId, UserId,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn request(id: i64, status: RequestStatus) -> PledgeRequest {
        PledgeRequest {
            id: RequestId(id),
            request_number: format!("REQ-{id}"),
            user_id: UserId(1),
            branch_id: BranchId(1),
            category_id: CategoryId(1),
            item_name: "Watch".to_string(),
            item_description: None,
            estimated_cost: dec!(100),
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ticket(id: i64, status: TicketStatus, end_date: NaiveDate) -> PawnTicket {
        PawnTicket {
            id: TicketId(id),
            ticket_number: format!("TKT-{id}"),
            request_id: RequestId(id),
            user_id: UserId(1),
            item_id: ItemId(id),
            branch_id: BranchId(1),
            admission_date: date(2024, 1, 1),
            end_date,
            loan_amount: dec!(100.00),
            ransom_amount: dec!(108.00),
            tariff_id: TariffId(1),
            status,
            created_by: Some(UserId(9)),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn counts_statuses_and_sums_amounts() {
        let requests = vec![
            request(1, RequestStatus::Submitted),
            request(2, RequestStatus::Approved),
            request(3, RequestStatus::Approved),
            request(4, RequestStatus::Rejected),
        ];
        let tickets = vec![
            ticket(1, TicketStatus::Issued, date(2024, 1, 31)),
            ticket(2, TicketStatus::Issued, date(2024, 3, 31)),
            ticket(3, TicketStatus::Redeemed, date(2024, 1, 31)),
            ticket(4, TicketStatus::Defaulted, date(2024, 1, 31)),
        ];

        let report = PortfolioReport::build(&[], date(2024, 2, 15), &requests, &tickets);

        assert_eq!(
            report.requests,
            RequestStats {
                total: 4,
                pending: 1,
                approved: 2,
                rejected: 1,
            }
        );
        assert_eq!(report.tickets.total, 4);
        assert_eq!(report.tickets.active, 2);
        assert_eq!(report.tickets.redeemed, 1);
        assert_eq!(report.tickets.defaulted, 1);
        assert_eq!(report.tickets.overdue, 1);
        assert_eq!(report.tickets.loaned, dec!(400.00));
        assert_eq!(report.tickets.ransom_due, dec!(432.00));
        assert_eq!(report.tickets.outstanding, dec!(200.00));
    }
}
