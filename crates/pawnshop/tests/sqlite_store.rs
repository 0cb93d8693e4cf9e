//! File-backed SQLite ledger behavior.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use pawnshop::workflows::pledges::{
    BranchId, CategoryId, LendingError, LendingPolicy, ManualClock, NewTariff, PledgeService,
    RequestSubmission, SqliteStore, TicketStatus, UserId,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn tariff() -> NewTariff {
    NewTariff {
        name: "Electronics".to_string(),
        category_id: Some(CategoryId(2)),
        branch_id: None,
        loan_percent: dec!(30),
        interest_rate: dec!(12.5),
        min_loan: None,
        max_loan: None,
        effective_from: date(2024, 1, 1),
        effective_to: Some(date(2024, 12, 31)),
        is_active: true,
        description: Some("phones and laptops".to_string()),
    }
}

fn laptop() -> RequestSubmission {
    RequestSubmission {
        user_id: UserId(4),
        branch_id: BranchId(1),
        category_id: CategoryId(2),
        item_name: "Laptop".to_string(),
        item_description: Some("14 inch".to_string()),
        estimated_cost: dec!(1234.56),
    }
}

fn open_service(
    path: &std::path::Path,
    today: NaiveDate,
) -> PledgeService<SqliteStore, ManualClock> {
    let store = SqliteStore::open(path).expect("open sqlite ledger");
    PledgeService::new(
        Arc::new(store),
        Arc::new(ManualClock::on(today)),
        LendingPolicy::default(),
    )
}

#[test]
fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("ledger.db");

    let ticket = {
        let service = open_service(&path, date(2024, 5, 1));
        service.import_tariffs(vec![tariff()]).expect("tariffs");
        let request = service.submit_request(laptop()).expect("submit");
        service
            .approve_request(request.id, UserId(60))
            .expect("approve")
    };

    // 1234.56 * 30% = 370.368
    assert_eq!(ticket.loan_amount, dec!(370.37));
    // 370.37 * 1.125 = 416.66625
    assert_eq!(ticket.ransom_amount, dec!(416.67));

    let reopened = open_service(&path, date(2024, 6, 5));
    let stored = reopened.ticket(ticket.id).expect("ticket persisted");
    assert_eq!(stored, ticket);

    let tariffs = reopened.tariffs().expect("tariffs");
    assert_eq!(tariffs.len(), 1);
    assert_eq!(tariffs[0].interest_rate, dec!(12.5));
    assert_eq!(tariffs[0].effective_to, Some(date(2024, 12, 31)));

    let listed = reopened.borrower_tickets(UserId(4)).expect("tickets");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, TicketStatus::Defaulted);
    assert_eq!(reopened.audit_log().expect("audit").len(), 3);
}

#[test]
fn competing_connections_redeem_once() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("ledger.db");

    let setup = open_service(&path, date(2024, 5, 1));
    setup.import_tariffs(vec![tariff()]).expect("tariffs");
    let request = setup.submit_request(laptop()).expect("submit");
    let ticket = setup
        .approve_request(request.id, UserId(60))
        .expect("approve");

    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let service = open_service(&path, date(2024, 5, 10));
                barrier.wait();
                service.redeem_ticket(ticket.id, UserId(61))
            })
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("redeem thread"))
        .collect();

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().err())
        .all(|err| matches!(err, LendingError::InvalidState { .. })));
    assert_eq!(setup.payments(ticket.id).expect("payments").len(), 1);
}
