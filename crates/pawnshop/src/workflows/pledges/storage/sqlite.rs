use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};

use super::super::domain::{
    AuditAction, AuditEntryId, AuditLogEntry, BranchId, CategoryId, Item, ItemId, NewAuditEntry,
    NewItem, NewPayment, NewRequest, NewTariff, NewTicket, PawnTicket, Payment, PaymentId,
    PaymentType, PledgeRequest, RequestId, RequestStatus, Tariff, TariffId, TicketId,
    TicketStatus, UserId,
};
use super::super::repository::{LedgerFilter, PledgeStore, PledgeTx, RepositoryError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tariffs (
    tariff_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    category_id INTEGER,
    branch_id INTEGER,
    loan_percent TEXT NOT NULL,
    interest_rate TEXT NOT NULL,
    min_loan TEXT,
    max_loan TEXT,
    effective_from TEXT NOT NULL,
    effective_to TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    description TEXT,
    CHECK (effective_to IS NULL OR effective_to > effective_from)
);

CREATE TABLE IF NOT EXISTS requests (
    request_id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_number TEXT NOT NULL UNIQUE,
    user_id INTEGER NOT NULL,
    branch_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    item_name TEXT NOT NULL,
    item_description TEXT,
    estimated_cost TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'submitted',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
    item_id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_user_id INTEGER NOT NULL,
    branch_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    estimated_cost TEXT NOT NULL,
    declared_characteristics TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pawn_tickets (
    ticket_id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_number TEXT NOT NULL UNIQUE,
    request_id INTEGER NOT NULL REFERENCES requests(request_id),
    user_id INTEGER NOT NULL,
    item_id INTEGER NOT NULL REFERENCES items(item_id),
    branch_id INTEGER NOT NULL,
    admission_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    loan_amount TEXT NOT NULL,
    ransom_amount TEXT NOT NULL,
    tariff_id INTEGER NOT NULL REFERENCES tariffs(tariff_id),
    status TEXT NOT NULL,
    created_by INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payments (
    payment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id INTEGER NOT NULL REFERENCES pawn_tickets(ticket_id),
    amount TEXT NOT NULL,
    payment_type TEXT NOT NULL,
    payment_date TEXT NOT NULL,
    processed_by INTEGER,
    note TEXT
);

CREATE TABLE IF NOT EXISTS audit_logs (
    log_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    action_key TEXT NOT NULL,
    action_time TEXT NOT NULL,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status);
CREATE INDEX IF NOT EXISTS idx_requests_user ON requests(user_id);
CREATE INDEX IF NOT EXISTS idx_tickets_status ON pawn_tickets(status, end_date);
CREATE INDEX IF NOT EXISTS idx_tickets_user ON pawn_tickets(user_id);
CREATE INDEX IF NOT EXISTS idx_payments_ticket ON payments(ticket_id);
CREATE INDEX IF NOT EXISTS idx_tariffs_active ON tariffs(is_active, effective_from, effective_to);
";

const TARIFF_COLUMNS: &str = "tariff_id, name, category_id, branch_id, loan_percent, interest_rate, \
     min_loan, max_loan, effective_from, effective_to, is_active, description";
const REQUEST_COLUMNS: &str = "request_id, request_number, user_id, branch_id, category_id, \
     item_name, item_description, estimated_cost, status, created_at, updated_at";
const ITEM_COLUMNS: &str = "item_id, owner_user_id, branch_id, category_id, name, description, \
     estimated_cost, declared_characteristics, created_at";
const TICKET_COLUMNS: &str = "ticket_id, ticket_number, request_id, user_id, item_id, branch_id, \
     admission_date, end_date, loan_amount, ransom_amount, tariff_id, status, created_by, \
     created_at, updated_at";
const PAYMENT_COLUMNS: &str =
    "payment_id, ticket_id, amount, payment_type, payment_date, processed_by, note";
const AUDIT_COLUMNS: &str = "log_id, user_id, action_key, action_time, payload";

/// SQLite-backed ledger. Transactions take the write lock up front
/// (`BEGIN IMMEDIATE`) so status compare-and-set never races a concurrent writer.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RepositoryError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl PledgeStore for SqliteStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PledgeTx) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("connection lock poisoned".to_string()))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepositoryError::from)?;

        // dropping `tx` without commit rolls back
        let outcome = work(&mut SqliteTx { conn: &tx })?;
        tx.commit().map_err(RepositoryError::from)?;
        Ok(outcome)
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl SqliteTx<'_> {
    fn query_all<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, RepositoryError> {
        let mut statement = self.conn.prepare(sql)?;
        let rows = statement.query_map(params, map)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_one<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>, RepositoryError> {
        Ok(self.conn.query_row(sql, params, map).optional()?)
    }

    fn inserted<T>(
        &self,
        table: &str,
        columns: &str,
        key: &str,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<T, RepositoryError> {
        let id = self.conn.last_insert_rowid();
        let sql = format!("SELECT {columns} FROM {table} WHERE {key} = ?1");
        self.query_one(&sql, params![id], map)?
            .ok_or_else(|| RepositoryError::NotFound(format!("{table} row {id}")))
    }
}

impl PledgeTx for SqliteTx<'_> {
    fn tariffs(&self) -> Result<Vec<Tariff>, RepositoryError> {
        let sql = format!("SELECT {TARIFF_COLUMNS} FROM tariffs ORDER BY tariff_id");
        self.query_all(&sql, [], tariff_from_row)
    }

    fn insert_tariff(&mut self, tariff: NewTariff) -> Result<Tariff, RepositoryError> {
        self.conn.execute(
            "INSERT INTO tariffs (name, category_id, branch_id, loan_percent, interest_rate,
                 min_loan, max_loan, effective_from, effective_to, is_active, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                tariff.name,
                tariff.category_id.map(|id| id.0),
                tariff.branch_id.map(|id| id.0),
                tariff.loan_percent.to_string(),
                tariff.interest_rate.to_string(),
                tariff.min_loan.map(|value| value.to_string()),
                tariff.max_loan.map(|value| value.to_string()),
                tariff.effective_from,
                tariff.effective_to,
                tariff.is_active,
                tariff.description,
            ],
        )?;
        self.inserted("tariffs", TARIFF_COLUMNS, "tariff_id", tariff_from_row)
    }

    fn insert_request(&mut self, request: NewRequest) -> Result<PledgeRequest, RepositoryError> {
        let submission = &request.submission;
        self.conn.execute(
            "INSERT INTO requests (request_number, user_id, branch_id, category_id, item_name,
                 item_description, estimated_cost, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                request.request_number,
                submission.user_id.0,
                submission.branch_id.0,
                submission.category_id.0,
                submission.item_name,
                submission.item_description,
                submission.estimated_cost.to_string(),
                RequestStatus::Submitted.label(),
                request.created_at,
            ],
        )?;
        self.inserted("requests", REQUEST_COLUMNS, "request_id", request_from_row)
    }

    fn fetch_request(&self, id: RequestId) -> Result<Option<PledgeRequest>, RepositoryError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE request_id = ?1");
        self.query_one(&sql, params![id.0], request_from_row)
    }

    fn requests(&self, filter: &LedgerFilter) -> Result<Vec<PledgeRequest>, RepositoryError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests ORDER BY request_id");
        let mut requests = self.query_all(&sql, [], request_from_row)?;
        requests.retain(|request| filter.matches(request.branch_id, request.user_id));
        Ok(requests)
    }

    fn count_requests_by_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE user_id = ?1",
            params![user_id.0],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn transition_request(
        &mut self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let changed = self.conn.execute(
            "UPDATE requests SET status = ?1, updated_at = ?2 WHERE request_id = ?3 AND status = ?4",
            params![to.label(), at, id.0, from.label()],
        )?;
        if changed == 0 && self.fetch_request(id)?.is_none() {
            return Err(RepositoryError::NotFound(format!("request {id}")));
        }
        Ok(changed == 1)
    }

    fn insert_item(&mut self, item: NewItem) -> Result<Item, RepositoryError> {
        self.conn.execute(
            "INSERT INTO items (owner_user_id, branch_id, category_id, name, description,
                 estimated_cost, declared_characteristics, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                item.owner_user_id.0,
                item.branch_id.0,
                item.category_id.0,
                item.name,
                item.description,
                item.estimated_cost.to_string(),
                item.declared_characteristics,
                item.created_at,
            ],
        )?;
        self.inserted("items", ITEM_COLUMNS, "item_id", item_from_row)
    }

    fn insert_ticket(&mut self, ticket: NewTicket) -> Result<PawnTicket, RepositoryError> {
        self.conn.execute(
            "INSERT INTO pawn_tickets (ticket_number, request_id, user_id, item_id, branch_id,
                 admission_date, end_date, loan_amount, ransom_amount, tariff_id, status,
                 created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                ticket.ticket_number,
                ticket.request_id.0,
                ticket.user_id.0,
                ticket.item_id.0,
                ticket.branch_id.0,
                ticket.admission_date,
                ticket.end_date,
                ticket.loan_amount.to_string(),
                ticket.ransom_amount.to_string(),
                ticket.tariff_id.0,
                TicketStatus::Issued.label(),
                ticket.created_by.map(|id| id.0),
                ticket.created_at,
            ],
        )?;
        self.inserted("pawn_tickets", TICKET_COLUMNS, "ticket_id", ticket_from_row)
    }

    fn fetch_ticket(&self, id: TicketId) -> Result<Option<PawnTicket>, RepositoryError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM pawn_tickets WHERE ticket_id = ?1");
        self.query_one(&sql, params![id.0], ticket_from_row)
    }

    fn tickets(&self, filter: &LedgerFilter) -> Result<Vec<PawnTicket>, RepositoryError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM pawn_tickets ORDER BY ticket_id");
        let mut tickets = self.query_all(&sql, [], ticket_from_row)?;
        tickets.retain(|ticket| filter.matches(ticket.branch_id, ticket.user_id));
        Ok(tickets)
    }

    fn overdue_tickets(&self, as_of: NaiveDate) -> Result<Vec<PawnTicket>, RepositoryError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM pawn_tickets
             WHERE status = ?1 AND end_date < ?2
             ORDER BY end_date, ticket_id"
        );
        self.query_all(
            &sql,
            params![TicketStatus::Issued.label(), as_of],
            ticket_from_row,
        )
    }

    fn transition_ticket(
        &mut self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let changed = self.conn.execute(
            "UPDATE pawn_tickets SET status = ?1, updated_at = ?2 WHERE ticket_id = ?3 AND status = ?4",
            params![to.label(), at, id.0, from.label()],
        )?;
        if changed == 0 && self.fetch_ticket(id)?.is_none() {
            return Err(RepositoryError::NotFound(format!("ticket {id}")));
        }
        Ok(changed == 1)
    }

    fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, RepositoryError> {
        self.conn.execute(
            "INSERT INTO payments (ticket_id, amount, payment_type, payment_date, processed_by, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                payment.ticket_id.0,
                payment.amount.to_string(),
                payment.payment_type.label(),
                payment.paid_at,
                payment.processed_by.map(|id| id.0),
                payment.note,
            ],
        )?;
        self.inserted("payments", PAYMENT_COLUMNS, "payment_id", payment_from_row)
    }

    fn payments_for_ticket(&self, id: TicketId) -> Result<Vec<Payment>, RepositoryError> {
        let sql =
            format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE ticket_id = ?1 ORDER BY payment_id");
        self.query_all(&sql, params![id.0], payment_from_row)
    }

    fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditLogEntry, RepositoryError> {
        self.conn.execute(
            "INSERT INTO audit_logs (user_id, action_key, action_time, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.actor.map(|id| id.0),
                entry.action.key(),
                entry.recorded_at,
                entry.payload,
            ],
        )?;
        self.inserted("audit_logs", AUDIT_COLUMNS, "log_id", audit_from_row)
    }

    fn audit_log(&self) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_logs ORDER BY log_id");
        self.query_all(&sql, [], audit_from_row)
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(err.to_string())
            }
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|err| conversion_error(idx, format!("invalid decimal '{raw}': {err}")))
}

fn optional_decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        raw.parse()
            .map_err(|err| conversion_error(idx, format!("invalid decimal '{raw}': {err}")))
    })
    .transpose()
}

fn label_at<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown label '{raw}'")))
}

fn tariff_from_row(row: &Row<'_>) -> rusqlite::Result<Tariff> {
    Ok(Tariff {
        id: TariffId(row.get(0)?),
        name: row.get(1)?,
        category_id: row.get::<_, Option<i64>>(2)?.map(CategoryId),
        branch_id: row.get::<_, Option<i64>>(3)?.map(BranchId),
        loan_percent: decimal_at(row, 4)?,
        interest_rate: decimal_at(row, 5)?,
        min_loan: optional_decimal_at(row, 6)?,
        max_loan: optional_decimal_at(row, 7)?,
        effective_from: row.get(8)?,
        effective_to: row.get(9)?,
        is_active: row.get(10)?,
        description: row.get(11)?,
    })
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<PledgeRequest> {
    Ok(PledgeRequest {
        id: RequestId(row.get(0)?),
        request_number: row.get(1)?,
        user_id: UserId(row.get(2)?),
        branch_id: BranchId(row.get(3)?),
        category_id: CategoryId(row.get(4)?),
        item_name: row.get(5)?,
        item_description: row.get(6)?,
        estimated_cost: decimal_at(row, 7)?,
        status: label_at(row, 8, RequestStatus::parse)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: ItemId(row.get(0)?),
        owner_user_id: UserId(row.get(1)?),
        branch_id: BranchId(row.get(2)?),
        category_id: CategoryId(row.get(3)?),
        name: row.get(4)?,
        description: row.get(5)?,
        estimated_cost: decimal_at(row, 6)?,
        declared_characteristics: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<PawnTicket> {
    Ok(PawnTicket {
        id: TicketId(row.get(0)?),
        ticket_number: row.get(1)?,
        request_id: RequestId(row.get(2)?),
        user_id: UserId(row.get(3)?),
        item_id: ItemId(row.get(4)?),
        branch_id: BranchId(row.get(5)?),
        admission_date: row.get(6)?,
        end_date: row.get(7)?,
        loan_amount: decimal_at(row, 8)?,
        ransom_amount: decimal_at(row, 9)?,
        tariff_id: TariffId(row.get(10)?),
        status: label_at(row, 11, TicketStatus::parse)?,
        created_by: row.get::<_, Option<i64>>(12)?.map(UserId),
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: PaymentId(row.get(0)?),
        ticket_id: TicketId(row.get(1)?),
        amount: decimal_at(row, 2)?,
        payment_type: label_at(row, 3, PaymentType::parse)?,
        paid_at: row.get(4)?,
        processed_by: row.get::<_, Option<i64>>(5)?.map(UserId),
        note: row.get(6)?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: AuditEntryId(row.get(0)?),
        actor: row.get::<_, Option<i64>>(1)?.map(UserId),
        action: label_at(row, 2, AuditAction::parse)?,
        recorded_at: row.get(3)?,
        payload: row.get(4)?,
    })
}
