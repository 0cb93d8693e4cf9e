use std::io::Write;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use pawnshop::config::AppConfig;
use pawnshop::error::AppError;
use pawnshop::workflows::pledges::{PledgeService, SqliteStore, SystemClock, TicketStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

pub(crate) type DeskService = PledgeService<SqliteStore, SystemClock>;

pub(crate) fn open_service(config: &AppConfig) -> Result<Arc<DeskService>, AppError> {
    let store = SqliteStore::open(&config.storage.db_path)?;
    debug!(path = %config.storage.db_path.display(), "ledger opened");
    Ok(Arc::new(PledgeService::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.lending.policy(),
    )))
}

/// Pretty JSON on stdout; logs stay on stderr.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(std::io::Error::from)?;
    writeln!(stdout)?;
    Ok(())
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|err| format!("failed to parse '{raw}' as HH:MM ({err})"))
}

pub(crate) fn parse_amount(raw: &str) -> Result<Decimal, String> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|err| format!("failed to parse '{raw}' as an amount ({err})"))
}

pub(crate) fn parse_ticket_status(raw: &str) -> Result<TicketStatus, String> {
    TicketStatus::parse(&raw.trim().to_ascii_lowercase())
        .ok_or_else(|| format!("unknown ticket status '{raw}' (issued, redeemed, defaulted)"))
}
