use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use pawnshop::config::AppConfig;
use pawnshop::error::AppError;
use pawnshop::telemetry;
use pawnshop::workflows::pledges::{BranchId, CategoryId, Money, TicketStatus, UserId};

use crate::commands;
use crate::infra::{parse_amount, parse_date, parse_ticket_status, parse_time};
use crate::schedule;

#[derive(Parser, Debug)]
#[command(
    name = "pawnshop-desk",
    about = "Operate the pawn ledger: tariffs, pledge requests, tickets, and the daily expiry sweep",
    version
)]
struct Cli {
    /// Override the configured SQLite ledger path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daily expiry sweeper until interrupted (default command)
    Schedule(ScheduleArgs),
    /// Default overdue tickets once and exit
    Sweep(SweepArgs),
    /// Manage and query tariff configuration
    Tariffs {
        #[command(subcommand)]
        command: TariffCommand,
    },
    /// Submit and decide pledge requests
    Requests {
        #[command(subcommand)]
        command: RequestCommand,
    },
    /// Redeem and list pawn tickets
    Tickets {
        #[command(subcommand)]
        command: TicketCommand,
    },
    /// Portfolio counts and amounts per branch
    Report(ReportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ScheduleArgs {
    /// Local time of the daily sweep (HH:MM)
    #[arg(long, value_parser = parse_time)]
    pub(crate) run_at: Option<NaiveTime>,
    /// Seconds between schedule checks
    #[arg(long)]
    pub(crate) poll_secs: Option<u64>,
}

#[derive(Args, Debug)]
pub(crate) struct SweepArgs {
    /// Business date to sweep for (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum TariffCommand {
    /// Load tariffs from a CSV export; all rows or none are stored
    Import {
        /// CSV file with one tariff per row
        csv: PathBuf,
    },
    /// Show which tariff applies to a pledge
    Resolve(ResolveArgs),
}

#[derive(Args, Debug)]
pub(crate) struct ResolveArgs {
    #[arg(long, value_parser = parse_category)]
    pub(crate) category: CategoryId,
    #[arg(long, value_parser = parse_branch)]
    pub(crate) branch: BranchId,
    /// Estimated value of the pledged item
    #[arg(long, value_parser = parse_amount)]
    pub(crate) value: Money,
    /// Date to resolve for (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum RequestCommand {
    /// Record a new pledge request
    Submit(SubmitArgs),
    /// Preview loan and ransom amounts without approving
    Quote {
        #[arg(long)]
        request: i64,
        #[arg(long, value_parser = parse_date)]
        as_of: Option<NaiveDate>,
    },
    /// Approve a request and issue its ticket
    Approve(DecisionArgs),
    /// Reject a request
    Reject(DecisionArgs),
}

#[derive(Args, Debug)]
pub(crate) struct SubmitArgs {
    #[arg(long, value_parser = parse_user)]
    pub(crate) user: UserId,
    #[arg(long, value_parser = parse_branch)]
    pub(crate) branch: BranchId,
    #[arg(long, value_parser = parse_category)]
    pub(crate) category: CategoryId,
    #[arg(long)]
    pub(crate) item_name: String,
    #[arg(long)]
    pub(crate) description: Option<String>,
    #[arg(long, value_parser = parse_amount)]
    pub(crate) estimated_cost: Money,
}

#[derive(Args, Debug)]
pub(crate) struct DecisionArgs {
    #[arg(long)]
    pub(crate) request: i64,
    /// Staff member taking the decision
    #[arg(long, value_parser = parse_user)]
    pub(crate) by: UserId,
}

#[derive(Subcommand, Debug)]
pub(crate) enum TicketCommand {
    /// Buy back an issued ticket
    Redeem {
        #[arg(long)]
        ticket: i64,
        /// Cashier processing the payment
        #[arg(long, value_parser = parse_user)]
        by: UserId,
    },
    /// List tickets of a borrower or of branches
    List(ListArgs),
}

#[derive(Args, Debug)]
pub(crate) struct ListArgs {
    /// Borrower whose tickets to list; expired tickets are swept first
    #[arg(long, value_parser = parse_user, conflicts_with_all = ["branch", "status"])]
    pub(crate) user: Option<UserId>,
    /// Restrict to these branches (repeatable). Defaults to all branches.
    #[arg(long, value_parser = parse_branch)]
    pub(crate) branch: Vec<BranchId>,
    #[arg(long, value_parser = parse_ticket_status)]
    pub(crate) status: Option<TicketStatus>,
}

#[derive(Args, Debug)]
pub(crate) struct ReportArgs {
    /// Restrict to these branches (repeatable). Defaults to all branches.
    #[arg(long, value_parser = parse_branch)]
    pub(crate) branch: Vec<BranchId>,
}

fn parse_user(raw: &str) -> Result<UserId, String> {
    parse_id(raw).map(UserId)
}

fn parse_branch(raw: &str) -> Result<BranchId, String> {
    parse_id(raw).map(BranchId)
}

fn parse_category(raw: &str) -> Result<CategoryId, String> {
    parse_id(raw).map(CategoryId)
}

fn parse_id(raw: &str) -> Result<i64, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a numeric identifier"))
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    telemetry::init(&config.telemetry)?;

    let command = cli
        .command
        .unwrap_or_else(|| Command::Schedule(ScheduleArgs::default()));

    match command {
        Command::Schedule(args) => schedule::run(config, args).await,
        Command::Sweep(args) => commands::sweep(&config, args),
        Command::Tariffs { command } => commands::tariffs(&config, command),
        Command::Requests { command } => commands::requests(&config, command),
        Command::Tickets { command } => commands::tickets(&config, command),
        Command::Report(args) => commands::report(&config, args),
    }
}
