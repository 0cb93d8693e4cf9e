use pawnshop::config::AppConfig;
use pawnshop::error::AppError;
use pawnshop::workflows::pledges::{
    Clock, RequestId, RequestSubmission, TariffCsvImporter, TicketId,
};
use serde_json::json;
use tracing::info;

use crate::cli::{RequestCommand, ReportArgs, SweepArgs, TariffCommand, TicketCommand};
use crate::infra::{open_service, print_json};

pub(crate) fn sweep(config: &AppConfig, args: SweepArgs) -> Result<(), AppError> {
    let service = open_service(config)?;
    let as_of = args.as_of.unwrap_or_else(|| service.clock().today());
    let defaulted = service.sweep_expired(as_of)?;
    print_json(&json!({ "as_of": as_of, "defaulted": defaulted }))
}

pub(crate) fn tariffs(config: &AppConfig, command: TariffCommand) -> Result<(), AppError> {
    let service = open_service(config)?;
    match command {
        TariffCommand::Import { csv } => {
            let drafts = TariffCsvImporter::from_path(&csv)?;
            let stored = service.import_tariffs(drafts)?;
            info!(path = %csv.display(), count = stored.len(), "tariff file loaded");
            print_json(&stored)
        }
        TariffCommand::Resolve(args) => {
            let as_of = args.as_of.unwrap_or_else(|| service.clock().today());
            let resolved =
                service.resolve_tariff(args.category, args.branch, args.value, as_of)?;
            print_json(&resolved)
        }
    }
}

pub(crate) fn requests(config: &AppConfig, command: RequestCommand) -> Result<(), AppError> {
    let service = open_service(config)?;
    match command {
        RequestCommand::Submit(args) => {
            let request = service.submit_request(RequestSubmission {
                user_id: args.user,
                branch_id: args.branch,
                category_id: args.category,
                item_name: args.item_name,
                item_description: args.description,
                estimated_cost: args.estimated_cost,
            })?;
            print_json(&request)
        }
        RequestCommand::Quote { request, as_of } => {
            print_json(&service.quote(RequestId(request), as_of)?)
        }
        RequestCommand::Approve(args) => {
            print_json(&service.approve_request(RequestId(args.request), args.by)?)
        }
        RequestCommand::Reject(args) => {
            print_json(&service.reject_request(RequestId(args.request), args.by)?)
        }
    }
}

pub(crate) fn tickets(config: &AppConfig, command: TicketCommand) -> Result<(), AppError> {
    let service = open_service(config)?;
    match command {
        TicketCommand::Redeem { ticket, by } => {
            print_json(&service.redeem_ticket(TicketId(ticket), by)?)
        }
        TicketCommand::List(args) => {
            let tickets = match args.user {
                Some(user) => service.borrower_tickets(user)?,
                None => service.branch_tickets(&args.branch, args.status)?,
            };
            print_json(&tickets)
        }
    }
}

pub(crate) fn report(config: &AppConfig, args: ReportArgs) -> Result<(), AppError> {
    let service = open_service(config)?;
    print_json(&service.portfolio_report(&args.branch)?)
}
