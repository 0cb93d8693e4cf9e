mod cli;
mod commands;
mod infra;
mod schedule;

use pawnshop::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
