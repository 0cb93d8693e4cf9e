use std::time::Duration;

use pawnshop::config::AppConfig;
use pawnshop::error::AppError;
use pawnshop::workflows::pledges::ExpirySweeper;
use tracing::{info, warn};

use crate::cli::ScheduleArgs;
use crate::infra::{open_service, print_json};

pub(crate) async fn run(mut config: AppConfig, args: ScheduleArgs) -> Result<(), AppError> {
    if let Some(run_at) = args.run_at {
        config.scheduler.run_at = run_at;
    }
    if let Some(secs) = args.poll_secs.filter(|secs| *secs > 0) {
        config.scheduler.poll_interval = Duration::from_secs(secs);
    }

    let service = open_service(&config)?;
    let sweeper = ExpirySweeper::new(
        service,
        config.scheduler.schedule(),
        config.scheduler.poll_interval,
    );

    info!(
        environment = ?config.environment,
        db = %config.storage.db_path.display(),
        "pawn desk scheduler ready"
    );
    let stats = sweeper
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "cannot listen for ctrl-c; stopping sweeper");
            }
        })
        .await;

    print_json(&stats)
}
