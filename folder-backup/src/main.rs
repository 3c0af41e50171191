use std::process::ExitCode;

use clap::Parser;
use folder_backup::backup;
use folder_backup::config::{BackupConfig, Cli};
use folder_backup::logging::{Verbosity, init_subscriber};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_subscriber(Verbosity::from_flags(cli.verbose, cli.quiet), cli.print_only);

    let config = match BackupConfig::from_cli(cli) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid arguments: {err}");
            return ExitCode::FAILURE;
        }
    };

    match backup::run(&config).await {
        Ok(summary) => {
            println!("{}", backup::render_report(&summary));
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("backup failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
