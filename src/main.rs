//! backup-relay command line entry point.

use backup_relay::{BackupRelay, Config, EXIT_FATAL, run_until_signal};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Copy source backup archives into a dated drive folder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer the current backup into a new run folder (default)
    Run {
        /// Date used in the folder name, YYYY-MM-DD (default: today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List the items of a drive folder
    ListFolders {
        /// Folder id to list (default: DEST_PARENT_FOLDER_ID)
        #[arg(long)]
        parent: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // A missing .env file is fine; the environment may already be set
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let relay = match Config::from_env().and_then(BackupRelay::new) {
        Ok(relay) => relay,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match cli.command.unwrap_or(Commands::Run { date: None }) {
        Commands::Run { date } => {
            let run_date = date.unwrap_or_else(|| Utc::now().date_naive());
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                run_date = %run_date,
                "starting backup relay"
            );

            match run_until_signal(&relay, run_date).await {
                Ok(summary) => {
                    tracing::info!(
                        folder = %summary.run.folder_name,
                        completed = summary.completed_count(),
                        failed = summary.failed_count(),
                        "backup relay finished"
                    );
                    for item in summary.run.items.iter().filter(|i| i.error.is_some()) {
                        tracing::warn!(
                            url = %item.source_url,
                            error = item.error.as_deref().unwrap_or_default(),
                            "archive not transferred"
                        );
                    }
                    ExitCode::from(summary.exit_code())
                }
                Err(e) => {
                    tracing::error!(error = %e, "backup relay aborted");
                    ExitCode::from(EXIT_FATAL)
                }
            }
        }
        Commands::ListFolders { parent } => match relay.list_folders(parent.as_deref()).await {
            Ok(items) => {
                for item in items {
                    let kind = if item.is_folder() { "folder" } else { "file" };
                    println!("{}\t{}\t{}", kind, item.id, item.name);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to list folder");
                ExitCode::from(EXIT_FATAL)
            }
        },
    }
}
