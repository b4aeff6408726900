use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use schedgate::config::DatabaseConfig;
use schedgate::diagnostics::{self, ConfigSummary};
use schedgate::postgres::Gateway;
use schedgate::telemetry;

#[derive(Parser)]
#[command(name = "schedgate", about = "Database diagnostics for the scheduling-group API tests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check connectivity and inspect the scheduling_groups table
    Diagnose,
    /// Count and list scheduling-group records
    Records,
    /// Add optional scheduling_groups columns missing from an older table
    Migrate,
    /// Compare the database settings of two .env files
    Compare {
        /// The test harness .env file
        #[arg(long, default_value = ".env")]
        local: PathBuf,
        /// The API server .env file
        #[arg(long, default_value = "../api-db-app/.env")]
        other: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    telemetry::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Diagnose => diagnose().await,
        Command::Records => records().await,
        Command::Migrate => migrate().await,
        Command::Compare { local, other } => {
            let report = diagnostics::compare_env_files(&local, &other);
            print!("{}", report);
            Ok(if report.is_same() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn diagnose() -> Result<ExitCode> {
    let config = DatabaseConfig::load()?;
    print!("{}", ConfigSummary(&config));

    let gateway = Gateway::new(config);
    let result = diagnostics::run_diagnostics(&gateway).await;
    gateway.close().await;

    match result {
        Ok(report) => {
            print!("{}", report);
            println!("All diagnostics completed");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, code = ?e.code(), "Diagnostics failed");
            if e.is_connection() {
                eprintln!("Connection troubleshooting:");
                eprintln!("- Ensure the database container is running: docker ps");
                eprintln!("- Verify the port is exposed: docker ps | grep {}", gateway.config().port);
                eprintln!("- Compare the harness and API settings: schedgate compare");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn records() -> Result<ExitCode> {
    let gateway = Gateway::from_env()?;
    let result = async {
        gateway.initialize().await?;
        diagnostics::list_records(&gateway).await
    }
    .await;
    gateway.close().await;

    print!("{}", result?);
    Ok(ExitCode::SUCCESS)
}

async fn migrate() -> Result<ExitCode> {
    let gateway = Gateway::from_env()?;
    let result = async {
        gateway.initialize().await?;
        diagnostics::migrate_missing_columns(&gateway).await
    }
    .await;
    gateway.close().await;

    match result {
        Ok(report) => {
            print!("{}", report);
            println!("Migration completed");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, code = ?e.code(), "Migration failed");
            Ok(ExitCode::FAILURE)
        }
    }
}
