//! Management commands for the PRP user sync.
//!
//! Sync commands need `DATABASE_URL` plus the `PRP_*` settings;
//! `test-connection` only talks to the portal.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

use pims_prp::config::PrpConfig;
use pims_prp::db::init_db;
use pims_prp::logging::init_cli_logging;
use pims_prp::prp::PrpClient;
use pims_prp::store::{MySqlUserStore, UserStore};
use pims_prp::sync::{SyncError, SyncOptions, SyncResult, SyncService};

const SHOWN_ERRORS: usize = 5;

#[derive(Parser)]
#[command(name = "prp-sync")]
#[command(about = "Synchronize PIMS users from the Parliament Resource Portal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Sync every PRP department")]
    SyncAll {
        #[command(flatten)]
        flags: SyncFlags,
    },
    #[command(about = "Sync one PRP department")]
    SyncDepartment {
        #[arg(help = "PRP department ID")]
        department_id: u64,
        #[command(flatten)]
        flags: SyncFlags,
    },
    #[command(about = "Sync one employee by PRP userId")]
    SyncUser {
        #[arg(help = "PRP userId")]
        employee_id: String,
        #[arg(short, long, help = "Only search this department")]
        department: Option<u64>,
        #[command(flatten)]
        flags: SyncFlags,
    },
    #[command(about = "Authenticate, list departments and optionally count employees")]
    TestConnection {
        #[arg(short, long, help = "Also count employees in this department")]
        department: Option<u64>,
    },
}

#[derive(clap::Args)]
struct SyncFlags {
    #[arg(short, long, help = "Re-sync records synced within the last interval")]
    force: bool,
    #[arg(long, help = "Report what would change without writing")]
    dry_run: bool,
}

impl From<SyncFlags> for SyncOptions {
    fn from(flags: SyncFlags) -> Self {
        SyncOptions {
            force: flags.force,
            dry_run: flags.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = init_cli_logging(&log_dir, "prp-sync.log");

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command finished without errors.
async fn run(command: Commands) -> anyhow::Result<bool> {
    let prp_config = PrpConfig::from_env().context("invalid PRP configuration")?;
    let client = Arc::new(PrpClient::new(prp_config).context("failed to build PRP client")?);

    let outcome = match command {
        Commands::TestConnection { department } => return test_connection(&client, department).await,
        Commands::SyncAll { flags } => service(client).await?.sync_all(flags.into()).await,
        Commands::SyncDepartment {
            department_id,
            flags,
        } => {
            service(client)
                .await?
                .sync_department(department_id, flags.into())
                .await
        }
        Commands::SyncUser {
            employee_id,
            department,
            flags,
        } => {
            service(client)
                .await?
                .sync_user(&employee_id, department, flags.into())
                .await
        }
    };

    Ok(report(outcome))
}

async fn service(client: Arc<PrpClient>) -> anyhow::Result<SyncService> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = init_db(&database_url)
        .await
        .context("failed to connect to database")?;
    let store: Arc<dyn UserStore> = Arc::new(MySqlUserStore::new(pool));
    Ok(SyncService::new(client, store))
}

fn report(outcome: Result<SyncResult, SyncError>) -> bool {
    match outcome {
        Ok(result) => {
            println!("{}", result.summary());
            let errors = result.first_errors(SHOWN_ERRORS);
            if !errors.is_empty() {
                println!("First errors:");
                for line in &errors {
                    println!("  - {line}");
                }
                if result.errors > errors.len() {
                    println!("  ... and {} more (see log)", result.errors - errors.len());
                }
            }
            !result.has_errors()
        }
        Err(e) => {
            eprintln!("Sync failed: {e}");
            false
        }
    }
}

async fn test_connection(client: &PrpClient, department: Option<u64>) -> anyhow::Result<bool> {
    println!("Testing connection to {}", client.config().base_url);

    match client.test_connection(department).await {
        Ok(report) => {
            println!("Authenticated successfully");
            println!("Departments: {}", report.department_count);
            if let (Some(id), Some(count)) = (department, report.employee_count) {
                println!("Employees in department {id}: {count}");
            }
            println!("Round trip: {} ms", report.elapsed_ms);
            Ok(true)
        }
        Err(e) => {
            eprintln!("Connection failed ({}): {e}", e.kind());
            Ok(false)
        }
    }
}
