//! Local operator CLI: run the kernel, or dry-run the decomposition rules
//! against a requirement string without starting anything (§2).

use anyhow::Result;
use clap::{Parser, Subcommand};
use coretask::{
    api::ApiServer,
    capabilities::{DiskFileStore, NoopAgentFactory, SystemClock, UuidGenerator},
    config::Config,
    coordination::CoordinationManager,
    tasks::decomposition,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coretask-ctl", about = "Operate a coordination kernel instance")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the kernel and its HTTP control surface.
    Serve,
    /// Dry-run the decomposition rules against a requirement, without
    /// starting a kernel or assigning anything.
    Decompose {
        /// The requirement text to decompose.
        requirement: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve().await,
        Command::Decompose { requirement } => {
            decompose(&requirement);
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    info!("Starting coordination kernel");

    let config = Config::load()?;
    let file_store = Arc::new(DiskFileStore::new("./workspace"));

    let kernel = CoordinationManager::new(config.clone(), Arc::new(NoopAgentFactory), Arc::new(UuidGenerator), Arc::new(SystemClock), file_store);
    kernel.start().await;

    let api_server = ApiServer::new(&config, kernel.clone());

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                tracing::error!("API server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    kernel.shutdown().await;
    Ok(())
}

fn decompose(requirement: &str) {
    let tasks = decomposition::decompose(requirement);
    if tasks.is_empty() {
        println!("No rules matched \"{requirement}\".");
        return;
    }

    for task in tasks {
        println!(
            "[{:?}] {} ({:?}, ~{}h) paths={:?} requirements={:?} depends_on_siblings={}",
            task.task_type,
            task.title,
            task.priority,
            task.estimated_duration.num_minutes() as f64 / 60.0,
            task.affected_paths,
            task.requirements,
            task.depends_on_siblings,
        );
    }
}
