use anyhow::Context;
use clap::Parser;
use ledgerlink::cli::{Cli, Commands};
use ledgerlink::commands;
use ledgerlink::summary::RunSummary;
use ledgerlink_core::MatchConfig;
use ledgerlink_storage::{create_db, WriteMode};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("ledgerlink error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    let config = match &cli.config {
        Some(path) => MatchConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => MatchConfig::default(),
    };
    let pool = create_db(&cli.database)
        .await
        .with_context(|| format!("failed to open database {}", cli.database.display()))?;

    let mode = WriteMode::from_flag(cli.write);
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut summary = RunSummary::new(&run_id, mode);
    info!(run = %run_id, ?mode, "Starting run");

    match &cli.command {
        Commands::Ingest(args) => {
            commands::ingest(&pool, args, mode, &mut summary).await?;
            print_summary(&summary, cli.json)?;
        }
        Commands::Reconcile(args) => {
            commands::reconcile(&pool, args, config, mode, &mut summary).await?;
            print_summary(&summary, cli.json)?;
        }
        Commands::Unlink { source } => {
            commands::unlink_source(&pool, *source, mode, &run_id).await?;
        }
        Commands::Retire { source } => {
            commands::retire(&pool, *source, mode, &run_id).await?;
        }
        Commands::Suggestions { output } => {
            let count = commands::export_suggestions(&pool, output.as_deref()).await?;
            info!(count, "Exported vendor suggestions");
        }
        Commands::Review => commands::review(&pool, cli.json).await?,
    }

    pool.close().await;
    Ok(())
}

fn init_tracing(quiet: bool, verbose: bool) {
    let default = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_env("LEDGERLINK_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{}", summary.render_table());
    }
    Ok(())
}
