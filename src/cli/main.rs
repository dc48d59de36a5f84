//! gigsync command line
//!
//! Runs diagnostics and sync cycles against the local store.

use clap::{Parser, Subcommand};
use gigsync::context::AppContext;
use gigsync::diagnostics::{DiagnosticItem, FixTarget};
use gigsync::shared::config::AppConfig;
use gigsync::shared::entity::EntityType;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gigsync", version, about = "Offline trip and shift store with remote sync")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot file, overriding the configuration
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report data-quality issues
    Scan {
        /// Only scan one table for duplicates
        #[arg(long)]
        entity: Option<EntityType>,
        /// Print findings as JSON
        #[arg(long)]
        json: bool,
    },
    /// Repair issues found by `scan`
    Fix {
        #[command(subcommand)]
        what: FixCommand,
    },
    /// Run one sync cycle
    Sync {
        /// Replace every table with a full pull instead
        #[arg(long)]
        reload: bool,
    },
    /// Show table counts and sync state
    Status,
}

#[derive(Debug, Subcommand)]
enum FixCommand {
    /// Merge duplicate groups of one table
    Duplicates {
        entity: EntityType,
        /// Only the group with this normalized key
        #[arg(long)]
        key: Option<String>,
        /// Record to keep; requires --key
        #[arg(long, requires = "key")]
        keep: Option<u64>,
    },
    /// Fill in missing shift and trip durations
    Durations,
    /// Create shifts for orphaned trips
    Shifts,
}

fn load_config(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default().with_env_overrides()?,
    };
    if let Some(path) = &cli.data {
        config.data_path = Some(path.clone());
    }
    Ok(config)
}

fn print_item(item: &DiagnosticItem) {
    println!(
        "[{:>7}] {:<26} {:>4}  {}{}",
        item.severity,
        item.name,
        item.count,
        item.description,
        if item.bulk_fixable { " (fixable)" } else { "" }
    );
}

async fn scan(
    context: &AppContext,
    entity: Option<EntityType>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let items = match entity {
        Some(entity) => vec![context.diagnostics.scan_for_duplicates(entity).await],
        None => context.diagnostics.run_all().await,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        items.iter().for_each(print_item);
    }
    Ok(())
}

async fn fix(context: &AppContext, what: FixCommand) -> Result<(), Box<dyn std::error::Error>> {
    match what {
        FixCommand::Duplicates { entity, key, keep } => {
            let Some(key) = key else {
                for (key, outcome) in context.diagnostics.fix_all(entity).await {
                    match outcome {
                        Ok(report) => println!(
                            "{}: kept {}, removed {:?}, moved {} reference(s)",
                            key, report.canonical_id, report.removed, report.reassigned
                        ),
                        Err(e) => println!("{}: {}", key, e),
                    }
                }
                return Ok(());
            };
            let item = context.diagnostics.scan_for_duplicates(entity).await;
            let target = item
                .targets()
                .into_iter()
                .find(|t| t.key == key)
                .unwrap_or(FixTarget {
                    entity,
                    key,
                    member_ids: Vec::new(),
                });
            let report = match keep {
                Some(id) => context.diagnostics.apply_bulk_fix_with(&target, id).await?,
                None => context.diagnostics.apply_bulk_fix(&target).await?,
            };
            println!(
                "{}: kept {}, removed {:?}, moved {} reference(s)",
                report.key, report.canonical_id, report.removed, report.reassigned
            );
        }
        FixCommand::Durations => {
            let fixed = context.diagnostics.fix_missing_durations().await?;
            println!("Filled in {} duration(s)", fixed);
        }
        FixCommand::Shifts => {
            let created = context.diagnostics.create_missing_shifts().await?;
            println!("Created {} shift(s)", created);
        }
    }
    Ok(())
}

async fn sync(context: &AppContext, reload: bool) -> Result<(), Box<dyn std::error::Error>> {
    let report = if reload {
        context.sync.reload().await?
    } else {
        match context.sync.force_sync().await {
            Some(outcome) => outcome?,
            None => {
                println!("A sync cycle is already running");
                return Ok(());
            }
        }
    };
    println!(
        "Pushed {}/{}, pulled {}, kept {} local edit(s)",
        report.pushed, report.total_items, report.pulled, report.skipped_dirty
    );
    for (entity, rejected) in &report.rejected {
        println!("  rejected {} {}: {}", entity, rejected.local_id, rejected.reason);
    }
    Ok(())
}

async fn status(context: &AppContext) {
    let stats = context.db.stats().await;
    for table in &stats.tables {
        println!("{:<10} {:>6} rows {:>4} dirty", table.entity.table_name(), table.rows, table.dirty);
    }
    println!(
        "Last sync: {}",
        stats
            .last_sync_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    if !stats.available {
        println!("Store is unavailable");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let context = AppContext::init(config).await?;

    let outcome = match cli.command {
        Command::Scan { entity, json } => scan(&context, entity, json).await,
        Command::Fix { what } => fix(&context, what).await,
        Command::Sync { reload } => sync(&context, reload).await,
        Command::Status => {
            status(&context).await;
            Ok(())
        }
    };

    context.shutdown().await?;
    outcome
}
