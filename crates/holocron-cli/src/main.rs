//! Holocron CLI
//!
//! Mirror the SWAPI catalog locally, vote on entries and query the rankings:
//! - `ingest` pulls characters, films and starships (live or from JSON dumps)
//! - `vote` / `top` drive the popularity counters
//! - `search` / `list` / `show` read the mirror
//! - `serve` exposes all of it over HTTP

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use holocron_ingest::{FixtureSource, IngestError, IngestionSummary, RemoteSource, SwapiClient};
use holocron_model::{Entity, EntityId, EntityKind};
use holocron_storage::MemoryStore;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod server;
mod service;

use config::HolocronConfig;
use server::ServeOptions;
use service::CatalogService;

#[derive(Parser)]
#[command(name = "holocron")]
#[command(author, version, about = "Holocron: a local, votable mirror of the SWAPI catalog")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory for the durable store (write-ahead log + snapshot).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file, applied before environment variables and flags.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SWAPI mirror base URL (e.g. `https://swapi.info/api`).
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one collection (`character`, `film`, `starship`) or `all`.
    Ingest {
        target: String,
        /// Read `people.json`, `films.json`, `starships.json` from this
        /// directory instead of the network.
        #[arg(long)]
        from_dir: Option<PathBuf>,
    },

    /// Cast one vote.
    Vote { kind: EntityKind, id: u64 },

    /// Most voted entries, optionally for one kind.
    Top {
        #[arg(long)]
        kind: Option<EntityKind>,
        #[arg(short, long, default_value_t = 10)]
        n: i64,
    },

    /// Case-insensitive search on name/title.
    Search { kind: EntityKind, query: String },

    /// Show one row.
    Show { kind: EntityKind, id: u64 },

    /// List every row of one kind.
    List { kind: EntityKind },

    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Serve `fetch` from JSON dumps instead of the network.
        #[arg(long)]
        from_dir: Option<PathBuf>,
        /// Write `{ "addr", "pid" }` here once listening.
        #[arg(long)]
        ready_file: Option<PathBuf>,
    },

    /// Write a snapshot and truncate the write-ahead log.
    Checkpoint,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = HolocronConfig::load(cli.global.config.as_deref())?;
    if let Some(dir) = cli.global.data_dir.clone() {
        config.store.data_dir = Some(dir);
    }
    if let Some(url) = cli.global.base_url.clone() {
        config.remote.base_url = url;
    }
    let json = cli.global.json;

    match cli.command {
        Commands::Ingest { target, from_dir } => {
            let service = open_service(&config, from_dir.as_deref())?;
            let failed = if target.trim().eq_ignore_ascii_case("all") {
                let mut failed = false;
                for (kind, result) in service.ingest_all().await {
                    failed |= report_ingest(kind, result, json)?;
                }
                failed
            } else {
                let kind: EntityKind = target.parse()?;
                report_ingest(kind, service.ingest(kind).await, json)?
            };
            service.checkpoint().await?;
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }

        Commands::Vote { kind, id } => {
            let service = open_service(&config, None)?;
            let votes = service.cast_vote(kind, EntityId::new(id)).await?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "entity_type": kind, "entity_id": id, "vote_count": votes })
                );
            } else {
                println!("{} {kind} {id} now has {votes} vote(s)", "ok".green().bold());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Top { kind, n } => {
            let service = open_service(&config, None)?;
            let ranked = service.top_ranked(kind, n).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else if ranked.is_empty() {
                println!("{}", "no entries".yellow());
            } else {
                for (rank, entry) in ranked.iter().enumerate() {
                    println!(
                        "{:>3}. {:<32} {:<9} id={:<5} {}",
                        rank + 1,
                        entry.name.bold(),
                        entry.kind.as_str(),
                        entry.id,
                        format!("{} votes", entry.vote_count).cyan()
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Search { kind, query } => {
            let service = open_service(&config, None)?;
            print_rows(&service.search(kind, &query).await?, json)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::List { kind } => {
            let service = open_service(&config, None)?;
            print_rows(&service.list(kind).await?, json)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Show { kind, id } => {
            let service = open_service(&config, None)?;
            let entity = service.get(kind, EntityId::new(id)).await?;
            println!("{}", serde_json::to_string_pretty(&server::entity_json(&entity))?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Serve {
            listen,
            from_dir,
            ready_file,
        } => {
            let service = Arc::new(open_service(&config, from_dir.as_deref())?);
            let options = ServeOptions {
                listen: listen.unwrap_or(config.listen),
                ready_file,
            };
            server::serve(service, options).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Checkpoint => {
            let service = open_service(&config, None)?;
            service.checkpoint().await?;
            if !json {
                println!("{} checkpoint written", "ok".green().bold());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_service(config: &HolocronConfig, from_dir: Option<&Path>) -> Result<CatalogService> {
    if config.store.data_dir.is_none() {
        tracing::warn!("no --data-dir given; the catalog lives in memory for this process only");
    }
    let store = MemoryStore::from_config(&config.store).context("opening catalog store")?;

    let source: Arc<dyn RemoteSource> = match from_dir {
        Some(dir) => Arc::new(FixtureSource::from_dir(dir)?),
        None => Arc::new(SwapiClient::new(&config.remote)?),
    };
    Ok(CatalogService::new(Arc::new(store), source, config.ingest.clone()))
}

/// Print one run's outcome. Returns whether the run failed outright.
fn report_ingest(
    kind: EntityKind,
    result: Result<IngestionSummary, IngestError>,
    json: bool,
) -> Result<bool> {
    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            if json {
                println!("{}", serde_json::json!({ "kind": kind, "error": err.to_string() }));
            } else {
                eprintln!("{} {kind}: {err}", "failed".red().bold());
            }
            return Ok(true);
        }
    };

    if json {
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(false);
    }

    let status = if summary.cancelled {
        "cancelled".yellow().bold()
    } else if summary.partial {
        "partial".yellow().bold()
    } else {
        "ok".green().bold()
    };
    println!(
        "{status} {:<10} pages={} imported={} updated={} skipped={} failed={} unresolved={}",
        kind.plural(),
        summary.pages,
        summary.imported,
        summary.updated,
        summary.skipped,
        summary.failed,
        summary.unresolved_references.len()
    );
    if let Some(error) = &summary.error {
        println!("  {} {error}", "error:".red());
    }
    for failure in &summary.failures {
        println!(
            "  {} page {} record {} ({:?}): {}",
            "skipped".yellow(),
            failure.page,
            failure.index,
            failure.stage,
            failure.error
        );
    }
    Ok(false)
}

fn print_rows(rows: &[Entity], json: bool) -> Result<()> {
    if json {
        let values: Vec<_> = rows.iter().map(server::entity_json).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("{}", "no matches".yellow());
    }
    for row in rows {
        println!(
            "{:>5}  {:<32} {}",
            row.id.to_string().dimmed(),
            row.display_name().bold(),
            format!("{} votes", row.vote_count).cyan()
        );
    }
    Ok(())
}
