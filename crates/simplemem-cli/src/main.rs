//! simplemem - command-line access to a memory space.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use simplemem_core::{
    ConsolidationReport, IngestResult, Memory, MemoryConfig, QueryConstraints, QueryResult,
    SimpleMemError, StorageBackend, StoreStats,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "simplemem")]
#[command(version)]
#[command(about = "Long-term conversational memory")]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, env = "SIMPLEMEM_DB_PATH")]
    db: Option<PathBuf>,

    /// Configuration file (.toml, .json or .yaml)
    #[arg(long, global = true, env = "SIMPLEMEM_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a transcript of `Speaker: content` lines ("-" reads stdin)
    Ingest { file: PathBuf },

    /// Retrieve context for a question
    Query {
        text: String,

        /// Token budget for the assembled context
        #[arg(long)]
        budget: Option<usize>,

        /// Include archived atoms
        #[arg(long)]
        drill_down: bool,

        /// Only entries at or after this date (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_after)]
        after: Option<DateTime<Utc>>,

        /// Only entries at or before this date (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_before)]
        before: Option<DateTime<Utc>>,

        /// Search within one molecule's source atoms
        #[arg(long)]
        molecule: Option<String>,
    },

    /// Run one consolidation pass
    Consolidate,

    /// Show an atom or a molecule with its sources
    Show { id: String },

    /// Entry counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,simplemem=debug,simplemem_core=debug")),
        )
        .init();

    let memory = open_memory(&cli)?;

    match cli.command {
        Commands::Ingest { ref file } => {
            let text = read_input(file)?;
            let result = memory.ingest(text).await?;
            emit(cli.json, &result, print_ingest)?;
        }
        Commands::Query {
            ref text,
            budget,
            drill_down,
            after,
            before,
            ref molecule,
        } => {
            let constraints = QueryConstraints {
                after,
                before,
                token_budget: budget,
                drill_down,
                molecule_id: molecule.clone(),
                ..Default::default()
            };
            let result = memory.query(text, Some(constraints)).await?;
            emit(cli.json, &result, print_query)?;
        }
        Commands::Consolidate => {
            let report = memory.consolidate(None).await?;
            emit(cli.json, &report, print_consolidation)?;
        }
        Commands::Show { ref id } => show(&memory, id, cli.json)?,
        Commands::Stats => {
            let stats = memory.stats()?;
            emit(cli.json, &stats, print_stats)?;
        }
    }

    Ok(())
}

fn open_memory(cli: &Cli) -> Result<Memory> {
    let mut config = match &cli.config {
        Some(path) => MemoryConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MemoryConfig::default(),
    };
    config.apply_env()?;
    if let Some(db) = &cli.db {
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.path = db.clone();
    }
    info!(backend = %config.storage.backend, path = %config.storage.path.display(), "Opening memory");
    Ok(Memory::from_config(config)?)
}

fn read_input(file: &PathBuf) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

fn emit<T: Serialize>(json: bool, value: &T, text: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn show(memory: &Memory, id: &str, json: bool) -> Result<()> {
    match memory.get_atom(id) {
        Ok(atom) => return emit(json, &atom, |a| {
            println!("atom {} [{}]", a.id, a.status);
            println!("  time:    {}", a.timestamp.to_rfc3339());
            println!("  content: {}", a.content);
            if let Some(molecule) = &a.molecule_id {
                println!("  part of: {}", molecule);
            }
        }),
        Err(SimpleMemError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    let molecule = match memory.get_molecule(id) {
        Ok(molecule) => molecule,
        Err(SimpleMemError::NotFound { .. }) => bail!("no atom or molecule with id {}", id),
        Err(e) => return Err(e.into()),
    };
    let sources = memory.drill_down(id)?;
    if json {
        let value = serde_json::json!({ "molecule": molecule, "sources": sources });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    println!("molecule {} (revision {})", molecule.id, molecule.revision);
    println!(
        "  span:    {} .. {}",
        molecule.time_span.0.to_rfc3339(),
        molecule.time_span.1.to_rfc3339()
    );
    println!("  content: {}", molecule.content);
    println!("  sources ({}):", sources.len());
    for atom in &sources {
        println!("    {} [{}] {}", atom.id, atom.timestamp.to_rfc3339(), atom.content);
    }
    Ok(())
}

fn print_ingest(result: &IngestResult) {
    for window in &result.windows {
        println!(
            "window {}: {:?} (score {:.3}), {} atoms, {} dropped",
            window.window_id,
            window.decision,
            window.score.score,
            window.atom_ids.len(),
            window.dropped.len()
        );
        for claim in &window.dropped {
            println!("  dropped [{}] {}: {}", claim.speaker, claim.text, claim.reason);
        }
    }
    println!("{} atoms stored", result.atom_ids.len());
}

fn print_query(result: &QueryResult) {
    if result.no_relevant_memory {
        println!("No relevant memory.");
        return;
    }
    println!("{}", result.context);
    println!(
        "-- {} entries, {} tokens, complexity {:.2}, depth {}",
        result.entry_ids.len(),
        result.tokens_used,
        result.complexity,
        result.depth
    );
}

fn print_consolidation(report: &ConsolidationReport) {
    println!(
        "scanned {} atoms, scored {} pairs: {} created, {} re-synthesized, {} skipped, {} below threshold",
        report.atoms_scanned,
        report.edges_scored,
        report.created.len(),
        report.resynthesized.len(),
        report.skipped.len(),
        report.below_threshold
    );
    for skipped in &report.skipped {
        println!("  skipped {:?}: {} ({})", skipped.atom_ids, skipped.reason, skipped.code);
    }
}

fn print_stats(stats: &StoreStats) {
    println!("atoms:     {}", stats.atoms);
    println!("  active:   {}", stats.active_atoms);
    println!("  archived: {}", stats.archived_atoms);
    println!("molecules: {}", stats.molecules);
}

fn parse_after(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_date(raw, NaiveTime::MIN)
}

fn parse_before(raw: &str) -> Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    parse_date(raw, end_of_day)
}

/// RFC 3339, or a bare date at `time_of_day`.
fn parse_date(raw: &str, time_of_day: NaiveTime) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.and_time(time_of_day).and_utc())
        .map_err(|_| format!("'{}' is not YYYY-MM-DD or RFC 3339", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dates() {
        let after = parse_after("2024-05-20").unwrap();
        assert_eq!(after.to_rfc3339(), "2024-05-20T00:00:00+00:00");
        let before = parse_before("2024-05-20").unwrap();
        assert_eq!(before.date_naive().to_string(), "2024-05-20");
        assert!(before > after);
        assert!(parse_after("2024-05-20T09:30:00Z").is_ok());
        assert!(parse_after("next monday").is_err());
    }

    #[test]
    fn test_query_flags() {
        let cli = Cli::parse_from([
            "simplemem",
            "--json",
            "query",
            "What did Alice plan?",
            "--budget",
            "500",
            "--drill-down",
            "--after",
            "2024-05-01",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Query {
                budget, drill_down, after, ..
            } => {
                assert_eq!(budget, Some(500));
                assert!(drill_down);
                assert!(after.is_some());
            }
            _ => panic!("expected query"),
        }
    }
}
