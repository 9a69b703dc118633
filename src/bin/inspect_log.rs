use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use tracklog::config::EngineConfig;
use tracklog::loader::{BackgroundLoader, LoadEvent, LoadOutcome};
use tracklog::manager::LogFileManager;
use tracklog::state::LogFile;
use tracklog::sync::{AlignmentReference, TimeSynchronizer};

#[derive(Parser)]
#[command(name = "inspect_log")]
#[command(about = "Load telemetry logs and print their channels and statistics")]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shift every log so it starts at zero
    #[arg(long, conflicts_with = "align_to_main")]
    zero_align: bool,

    /// Shift every log so it starts with the Main log
    #[arg(long)]
    align_to_main: bool,

    /// Remove all cache artifacts before loading
    #[arg(long)]
    clear_cache: bool,

    /// Log files; the first becomes Main
    #[arg(required_unless_present = "clear_cache")]
    logs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let mut loader = BackgroundLoader::from_config(&config).context("Failed to start loader")?;

    if args.clear_cache {
        let removed = loader.cache().clear().context("Failed to clear cache")?;
        println!("Removed {} cache files", removed);
    }

    println!(
        "Backends: {}",
        loader
            .backends()
            .available()
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(", ")
    );

    // Submission order decides which log becomes Main
    let handles: Vec<_> = args.logs.iter().map(|path| loader.submit(path)).collect();
    let mut results: Vec<Option<LogFile>> = handles.iter().map(|_| None).collect();
    let mut failures = 0;

    while loader.in_flight() > 0 {
        let Some(event) = loader.wait_next(Duration::from_secs(600)) else {
            bail!("Timed out waiting for loads");
        };
        match event {
            LoadEvent::Progress { id, progress } => {
                tracing::debug!("{:?}: {}% {}", id, progress.percent, progress.stage.description());
            }
            LoadEvent::Completed { id, path, outcome } => match outcome {
                LoadOutcome::Loaded(log) => {
                    if let Some(slot) = handles.iter().position(|h| h.id() == id) {
                        results[slot] = Some(log);
                    }
                }
                LoadOutcome::Failed(e) => {
                    eprintln!("Error: {:#}", anyhow::Error::new(e));
                    failures += 1;
                }
                LoadOutcome::Cancelled => eprintln!("Cancelled: {}", path.display()),
            },
        }
    }

    let mut manager = LogFileManager::new();
    for log in results.into_iter().flatten() {
        manager.add(log);
    }

    if args.zero_align {
        TimeSynchronizer::default().zero_align(&mut manager);
    } else if args.align_to_main {
        TimeSynchronizer::new(AlignmentReference::FirstSample).align_to_main(&mut manager);
    }

    for log in manager.iter() {
        print_log(log);
    }

    if let Some((start, end)) = manager.time_range() {
        println!("\nCombined time range: {:.3} to {:.3} seconds", start, end);
    }

    loader.cache().wait_for_pending_writes();

    if failures > 0 {
        bail!("{} of {} logs failed to load", failures, args.logs.len());
    }
    Ok(())
}

fn print_log(log: &LogFile) {
    let table = log.table();

    println!("\n=== {} ({:?}) ===", log.display_name(), log.role());
    println!("Path: {}", log.source_path().display());
    for (key, value) in table.metadata() {
        println!("  {}: {}", key, value);
    }
    println!("Channels: {}", table.channels().len());
    println!("Data points: {}", table.len());
    println!("Time offset: {:.3} s", log.time_offset());
    if let Some((start, end)) = table.time_range() {
        println!("Time range: {:.3} to {:.3} seconds", start, end);
    }
    if table.non_monotonic_rows() > 0 {
        println!("Non-monotonic timestamps: {}", table.non_monotonic_rows());
    }

    println!("\n  {:<28} {:<16} {:>8} {:>12} {:>12} {:>12} {:>12}", "Channel", "Type", "Count", "Min", "Max", "Mean", "Std dev");
    for (i, channel) in table.channels().iter().enumerate() {
        match table.stats(i) {
            Some(stats) => println!(
                "  {:<28} {:<16} {:>8} {:>12.3} {:>12.3} {:>12.3} {:>12.3}",
                channel.name,
                channel.channel_type.as_str(),
                stats.count,
                stats.min,
                stats.max,
                stats.mean,
                stats.std_dev
            ),
            None => println!(
                "  {:<28} {:<16} {:>8}",
                channel.name,
                channel.channel_type.as_str(),
                0
            ),
        }
    }

    println!("\n  Sample data (first 5 rows, first 6 channels):");
    let header: Vec<String> = table
        .channels()
        .iter()
        .take(6)
        .map(|c| {
            let short: String = c.name.chars().take(12).collect();
            format!("{:>12}", short)
        })
        .collect();
    println!("  {:>12} | {}", "Time", header.join(" | "));

    for row in 0..table.len().min(5) {
        let values: Vec<String> = (0..table.channels().len().min(6))
            .filter_map(|i| table.column(i).map(|c| format!("{:>12.2}", c[row])))
            .collect();
        println!("  {:>12.3} | {}", table.times()[row], values.join(" | "));
    }
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
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "inspect_log",
            "--config",
            "engine.json",
            "--zero-align",
            "a.csv",
            "b.csv",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("engine.json")));
        assert!(cli.zero_align);
        assert_eq!(cli.logs, vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")]);

        assert!(Cli::try_parse_from(["inspect_log", "--clear-cache"]).is_ok());
        assert!(Cli::try_parse_from(["inspect_log"]).is_err());
        assert!(Cli::try_parse_from(["inspect_log", "--zero-align", "--align-to-main", "a.csv"]).is_err());
        assert!(Cli::try_parse_from(["inspect_log", "--bogus", "a.csv"]).is_err());
    }
}
