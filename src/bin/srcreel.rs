//! # srcreel CLI - Record a source tree over time
//!
//! Command-line front end for the srcreel library.
//!
//! ## Features
//! - Record a directory at a fixed interval, tagging moments from stdin
//! - List and inspect the segments of a recording
//! - Restore the tree as of any segment index or time offset
//! - Verify the integrity of a recording
//! - Pack a directory into a plain zip archive
//!
//! ## Usage
//! ```bash
//! # Record ./project every minute for two hours
//! srcreel record ./project -o session.srcreel --interval 1m --duration 2h
//!
//! # While recording, type a line to tag the current state, or ":stop" to end
//!
//! # List segments
//! srcreel list session.srcreel
//!
//! # Restore the state 45 minutes in
//! srcreel restore session.srcreel ./restored --at 45m
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use srcreel::provider::reconstruct;
use srcreel::utils::format_bytes;
use srcreel::{
    archive, lock, BulkReadPolicy, DirectoryProvider, ProviderConfig, RecorderBuilder,
    RecorderHandle, ReelError, Result, Segment, SnapshotReader,
};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufWriter};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// srcreel CLI - Records how a source tree evolves
#[derive(Parser)]
#[command(name = "srcreel")]
#[command(version)]
#[command(about = "Record a source tree over time and replay any moment of it")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a directory into a recording file
    #[command(alias = "rec")]
    Record {
        /// Directory to record
        root: PathBuf,

        /// Recording file to create
        #[arg(short, long)]
        output: PathBuf,

        /// Time between snapshots (e.g. "30s", "5m")
        #[arg(short, long, default_value = "5m", value_parser = humantime::parse_duration)]
        interval: Duration,

        /// How long to record (e.g. "1h 30m")
        #[arg(short, long, default_value = "1h", value_parser = humantime::parse_duration)]
        duration: Duration,

        /// Every n-th segment stores the full tree
        #[arg(short, long, default_value_t = 5)]
        key_spacing: usize,

        /// Ignore patterns (glob syntax, relative to the root)
        #[arg(long)]
        ignore: Vec<String>,

        /// Skip files larger than this many bytes
        #[arg(long, default_value_t = 0)]
        max_file_size: u64,
    },

    /// List the segments of a recording
    #[command(alias = "ls")]
    List {
        /// Recording file
        file: PathBuf,

        /// Keep listing past corrupt segments
        #[arg(long)]
        lenient: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show recording info
    Info {
        /// Recording file
        file: PathBuf,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore the recorded tree into a directory
    #[command(alias = "rs")]
    Restore {
        /// Recording file
        file: PathBuf,

        /// Destination directory
        dest: PathBuf,

        /// Segment index to restore
        #[arg(long, conflicts_with = "at", required_unless_present = "at")]
        index: Option<usize>,

        /// Time offset from the recording start (e.g. "45m")
        #[arg(long, value_parser = humantime::parse_duration)]
        at: Option<Duration>,
    },

    /// Verify recording integrity
    Verify {
        /// Recording file
        file: PathBuf,
    },

    /// Pack a directory into a zip archive
    Pack {
        /// Directory to pack
        root: PathBuf,

        /// Archive to create
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Record {
            root,
            output,
            interval,
            duration,
            key_spacing,
            ignore,
            max_file_size,
        } => cmd_record(root, output, interval, duration, key_spacing, ignore, max_file_size),
        Commands::List { file, lenient, json } => cmd_list(&file, lenient, json),
        Commands::Info { file, json } => cmd_info(&file, json),
        Commands::Restore { file, dest, index, at } => cmd_restore(&file, &dest, index, at),
        Commands::Verify { file } => cmd_verify(&file),
        Commands::Pack { root, output } => cmd_pack(&root, &output),
    }
}

/// Record a directory
///
/// Runs in the foreground. Each non-empty line read from stdin tags the
/// current state; a line reading `:stop` ends the recording early.
fn cmd_record(
    root: PathBuf,
    output: PathBuf,
    interval: Duration,
    duration: Duration,
    key_spacing: usize,
    ignore: Vec<String>,
    max_file_size: u64,
) -> Result<()> {
    let provider = DirectoryProvider::new(
        &root,
        ProviderConfig {
            ignore_patterns: ignore,
            max_file_size,
        },
    )?
    .exclude(&output)
    .exclude(lock::lock_path_for(&output));

    let mut recorder = RecorderBuilder::new()
        .snapshot_interval(interval)
        .key_snapshot_spacing(key_spacing)
        .build(provider, &output)?;

    println!("{}", "Recording...".blue().bold());
    println!("  Root: {}", root.display().to_string().cyan());
    println!("  Output: {}", output.display().to_string().cyan());
    println!(
        "  Every {} for {}",
        format_duration(interval).to_string().yellow(),
        format_duration(duration).to_string().yellow()
    );
    println!(
        "\nType a line to tag the current state, or {} to finish early.",
        ":stop".yellow()
    );

    spawn_stdin_tagger(recorder.handle());

    let summary = recorder.start(duration)?;
    recorder.close()?;

    println!("\n{} Recording finished", "✓".green().bold());
    println!(
        "  Segments: {} ({} key)",
        summary.segments_written.to_string().green(),
        summary.key_segments
    );
    if summary.failed_ticks > 0 {
        println!("  Failed ticks: {}", summary.failed_ticks.to_string().red());
    }
    if !summary.tags_applied.is_empty() {
        println!("  Tags: {}", summary.tags_applied.join(", ").cyan());
    }
    println!("  Elapsed: {}", format_duration(round_secs(summary.elapsed)));
    if summary.stopped_by_request {
        println!("  Stopped early on request");
    }
    Ok(())
}

fn spawn_stdin_tagger(handle: RecorderHandle) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == ":stop" {
                handle.stop();
                break;
            }
            handle.tag_current_state(line);
        }
    });
}

/// List segments
fn cmd_list(file: &Path, lenient: bool, json: bool) -> Result<()> {
    let mut reader = SnapshotReader::open(file)?;
    let policy = if lenient {
        BulkReadPolicy::Lenient
    } else {
        BulkReadPolicy::Strict
    };
    let segments = reader.snapshots(policy)?;

    // Lenient reads replace damaged segments with placeholders; find them
    let damaged: HashSet<u64> = if lenient {
        let report = reader.verify()?;
        report
            .corrupt_segments
            .into_iter()
            .chain(report.unreadable_segments)
            .collect()
    } else {
        HashSet::new()
    };

    if json {
        let headers: Vec<_> = segments.iter().map(Segment::header).collect();
        println!("{}", serde_json::to_string_pretty(&headers)?);
        return Ok(());
    }

    if segments.is_empty() {
        println!("{}", "No segments recorded".yellow());
        return Ok(());
    }

    println!(
        "{:>5}  {:>10}  {:<4}  {:>10}  {:>10}  {}",
        "#".bold(),
        "address".bold(),
        "kind".bold(),
        "offset".bold(),
        "size".bold(),
        "tag".bold()
    );
    for (index, segment) in segments.iter().enumerate() {
        let kind = if segment.kind.is_key() {
            "key".green()
        } else {
            "diff".normal()
        };
        let tag = if damaged.contains(&segment.address) {
            "(damaged)".red().to_string()
        } else {
            segment.tag.cyan().to_string()
        };
        println!(
            "{:>5}  {:>10}  {:<4}  {:>10}  {:>10}  {}",
            index,
            segment.address,
            kind,
            format_duration(Duration::from_secs(segment.timestamp as u64)).to_string(),
            format_bytes(segment.size() as u64),
            tag
        );
    }
    Ok(())
}

/// Show recording info
fn cmd_info(file: &Path, json: bool) -> Result<()> {
    let mut reader = SnapshotReader::open(file)?;
    let header = *reader.header();
    let headers = reader.segment_headers()?;
    let file_size = std::fs::metadata(file)?.len();

    let key_count = headers.iter().filter(|h| h.kind.is_key()).count();
    let last_offset = headers.last().map(|h| h.timestamp).unwrap_or(0);
    let tags: Vec<&str> = headers
        .iter()
        .filter(|h| !h.tag.is_empty())
        .map(|h| h.tag.as_str())
        .collect();

    if json {
        let info = serde_json::json!({
            "path": file,
            "started": header.created_at().map(|t| t.to_rfc3339()),
            "start_timestamp": header.timestamp,
            "segments": headers.len(),
            "key_segments": key_count,
            "last_offset_secs": last_offset,
            "file_size": file_size,
            "tags": tags,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{}", "Recording Info:".bold());
    println!("  Path: {}", file.display().to_string().cyan());
    if let Some(started) = header.created_at() {
        println!("  Started: {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "  Segments: {} ({} key, {} diff)",
        headers.len(),
        key_count,
        headers.len() - key_count
    );
    println!(
        "  Covers: {}",
        format_duration(Duration::from_secs(last_offset as u64))
    );
    println!("  Size: {}", format_bytes(file_size));
    if !tags.is_empty() {
        println!("  Tags:");
        for tag in tags {
            println!("    - {}", tag.cyan());
        }
    }
    Ok(())
}

/// Restore the tree as of an index or time offset
fn cmd_restore(file: &Path, dest: &Path, index: Option<usize>, at: Option<Duration>) -> Result<()> {
    let mut reader = SnapshotReader::open(file)?;

    let index = match (index, at) {
        (Some(index), _) => index,
        (None, Some(at)) => {
            let secs = u32::try_from(at.as_secs()).unwrap_or(u32::MAX);
            reader
                .index_at_or_before_timestamp(secs)?
                .ok_or(ReelError::NoSegmentAtTime(secs))?
        }
        (None, None) => {
            return Err(ReelError::invalid_configuration(
                "either --index or --at is required",
            ))
        }
    };

    println!(
        "{} {}",
        "Restoring segment".blue().bold(),
        index.to_string().yellow()
    );
    let start = Instant::now();

    let chain = reader.replayable_segments_until(index)?;
    let tree = reconstruct(&chain)?;
    let written = tree.write_to(dest)?;

    println!(
        "{} Restored {} files ({}) from {} segments in {}",
        "✓".green().bold(),
        written.to_string().green(),
        format_bytes(tree.total_size()),
        chain.len(),
        format_duration(round_millis(start.elapsed()))
    );
    println!("  Destination: {}", dest.display().to_string().cyan());
    Ok(())
}

/// Verify recording integrity
fn cmd_verify(file: &Path) -> Result<()> {
    println!("{} {}", "Verifying".blue().bold(), file.display().to_string().yellow());

    let mut reader = SnapshotReader::open(file)?;
    let report = reader.verify()?;

    println!("\n{}", "Verification Report:".bold());
    println!("  Total segments: {}", report.total_segments);
    println!("  Valid segments: {}", report.valid_segments.to_string().green());
    if !report.corrupt_segments.is_empty() {
        println!("  Corrupt segments: {}", report.corrupt_segments.len().to_string().red());
        for address in &report.corrupt_segments {
            println!("    - at byte {}", address);
        }
    }
    if !report.unreadable_segments.is_empty() {
        println!(
            "  Unreadable segments: {}",
            report.unreadable_segments.len().to_string().red()
        );
    }
    if let Some(address) = report.truncated_tail {
        println!("  Truncated tail: {}", format!("at byte {}", address).red());
    }
    println!(
        "  Starts with key: {}",
        if report.starts_with_key { "✓ Yes".green() } else { "✗ No".red() }
    );
    if !report.ordering_violations.is_empty() {
        println!(
            "  Timestamp order: {}",
            format!("✗ {} violations", report.ordering_violations.len()).red()
        );
    }
    println!("  Verification time: {}ms", report.verification_time_ms);

    if report.is_valid() {
        println!("\n{} {}", "✓".green().bold(), report.summary());
        Ok(())
    } else {
        Err(ReelError::VerificationFailed(report.summary()))
    }
}

/// Pack a directory into a zip archive
fn cmd_pack(root: &Path, output: &Path) -> Result<()> {
    let sink = BufWriter::new(File::create(output)?);
    let sink = archive::pack_directory(root, sink)?;
    sink.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    let size = std::fs::metadata(output)?.len();
    println!(
        "{} Packed {} into {} ({})",
        "✓".green().bold(),
        root.display().to_string().cyan(),
        output.display().to_string().cyan(),
        format_bytes(size)
    );
    Ok(())
}

fn round_secs(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}

fn round_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
