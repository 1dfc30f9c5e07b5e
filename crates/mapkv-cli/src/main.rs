//! CLI entry point for mapkv.
//!
//! This binary provides the `mapkv` command for inspecting and editing
//! arena files from the shell.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mapkv_common::config::DEFAULT_ARENA_LEN;
use mapkv_common::ArenaConfig;
use mapkv_storage::Arena;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Inspect and edit mapkv arena files.
#[derive(Parser, Debug)]
#[command(name = "mapkv", version, about = "Inspect and edit mapkv arena files")]
struct Cli {
    /// Arena file to operate on.
    #[arg(short, long, global = true, default_value = "db.dat")]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new, empty arena.
    Create {
        /// Arena size in MiB.
        #[arg(long, default_value_t = DEFAULT_ARENA_LEN / (1024 * 1024))]
        size_mb: u64,
    },

    /// Print every entry grouped by category, then the free list.
    Dump,

    /// Print the value stored under a key.
    Get {
        #[arg(value_parser = clap::value_parser!(u8).range(0..128))]
        category: u8,
        key: String,
    },

    /// Store a value under a key.
    Set {
        #[arg(value_parser = clap::value_parser!(u8).range(0..128))]
        category: u8,
        key: String,
        value: String,
    },

    /// Remove a key.
    Rm {
        #[arg(value_parser = clap::value_parser!(u8).range(0..128))]
        category: u8,
        key: String,
    },

    /// Print usage statistics.
    Stats,

    /// Verify the structure of the arena.
    Check,

    /// Erase every entry.
    Reset,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing("warn");
    let cli = Cli::parse();
    let stdout = io::stdout();
    run(cli, &mut stdout.lock())
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    match cli.command {
        Commands::Create { size_mb } => cmd_create(&cli.file, size_mb, out),
        Commands::Dump => {
            let arena = open_existing(&cli.file)?;
            arena.dump(out)?;
            Ok(())
        }
        Commands::Get { category, key } => {
            let arena = open_existing(&cli.file)?;
            match arena.get(category, &key)? {
                Some(value) => writeln!(out, "{}", String::from_utf8_lossy(&value))?,
                None => bail!("key {:?} not found in category {}", key, category),
            }
            Ok(())
        }
        Commands::Set { category, key, value } => {
            let arena = open_existing(&cli.file)?;
            arena.upsert(category, &key, value.as_bytes())?;
            arena.flush()?;
            Ok(())
        }
        Commands::Rm { category, key } => {
            let arena = open_existing(&cli.file)?;
            if !arena.remove(category, &key)? {
                bail!("key {:?} not found in category {}", key, category);
            }
            arena.flush()?;
            writeln!(out, "removed {}/{}", category, key)?;
            Ok(())
        }
        Commands::Stats => cmd_stats(&cli.file, out),
        Commands::Check => {
            let arena = open_existing(&cli.file)?;
            let report = arena
                .check_integrity()
                .with_context(|| format!("{} failed the integrity check", cli.file.display()))?;
            writeln!(
                out,
                "ok: {} records, {} entries, {} free ({} bytes)",
                report.records, report.entries, report.free_records, report.free_bytes
            )?;
            Ok(())
        }
        Commands::Reset => {
            let arena = open_existing(&cli.file)?;
            arena.reset()?;
            arena.flush()?;
            writeln!(out, "reset {}", cli.file.display())?;
            Ok(())
        }
    }
}

fn open_existing(path: &Path) -> Result<Arena> {
    Arena::open(ArenaConfig::new(path).with_create(false))
        .with_context(|| format!("failed to open {}", path.display()))
}

// ---------------------------------------------------------------------------
// Subcommand: create
// ---------------------------------------------------------------------------

fn cmd_create(path: &Path, size_mb: u64, out: &mut impl Write) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let length = size_mb
        .checked_mul(1024 * 1024)
        .context("arena size overflows")?;
    let arena = Arena::open_or_create(path, true, length)
        .with_context(|| format!("failed to create {}", path.display()))?;
    info!(path = %path.display(), size_mb, "arena created");
    writeln!(
        out,
        "created {} ({} MiB, {} buckets)",
        path.display(),
        size_mb,
        arena.bucket_count()
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: stats
// ---------------------------------------------------------------------------

fn cmd_stats(path: &Path, out: &mut impl Write) -> Result<()> {
    let arena = open_existing(path)?;
    let stats = arena.stats()?;
    writeln!(out, "file        {}", path.display())?;
    writeln!(out, "file_len    {}", stats.file_len)?;
    writeln!(out, "data_len    {}", stats.data_len)?;
    writeln!(out, "buckets     {}", stats.bucket_count)?;
    writeln!(out, "entries     {}", stats.entries)?;
    for category in &stats.categories {
        writeln!(out, "  category {:>3}  {}", category.category, category.entries)?;
    }
    writeln!(
        out,
        "free        {} records, {} bytes, largest {}",
        stats.free_records, stats.free_bytes, stats.largest_free
    )?;
    Ok(())
}
