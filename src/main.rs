use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use jinn::{Database, DbOptions, FindOptions, RemoveOptions};

#[derive(Parser)]
#[command(name = "jinn", version = "1.0.0", about = "Embedded JSON document store CLI")]
struct Cli {
    /// Enable verbose (debug-level) logging of engine-internal events
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields, record count, and cache occupancy
    Info { file: PathBuf },
    /// Insert one record
    Insert {
        file: PathBuf,
        /// JSON object, or `@path` to read it from a file
        #[arg(short, long)]
        json: String,
        #[arg(long)]
        compressed: bool,
    },
    /// Evaluate a query and print matching records as JSON lines
    Find {
        file: PathBuf,
        /// Query tree as literal JSON (this CLI has no query-language parser)
        #[arg(short, long)]
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Remove matching records
    Remove {
        file: PathBuf,
        #[arg(short, long)]
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Iterate and print every live record, cache then out-of-core
    Dump { file: PathBuf },
    /// Rewrite the store at a new block size
    Resize {
        file: PathBuf,
        #[arg(long)]
        block_size: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    }

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────────
        Commands::Info { file } => {
            let db = Database::load(Some(&file), DbOptions::default())?;
            println!("── jinn database ───────────────────────────────");
            println!("  Path          {}", db.path().display());
            println!("  Block size    {} B", db.block_size());
            println!("  Blocks        {}", db.blocks());
            println!("  Cached        {} / {}", db.cache_len(), db.blocks());
            println!("  Compressed    {}", db.compressed());
            println!("  Max cache     {} B", db.max_cache_size());
        }

        // ── Insert ───────────────────────────────────────────────────────
        Commands::Insert { file, json, compressed } => {
            let record = parse_json_arg(&json)?;
            let mut db = Database::load(Some(&file), DbOptions { compressed, ..Default::default() })?;
            let id = db.insert(record)?;
            db.close()?;
            println!("inserted {id}");
        }

        // ── Find ─────────────────────────────────────────────────────────
        Commands::Find { file, query, limit } => {
            let query = parse_json_arg(&query)?;
            let mut db = Database::load(Some(&file), DbOptions::default())?;
            let results = db.find(&query, &FindOptions { limit, ..Default::default() })?;
            for record in &results {
                println!("{record}");
            }
            println!("{} record(s)", results.len());
        }

        // ── Remove ───────────────────────────────────────────────────────
        Commands::Remove { file, query, limit } => {
            let query = parse_json_arg(&query)?;
            let mut db = Database::load(Some(&file), DbOptions::default())?;
            let removed = db.remove(&query, &RemoveOptions { limit, ..Default::default() })?;
            db.close()?;
            println!("removed {removed} record(s)");
        }

        // ── Dump ─────────────────────────────────────────────────────────
        Commands::Dump { file } => {
            let mut db = Database::load(Some(&file), DbOptions::default())?;
            let mut count = 0usize;
            db.iterate(4, |record| {
                println!("{record}");
                count += 1;
                jinn::ScanControl::Continue
            })?;
            println!("{count} record(s)");
        }

        // ── Resize ───────────────────────────────────────────────────────
        Commands::Resize { file, block_size } => {
            let mut db = Database::load(Some(&file), DbOptions::default())?;
            db.resize(block_size)?;
            db.close()?;
            println!("resized to {block_size} B blocks");
        }
    }

    Ok(())
}

fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => arg.to_string(),
    };
    Ok(serde_json::from_str(&text)?)
}
