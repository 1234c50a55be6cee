//! zerostore inspector
//!
//! Prints statistics, scans tables and verifies every stored record of a
//! zerostore environment.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use zerostore::core::env::MAX_TABLES;
use zerostore::{Env, ReadTxn, RecordCodec, StoreConfig, VersionSet};

#[derive(Parser, Debug)]
#[command(name = "zerostore-inspect")]
#[command(about = "Inspect and verify a zerostore environment")]
struct Args {
    /// Environment directory (overrides the config file and ZEROSTORE_PATH)
    #[arg(short = 'p', long)]
    path: Option<PathBuf>,

    /// TOML config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print environment and table statistics
    Stat,

    /// List the records of a table
    Scan {
        /// Table name
        #[arg(short, long)]
        table: String,

        /// Only keys starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Check the header and checksum of every record
    Verify,
}

#[derive(Debug, Serialize)]
struct ScanRow {
    key: String,
    version: Option<u8>,
    len: usize,
    error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct VerifyReport {
    records: usize,
    corrupt: usize,
    failures: Vec<ScanRow>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = StoreConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(path) = args.path {
        config.path = path;
    }

    // Any number of tables may exist; the map keeps the configured bound.
    let options = config
        .env_options()
        .max_tables(MAX_TABLES)
        .durable(false);
    let env = Env::open(&config.path, options)
        .with_context(|| format!("opening store at {:?}", config.path))?;
    info!("Inspecting {:?}", config.path);

    match args.command {
        Command::Stat => stat(&env, args.json),
        Command::Scan { table, prefix } => scan(&env, &table, prefix.as_deref(), args.json),
        Command::Verify => verify(&env, args.json),
    }
}

fn stat(env: &Env, json: bool) -> Result<()> {
    let stats = env.stat()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("path:       {}", stats.path.display());
    println!("txn:        {}", stats.txn_id);
    println!("used:       {} bytes", stats.used_bytes);
    println!("map size:   {} bytes", stats.map_size);
    println!("tables:     {}", stats.tables.len());
    for table in &stats.tables {
        println!(
            "  [{}] {:<24} {:>10} entries  {:?}",
            table.id, table.name, table.entries, table.mode
        );
    }
    Ok(())
}

fn describe(codec: &RecordCodec, key: &[u8], raw: &[u8]) -> ScanRow {
    let key = String::from_utf8_lossy(key).into_owned();
    match codec.decode(raw, &VersionSet::ALL) {
        Ok(decoded) => ScanRow {
            key,
            version: Some(decoded.version),
            len: decoded.payload.len(),
            error: None,
        },
        Err(err) => ScanRow {
            key,
            version: None,
            len: raw.len(),
            error: Some(err.to_string()),
        },
    }
}

fn scan(env: &Env, table: &str, prefix: Option<&str>, json: bool) -> Result<()> {
    let txn = env.begin_ro_txn()?;
    let Some(handle) = txn.open_table(table) else {
        bail!("no table named {:?}", table);
    };
    let cursor = match prefix {
        Some(prefix) => txn.prefix(handle, prefix.as_bytes())?,
        None => txn.cursor(handle)?,
    };

    let codec = RecordCodec::new();
    let mut rows = Vec::new();
    for entry in cursor {
        let (key, raw) = entry?;
        rows.push(describe(&codec, key, raw));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for row in &rows {
        match (&row.error, row.version) {
            (Some(error), _) => println!("{:<32} CORRUPT  {}", row.key, error),
            (None, Some(version)) => {
                println!("{:<32} v{:<3} {:>10} bytes", row.key, version, row.len)
            }
            (None, None) => println!("{:<32} {:>10} bytes", row.key, row.len),
        }
    }
    println!("{} records", rows.len());
    Ok(())
}

fn verify(env: &Env, json: bool) -> Result<()> {
    let txn = env.begin_ro_txn()?;
    let codec = RecordCodec::new();
    let mut report = VerifyReport::default();

    for (name, table) in txn.tables() {
        for entry in txn.cursor(table)? {
            let (key, raw) = entry?;
            report.records += 1;
            let row = describe(&codec, key, raw);
            if let Some(error) = &row.error {
                warn!("{}: record {:?} is corrupt: {}", name, row.key, error);
                report.corrupt += 1;
                report.failures.push(ScanRow {
                    key: format!("{}/{}", name, row.key),
                    ..row
                });
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} records checked, {} corrupt",
            report.records, report.corrupt
        );
        for failure in &report.failures {
            println!(
                "  {}: {}",
                failure.key,
                failure.error.as_deref().unwrap_or_default()
            );
        }
    }

    if report.corrupt > 0 {
        std::process::exit(1);
    }
    Ok(())
}
