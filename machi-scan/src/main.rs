//! machi-scan - Catalog the media library
//!
//! Walks the configured media location and adds every file to the catalog.
//! Files under `[media] exclude_folders` are skipped and removed from the
//! catalog if they were added before.

use clap::Parser;
use libmachi::config::Config;
use libmachi::db::Database;
use libmachi::scan::{scan, ScanReport};
use libmachi::{logging, Ledger, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "machi-scan")]
#[command(version, about = "Catalog the media library", long_about = None)]
struct Cli {
    /// Clear the catalog before scanning (post history is kept)
    #[arg(long)]
    rebuild: bool,

    /// Path to the config file
    #[arg(short, long, env = "MACHI_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    #[arg(value_parser = ["text", "json"])]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init_default(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let db = Database::new(&config.database_path()).await?;
    let ledger = Ledger::new(db);

    if cli.rebuild {
        let cleared = ledger.clear_media().await?;
        tracing::info!("Cleared {} catalog entries", cleared);
    }

    let report = scan(&ledger, &config.media_root(), &config.media.exclude_folders).await?;
    print_report(&report, &cli.format);
    Ok(())
}

fn print_report(report: &ScanReport, format: &str) {
    match format {
        "json" => println!("{}", serde_json::json!(report)),
        _ => println!(
            "Scanned {} files: {} new, {} removed",
            report.discovered, report.added, report.removed
        ),
    }
}
