//! machi-post - Publish the next video from the catalog

use clap::Parser;
use libmachi::credentials::StdinPrompt;
use libmachi::{logging, Config, CycleOutcome, PublishService, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "machi-post")]
#[command(version, about = "Publish the next video from the catalog", long_about = None)]
struct Cli {
    /// Publish this file instead of picking one (must be cataloged)
    #[arg(short, long, value_name = "PATH")]
    media: Option<PathBuf>,

    /// Post text, replacing the configured template
    #[arg(short, long)]
    text: Option<String>,

    /// Show which file would be published without uploading anything
    #[arg(long)]
    dry_run: bool,

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

    let service = PublishService::new(Arc::new(config), Arc::new(StdinPrompt)).await?;
    let json = cli.format == "json";

    if cli.dry_run {
        let selected = service.dry_run(cli.media.as_deref()).await?;
        if json {
            println!("{}", serde_json::json!(selected));
        } else {
            println!("{}", selected.file_path);
        }
        return Ok(());
    }

    let outcome = service.run(cli.media.as_deref(), cli.text.as_deref()).await?;
    if json {
        println!("{}", serde_json::json!(outcome));
        return Ok(());
    }

    // A rejected post is reported, not raised
    match outcome {
        CycleOutcome::Published { link, .. } => println!("{}", link),
        CycleOutcome::Rejected { media, status, body } => {
            eprintln!(
                "Post for {} rejected with status {}: {}",
                media.file_path, status, body
            );
        }
    }
    Ok(())
}
