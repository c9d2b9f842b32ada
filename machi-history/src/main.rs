use anyhow::{Context, Result};
use clap::Parser;
use libmachi::logging;
use libmachi::{Config, Database, Ledger, PostRecord};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "machi-history")]
#[command(version, about = "Show recently published videos")]
#[command(long_about = r#"Show recently published videos from the local catalog.

EXAMPLES:
    # Show last 20 posts (default)
    machi-history

    # Show more posts
    machi-history --limit 50

    # JSON output for scripting
    machi-history --format json | jq -r '.[] | .link'

    # JSONL output (one JSON object per line)
    machi-history --format jsonl

OUTPUT FORMATS:
    text  - Timestamp, short link and post text (default)
    json  - JSON array
    jsonl - JSON lines, one object per line

EXIT CODES:
    0 - Success (including empty results)
    1 - Error (database not found, query failed, etc.)
"#)]
struct Args {
    /// Maximum number of posts to return
    #[arg(short, long, default_value = "20", value_name = "N")]
    limit: u32,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Path to the config file
    #[arg(short, long, env = "MACHI_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(path: Option<&PathBuf>) -> libmachi::Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

fn print_text(posts: &[PostRecord]) {
    for post in posts {
        let dt = chrono::DateTime::from_timestamp(post.timestamp, 0).unwrap_or_else(chrono::Utc::now);
        let timestamp = dt.format("%Y-%m-%d %H:%M:%S");

        let preview: String = if post.post_body.chars().count() > 60 {
            format!("{}...", post.post_body.chars().take(60).collect::<String>())
        } else {
            post.post_body.clone()
        };

        println!("{} | {} | {}", timestamp, post.link, preview.replace('\n', " "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    logging::init_default(args.verbose);

    tracing::debug!("machi-history started with args: {:?}", args);

    let config = load_config(args.config.as_ref()).context("Failed to load configuration")?;
    let db_path = config.database_path();

    if !std::path::Path::new(&db_path).exists() {
        eprintln!("Error: Database not found at {}", db_path);
        eprintln!("Have you scanned your library yet? Try: machi-scan");
        std::process::exit(1);
    }

    let db = Database::new(&db_path)
        .await
        .context("Failed to open database")?;
    let posts = Ledger::new(db)
        .history(args.limit)
        .await
        .context("Failed to query history")?;

    match args.format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&posts)?);
        }
        "jsonl" => {
            for post in &posts {
                println!("{}", serde_json::to_string(post)?);
            }
        }
        _ => print_text(&posts),
    }

    Ok(())
}
