use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tumbleweed::app::AppState;
use tumbleweed::config::Config;
use tumbleweed::feed::IngestReport;
use tumbleweed::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/tumbleweed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("tumbleweed");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "tumbleweed", about = "Headless podcast and RSS feed synchronizer")]
struct Args {
    /// Subscribe to a feed URL (repeatable)
    #[arg(long, value_name = "URL")]
    add: Vec<String>,

    /// Subscribe to every feed in an OPML file
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Write all subscriptions to an OPML file
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,

    /// Unsubscribe from a feed URL (starred episodes are kept)
    #[arg(long, value_name = "URL")]
    remove: Option<String>,

    /// Mark every episode as read
    #[arg(long)]
    mark_all_read: bool,

    /// Print subscriptions with unread counts
    #[arg(long)]
    list: bool,

    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,

    /// Config file (default: ~/.config/tumbleweed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn print_import_summary(reports: &[IngestReport]) {
    let mut added = 0;
    let mut new_episodes = 0;
    for report in reports {
        match &report.result {
            Ok(outcome) => {
                added += usize::from(outcome.feed_created);
                new_episodes += outcome.new_episodes;
            }
            Err(e) => eprintln!("  failed: {} ({})", report.url, e),
        }
    }
    println!(
        "Imported {} of {} feeds ({} new, {} new episodes)",
        reports.iter().filter(|r| r.result.is_ok()).count(),
        reports.len(),
        added,
        new_episodes
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // User-only access on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config_dir.join("tumbleweed.db");
    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of tumbleweed appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let mut state = AppState::new(db, &config).context("Failed to create HTTP client")?;
    state.load_feeds().await.context("Failed to load feeds")?;

    if let Some(import_file) = &args.import {
        let path = import_file
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in import path"))?;
        let reports = state
            .import_opml_file(path)
            .await
            .with_context(|| format!("Failed to import {}", import_file.display()))?;
        print_import_summary(&reports);
    }

    for url in &args.add {
        match state.add_feed(url).await {
            Ok(outcome) => println!(
                "{} {} ({} new episodes)",
                if outcome.feed_created { "Added" } else { "Updated" },
                url,
                outcome.new_episodes
            ),
            Err(e) => eprintln!("Failed to add {}: {}", url, e),
        }
    }

    if let Some(url) = &args.remove {
        let removal = state
            .remove_feed(url)
            .await
            .with_context(|| format!("Failed to remove {}", url))?;
        if removal.feeds_deleted == 0 {
            println!("Not subscribed to {}", url);
        } else {
            println!(
                "Removed {} ({} episodes deleted, starred episodes kept)",
                url, removal.episodes_deleted
            );
        }
    }

    if args.mark_all_read {
        let changed = state
            .mark_all_as_read(None)
            .await
            .context("Failed to mark episodes as read")?;
        println!("Marked {} episodes as read", changed);
    }

    if let Some(export_file) = &args.export {
        let count = state
            .export_opml_to_file(export_file)
            .with_context(|| format!("Failed to export to {}", export_file.display()))?;
        println!("Exported {} feeds to {}", count, export_file.display());
    }

    if args.list {
        if state.feeds().is_empty() {
            println!("No subscriptions. Add one with --add URL or --import FILE.");
        }
        for summary in state.feeds() {
            println!(
                "{:>5}  {}  <{}>",
                summary.unread_count, summary.feed.title, summary.feed.id
            );
        }
    }

    Ok(())
}
