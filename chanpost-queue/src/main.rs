//! chanpost-queue - Manage the candidate queue and delivery history
//!
//! Companion CLI for chanpost-send: enqueue content for channels,
//! inspect or drain the queue, and review delivery records.

use std::process;

use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use libchanpost::types::CandidatePost;
use libchanpost::{Config, Database, Result};
use serde_json::json;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "chanpost-queue")]
#[command(version)]
#[command(about = "Manage the Chanpost candidate queue and delivery history")]
#[command(long_about = "\
chanpost-queue - Manage the candidate queue and delivery history

DESCRIPTION:
    chanpost-queue is the companion CLI for the chanpost-send daemon.
    It enqueues content for one or more channels, lists and removes
    pending candidates, and shows the delivery history.

USAGE:
    # Enqueue a post for every configured channel
    chanpost-queue add \"Release 1.4 is out\"

    # Enqueue a photo post for one channel
    chanpost-queue add \"Release party\" --media https://example.org/p.jpg --channel @news

    # Inspect the queue
    chanpost-queue list --channel @news

    # Drop a pending candidate
    chanpost-queue remove 3b4f... --channel @news

    # Review what was delivered
    chanpost-queue history --limit 20 --json

CONFIGURATION:
    Configuration file: ~/.config/chanpost/config.toml
    (override with CHANPOST_CONFIG)

EXIT CODES:
    0 - Success
    1 - Runtime error
    3 - Invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enqueue content for delivery
    Add {
        /// Post text
        text: String,

        /// Media reference (photo URL or Telegram file id)
        #[arg(long, value_name = "REF")]
        media: Option<String>,

        /// Target channel id; repeatable. Defaults to all configured channels
        #[arg(long = "channel", value_name = "ID")]
        channels: Vec<String>,
    },

    /// List pending candidates
    List {
        /// Restrict to one channel
        #[arg(long, value_name = "ID")]
        channel: Option<String>,
    },

    /// Remove a pending candidate by fingerprint
    Remove {
        /// Content fingerprint (as printed by `add` and `list`)
        fingerprint: String,

        /// Restrict to one channel. Defaults to all configured channels
        #[arg(long, value_name = "ID")]
        channel: Option<String>,
    },

    /// Show delivery history
    History {
        /// Restrict to one channel
        #[arg(long, value_name = "ID")]
        channel: Option<String>,

        /// Maximum records to show
        #[arg(long, value_name = "N", default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    libchanpost::logging::init_default();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Command::Add {
            text,
            media,
            channels,
        } => add(&db, &config, text, media, channels, cli.json).await,
        Command::List { channel } => list(&db, channel.as_deref(), cli.json).await,
        Command::Remove {
            fingerprint,
            channel,
        } => remove(&db, &config, &fingerprint, channel.as_deref(), cli.json).await,
        Command::History { channel, limit } => {
            history(&db, channel.as_deref(), limit, cli.json).await
        }
    }
}

async fn add(
    db: &Database,
    config: &Config,
    text: String,
    media: Option<String>,
    channels: Vec<String>,
    as_json: bool,
) -> Result<()> {
    if text.trim().is_empty() {
        return Err(libchanpost::ChanpostError::InvalidInput(
            "post text cannot be empty".to_string(),
        ));
    }

    let targets: Vec<String> = if channels.is_empty() {
        config.channels.iter().map(|c| c.id.clone()).collect()
    } else {
        for id in &channels {
            if !config.channels.iter().any(|c| &c.id == id) {
                return Err(libchanpost::ChanpostError::InvalidInput(format!(
                    "unknown channel: {}",
                    id
                )));
            }
        }
        channels
    };

    let candidate = CandidatePost::new(text, media);
    for channel_id in &targets {
        db.enqueue(&candidate, channel_id).await?;
    }

    if as_json {
        println!(
            "{}",
            json!({
                "fingerprint": candidate.fingerprint,
                "channels": targets,
            })
        );
    } else {
        println!("Queued for {} channel(s)", targets.len());
        println!("Fingerprint: {}", candidate.fingerprint);
    }
    Ok(())
}

async fn list(db: &Database, channel: Option<&str>, as_json: bool) -> Result<()> {
    let entries = db.list_queue(channel).await?;

    if as_json {
        let items: Vec<_> = entries
            .iter()
            .map(|(channel_id, candidate)| {
                json!({
                    "channel": channel_id,
                    "fingerprint": candidate.fingerprint,
                    "text": candidate.text,
                    "media_ref": candidate.media_ref,
                    "created_at": candidate.created_at,
                })
            })
            .collect();
        println!("{}", json!(items));
        return Ok(());
    }

    if entries.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    for (channel_id, candidate) in entries {
        println!(
            "{}  {}  {}  {}",
            &candidate.fingerprint[..12.min(candidate.fingerprint.len())],
            channel_id,
            format_timestamp(candidate.created_at),
            truncate(&candidate.text, 60),
        );
    }
    Ok(())
}

async fn remove(
    db: &Database,
    config: &Config,
    fingerprint: &str,
    channel: Option<&str>,
    as_json: bool,
) -> Result<()> {
    let targets: Vec<String> = match channel {
        Some(id) => vec![id.to_string()],
        None => config.channels.iter().map(|c| c.id.clone()).collect(),
    };

    for channel_id in &targets {
        db.remove_candidate(fingerprint, channel_id).await?;
    }

    if as_json {
        println!(
            "{}",
            json!({ "fingerprint": fingerprint, "channels": targets })
        );
    } else {
        println!("Removed {} from {} channel(s)", fingerprint, targets.len());
    }
    Ok(())
}

async fn history(db: &Database, channel: Option<&str>, limit: usize, as_json: bool) -> Result<()> {
    let records = db.recent_records(channel, limit).await?;

    if as_json {
        let items: Vec<_> = records
            .iter()
            .map(|r| {
                json!({
                    "fingerprint": r.fingerprint,
                    "channel": r.channel_id,
                    "sent_at": r.sent_at,
                    "status": r.status.as_str(),
                    "message_id": r.message_id,
                    "error": r.error,
                })
            })
            .collect();
        println!("{}", json!(items));
        return Ok(());
    }

    if records.is_empty() {
        println!("No delivery records");
        return Ok(());
    }

    for record in records {
        let detail = match record.status {
            libchanpost::DeliveryStatus::Sent => {
                format!("message {}", record.message_id.unwrap_or_default())
            }
            libchanpost::DeliveryStatus::Failed => record.error.unwrap_or_default(),
        };
        println!(
            "{}  {}  {}  {}  {}",
            &record.fingerprint[..12.min(record.fingerprint.len())],
            record.channel_id,
            format_timestamp(record.sent_at),
            record.status,
            detail,
        );
    }
    Ok(())
}

fn format_timestamp(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => timestamp.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    }
}
