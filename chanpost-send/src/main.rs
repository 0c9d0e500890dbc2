//! chanpost-send - Background daemon for scheduled channel posting
//!
//! Runs one posting loop per configured channel: fetches queued
//! candidates, filters duplicates, applies rate limits, and delivers
//! to Telegram with bounded retries.

use std::process;
use std::sync::Arc;

use clap::Parser;
use libchanpost::channel::telegram::TelegramChannel;
use libchanpost::clock::SystemClock;
use libchanpost::source::QueueSource;
use libchanpost::{ChanpostError, Config, Database, Result, Scheduler, Shutdown};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "chanpost-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled channel posting")]
#[command(long_about = "\
chanpost-send - Background daemon for scheduled channel posting

DESCRIPTION:
    chanpost-send is a long-running daemon that drives one posting loop
    per configured Telegram channel. Each loop fetches queued candidates
    at the channel's cadence, drops content that was already delivered,
    enforces per-channel and global send quotas, and posts via the
    Telegram Bot API with bounded retries for transient failures.

USAGE:
    # Run in foreground (logs to stderr)
    chanpost-send

    # Run one posting cycle per channel, then exit
    chanpost-send --once

    # Enable verbose logging
    chanpost-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current delivery)

CONFIGURATION:
    Configuration file: ~/.config/chanpost/config.toml
    (override with CHANPOST_CONFIG)

    [database]
    path = \"~/.local/share/chanpost/posts.db\"

    [telegram]
    token_file = \"~/.config/chanpost/bot.token\"

    [[channels]]
    id = \"@news\"
    cadence = \"15m\"

    [rate_limits]
    max_per_window = 20
    window = \"1h\"

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Authentication error
")]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run one cycle per channel and exit
    #[arg(long)]
    #[arg(help = "Run one posting cycle per channel, then exit")]
    once: bool,

    /// Candidates fetched per cycle
    #[arg(long, value_name = "N", default_value_t = 10)]
    #[arg(help = "Maximum candidates fetched per posting cycle")]
    batch_size: usize,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libchanpost::logging::LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    info!("chanpost-send daemon starting");

    let shutdown = Shutdown::new();
    setup_signal_handlers(shutdown.clone())?;

    let channel = Arc::new(TelegramChannel::from_config(&config.telegram)?);
    let source = Arc::new(QueueSource::new(db.clone(), cli.batch_size));

    let mut scheduler = Scheduler::new(
        &config,
        db,
        channel,
        source,
        Arc::new(SystemClock),
        shutdown,
    )?;

    if cli.once {
        scheduler.run_once().await?;
        info!("chanpost-send: ran one cycle per channel, exiting");
    } else {
        scheduler.run_forever().await;
    }

    info!("chanpost-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Shutdown) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| ChanpostError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown.trigger();
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Shutdown) -> Result<()> {
    Ok(())
}
