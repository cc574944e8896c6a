use std::sync::Arc;

use clap::Parser;
use mailbell_core::MailbellConfig;
use mailbell_scheduler::{ChannelCallbacks, MailStore, SchedulerEngine, SchedulerEvent};
use tracing::{info, warn};

mod smtp;

/// Background scheduler for snoozed emails, scheduled sends and reminders.
#[derive(Parser, Debug)]
#[command(name = "mailbell", version, about)]
struct Args {
    /// Config file (default: $MAILBELL_CONFIG, then ~/.mailbell/mailbell.toml).
    #[arg(long)]
    config: Option<String>,

    /// Run a single tick and exit instead of polling.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailbell_daemon=info,mailbell_scheduler=info".into()),
        )
        .init();

    let args = Args::parse();

    // config: --config > MAILBELL_CONFIG env > ~/.mailbell/mailbell.toml
    let config_path = args.config.or_else(|| std::env::var("MAILBELL_CONFIG").ok());
    let config = MailbellConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        MailbellConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = MailStore::new(db)?;

    let mailer = Arc::new(smtp::SmtpMailer::new(&config.accounts)?);
    info!(accounts = config.accounts.len(), "smtp accounts loaded");

    let engine = SchedulerEngine::new(store, mailer, config.scheduler.clone());

    // Host notifications: engine callbacks -> event logger task
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<SchedulerEvent>(256);
    engine.set_callbacks(Arc::new(ChannelCallbacks::new(event_tx)));
    let events = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(target: "mailbell_daemon::events", "{json}"),
                Err(e) => warn!("could not serialize scheduler event: {e}"),
            }
        }
    });

    if args.once {
        let report = engine.tick().await;
        info!(report = %serde_json::to_string(&report)?, "single tick complete");
    } else {
        engine.start();
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        engine.stop();
    }

    // Dropping the engine releases the last callback sender, which ends the
    // logger once it has drained.
    drop(engine);
    let _ = events.await;
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
