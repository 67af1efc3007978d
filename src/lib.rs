pub mod clock;
pub mod db;
pub mod desk;
pub mod error;
pub mod events;
pub mod models;
pub mod persistence;
pub mod settings;
pub mod timer;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::Database;
pub use desk::{CompletionOutcome, DeskSnapshot, FrontDesk};
pub use error::{DeskError, DeskResult};
pub use events::DeskEvent;
pub use persistence::Persistence;
pub use settings::{DeskSettings, SettingsStore};

/// Headless front desk: resumes today's sessions from the database, logs
/// every desk event, and runs until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let data_dir = settings::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let settings_store = SettingsStore::new(&data_dir)?;
    let settings = settings_store.settings();

    // Initialize logging (reads RUST_LOG env var)
    let level = if settings.debug_logging {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    info!("Spa desk starting up...");

    let database = Database::new(data_dir.join(&settings.database_file))?;
    let desk = FrontDesk::new(
        Arc::new(database.clone()),
        Arc::new(SystemClock),
        settings.timer_config(),
    );

    // Resume sessions that were running when the process last stopped.
    let today = Utc::now().date_naive();
    let snapshot = database
        .load_business_day(today)
        .await
        .with_context(|| format!("failed to load business day {today}"))?;
    desk.recover(snapshot).await;

    let mut events = desk.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!("event: {json}"),
                    Err(err) => warn!("Failed to serialize desk event: {err}"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event logger fell behind; skipped {skipped} event(s)")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {err}");
    }

    info!("Shutting down");
    desk.shutdown().await;
    logger.abort();
    Ok(())
}
