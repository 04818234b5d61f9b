use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use grade_watch::commands::Controller;
use grade_watch::config::{self, ConfigStatus};
use grade_watch::logging;
use grade_watch::monitor::GradeMonitor;
use grade_watch::notify::Dispatcher;
use grade_watch::portal::{SeleniumLauncher, SessionManager};
use grade_watch::scheduler::Scheduler;
use grade_watch::storage::{CredentialStore, RecipientStore, SnapshotStore};
use grade_watch::telegram::TelegramBot;

#[tokio::main]
async fn main() -> Result<()> {
    let root = std::env::var("ROOT").unwrap_or_else(|_| ".".to_string());
    logging::init(&root)?;
    info!("--- Starting bot...");

    let config = match config::load_config(&root)? {
        ConfigStatus::Ready(config) => config,
        ConfigStatus::NeedsEditing(path) => {
            error!("Fill in {:?} and start again", path);
            std::process::exit(1);
        }
    };

    let bot = Arc::new(TelegramBot::new(&config.bot_token)?);
    let recipients = Arc::new(RecipientStore::open(&root)?);
    let session = SessionManager::new(
        config.account(),
        config.login_url.clone(),
        CredentialStore::new(&root),
    )?;
    let launcher = Arc::new(SeleniumLauncher {
        webdriver_url: config.webdriver_url.clone(),
        headless: config.headless,
        cookie_url: config.portal_url.clone(),
    });

    let monitor = Arc::new(GradeMonitor::new(
        launcher,
        session,
        SnapshotStore::open(&root)?,
        recipients.clone(),
        Dispatcher::new(bot.clone()),
        config.portal_url.clone(),
    ));

    if let Err(e) = monitor.ensure_snapshot().await {
        error!("--- The portal is down, run again later: {}", e);
        std::process::exit(1);
    }

    let period = config.check_period();
    let scheduler = Arc::new(Scheduler::new(period));
    scheduler.start(monitor.clone(), period);
    info!(minutes = config.check_period_minutes, "--- Bot started ---");

    let controller = Controller::new(
        monitor,
        scheduler,
        recipients,
        config,
        config::config_path(&root),
    );

    tokio::select! {
        _ = bot.run_commands(&controller) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("--- Shutting down");
        }
    }

    Ok(())
}
