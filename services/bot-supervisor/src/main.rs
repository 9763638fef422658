//! Bot Supervisor - runs and steers a fleet of trading bots
//!
//! 1. Loads settings (file + environment)
//! 2. Opens the bot store and resumes persisted bots
//! 3. Streams state snapshots to observers
//! 4. Stops every bot cleanly on Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use bot_supervisor::notifier::Alert;
use bot_supervisor::{
    Collaborators, FanoutNotifier, JsonFileStore, LogNotifier, Notifier, PaperGatewayProvider,
    PaperSignalSource, Settings, Supervisor, WebhookNotifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("BOT_SUPERVISOR_CONFIG").ok().map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;

    let level = settings
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting Bot Supervisor...");

    let store_path = settings.store.resolved_path();
    let store = Arc::new(JsonFileStore::open(&store_path).await?);
    info!("Bot store: {}", store_path.display());

    let mut notifier = FanoutNotifier::new().with(Arc::new(LogNotifier));
    if let Some(url) = &settings.alerts.webhook_url {
        match WebhookNotifier::new(url.clone(), settings.alerts.webhook_timeout_secs) {
            Ok(webhook) => notifier = notifier.with(Arc::new(webhook)),
            Err(e) => warn!("Webhook notifier disabled: {}", e),
        }
    }
    let notifier: Arc<dyn Notifier> = Arc::new(notifier);

    let deps = Collaborators {
        store,
        notifier: notifier.clone(),
        gateways: Arc::new(PaperGatewayProvider::default()),
        signals: Arc::new(PaperSignalSource::default()),
    };
    let supervisor = Supervisor::launch(&settings, deps).await;

    let resumed = supervisor.resume_active().await?;
    info!("{} bots loaded", resumed);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    supervisor.shutdown().await;
    notifier
        .report(&Alert::system(
            "Bot Supervisor Stopped",
            "All bots stopped and persisted",
        ))
        .await;
    Ok(())
}
