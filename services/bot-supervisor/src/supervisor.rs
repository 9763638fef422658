//! Supervisor - owns the bot registry, routes lifecycle calls and handles bot events

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::{BotSnapshot, Broadcaster, ObserverMessage, Snapshot, SnapshotSource};
use crate::config::{AlertConfig, Settings};
use crate::error::{BotError, SupervisorError};
use crate::gateway::GatewayProvider;
use crate::instance::{BotEvent, BotInstance, InstanceOptions, PerformanceSummary};
use crate::notifier::{Alert, Notifier};
use crate::profit::PerformanceReport;
use crate::registry::BotRegistry;
use crate::signals::SignalSource;
use crate::store::Store;
use crate::types::{BotConfig, BotStatus, BotUpdate, NewBot, TradeResult};

/// Capacity of the shared bot event channel
const EVENT_BUFFER: usize = 1024;

/// Sums across bots
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatePerformance {
    pub total_gain: Decimal,
    pub daily_gain: Decimal,
    pub hourly_gain: Decimal,
    pub trade_count: u64,
    pub successful_trades: u64,
    /// successful_trades / trade_count, 0 without trades
    pub success_rate: Decimal,
}

impl AggregatePerformance {
    pub fn from_summaries<'a>(summaries: impl IntoIterator<Item = &'a PerformanceSummary>) -> Self {
        let mut agg = Self::default();
        for s in summaries {
            agg.total_gain += s.total_gain;
            agg.daily_gain += s.daily_gain;
            agg.hourly_gain += s.hourly_gain;
            agg.trade_count += s.trade_count;
            agg.successful_trades += s.successful_trades;
        }
        if agg.trade_count > 0 {
            agg.success_rate =
                Decimal::from(agg.successful_trades) / Decimal::from(agg.trade_count);
        }
        agg
    }
}

/// Response of the performance endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceOverview {
    pub bots: BTreeMap<Uuid, PerformanceReport>,
    pub aggregated: AggregatePerformance,
}

/// External collaborators the supervisor is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    pub gateways: Arc<dyn GatewayProvider>,
    pub signals: Arc<dyn SignalSource>,
}

/// State read by both request handlers and the broadcast tick
#[derive(Default)]
struct Shared {
    registry: RwLock<BotRegistry>,
    /// Latest performance report per bot
    reports: RwLock<HashMap<Uuid, PerformanceReport>>,
}

impl Shared {
    async fn lookup(&self, id: Uuid) -> Result<Arc<BotInstance>, SupervisorError> {
        self.registry
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SupervisorError::NotFound(id))
    }

    async fn instances(&self) -> Vec<Arc<BotInstance>> {
        self.registry.read().await.snapshot()
    }
}

#[async_trait]
impl SnapshotSource for Shared {
    async fn snapshot(&self) -> Snapshot {
        let (configs, bots): (Vec<BotConfig>, Vec<BotSnapshot>) = {
            let registry = self.registry.read().await;
            registry
                .values()
                .map(|bot| {
                    let summary = bot.summary();
                    (
                        bot.config(),
                        BotSnapshot {
                            id: bot.id(),
                            status: summary.status,
                            performance: summary,
                        },
                    )
                })
                .unzip()
        };

        let performance = self
            .reports
            .read()
            .await
            .iter()
            .map(|(id, r)| (*id, r.clone()))
            .collect();
        let aggregated = AggregatePerformance::from_summaries(bots.iter().map(|b| &b.performance));

        Snapshot {
            configs,
            bots,
            performance,
            aggregated,
        }
    }
}

/// Event handling half, shared with the event pump task
struct Core {
    shared: Arc<Shared>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    broadcaster: Arc<Broadcaster>,
    alerts: AlertConfig,
}

impl Core {
    async fn pump(
        self: Arc<Self>,
        mut events: mpsc::Receiver<BotEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }

        while let Ok(event) = events.try_recv() {
            self.handle(event).await;
        }
        debug!("Event pump stopped");
    }

    async fn handle(&self, event: BotEvent) {
        debug!(bot_id = %event.bot_id(), "Bot event");
        match event {
            BotEvent::Trade { bot_id, trade } => self.on_trade(bot_id, trade).await,
            BotEvent::Performance { bot_id, report } => self.on_performance(bot_id, report).await,
            BotEvent::Error { bot_id, error } => self.on_error(bot_id, error).await,
        }
    }

    async fn on_trade(&self, bot_id: Uuid, trade: TradeResult) {
        info!(
            bot_id = %bot_id,
            pair = %trade.pair,
            profit_loss = %trade.profit_loss,
            balance = %trade.balance,
            "Trade"
        );

        if trade.profit_loss.abs() > self.alerts.notification_threshold {
            self.notifier.report(&Alert::trade(bot_id, &trade)).await;
        }
        self.broadcaster.wake();
    }

    async fn on_performance(&self, bot_id: Uuid, report: PerformanceReport) {
        if report.current_hourly_gain < self.alerts.performance_alert_threshold {
            self.notifier
                .report(&Alert::performance(bot_id, &report))
                .await;
        }
        self.shared.reports.write().await.insert(bot_id, report);
        self.broadcaster.wake();
    }

    async fn on_error(&self, bot_id: Uuid, err: BotError) {
        self.notifier.report(&Alert::bot_error(bot_id, &err)).await;

        if !err.is_critical() {
            return;
        }

        let Ok(bot) = self.shared.lookup(bot_id).await else {
            debug!(bot_id = %bot_id, "Critical error for removed bot");
            return;
        };
        // Restarted or stopped since the fault was raised
        if bot.status() != BotStatus::Error {
            debug!(bot_id = %bot_id, status = %bot.status(), "Stale critical error ignored");
            return;
        }
        let status = bot.stop().await;
        if let Err(e) = self
            .store
            .update_bot(bot_id, &BotUpdate::status(BotStatus::Error))
            .await
        {
            error!(bot_id = %bot_id, "Failed to persist error status: {}", e);
        }
        warn!(
            bot_id = %bot_id,
            status = %status,
            severity = err.severity().as_str(),
            "Bot halted after critical error"
        );
        self.broadcaster.wake();
    }
}

pub struct Supervisor {
    core: Arc<Core>,
    gateways: Arc<dyn GatewayProvider>,
    signals: Arc<dyn SignalSource>,
    options: InstanceOptions,
    events: mpsc::Sender<BotEvent>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Spawn the event pump and broadcaster, then report a system alert
    pub async fn launch(settings: &Settings, deps: Collaborators) -> Self {
        let shared = Arc::new(Shared::default());
        let broadcaster = Arc::new(Broadcaster::new(shared.clone(), &settings.broadcast));
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let core = Arc::new(Core {
            shared,
            store: deps.store,
            notifier: deps.notifier,
            broadcaster: broadcaster.clone(),
            alerts: settings.alerts.clone(),
        });

        let pump = tokio::spawn(core.clone().pump(events_rx, shutdown_rx.clone()));
        let ticker = broadcaster.spawn(shutdown_rx);

        core.notifier
            .report(&Alert::system(
                "Bot Supervisor Started",
                "Supervisor initialised and ready",
            ))
            .await;
        info!("Bot supervisor started");

        Self {
            core,
            gateways: deps.gateways,
            signals: deps.signals,
            options: InstanceOptions::from_settings(settings),
            events: events_tx,
            shutdown: shutdown_tx,
            tasks: Mutex::new(vec![pump, ticker]),
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.core.broadcaster
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<ObserverMessage> {
        self.core.broadcaster.subscribe().await
    }

    /// Build the instance, register it and start it if it was persisted active
    async fn instantiate(&self, config: BotConfig) -> Result<Arc<BotInstance>, SupervisorError> {
        let id = config.id;
        let resume = config.status == BotStatus::Active;
        let gateway = self.gateways.gateway_for(&config);
        let mode = config.mode;

        let bot = BotInstance::new(
            config,
            self.options.clone(),
            gateway,
            self.signals.clone(),
            self.events.clone(),
        )
        .map(Arc::new)
        .map_err(|e| SupervisorError::Internal(e.to_string()))?;

        let slot = self
            .core
            .shared
            .registry
            .write()
            .await
            .insert(id, bot.clone())
            .map_err(|_| SupervisorError::Internal(format!("Duplicate bot id {}", id)))?;

        if resume {
            bot.start().await;
        }
        info!(bot_id = %id, mode = %mode, slot, "Bot instance created");
        Ok(bot)
    }

    /// Validate, persist and instantiate a new bot (inactive)
    pub async fn create(&self, request: NewBot) -> Result<Uuid, SupervisorError> {
        let config = request.into_config()?;
        let id = config.id;

        self.core.store.save_bot(&config).await?;
        self.instantiate(config).await?;
        Ok(id)
    }

    /// Recreate every persisted bot, starting those that were active
    pub async fn resume_active(&self) -> Result<usize, SupervisorError> {
        let persisted = self.core.store.get_active_bots().await?;
        let mut loaded = 0;

        for config in persisted {
            if self.core.shared.registry.read().await.contains(&config.id) {
                continue;
            }
            let id = config.id;
            match self.instantiate(config).await {
                Ok(_) => loaded += 1,
                Err(e) => error!(bot_id = %id, "Failed to resume bot: {}", e),
            }
        }

        info!(bots = loaded, "Persisted bots loaded");
        Ok(loaded)
    }

    pub async fn list(&self) -> Vec<BotConfig> {
        self.core
            .shared
            .instances()
            .await
            .iter()
            .map(|b| b.config())
            .collect()
    }

    pub async fn get(&self, id: Uuid) -> Result<BotConfig, SupervisorError> {
        Ok(self.core.shared.lookup(id).await?.config())
    }

    pub async fn status(&self, id: Uuid) -> Result<BotStatus, SupervisorError> {
        Ok(self.core.shared.lookup(id).await?.status())
    }

    /// Apply mode/pairs changes; status goes through start/stop only
    pub async fn update(&self, id: Uuid, update: BotUpdate) -> Result<BotConfig, SupervisorError> {
        let bot = self.core.shared.lookup(id).await?;
        let before = bot.config();
        let config = bot.update_config(&update)?;

        if config.mode != before.mode {
            bot.replace_gateway(self.gateways.gateway_for(&config));
        }

        let persisted = BotUpdate {
            mode: update.mode,
            pairs: update.pairs,
            status: None,
            updated_at: Some(config.updated_at),
        };
        self.core.store.update_bot(id, &persisted).await?;
        info!(bot_id = %id, "Bot updated");
        Ok(config)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), SupervisorError> {
        let bot = self
            .core
            .shared
            .registry
            .write()
            .await
            .remove(&id)
            .ok_or(SupervisorError::NotFound(id))?;

        bot.deactivate().await;
        self.core.shared.reports.write().await.remove(&id);
        self.core.store.delete_bot(id).await?;
        info!(bot_id = %id, "Bot deleted");
        Ok(())
    }

    /// `active` is persisted before the trading loop spawns
    pub async fn start(&self, id: Uuid) -> Result<BotStatus, SupervisorError> {
        let bot = self.core.shared.lookup(id).await?;
        self.core
            .store
            .update_bot(id, &BotUpdate::status(BotStatus::Active))
            .await?;
        Ok(bot.start().await)
    }

    /// Always ends `inactive`, including for a bot halted in `error`
    pub async fn stop(&self, id: Uuid) -> Result<BotStatus, SupervisorError> {
        let bot = self.core.shared.lookup(id).await?;
        let mut status = bot.stop().await;
        if status == BotStatus::Error {
            status = bot.deactivate().await;
            info!(bot_id = %id, "Error state cleared by stop");
        }
        self.core
            .store
            .update_bot(id, &BotUpdate::status(status))
            .await?;
        Ok(status)
    }

    pub async fn restart(&self, id: Uuid) -> Result<BotStatus, SupervisorError> {
        self.stop(id).await?;
        self.start(id).await
    }

    pub async fn aggregate_performance(&self) -> AggregatePerformance {
        let summaries: Vec<PerformanceSummary> = self
            .core
            .shared
            .instances()
            .await
            .iter()
            .map(|b| b.summary())
            .collect();
        AggregatePerformance::from_summaries(&summaries)
    }

    pub async fn performance(&self) -> PerformanceOverview {
        let mut bots = BTreeMap::new();
        for bot in self.core.shared.instances().await {
            bots.insert(bot.id(), bot.performance_report().await);
        }
        PerformanceOverview {
            bots,
            aggregated: self.aggregate_performance().await,
        }
    }

    pub async fn bot_performance(&self, id: Uuid) -> Result<PerformanceReport, SupervisorError> {
        let bot = self.core.shared.lookup(id).await?;
        Ok(bot.performance_report().await)
    }

    pub async fn bot_summary(&self, id: Uuid) -> Result<PerformanceSummary, SupervisorError> {
        Ok(self.core.shared.lookup(id).await?.summary())
    }

    /// Feed an externally reported trade outcome to a bot
    pub async fn report_trade(&self, id: Uuid, trade: TradeResult) -> Result<(), SupervisorError> {
        let bot = self.core.shared.lookup(id).await?;
        bot.on_trade_result(trade).await;
        Ok(())
    }

    /// Stop every running bot, persist `inactive`, then stop background tasks
    pub async fn shutdown(&self) {
        info!("Bot supervisor shutting down");

        for bot in self.core.shared.instances().await {
            if bot.status() != BotStatus::Active {
                continue;
            }
            let id = bot.id();
            bot.stop().await;
            if let Err(e) = self
                .core
                .store
                .update_bot(id, &BotUpdate::status(BotStatus::Inactive))
                .await
            {
                error!(bot_id = %id, "Failed to persist status on shutdown: {}", e);
            }
        }

        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task ended abnormally: {}", e);
            }
        }
        info!("Bot supervisor stopped");
    }
}
