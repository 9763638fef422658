//! Bot instance - one bot's controllers, trading loop and lifecycle

use chrono::{DateTime, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AggressivenessLevels, ProfitTargets, RiskProfileConfig, Settings};
use crate::error::{BotError, ConfigError, SupervisorError};
use crate::gateway::ExecutionGateway;
use crate::profit::{PerformanceReport, ProfitController, TargetStatus};
use crate::risk::{lock_risk, RiskController, SharedRisk};
use crate::signals::SignalSource;
use crate::types::{BotConfig, BotStatus, BotUpdate, OrderRequest, TradeResult, TradeSignal};

/// Events a bot emits upward, in the order they happened
#[derive(Debug, Clone)]
pub enum BotEvent {
    Trade { bot_id: Uuid, trade: TradeResult },
    Performance { bot_id: Uuid, report: PerformanceReport },
    Error { bot_id: Uuid, error: BotError },
}

impl BotEvent {
    pub fn bot_id(&self) -> Uuid {
        match self {
            BotEvent::Trade { bot_id, .. }
            | BotEvent::Performance { bot_id, .. }
            | BotEvent::Error { bot_id, .. } => *bot_id,
        }
    }
}

/// Immutable per-bot snapshot read by aggregation and broadcast
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_gain: Decimal,
    pub daily_gain: Decimal,
    pub hourly_gain: Decimal,
    pub trade_count: u64,
    pub successful_trades: u64,
    pub deficit: Decimal,
    pub aggressiveness: Decimal,
    pub status: BotStatus,
}

/// Per-bot settings taken from the supervisor configuration
#[derive(Debug, Clone)]
pub struct InstanceOptions {
    pub targets: ProfitTargets,
    pub levels: AggressivenessLevels,
    pub risk: RiskProfileConfig,
    pub trading_interval: Duration,
    pub check_interval: Duration,
    pub auto_adjust: bool,
}

impl InstanceOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            targets: settings.profitability_targets,
            levels: settings.auto_adjustment.aggressiveness_levels,
            risk: settings.risk_profile.clone(),
            trading_interval: settings.trading.interval(),
            check_interval: settings.auto_adjustment.check_interval(),
            auto_adjust: settings.auto_adjustment.enabled,
        }
    }
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// State guarded by the per-instance lock
struct TradingState {
    profit: ProfitController,
    risk: SharedRisk,
    total_gain: Decimal,
    trade_count: u64,
    successful_trades: u64,
    day: Option<NaiveDate>,
    day_open_balance: Decimal,
    halted_on: Option<NaiveDate>,
}

impl TradingState {
    fn roll_day(&mut self, today: NaiveDate, balance: Decimal) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.day_open_balance = balance;
            self.halted_on = None;
        }
    }

    fn record(&mut self, trade: &TradeResult) {
        self.total_gain += trade.profit_loss;
        self.trade_count += 1;
        if trade.profit_loss > Decimal::ZERO {
            self.successful_trades += 1;
        }
    }

    fn summary(&self, status: BotStatus) -> PerformanceSummary {
        let profit = self.profit.state();
        PerformanceSummary {
            total_gain: self.total_gain,
            daily_gain: profit.current_daily_gain,
            hourly_gain: profit.current_hourly_gain,
            trade_count: self.trade_count,
            successful_trades: self.successful_trades,
            deficit: profit.deficit,
            aggressiveness: lock_risk(&self.risk).current_aggressiveness(),
            status,
        }
    }
}

struct Inner {
    id: Uuid,
    config: RwLock<BotConfig>,
    options: InstanceOptions,
    state: Mutex<TradingState>,
    /// Held for the duration of each order submission
    order_guard: Mutex<()>,
    gateway: RwLock<Arc<dyn ExecutionGateway>>,
    signals: Arc<dyn SignalSource>,
    events: mpsc::Sender<BotEvent>,
    summary: watch::Sender<PerformanceSummary>,
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

pub struct BotInstance {
    inner: Arc<Inner>,
    lifecycle: Mutex<Lifecycle>,
}

impl BotInstance {
    /// Fresh controllers for `config`. A persisted `active` status comes up
    /// inactive until `start()`; a persisted `error` stays in error.
    pub fn new(
        mut config: BotConfig,
        options: InstanceOptions,
        gateway: Arc<dyn ExecutionGateway>,
        signals: Arc<dyn SignalSource>,
        events: mpsc::Sender<BotEvent>,
    ) -> Result<Self, ConfigError> {
        let risk = RiskController::new(&options.risk, options.levels).shared();
        let profit = ProfitController::new(options.targets, risk.clone())?;

        if config.status == BotStatus::Active {
            config.status = BotStatus::Inactive;
        }

        let state = TradingState {
            profit,
            risk,
            total_gain: Decimal::ZERO,
            trade_count: 0,
            successful_trades: 0,
            day: None,
            day_open_balance: Decimal::ZERO,
            halted_on: None,
        };
        let (summary, _) = watch::channel(state.summary(config.status));

        Ok(Self {
            inner: Arc::new(Inner {
                id: config.id,
                config: RwLock::new(config),
                options,
                state: Mutex::new(state),
                order_guard: Mutex::new(()),
                gateway: RwLock::new(gateway),
                signals,
                events,
                summary,
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> BotConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> BotStatus {
        self.inner.summary.borrow().status
    }

    pub fn summary(&self) -> PerformanceSummary {
        self.inner.summary.borrow().clone()
    }

    pub async fn performance_report(&self) -> PerformanceReport {
        self.inner.state.lock().await.profit.get_performance_report()
    }

    pub async fn is_running(&self) -> bool {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle
            .task
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Validate and apply a partial config change. Status is not touched here.
    pub fn update_config(&self, update: &BotUpdate) -> Result<BotConfig, SupervisorError> {
        let update = BotUpdate {
            status: None,
            ..update.clone()
        };
        let mut config = self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update.apply_to(&mut config)?;
        Ok(config.clone())
    }

    /// Swap the execution gateway; takes effect from the next order
    pub fn replace_gateway(&self, gateway: Arc<dyn ExecutionGateway>) {
        *self
            .inner
            .gateway
            .write()
            .unwrap_or_else(PoisonError::into_inner) = gateway;
    }

    /// Spawn the trading loop. No-op while already active.
    pub async fn start(&self) -> BotStatus {
        let mut lifecycle = self.lifecycle.lock().await;
        let running = lifecycle
            .task
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false);
        if running && self.status() == BotStatus::Active {
            debug!(bot_id = %self.id(), "Start ignored, already active");
            return BotStatus::Active;
        }

        if let Some(task) = lifecycle.task.take() {
            if let Err(e) = task.await {
                error!(bot_id = %self.id(), "Previous trading loop ended abnormally: {}", e);
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.inner.set_status(BotStatus::Active);
        let inner = self.inner.clone();
        lifecycle.task = Some(tokio::spawn(inner.run(shutdown_rx)));
        lifecycle.shutdown = Some(shutdown_tx);

        info!(bot_id = %self.id(), mode = %self.config().mode, "Bot started");
        BotStatus::Active
    }

    /// Stop the trading loop, waiting for any in-flight order to resolve.
    /// Idempotent; a bot in error stays in error.
    pub async fn stop(&self) -> BotStatus {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = lifecycle.task.take() {
            if let Err(e) = task.await {
                error!(bot_id = %self.id(), "Trading loop ended abnormally: {}", e);
            }
        }

        if self.status() == BotStatus::Active {
            self.inner.set_status(BotStatus::Inactive);
            info!(bot_id = %self.id(), "Bot stopped");
        }
        self.status()
    }

    /// Stop and force `inactive`, including from error
    pub async fn deactivate(&self) -> BotStatus {
        self.stop().await;
        self.inner.set_status(BotStatus::Inactive);
        BotStatus::Inactive
    }

    /// Feed a trade outcome reported outside the trading loop
    pub async fn on_trade_result(&self, trade: TradeResult) {
        self.inner.process_trade(trade).await;
    }

    /// One control tick: rollover check then deficit compensation
    pub async fn control_tick(&self) {
        self.inner.control_tick_at(Local::now()).await;
    }

    pub async fn control_tick_at(&self, now: DateTime<Local>) {
        self.inner.control_tick_at(now).await;
    }
}

impl Inner {
    fn set_status(&self, status: BotStatus) {
        {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            config.status = status;
        }
        self.summary.send_modify(|s| s.status = status);
    }

    fn gateway(&self) -> Arc<dyn ExecutionGateway> {
        self.gateway
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn status(&self) -> BotStatus {
        self.summary.borrow().status
    }

    async fn emit(&self, event: BotEvent) {
        if self.events.send(event).await.is_err() {
            debug!(bot_id = %self.id, "Event receiver gone, dropping event");
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut trading_tick = interval(self.options.trading_interval);
        trading_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut check_tick = interval(self.options.check_interval);
        check_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(bot_id = %self.id, "Trading loop running");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = check_tick.tick(), if self.options.auto_adjust => {
                    self.control_tick_at(Local::now()).await;
                }
                _ = trading_tick.tick() => {
                    if let Err(e) = self.trading_cycle(&shutdown).await {
                        self.fail(e).await;
                        break;
                    }
                }
            }
        }

        debug!(bot_id = %self.id, "Trading loop exited");
    }

    /// Critical fault: halt in `error` and report upward
    async fn fail(&self, err: BotError) {
        error!(bot_id = %self.id, error = %err, "Critical bot error, halting");
        self.set_status(BotStatus::Error);
        self.emit(BotEvent::Error {
            bot_id: self.id,
            error: err,
        })
        .await;
    }

    /// Poll each pair once. Returns only critical errors.
    async fn trading_cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<(), BotError> {
        let pairs: Vec<String> = {
            let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
            config.pairs.iter().cloned().collect()
        };

        for pair in pairs {
            if *shutdown.borrow() || self.status() != BotStatus::Active {
                break;
            }

            let Some(signal) = self.signals.next_signal(&pair).await else {
                continue;
            };

            match self.execute_signal(signal).await {
                Ok(()) => {}
                Err(e) if e.is_critical() => return Err(e),
                Err(e) => {
                    warn!(bot_id = %self.id, pair = %pair, error = %e, "Recoverable bot error");
                    self.emit(BotEvent::Error {
                        bot_id: self.id,
                        error: e,
                    })
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn execute_signal(&self, signal: TradeSignal) -> Result<(), BotError> {
        let gateway = self.gateway();
        let account = gateway.get_account_info().await?;
        let today = Local::now().date_naive();

        let order = {
            let mut state = self.state.lock().await;
            state.roll_day(today, account.balance);

            if state.halted_on == Some(today) {
                debug!(bot_id = %self.id, pair = %signal.pair, "Halted for the day, skipping signal");
                return Ok(());
            }

            let risk = lock_risk(&state.risk);
            let daily_loss = (state.day_open_balance - account.balance).max(Decimal::ZERO);
            if risk.enforce_daily_loss_cap(daily_loss, state.day_open_balance) {
                drop(risk);
                state.halted_on = Some(today);
                warn!(
                    bot_id = %self.id,
                    daily_loss = %daily_loss,
                    day_open_balance = %state.day_open_balance,
                    "Daily loss cap reached, halting until tomorrow"
                );
                return Err(BotError::Recoverable(format!(
                    "daily loss cap reached: lost {} of {}",
                    daily_loss, state.day_open_balance
                )));
            }

            let quantity = match risk.calculate_position_size(
                account.balance,
                signal.entry_price,
                signal.stop_loss_price,
            ) {
                Ok(q) => q,
                Err(e) => {
                    warn!(bot_id = %self.id, pair = %signal.pair, "Skipping trade: {}", e);
                    return Ok(());
                }
            };

            OrderRequest {
                bot_id: self.id,
                pair: signal.pair.clone(),
                side: signal.side,
                quantity,
                entry_price: signal.entry_price,
                stop_loss_price: signal.stop_loss_price,
                take_profit_prices: risk.take_profit_prices(signal.entry_price, signal.side),
            }
        };

        let trade = {
            let _in_flight = self.order_guard.lock().await;
            debug!(
                bot_id = %self.id,
                pair = %order.pair,
                side = ?order.side,
                quantity = %order.quantity,
                "Submitting order"
            );
            gateway.place_order(&order).await?
        };

        self.process_trade(trade).await;
        Ok(())
    }

    async fn process_trade(&self, trade: TradeResult) {
        let report = {
            let mut state = self.state.lock().await;
            state.profit.update_performance(&trade);
            state.record(&trade);

            let report = state.profit.get_performance_report();
            if report.status == TargetStatus::BelowTarget {
                lock_risk(&state.risk).dynamic_adjustment(&report);
            }

            self.summary.send_replace(state.summary(self.status()));
            report
        };

        debug!(
            bot_id = %self.id,
            pair = %trade.pair,
            profit_loss = %trade.profit_loss,
            status = ?report.status,
            "Trade processed"
        );

        self.emit(BotEvent::Trade {
            bot_id: self.id,
            trade,
        })
        .await;
        self.emit(BotEvent::Performance {
            bot_id: self.id,
            report,
        })
        .await;
    }

    async fn control_tick_at(&self, now: DateTime<Local>) {
        let mut state = self.state.lock().await;
        state.profit.check_performance_at(now);
        if self.options.auto_adjust {
            state.profit.compensate_deficit();
        }
        self.summary.send_replace(state.summary(self.status()));
    }
}
