//! End-to-end supervisor harness
//!
//! Drives real bot instances against a scripted gateway and signal source:
//! lifecycle → signal → sizing → order → trade/performance events → alerts

mod mock_gateway;

use bot_supervisor::{
    broadcast::BroadcastMessage,
    error::GatewayError,
    notifier::{AlertKind, AlertSeverity},
    profit::TargetStatus,
    store::{JsonFileStore, MemoryStore, Store},
    supervisor::{Collaborators, Supervisor},
    types::{BotMode, BotStatus, BotUpdate, NewBot, TradeResult, TradeSignal},
    Settings,
};
use chrono::Utc;
use mock_gateway::{
    eventually, long_signal, MockGateway, MockOutcome, MockProvider, RecordingNotifier,
    ScriptedSignals,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Harness {
    supervisor: Supervisor,
    store: Arc<MemoryStore>,
    gateway: Arc<MockGateway>,
    signals: Arc<ScriptedSignals>,
    notifier: Arc<RecordingNotifier>,
}

/// Fast trading ticks; no control tick so sizing stays deterministic
fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.trading.interval_ms = 20;
    settings.auto_adjustment.enabled = false;
    settings.broadcast.interval_ms = 50;
    settings
}

async fn harness(gateway: MockGateway) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(gateway);
    let signals = Arc::new(ScriptedSignals::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let deps = Collaborators {
        store: store.clone(),
        notifier: notifier.clone(),
        gateways: Arc::new(MockProvider(gateway.clone())),
        signals: signals.clone(),
    };
    let supervisor = Supervisor::launch(&test_settings(), deps).await;

    Harness {
        supervisor,
        store,
        gateway,
        signals,
        notifier,
    }
}

async fn create_bot(h: &Harness) -> Uuid {
    h.supervisor
        .create(NewBot::new(BotMode::Simulation, &["BTCUSDT"]))
        .await
        .unwrap()
}

fn trade(profit_loss: Decimal) -> TradeResult {
    TradeResult {
        pair: "BTCUSDT".to_string(),
        profit_loss,
        balance: dec!(10000),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn test_sizing_follows_aggressiveness() {
    let h = harness(MockGateway::new(dec!(10000))).await;
    h.gateway.push(MockOutcome::Return(dec!(0.0001)));
    h.gateway.push(MockOutcome::Return(Decimal::ZERO));
    h.signals.push(long_signal());
    h.signals.push(long_signal());

    let id = create_bot(&h).await;
    h.supervisor.start(id).await.unwrap();

    let gateway = &h.gateway;
    assert!(eventually(move || async move { gateway.completed() == 2 }).await);
    h.supervisor.stop(id).await.unwrap();

    let orders = h.gateway.orders();
    // 10000 * 0.025 * 1.0 / |100 - 98|
    assert_eq!(orders[0].quantity, dec!(125));
    assert_eq!(
        orders[0].take_profit_prices,
        vec![dec!(100.6), dec!(101.2), dec!(101.8)]
    );
    // First trade left the bot far below target: extreme (1.6) on 10001
    assert_eq!(orders[1].quantity, dec!(200.02));

    let summary = h.supervisor.bot_summary(id).await.unwrap();
    assert_eq!(summary.trade_count, 2);
    assert_eq!(summary.successful_trades, 1);
    assert_eq!(summary.aggressiveness, dec!(1.6));

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_invalid_risk_input_skips_trade() {
    let h = harness(MockGateway::new(dec!(10000))).await;
    h.signals.push(TradeSignal {
        stop_loss_price: dec!(100),
        ..long_signal()
    });
    h.signals.push(long_signal());

    let id = create_bot(&h).await;
    h.supervisor.start(id).await.unwrap();

    let gateway = &h.gateway;
    assert!(eventually(move || async move { gateway.completed() == 1 }).await);
    assert_eq!(h.signals.remaining(), 0);

    let orders = h.gateway.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].stop_loss_price, dec!(98));
    assert_eq!(h.supervisor.status(id).await.unwrap(), BotStatus::Active);
    assert_eq!(h.notifier.count(AlertKind::BotError), 0);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_critical_error_halts_and_persists() {
    let h = harness(MockGateway::new(dec!(10000))).await;
    h.gateway.push(MockOutcome::Fail(GatewayError::Authentication(
        "revoked key".to_string(),
    )));
    h.signals.push(long_signal());

    let id = create_bot(&h).await;
    h.supervisor.start(id).await.unwrap();

    let store = &h.store;
    assert!(
        eventually(move || async move {
            store.get(id).await.map(|c| c.status) == Some(BotStatus::Error)
        })
        .await
    );
    assert_eq!(h.supervisor.status(id).await.unwrap(), BotStatus::Error);

    let alerts = h.notifier.alerts();
    let critical = alerts
        .iter()
        .find(|a| a.kind == AlertKind::BotError)
        .unwrap();
    assert_eq!(critical.severity, AlertSeverity::Critical);
    assert_eq!(critical.bot_id, Some(id));

    // Halted: later signals are never traded
    h.signals.push(long_signal());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.gateway.orders().len(), 1);
    assert_eq!(h.signals.remaining(), 1);

    // Stop clears the error in memory and in the store
    assert_eq!(h.supervisor.stop(id).await.unwrap(), BotStatus::Inactive);
    assert_eq!(h.supervisor.status(id).await.unwrap(), BotStatus::Inactive);
    assert_eq!(h.store.get(id).await.unwrap().status, BotStatus::Inactive);

    assert_eq!(h.supervisor.restart(id).await.unwrap(), BotStatus::Active);
    assert_eq!(h.store.get(id).await.unwrap().status, BotStatus::Active);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_recoverable_error_keeps_trading() {
    let h = harness(MockGateway::new(dec!(10000))).await;
    h.gateway.push(MockOutcome::Fail(GatewayError::Timeout(30)));
    h.gateway.push(MockOutcome::Return(dec!(0.001)));
    h.signals.push(long_signal());
    h.signals.push(long_signal());

    let id = create_bot(&h).await;
    h.supervisor.start(id).await.unwrap();

    let gateway = &h.gateway;
    assert!(eventually(move || async move { gateway.completed() == 2 }).await);
    let sup = &h.supervisor;
    assert!(
        eventually(move || async move {
            sup.bot_summary(id).await.map(|s| s.trade_count).unwrap_or(0) == 1
        })
        .await
    );

    assert_eq!(h.supervisor.status(id).await.unwrap(), BotStatus::Active);
    let notifier = &h.notifier;
    assert!(eventually(move || async move { notifier.count(AlertKind::BotError) == 1 }).await);
    let alert = h
        .notifier
        .alerts()
        .into_iter()
        .find(|a| a.kind == AlertKind::BotError)
        .unwrap();
    assert_eq!(alert.severity, AlertSeverity::Warning);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_daily_loss_cap_halts_for_the_day() {
    let h = harness(MockGateway::new(dec!(10000))).await;
    h.gateway.push(MockOutcome::Return(dec!(-0.11)));
    for _ in 0..3 {
        h.signals.push(long_signal());
    }

    let id = create_bot(&h).await;
    h.supervisor.start(id).await.unwrap();

    let notifier = &h.notifier;
    assert!(eventually(move || async move { notifier.count(AlertKind::BotError) == 1 }).await);
    let signals = &h.signals;
    assert!(eventually(move || async move { signals.remaining() == 0 }).await);

    assert_eq!(h.gateway.orders().len(), 1);
    assert_eq!(h.gateway.balance(), dec!(8900));
    assert_eq!(h.supervisor.status(id).await.unwrap(), BotStatus::Active);
    let alert = h
        .notifier
        .alerts()
        .into_iter()
        .find(|a| a.kind == AlertKind::BotError)
        .unwrap();
    assert!(alert.message.contains("daily loss cap"));

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_order() {
    let h = harness(MockGateway::new(dec!(10000)).with_fill_delay(Duration::from_millis(300))).await;
    h.gateway.push(MockOutcome::Return(dec!(0.001)));
    h.signals.push(long_signal());

    let id = create_bot(&h).await;
    h.supervisor.start(id).await.unwrap();

    let gateway = &h.gateway;
    assert!(eventually(move || async move { gateway.started() == 1 }).await);
    assert_eq!(h.gateway.completed(), 0);

    assert_eq!(h.supervisor.stop(id).await.unwrap(), BotStatus::Inactive);
    assert_eq!(h.gateway.completed(), 1);
    assert_eq!(h.supervisor.bot_summary(id).await.unwrap().trade_count, 1);

    assert_eq!(h.supervisor.stop(id).await.unwrap(), BotStatus::Inactive);
    assert_eq!(h.store.get(id).await.unwrap().status, BotStatus::Inactive);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_reported_trades_drive_levels_and_alerts() {
    let h = harness(MockGateway::new(dec!(10000))).await;
    assert_eq!(h.notifier.count(AlertKind::System), 1);

    let strong = create_bot(&h).await;
    let weak = create_bot(&h).await;

    h.supervisor.report_trade(strong, trade(dec!(0.0006))).await.unwrap();
    h.supervisor.report_trade(weak, trade(dec!(0.0001))).await.unwrap();

    let strong_summary = h.supervisor.bot_summary(strong).await.unwrap();
    assert_eq!(strong_summary.aggressiveness, dec!(0.7));
    let report = h.supervisor.bot_performance(strong).await.unwrap();
    assert_eq!(report.status, TargetStatus::OnTarget);

    let weak_summary = h.supervisor.bot_summary(weak).await.unwrap();
    assert_eq!(weak_summary.aggressiveness, dec!(1.6));
    let report = h.supervisor.bot_performance(weak).await.unwrap();
    assert_eq!(report.status, TargetStatus::BelowTarget);

    // Only the weak bot is under the performance alert threshold
    let notifier = &h.notifier;
    assert!(eventually(move || async move { notifier.count(AlertKind::Performance) == 1 }).await);
    assert_eq!(h.notifier.count(AlertKind::Trade), 0);

    h.supervisor.report_trade(strong, trade(dec!(-0.01))).await.unwrap();
    assert!(eventually(move || async move { notifier.count(AlertKind::Trade) == 1 }).await);

    let aggregated = h.supervisor.aggregate_performance().await;
    assert_eq!(aggregated.trade_count, 3);
    assert_eq!(aggregated.successful_trades, 2);
    assert_eq!(aggregated.total_gain, dec!(-0.0093));

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_observers_get_initial_data_then_updates() {
    let h = harness(MockGateway::new(dec!(10000))).await;
    let id = create_bot(&h).await;

    let mut rx = h.supervisor.subscribe().await;
    let first = rx.recv().await.unwrap();
    match &*first {
        BroadcastMessage::InitialData { bots, .. } => {
            assert_eq!(bots.len(), 1);
            assert_eq!(bots[0].id, id);
        }
        other => panic!("expected initial_data, got {:?}", other),
    }

    h.supervisor.report_trade(id, trade(dec!(0.0002))).await.unwrap();

    let update = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = rx.recv().await.unwrap();
            if let BroadcastMessage::Update { bots, performance, .. } = &*msg {
                if bots.iter().any(|b| b.performance.trade_count == 1)
                    && performance.contains_key(&id)
                {
                    return msg;
                }
            }
        }
    })
    .await
    .unwrap();

    let json = serde_json::to_value(&*update).unwrap();
    assert_eq!(json["type"], "update");
    assert_eq!(json["bots"][0]["id"], id.to_string());
    assert_eq!(json["bots"][0]["status"], "inactive");
    assert!(json["performance"][id.to_string()]["status"].is_string());
    assert_eq!(json["aggregated"]["tradeCount"], 1);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_delete_then_create_never_reuses_ids() {
    let h = harness(MockGateway::new(dec!(10000))).await;
    let a = create_bot(&h).await;
    let b = create_bot(&h).await;

    h.supervisor.start(a).await.unwrap();
    h.supervisor.delete(a).await.unwrap();
    assert!(h.store.get(a).await.is_none());

    let c = create_bot(&h).await;
    assert_ne!(c, a);
    assert_ne!(c, b);

    let ids: Vec<Uuid> = h.supervisor.list().await.iter().map(|cfg| cfg.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&b) && ids.contains(&c));
    assert!(h.supervisor.get(a).await.is_err());

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_persists_inactive() {
    let h = harness(MockGateway::new(dec!(10000))).await;
    let a = create_bot(&h).await;
    let b = create_bot(&h).await;
    h.supervisor.start(a).await.unwrap();
    h.supervisor.start(b).await.unwrap();

    h.supervisor.shutdown().await;

    for id in [a, b] {
        assert_eq!(h.supervisor.status(id).await.unwrap(), BotStatus::Inactive);
        assert_eq!(h.store.get(id).await.unwrap().status, BotStatus::Inactive);
    }
}

#[tokio::test]
async fn test_resume_from_json_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bots.json");
    let gateway = Arc::new(MockGateway::new(dec!(10000)));

    let deps = |store: Arc<JsonFileStore>| Collaborators {
        store,
        notifier: Arc::new(RecordingNotifier::default()),
        gateways: Arc::new(MockProvider(gateway.clone())),
        signals: Arc::new(ScriptedSignals::new()),
    };

    let (active, idle) = {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let sup = Supervisor::launch(&test_settings(), deps(store.clone())).await;
        let active = sup
            .create(NewBot::new(BotMode::Testnet, &["BTCUSDT"]))
            .await
            .unwrap();
        let idle = sup
            .create(NewBot::new(BotMode::Simulation, &["ETHUSDT"]))
            .await
            .unwrap();
        store
            .update_bot(active, &BotUpdate::status(BotStatus::Active))
            .await
            .unwrap();
        sup.shutdown().await;
        (active, idle)
    };

    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let sup = Supervisor::launch(&test_settings(), deps(store)).await;
    assert_eq!(sup.resume_active().await.unwrap(), 2);
    assert_eq!(sup.status(active).await.unwrap(), BotStatus::Active);
    assert_eq!(sup.status(idle).await.unwrap(), BotStatus::Inactive);
    assert_eq!(sup.get(active).await.unwrap().mode, BotMode::Testnet);

    sup.shutdown().await;
}
