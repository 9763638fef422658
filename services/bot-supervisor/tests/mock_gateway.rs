//! Mock collaborators for driving bots without an exchange

use async_trait::async_trait;
use bot_supervisor::{
    error::GatewayError,
    gateway::{ExecutionGateway, GatewayProvider},
    notifier::{Alert, AlertKind, Notifier},
    signals::SignalSource,
    types::{AccountInfo, BotConfig, OrderRequest, TradeResult, TradeSide, TradeSignal},
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// What the next order resolves to
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Fractional return on the balance
    Return(Decimal),
    Fail(GatewayError),
}

/// Gateway that replays scripted outcomes and records every order
pub struct MockGateway {
    balance: Mutex<Decimal>,
    script: Mutex<VecDeque<MockOutcome>>,
    orders: Mutex<Vec<OrderRequest>>,
    fill_delay: Duration,
    started: AtomicUsize,
    completed: AtomicUsize,
}

impl MockGateway {
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance: Mutex::new(balance),
            script: Mutex::new(VecDeque::new()),
            orders: Mutex::new(Vec::new()),
            fill_delay: Duration::ZERO,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn with_fill_delay(mut self, delay: Duration) -> Self {
        self.fill_delay = delay;
        self
    }

    pub fn push(&self, outcome: MockOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn balance(&self) -> Decimal {
        *self.balance.lock().unwrap()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionGateway for MockGateway {
    async fn place_order(&self, order: &OrderRequest) -> Result<TradeResult, GatewayError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().unwrap().push(order.clone());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockOutcome::Return(Decimal::ZERO));

        if !self.fill_delay.is_zero() {
            sleep(self.fill_delay).await;
        }

        let result = match outcome {
            MockOutcome::Return(ret) => {
                let mut balance = self.balance.lock().unwrap();
                let delta = *balance * ret;
                *balance += delta;
                Ok(TradeResult {
                    pair: order.pair.clone(),
                    profit_loss: ret,
                    balance: *balance,
                    timestamp: Utc::now(),
                })
            }
            MockOutcome::Fail(e) => Err(e),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn get_account_info(&self) -> Result<AccountInfo, GatewayError> {
        Ok(AccountInfo {
            balance: self.balance(),
        })
    }
}

/// Hands every bot the same mock gateway
pub struct MockProvider(pub Arc<MockGateway>);

impl GatewayProvider for MockProvider {
    fn gateway_for(&self, _config: &BotConfig) -> Arc<dyn ExecutionGateway> {
        self.0.clone()
    }
}

/// Signal source that replays a queue, one signal per poll
#[derive(Default)]
pub struct ScriptedSignals {
    queue: Mutex<VecDeque<TradeSignal>>,
}

impl ScriptedSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, signal: TradeSignal) {
        self.queue.lock().unwrap().push_back(signal);
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[async_trait]
impl SignalSource for ScriptedSignals {
    async fn next_signal(&self, pair: &str) -> Option<TradeSignal> {
        let mut signal = self.queue.lock().unwrap().pop_front()?;
        signal.pair = pair.to_string();
        Some(signal)
    }
}

/// Long entry at 100 with a stop at 98
pub fn long_signal() -> TradeSignal {
    TradeSignal {
        pair: String::new(),
        side: TradeSide::Buy,
        entry_price: dec!(100),
        stop_loss_price: dec!(98),
    }
}

/// Notifier that keeps every alert
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.kind == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn report(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn order() -> OrderRequest {
        OrderRequest {
            bot_id: Uuid::new_v4(),
            pair: "BTCUSDT".to_string(),
            side: TradeSide::Buy,
            quantity: dec!(125),
            entry_price: dec!(100),
            stop_loss_price: dec!(98),
            take_profit_prices: vec![dec!(100.6)],
        }
    }

    #[tokio::test]
    async fn test_mock_gateway_replays_script() {
        let gateway = MockGateway::new(dec!(10000));
        gateway.push(MockOutcome::Return(dec!(0.01)));
        gateway.push(MockOutcome::Fail(GatewayError::Timeout(30)));

        let first = gateway.place_order(&order()).await.unwrap();
        assert_eq!(first.balance, dec!(10100));
        assert!(gateway.place_order(&order()).await.is_err());

        let idle = gateway.place_order(&order()).await.unwrap();
        assert_eq!(idle.profit_loss, Decimal::ZERO);
        assert_eq!(gateway.orders().len(), 3);
        assert_eq!(gateway.completed(), 3);
    }

    #[tokio::test]
    async fn test_scripted_signals_take_pair() {
        let signals = ScriptedSignals::new();
        signals.push(long_signal());
        let signal = signals.next_signal("ETHUSDT").await.unwrap();
        assert_eq!(signal.pair, "ETHUSDT");
        assert!(signals.next_signal("ETHUSDT").await.is_none());
    }
}
