//! Periodic state broadcast to dashboard observers

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BroadcastConfig;
use crate::instance::PerformanceSummary;
use crate::profit::PerformanceReport;
use crate::supervisor::AggregatePerformance;
use crate::types::{BotConfig, BotStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotSnapshot {
    pub id: Uuid,
    pub status: BotStatus,
    pub performance: PerformanceSummary,
}

/// Point-in-time view of every instance
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub configs: Vec<BotConfig>,
    pub bots: Vec<BotSnapshot>,
    /// Latest performance report per bot
    pub performance: BTreeMap<Uuid, PerformanceReport>,
    pub aggregated: AggregatePerformance,
}

/// Where the broadcaster reads state from; must not wait on bot locks
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Snapshot;
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    InitialData {
        bots: Vec<BotConfig>,
        performance: BTreeMap<Uuid, PerformanceReport>,
        aggregated: AggregatePerformance,
        timestamp: i64,
    },
    Update {
        bots: Vec<BotSnapshot>,
        performance: BTreeMap<Uuid, PerformanceReport>,
        aggregated: AggregatePerformance,
        timestamp: i64,
    },
}

impl BroadcastMessage {
    pub fn initial(snapshot: Snapshot) -> Self {
        BroadcastMessage::InitialData {
            bots: snapshot.configs,
            performance: snapshot.performance,
            aggregated: snapshot.aggregated,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn update(snapshot: Snapshot) -> Self {
        BroadcastMessage::Update {
            bots: snapshot.bots,
            performance: snapshot.performance,
            aggregated: snapshot.aggregated,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub type ObserverMessage = Arc<BroadcastMessage>;

pub struct Broadcaster {
    source: Arc<dyn SnapshotSource>,
    observers: Mutex<Vec<mpsc::Sender<ObserverMessage>>>,
    wake: Notify,
    interval: Duration,
    buffer: usize,
}

impl Broadcaster {
    pub fn new(source: Arc<dyn SnapshotSource>, config: &BroadcastConfig) -> Self {
        Self {
            source,
            observers: Mutex::new(Vec::new()),
            wake: Notify::new(),
            interval: config.interval(),
            buffer: config.observer_buffer.max(1),
        }
    }

    /// Register an observer; its first message is `initial_data`
    pub async fn subscribe(&self) -> mpsc::Receiver<ObserverMessage> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let initial = Arc::new(BroadcastMessage::initial(self.source.snapshot().await));
        // Fresh channel with capacity >= 1 cannot be full
        let _ = tx.try_send(initial);

        let count = {
            let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
            observers.push(tx);
            observers.len()
        };
        info!(observers = count, "Observer subscribed");
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Request a broadcast before the next tick
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Publish one update. Full observers are skipped, closed ones dropped.
    /// Returns how many observers received it.
    pub async fn broadcast(&self) -> usize {
        let message = Arc::new(BroadcastMessage::update(self.source.snapshot().await));

        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        observers.retain(|tx| match tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!("Observer lagging, skipped this tick");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Tick until shutdown, also broadcasting whenever woken
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "Broadcaster running");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    self.broadcast().await;
                }
                _ = self.wake.notified() => {
                    self.broadcast().await;
                }
            }
        }

        let remaining = self.observer_count();
        if remaining > 0 {
            warn!(observers = remaining, "Broadcaster stopped with observers attached");
        }
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(shutdown))
    }
}
