//! Bot Supervisor Library
//!
//! Runs a fleet of trading bots, each steering its own risk-taking from
//! how it performs against rolling hourly and daily profit targets.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod gateway;
pub mod instance;
pub mod notifier;
pub mod profit;
pub mod registry;
pub mod risk;
pub mod signals;
pub mod store;
pub mod supervisor;
pub mod types;

// Re-export main types for convenience
pub use broadcast::{BotSnapshot, BroadcastMessage, Broadcaster, Snapshot, SnapshotSource};
pub use config::Settings;
pub use error::{BotError, ConfigError, GatewayError, RiskError, StoreError, SupervisorError};
pub use gateway::{ExecutionGateway, GatewayProvider, PaperGateway, PaperGatewayProvider};
pub use instance::{BotEvent, BotInstance, InstanceOptions, PerformanceSummary};
pub use notifier::{Alert, AlertSeverity, FanoutNotifier, LogNotifier, Notifier, WebhookNotifier};
pub use profit::{PerformanceReport, ProfitController, TargetStatus};
pub use risk::{AggressivenessLevel, RiskController, SharedRisk};
pub use signals::{PaperSignalSource, SignalSource};
pub use store::{JsonFileStore, MemoryStore, Store};
pub use supervisor::{AggregatePerformance, Collaborators, PerformanceOverview, Supervisor};
pub use types::{BotConfig, BotMode, BotStatus, BotUpdate, NewBot, TradeResult, TradeSide, TradeSignal};
