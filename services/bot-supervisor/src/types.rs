//! Core types shared between the supervisor, bot instances and collaborators

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::SupervisorError;

/// Where a bot sends its orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotMode {
    Simulation,
    Testnet,
    Mainnet,
}

impl std::fmt::Display for BotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotMode::Simulation => write!(f, "SIMULATION"),
            BotMode::Testnet => write!(f, "TESTNET"),
            BotMode::Mainnet => write!(f, "MAINNET"),
        }
    }
}

/// Bot lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    #[default]
    Inactive,
    Active,
    Error,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotStatus::Inactive => write!(f, "inactive"),
            BotStatus::Active => write!(f, "active"),
            BotStatus::Error => write!(f, "error"),
        }
    }
}

/// Persisted bot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub id: Uuid,
    pub mode: BotMode,
    pub pairs: BTreeSet<String>,
    pub status: BotStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bot creation request (BotConfig minus id/status)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBot {
    pub mode: Option<BotMode>,
    #[serde(default)]
    pub pairs: Vec<String>,
}

impl NewBot {
    pub fn new(mode: BotMode, pairs: &[&str]) -> Self {
        Self {
            mode: Some(mode),
            pairs: pairs.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Validate and turn into a fresh inactive config
    pub fn into_config(self) -> Result<BotConfig, SupervisorError> {
        let mode = self
            .mode
            .ok_or_else(|| SupervisorError::Validation("mode is required".to_string()))?;
        let pairs = normalize_pairs(self.pairs)?;
        let now = Utc::now();

        Ok(BotConfig {
            id: Uuid::new_v4(),
            mode,
            pairs,
            status: BotStatus::Inactive,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of a bot's configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<BotMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BotStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BotUpdate {
    pub fn status(status: BotStatus) -> Self {
        Self {
            status: Some(status),
            updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Apply onto a config, validating any new pair set
    pub fn apply_to(&self, config: &mut BotConfig) -> Result<(), SupervisorError> {
        if let Some(pairs) = &self.pairs {
            config.pairs = normalize_pairs(pairs.clone())?;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(status) = self.status {
            config.status = status;
        }
        config.updated_at = self.updated_at.unwrap_or_else(Utc::now);
        Ok(())
    }
}

fn normalize_pairs(pairs: Vec<String>) -> Result<BTreeSet<String>, SupervisorError> {
    let set: BTreeSet<String> = pairs
        .into_iter()
        .map(|p| p.trim().to_uppercase())
        .filter(|p| !p.is_empty())
        .collect();

    if set.is_empty() {
        return Err(SupervisorError::Validation(
            "pairs must contain at least one symbol".to_string(),
        ));
    }
    Ok(set)
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Entry signal produced by an external strategy
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSignal {
    pub pair: String,
    pub side: TradeSide,
    pub entry_price: Decimal,
    pub stop_loss_price: Decimal,
}

/// Sized order handed to the execution gateway
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub bot_id: Uuid,
    pub pair: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub stop_loss_price: Decimal,
    /// Tiered exits, nearest first
    pub take_profit_prices: Vec<Decimal>,
}

/// Outcome of an executed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResult {
    pub pair: String,
    /// Return as a fraction of the balance before the trade
    pub profit_loss: Decimal,
    /// Account balance after the trade
    pub balance: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Account snapshot from the execution gateway
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: Decimal,
}
