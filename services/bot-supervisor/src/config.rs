//! Supervisor configuration
//!
//! Layers built-in defaults, an optional YAML file and `BOT_SUPERVISOR_*`
//! environment variables (nested keys separated by `__`, e.g.
//! `BOT_SUPERVISOR_PROFITABILITY_TARGETS__HOURLY=0.0005`).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Environment prefix for overrides
const ENV_PREFIX: &str = "BOT_SUPERVISOR";

/// Default config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/supervisor.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub profitability_targets: ProfitTargets,
    pub auto_adjustment: AutoAdjustment,
    pub risk_profile: RiskProfileConfig,
    pub trading: TradingConfig,
    pub broadcast: BroadcastConfig,
    pub store: StoreConfig,
    pub alerts: AlertConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            profitability_targets: ProfitTargets::default(),
            auto_adjustment: AutoAdjustment::default(),
            risk_profile: RiskProfileConfig::default(),
            trading: TradingConfig::default(),
            broadcast: BroadcastConfig::default(),
            store: StoreConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl Settings {
    /// Load from an optional file plus environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.profitability_targets.validate()?;
        self.auto_adjustment.aggressiveness_levels.validate()?;
        self.risk_profile.validate()?;

        if self.auto_adjustment.check_interval_ms == 0 {
            return Err(invalid("auto_adjustment.check_interval_ms must be > 0"));
        }
        if self.trading.interval_ms == 0 {
            return Err(invalid("trading.interval_ms must be > 0"));
        }
        if self.broadcast.interval_ms == 0 {
            return Err(invalid("broadcast.interval_ms must be > 0"));
        }
        if self.broadcast.observer_buffer == 0 {
            return Err(invalid("broadcast.observer_buffer must be > 0"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Rolling profitability targets, as fractional returns
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfitTargets {
    pub hourly: Decimal,
    pub daily: Decimal,
    pub daily_max: Decimal,
    pub monthly: Decimal,
}

impl Default for ProfitTargets {
    fn default() -> Self {
        Self {
            hourly: dec!(0.00042),
            daily: dec!(0.01),
            daily_max: dec!(0.02),
            monthly: dec!(0.22),
        }
    }
}

impl ProfitTargets {
    /// Requires 0 < hourly < daily <= daily_max
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hourly <= Decimal::ZERO {
            return Err(invalid(format!(
                "hourly target must be > 0, got {}",
                self.hourly
            )));
        }
        if self.hourly >= self.daily {
            return Err(invalid(format!(
                "hourly target {} must be below daily target {}",
                self.hourly, self.daily
            )));
        }
        if self.daily > self.daily_max {
            return Err(invalid(format!(
                "daily target {} exceeds daily_max {}",
                self.daily, self.daily_max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoAdjustment {
    pub enabled: bool,
    /// Control tick for rollover checks and deficit compensation
    pub check_interval_ms: u64,
    pub aggressiveness_levels: AggressivenessLevels,
}

impl Default for AutoAdjustment {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 300_000,
            aggressiveness_levels: AggressivenessLevels::default(),
        }
    }
}

impl AutoAdjustment {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Risk multiplier applied at each aggressiveness level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggressivenessLevels {
    pub low: Decimal,
    pub normal: Decimal,
    pub high: Decimal,
    pub extreme: Decimal,
}

impl Default for AggressivenessLevels {
    fn default() -> Self {
        Self {
            low: dec!(0.7),
            normal: dec!(1.0),
            high: dec!(1.3),
            extreme: dec!(1.6),
        }
    }
}

impl AggressivenessLevels {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.low <= Decimal::ZERO {
            return Err(invalid("aggressiveness level low must be > 0"));
        }
        if !(self.low < self.normal && self.normal < self.high && self.high < self.extreme) {
            return Err(invalid(
                "aggressiveness levels must be strictly increasing low < normal < high < extreme",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskProfileConfig {
    pub max_daily_loss_fraction: Decimal,
    pub per_trade_risk_fraction: Decimal,
    pub tiered_take_profits: Vec<Decimal>,
}

impl Default for RiskProfileConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_fraction: dec!(0.1),
            per_trade_risk_fraction: dec!(0.025),
            tiered_take_profits: vec![dec!(0.006), dec!(0.012), dec!(0.018)],
        }
    }
}

impl RiskProfileConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = Decimal::ZERO..=Decimal::ONE;
        if self.max_daily_loss_fraction <= Decimal::ZERO
            || !unit.contains(&self.max_daily_loss_fraction)
        {
            return Err(invalid(format!(
                "max_daily_loss_fraction must be in (0, 1], got {}",
                self.max_daily_loss_fraction
            )));
        }
        if self.per_trade_risk_fraction <= Decimal::ZERO
            || !unit.contains(&self.per_trade_risk_fraction)
        {
            return Err(invalid(format!(
                "per_trade_risk_fraction must be in (0, 1], got {}",
                self.per_trade_risk_fraction
            )));
        }
        if self.tiered_take_profits.iter().any(|tp| *tp <= Decimal::ZERO) {
            return Err(invalid("tiered_take_profits must all be > 0"));
        }
        if self.tiered_take_profits.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("tiered_take_profits must be strictly increasing"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradingConfig {
    /// How often each active bot polls its signal source
    pub interval_ms: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self { interval_ms: 60_000 }
    }
}

impl TradingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BroadcastConfig {
    pub interval_ms: u64,
    /// Messages an observer may lag behind before being skipped
    pub observer_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            observer_buffer: 64,
        }
    }
}

impl BroadcastConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding bot configs; defaults under the user data dir
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("bot-supervisor")
                .join("bots.json")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    /// Trades with |profit_loss| above this are reported
    pub notification_threshold: Decimal,
    /// Hourly gain below this raises a performance alert
    pub performance_alert_threshold: Decimal,
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            notification_threshold: dec!(0.005),
            performance_alert_threshold: dec!(0.0003),
            webhook_url: None,
            webhook_timeout_secs: 10,
        }
    }
}
