//! Risk control - aggressiveness-scaled position sizing and the daily loss cap

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::config::{AggressivenessLevels, RiskProfileConfig};
use crate::error::RiskError;
use crate::profit::PerformanceReport;
use crate::types::TradeSide;

/// Hourly gain below which recent throughput counts as weak
const WEAK_THROUGHPUT_GAIN: Decimal = dec!(0.002);

/// Risk appetite derived from recent performance, ordered low to extreme
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggressivenessLevel {
    Low,
    Normal,
    High,
    Extreme,
}

impl AggressivenessLevel {
    /// Level for a performance ratio (hourly gain / hourly target).
    /// First match wins: < 0.5 extreme, < 0.8 high, >= 1.2 low, else normal.
    pub fn from_performance_ratio(ratio: Decimal) -> Self {
        if ratio < dec!(0.5) {
            AggressivenessLevel::Extreme
        } else if ratio < dec!(0.8) {
            AggressivenessLevel::High
        } else if ratio >= dec!(1.2) {
            AggressivenessLevel::Low
        } else {
            AggressivenessLevel::Normal
        }
    }

    pub fn multiplier(self, levels: &AggressivenessLevels) -> Decimal {
        match self {
            AggressivenessLevel::Low => levels.low,
            AggressivenessLevel::Normal => levels.normal,
            AggressivenessLevel::High => levels.high,
            AggressivenessLevel::Extreme => levels.extreme,
        }
    }

    /// One step more aggressive, saturating at extreme
    pub fn step_up(self) -> Self {
        match self {
            AggressivenessLevel::Low => AggressivenessLevel::Normal,
            AggressivenessLevel::Normal => AggressivenessLevel::High,
            AggressivenessLevel::High | AggressivenessLevel::Extreme => {
                AggressivenessLevel::Extreme
            }
        }
    }
}

impl std::fmt::Display for AggressivenessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggressivenessLevel::Low => write!(f, "low"),
            AggressivenessLevel::Normal => write!(f, "normal"),
            AggressivenessLevel::High => write!(f, "high"),
            AggressivenessLevel::Extreme => write!(f, "extreme"),
        }
    }
}

/// Risk parameters owned by one controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskProfile {
    pub max_daily_loss_fraction: Decimal,
    pub per_trade_risk_fraction: Decimal,
    pub tiered_take_profits: Vec<Decimal>,
    pub current_aggressiveness: Decimal,
}

/// Handle shared by a bot's ProfitController and the bot itself
pub type SharedRisk = Arc<Mutex<RiskController>>;

/// Lock a shared controller, recovering the guard if a holder panicked
pub fn lock_risk(risk: &SharedRisk) -> MutexGuard<'_, RiskController> {
    risk.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-bot risk controller
#[derive(Debug, Clone)]
pub struct RiskController {
    profile: RiskProfile,
    levels: AggressivenessLevels,
    /// Last level pushed by the ProfitController
    derived_level: AggressivenessLevel,
}

impl RiskController {
    pub fn new(config: &RiskProfileConfig, levels: AggressivenessLevels) -> Self {
        Self {
            profile: RiskProfile {
                max_daily_loss_fraction: config.max_daily_loss_fraction,
                per_trade_risk_fraction: config.per_trade_risk_fraction,
                tiered_take_profits: config.tiered_take_profits.clone(),
                current_aggressiveness: levels.normal,
            },
            levels,
            derived_level: AggressivenessLevel::Normal,
        }
    }

    pub fn shared(self) -> SharedRisk {
        Arc::new(Mutex::new(self))
    }

    pub fn profile(&self) -> &RiskProfile {
        &self.profile
    }

    pub fn current_aggressiveness(&self) -> Decimal {
        self.profile.current_aggressiveness
    }

    pub fn derived_level(&self) -> AggressivenessLevel {
        self.derived_level
    }

    /// Takes effect on the next sizing call
    pub fn set_aggressiveness(&mut self, level: AggressivenessLevel) {
        self.derived_level = level;
        self.profile.current_aggressiveness = level.multiplier(&self.levels);
        debug!(
            level = %level,
            multiplier = %self.profile.current_aggressiveness,
            "Aggressiveness set"
        );
    }

    /// Raw multiplier override (deficit compensation); the derived level is kept
    pub fn override_aggressiveness(&mut self, multiplier: Decimal) {
        self.profile.current_aggressiveness = multiplier;
        debug!(multiplier = %multiplier, "Aggressiveness overridden");
    }

    /// Units to trade so that hitting the stop loses the scaled risk budget
    pub fn calculate_position_size(
        &self,
        balance: Decimal,
        current_price: Decimal,
        stop_loss_price: Decimal,
    ) -> Result<Decimal, RiskError> {
        if balance <= Decimal::ZERO {
            return Err(RiskError::InvalidRiskInput(format!(
                "balance must be positive, got {}",
                balance
            )));
        }

        let risk_per_unit = (current_price - stop_loss_price).abs();
        if risk_per_unit.is_zero() {
            return Err(RiskError::InvalidRiskInput(format!(
                "stop loss {} equals entry price",
                stop_loss_price
            )));
        }

        let risk_amount = balance
            * self.profile.per_trade_risk_fraction
            * self.profile.current_aggressiveness;
        Ok(risk_amount / risk_per_unit)
    }

    /// True when today's loss has reached the cap; halting is the caller's job
    pub fn enforce_daily_loss_cap(&self, daily_loss: Decimal, balance: Decimal) -> bool {
        daily_loss >= balance * self.profile.max_daily_loss_fraction
    }

    /// Escalate one level above the derived one when recent gain is weak.
    /// Returns the level now in force, if it changed anything.
    pub fn dynamic_adjustment(
        &mut self,
        report: &PerformanceReport,
    ) -> Option<AggressivenessLevel> {
        if report.current_hourly_gain >= WEAK_THROUGHPUT_GAIN {
            return None;
        }

        let escalated = self.derived_level.step_up();
        self.profile.current_aggressiveness = escalated.multiplier(&self.levels);
        debug!(
            from = %self.derived_level,
            to = %escalated,
            hourly_gain = %report.current_hourly_gain,
            "Dynamic adjustment escalated aggressiveness"
        );
        Some(escalated)
    }

    /// Exit prices for each take-profit tier
    pub fn take_profit_prices(&self, entry_price: Decimal, side: TradeSide) -> Vec<Decimal> {
        self.profile
            .tiered_take_profits
            .iter()
            .map(|tp| match side {
                TradeSide::Buy => entry_price * (Decimal::ONE + tp),
                TradeSide::Sell => entry_price * (Decimal::ONE - tp),
            })
            .collect()
    }
}
