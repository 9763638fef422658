//! Profitability tracking against rolling hourly and daily targets
//!
//! The controller owns its bot's `ProfitState` and pushes the derived
//! aggressiveness level into the bot's own `RiskController`.

use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::config::ProfitTargets;
use crate::error::ConfigError;
use crate::risk::{lock_risk, AggressivenessLevel, SharedRisk};
use crate::types::TradeResult;

/// Most recent entries kept in the performance log
pub const PERFORMANCE_LOG_CAPACITY: usize = 1000;

/// Deficit decay per compensation call
const DEFICIT_DECAY: Decimal = dec!(0.8);

/// Below this the deficit snaps to zero
const DEFICIT_FLOOR: Decimal = dec!(0.0001);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceEntry {
    pub timestamp: DateTime<Utc>,
    pub gain: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct ProfitState {
    pub current_hourly_gain: Decimal,
    pub current_daily_gain: Decimal,
    /// Accumulated hourly shortfall, never negative
    pub deficit: Decimal,
    pub last_checked_hour: u32,
    pub last_checked_day: NaiveDate,
    pub performance_log: VecDeque<PerformanceEntry>,
}

impl ProfitState {
    fn starting_at(now: DateTime<Local>) -> Self {
        Self {
            current_hourly_gain: Decimal::ZERO,
            current_daily_gain: Decimal::ZERO,
            deficit: Decimal::ZERO,
            last_checked_hour: now.hour(),
            last_checked_day: now.date_naive(),
            performance_log: VecDeque::with_capacity(64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetStatus {
    OnTarget,
    BelowTarget,
}

/// Read-only snapshot of a controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub current_hourly_gain: Decimal,
    pub current_daily_gain: Decimal,
    pub hourly_target: Decimal,
    pub daily_target: Decimal,
    pub deficit: Decimal,
    pub performance_ratio: Decimal,
    pub status: TargetStatus,
}

pub struct ProfitController {
    targets: ProfitTargets,
    state: ProfitState,
    risk: SharedRisk,
}

impl ProfitController {
    /// Rejects targets that do not satisfy `0 < hourly < daily <= daily_max`
    pub fn new(targets: ProfitTargets, risk: SharedRisk) -> Result<Self, ConfigError> {
        Self::starting_at(targets, risk, Local::now())
    }

    pub fn starting_at(
        targets: ProfitTargets,
        risk: SharedRisk,
        now: DateTime<Local>,
    ) -> Result<Self, ConfigError> {
        targets.validate()?;
        Ok(Self {
            targets,
            state: ProfitState::starting_at(now),
            risk,
        })
    }

    pub fn state(&self) -> &ProfitState {
        &self.state
    }

    pub fn deficit(&self) -> Decimal {
        self.state.deficit
    }

    pub fn update_performance(&mut self, trade: &TradeResult) -> AggressivenessLevel {
        self.update_performance_at(trade, Local::now())
    }

    /// Record a trade outcome, then re-check targets
    pub fn update_performance_at(
        &mut self,
        trade: &TradeResult,
        now: DateTime<Local>,
    ) -> AggressivenessLevel {
        if self.state.performance_log.len() >= PERFORMANCE_LOG_CAPACITY {
            self.state.performance_log.pop_front();
        }
        self.state.performance_log.push_back(PerformanceEntry {
            timestamp: trade.timestamp,
            gain: trade.profit_loss,
            balance: trade.balance,
        });

        self.state.current_hourly_gain += trade.profit_loss;
        self.state.current_daily_gain += trade.profit_loss;

        self.check_performance_at(now)
    }

    pub fn check_performance(&mut self) -> AggressivenessLevel {
        self.check_performance_at(Local::now())
    }

    /// Apply hour and day rollover, then re-derive aggressiveness.
    ///
    /// Only the hour number is compared, so several idle hours roll over once.
    pub fn check_performance_at(&mut self, now: DateTime<Local>) -> AggressivenessLevel {
        let hour = now.hour();
        if hour != self.state.last_checked_hour {
            let shortfall = self.targets.hourly - self.state.current_hourly_gain;
            if shortfall > Decimal::ZERO {
                self.state.deficit += shortfall;
            }
            debug!(
                hour,
                hourly_gain = %self.state.current_hourly_gain,
                deficit = %self.state.deficit,
                "Hour rollover"
            );
            self.state.current_hourly_gain = Decimal::ZERO;
            self.state.last_checked_hour = hour;
        }

        let day = now.date_naive();
        if day != self.state.last_checked_day {
            info!(
                day = %day,
                daily_gain = %self.state.current_daily_gain,
                "Day rollover"
            );
            self.state.current_daily_gain = Decimal::ZERO;
            self.state.last_checked_day = day;
        }

        self.adjust_aggressiveness()
    }

    /// Hourly gain over the hourly target; zero when the target is zero
    pub fn performance_ratio(&self) -> Decimal {
        if self.targets.hourly.is_zero() {
            return Decimal::ZERO;
        }
        self.state.current_hourly_gain / self.targets.hourly
    }

    /// Derive a level from the current ratio and push it to the risk controller
    pub fn adjust_aggressiveness(&mut self) -> AggressivenessLevel {
        let level = AggressivenessLevel::from_performance_ratio(self.performance_ratio());
        lock_risk(&self.risk).set_aggressiveness(level);
        level
    }

    /// Raise the risk multiplier in proportion to the deficit, then decay it.
    /// Returns the applied factor, or None when there is no deficit.
    pub fn compensate_deficit(&mut self) -> Option<Decimal> {
        if self.state.deficit <= Decimal::ZERO || self.targets.hourly.is_zero() {
            return None;
        }

        let factor = Decimal::ONE + (self.state.deficit / self.targets.hourly) * dec!(0.5);
        lock_risk(&self.risk).override_aggressiveness(factor);

        self.state.deficit *= DEFICIT_DECAY;
        if self.state.deficit < DEFICIT_FLOOR {
            self.state.deficit = Decimal::ZERO;
        }

        debug!(
            factor = %factor,
            deficit = %self.state.deficit,
            "Deficit compensation applied"
        );
        Some(factor)
    }

    pub fn get_performance_report(&self) -> PerformanceReport {
        let status = if self.state.current_hourly_gain >= self.targets.hourly {
            TargetStatus::OnTarget
        } else {
            TargetStatus::BelowTarget
        };

        PerformanceReport {
            current_hourly_gain: self.state.current_hourly_gain,
            current_daily_gain: self.state.current_daily_gain,
            hourly_target: self.targets.hourly,
            daily_target: self.targets.daily,
            deficit: self.state.deficit,
            performance_ratio: self.performance_ratio(),
            status,
        }
    }
}
