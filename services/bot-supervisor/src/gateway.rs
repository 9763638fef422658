//! Execution gateway seam and the paper (simulation) gateway

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::types::{AccountInfo, BotConfig, BotMode, OrderRequest, TradeResult, TradeSide};

/// Order submission and account access for one bot
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> Result<TradeResult, GatewayError>;

    async fn get_account_info(&self) -> Result<AccountInfo, GatewayError>;
}

/// Hands each bot the gateway matching its mode
pub trait GatewayProvider: Send + Sync {
    fn gateway_for(&self, config: &BotConfig) -> Arc<dyn ExecutionGateway>;
}

struct PaperAccount {
    balance: Decimal,
    rng: StdRng,
}

/// Simulated account that resolves every order immediately.
///
/// A win exits at the first take-profit, a loss at the stop.
pub struct PaperGateway {
    account: Mutex<PaperAccount>,
    win_probability: f64,
}

impl PaperGateway {
    pub fn new(initial_balance: Decimal, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            account: Mutex::new(PaperAccount {
                balance: initial_balance,
                rng,
            }),
            win_probability: 0.55,
        }
    }

    pub fn with_win_probability(mut self, probability: f64) -> Self {
        self.win_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn balance(&self) -> Decimal {
        self.account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .balance
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn place_order(&self, order: &OrderRequest) -> Result<TradeResult, GatewayError> {
        if order.quantity <= Decimal::ZERO {
            return Err(GatewayError::Rejected(format!(
                "quantity must be positive, got {}",
                order.quantity
            )));
        }

        let mut account = self.account.lock().unwrap_or_else(PoisonError::into_inner);
        let balance_before = account.balance;
        if balance_before <= Decimal::ZERO {
            return Err(GatewayError::InsufficientBalance {
                needed: order.quantity * order.entry_price,
                available: balance_before,
            });
        }

        let won = account.rng.gen_bool(self.win_probability);
        let exit_price = if won {
            order
                .take_profit_prices
                .first()
                .copied()
                .unwrap_or(order.entry_price)
        } else {
            order.stop_loss_price
        };

        let per_unit = match order.side {
            TradeSide::Buy => exit_price - order.entry_price,
            TradeSide::Sell => order.entry_price - exit_price,
        };
        let pnl = per_unit * order.quantity;

        account.balance = (balance_before + pnl).max(Decimal::ZERO);
        debug!(
            bot_id = %order.bot_id,
            pair = %order.pair,
            won,
            pnl = %pnl,
            balance = %account.balance,
            "Paper order filled"
        );

        Ok(TradeResult {
            pair: order.pair.clone(),
            profit_loss: pnl / balance_before,
            balance: account.balance,
            timestamp: Utc::now(),
        })
    }

    async fn get_account_info(&self) -> Result<AccountInfo, GatewayError> {
        Ok(AccountInfo {
            balance: self.balance(),
        })
    }
}

/// Every mode trades on paper; exchange adapters plug in behind `GatewayProvider`
pub struct PaperGatewayProvider {
    initial_balance: Decimal,
    seed: Option<u64>,
}

impl PaperGatewayProvider {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for PaperGatewayProvider {
    fn default() -> Self {
        Self::new(dec!(10000))
    }
}

impl GatewayProvider for PaperGatewayProvider {
    fn gateway_for(&self, config: &BotConfig) -> Arc<dyn ExecutionGateway> {
        if config.mode != BotMode::Simulation {
            warn!(
                bot_id = %config.id,
                mode = %config.mode,
                "No exchange adapter configured, trading on paper"
            );
        }
        Arc::new(PaperGateway::new(self.initial_balance, self.seed))
    }
}
