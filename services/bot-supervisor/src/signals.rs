//! Strategy seam: where entry signals come from

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::types::{TradeSide, TradeSignal};

/// Produces at most one entry signal per pair per poll
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn next_signal(&self, pair: &str) -> Option<TradeSignal>;
}

struct PaperMarket {
    prices: HashMap<String, Decimal>,
    rng: StdRng,
}

/// Random-walk prices with occasional signals, for SIMULATION bots
pub struct PaperSignalSource {
    market: Mutex<PaperMarket>,
    signal_probability: f64,
    stop_distance: Decimal,
}

impl PaperSignalSource {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            market: Mutex::new(PaperMarket {
                prices: HashMap::new(),
                rng,
            }),
            signal_probability: 0.2,
            stop_distance: dec!(0.02),
        }
    }

    pub fn with_signal_probability(mut self, probability: f64) -> Self {
        self.signal_probability = probability.clamp(0.0, 1.0);
        self
    }
}

impl Default for PaperSignalSource {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SignalSource for PaperSignalSource {
    async fn next_signal(&self, pair: &str) -> Option<TradeSignal> {
        let mut market = self.market.lock().unwrap_or_else(PoisonError::into_inner);
        let PaperMarket { prices, rng } = &mut *market;

        // +/- 0.5% step per poll
        let step_bps: i64 = rng.gen_range(-50..=50);
        let price = prices.entry(pair.to_string()).or_insert(dec!(100));
        *price *= Decimal::ONE + Decimal::new(step_bps, 4);
        let price = *price;

        if !rng.gen_bool(self.signal_probability) {
            return None;
        }

        let side = if rng.gen_bool(0.5) {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        };
        let stop_loss_price = match side {
            TradeSide::Buy => price * (Decimal::ONE - self.stop_distance),
            TradeSide::Sell => price * (Decimal::ONE + self.stop_distance),
        };

        Some(TradeSignal {
            pair: pair.to_string(),
            side,
            entry_price: price.round_dp(8),
            stop_loss_price: stop_loss_price.round_dp(8),
        })
    }
}
