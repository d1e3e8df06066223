use anyhow::Result;
use std::collections::HashMap;

use crate::models::{Bar, Signal, SignalAction};

/// A signal generator over a shared bar series. Implementations only read
/// bars at or before `index`; returning None means hold.
pub trait Strategy {
    fn get_template_id(&self) -> &str;
    fn generate_signal(&self, bars: &[Bar], index: usize) -> Option<Signal>;
    /// Bars required before the first signal can fire.
    fn min_bars(&self) -> usize;
    /// Confidence floor below which buy signals are discarded.
    fn min_confidence(&self) -> f64;
}

/// Closes of `symbol` up to and including `index`, in bar order.
pub fn closes_for_symbol(bars: &[Bar], symbol: &str, index: usize) -> Vec<f64> {
    bars[..=index]
        .iter()
        .filter(|bar| bar.symbol == symbol)
        .map(|bar| bar.close)
        .collect()
}

pub fn make_signal(
    bar: &Bar,
    action: SignalAction,
    confidence: f64,
    reason: String,
    factors: HashMap<String, f64>,
) -> Signal {
    Signal {
        symbol: bar.symbol.clone(),
        action,
        confidence,
        price: bar.close,
        timestamp: bar.timestamp,
        reason,
        factors,
    }
}

#[path = "strategies/momentum.rs"]
pub mod momentum;

pub use momentum::MomentumStrategy;

#[path = "strategies/ma_crossover.rs"]
pub mod ma_crossover;

pub use ma_crossover::MaCrossoverStrategy;

pub fn create_strategy(
    template_id: &str,
    parameters: HashMap<String, f64>,
) -> Result<Box<dyn Strategy + Send + Sync>> {
    match template_id {
        "momentum" => Ok(Box::new(MomentumStrategy::new(parameters))),
        "ma_crossover" => Ok(Box::new(MaCrossoverStrategy::new(parameters))),
        _ => Err(anyhow::anyhow!(
            "Unknown strategy template: {}",
            template_id
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_known_templates() {
        assert!(create_strategy("momentum", HashMap::new()).is_ok());
        assert!(create_strategy("ma_crossover", HashMap::new()).is_ok());
        assert!(create_strategy("hodl", HashMap::new()).is_err());
    }
}
