use std::collections::HashMap;

use crate::indicators;
use crate::models::{Bar, Signal, SignalAction};
use crate::param_utils::{get_param, get_usize_param_min};
use crate::strategy::{closes_for_symbol, make_signal};

/// Buys when the close rises more than `returnThreshold` over the lookback,
/// sells on a symmetric decline.
pub struct MomentumStrategy {
    pub template_id: String,
    lookback_period: usize,
    return_threshold: f64,
    min_confidence: f64,
}

impl MomentumStrategy {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        let lookback_period = get_usize_param_min(&parameters, "lookbackPeriod", 1, 1);
        let return_threshold = get_param(&parameters, "returnThreshold", 0.03);
        let min_confidence = get_param(&parameters, "minConfidence", 0.6);
        Self {
            template_id: "momentum".to_string(),
            lookback_period,
            return_threshold,
            min_confidence,
        }
    }

    fn confidence_for(&self, change: f64) -> f64 {
        if self.return_threshold <= 0.0 {
            return 1.0;
        }
        (0.5 + 0.5 * (change.abs() / self.return_threshold - 1.0))
            .min(1.0)
            .max(0.0)
    }
}

impl super::Strategy for MomentumStrategy {
    fn get_template_id(&self) -> &str {
        &self.template_id
    }

    fn generate_signal(&self, bars: &[Bar], index: usize) -> Option<Signal> {
        if index >= bars.len() {
            return None;
        }
        let bar = &bars[index];
        let closes = closes_for_symbol(bars, &bar.symbol, index);
        let last = closes.len() - 1;
        let change = indicators::rate_of_change(&closes, last, self.lookback_period)?;

        let mut factors = HashMap::new();
        factors.insert("change".to_string(), change);

        if change > self.return_threshold {
            let confidence = self.confidence_for(change);
            return Some(make_signal(
                bar,
                SignalAction::Buy,
                confidence,
                format!(
                    "close rose {:.2}% over {} bars",
                    change * 100.0,
                    self.lookback_period
                ),
                factors,
            ));
        }

        if change < -self.return_threshold {
            let confidence = self.confidence_for(change);
            return Some(make_signal(
                bar,
                SignalAction::Sell,
                confidence,
                format!(
                    "close fell {:.2}% over {} bars",
                    change.abs() * 100.0,
                    self.lookback_period
                ),
                factors,
            ));
        }

        None
    }

    fn min_bars(&self) -> usize {
        self.lookback_period + 1
    }

    fn min_confidence(&self) -> f64 {
        self.min_confidence
    }
}
