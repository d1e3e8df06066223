use std::collections::HashMap;

use crate::indicators::simple_moving_average;
use crate::models::{Bar, Signal, SignalAction};
use crate::param_utils::{get_param, get_usize_param_min};
use crate::strategy::{closes_for_symbol, make_signal};

/// Classic dual moving average crossover: buy when the short average
/// crosses above the long one, sell on the cross back down.
pub struct MaCrossoverStrategy {
    pub template_id: String,
    short_period: usize,
    long_period: usize,
    min_confidence: f64,
}

impl MaCrossoverStrategy {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        let short_period = get_usize_param_min(&parameters, "shortPeriod", 5, 1);
        let mut long_period = get_usize_param_min(&parameters, "longPeriod", 20, 2);
        if long_period <= short_period {
            long_period = short_period + 1;
        }
        let min_confidence = get_param(&parameters, "minConfidence", 0.6);
        Self {
            template_id: "ma_crossover".to_string(),
            short_period,
            long_period,
            min_confidence,
        }
    }
}

impl super::Strategy for MaCrossoverStrategy {
    fn get_template_id(&self) -> &str {
        &self.template_id
    }

    fn generate_signal(&self, bars: &[Bar], index: usize) -> Option<Signal> {
        if index >= bars.len() {
            return None;
        }
        let bar = &bars[index];
        let closes = closes_for_symbol(bars, &bar.symbol, index);
        // need a bar before the cross plus a full long window
        if closes.len() < self.long_period + 1 {
            return None;
        }

        // the length guard above leaves at least two full windows per average
        let short_sma = simple_moving_average(&closes, self.short_period);
        let long_sma = simple_moving_average(&closes, self.long_period);

        let short_now = short_sma[short_sma.len() - 1];
        let short_prev = short_sma[short_sma.len() - 2];
        let long_now = long_sma[long_sma.len() - 1];
        let long_prev = long_sma[long_sma.len() - 2];

        if !long_now.is_finite() || long_now <= 0.0 {
            return None;
        }

        let spread = (short_now - long_now) / long_now;
        let mut factors = HashMap::new();
        factors.insert("shortSma".to_string(), short_now);
        factors.insert("longSma".to_string(), long_now);
        factors.insert("spread".to_string(), spread);

        let crossed_up = short_prev <= long_prev && short_now > long_now;
        let crossed_down = short_prev >= long_prev && short_now < long_now;

        if crossed_up {
            let confidence = (0.6 + spread.abs() * 20.0).min(1.0);
            return Some(make_signal(
                bar,
                SignalAction::Buy,
                confidence,
                format!(
                    "SMA{} crossed above SMA{}",
                    self.short_period, self.long_period
                ),
                factors,
            ));
        }

        if crossed_down {
            let confidence = (0.6 + spread.abs() * 20.0).min(1.0);
            return Some(make_signal(
                bar,
                SignalAction::Sell,
                confidence,
                format!(
                    "SMA{} crossed below SMA{}",
                    self.short_period, self.long_period
                ),
                factors,
            ));
        }

        None
    }

    fn min_bars(&self) -> usize {
        self.long_period + 1
    }

    fn min_confidence(&self) -> f64 {
        self.min_confidence
    }
}
