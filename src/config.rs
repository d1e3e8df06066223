use anyhow::{anyhow, Result};
use std::collections::HashMap;

use crate::models::LOT_SIZE;
use crate::param_utils::{get_param, get_usize_param_min};

/// Simulation configuration. Rates are fractions, not percentages.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Charged on both buy and sell fills.
    pub commission_rate: f64,
    /// Charged on sell fills only.
    pub stamp_tax_rate: f64,
    /// Buys fill above close, sells fill below.
    pub slippage_rate: f64,
    /// Fraction of current equity committed per new position.
    pub position_size_ratio: f64,
    pub max_positions: usize,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub lot_size: i64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            commission_rate: 0.0003,
            stamp_tax_rate: 0.001,
            slippage_rate: 0.001,
            position_size_ratio: 0.2,
            max_positions: 5,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.15,
            lot_size: LOT_SIZE,
        }
    }
}

impl BacktestConfig {
    /// Build a config from a parameter map, falling back to defaults for
    /// missing keys. Fails fast on out-of-range values.
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Result<Self> {
        let config = Self {
            initial_capital: get_param(parameters, "initialCapital", 100_000.0),
            commission_rate: get_param(parameters, "commissionRate", 0.0003),
            stamp_tax_rate: get_param(parameters, "stampTaxRate", 0.001),
            slippage_rate: get_param(parameters, "slippageRate", 0.001),
            position_size_ratio: get_param(parameters, "positionSizeRatio", 0.2),
            max_positions: get_usize_param_min(parameters, "maxPositions", 5, 1),
            stop_loss_pct: get_param(parameters, "stopLossPct", 0.05),
            take_profit_pct: get_param(parameters, "takeProfitPct", 0.15),
            lot_size: get_usize_param_min(parameters, "lotSize", LOT_SIZE as usize, 1) as i64,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("initialCapital", self.initial_capital)?;
        require_rate("commissionRate", self.commission_rate)?;
        require_rate("stampTaxRate", self.stamp_tax_rate)?;
        require_rate("slippageRate", self.slippage_rate)?;
        require_fraction("positionSizeRatio", self.position_size_ratio)?;
        require_fraction("stopLossPct", self.stop_loss_pct)?;
        require_positive("takeProfitPct", self.take_profit_pct)?;
        if self.max_positions == 0 {
            return Err(anyhow!("maxPositions must be >= 1"));
        }
        if self.lot_size < 1 {
            return Err(anyhow!("lotSize must be >= 1 (value: {})", self.lot_size));
        }
        Ok(())
    }
}

/// Risk manager configuration, validated at construction.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Per-position loss fraction that flags a breach.
    pub stop_loss_pct: f64,
    /// Intraday drawdown fraction that trips the circuit breaker.
    pub daily_drawdown_limit: f64,
    /// Maximum proposed value as a fraction of current capital.
    pub max_single_position_pct: f64,
    /// Distinct symbols allowed per sector.
    pub max_sector_stocks: usize,
    /// Accepted buy signals per rolling second.
    pub max_signals_per_sec: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.05,
            daily_drawdown_limit: 0.03,
            max_single_position_pct: 0.2,
            max_sector_stocks: 3,
            max_signals_per_sec: 10,
        }
    }
}

impl RiskConfig {
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Result<Self> {
        let config = Self {
            stop_loss_pct: get_param(parameters, "riskStopLossPct", 0.05),
            daily_drawdown_limit: get_param(parameters, "dailyDrawdownLimit", 0.03),
            max_single_position_pct: get_param(parameters, "maxSinglePositionPct", 0.2),
            max_sector_stocks: get_usize_param_min(parameters, "maxSectorStocks", 3, 1),
            max_signals_per_sec: get_usize_param_min(parameters, "maxSignalsPerSec", 10, 1),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        require_fraction("riskStopLossPct", self.stop_loss_pct)?;
        require_fraction("dailyDrawdownLimit", self.daily_drawdown_limit)?;
        require_fraction("maxSinglePositionPct", self.max_single_position_pct)?;
        if self.max_sector_stocks == 0 {
            return Err(anyhow!("maxSectorStocks must be >= 1"));
        }
        if self.max_signals_per_sec == 0 {
            return Err(anyhow!("maxSignalsPerSec must be >= 1"));
        }
        Ok(())
    }
}

/// Fraction of a split reserved for the training segment.
pub const DEFAULT_TRAIN_RATIO: f64 = 0.7;

pub fn require_train_ratio(value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 || value >= 1.0 {
        return Err(anyhow!(
            "trainRatio must be strictly between 0 and 1 (value: {})",
            value
        ));
    }
    Ok(value)
}

fn require_positive(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(anyhow!("{} must be a positive number (value: {})", key, value));
    }
    Ok(())
}

fn require_rate(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..1.0).contains(&value) {
        return Err(anyhow!(
            "{} must be a fraction in [0, 1) (value: {})",
            key,
            value
        ));
    }
    Ok(())
}

fn require_fraction(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(anyhow!(
            "{} must be a fraction in (0, 1] (value: {})",
            key,
            value
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BacktestConfig::default().validate().is_ok());
        assert!(RiskConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_parameters_overrides() {
        let mut params = HashMap::new();
        params.insert("initialCapital".to_string(), 50_000.0);
        params.insert("maxPositions".to_string(), 3.0);
        params.insert("commissionRate".to_string(), 0.001);
        let config = BacktestConfig::from_parameters(&params).unwrap();
        assert_eq!(config.initial_capital, 50_000.0);
        assert_eq!(config.max_positions, 3);
        assert_eq!(config.commission_rate, 0.001);
        assert_eq!(config.stamp_tax_rate, 0.001);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut params = HashMap::new();
        params.insert("positionSizeRatio".to_string(), 1.5);
        assert!(BacktestConfig::from_parameters(&params).is_err());

        let mut params = HashMap::new();
        params.insert("initialCapital".to_string(), -1.0);
        assert!(BacktestConfig::from_parameters(&params).is_err());

        let mut params = HashMap::new();
        params.insert("dailyDrawdownLimit".to_string(), 0.0);
        assert!(RiskConfig::from_parameters(&params).is_err());
    }

    #[test]
    fn test_train_ratio_bounds() {
        assert!(require_train_ratio(0.7).is_ok());
        assert!(require_train_ratio(0.0).is_err());
        assert!(require_train_ratio(1.0).is_err());
        assert!(require_train_ratio(f64::NAN).is_err());
    }
}
