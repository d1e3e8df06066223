use anyhow::{anyhow, Result};
use log::info;
use std::collections::HashMap;

use crate::config::{require_train_ratio, BacktestConfig, RiskConfig};
use crate::engine::BacktestEngine;
use crate::market_data::MarketData;
use crate::models::BacktestResult;
use crate::risk::RiskManager;
use crate::strategy::create_strategy;

#[derive(Debug, Clone)]
pub struct WalkForwardReport {
    pub train: BacktestResult,
    pub test: BacktestResult,
    pub split_index: usize,
}

/// First index of the test segment for a series of `len` bars.
pub fn split_index(len: usize, train_ratio: f64) -> Result<usize> {
    let ratio = require_train_ratio(train_ratio)?;
    let split = (len as f64 * ratio).floor() as usize;
    if split == 0 || split >= len {
        return Err(anyhow!(
            "Train ratio {} leaves an empty segment for {} bars",
            ratio,
            len
        ));
    }
    Ok(split)
}

/// Splits the series chronologically, runs the strategy on each segment with
/// a fresh portfolio and risk manager, and reports both results. Only the
/// out-of-sample result is an honest estimate; the train result is kept for
/// comparison.
pub fn run_walk_forward(
    config: &BacktestConfig,
    risk_config: &RiskConfig,
    template_id: &str,
    parameters: &HashMap<String, f64>,
    data: &MarketData,
    train_ratio: f64,
) -> Result<WalkForwardReport> {
    let bars = data.bars();
    let split = split_index(bars.len(), train_ratio)?;
    let sector_map = data.sector_map_arc();

    let train_data =
        MarketData::from_bars(bars[..split].to_vec(), sector_map.as_ref().clone())?;
    let test_data = MarketData::from_bars(bars[split..].to_vec(), sector_map.as_ref().clone())?;

    info!(
        "Walk-forward split: {} train bars, {} test bars (ratio {:.2})",
        split,
        bars.len() - split,
        train_ratio
    );

    let engine = BacktestEngine::new(config.clone())?;

    let train_strategy = create_strategy(template_id, parameters.clone())?;
    let train_risk = RiskManager::new(risk_config.clone(), config.initial_capital);
    let mut train = engine.run(train_strategy.as_ref(), &train_data, &train_risk)?;
    train.parameters = parameters.clone();

    let test_strategy = create_strategy(template_id, parameters.clone())?;
    let test_risk = RiskManager::new(risk_config.clone(), config.initial_capital);
    let mut test = engine.run(test_strategy.as_ref(), &test_data, &test_risk)?;
    test.parameters = parameters.clone();

    Ok(WalkForwardReport {
        train,
        test,
        split_index: split,
    })
}
