use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::path::Path;

use crate::commands::{emit_report, log_result_summary};
use crate::config::{BacktestConfig, RiskConfig};
use crate::engine::BacktestEngine;
use crate::market_data::MarketData;
use crate::risk::RiskManager;
use crate::strategy::create_strategy;

pub fn run(
    data_file: &Path,
    template_id: &str,
    parameters: HashMap<String, f64>,
    output: Option<&Path>,
) -> Result<()> {
    info!(
        "Received backtest command for template_id={} using {}",
        template_id,
        data_file.display()
    );
    let data = MarketData::load_from_file(data_file)?;
    info!(
        "Loaded {} bars across {} symbols",
        data.bars().len(),
        data.symbols().len()
    );

    let config = BacktestConfig::from_parameters(&parameters)?;
    let risk_config = RiskConfig::from_parameters(&parameters)?;
    let engine = BacktestEngine::new(config.clone())?;
    let strategy = create_strategy(template_id, parameters.clone())?;
    let risk = RiskManager::new(risk_config, config.initial_capital);

    let mut result = engine.run(strategy.as_ref(), &data, &risk)?;
    result.parameters = parameters;

    log_result_summary(template_id, &result);

    // The report carries the final risk state alongside the result.
    let mut report = serde_json::to_value(&result)?;
    if let Some(fields) = report.as_object_mut() {
        fields.insert(
            "riskStatus".to_string(),
            serde_json::to_value(risk.status())?,
        );
    }
    emit_report(&report, output)
}
