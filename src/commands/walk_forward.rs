use anyhow::Result;
use log::info;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;

use crate::commands::{emit_report, log_result_summary};
use crate::config::{BacktestConfig, RiskConfig};
use crate::market_data::MarketData;
use crate::walk_forward::run_walk_forward;

pub fn run(
    data_file: &Path,
    template_id: &str,
    parameters: HashMap<String, f64>,
    train_ratio: f64,
    output: Option<&Path>,
) -> Result<()> {
    info!(
        "Received walk-forward command for template_id={} (train ratio {:.2})",
        template_id, train_ratio
    );
    let data = MarketData::load_from_file(data_file)?;
    let config = BacktestConfig::from_parameters(&parameters)?;
    let risk_config = RiskConfig::from_parameters(&parameters)?;

    let report = run_walk_forward(
        &config,
        &risk_config,
        template_id,
        &parameters,
        &data,
        train_ratio,
    )?;

    log_result_summary("train", &report.train);
    log_result_summary("test", &report.test);
    let degradation =
        report.train.performance.sharpe_ratio - report.test.performance.sharpe_ratio;
    info!(
        "Out-of-sample Sharpe degradation: {:.4} (train {:.4} vs test {:.4})",
        degradation, report.train.performance.sharpe_ratio, report.test.performance.sharpe_ratio
    );

    emit_report(
        &json!({
            "splitIndex": report.split_index,
            "train": report.train,
            "test": report.test,
        }),
        output,
    )
}
