use anyhow::Result;
use log::{info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;

use crate::commands::emit_report;
use crate::market_data::MarketData;
use crate::optimizer::{parameter_signature, run_parameter_sweep, ParameterGrid};
use crate::sweep_status::SweepStatus;

#[allow(clippy::too_many_arguments)]
pub fn run(
    data_file: &Path,
    template_id: &str,
    base_parameters: HashMap<String, f64>,
    grid_json: &str,
    train_ratio: Option<f64>,
    top: usize,
    output: Option<&Path>,
) -> Result<()> {
    let grid = ParameterGrid::from_json(grid_json)?;
    info!(
        "Received sweep command for template_id={} ({} combinations)",
        template_id,
        grid.size()
    );
    if train_ratio.is_none() {
        warn!(
            "Ranking on in-sample results. Prefer --walk-forward to avoid \
             rewarding overfit parameter sets."
        );
    }

    let data = MarketData::load_from_file(data_file)?;
    let status = SweepStatus::new();
    let outcome = run_parameter_sweep(
        template_id,
        &base_parameters,
        &grid,
        &data,
        train_ratio,
        &status,
    )?;

    if outcome.is_empty_handed() {
        warn!("No combination produced trades; nothing to rank.");
    }

    for (rank, run) in outcome.ranked.iter().take(top).enumerate() {
        let perf = &run.result.performance;
        info!(
            "#{} Sharpe {:.4}, return {:.2}%, drawdown {:.2}%, {} trades | {}",
            rank + 1,
            perf.sharpe_ratio,
            perf.total_return * 100.0,
            perf.max_drawdown * 100.0,
            perf.total_trades,
            parameter_signature(&run.result.parameters)
        );
    }

    let ranked: Vec<_> = outcome
        .ranked
        .iter()
        .take(top)
        .map(|run| {
            json!({
                "parameters": run.result.parameters,
                "result": run.result,
                "train": run.train,
            })
        })
        .collect();
    emit_report(
        &json!({
            "templateId": template_id,
            "failedCombinations": outcome.failed,
            "ranked": ranked,
        }),
        output,
    )
}
