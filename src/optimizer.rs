use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::thread;

use crate::config::{BacktestConfig, RiskConfig};
use crate::engine::BacktestEngine;
use crate::market_data::MarketData;
use crate::models::{SweepRun, SweepTask, SweepTaskResult, EPSILON};
use crate::risk::RiskManager;
use crate::strategy::create_strategy;
use crate::sweep_status::SweepStatus;
use crate::walk_forward::run_walk_forward;

/// Cartesian parameter grid. Axis order is fixed at construction so the
/// combination order (and therefore tie-breaking) is deterministic.
#[derive(Debug, Clone, Default)]
pub struct ParameterGrid {
    axes: Vec<(String, Vec<f64>)>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_axis<S: Into<String>>(mut self, name: S, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if values.is_empty() {
            return Err(anyhow!("Grid axis '{}' has no values", name));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(anyhow!("Grid axis '{}' has non-finite value {}", name, bad));
        }
        if self.axes.iter().any(|(existing, _)| existing == &name) {
            return Err(anyhow!("Grid axis '{}' is defined twice", name));
        }
        self.axes.push((name, values));
        Ok(self)
    }

    /// Parses `{"name": [v1, v2, ...], ...}`. Axes are sorted by name so the
    /// combination order does not depend on JSON map iteration order.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<Value>> =
            serde_json::from_str(json).map_err(|error| anyhow!("Invalid grid JSON: {}", error))?;
        let mut names: Vec<String> = raw.keys().cloned().collect();
        names.sort();

        let mut grid = Self::new();
        for name in names {
            let values = raw[&name]
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| anyhow!("Grid axis '{}' has non-numeric value", name))
                })
                .collect::<Result<Vec<f64>>>()?;
            grid = grid.with_axis(name, values)?;
        }
        Ok(grid)
    }

    pub fn size(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|(_, values)| values.len()).product()
    }

    /// All combinations in odometer order: the last axis varies fastest.
    pub fn combinations(&self) -> Vec<HashMap<String, f64>> {
        if self.axes.is_empty() {
            return Vec::new();
        }
        let mut combos = vec![HashMap::new()];
        for (name, values) in &self.axes {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values {
                    let mut expanded = combo.clone();
                    expanded.insert(name.clone(), *value);
                    next.push(expanded);
                }
            }
            combos = next;
        }
        combos
    }
}

#[derive(Debug)]
pub struct SweepOutcome {
    /// Runs ranked by Sharpe ratio descending; grid order breaks ties.
    pub ranked: Vec<SweepRun>,
    pub failed: usize,
}

impl SweepOutcome {
    pub fn best(&self) -> Option<&SweepRun> {
        self.ranked.first()
    }

    /// True when no combination produced a usable result: every run failed
    /// or closed zero trades.
    pub fn is_empty_handed(&self) -> bool {
        self.ranked
            .iter()
            .all(|run| run.result.performance.total_trades == 0)
    }
}

fn run_single_combination(
    template_id: &str,
    parameters: &HashMap<String, f64>,
    data: &MarketData,
    train_ratio: Option<f64>,
) -> Result<SweepRun> {
    let config = BacktestConfig::from_parameters(parameters)?;
    let risk_config = RiskConfig::from_parameters(parameters)?;

    if let Some(ratio) = train_ratio {
        let report = run_walk_forward(
            &config,
            &risk_config,
            template_id,
            parameters,
            data,
            ratio,
        )?;
        return Ok(SweepRun {
            result: report.test,
            train: Some(report.train),
        });
    }

    let engine = BacktestEngine::new(config.clone())?;
    let strategy = create_strategy(template_id, parameters.clone())?;
    let risk = RiskManager::new(risk_config, config.initial_capital);
    let mut result = engine.run(strategy.as_ref(), data, &risk)?;
    result.parameters = parameters.clone();
    Ok(SweepRun {
        result,
        train: None,
    })
}

/// Runs every grid combination over the same market data on a worker pool
/// and ranks the outcomes by Sharpe ratio. With `train_ratio` set, each
/// combination is walk-forward validated and ranked on its out-of-sample
/// segment. Individual failures are counted, not fatal.
pub fn run_parameter_sweep(
    template_id: &str,
    base_parameters: &HashMap<String, f64>,
    grid: &ParameterGrid,
    data: &MarketData,
    train_ratio: Option<f64>,
    status: &SweepStatus,
) -> Result<SweepOutcome> {
    let combinations = grid.combinations();
    if combinations.is_empty() {
        return Err(anyhow!("Parameter grid is empty"));
    }
    let combo_count = combinations.len();
    info!(
        "Running {} parameter combinations for template {}",
        combo_count, template_id
    );
    status.set_phase("Running backtests");
    status.set_progress(combo_count, 0, 0, None);

    let num_workers = std::cmp::min(combo_count, std::cmp::max(1, num_cpus::get()));
    info!("Using {} worker threads", num_workers);

    let (tx, rx): (Sender<SweepTask>, Receiver<SweepTask>) = bounded(combo_count);
    let (result_tx, result_rx): (Sender<SweepTaskResult>, Receiver<SweepTaskResult>) =
        bounded(combo_count);

    let mut handles = Vec::new();
    for _worker_id in 0..num_workers {
        let rx = rx.clone();
        let result_tx = result_tx.clone();
        let data = data.clone();
        let template_id = template_id.to_string();

        let handle = thread::spawn(move || {
            while let Ok(task) = rx.recv() {
                let outcome =
                    run_single_combination(&template_id, &task.parameters, &data, train_ratio);
                let task_result = SweepTaskResult {
                    combo_index: task.combo_index,
                    parameters: task.parameters,
                    outcome,
                };
                if result_tx.send(task_result).is_err() {
                    break;
                }
            }
        });
        handles.push(handle);
    }

    for (combo_index, combination) in combinations.into_iter().enumerate() {
        let mut parameters = base_parameters.clone();
        parameters.extend(combination);
        tx.send(SweepTask {
            combo_index,
            parameters,
        })?;
    }

    drop(tx);
    drop(result_tx);

    let pb = ProgressBar::new(combo_count as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut runs: Vec<(usize, SweepRun)> = Vec::with_capacity(combo_count);
    let mut completed = 0;
    let mut failed = 0;
    let mut best_sharpe: Option<f64> = None;

    while completed < combo_count {
        match result_rx.recv_timeout(std::time::Duration::from_millis(200)) {
            Ok(task_result) => {
                completed += 1;
                pb.set_position(completed as u64);
                match task_result.outcome {
                    Ok(run) => {
                        let sharpe = run.result.performance.sharpe_ratio;
                        if best_sharpe.map_or(true, |best| sharpe > best) {
                            best_sharpe = Some(sharpe);
                        }
                        runs.push((task_result.combo_index, run));
                    }
                    Err(error) => {
                        failed += 1;
                        warn!(
                            "Combination {} failed: {} (parameters: {})",
                            task_result.combo_index,
                            error,
                            parameter_signature(&task_result.parameters)
                        );
                    }
                }
                status.set_progress(combo_count, completed, failed, best_sharpe);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                warn!("Result channel closed unexpectedly. Some results may be lost.");
                break;
            }
        }
    }

    if failed > 0 {
        warn!("Sweep completed with {} failed combinations", failed);
        pb.finish_with_message("Sweep completed with errors");
    } else {
        pb.finish_with_message("Sweep completed");
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // grid order first, then a stable sort by Sharpe keeps ties in grid order
    runs.sort_by_key(|(combo_index, _)| *combo_index);
    let mut ranked: Vec<SweepRun> = runs.into_iter().map(|(_, run)| run).collect();
    ranked.sort_by(|a, b| {
        b.result
            .performance
            .sharpe_ratio
            .partial_cmp(&a.result.performance.sharpe_ratio)
            .unwrap_or(Ordering::Equal)
    });

    status.set_phase("Completed");
    let outcome = SweepOutcome { ranked, failed };
    if outcome.is_empty_handed() {
        warn!("Sweep produced no usable results (all combinations failed or traded nothing)");
    } else if let Some(best) = outcome.best() {
        info!(
            "Best Sharpe {:.4} with parameters {}",
            best.result.performance.sharpe_ratio,
            parameter_signature(&best.result.parameters)
        );
    }
    Ok(outcome)
}

/// Stable textual identity for a parameter set, used in logs.
pub fn parameter_signature(parameters: &HashMap<String, f64>) -> String {
    let mut sorted: Vec<_> = parameters.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .into_iter()
        .map(|(key, value)| {
            if value.fract().abs() < EPSILON {
                format!("{}={}", key, *value as i64)
            } else {
                format!("{}={:.4}", key, value)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
