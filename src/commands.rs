#[path = "commands/backtest.rs"]
pub mod backtest;

#[path = "commands/walk_forward.rs"]
pub mod walk_forward;

#[path = "commands/sweep.rs"]
pub mod sweep;

use anyhow::Result;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::models::BacktestResult;

/// Writes the report to `output` as pretty JSON, or to stdout when no path
/// is given.
pub fn emit_report<T: Serialize>(report: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            fs::write(path, &json)?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub fn log_result_summary(label: &str, result: &BacktestResult) {
    let perf = &result.performance;
    info!(
        "{}: return {:.2}% (annualized {:.2}%), Sharpe {:.4}, max drawdown {:.2}%, \
         {} trades, win rate {:.1}%, final equity {:.2}",
        label,
        perf.total_return * 100.0,
        perf.annual_return * 100.0,
        perf.sharpe_ratio,
        perf.max_drawdown * 100.0,
        perf.total_trades,
        perf.win_rate * 100.0,
        result.final_equity
    );
    if !result.buy_rejections.is_empty() {
        let mut rejections: Vec<_> = result.buy_rejections.iter().collect();
        rejections.sort();
        let summary = rejections
            .iter()
            .map(|(code, count)| format!("{}={}", code, count))
            .collect::<Vec<_>>()
            .join(", ");
        info!("{}: rejected buys: {}", label, summary);
    }
}
