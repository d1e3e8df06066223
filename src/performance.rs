use statrs::statistics::Statistics;

use crate::models::{EquityPoint, PerformanceSummary, Trade, EPSILON};

/// Trading periods per year for annualization (A-share trading calendar).
const PERIODS_PER_YEAR: f64 = 240.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// All ratios are fractions, not percentages. An empty equity curve
    /// yields an all-zero summary.
    pub fn calculate_performance(
        trades: &[Trade],
        initial_capital: f64,
        equity_curve: &[EquityPoint],
    ) -> PerformanceSummary {
        let total_trades = trades.len() as i32;
        let mut winning_trades = 0;
        let mut losing_trades = 0;
        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;

        for trade in trades {
            if trade.pnl > 0.0 {
                winning_trades += 1;
                gross_profit += trade.pnl;
            } else if trade.pnl < 0.0 {
                losing_trades += 1;
                gross_loss += -trade.pnl;
            }
        }

        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        // With no losing trades the factor degrades to the raw winning sum,
        // keeping reported results free of NaN/Inf.
        let profit_factor = if gross_loss > EPSILON {
            gross_profit / gross_loss
        } else {
            gross_profit
        };

        let total_return = Self::calculate_total_return(initial_capital, equity_curve);
        let annual_return = Self::calculate_annual_return(total_return, equity_curve);
        let sharpe_ratio = Self::calculate_sharpe_ratio(equity_curve);
        let max_drawdown = Self::calculate_max_drawdown(equity_curve);

        PerformanceSummary {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_return,
            annual_return,
            sharpe_ratio,
            max_drawdown,
            profit_factor,
        }
    }

    fn calculate_total_return(initial_capital: f64, equity_curve: &[EquityPoint]) -> f64 {
        if initial_capital <= EPSILON {
            return 0.0;
        }
        match equity_curve.last() {
            Some(point) => (point.total_equity - initial_capital) / initial_capital,
            None => 0.0,
        }
    }

    /// Compounds the total return over the calendar span of the curve.
    fn calculate_annual_return(total_return: f64, equity_curve: &[EquityPoint]) -> f64 {
        let (first, last) = match (equity_curve.first(), equity_curve.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };
        let days = (last.timestamp - first.timestamp).num_days();
        if days <= 0 {
            return 0.0;
        }
        let growth = 1.0 + total_return;
        if growth <= 0.0 {
            return -1.0;
        }
        growth.powf(365.0 / days as f64) - 1.0
    }

    pub fn calculate_sharpe_ratio(equity_curve: &[EquityPoint]) -> f64 {
        if equity_curve.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|window| {
                let prev = window[0].total_equity;
                let curr = window[1].total_equity;
                if prev > EPSILON {
                    (curr - prev) / prev
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.clone().mean();
        let std_dev = returns.std_dev();
        if !std_dev.is_finite() || std_dev <= EPSILON {
            return 0.0;
        }

        mean_return / std_dev * PERIODS_PER_YEAR.sqrt()
    }

    /// Largest peak-to-trough decline as a positive fraction of the peak.
    pub fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
        let mut peak = match equity_curve.first() {
            Some(point) => point.total_equity,
            None => return 0.0,
        };
        let mut max_drawdown = 0.0;

        for point in equity_curve {
            if point.total_equity > peak {
                peak = point.total_equity;
            } else if peak > EPSILON {
                let drawdown = (peak - point.total_equity) / peak;
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }

        max_drawdown
    }
}
