use anyhow::Result;
use chrono::{NaiveDate, Utc};
use log::debug;
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::BacktestConfig;
use crate::market_data::MarketData;
use crate::models::{BacktestResult, EquityPoint, ExitReason, SignalAction, EPSILON};
use crate::performance::PerformanceCalculator;
use crate::portfolio::{BuyOutcome, Portfolio};
use crate::risk::{RiskDecision, RiskManager};
use crate::strategy::Strategy;

/// Event-driven replay of a bar series. Exits are evaluated before new
/// entries on every bar, and each buy passes through the risk manager the
/// same way a live order would.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(
        &self,
        strategy: &dyn Strategy,
        data: &MarketData,
        risk: &RiskManager,
    ) -> Result<BacktestResult> {
        let bars = data.bars();
        let start_date = bars[0].timestamp;
        let end_date = bars[bars.len() - 1].timestamp;

        let mut portfolio = Portfolio::new(self.config.clone());
        risk.sync_cash(portfolio.cash());
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());
        let mut buy_rejections: HashMap<String, u64> = HashMap::new();
        let mut current_day: Option<NaiveDate> = None;

        for (index, bar) in bars.iter().enumerate() {
            let day = bar.timestamp.date_naive();
            if current_day != Some(day) {
                risk.reset_daily();
                current_day = Some(day);
            }

            portfolio.mark(&bar.symbol, bar.close);
            let breached = risk.update_prices(&portfolio.mark_prices());

            // Exits first so freed capital is available to later entries.
            if let Some(position) = portfolio.position(&bar.symbol) {
                let pnl_pct = position.unrealized_pnl_percent();
                let exit_reason = if pnl_pct + self.config.stop_loss_pct <= EPSILON {
                    Some(ExitReason::StopLoss)
                } else if pnl_pct - self.config.take_profit_pct >= -EPSILON {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                };
                if let Some(reason) = exit_reason {
                    if let Some(trade) =
                        portfolio.sell(&bar.symbol, bar.close, bar.timestamp, reason)
                    {
                        debug!(
                            "{} exit for {} at {:.2} (pnl {:.2})",
                            reason.as_str(),
                            trade.symbol,
                            trade.exit_price,
                            trade.pnl
                        );
                        risk.position_closed(&trade.symbol);
                        risk.sync_cash(portfolio.cash());
                    }
                }
            }

            // The risk stop can be tighter than the engine's own stop; close
            // whatever it flags that the direct check above left open.
            for symbol in breached {
                if let Some(position) = portfolio.position(&symbol) {
                    let mark_price = position.mark_price;
                    if let Some(trade) =
                        portfolio.sell(&symbol, mark_price, bar.timestamp, ExitReason::StopLoss)
                    {
                        risk.position_closed(&trade.symbol);
                        risk.sync_cash(portfolio.cash());
                    }
                }
            }

            // No signal requests until the strategy's warm-up is filled.
            let warmed_up = index + 1 >= strategy.min_bars();

            if let Some(signal) = warmed_up
                .then(|| strategy.generate_signal(bars, index))
                .flatten()
            {
                match signal.action {
                    SignalAction::Buy => {
                        // buys for an already-open symbol are ignored
                        if signal.confidence + EPSILON >= strategy.min_confidence()
                            && !portfolio.has_position(&bar.symbol)
                        {
                            let proposed_value =
                                portfolio.total_equity() * self.config.position_size_ratio;
                            let sector = data.sector_of(&bar.symbol);
                            match risk.check_buy_signal(
                                &bar.symbol,
                                proposed_value,
                                sector,
                                bar.timestamp,
                            ) {
                                RiskDecision::Allow => match portfolio.buy(
                                    &bar.symbol,
                                    bar.close,
                                    bar.timestamp,
                                    self.config.position_size_ratio,
                                ) {
                                    BuyOutcome::Filled {
                                        quantity,
                                        fill_price,
                                        ..
                                    } => {
                                        debug!(
                                            "Opened {} x{} at {:.2} ({})",
                                            bar.symbol, quantity, fill_price, signal.reason
                                        );
                                        risk.position_opened(
                                            &bar.symbol,
                                            fill_price,
                                            quantity,
                                            sector,
                                        );
                                        risk.sync_cash(portfolio.cash());
                                    }
                                    BuyOutcome::Rejected(rejection) => {
                                        *buy_rejections
                                            .entry(rejection.as_str().to_string())
                                            .or_insert(0) += 1;
                                    }
                                },
                                RiskDecision::Reject(rejection) => {
                                    debug!("Risk rejected buy for {}: {}", bar.symbol, rejection);
                                    *buy_rejections
                                        .entry(rejection.code().to_string())
                                        .or_insert(0) += 1;
                                }
                            }
                        }
                    }
                    SignalAction::Sell => {
                        if let Some(trade) = portfolio.sell(
                            &bar.symbol,
                            bar.close,
                            bar.timestamp,
                            ExitReason::Signal,
                        ) {
                            debug!(
                                "Signal exit for {} at {:.2} (pnl {:.2})",
                                trade.symbol, trade.exit_price, trade.pnl
                            );
                            risk.position_closed(&trade.symbol);
                            risk.sync_cash(portfolio.cash());
                        }
                    }
                    SignalAction::Hold => {}
                }
            }

            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                total_equity: portfolio.total_equity(),
                cash: portfolio.cash(),
                positions_value: portfolio.positions_value(),
            });
        }

        // Force-close whatever is still open at the final mark.
        for symbol in portfolio.open_symbols() {
            if let Some(position) = portfolio.position(&symbol) {
                let mark_price = position.mark_price;
                if let Some(trade) =
                    portfolio.sell(&symbol, mark_price, end_date, ExitReason::EndOfBacktest)
                {
                    risk.position_closed(&trade.symbol);
                    risk.sync_cash(portfolio.cash());
                }
            }
        }
        if let Some(last) = equity_curve.last_mut() {
            last.total_equity = portfolio.total_equity();
            last.cash = portfolio.cash();
            last.positions_value = portfolio.positions_value();
        }

        let final_equity = portfolio.total_equity();
        let trades = portfolio.into_trades();
        let performance = PerformanceCalculator::calculate_performance(
            &trades,
            self.config.initial_capital,
            &equity_curve,
        );

        Ok(BacktestResult {
            id: Uuid::new_v4().to_string(),
            strategy_name: strategy.get_template_id().to_string(),
            start_date,
            end_date,
            initial_capital: self.config.initial_capital,
            final_equity,
            performance,
            trades,
            equity_curve,
            parameters: HashMap::new(),
            buy_rejections,
            created_at: Utc::now(),
        })
    }
}
