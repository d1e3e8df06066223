use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::BacktestConfig;
use crate::models::{ExitReason, Trade, EPSILON};

/// An open long position. `entry_price` is the volume-weighted average fill
/// including slippage; entry-side fees accumulate separately so the closing
/// trade can report total costs.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub mark_price: f64,
    pub entry_commission: f64,
}

impl Position {
    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.mark_price
    }

    pub fn cost_basis(&self) -> f64 {
        self.quantity as f64 * self.entry_price
    }

    pub fn unrealized_pnl_percent(&self) -> f64 {
        let basis = self.cost_basis();
        if basis <= EPSILON {
            return 0.0;
        }
        (self.market_value() - basis) / basis
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyRejection {
    /// Budget buys less than one board lot at the fill price.
    LotTooSmall,
    MaxPositionsReached,
    InsufficientCash,
}

impl BuyRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuyRejection::LotTooSmall => "lot_too_small",
            BuyRejection::MaxPositionsReached => "max_positions",
            BuyRejection::InsufficientCash => "insufficient_cash",
        }
    }
}

#[derive(Debug, Clone)]
pub enum BuyOutcome {
    Filled {
        quantity: i64,
        fill_price: f64,
        cost: f64,
        commission: f64,
    },
    Rejected(BuyRejection),
}

/// Cash plus open positions. All fills flow through here so the cash
/// invariant (never negative) holds by construction.
#[derive(Debug, Clone)]
pub struct Portfolio {
    config: BacktestConfig,
    cash: f64,
    positions: HashMap<String, Position>,
    trades: Vec<Trade>,
}

impl Portfolio {
    pub fn new(config: BacktestConfig) -> Self {
        let cash = config.initial_capital;
        Self {
            config,
            cash,
            positions: HashMap::new(),
            trades: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    /// Symbols with open positions, sorted for deterministic iteration.
    pub fn open_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.positions.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn positions_value(&self) -> f64 {
        self.positions.values().map(|p| p.market_value()).sum()
    }

    pub fn total_equity(&self) -> f64 {
        self.cash + self.positions_value()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<Trade> {
        self.trades
    }

    pub fn mark(&mut self, symbol: &str, price: f64) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.mark_price = price;
        }
    }

    /// Current mark prices for every open position.
    pub fn mark_prices(&self) -> HashMap<String, f64> {
        self.positions
            .iter()
            .map(|(symbol, position)| (symbol.clone(), position.mark_price))
            .collect()
    }

    /// Attempts to open or add to a position at the bar close. The budget is
    /// `capital_fraction` of current total equity; the fill price includes
    /// slippage and the quantity is rounded down to whole lots.
    pub fn buy(
        &mut self,
        symbol: &str,
        close_price: f64,
        timestamp: DateTime<Utc>,
        capital_fraction: f64,
    ) -> BuyOutcome {
        let fill_price = close_price * (1.0 + self.config.slippage_rate);
        let budget = self.total_equity() * capital_fraction;
        let lot = self.config.lot_size;
        let lot_cost = fill_price * lot as f64;
        if lot_cost <= EPSILON {
            return BuyOutcome::Rejected(BuyRejection::LotTooSmall);
        }

        let lots = (budget / lot_cost).floor() as i64;
        let quantity = lots * lot;
        if quantity < lot {
            return BuyOutcome::Rejected(BuyRejection::LotTooSmall);
        }

        if !self.positions.contains_key(symbol)
            && self.positions.len() >= self.config.max_positions
        {
            return BuyOutcome::Rejected(BuyRejection::MaxPositionsReached);
        }

        let cost = quantity as f64 * fill_price;
        let commission = cost * self.config.commission_rate;
        if cost + commission > self.cash + EPSILON {
            return BuyOutcome::Rejected(BuyRejection::InsufficientCash);
        }

        self.cash -= cost + commission;
        match self.positions.get_mut(symbol) {
            Some(position) => {
                let total_quantity = position.quantity + quantity;
                position.entry_price = (position.cost_basis() + cost) / total_quantity as f64;
                position.quantity = total_quantity;
                position.mark_price = close_price;
                position.entry_commission += commission;
            }
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        quantity,
                        entry_price: fill_price,
                        entry_timestamp: timestamp,
                        mark_price: close_price,
                        entry_commission: commission,
                    },
                );
            }
        }

        BuyOutcome::Filled {
            quantity,
            fill_price,
            cost,
            commission,
        }
    }

    /// Closes the full position at the bar close. Sell fills slip downward
    /// and pay commission plus stamp tax. Returns the realized trade, or
    /// None when no position is open.
    pub fn sell(
        &mut self,
        symbol: &str,
        close_price: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
    ) -> Option<Trade> {
        let position = self.positions.remove(symbol)?;

        let fill_price = close_price * (1.0 - self.config.slippage_rate);
        let proceeds = position.quantity as f64 * fill_price;
        let commission = proceeds * self.config.commission_rate;
        let stamp_tax = proceeds * self.config.stamp_tax_rate;
        self.cash += proceeds - commission - stamp_tax;

        let total_fees = position.entry_commission + commission + stamp_tax;
        let pnl = proceeds - commission - stamp_tax - position.cost_basis()
            - position.entry_commission;
        let basis = position.cost_basis();
        let pnl_percent = if basis > EPSILON { pnl / basis } else { 0.0 };

        let trade = Trade {
            symbol: position.symbol,
            quantity: position.quantity,
            entry_price: position.entry_price,
            entry_timestamp: position.entry_timestamp,
            exit_price: fill_price,
            exit_timestamp: timestamp,
            pnl,
            pnl_percent,
            commission_paid: total_fees,
            exit_reason: reason,
        };
        self.trades.push(trade.clone());
        Some(trade)
    }
}
