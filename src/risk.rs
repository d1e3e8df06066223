use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::config::RiskConfig;
use crate::models::EPSILON;

/// Rolling window for the signal throttle.
const THROTTLE_WINDOW_MS: i64 = 1_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),
    #[error("daily circuit breaker active (drawdown {drawdown:.4} > limit {limit:.4})")]
    CircuitBreaker { drawdown: f64, limit: f64 },
    #[error("proposed value {proposed:.2} exceeds {limit_pct:.2}% of initial capital {capital:.2}")]
    PositionSizeExceeded {
        proposed: f64,
        capital: f64,
        limit_pct: f64,
    },
    #[error("sector '{sector}' already holds {held} of {max} allowed symbols")]
    SectorLimitReached {
        sector: String,
        held: usize,
        max: usize,
    },
    #[error("signal throttle: {accepted} accepted within the last second (max {max})")]
    Throttled { accepted: usize, max: usize },
}

impl RiskRejection {
    pub fn code(&self) -> &'static str {
        match self {
            RiskRejection::InvalidProposal(_) => "reject_invalid",
            RiskRejection::CircuitBreaker { .. } => "reject_circuit_breaker",
            RiskRejection::PositionSizeExceeded { .. } => "reject_position_size",
            RiskRejection::SectorLimitReached { .. } => "reject_sector_limit",
            RiskRejection::Throttled { .. } => "reject_rate_limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Allow,
    Reject(RiskRejection),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allow)
    }
}

#[derive(Debug, Clone)]
struct TrackedPosition {
    entry_price: f64,
    quantity: i64,
    mark_price: f64,
    sector: Option<String>,
}

impl TrackedPosition {
    fn unrealized_loss_fraction(&self) -> f64 {
        if self.entry_price <= EPSILON {
            return 0.0;
        }
        (self.mark_price - self.entry_price) / self.entry_price
    }
}

#[derive(Debug)]
struct RiskState {
    cash: f64,
    positions: HashMap<String, TrackedPosition>,
    daily_high_capital: f64,
    circuit_breaker_active: bool,
    accepted_signals: VecDeque<DateTime<Utc>>,
}

impl RiskState {
    fn capital(&self) -> f64 {
        self.cash
            + self
                .positions
                .values()
                .map(|p| p.quantity as f64 * p.mark_price)
                .sum::<f64>()
    }

    fn drawdown(&self) -> f64 {
        if self.daily_high_capital <= EPSILON {
            return 0.0;
        }
        ((self.daily_high_capital - self.capital()) / self.daily_high_capital).max(0.0)
    }

    fn refresh_high_water_mark(&mut self) {
        let capital = self.capital();
        if capital > self.daily_high_capital {
            self.daily_high_capital = capital;
        }
    }
}

/// Snapshot of risk state for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskStatus {
    pub capital: f64,
    pub daily_high_capital: f64,
    pub drawdown: f64,
    pub circuit_breaker_active: bool,
    pub position_count: usize,
    pub sector_counts: HashMap<String, usize>,
}

/// Thread-safe pre-trade gate. One instance serves both the simulation loop
/// and any concurrent callers; all state lives behind a single mutex so each
/// decision sees a consistent view.
#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
    initial_capital: f64,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, initial_capital: f64) -> Self {
        Self {
            config,
            initial_capital,
            state: Mutex::new(RiskState {
                cash: initial_capital,
                positions: HashMap::new(),
                daily_high_capital: initial_capital,
                circuit_breaker_active: false,
                accepted_signals: VecDeque::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RiskState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Evaluates a proposed buy. Checks run in a fixed order: input
    /// validation, circuit breaker, position size, sector limit, throttle.
    /// The first failing check wins and the throttle window only records
    /// accepted signals.
    pub fn check_buy_signal(
        &self,
        symbol: &str,
        proposed_value: f64,
        sector: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> RiskDecision {
        if symbol.trim().is_empty() {
            return RiskDecision::Reject(RiskRejection::InvalidProposal(
                "empty symbol".to_string(),
            ));
        }
        if !proposed_value.is_finite() || proposed_value <= 0.0 {
            return RiskDecision::Reject(RiskRejection::InvalidProposal(format!(
                "proposed value must be a positive number (value: {})",
                proposed_value
            )));
        }
        if proposed_value - self.initial_capital > EPSILON {
            return RiskDecision::Reject(RiskRejection::InvalidProposal(format!(
                "proposed value {:.2} exceeds initial capital {:.2}",
                proposed_value, self.initial_capital
            )));
        }

        let mut state = self.lock_state();

        // Recompute drawdown against the intraday high before deciding.
        state.refresh_high_water_mark();
        let drawdown = state.drawdown();
        if drawdown - self.config.daily_drawdown_limit > EPSILON {
            state.circuit_breaker_active = true;
        }
        if state.circuit_breaker_active {
            return RiskDecision::Reject(RiskRejection::CircuitBreaker {
                drawdown,
                limit: self.config.daily_drawdown_limit,
            });
        }

        // Sizing is anchored to initial capital, not the marked book.
        let max_value = self.initial_capital * self.config.max_single_position_pct;
        if proposed_value - max_value > EPSILON {
            return RiskDecision::Reject(RiskRejection::PositionSizeExceeded {
                proposed: proposed_value,
                capital: self.initial_capital,
                limit_pct: self.config.max_single_position_pct * 100.0,
            });
        }

        if let Some(sector) = sector {
            let held = state
                .positions
                .iter()
                .filter(|(held_symbol, position)| {
                    held_symbol.as_str() != symbol
                        && position.sector.as_deref() == Some(sector)
                })
                .count();
            if held >= self.config.max_sector_stocks {
                return RiskDecision::Reject(RiskRejection::SectorLimitReached {
                    sector: sector.to_string(),
                    held,
                    max: self.config.max_sector_stocks,
                });
            }
        }

        let window_start = timestamp - Duration::milliseconds(THROTTLE_WINDOW_MS);
        while let Some(front) = state.accepted_signals.front() {
            if *front <= window_start {
                state.accepted_signals.pop_front();
            } else {
                break;
            }
        }
        let accepted = state.accepted_signals.len();
        if accepted >= self.config.max_signals_per_sec {
            return RiskDecision::Reject(RiskRejection::Throttled {
                accepted,
                max: self.config.max_signals_per_sec,
            });
        }

        state.accepted_signals.push_back(timestamp);
        RiskDecision::Allow
    }

    /// Marks open positions to the given prices and returns symbols whose
    /// unrealized loss breaches the per-position stop. The caller closes
    /// them; this only reports.
    pub fn update_prices(&self, prices: &HashMap<String, f64>) -> Vec<String> {
        let mut state = self.lock_state();
        let mut breached = Vec::new();

        for (symbol, price) in prices {
            if !price.is_finite() || *price <= 0.0 {
                warn!("Ignoring unusable mark price {} for {}", price, symbol);
                continue;
            }
            if let Some(position) = state.positions.get_mut(symbol) {
                position.mark_price = *price;
                if position.unrealized_loss_fraction() + self.config.stop_loss_pct <= EPSILON {
                    breached.push(symbol.clone());
                }
            }
        }

        state.refresh_high_water_mark();
        let drawdown = state.drawdown();
        if drawdown - self.config.daily_drawdown_limit > EPSILON {
            state.circuit_breaker_active = true;
        }

        breached.sort();
        breached
    }

    /// Records a fill the ledger has executed.
    pub fn position_opened(
        &self,
        symbol: &str,
        entry_price: f64,
        quantity: i64,
        sector: Option<&str>,
    ) {
        let mut state = self.lock_state();
        match state.positions.get_mut(symbol) {
            Some(position) => {
                let total = position.quantity + quantity;
                if total > 0 {
                    position.entry_price = (position.entry_price * position.quantity as f64
                        + entry_price * quantity as f64)
                        / total as f64;
                }
                position.quantity = total;
                position.mark_price = entry_price;
            }
            None => {
                state.positions.insert(
                    symbol.to_string(),
                    TrackedPosition {
                        entry_price,
                        quantity,
                        mark_price: entry_price,
                        sector: sector.map(|s| s.to_string()),
                    },
                );
            }
        }
    }

    pub fn position_closed(&self, symbol: &str) {
        let mut state = self.lock_state();
        state.positions.remove(symbol);
    }

    /// Keeps tracked capital in sync with the ledger after fills.
    pub fn sync_cash(&self, cash: f64) {
        let mut state = self.lock_state();
        state.cash = cash;
    }

    /// Start-of-day reset: clears the circuit breaker, re-anchors the
    /// intraday high at current capital and empties the throttle window.
    pub fn reset_daily(&self) {
        let mut state = self.lock_state();
        state.circuit_breaker_active = false;
        state.daily_high_capital = state.capital();
        state.accepted_signals.clear();
    }

    pub fn circuit_breaker_active(&self) -> bool {
        self.lock_state().circuit_breaker_active
    }

    pub fn status(&self) -> RiskStatus {
        let state = self.lock_state();
        let mut sector_counts: HashMap<String, usize> = HashMap::new();
        for position in state.positions.values() {
            if let Some(sector) = &position.sector {
                *sector_counts.entry(sector.clone()).or_insert(0) += 1;
            }
        }
        RiskStatus {
            capital: state.capital(),
            daily_high_capital: state.daily_high_capital,
            drawdown: state.drawdown(),
            circuit_breaker_active: state.circuit_breaker_active,
            position_count: state.positions.len(),
            sector_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, 1, 9, 30, second).unwrap()
    }

    fn ts_ms(millis: i64) -> DateTime<Utc> {
        ts(0) + Duration::milliseconds(millis)
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default(), 100_000.0)
    }

    #[test]
    fn test_allows_reasonable_buy() {
        let risk = manager();
        let decision = risk.check_buy_signal("600001", 10_000.0, Some("tech"), ts(0));
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_rejects_invalid_proposals() {
        let risk = manager();
        match risk.check_buy_signal("", 10_000.0, None, ts(0)) {
            RiskDecision::Reject(RiskRejection::InvalidProposal(_)) => {}
            other => panic!("Expected invalid rejection, got {:?}", other),
        }
        match risk.check_buy_signal("600001", -5.0, None, ts(0)) {
            RiskDecision::Reject(RiskRejection::InvalidProposal(_)) => {}
            other => panic!("Expected invalid rejection, got {:?}", other),
        }
        match risk.check_buy_signal("600001", f64::NAN, None, ts(0)) {
            RiskDecision::Reject(RiskRejection::InvalidProposal(_)) => {}
            other => panic!("Expected invalid rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_oversized_position() {
        let risk = manager();
        // limit is 20% of 100k
        match risk.check_buy_signal("600001", 25_000.0, None, ts(0)) {
            RiskDecision::Reject(RiskRejection::PositionSizeExceeded { .. }) => {}
            other => panic!("Expected size rejection, got {:?}", other),
        }
        assert!(risk.check_buy_signal("600001", 20_000.0, None, ts(0)).is_allowed());
    }

    #[test]
    fn test_rejects_proposal_above_initial_capital() {
        let risk = manager();
        match risk.check_buy_signal("600001", 150_000.0, None, ts(0)) {
            RiskDecision::Reject(RiskRejection::InvalidProposal(_)) => {}
            other => panic!("Expected invalid rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_position_size_limit_anchored_to_initial_capital() {
        let risk = manager();
        // mark a large holding up 100% so the book is worth well over 125k
        risk.position_opened("600001", 10.0, 2_000, None);
        let mut prices = HashMap::new();
        prices.insert("600001".to_string(), 20.0);
        risk.update_prices(&prices);

        // 25k is within 20% of the marked book but not of initial capital
        match risk.check_buy_signal("600002", 25_000.0, None, ts(0)) {
            RiskDecision::Reject(RiskRejection::PositionSizeExceeded { capital, .. }) => {
                assert!((capital - 100_000.0).abs() < EPSILON);
            }
            other => panic!("Expected size rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_sector_limit_counts_distinct_symbols() {
        let risk = manager();
        risk.position_opened("600001", 10.0, 100, Some("tech"));
        risk.position_opened("600002", 10.0, 100, Some("tech"));
        risk.position_opened("600003", 10.0, 100, Some("tech"));
        match risk.check_buy_signal("600004", 1_000.0, Some("tech"), ts(0)) {
            RiskDecision::Reject(RiskRejection::SectorLimitReached { held, max, .. }) => {
                assert_eq!(held, 3);
                assert_eq!(max, 3);
            }
            other => panic!("Expected sector rejection, got {:?}", other),
        }
        // other sectors and unmapped symbols are unaffected
        assert!(risk.check_buy_signal("600005", 1_000.0, Some("energy"), ts(0)).is_allowed());
        assert!(risk.check_buy_signal("600006", 1_000.0, None, ts(1)).is_allowed());
    }

    #[test]
    fn test_throttle_only_counts_accepted_signals() {
        let config = RiskConfig {
            max_signals_per_sec: 2,
            ..RiskConfig::default()
        };
        let risk = RiskManager::new(config, 100_000.0);

        assert!(risk.check_buy_signal("600001", 1_000.0, None, ts_ms(0)).is_allowed());
        // rejected proposals must not consume throttle budget
        assert!(!risk.check_buy_signal("600002", -1.0, None, ts_ms(100)).is_allowed());
        assert!(risk.check_buy_signal("600003", 1_000.0, None, ts_ms(200)).is_allowed());
        match risk.check_buy_signal("600004", 1_000.0, None, ts_ms(300)) {
            RiskDecision::Reject(RiskRejection::Throttled { accepted, max }) => {
                assert_eq!(accepted, 2);
                assert_eq!(max, 2);
            }
            other => panic!("Expected throttle rejection, got {:?}", other),
        }
        // window slides: one second later the oldest entries expire
        assert!(risk.check_buy_signal("600005", 1_000.0, None, ts_ms(1_300)).is_allowed());
    }

    #[test]
    fn test_circuit_breaker_latches_until_daily_reset() {
        let config = RiskConfig {
            daily_drawdown_limit: 0.03,
            ..RiskConfig::default()
        };
        let risk = RiskManager::new(config, 100_000.0);
        risk.position_opened("600001", 10.0, 5_000, None);
        risk.sync_cash(50_000.0);

        // mark down far enough to cross the 3% intraday drawdown limit
        let mut prices = HashMap::new();
        prices.insert("600001".to_string(), 9.0);
        risk.update_prices(&prices);
        assert!(risk.circuit_breaker_active());

        match risk.check_buy_signal("600002", 1_000.0, None, ts(10)) {
            RiskDecision::Reject(RiskRejection::CircuitBreaker { .. }) => {}
            other => panic!("Expected breaker rejection, got {:?}", other),
        }

        // recovery alone does not clear the breaker
        prices.insert("600001".to_string(), 10.5);
        risk.update_prices(&prices);
        assert!(risk.circuit_breaker_active());
        assert!(!risk.check_buy_signal("600002", 1_000.0, None, ts(11)).is_allowed());

        risk.reset_daily();
        assert!(!risk.circuit_breaker_active());
        assert!(risk.check_buy_signal("600002", 1_000.0, None, ts(12)).is_allowed());
    }

    #[test]
    fn test_update_prices_reports_stop_breaches() {
        let risk = manager();
        risk.position_opened("600001", 10.0, 100, None);
        risk.position_opened("600002", 10.0, 100, None);

        let mut prices = HashMap::new();
        prices.insert("600001".to_string(), 9.4); // -6%, past the 5% stop
        prices.insert("600002".to_string(), 9.8); // -2%, fine
        let breached = risk.update_prices(&prices);
        assert_eq!(breached, vec!["600001".to_string()]);

        // exactly at the stop counts as breached
        prices.insert("600002".to_string(), 9.5);
        let breached = risk.update_prices(&prices);
        assert!(breached.contains(&"600002".to_string()));
    }

    #[test]
    fn test_status_snapshot() {
        let risk = manager();
        risk.position_opened("600001", 10.0, 100, Some("tech"));
        risk.position_opened("600002", 20.0, 200, Some("energy"));
        risk.sync_cash(94_000.0);
        let status = risk.status();
        assert_eq!(status.position_count, 2);
        assert_eq!(status.sector_counts.get("tech"), Some(&1));
        assert!((status.capital - (94_000.0 + 1_000.0 + 4_000.0)).abs() < EPSILON);
        assert!(!status.circuit_breaker_active);
    }

    #[test]
    fn test_concurrent_checks_do_not_race() {
        use std::sync::Arc;
        let config = RiskConfig {
            max_signals_per_sec: 50,
            ..RiskConfig::default()
        };
        let risk = Arc::new(RiskManager::new(config, 1_000_000.0));
        let mut handles = Vec::new();
        for worker in 0..4 {
            let risk = Arc::clone(&risk);
            handles.push(std::thread::spawn(move || {
                let mut allowed = 0;
                for i in 0..25 {
                    let symbol = format!("60{}{:03}", worker, i);
                    if risk
                        .check_buy_signal(&symbol, 1_000.0, None, ts(0))
                        .is_allowed()
                    {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // throttle admits exactly its budget across all threads
        assert_eq!(total, 50);
    }
}
