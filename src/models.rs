use anyhow::{anyhow, Result as AnyResult};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// Comparison tolerance for monetary and ratio arithmetic.
pub const EPSILON: f64 = 1e-9;

/// Shares per board lot. Orders are always sized in whole lots.
pub const LOT_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
        }
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            "hold" => Ok(SignalAction::Hold),
            other => Err(anyhow!("Unknown signal action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    pub confidence: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub factors: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
    EndOfBacktest,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Signal => "signal",
            ExitReason::EndOfBacktest => "end_of_backtest",
        }
    }
}

/// A completed round trip. Prices are net of slippage; pnl is net of all fees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub symbol: String,
    pub quantity: i64,
    #[serde(serialize_with = "round2")]
    pub entry_price: f64,
    pub entry_timestamp: DateTime<Utc>,
    #[serde(serialize_with = "round2")]
    pub exit_price: f64,
    pub exit_timestamp: DateTime<Utc>,
    #[serde(serialize_with = "round2")]
    pub pnl: f64,
    #[serde(serialize_with = "round4")]
    pub pnl_percent: f64,
    #[serde(serialize_with = "round2")]
    pub commission_paid: f64,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "round2")]
    pub total_equity: f64,
    #[serde(serialize_with = "round2")]
    pub cash: f64,
    #[serde(serialize_with = "round2")]
    pub positions_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
    #[serde(serialize_with = "round4")]
    pub win_rate: f64,
    #[serde(serialize_with = "round4")]
    pub total_return: f64,
    #[serde(serialize_with = "round4")]
    pub annual_return: f64,
    #[serde(serialize_with = "round4")]
    pub sharpe_ratio: f64,
    #[serde(serialize_with = "round4")]
    pub max_drawdown: f64,
    #[serde(serialize_with = "round4")]
    pub profit_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub id: String,
    pub strategy_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(serialize_with = "round2")]
    pub initial_capital: f64,
    #[serde(serialize_with = "round2")]
    pub final_equity: f64,
    #[serde(flatten)]
    pub performance: PerformanceSummary,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
    /// Buy signals dropped before reaching the ledger, keyed by reason code.
    #[serde(default)]
    pub buy_rejections: HashMap<String, u64>,
    pub created_at: DateTime<Utc>,
}

fn round2<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64((value * 100.0).round() / 100.0)
}

fn round4<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64((value * 10_000.0).round() / 10_000.0)
}

fn normalize_parameter_map(raw: HashMap<String, Value>) -> HashMap<String, f64> {
    let mut cleaned = HashMap::with_capacity(raw.len());

    for (key, value) in raw.into_iter() {
        if let Some(num) = value.as_f64() {
            if num.is_finite() {
                cleaned.insert(key, num);
            } else {
                warn!(
                    "Skipping parameter `{}` due to non-finite numeric value {}",
                    key, value
                );
            }
            continue;
        }

        if let Some(text) = value.as_str() {
            match text.trim().parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => {
                    cleaned.insert(key, parsed);
                }
                _ => {
                    warn!(
                        "Skipping parameter `{}` due to non-numeric string value '{}'",
                        key, text
                    );
                }
            }
            continue;
        }

        if let Some(boolean) = value.as_bool() {
            cleaned.insert(key, if boolean { 1.0 } else { 0.0 });
            continue;
        }

        warn!("Skipping parameter `{}` due to unsupported value {}", key, value);
    }

    cleaned
}

pub fn parse_parameter_map_from_json(json: &str) -> AnyResult<HashMap<String, f64>> {
    let raw: HashMap<String, Value> =
        serde_json::from_str(json).map_err(|error| anyhow!("Invalid parameter JSON: {}", error))?;
    Ok(normalize_parameter_map(raw))
}

// Worker communication structures
#[derive(Debug, Clone)]
pub struct SweepTask {
    pub combo_index: usize,
    pub parameters: HashMap<String, f64>,
}

#[derive(Debug)]
pub struct SweepTaskResult {
    pub combo_index: usize,
    pub parameters: HashMap<String, f64>,
    pub outcome: AnyResult<SweepRun>,
}

/// One completed grid point. `train` is only present for walk-forward sweeps.
#[derive(Debug, Clone)]
pub struct SweepRun {
    pub result: BacktestResult,
    pub train: Option<BacktestResult>,
}
