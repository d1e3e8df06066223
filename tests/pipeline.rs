use backtest_engine::config::{BacktestConfig, RiskConfig};
use backtest_engine::engine::BacktestEngine;
use backtest_engine::market_data::MarketData;
use backtest_engine::models::{Bar, ExitReason, EPSILON};
use backtest_engine::optimizer::{run_parameter_sweep, ParameterGrid};
use backtest_engine::risk::RiskManager;
use backtest_engine::strategy::create_strategy;
use backtest_engine::sweep_status::SweepStatus;
use backtest_engine::walk_forward::run_walk_forward;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

fn bar(symbol: &str, timestamp: DateTime<Utc>, close: f64) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        timestamp,
        open: close,
        high: close * 1.002,
        low: close * 0.998,
        close,
        volume: 25_000,
    }
}

fn minute(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 3, 1, 9, 30, 0).unwrap() + chrono::Duration::minutes(i)
}

fn single_symbol_data(closes: &[f64]) -> MarketData {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| bar("600001", minute(i as i64), close))
        .collect();
    MarketData::from_bars(bars, HashMap::new()).expect("valid bars")
}

#[test]
fn momentum_pipeline_on_five_bar_series() {
    let data = single_symbol_data(&[10.1, 10.7, 11.1, 10.9, 11.3]);
    let config = BacktestConfig::default();
    let engine = BacktestEngine::new(config.clone()).unwrap();
    let strategy = create_strategy("momentum", HashMap::new()).unwrap();
    let risk = RiskManager::new(RiskConfig::default(), config.initial_capital);

    let result = engine.run(strategy.as_ref(), &data, &risk).unwrap();

    // the +5.9% move on the second bar triggers the only entry
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.symbol, "600001");
    assert_eq!(trade.entry_timestamp, minute(1));
    assert_eq!(trade.exit_reason, ExitReason::EndOfBacktest);
    assert_eq!(trade.quantity % 100, 0);
    assert!((trade.entry_price - 10.7 * 1.001).abs() < EPSILON);

    // cost arithmetic: final cash equals initial capital plus net pnl
    let final_point = result.equity_curve.last().unwrap();
    assert!(
        (final_point.cash - (config.initial_capital + trade.pnl)).abs() < 1e-6,
        "cash {} vs capital+pnl {}",
        final_point.cash,
        config.initial_capital + trade.pnl
    );
    assert!((result.final_equity - final_point.total_equity).abs() < EPSILON);

    // equity identity on every bar, cash never negative
    for point in &result.equity_curve {
        assert!((point.total_equity - (point.cash + point.positions_value)).abs() < EPSILON);
        assert!(point.cash >= 0.0);
    }
}

#[test]
fn report_serializes_with_camel_case_and_rounded_money() {
    let data = single_symbol_data(&[10.1, 10.7, 11.1, 10.9, 11.3]);
    let config = BacktestConfig::default();
    let engine = BacktestEngine::new(config.clone()).unwrap();
    let strategy = create_strategy("momentum", HashMap::new()).unwrap();
    let risk = RiskManager::new(RiskConfig::default(), config.initial_capital);
    let result = engine.run(strategy.as_ref(), &data, &risk).unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert!(json.get("finalEquity").is_some());
    assert!(json.get("sharpeRatio").is_some());
    assert!(json.get("maxDrawdown").is_some());
    assert!(json.get("equityCurve").is_some());
    let first_trade = &json["trades"][0];
    let entry_price = first_trade["entryPrice"].as_f64().unwrap();
    // two decimal places at the serialization boundary
    assert!(((entry_price * 100.0).round() / 100.0 - entry_price).abs() < EPSILON);
}

#[test]
fn sector_limit_rejects_fourth_symbol_in_sector() {
    let mut sectors = HashMap::new();
    for symbol in ["600001", "600002", "600003", "600004"] {
        sectors.insert(symbol.to_string(), "semiconductors".to_string());
    }

    // four symbols jump >3% one after another, all within one trading day
    let mut bars = Vec::new();
    for (offset, symbol) in ["600001", "600002", "600003", "600004"].iter().enumerate() {
        let base = minute(offset as i64 * 10);
        bars.push(bar(symbol, base, 10.0));
        bars.push(bar(symbol, base + chrono::Duration::minutes(1), 10.5));
    }
    bars.sort_by_key(|b| b.timestamp);
    let data = MarketData::from_bars(bars, sectors).unwrap();

    let mut params = HashMap::new();
    params.insert("maxPositions".to_string(), 10.0);
    params.insert("maxSectorStocks".to_string(), 3.0);
    // keep single-position sizing small enough for four entries
    params.insert("positionSizeRatio".to_string(), 0.1);

    let config = BacktestConfig::from_parameters(&params).unwrap();
    let risk_config = RiskConfig::from_parameters(&params).unwrap();
    let engine = BacktestEngine::new(config.clone()).unwrap();
    let strategy = create_strategy("momentum", params).unwrap();
    let risk = RiskManager::new(risk_config, config.initial_capital);

    let result = engine.run(strategy.as_ref(), &data, &risk).unwrap();

    // three sector positions filled, the fourth buy bounced off the limit
    let opened: Vec<&str> = result.trades.iter().map(|t| t.symbol.as_str()).collect();
    assert_eq!(opened.len(), 3, "trades: {:?}", opened);
    assert_eq!(
        result.buy_rejections.get("reject_sector_limit").copied(),
        Some(1),
        "rejections: {:?}",
        result.buy_rejections
    );
}

#[test]
fn circuit_breaker_blocks_entries_for_rest_of_day() {
    // crash after the first entry trips the intraday drawdown breaker, then
    // a second opportunity on the same day must be rejected
    let mut bars = vec![
        bar("600001", minute(0), 10.0),
        bar("600001", minute(1), 10.5),
        bar("600001", minute(2), 8.0),
        bar("600002", minute(3), 20.0),
        bar("600002", minute(4), 21.0),
    ];
    bars.sort_by_key(|b| b.timestamp);
    let data = MarketData::from_bars(bars, HashMap::new()).unwrap();

    let mut params = HashMap::new();
    params.insert("positionSizeRatio".to_string(), 0.2);
    params.insert("dailyDrawdownLimit".to_string(), 0.01);
    let config = BacktestConfig::from_parameters(&params).unwrap();
    let risk_config = RiskConfig::from_parameters(&params).unwrap();
    let engine = BacktestEngine::new(config.clone()).unwrap();
    let strategy = create_strategy("momentum", params).unwrap();
    let risk = RiskManager::new(risk_config, config.initial_capital);

    let result = engine.run(strategy.as_ref(), &data, &risk).unwrap();

    assert_eq!(
        result.buy_rejections.get("reject_circuit_breaker").copied(),
        Some(1),
        "rejections: {:?}",
        result.buy_rejections
    );
    // the crash position was stopped out
    assert_eq!(result.trades[0].exit_reason, ExitReason::StopLoss);
    assert!(risk.circuit_breaker_active());
}

#[test]
fn walk_forward_segments_share_no_bars() {
    let closes: Vec<f64> = (0..50).map(|i| 10.0 + (i % 6) as f64 * 0.4).collect();
    let data = single_symbol_data(&closes);

    let report = run_walk_forward(
        &BacktestConfig::default(),
        &RiskConfig::default(),
        "momentum",
        &HashMap::new(),
        &data,
        0.7,
    )
    .unwrap();

    assert_eq!(report.split_index, 35);
    assert_eq!(report.train.equity_curve.len(), 35);
    assert_eq!(report.test.equity_curve.len(), 15);
    assert_eq!(report.train.end_date, minute(34));
    assert_eq!(report.test.start_date, minute(35));
    assert!(report.train.end_date < report.test.start_date);
}

#[test]
fn sweep_is_deterministic_across_runs() {
    let closes: Vec<f64> = (0..80).map(|i| 10.0 + (i % 7) as f64 * 0.5).collect();
    let data = single_symbol_data(&closes);
    let grid = ParameterGrid::new()
        .with_axis("returnThreshold", vec![0.02, 0.03, 0.05])
        .unwrap()
        .with_axis("stopLossPct", vec![0.04, 0.08])
        .unwrap();

    let run_once = || {
        run_parameter_sweep(
            "momentum",
            &HashMap::new(),
            &grid,
            &data,
            None,
            &SweepStatus::new(),
        )
        .unwrap()
    };
    let first = run_once();
    let second = run_once();

    assert_eq!(first.ranked.len(), 6);
    assert_eq!(first.ranked.len(), second.ranked.len());
    for (a, b) in first.ranked.iter().zip(second.ranked.iter()) {
        assert_eq!(a.result.parameters, b.result.parameters);
        assert!(
            (a.result.performance.sharpe_ratio - b.result.performance.sharpe_ratio).abs()
                < EPSILON
        );
        assert_eq!(a.result.trades.len(), b.result.trades.len());
    }
}

#[test]
fn backtest_report_embeds_final_risk_status() {
    let data = single_symbol_data(&[10.1, 10.7, 11.1, 10.9, 11.3]);
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("bars.bin");
    data.save_to_file(&snapshot_path).unwrap();
    let report_path = dir.path().join("report.json");

    backtest_engine::commands::backtest::run(
        &snapshot_path,
        "momentum",
        HashMap::new(),
        Some(&report_path),
    )
    .unwrap();

    let raw = std::fs::read_to_string(&report_path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(json.get("finalEquity").is_some());
    let status = json.get("riskStatus").expect("risk status snapshot");
    assert_eq!(status["circuitBreakerActive"], false);
    // everything was force-closed at the end of the run
    assert_eq!(status["positionCount"], 0);
}

#[test]
fn snapshot_file_round_trips_through_engine() {
    let closes = [10.1, 10.7, 11.1, 10.9, 11.3];
    let data = single_symbol_data(&closes);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("market-data.bin");
    data.save_to_file(&path).unwrap();

    let restored = MarketData::load_from_file(&path).unwrap();
    let config = BacktestConfig::default();
    let engine = BacktestEngine::new(config.clone()).unwrap();
    let strategy = create_strategy("momentum", HashMap::new()).unwrap();

    let risk_a = RiskManager::new(RiskConfig::default(), config.initial_capital);
    let direct = engine.run(strategy.as_ref(), &data, &risk_a).unwrap();
    let risk_b = RiskManager::new(RiskConfig::default(), config.initial_capital);
    let from_file = engine.run(strategy.as_ref(), &restored, &risk_b).unwrap();

    assert_eq!(direct.trades.len(), from_file.trades.len());
    assert!((direct.final_equity - from_file.final_equity).abs() < EPSILON);
}
