pub mod commands;
pub mod config;
pub mod engine;
pub mod indicators;
pub mod market_data;
pub mod models;
pub mod optimizer;
pub mod param_utils;
pub mod performance;
pub mod portfolio;
pub mod risk;
pub mod strategy;
pub mod sweep_status;
pub mod walk_forward;
