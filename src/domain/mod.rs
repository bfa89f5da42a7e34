//! Core domain types and logic: the script compiler, the indicator library
//! and the simulation engine.

pub mod ohlcv;
pub mod signal;
pub mod indicator;
pub mod script;
pub mod strategy;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod resolution;
pub mod magnifier;
pub mod backtest;
pub mod metrics;
pub mod result;
pub mod config_validation;
pub mod error;
