//! pinelab: compile a PineScript-compatible strategy script and backtest it
//! against OHLCV data.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].
//!
//! The two entry points are [`compile`] and [`simulate`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;

pub use domain::backtest::{simulate, simulate_with_sub_bars, RunConfig};
pub use domain::script::compile;
