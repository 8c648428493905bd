//! Live spot-trading engine: bars in, signals out, positions managed.
//!
//! Module map mirrors the system's components:
//! - [`exchange`] — Exchange Gateway (C1)
//! - [`bar_store`] — Bar Store & Aggregator (C2)
//! - [`indicators`] — Indicator & Feature Pipeline (C3)
//! - [`model`] and [`signal`] — Signal Engine (C4)
//! - [`risk`] — Risk & Sizing (C5)
//! - [`position_manager`] — Position Manager (C6)
//! - [`ledger`] — Trade Ledger & P&L (C7)
//! - [`orchestrator`] — Orchestrator (C8)
//!
//! `main.rs` wires these into the live process; `bin/backtest.rs` replays
//! the same `indicators` → `signal` → `risk` chain over historical bars.

pub mod bar_store;
pub mod config;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod money;
pub mod orchestrator;
pub mod persistence;
pub mod position_manager;
pub mod risk;
pub mod signal;
pub mod telegram;
pub mod types;

pub use error::{BotError, BotResult, ErrorKind};
