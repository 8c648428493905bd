//! Position Manager (C6). Owns the OPENING→OPEN→CLOSING→CLOSED state
//! machine, trailing-stop recomputation, and reconciliation against
//! exchange truth, as a standalone, testable component rather than inline
//! loop code.

use crate::config::{BotConfig, PositionAdoptionPolicy};
use crate::error::BotError;
use crate::exchange::ExchangeGateway;
use crate::money::{Base, Price, Quote};
use crate::types::{CloseReason, OrderIntent, OrderRecord, OrderStatus, Position, PositionState, Side};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

pub struct PositionManager {
    positions: HashMap<String, Position>,
    trail_activation_profit_frac: rust_decimal::Decimal,
    trail_retrace_frac: rust_decimal::Decimal,
    adoption_policy: PositionAdoptionPolicy,
}

impl PositionManager {
    pub fn new(config: &BotConfig) -> Self {
        PositionManager {
            positions: HashMap::new(),
            trail_activation_profit_frac: decimal_from_f64(config.trail_activation_profit_frac),
            trail_retrace_frac: decimal_from_f64(config.trail_retrace_frac),
            adoption_policy: config.effective_adoption_policy(),
        }
    }

    pub fn open_count(&self) -> usize {
        self.positions
            .values()
            .filter(|p| matches!(p.state, PositionState::Opening | PositionState::Open))
            .count()
    }

    pub fn get(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Re-seed tracked positions from persisted state after a restart.
    pub fn restore(&mut self, positions: Vec<Position>) {
        for p in positions {
            self.positions.insert(p.id.clone(), p);
        }
    }

    /// Transition a sized intent into a tracked OPENING position after the
    /// entry order has been submitted. The caller is responsible for
    /// flipping it to OPEN once the exchange confirms the fill.
    pub fn register_opening(&mut self, intent: &OrderIntent, order_id: String) -> String {
        let id = Uuid::new_v4().to_string();
        let side = match intent.side {
            crate::types::OrderSide::Buy => Side::Long,
            crate::types::OrderSide::Sell => Side::Short,
        };
        let position = Position {
            id: id.clone(),
            symbol: intent.symbol.clone(),
            side,
            quantity_base: intent.quantity_base,
            entry_price: intent.entry_ref_price,
            opened_at: Utc::now(),
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            trailing_activated: false,
            peak_favorable_price: intent.entry_ref_price,
            state: PositionState::Opening,
            entry_fees_quote: Quote::ZERO,
            total_fees_quote: None,
            realized_pnl_quote: None,
            close_reason: None,
        };
        tracing::info!(position_id = %id, symbol = %intent.symbol, order_id, "position opening");
        self.positions.insert(id.clone(), position);
        id
    }

    /// Transition OPENING → OPEN using the exchange's reported fill, never
    /// the pre-trade intent: `avg_fill_price` and `filled_qty` come from a
    /// confirmed `OrderRecord`, not `OrderIntent::entry_ref_price`.
    pub fn confirm_open(&mut self, id: &str, avg_fill_price: Price, filled_qty: Base, fees_quote: Quote) {
        if let Some(p) = self.positions.get_mut(id) {
            p.entry_price = avg_fill_price;
            p.quantity_base = filled_qty;
            p.peak_favorable_price = avg_fill_price;
            p.entry_fees_quote = fees_quote;
            p.state = PositionState::Open;
            tracing::info!(position_id = id, entry = %avg_fill_price, filled_qty = %filled_qty, fees = %fees_quote, "position open");
        }
    }

    /// Recompute the trailing stop for one open position against the
    /// current mark price. The stop only ever moves in the favorable
    /// direction, never backward.
    pub fn update_trailing(&mut self, id: &str, mark: Price) {
        let Some(p) = self.positions.get_mut(id) else { return };
        if p.state != PositionState::Open {
            return;
        }

        let favorable_move = match p.side {
            Side::Long => mark.0 > p.peak_favorable_price.0,
            Side::Short => mark.0 < p.peak_favorable_price.0,
        };
        if favorable_move {
            p.peak_favorable_price = mark;
        }

        let profit_frac = match p.side {
            Side::Long => (p.peak_favorable_price.0 - p.entry_price.0) / p.entry_price.0,
            Side::Short => (p.entry_price.0 - p.peak_favorable_price.0) / p.entry_price.0,
        };
        if profit_frac < self.trail_activation_profit_frac {
            return;
        }

        p.trailing_activated = true;
        let retrace = p.peak_favorable_price.0 * self.trail_retrace_frac;
        let candidate = match p.side {
            Side::Long => Price::new(p.peak_favorable_price.0 - retrace),
            Side::Short => Price::new(p.peak_favorable_price.0 + retrace),
        };

        let improves = match p.side {
            Side::Long => candidate.0 > p.stop_loss.0,
            Side::Short => candidate.0 < p.stop_loss.0,
        };
        if improves {
            tracing::debug!(position_id = id, old_stop = %p.stop_loss, new_stop = %candidate, "trailing stop advanced");
            p.stop_loss = candidate;
        }
    }

    /// Check stop-loss / take-profit triggers against the current mark,
    /// returning the close reason if one fired. Does not itself transition
    /// state — the orchestrator drives the exit order, then calls
    /// `begin_closing`/`confirm_closed`.
    pub fn check_exit_triggers(&self, id: &str, mark: Price) -> Option<CloseReason> {
        let p = self.positions.get(id)?;
        if p.state != PositionState::Open {
            return None;
        }
        match p.side {
            Side::Long => {
                if mark.0 <= p.stop_loss.0 {
                    return Some(CloseReason::StopLoss);
                }
                if mark.0 >= p.take_profit.0 {
                    return Some(CloseReason::TakeProfit);
                }
            }
            Side::Short => {
                if mark.0 >= p.stop_loss.0 {
                    return Some(CloseReason::StopLoss);
                }
                if mark.0 <= p.take_profit.0 {
                    return Some(CloseReason::TakeProfit);
                }
            }
        }
        None
    }

    pub fn begin_closing(&mut self, id: &str) {
        if let Some(p) = self.positions.get_mut(id) {
            p.state = PositionState::Closing;
        }
    }

    /// Transition OPEN/CLOSING → CLOSED using a confirmed exit fill.
    /// `exit_fees_quote` is the fee on the closing order; the entry fee was
    /// already folded into `unrealized_pnl` at `confirm_open` time.
    pub fn confirm_closed(&mut self, id: &str, exit_price: Price, reason: CloseReason, exit_fees_quote: Quote) -> Option<Position> {
        let p = self.positions.get_mut(id)?;
        let realized = p.unrealized_pnl(exit_price) - exit_fees_quote;
        let total_fees = p.entry_fees_quote + exit_fees_quote;
        p.state = PositionState::Closed;
        p.total_fees_quote = Some(total_fees);
        p.realized_pnl_quote = Some(realized);
        p.close_reason = Some(reason);
        tracing::info!(position_id = id, ?reason, realized_pnl = %realized, fees = %total_fees, "position closed");
        self.positions.remove(id)
    }

    /// Reconcile local state against exchange open orders. Any
    /// locally-tracked OPEN position with no matching bracket order on
    /// the exchange is closed locally with `ReconcileGone` — the exchange
    /// is the source of truth, never the local cache. Positions found on
    /// the exchange with no local record are adopted or ignored per the
    /// configured policy.
    pub async fn reconcile(&mut self, gateway: &dyn ExchangeGateway, symbol: &str) -> Result<Vec<Position>, BotError> {
        let open_orders = gateway.fetch_open_orders(symbol).await?;
        let mut gone_locally_tracked = Vec::new();

        let tracked_ids: Vec<String> = self
            .positions
            .iter()
            .filter(|(_, p)| p.state == PositionState::Open)
            .map(|(id, _)| id.clone())
            .collect();

        for id in tracked_ids {
            let has_bracket = open_orders.iter().any(|o| order_belongs_to_position(o, &self.positions[&id]));
            if !has_bracket {
                if let Some(p) = self.positions.get_mut(&id) {
                    p.state = PositionState::Closed;
                    p.close_reason = Some(CloseReason::ReconcileGone);
                }
                if let Some(p) = self.positions.remove(&id) {
                    tracing::warn!(position_id = %id, "position reconciled as gone: no matching bracket order on exchange");
                    gone_locally_tracked.push(p);
                }
            }
        }

        if self.adoption_policy == PositionAdoptionPolicy::Adopt {
            self.adopt_orphans(&open_orders, symbol);
        }

        Ok(gone_locally_tracked)
    }

    fn adopt_orphans(&mut self, open_orders: &[OrderRecord], symbol: &str) {
        let tracked_symbols_with_orders: Vec<&OrderRecord> = open_orders
            .iter()
            .filter(|o| o.symbol == symbol && o.status != OrderStatus::Cancelled && o.status != OrderStatus::Rejected)
            .collect();

        let already_tracked = self.positions.values().any(|p| p.symbol == symbol && p.state != PositionState::Closed);
        if already_tracked || tracked_symbols_with_orders.is_empty() {
            return;
        }

        // An orphaned bracket order implies a position the bot restarted
        // without memory of; adopt it at the filled order's reported price
        // rather than guessing entry — exact bracket reconstruction is left
        // to the next reconciliation pass once the remaining leg is seen.
        if let Some(order) = tracked_symbols_with_orders.first() {
            let side = match order.side {
                crate::types::OrderSide::Buy => Side::Short,
                crate::types::OrderSide::Sell => Side::Long,
            };
            let id = Uuid::new_v4().to_string();
            let position = Position {
                id: id.clone(),
                symbol: symbol.to_string(),
                side,
                quantity_base: order.filled_qty,
                entry_price: order.avg_fill_price,
                opened_at: order.created_time,
                stop_loss: order.avg_fill_price,
                take_profit: order.avg_fill_price,
                trailing_activated: false,
                peak_favorable_price: order.avg_fill_price,
                state: PositionState::Open,
                entry_fees_quote: order.fees_quote,
                total_fees_quote: None,
                realized_pnl_quote: None,
                close_reason: None,
            };
            tracing::warn!(position_id = %id, symbol, "adopted orphaned exchange position");
            self.positions.insert(id, position);
        }
    }
}

fn order_belongs_to_position(order: &OrderRecord, position: &Position) -> bool {
    order.symbol == position.symbol && order.status != OrderStatus::Cancelled && order.status != OrderStatus::Rejected
}

fn decimal_from_f64(v: f64) -> rust_decimal::Decimal {
    rust_decimal::Decimal::from_f64_retain(v).unwrap_or(rust_decimal::Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, FilterConfig, ModelConfig, ShutdownConfig};
    use crate::types::OrderSide;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;

    fn config() -> BotConfig {
        BotConfig {
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

    fn intent() -> OrderIntent {
        OrderIntent {
            side: OrderSide::Buy,
            symbol: "BTCUSDT".into(),
            quantity_base: crate::money::Base::new(dec!(0.1)),
            entry_ref_price: Price::new(dec!(30000)),
            stop_loss: Price::new(dec!(29500)),
            take_profit: Price::new(dec!(31000)),
            risk_quote: crate::money::Quote::new(dec!(50)),
        }
    }

    #[test]
    fn trailing_stop_never_moves_backward_for_long() {
        let cfg = config();
        let mut pm = PositionManager::new(&cfg);
        let id = pm.register_opening(&intent(), "order-1".into());
        pm.confirm_open(&id, Price::new(dec!(30000)), intent().quantity_base, Quote::ZERO);

        pm.update_trailing(&id, Price::new(dec!(30500)));
        let stop_after_rise = pm.get(&id).unwrap().stop_loss;

        pm.update_trailing(&id, Price::new(dec!(30100)));
        let stop_after_pullback = pm.get(&id).unwrap().stop_loss;

        assert!(stop_after_pullback.0 >= stop_after_rise.0);
    }

    #[test]
    fn stop_loss_trigger_detected_for_long() {
        let cfg = config();
        let mut pm = PositionManager::new(&cfg);
        let id = pm.register_opening(&intent(), "order-1".into());
        pm.confirm_open(&id, Price::new(dec!(30000)), intent().quantity_base, Quote::ZERO);

        let reason = pm.check_exit_triggers(&id, Price::new(dec!(29400)));
        assert_eq!(reason, Some(CloseReason::StopLoss));
    }

    #[test]
    fn take_profit_trigger_detected_for_long() {
        let cfg = config();
        let mut pm = PositionManager::new(&cfg);
        let id = pm.register_opening(&intent(), "order-1".into());
        pm.confirm_open(&id, Price::new(dec!(30000)), intent().quantity_base, Quote::ZERO);

        let reason = pm.check_exit_triggers(&id, Price::new(dec!(31500)));
        assert_eq!(reason, Some(CloseReason::TakeProfit));
    }

    #[test]
    fn confirm_closed_computes_realized_pnl_in_quote_units() {
        let cfg = config();
        let mut pm = PositionManager::new(&cfg);
        let id = pm.register_opening(&intent(), "order-1".into());
        pm.confirm_open(&id, Price::new(dec!(30000)), intent().quantity_base, Quote::ZERO);

        let closed = pm.confirm_closed(&id, Price::new(dec!(31000)), CloseReason::TakeProfit, Quote::ZERO).unwrap();
        let pnl = closed.realized_pnl_quote.unwrap();
        assert_eq!(pnl, crate::money::Quote::new(dec!(100))); // 0.1 BTC * $1000 move
    }

    #[test]
    fn open_count_excludes_closed_positions() {
        let cfg = config();
        let mut pm = PositionManager::new(&cfg);
        let id = pm.register_opening(&intent(), "order-1".into());
        assert_eq!(pm.open_count(), 1);
        pm.confirm_open(&id, Price::new(dec!(30000)), intent().quantity_base, Quote::ZERO);
        pm.confirm_closed(&id, Price::new(dec!(31000)), CloseReason::TakeProfit, Quote::ZERO);
        assert_eq!(pm.open_count(), 0);
    }

    struct StableBracketGateway;

    #[async_trait::async_trait]
    impl ExchangeGateway for StableBracketGateway {
        async fn fetch_bars(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> Result<Vec<crate::types::Bar>, BotError> {
            Ok(vec![])
        }
        async fn fetch_ticker(&self, _symbol: &str) -> Result<crate::types::Ticker, BotError> {
            Ok(crate::types::Ticker { last: Price::new(dec!(30000)), bid: Price::new(dec!(29999)), ask: Price::new(dec!(30001)) })
        }
        async fn fetch_balances(&self) -> Result<crate::types::Balances, BotError> {
            Ok(crate::types::Balances { free_quote: Quote::new(dec!(100000)), locked_quote: Quote::ZERO, free_base: Base::ZERO, locked_base: Base::ZERO })
        }
        async fn fetch_open_orders(&self, _symbol: &str) -> Result<Vec<OrderRecord>, BotError> {
            // Same unchanged bracket order reported on every call.
            Ok(vec![OrderRecord {
                order_id: "bracket-1".into(),
                symbol: "BTCUSDT".into(),
                side: OrderSide::Sell,
                status: OrderStatus::New,
                filled_qty: Base::ZERO,
                avg_fill_price: Price::new(dec!(30000)),
                fees_quote: Quote::ZERO,
                created_time: Utc::now(),
            }])
        }
        async fn place_market_order(&self, _symbol: &str, _side: OrderSide, _quantity_base: Base) -> Result<String, BotError> {
            Ok("sim".into())
        }
        async fn place_stop_loss(&self, _symbol: &str, _side_to_close: OrderSide, _quantity: Base, _trigger_price: rust_decimal::Decimal) -> Result<String, BotError> {
            Ok("sim-sl".into())
        }
        async fn place_take_profit(&self, _symbol: &str, _side_to_close: OrderSide, _quantity: Base, _trigger_price: rust_decimal::Decimal) -> Result<String, BotError> {
            Ok("sim-tp".into())
        }
        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), BotError> {
            Ok(())
        }
        async fn get_order(&self, _symbol: &str, order_id: &str) -> Result<OrderRecord, BotError> {
            Ok(OrderRecord {
                order_id: order_id.to_string(),
                symbol: "BTCUSDT".into(),
                side: OrderSide::Buy,
                status: OrderStatus::Filled,
                filled_qty: Base::ZERO,
                avg_fill_price: Price::new(dec!(30000)),
                fees_quote: Quote::ZERO,
                created_time: Utc::now(),
            })
        }
    }

    /// Running `reconcile` twice in succession against unchanged exchange
    /// state must leave local state identical — no position flips to gone,
    /// no duplicate adoption on the second pass.
    #[tokio::test]
    async fn reconcile_is_idempotent_against_unchanged_exchange_state() {
        let cfg = config();
        let mut pm = PositionManager::new(&cfg);
        let id = pm.register_opening(&intent(), "order-1".into());
        pm.confirm_open(&id, Price::new(dec!(30000)), intent().quantity_base, Quote::ZERO);

        let gateway = StableBracketGateway;

        let first = pm.reconcile(&gateway, &cfg.symbol).await.unwrap();
        assert!(first.is_empty(), "matching bracket order should not be reconciled away");
        let snapshot_after_first = pm.get(&id).cloned().expect("position still tracked after first reconcile");

        let second = pm.reconcile(&gateway, &cfg.symbol).await.unwrap();
        assert!(second.is_empty());
        let snapshot_after_second = pm.get(&id).cloned().expect("position still tracked after second reconcile");

        assert_eq!(snapshot_after_first.state, snapshot_after_second.state);
        assert_eq!(snapshot_after_first.entry_price, snapshot_after_second.entry_price);
        assert_eq!(snapshot_after_first.quantity_base, snapshot_after_second.quantity_base);
        assert_eq!(pm.open_count(), 1);
    }
}
