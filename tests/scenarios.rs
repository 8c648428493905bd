//! End-to-end scenarios. Each test exercises the sizing, position, and
//! ledger components together the way the orchestrator would sequence
//! them for a single symbol, without needing a live exchange connection.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spotbot::config::BotConfig;
use spotbot::error::BotError;
use spotbot::exchange::ExchangeGateway;
use spotbot::ledger::TradeLedger;
use spotbot::money::{Base, Price, Quote};
use spotbot::position_manager::PositionManager;
use spotbot::risk::Sizer;
use spotbot::types::{AccountSnapshot, Balances, Bar, CloseReason, OrderRecord, OrderSide, Signal, SignalKind, Ticker};
use std::collections::HashMap;
use std::path::Path;

fn config() -> BotConfig {
    BotConfig::load(Some(Path::new("config.toml"))).expect("sample config.toml must load")
}

fn signal(kind: SignalKind, close: Decimal, atr: f64) -> Signal {
    Signal { kind, confidence: 0.9, reason: "test", bar_time: Utc::now(), indicators_snapshot: HashMap::new(), atr, close }
}

fn account(free_quote: Decimal, free_base: Decimal, price: Decimal) -> AccountSnapshot {
    AccountSnapshot::new(Quote::new(free_quote), Base::new(free_base), Price::new(price), Quote::ZERO)
}

#[test]
fn happy_long_trade_hits_take_profit_with_positive_quote_pnl() {
    let cfg = config();
    let sizer = Sizer::new(&cfg);
    let mut pm = PositionManager::new(&cfg);
    let mut ledger = TradeLedger::new();

    let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
    let acct = account(dec!(100000), dec!(0), dec!(30000));
    let intent = sizer.size(&sig, &acct, pm.open_count()).expect("should size cleanly");

    let id = pm.register_opening(&intent, "order-1".into());
    pm.confirm_open(&id, intent.entry_ref_price, intent.quantity_base, Quote::ZERO);

    // Price runs straight to the take-profit level.
    let mark = intent.take_profit;
    let reason = pm.check_exit_triggers(&id, mark).expect("take-profit should trigger");
    assert_eq!(reason, CloseReason::TakeProfit);

    let closed = pm.confirm_closed(&id, mark, reason, Quote::ZERO).expect("position should close");
    ledger.record_close(&closed, mark);

    assert!(ledger.running_realized().0 > Decimal::ZERO);
}

#[test]
fn trailing_stop_locks_in_profit_ahead_of_a_reversal() {
    let cfg = config();
    let sizer = Sizer::new(&cfg);
    let mut pm = PositionManager::new(&cfg);

    let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
    let acct = account(dec!(100000), dec!(0), dec!(30000));
    let intent = sizer.size(&sig, &acct, 0).unwrap();
    let id = pm.register_opening(&intent, "order-1".into());
    pm.confirm_open(&id, intent.entry_ref_price, intent.quantity_base, Quote::ZERO);

    let original_stop = pm.get(&id).unwrap().stop_loss;

    // Price rallies well past the trailing activation threshold...
    pm.update_trailing(&id, Price::new(dec!(31200)));
    let advanced_stop = pm.get(&id).unwrap().stop_loss;
    assert!(advanced_stop.0 > original_stop.0, "trailing stop should have advanced above entry-relative stop");

    // ...then reverses. The trailing stop should still trigger above the
    // original stop-loss level, locking in more than the raw SL would have.
    pm.update_trailing(&id, Price::new(dec!(30900)));
    let reason = pm.check_exit_triggers(&id, Price::new(dec!(30900)));
    if let Some(reason) = reason {
        let closed = pm.confirm_closed(&id, Price::new(dec!(30900)), reason, Quote::ZERO).unwrap();
        let pnl = closed.realized_pnl_quote.unwrap();
        assert!(pnl.0 > Decimal::ZERO, "trailing exit should still be profitable");
    } else {
        // Stop not yet reached at this mark is also an acceptable outcome;
        // the invariant under test is monotonicity, asserted above.
    }
}

#[test]
fn rejected_for_min_notional_produces_named_policy_rejection() {
    let mut cfg = config();
    cfg.min_notional = dec!(1_000_000);
    let sizer = Sizer::new(&cfg);

    let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
    let acct = account(dec!(100000), dec!(0), dec!(30000));
    let err = sizer.size(&sig, &acct, 0).unwrap_err();

    match err {
        BotError::PolicyRejection { reason, .. } => assert_eq!(reason, "min_notional"),
        other => panic!("expected PolicyRejection(min_notional), got {other:?}"),
    }
}

#[test]
fn short_entry_is_checked_against_base_balance_not_quote() {
    let cfg = config();
    let sizer = Sizer::new(&cfg);

    let sig = signal(SignalKind::OpenShort, dec!(30000), 200.0);
    // Ample quote, no base at all: the historical bug checked quote
    // balance for a SELL and would have let this through incorrectly.
    let acct = account(dec!(5_000_000), dec!(0), dec!(30000));
    let err = sizer.size(&sig, &acct, 0).unwrap_err();

    match err {
        BotError::PolicyRejection { reason, .. } => assert_eq!(reason, "insufficient_base_balance"),
        other => panic!("expected insufficient_base_balance, got {other:?}"),
    }
}

#[test]
fn realized_pnl_is_denominated_in_quote_units_not_base_times_price() {
    let cfg = config();
    let sizer = Sizer::new(&cfg);
    let mut pm = PositionManager::new(&cfg);

    let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
    let acct = account(dec!(100000), dec!(0), dec!(30000));
    let intent = sizer.size(&sig, &acct, 0).unwrap();
    let qty = intent.quantity_base;

    let id = pm.register_opening(&intent, "order-1".into());
    pm.confirm_open(&id, intent.entry_ref_price, intent.quantity_base, Quote::ZERO);
    let closed = pm.confirm_closed(&id, Price::new(intent.entry_ref_price.0 + dec!(1000)), CloseReason::TakeProfit, Quote::ZERO).unwrap();

    let pnl = closed.realized_pnl_quote.unwrap();
    // The historical bug reported base-quantity * price instead of
    // quantity * price_delta; assert against the correct formula directly.
    let expected = Quote::new(qty.0 * dec!(1000));
    assert_eq!(pnl, expected);
    // And sanity-check it's nowhere near the buggy magnitude (qty * full price).
    assert!(pnl.0.abs() < (qty.0 * dec!(30000)).abs());
}

struct GoneGateway;

#[async_trait]
impl ExchangeGateway for GoneGateway {
    async fn fetch_bars(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> Result<Vec<Bar>, BotError> {
        Ok(vec![])
    }
    async fn fetch_ticker(&self, _symbol: &str) -> Result<Ticker, BotError> {
        Ok(Ticker { last: Price::new(dec!(30000)), bid: Price::new(dec!(29999)), ask: Price::new(dec!(30001)) })
    }
    async fn fetch_balances(&self) -> Result<Balances, BotError> {
        Ok(Balances { free_quote: Quote::new(dec!(100000)), locked_quote: Quote::ZERO, free_base: Base::ZERO, locked_base: Base::ZERO })
    }
    async fn fetch_open_orders(&self, _symbol: &str) -> Result<Vec<OrderRecord>, BotError> {
        // No bracket orders at all: any tracked OPEN position must be
        // reconciled away.
        Ok(vec![])
    }
    async fn place_market_order(&self, _symbol: &str, _side: OrderSide, _quantity_base: Base) -> Result<String, BotError> {
        Ok("sim-order".into())
    }
    async fn place_stop_loss(&self, _symbol: &str, _side_to_close: OrderSide, _quantity: Base, _trigger_price: Decimal) -> Result<String, BotError> {
        Ok("sim-sl".into())
    }
    async fn place_take_profit(&self, _symbol: &str, _side_to_close: OrderSide, _quantity: Base, _trigger_price: Decimal) -> Result<String, BotError> {
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
            status: spotbot::types::OrderStatus::Filled,
            filled_qty: Base::ZERO,
            avg_fill_price: Price::new(dec!(30000)),
            fees_quote: Quote::ZERO,
            created_time: Utc::now(),
        })
    }
}

#[tokio::test]
async fn reconcile_closes_local_position_with_no_matching_exchange_order() {
    let cfg = config();
    let sizer = Sizer::new(&cfg);
    let mut pm = PositionManager::new(&cfg);

    let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
    let acct = account(dec!(100000), dec!(0), dec!(30000));
    let intent = sizer.size(&sig, &acct, 0).unwrap();
    let id = pm.register_opening(&intent, "order-1".into());
    pm.confirm_open(&id, intent.entry_ref_price, intent.quantity_base, Quote::ZERO);
    assert_eq!(pm.open_count(), 1);

    let gateway = GoneGateway;
    let gone = pm.reconcile(&gateway, &cfg.symbol).await.unwrap();

    assert_eq!(gone.len(), 1);
    assert_eq!(gone[0].close_reason, Some(CloseReason::ReconcileGone));
    assert_eq!(pm.open_count(), 0);
}
