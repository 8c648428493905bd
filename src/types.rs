//! Core data model. Invariants noted per type are enforced by the
//! constructors in the modules that build these values (`risk.rs`,
//! `position_manager.rs`), not re-validated on every read.

use crate::money::{Base, Price, Quote};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A completed OHLCV bar. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    /// `low <= open,close <= high`, `volume >= 0`.
    pub fn is_well_formed(&self) -> bool {
        self.volume >= Decimal::ZERO
            && self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }

    pub fn close_f64(&self) -> f64 {
        self.close.to_string().parse().unwrap_or(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn exchange_buy_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    pub fn closing_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    OpenLong,
    OpenShort,
    NoSignal,
}

/// Emitted at most once per completed bar.
#[derive(Clone, Debug)]
pub struct Signal {
    pub kind: SignalKind,
    pub confidence: f64,
    pub reason: &'static str,
    pub bar_time: DateTime<Utc>,
    pub indicators_snapshot: HashMap<String, f64>,
    /// ATR at signal time, carried alongside so the sizer never has to
    /// recompute it from a possibly-stale window.
    pub atr: f64,
    pub close: Decimal,
}

impl Signal {
    pub fn no_signal(reason: &'static str, bar_time: DateTime<Utc>) -> Self {
        Signal {
            kind: SignalKind::NoSignal,
            confidence: 0.0,
            reason,
            bar_time,
            indicators_snapshot: HashMap::new(),
            atr: 0.0,
            close: Decimal::ZERO,
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self.kind {
            SignalKind::OpenLong => Some(Side::Long),
            SignalKind::OpenShort => Some(Side::Short),
            SignalKind::NoSignal => None,
        }
    }
}

/// Pre-validation output of the risk/sizing module. Rejected intents never
/// reach this type — `risk.rs` returns `Result<OrderIntent, BotError>`.
#[derive(Clone, Debug)]
pub struct OrderIntent {
    pub side: OrderSide,
    pub symbol: String,
    pub quantity_base: Base,
    pub entry_ref_price: Price,
    pub stop_loss: Price,
    pub take_profit: Price,
    pub risk_quote: Quote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Opening,
    Open,
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Trail,
    SignalExit,
    Manual,
    ReconcileGone,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity_base: Base,
    pub entry_price: Price,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Price,
    pub take_profit: Price,
    pub trailing_activated: bool,
    pub peak_favorable_price: Price,
    pub state: PositionState,
    /// Fee charged on the entry fill, in quote currency. Known as soon as
    /// the entry order is confirmed, so it is subtracted from P&L
    /// immediately rather than deferred to close.
    pub entry_fees_quote: Quote,
    /// Entry + exit fees combined, set once the position closes.
    pub total_fees_quote: Option<Quote>,
    pub realized_pnl_quote: Option<Quote>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    /// `stop_loss < entry_price < take_profit` for LONG, mirrored for SHORT.
    pub fn has_consistent_brackets(&self) -> bool {
        match self.side {
            Side::Long => self.stop_loss.0 < self.entry_price.0 && self.entry_price.0 < self.take_profit.0,
            Side::Short => self.take_profit.0 < self.entry_price.0 && self.entry_price.0 < self.stop_loss.0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == PositionState::Closed
    }

    /// Unrealized P&L in quote currency at the given mark price, net of the
    /// entry fee already paid. Exit fees are unknown until close and are
    /// folded in by `confirm_closed`.
    pub fn unrealized_pnl(&self, mark: Price) -> Quote {
        let diff = mark.0 - self.entry_price.0;
        Quote::new(diff * self.quantity_base.0 * self.side.sign()) - self.entry_fees_quote
    }
}

/// One append-only ledger row per closed position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub closed_at: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub quantity_base: Base,
    pub entry_avg_price: Price,
    pub exit_avg_price: Price,
    pub realized_pnl_quote: Quote,
    pub fees_quote: Quote,
    pub close_reason: CloseReason,
}

#[derive(Clone, Copy, Debug)]
pub struct AccountSnapshot {
    pub free_quote: Quote,
    pub free_base: Base,
    pub ticker_price: Price,
    pub equity_quote: Quote,
}

impl AccountSnapshot {
    pub fn new(free_quote: Quote, free_base: Base, ticker_price: Price, unrealized: Quote) -> Self {
        let equity_quote = free_quote + (free_base * ticker_price) + unrealized;
        AccountSnapshot { free_quote, free_base, ticker_price, equity_quote }
    }
}

/// Exchange-reported status for an order placed by the bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Clone, Debug)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub filled_qty: Base,
    pub avg_fill_price: Price,
    pub fees_quote: Quote,
    pub created_time: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct Ticker {
    pub last: Price,
    pub bid: Price,
    pub ask: Price,
}

#[derive(Clone, Debug)]
pub struct Balances {
    pub free_quote: Quote,
    pub locked_quote: Quote,
    pub free_base: Base,
    pub locked_base: Base,
}

/// Emitted by the bar store exactly once per coarser-timeframe completion.
#[derive(Clone, Debug)]
pub struct NewBarEvent {
    pub symbol: String,
    pub timeframe: String,
    pub bar: Bar,
}
