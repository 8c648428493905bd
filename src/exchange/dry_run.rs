//! `--dry-run` decorator: every order-placing method logs the intended
//! order and returns a synthetic id instead of touching the network;
//! read-only methods are forwarded to the wrapped gateway unchanged so
//! position reconciliation still sees real market state.

use super::ExchangeGateway;
use crate::error::BotError;
use crate::money::{Base, Quote};
use crate::types::{Balances, Bar, OrderRecord, OrderSide, OrderStatus, Ticker};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct DryRunGateway<G: ExchangeGateway> {
    inner: G,
    counter: AtomicU64,
    /// Synthetic market orders simulated as filled at placement time, keyed
    /// by the id returned to the caller so `get_order` can report them back
    /// as filled instead of querying an exchange that never saw them.
    simulated_fills: Mutex<HashMap<String, (OrderSide, Base)>>,
}

impl<G: ExchangeGateway> DryRunGateway<G> {
    pub fn new(inner: G) -> Self {
        DryRunGateway { inner, counter: AtomicU64::new(0), simulated_fills: Mutex::new(HashMap::new()) }
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("dryrun-{n}")
    }
}

#[async_trait]
impl<G: ExchangeGateway> ExchangeGateway for DryRunGateway<G> {
    async fn fetch_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>, BotError> {
        self.inner.fetch_bars(symbol, timeframe, limit).await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, BotError> {
        self.inner.fetch_ticker(symbol).await
    }

    async fn fetch_balances(&self) -> Result<Balances, BotError> {
        self.inner.fetch_balances().await
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, BotError> {
        self.inner.fetch_open_orders(symbol).await
    }

    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity_base: Base) -> Result<String, BotError> {
        let id = self.next_id();
        tracing::info!(symbol, ?side, qty = %quantity_base, order_id = %id, "dry-run: market order not sent");
        self.simulated_fills.lock().unwrap().insert(id.clone(), (side, quantity_base));
        Ok(id)
    }

    async fn place_stop_loss(
        &self,
        symbol: &str,
        side_to_close: OrderSide,
        quantity: Base,
        trigger_price: Decimal,
    ) -> Result<String, BotError> {
        let id = self.next_id();
        tracing::info!(symbol, ?side_to_close, qty = %quantity, %trigger_price, order_id = %id, "dry-run: stop-loss not sent");
        Ok(id)
    }

    async fn place_take_profit(
        &self,
        symbol: &str,
        side_to_close: OrderSide,
        quantity: Base,
        trigger_price: Decimal,
    ) -> Result<String, BotError> {
        let id = self.next_id();
        tracing::info!(symbol, ?side_to_close, qty = %quantity, %trigger_price, order_id = %id, "dry-run: take-profit not sent");
        Ok(id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), BotError> {
        tracing::info!(symbol, order_id, "dry-run: cancel not sent");
        Ok(())
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<OrderRecord, BotError> {
        let simulated = self.simulated_fills.lock().unwrap().get(order_id).copied();
        let Some((side, qty)) = simulated else {
            return Err(BotError::ExchangePermanent(format!("dry-run: unknown order id {order_id}")));
        };
        // Simulated fill at the current mark; a synthetic id never reaches
        // the wrapped exchange, which has no record of it.
        let ticker = self.inner.fetch_ticker(symbol).await?;
        Ok(OrderRecord {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            status: OrderStatus::Filled,
            filled_qty: qty,
            avg_fill_price: ticker.last,
            fees_quote: Quote::ZERO,
            created_time: Utc::now(),
        })
    }
}
