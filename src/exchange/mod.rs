//! Exchange Gateway (C1). One call per operation; retries, rate-limit
//! respect, and error classification live here so every other component
//! sees a clean `Result<T, BotError>`.

pub mod binance;
pub mod dry_run;

use crate::error::BotError;
use crate::money::Base;
use crate::types::{Balances, Bar, OrderRecord, OrderSide, Ticker};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Minimal synchronous-feeling contract; implementations may use
/// asynchronous I/O internally.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Returns only *completed* bars, newest last.
    async fn fetch_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>, BotError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, BotError>;

    async fn fetch_balances(&self) -> Result<Balances, BotError>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, BotError>;

    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity_base: Base) -> Result<String, BotError>;

    async fn place_stop_loss(
        &self,
        symbol: &str,
        side_to_close: OrderSide,
        quantity: Base,
        trigger_price: rust_decimal::Decimal,
    ) -> Result<String, BotError>;

    async fn place_take_profit(
        &self,
        symbol: &str,
        side_to_close: OrderSide,
        quantity: Base,
        trigger_price: rust_decimal::Decimal,
    ) -> Result<String, BotError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), BotError>;

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<OrderRecord, BotError>;
}

/// Classify a REST response code + HTTP status into a `BotError`: rate
/// limits and 429s retry with the server-advised interval, 5xx/network
/// errors retry with backoff, everything else (bad symbol, insufficient
/// balance, lot-size, price filter) fails fast.
pub fn classify_error(ret_code: i64, http_status: u16, msg: &str) -> BotError {
    match (ret_code, http_status) {
        (-1003, _) | (_, 429) => BotError::RateLimited { retry_after_secs: 10 },
        (-1001, _) | (_, 500..=599) => BotError::Transient(msg.to_string()),
        (-2014, _) | (-2015, _) => BotError::Authentication(msg.to_string()),
        _ => BotError::ExchangePermanent(format!("code={ret_code} msg={msg}")),
    }
}

/// Poll `get_order` until the exchange reports the order filled. Entry and
/// exit confirmation both go through this rather than trusting a pre-trade
/// price or a live ticker quote — `OrderRecord::avg_fill_price` is the only
/// value a position's entry/exit price is ever set from.
pub async fn await_fill(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    order_id: &str,
    max_polls: u32,
    poll_interval: Duration,
) -> Result<crate::types::OrderRecord, BotError> {
    for attempt in 0..max_polls {
        let record = gateway.get_order(symbol, order_id).await?;
        match record.status {
            crate::types::OrderStatus::Filled => return Ok(record),
            crate::types::OrderStatus::Cancelled | crate::types::OrderStatus::Rejected => {
                return Err(BotError::ExchangePermanent(format!(
                    "order {order_id} ended in {:?} before filling",
                    record.status
                )));
            }
            _ => {
                tracing::debug!(order_id, attempt, status = ?record.status, "order not yet filled, polling again");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
    Err(BotError::Transient(format!("order {order_id} did not fill within {max_polls} polls")))
}

/// Generic retry wrapper: exponential backoff on transient errors, capped
/// at 3 attempts; rate-limit responses sleep the advised interval and
/// retry; permanent errors fail immediately.
pub async fn with_retry<F, Fut, T>(operation: F, max_retries: u32) -> Result<T, BotError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BotError>>,
{
    let mut retries = 0;
    let mut delay_secs: u64 = 1;
    loop {
        match operation().await {
            Ok(v) => return Ok(v),
            Err(BotError::RateLimited { retry_after_secs }) => {
                if retries >= max_retries {
                    return Err(BotError::RateLimited { retry_after_secs });
                }
                tracing::warn!(retry_after_secs, attempt = retries + 1, max_retries, "rate limited, sleeping");
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                retries += 1;
            }
            Err(BotError::Transient(msg)) => {
                if retries >= max_retries {
                    return Err(BotError::Transient(msg));
                }
                tracing::warn!(%msg, delay_secs, attempt = retries + 1, max_retries, "transient error, retrying");
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                delay_secs = (delay_secs * 2).min(60);
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
