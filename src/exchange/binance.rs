//! Binance-compatible spot REST client. HMAC-signed headers, a raw
//! (no-retry) method per endpoint, and a public method that wraps the raw
//! call in `with_retry`.

use super::{classify_error, with_retry, ExchangeGateway};
use crate::error::BotError;
use crate::money::{Base, Price, Quote};
use crate::types::{Balances, Bar, OrderRecord, OrderSide, OrderStatus, Ticker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const LIVE_URL: &str = "https://api.binance.com";
const SANDBOX_URL: &str = "https://testnet.binance.vision";

#[derive(Clone)]
pub struct BinanceGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceGateway {
    /// Credentials come from `EXCHANGE_API_KEY` / `EXCHANGE_API_SECRET`.
    /// `sandbox` selects the test endpoint.
    pub fn new(sandbox: bool) -> Result<Self, BotError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BotError::Config(format!("HTTP client build failed: {e}")))?;

        let api_key = std::env::var("EXCHANGE_API_KEY")
            .map_err(|_| BotError::Authentication("EXCHANGE_API_KEY not set".into()))?;
        let api_secret = std::env::var("EXCHANGE_API_SECRET")
            .map_err(|_| BotError::Authentication("EXCHANGE_API_SECRET not set".into()))?;

        let base_url = if sandbox { SANDBOX_URL } else { LIVE_URL }.to_string();

        Ok(BinanceGateway { client, base_url, api_key, api_secret })
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).expect("HMAC init failed");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }

    fn dec(v: &serde_json::Value) -> Decimal {
        v.as_str()
            .and_then(|s| Decimal::from_str(s).ok())
            .or_else(|| v.as_f64().and_then(|f| Decimal::from_str(&f.to_string()).ok()))
            .unwrap_or(Decimal::ZERO)
    }

    async fn place_order_raw(&self, symbol: &str, side: OrderSide, qty: Base) -> Result<String, BotError> {
        let side_str = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let params = format!("symbol={symbol}&side={side_str}&type=MARKET&quantity={}", qty.0);
        let query = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, query);

        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| BotError::Transient(format!("HTTP error: {e}")))?;

        let http_status = resp.status().as_u16();
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::Transient(format!("parse error: {e}")))?;

        if let Some(code) = json["code"].as_i64() {
            let msg = json["msg"].as_str().unwrap_or("unknown");
            return Err(classify_error(code, http_status, msg));
        }
        let order_id = json["orderId"].as_i64().map(|i| i.to_string()).unwrap_or_default();
        tracing::info!(symbol, side = side_str, qty = %qty, order_id, "order placed");
        Ok(order_id)
    }

    async fn fetch_klines_raw(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Bar>, BotError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}m&limit={}",
            self.base_url, symbol, interval, limit
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BotError::Transient(format!("HTTP error: {e}")))?;

        let http_status = resp.status().as_u16();
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::Transient(format!("parse error: {e}")))?;

        if let Some(code) = json["code"].as_i64() {
            let msg = json["msg"].as_str().unwrap_or("unknown");
            return Err(classify_error(code, http_status, msg));
        }

        let list = json
            .as_array()
            .ok_or_else(|| BotError::Transient("klines response not an array".into()))?;

        let mut bars: Vec<Bar> = Vec::with_capacity(list.len());
        for row in list {
            let arr = match row.as_array() {
                Some(a) if a.len() >= 6 => a,
                _ => continue,
            };
            let open_ms = arr[0].as_i64().unwrap_or(0);
            let open_time = DateTime::<Utc>::from_timestamp_millis(open_ms).unwrap_or_else(Utc::now);
            bars.push(Bar {
                open_time,
                open: Self::dec(&arr[1]),
                high: Self::dec(&arr[2]),
                low: Self::dec(&arr[3]),
                close: Self::dec(&arr[4]),
                volume: Self::dec(&arr[5]),
            });
        }
        // Binance returns oldest-first already; only completed klines are
        // requested by construction (no explicit `endTime` filtering needed
        // here because `limit` trims to history, not the in-progress bar —
        // the bar store still drops any bar whose close_time is in the future).
        Ok(bars)
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn fetch_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>, BotError> {
        let s = self.clone();
        let sym = symbol.to_string();
        let tf = timeframe.to_string();
        with_retry(|| {
            let s = s.clone();
            let sym = sym.clone();
            let tf = tf.clone();
            async move { s.fetch_klines_raw(&sym, &tf, limit).await }
        }, 3)
        .await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, BotError> {
        let url = format!("{}/api/v3/ticker/bookTicker?symbol={}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BotError::Transient(format!("HTTP error: {e}")))?;
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::Transient(format!("parse error: {e}")))?;

        let bid = Price::new(Self::dec(&json["bidPrice"]));
        let ask = Price::new(Self::dec(&json["askPrice"]));
        let last = Price::new((bid.0 + ask.0) / Decimal::TWO);
        Ok(Ticker { last, bid, ask })
    }

    async fn fetch_balances(&self) -> Result<Balances, BotError> {
        let query = self.signed_query("");
        let url = format!("{}/api/v3/account?{}", self.base_url, query);
        let resp = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| BotError::Transient(format!("HTTP error: {e}")))?;

        let http_status = resp.status().as_u16();
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::Transient(format!("parse error: {e}")))?;

        if let Some(code) = json["code"].as_i64() {
            let msg = json["msg"].as_str().unwrap_or("unknown");
            return Err(classify_error(code, http_status, msg));
        }

        let mut free_quote = Quote::ZERO;
        let mut locked_quote = Quote::ZERO;
        let mut free_base = Base::ZERO;
        let mut locked_base = Base::ZERO;

        if let Some(balances) = json["balances"].as_array() {
            for b in balances {
                let asset = b["asset"].as_str().unwrap_or("");
                let free = Self::dec(&b["free"]);
                let locked = Self::dec(&b["locked"]);
                // USDT is assumed quote currency; callers pass the configured
                // symbol's quote/base legs in when this becomes multi-asset.
                if asset == "USDT" {
                    free_quote = Quote::new(free);
                    locked_quote = Quote::new(locked);
                } else if !free.is_zero() || !locked.is_zero() {
                    free_base = Base::new(free);
                    locked_base = Base::new(locked);
                }
            }
        }

        Ok(Balances { free_quote, locked_quote, free_base, locked_base })
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, BotError> {
        let params = format!("symbol={symbol}");
        let query = self.signed_query(&params);
        let url = format!("{}/api/v3/openOrders?{}", self.base_url, query);
        let resp = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| BotError::Transient(format!("HTTP error: {e}")))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::Transient(format!("parse error: {e}")))?;

        let list = json.as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(list.len());
        for entry in list {
            out.push(parse_order_record(&entry));
        }
        Ok(out)
    }

    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity_base: Base) -> Result<String, BotError> {
        let s = self.clone();
        let sym = symbol.to_string();
        with_retry(|| {
            let s = s.clone();
            let sym = sym.clone();
            async move { s.place_order_raw(&sym, side, quantity_base).await }
        }, 3)
        .await
    }

    async fn place_stop_loss(
        &self,
        symbol: &str,
        side_to_close: OrderSide,
        quantity: Base,
        trigger_price: Decimal,
    ) -> Result<String, BotError> {
        self.place_conditional_order(symbol, side_to_close, quantity, trigger_price, "STOP_LOSS_LIMIT").await
    }

    async fn place_take_profit(
        &self,
        symbol: &str,
        side_to_close: OrderSide,
        quantity: Base,
        trigger_price: Decimal,
    ) -> Result<String, BotError> {
        self.place_conditional_order(symbol, side_to_close, quantity, trigger_price, "TAKE_PROFIT_LIMIT").await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), BotError> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let query = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, query);
        let resp = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| BotError::Transient(format!("HTTP error: {e}")))?;

        let http_status = resp.status().as_u16();
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::Transient(format!("parse error: {e}")))?;
        if let Some(code) = json["code"].as_i64() {
            let msg = json["msg"].as_str().unwrap_or("unknown");
            return Err(classify_error(code, http_status, msg));
        }
        Ok(())
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<OrderRecord, BotError> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let query = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, query);
        let resp = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| BotError::Transient(format!("HTTP error: {e}")))?;

        let http_status = resp.status().as_u16();
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::Transient(format!("parse error: {e}")))?;
        if let Some(code) = json["code"].as_i64() {
            let msg = json["msg"].as_str().unwrap_or("unknown");
            return Err(classify_error(code, http_status, msg));
        }
        Ok(parse_order_record(&json))
    }
}

impl BinanceGateway {
    async fn place_conditional_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Base,
        trigger_price: Decimal,
        order_type: &str,
    ) -> Result<String, BotError> {
        let side_str = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let params = format!(
            "symbol={symbol}&side={side_str}&type={order_type}&quantity={}&stopPrice={}&price={}&timeInForce=GTC",
            qty.0, trigger_price, trigger_price
        );
        let query = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, query);

        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| BotError::Transient(format!("HTTP error: {e}")))?;

        let http_status = resp.status().as_u16();
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BotError::Transient(format!("parse error: {e}")))?;
        if let Some(code) = json["code"].as_i64() {
            let msg = json["msg"].as_str().unwrap_or("unknown");
            return Err(classify_error(code, http_status, msg));
        }
        Ok(json["orderId"].as_i64().map(|i| i.to_string()).unwrap_or_default())
    }
}

fn parse_order_record(entry: &serde_json::Value) -> OrderRecord {
    let status = match entry["status"].as_str().unwrap_or("") {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "CANCELLED" => OrderStatus::Cancelled,
        _ => OrderStatus::Rejected,
    };
    let side = match entry["side"].as_str().unwrap_or("BUY") {
        "SELL" => OrderSide::Sell,
        _ => OrderSide::Buy,
    };
    let symbol = entry["symbol"].as_str().unwrap_or("").to_string();
    let executed_qty = BinanceGateway::dec(&entry["executedQty"]);
    // `price` is the order's limit/nominal price (zero for MARKET orders).
    // The actual volume-weighted fill price is cumulative quote spent over
    // quantity executed.
    let avg_fill_price = if executed_qty.is_zero() {
        Price::new(BinanceGateway::dec(&entry["price"]))
    } else {
        Price::new(BinanceGateway::dec(&entry["cummulativeQuoteQty"]) / executed_qty)
    };
    let fees_quote = parse_fees_quote(entry, &symbol, avg_fill_price);
    OrderRecord {
        order_id: entry["orderId"]
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| entry["orderId"].as_str().map(String::from))
            .unwrap_or_default(),
        symbol,
        side,
        status,
        filled_qty: Base::new(executed_qty),
        avg_fill_price,
        fees_quote,
        created_time: entry["time"]
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now),
    }
}

/// Sum `commission` across the order response's `fills` (present on the
/// POST /api/v3/order response), converting each fill's commission to
/// quote-currency terms. GET /api/v3/order carries no `fills`; for that
/// shape a top-level `commission`/`commissionAsset` pair is used if present,
/// falling back to zero.
fn parse_fees_quote(entry: &serde_json::Value, symbol: &str, avg_fill_price: Price) -> Quote {
    if let Some(fills) = entry["fills"].as_array() {
        let mut total = Decimal::ZERO;
        for fill in fills {
            let commission = BinanceGateway::dec(&fill["commission"]);
            let asset = fill["commissionAsset"].as_str().unwrap_or("");
            total += commission_to_quote(asset, commission, symbol, avg_fill_price);
        }
        return Quote::new(total);
    }
    let commission = BinanceGateway::dec(&entry["commission"]);
    if commission.is_zero() {
        return Quote::ZERO;
    }
    let asset = entry["commissionAsset"].as_str().unwrap_or("");
    Quote::new(commission_to_quote(asset, commission, symbol, avg_fill_price))
}

/// A commission charged in the quote asset is used as-is; a commission
/// charged in the base asset (or BNB, etc.) is converted at the fill price.
fn commission_to_quote(asset: &str, commission: Decimal, symbol: &str, avg_fill_price: Price) -> Decimal {
    if !asset.is_empty() && symbol.ends_with(asset) && symbol.len() > asset.len() {
        commission
    } else {
        commission * avg_fill_price.0
    }
}
