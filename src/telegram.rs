//! Operator notifications via the Telegram Bot API: ambient operability
//! tooling, not trading logic itself.

use crate::money::Quote;
use crate::types::{CloseReason, Position};

#[derive(Clone)]
pub struct TelegramBot {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
    enabled: bool,
}

impl TelegramBot {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        let enabled = bot_token.is_some() && chat_id.is_some();
        TelegramBot {
            client: reqwest::Client::new(),
            bot_token: bot_token.unwrap_or_default(),
            chat_id: chat_id.unwrap_or_default(),
            enabled,
        }
    }

    async fn send(&self, text: &str) {
        if !self.enabled {
            tracing::debug!(text, "telegram disabled, message suppressed");
            return;
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let result = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "chat_id": self.chat_id, "text": text, "parse_mode": "Markdown" }))
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to send telegram notification");
        }
    }

    pub async fn notify_start(&self, symbol: &str, sandbox: bool) {
        let mode = if sandbox { "sandbox" } else { "live" };
        self.send(&format!("🤖 spotbot starting — {symbol} ({mode})")).await;
    }

    pub async fn notify_trade_open(&self, position: &Position) {
        self.send(&format!(
            "📈 Opened {:?} {} qty={} entry={} sl={} tp={}",
            position.side, position.symbol, position.quantity_base, position.entry_price, position.stop_loss, position.take_profit
        ))
        .await;
    }

    pub async fn notify_trade_close(&self, position: &Position) {
        let pnl = position.realized_pnl_quote.unwrap_or(Quote::ZERO);
        let reason = position.close_reason.map(close_reason_label).unwrap_or("unknown");
        let emoji = if pnl.is_negative() { "🔴" } else { "🟢" };
        self.send(&format!(
            "{emoji} Closed {} {} pnl={} reason={}",
            position.symbol, position.quantity_base, pnl, reason
        ))
        .await;
    }

    pub async fn notify_daily_summary(&self, realized: Quote, trade_count: usize) {
        self.send(&format!("📊 Daily summary: {trade_count} trades, realized P&L {realized}")).await;
    }
}

fn close_reason_label(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::StopLoss => "stop_loss",
        CloseReason::TakeProfit => "take_profit",
        CloseReason::Trail => "trail",
        CloseReason::SignalExit => "signal_exit",
        CloseReason::Manual => "manual",
        CloseReason::ReconcileGone => "reconcile_gone",
    }
}
