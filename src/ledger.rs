//! Trade Ledger & P&L (C7). Append-only; realized P&L is a running tally
//! kept exclusively in quote-currency units — the type system backs this
//! via `Quote`, so a future change that tried to sum `Base` amounts into
//! the tally would not compile.

use crate::money::Quote;
use crate::types::{LedgerEntry, Position};
use chrono::Utc;

pub struct TradeLedger {
    entries: Vec<LedgerEntry>,
    running_realized: Quote,
}

impl TradeLedger {
    pub fn new() -> Self {
        TradeLedger { entries: Vec::new(), running_realized: Quote::ZERO }
    }

    /// Record a closed position. Panics are never used here on purpose —
    /// a position passed in without `realized_pnl_quote`/`close_reason` set
    /// indicates a caller bug upstream, so this returns `None` instead of
    /// silently recording a zeroed entry.
    pub fn record_close(&mut self, position: &Position, exit_avg_price: crate::money::Price) -> Option<&LedgerEntry> {
        let realized = position.realized_pnl_quote?;
        let reason = position.close_reason?;

        let entry = LedgerEntry {
            closed_at: Utc::now(),
            symbol: position.symbol.clone(),
            side: position.side,
            quantity_base: position.quantity_base,
            entry_avg_price: position.entry_price,
            exit_avg_price,
            realized_pnl_quote: realized,
            fees_quote: position.total_fees_quote.unwrap_or(Quote::ZERO),
            close_reason: reason,
        };

        self.running_realized += realized;
        self.entries.push(entry);
        tracing::info!(
            symbol = %position.symbol,
            realized_pnl = %realized,
            running_total = %self.running_realized,
            "trade recorded"
        );
        self.entries.last()
    }

    pub fn running_realized(&self) -> Quote {
        self.running_realized
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Re-seed the ledger from persisted entries after a restart, rebuilding
    /// the running total rather than trusting a separately persisted sum.
    pub fn restore(&mut self, entries: Vec<LedgerEntry>) {
        self.running_realized = entries.iter().map(|e| e.realized_pnl_quote).sum();
        self.entries = entries;
    }

    /// Unrealized P&L across a set of still-open positions, summed on
    /// demand rather than tracked incrementally.
    pub fn unrealized_total<'a>(positions: impl Iterator<Item = &'a Position>, mark: crate::money::Price) -> Quote {
        positions.map(|p| p.unrealized_pnl(mark)).sum()
    }

    /// Daily drawdown as a fraction of starting equity.
    pub fn daily_drawdown_frac(&self, since: chrono::DateTime<Utc>, starting_equity: Quote) -> f64 {
        if starting_equity.0 <= rust_decimal::Decimal::ZERO {
            return 0.0;
        }
        let realized_since: Quote = self.entries.iter().filter(|e| e.closed_at >= since).map(|e| e.realized_pnl_quote).sum();
        let frac = (realized_since.0 / starting_equity.0).to_string().parse::<f64>().unwrap_or(0.0);
        frac.min(0.0).abs()
    }
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new()
    }
}
