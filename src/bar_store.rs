//! Bar Store & Aggregator (C2). Buffers completed feed-timeframe bars per
//! symbol and folds N of them into one strategy-timeframe bar, emitting a
//! `NewBarEvent` exactly once per completion.

use crate::types::{Bar, NewBarEvent};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

/// Per-symbol ring of completed feed bars, capped so memory doesn't grow
/// unbounded across a long-running process.
const MAX_FEED_BARS_RETAINED: usize = 2_000;

pub struct BarStore {
    ratio: usize,
    feed_timeframe: String,
    strategy_timeframe: String,
    feed_bars: HashMap<String, VecDeque<Bar>>,
    /// Strategy-timeframe bars already aggregated, newest last, capped the
    /// same way as `feed_bars`.
    strategy_bars: HashMap<String, VecDeque<Bar>>,
}

impl BarStore {
    /// `ratio` is `timeframe_strategy / timeframe_feed` in minutes, already
    /// validated as an exact multiple by `BotConfig::aggregation_ratio`.
    pub fn new(ratio: usize, feed_timeframe: impl Into<String>, strategy_timeframe: impl Into<String>) -> Self {
        BarStore {
            ratio,
            feed_timeframe: feed_timeframe.into(),
            strategy_timeframe: strategy_timeframe.into(),
            feed_bars: HashMap::new(),
            strategy_bars: HashMap::new(),
        }
    }

    /// Seed history for a symbol from a REST backfill, oldest bar first.
    /// Any bar that completes a strategy-timeframe window during the seed
    /// is aggregated immediately so the strategy buffer is warm at startup.
    pub fn seed(&mut self, symbol: &str, bars: Vec<Bar>) {
        for bar in bars {
            self.push_feed_bar(symbol, bar);
        }
    }

    /// Feed one newly-completed feed-timeframe bar in. Returns `Some` the
    /// instant enough feed bars have accumulated to close a
    /// strategy-timeframe window. Aggregation is pure folding, no
    /// look-ahead — only bars already marked complete are folded.
    pub fn push_feed_bar(&mut self, symbol: &str, bar: Bar) -> Option<NewBarEvent> {
        let buf = self.feed_bars.entry(symbol.to_string()).or_default();
        if let Some(last) = buf.back() {
            if bar.open_time <= last.open_time {
                tracing::debug!(symbol, open_time = %bar.open_time, "stale or duplicate feed bar dropped");
                return None;
            }
        }
        buf.push_back(bar);
        while buf.len() > MAX_FEED_BARS_RETAINED {
            buf.pop_front();
        }

        if buf.len() % self.ratio != 0 {
            return None;
        }

        let window: Vec<&Bar> = buf.iter().rev().take(self.ratio).collect();
        let aggregated = aggregate(window.into_iter().rev());

        let strat_buf = self.strategy_bars.entry(symbol.to_string()).or_default();
        strat_buf.push_back(aggregated.clone());
        while strat_buf.len() > MAX_FEED_BARS_RETAINED {
            strat_buf.pop_front();
        }

        tracing::debug!(symbol, timeframe = %self.strategy_timeframe, close = %aggregated.close, "strategy bar closed");

        Some(NewBarEvent {
            symbol: symbol.to_string(),
            timeframe: self.strategy_timeframe.clone(),
            bar: aggregated,
        })
    }

    pub fn feed_timeframe(&self) -> &str {
        &self.feed_timeframe
    }

    pub fn strategy_timeframe(&self) -> &str {
        &self.strategy_timeframe
    }

    /// Most recent `n` strategy-timeframe bars, oldest first. Empty if the
    /// symbol hasn't produced one yet.
    pub fn recent_strategy_bars(&self, symbol: &str, n: usize) -> Vec<Bar> {
        self.strategy_bars
            .get(symbol)
            .map(|buf| buf.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }
}

/// Fold a contiguous run of feed bars (oldest first) into one coarser bar:
/// first open, max high, min low, last close, summed volume.
fn aggregate<'a>(bars: impl Iterator<Item = &'a Bar>) -> Bar {
    let mut iter = bars.peekable();
    let first = iter.peek().expect("aggregate called with empty window").clone();
    let mut open_time = first.open_time;
    let mut open = first.open;
    let mut high = Decimal::MIN;
    let mut low = Decimal::MAX;
    let mut close = first.close;
    let mut volume = Decimal::ZERO;
    let mut first_seen = false;

    for bar in iter {
        if !first_seen {
            open_time = bar.open_time;
            open = bar.open;
            first_seen = true;
        }
        high = high.max(bar.high);
        low = low.min(bar.low);
        close = bar.close;
        volume += bar.volume;
    }

    Bar { open_time, open, high, low, close, volume }
}
