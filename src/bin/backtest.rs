//! Offline replay harness. Replays historical bars through the exact same
//! `indicators::compute` → `SignalEngine::evaluate` → `Sizer::size` chain
//! the live orchestrator uses — no separate reimplementation of the
//! signal/sizing logic — reading CSV bars and simulating fills against
//! them.

use clap::Parser;
use rust_decimal::Decimal;
use spotbot::bar_store::BarStore;
use spotbot::config::BotConfig;
use spotbot::indicators;
use spotbot::ledger::TradeLedger;
use spotbot::model::ModelArtifact;
use spotbot::money::{Base, Price, Quote};
use spotbot::risk::Sizer;
use spotbot::signal::SignalEngine;
use spotbot::types::{AccountSnapshot, Bar, CloseReason, Side, SignalKind};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Replay historical bars through the live decision pipeline")]
struct Args {
    /// CSV file with columns: open_time_unix,open,high,low,close,volume
    #[arg(long)]
    bars: PathBuf,

    /// Config file to load strategy/risk parameters from.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Starting paper equity in quote currency.
    #[arg(long, default_value = "10000")]
    starting_equity: Decimal,
}

#[derive(Clone)]
struct OpenTrade {
    side: Side,
    quantity_base: Base,
    entry_price: Price,
    stop_loss: Price,
    take_profit: Price,
}

fn main() -> spotbot::error::BotResult<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let config = BotConfig::load(Some(&args.config))?;
    let model = ModelArtifact::load(&config.model.path)?;
    let ratio = config.aggregation_ratio()?;

    let bars = read_bars_csv(&args.bars)?;
    tracing::info!(count = bars.len(), "loaded bars for backtest");

    let mut bar_store = BarStore::new(ratio, config.timeframe_feed.clone(), config.timeframe_strategy.clone());
    let sizer = Sizer::new(&config);
    let engine = SignalEngine::new(&model, &config.filters, config.conf_threshold);
    let mut ledger = TradeLedger::new();

    let mut free_quote = Quote::new(args.starting_equity);
    let mut free_base = Base::ZERO;
    let mut open_trade: Option<OpenTrade> = None;

    for bar in bars {
        let mark = Price::new(bar.close);

        if let Some(trade) = open_trade.clone() {
            if let Some(reason) = exit_trigger(&trade, &bar) {
                let exit_price = exit_fill_price(&trade, reason);
                let (realized, new_quote, new_base) = settle(&trade, exit_price, free_quote, free_base);
                free_quote = new_quote;
                free_base = new_base;
                record_backtest_close(&mut ledger, &trade, exit_price, realized, reason);
                open_trade = None;
            }
        }

        let Some(event) = bar_store.push_feed_bar(&config.symbol, bar.clone()) else { continue };
        let _ = event;

        if open_trade.is_some() {
            continue;
        }

        let strategy_bars = bar_store.recent_strategy_bars(&config.symbol, indicators::MIN_WARMUP_BARS + 50);
        let Some(snapshot) = indicators::compute(&strategy_bars) else { continue };
        let last = strategy_bars.last().unwrap();

        let signal = engine.evaluate(&snapshot, last.open_time, last.close);
        if matches!(signal.kind, SignalKind::NoSignal) {
            continue;
        }

        let unrealized = Quote::ZERO;
        let account = AccountSnapshot::new(free_quote, free_base, mark, unrealized);
        match sizer.size(&signal, &account, 0) {
            Ok(intent) => {
                let side = signal.side().expect("sized intents always have a direction");
                let notional = intent.quantity_base * intent.entry_ref_price;
                match side {
                    Side::Long => free_quote -= notional,
                    // Simulated short sale: proceeds credited now, the
                    // borrowed base is repaid (and debited again) on close.
                    Side::Short => free_quote += notional,
                }
                open_trade = Some(OpenTrade {
                    side,
                    quantity_base: intent.quantity_base,
                    entry_price: intent.entry_ref_price,
                    stop_loss: intent.stop_loss,
                    take_profit: intent.take_profit,
                });
            }
            Err(e) => tracing::debug!(error = %e, "signal rejected by risk policy"),
        }
    }

    let realized_total = ledger.running_realized();
    tracing::info!(
        trades = ledger.entries().len(),
        realized_pnl = %realized_total,
        final_free_quote = %free_quote,
        "backtest complete"
    );
    println!("trades={} realized_pnl={} final_free_quote={}", ledger.entries().len(), realized_total, free_quote);

    Ok(())
}

fn exit_trigger(trade: &OpenTrade, bar: &Bar) -> Option<CloseReason> {
    match trade.side {
        Side::Long => {
            if bar.low <= trade.stop_loss.0 {
                Some(CloseReason::StopLoss)
            } else if bar.high >= trade.take_profit.0 {
                Some(CloseReason::TakeProfit)
            } else {
                None
            }
        }
        Side::Short => {
            if bar.high >= trade.stop_loss.0 {
                Some(CloseReason::StopLoss)
            } else if bar.low <= trade.take_profit.0 {
                Some(CloseReason::TakeProfit)
            } else {
                None
            }
        }
    }
}

fn exit_fill_price(trade: &OpenTrade, reason: CloseReason) -> Price {
    match reason {
        CloseReason::StopLoss => trade.stop_loss,
        CloseReason::TakeProfit => trade.take_profit,
        _ => trade.entry_price,
    }
}

fn settle(trade: &OpenTrade, exit_price: Price, free_quote: Quote, free_base: Base) -> (Quote, Quote, Base) {
    let diff = exit_price.0 - trade.entry_price.0;
    let realized = Quote::new(diff * trade.quantity_base.0 * trade.side.sign());
    match trade.side {
        Side::Long => {
            let proceeds = trade.quantity_base * exit_price;
            (realized, free_quote + proceeds, free_base)
        }
        Side::Short => {
            let buyback_cost = trade.quantity_base * exit_price;
            (realized, free_quote - buyback_cost, free_base)
        }
    }
}

fn record_backtest_close(ledger: &mut TradeLedger, trade: &OpenTrade, exit_price: Price, realized: Quote, reason: CloseReason) {
    use spotbot::types::Position;
    let synthetic = Position {
        id: "backtest".into(),
        symbol: "backtest".into(),
        side: trade.side,
        quantity_base: trade.quantity_base,
        entry_price: trade.entry_price,
        opened_at: chrono::Utc::now(),
        stop_loss: trade.stop_loss,
        take_profit: trade.take_profit,
        trailing_activated: false,
        peak_favorable_price: trade.entry_price,
        state: spotbot::types::PositionState::Closed,
        entry_fees_quote: Quote::ZERO,
        total_fees_quote: Some(Quote::ZERO),
        realized_pnl_quote: Some(realized),
        close_reason: Some(reason),
    };
    ledger.record_close(&synthetic, exit_price);
}

fn read_bars_csv(path: &PathBuf) -> spotbot::error::BotResult<Vec<Bar>> {
    let content = std::fs::read_to_string(path)?;
    let mut bars = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("open_time") {
            continue;
        }
        let cols: Vec<&str> = line.split(',').collect();
        if cols.len() < 6 {
            continue;
        }
        let open_time_unix: i64 = cols[0]
            .parse()
            .map_err(|_| spotbot::error::BotError::Config(format!("bad timestamp in {}", path.display())))?;
        bars.push(Bar {
            open_time: chrono::DateTime::from_timestamp(open_time_unix, 0).unwrap_or_else(chrono::Utc::now),
            open: parse_dec(cols[1])?,
            high: parse_dec(cols[2])?,
            low: parse_dec(cols[3])?,
            close: parse_dec(cols[4])?,
            volume: parse_dec(cols[5])?,
        });
    }
    Ok(bars)
}

fn parse_dec(s: &str) -> spotbot::error::BotResult<Decimal> {
    s.trim()
        .parse()
        .map_err(|_| spotbot::error::BotError::Config(format!("cannot parse decimal: {s}")))
}
