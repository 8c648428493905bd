//! Orchestrator (C8). The live main loop: fetch market state, reconcile
//! against the exchange, update trailing stops, fold in any new bar,
//! evaluate a signal, size and place an entry if warranted, report status,
//! and sleep until the next fixed-cadence tick. One struct method per
//! responsibility rather than a single giant loop function.
//!
//! Both this loop and `bin/backtest.rs` call the exact same
//! `indicators::compute` → `SignalEngine::evaluate` → `Sizer::size` chain,
//! so live and offline paths cannot silently diverge.

use crate::bar_store::BarStore;
use crate::config::BotConfig;
use crate::error::BotError;
use crate::exchange::ExchangeGateway;
use crate::indicators;
use crate::ledger::TradeLedger;
use crate::model::ModelArtifact;
use crate::money::Quote;
use crate::persistence;
use crate::position_manager::PositionManager;
use crate::risk::Sizer;
use crate::signal::SignalEngine;
use crate::telegram::TelegramBot;
use crate::types::{AccountSnapshot, CloseReason, OrderSide};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Why `Orchestrator::run` returned: drives the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// First ctrl-c (or normal completion): the current cycle finished.
    Graceful,
    /// Second ctrl-c: aborted after the in-flight gateway call, no further
    /// orders placed.
    Aborted,
}

/// Bounded polling for order-fill confirmation. A market order on a liquid
/// spot pair fills within one or two polls; the cap exists so a stuck order
/// degrades to a named transient error instead of hanging the cycle.
const FILL_POLL_MAX_ATTEMPTS: u32 = 10;
const FILL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// State snapshot path. Flat, next to the binary, rather than under the
/// model directory — it is runtime state, not a config artifact.
const STATE_FILE_PATH: &str = "spotbot_state.json";

pub struct Orchestrator<G: ExchangeGateway> {
    gateway: Arc<G>,
    config: BotConfig,
    model: ModelArtifact,
    bar_store: BarStore,
    position_manager: PositionManager,
    ledger: TradeLedger,
    telegram: TelegramBot,
    day_started_at: DateTime<Utc>,
    starting_equity: Quote,
    trading_disabled: bool,
    hard_abort: watch::Receiver<bool>,
}

impl<G: ExchangeGateway> Orchestrator<G> {
    pub async fn new(
        gateway: Arc<G>,
        config: BotConfig,
        telegram: TelegramBot,
        hard_abort: watch::Receiver<bool>,
    ) -> Result<Self, BotError> {
        let model = ModelArtifact::load(&config.model.path)?;
        let ratio = config.aggregation_ratio()?;
        let mut bar_store = BarStore::new(ratio, config.timeframe_feed.clone(), config.timeframe_strategy.clone());
        let mut position_manager = PositionManager::new(&config);
        let mut ledger = TradeLedger::new();
        if let Some(state) = persistence::load(std::path::Path::new(STATE_FILE_PATH))? {
            tracing::info!(
                positions = state.positions.len(),
                ledger_entries = state.ledger_entries.len(),
                "restored persisted state"
            );
            position_manager.restore(state.positions);
            ledger.restore(state.ledger_entries);
        }

        let seed_bars = gateway
            .fetch_bars(&config.symbol, &config.timeframe_feed, indicators::MIN_WARMUP_BARS * ratio.max(1))
            .await?;
        bar_store.seed(&config.symbol, seed_bars);

        let balances = gateway.fetch_balances().await?;
        let ticker = gateway.fetch_ticker(&config.symbol).await?;
        let starting_equity = AccountSnapshot::new(balances.free_quote, balances.free_base, ticker.last, Quote::ZERO).equity_quote;

        Ok(Orchestrator {
            gateway,
            config,
            model,
            bar_store,
            position_manager,
            ledger,
            telegram,
            day_started_at: Utc::now(),
            starting_equity,
            trading_disabled: false,
            hard_abort,
        })
    }

    /// Run until `shutdown` (first ctrl-c) or `self.hard_abort` (second
    /// ctrl-c) is signalled. A graceful shutdown finishes its current cycle
    /// before exiting; a hard abort returns as soon as the in-flight
    /// gateway call completes, skipping any further order placement.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<ShutdownReason, BotError> {
        let period = Duration::from_secs(self.config.cycle_period_seconds);
        loop {
            if *self.hard_abort.borrow() {
                tracing::warn!("hard abort requested, exiting main loop immediately");
                return Ok(ShutdownReason::Aborted);
            }
            if *shutdown.borrow() {
                tracing::info!("shutdown requested, exiting main loop");
                return Ok(self.shutdown_gracefully().await);
            }

            if let Err(e) = self.run_cycle().await {
                match e.kind() {
                    crate::error::ErrorKind::Fatal => return Err(e),
                    _ => tracing::warn!(error = %e, "cycle failed, continuing"),
                }
            }

            if *self.hard_abort.borrow() {
                tracing::warn!("hard abort requested after cycle, exiting main loop immediately");
                return Ok(ShutdownReason::Aborted);
            }

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("shutdown requested during sleep, exiting main loop");
                        return Ok(self.shutdown_gracefully().await);
                    }
                }
                _ = self.hard_abort.changed() => {
                    if *self.hard_abort.borrow() {
                        tracing::warn!("hard abort requested during sleep, exiting main loop immediately");
                        return Ok(ShutdownReason::Aborted);
                    }
                }
            }
        }
    }

    async fn run_cycle(&mut self) -> Result<(), BotError> {
        self.maybe_reset_daily().await;
        #[cfg(feature = "jemalloc")]
        jemalloc_purge();

        let ticker = self.gateway.fetch_ticker(&self.config.symbol).await?;

        let gone = self.position_manager.reconcile(self.gateway.as_ref(), &self.config.symbol).await?;
        for position in gone {
            self.ledger.record_close(&position, ticker.last);
            self.telegram.notify_trade_close(&position).await;
        }

        let open_ids: Vec<String> = self.position_manager.all().map(|p| p.id.clone()).collect();
        for id in open_ids {
            self.position_manager.update_trailing(&id, ticker.last);
            if let Some(reason) = self.position_manager.check_exit_triggers(&id, ticker.last) {
                self.close_position(&id, reason).await?;
            }
        }

        let feed_bars = self.gateway.fetch_bars(&self.config.symbol, &self.config.timeframe_feed, 1).await?;
        let mut new_bar_closed = false;
        for bar in feed_bars {
            if self.bar_store.push_feed_bar(&self.config.symbol, bar).is_some() {
                new_bar_closed = true;
            }
        }

        if new_bar_closed && !self.trading_disabled {
            self.evaluate_and_maybe_enter().await?;
        }

        self.persist_state();

        Ok(())
    }

    /// Snapshot open positions and the ledger to disk. Best-effort: a write
    /// failure is logged and otherwise ignored, since losing one cycle's
    /// snapshot is recoverable on the next successful save.
    fn persist_state(&self) {
        if let Err(e) = persistence::save(std::path::Path::new(STATE_FILE_PATH), &self.position_manager, &self.ledger) {
            tracing::warn!(error = %e, "failed to persist state");
        }
    }

    async fn evaluate_and_maybe_enter(&mut self) -> Result<(), BotError> {
        let bars = self.bar_store.recent_strategy_bars(&self.config.symbol, indicators::MIN_WARMUP_BARS + 50);
        let Some(snapshot) = indicators::compute(&bars) else {
            tracing::debug!("not enough strategy bars yet for a feature vector");
            return Ok(());
        };
        let last_bar = bars.last().expect("non-empty after compute succeeds");

        let engine = SignalEngine::new(&self.model, &self.config.filters, self.config.conf_threshold);
        let signal = engine.evaluate(&snapshot, last_bar.open_time, last_bar.close);

        if matches!(signal.kind, crate::types::SignalKind::NoSignal) {
            tracing::debug!(reason = signal.reason, "no trade this bar");
            return Ok(());
        }

        let balances = self.gateway.fetch_balances().await?;
        let ticker = self.gateway.fetch_ticker(&self.config.symbol).await?;
        let unrealized = TradeLedger::unrealized_total(self.position_manager.all(), ticker.last);
        let account = AccountSnapshot::new(balances.free_quote, balances.free_base, ticker.last, unrealized);

        let sizer = Sizer::new(&self.config);
        match sizer.size(&signal, &account, self.position_manager.open_count()) {
            Ok(intent) => {
                if *self.hard_abort.borrow() {
                    tracing::warn!("hard abort requested, skipping new entry");
                    return Ok(());
                }

                let order_id = self
                    .gateway
                    .place_market_order(&intent.symbol, intent.side, intent.quantity_base)
                    .await?;
                let position_id = self.position_manager.register_opening(&intent, order_id.clone());

                // Confirm the fill from the exchange's own report — never
                // the pre-trade `entry_ref_price` — before the position is
                // considered OPEN.
                let filled =
                    crate::exchange::await_fill(self.gateway.as_ref(), &intent.symbol, &order_id, FILL_POLL_MAX_ATTEMPTS, FILL_POLL_INTERVAL)
                        .await?;
                self.position_manager
                    .confirm_open(&position_id, filled.avg_fill_price, filled.filled_qty, filled.fees_quote);

                if *self.hard_abort.borrow() {
                    tracing::warn!(position_id, "hard abort requested after entry fill, skipping bracket orders");
                    if let Some(position) = self.position_manager.get(&position_id) {
                        self.telegram.notify_trade_open(position).await;
                    }
                    return Ok(());
                }

                let side_to_close = match intent.side {
                    OrderSide::Buy => OrderSide::Sell,
                    OrderSide::Sell => OrderSide::Buy,
                };
                self.gateway
                    .place_stop_loss(&intent.symbol, side_to_close, intent.quantity_base, intent.stop_loss.0)
                    .await?;
                self.gateway
                    .place_take_profit(&intent.symbol, side_to_close, intent.quantity_base, intent.take_profit.0)
                    .await?;

                if let Some(position) = self.position_manager.get(&position_id) {
                    self.telegram.notify_trade_open(position).await;
                }
            }
            Err(BotError::PolicyRejection { reason, detail }) => {
                tracing::info!(reason, detail, "signal rejected by risk policy");
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    async fn close_position(&mut self, id: &str, reason: CloseReason) -> Result<(), BotError> {
        let Some(position) = self.position_manager.get(id).cloned() else { return Ok(()) };
        self.position_manager.begin_closing(id);

        let side_to_close = position.side.closing_side();
        let order_id = self.gateway.place_market_order(&position.symbol, side_to_close, position.quantity_base).await?;

        // As with entry, the exit price/fees come from the confirmed fill,
        // not a live ticker quote sampled after the order was sent.
        let filled =
            crate::exchange::await_fill(self.gateway.as_ref(), &position.symbol, &order_id, FILL_POLL_MAX_ATTEMPTS, FILL_POLL_INTERVAL).await?;
        if let Some(closed) = self.position_manager.confirm_closed(id, filled.avg_fill_price, reason, filled.fees_quote) {
            self.ledger.record_close(&closed, filled.avg_fill_price);
            self.telegram.notify_trade_close(&closed).await;
        }
        Ok(())
    }

    /// Closes every OPEN position at market before a graceful exit, when
    /// `shutdown.flatten_on_exit` is set. Never runs on a hard abort — a
    /// second ctrl-c means no further orders, flattened or otherwise.
    async fn shutdown_gracefully(&mut self) -> ShutdownReason {
        if self.config.shutdown.flatten_on_exit {
            self.flatten_all_positions().await;
        }
        self.persist_state();
        ShutdownReason::Graceful
    }

    async fn flatten_all_positions(&mut self) {
        let open_ids: Vec<String> = self
            .position_manager
            .all()
            .filter(|p| p.state == crate::types::PositionState::Open)
            .map(|p| p.id.clone())
            .collect();
        for id in open_ids {
            tracing::info!(position_id = %id, "flattening position on shutdown");
            if let Err(e) = self.close_position(&id, CloseReason::Manual).await {
                tracing::warn!(error = %e, position_id = %id, "failed to flatten position on shutdown");
            }
        }
    }

    /// Rolls `day_started_at` forward at UTC midnight and re-arms trading
    /// if it had been disabled.
    async fn maybe_reset_daily(&mut self) {
        let now = Utc::now();
        if now.date_naive() != self.day_started_at.date_naive() {
            let trade_count = self.ledger.entries().len();
            let realized = self.ledger.running_realized();
            tracing::info!(%realized, trade_count, "daily reset");
            self.telegram.notify_daily_summary(realized, trade_count).await;
            self.day_started_at = now;
            self.starting_equity = self.starting_equity + realized;
            self.trading_disabled = false;
        }
    }
}

/// Advances jemalloc's epoch, which causes it to evaluate decay windows and
/// release dirty pages back to the OS. Called once per cycle rather than on
/// a timer so it rides the existing cadence instead of a second clock.
#[cfg(feature = "jemalloc")]
fn jemalloc_purge() {
    use tikv_jemalloc_ctl::epoch;
    if let Ok(e) = epoch::mib() {
        let _ = e.advance();
    }
    tracing::debug!("jemalloc: epoch advanced, dirty pages scheduled for release");
}
