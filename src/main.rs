#[cfg(feature = "jemalloc")]
use tikv_jemallocator::Jemalloc;
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::Parser;
use spotbot::config::{BotConfig, Cli};
use spotbot::error::exit_code;
use spotbot::exchange::binance::BinanceGateway;
use spotbot::exchange::dry_run::DryRunGateway;
use spotbot::orchestrator::{Orchestrator, ShutdownReason};
use spotbot::telegram::TelegramBot;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ExitCode {
    let _logging_guard = spotbot::logging::init();
    let cli = Cli::parse();

    let config = match BotConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(exit_code::CONFIG_ERROR as u8);
        }
    };

    if !cli.live && !cli.dry_run {
        tracing::error!("pass --live or --dry-run to start the orchestrator; neither was set");
        return ExitCode::from(exit_code::CONFIG_ERROR as u8);
    }

    let telegram = TelegramBot::new(std::env::var("TELEGRAM_BOT_TOKEN").ok(), std::env::var("TELEGRAM_CHAT_ID").ok());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (hard_abort_tx, hard_abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut presses: u32 = 0;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                break;
            }
            presses += 1;
            if presses == 1 {
                tracing::info!("ctrl-c received, shutting down gracefully (press again to abort immediately)");
                let _ = shutdown_tx.send(true);
            } else {
                tracing::warn!("second ctrl-c received, aborting after the in-flight gateway call");
                let _ = hard_abort_tx.send(true);
                break;
            }
        }
    });

    let sandbox = config.exchange.sandbox;
    let base_gateway = match BinanceGateway::new(sandbox) {
        Ok(g) => g,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct exchange gateway");
            return ExitCode::from(exit_code::AUTH_ERROR as u8);
        }
    };

    telegram.notify_start(&config.symbol, sandbox).await;

    let result = if cli.dry_run {
        run_with_gateway(Arc::new(DryRunGateway::new(base_gateway)), config, telegram, shutdown_rx, hard_abort_rx).await
    } else {
        run_with_gateway(Arc::new(base_gateway), config, telegram, shutdown_rx, hard_abort_rx).await
    };

    match result {
        Ok(ShutdownReason::Graceful) => ExitCode::from(exit_code::GRACEFUL as u8),
        Ok(ShutdownReason::Aborted) => ExitCode::from(exit_code::INTERRUPTED as u8),
        Err(e) => {
            tracing::error!(error = %e, kind = ?e.kind(), "orchestrator exited with error");
            ExitCode::from(exit_code::UNRECOVERABLE_EXCHANGE as u8)
        }
    }
}

async fn run_with_gateway<G: spotbot::exchange::ExchangeGateway + 'static>(
    gateway: Arc<G>,
    config: BotConfig,
    telegram: TelegramBot,
    shutdown_rx: watch::Receiver<bool>,
    hard_abort_rx: watch::Receiver<bool>,
) -> spotbot::error::BotResult<ShutdownReason> {
    let mut orchestrator = Orchestrator::new(gateway, config, telegram, hard_abort_rx).await?;
    orchestrator.run(shutdown_rx).await
}
