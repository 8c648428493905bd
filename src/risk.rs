//! Risk & Sizing (C5). Turns a signal into a validated `OrderIntent` or a
//! named `PolicyRejection` — never partially applies a sizing rule.
//! Config-driven parameters throughout, no hardcoded-symbol constants.

use crate::config::BotConfig;
use crate::error::BotError;
use crate::money::{Base, Price, Quote};
use crate::types::{AccountSnapshot, OrderIntent, Side, Signal};
use rust_decimal::Decimal;

pub struct Sizer<'a> {
    config: &'a BotConfig,
}

impl<'a> Sizer<'a> {
    pub fn new(config: &'a BotConfig) -> Self {
        Sizer { config }
    }

    /// Size and validate one signal into an order intent. `open_positions`
    /// is the count of currently OPEN/OPENING positions for this symbol,
    /// used for the concurrency cap.
    pub fn size(&self, signal: &Signal, account: &AccountSnapshot, open_positions: usize) -> Result<OrderIntent, BotError> {
        let side = signal.side().ok_or_else(|| BotError::PolicyRejection {
            reason: "no_signal",
            detail: "cannot size a NoSignal".into(),
        })?;

        if open_positions >= self.config.max_concurrent_trades {
            return Err(BotError::PolicyRejection {
                reason: "max_concurrent_trades",
                detail: format!("{open_positions} open, cap {}", self.config.max_concurrent_trades),
            });
        }

        let atr_decimal = f64_to_decimal(signal.atr)?;
        let entry_ref = Price::new(signal.close);

        let (stop_loss, take_profit) = self.brackets(side, entry_ref, atr_decimal);

        let stop_distance = Price::new((entry_ref.0 - stop_loss.0).abs());
        if stop_distance.0 <= Decimal::ZERO {
            return Err(BotError::PolicyRejection {
                reason: "zero_stop_distance",
                detail: "ATR produced a zero or negative stop distance".into(),
            });
        }

        let risk_quote = Quote::new(account.equity_quote.0 * decimal_from_f64(self.config.risk_per_trade));
        let quantity_raw: Base = risk_quote / stop_distance;
        let quantity_base = quantity_raw.floor_to_step(self.config.qty_step);

        if quantity_base.0 <= Decimal::ZERO {
            return Err(BotError::PolicyRejection {
                reason: "min_lot_size",
                detail: format!("sized quantity {quantity_base} rounds to zero at step {}", self.config.qty_step),
            });
        }
        if quantity_base.0 < self.config.min_lot_size {
            return Err(BotError::PolicyRejection {
                reason: "min_lot_size",
                detail: format!("{quantity_base} below exchange minimum {}", self.config.min_lot_size),
            });
        }

        let notional = quantity_base * entry_ref;
        if notional.0 < self.config.min_notional {
            return Err(BotError::PolicyRejection {
                reason: "min_notional",
                detail: format!("{notional} below exchange minimum {}", self.config.min_notional),
            });
        }

        // Balance-side check: BUY consumes free quote, SELL consumes free
        // base. Checking the wrong side here is a real historical bug
        // class — a short that should check base balance checked against
        // quote balance instead.
        let fee_buffer = Decimal::ONE + decimal_from_f64(self.config.fee_buffer);
        match side {
            Side::Long => {
                let required = notional * fee_buffer;
                if required > account.free_quote {
                    return Err(BotError::PolicyRejection {
                        reason: "insufficient_quote_balance",
                        detail: format!("need {required}, have {}", account.free_quote),
                    });
                }
            }
            Side::Short => {
                let required = quantity_base * fee_buffer;
                if required > account.free_base {
                    return Err(BotError::PolicyRejection {
                        reason: "insufficient_base_balance",
                        detail: format!("need {required}, have {}", account.free_base),
                    });
                }
            }
        }

        // Sanity cap: actual risk at the computed quantity must not exceed
        // the configured risk fraction by more than 1% (rounding slack from
        // the lot-step floor).
        let actual_risk = quantity_base * stop_distance;
        let risk_cap = risk_quote * Decimal::new(101, 2);
        if actual_risk > risk_cap {
            return Err(BotError::PolicyRejection {
                reason: "risk_cap_exceeded",
                detail: format!("actual risk {actual_risk} exceeds cap {risk_cap}"),
            });
        }

        Ok(OrderIntent {
            side: side.exchange_buy_side(),
            symbol: self.config.symbol.clone(),
            quantity_base,
            entry_ref_price: entry_ref,
            stop_loss,
            take_profit,
            risk_quote: actual_risk,
        })
    }

    fn brackets(&self, side: Side, entry: Price, atr: Decimal) -> (Price, Price) {
        let sl_distance = atr * decimal_from_f64(self.config.sl_atr_multiplier);
        let tp_distance = atr * decimal_from_f64(self.config.tp_atr_multiplier);
        match side {
            Side::Long => (Price::new(entry.0 - sl_distance), Price::new(entry.0 + tp_distance)),
            Side::Short => (Price::new(entry.0 + sl_distance), Price::new(entry.0 - tp_distance)),
        }
    }
}

fn decimal_from_f64(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or(Decimal::ZERO)
}

fn f64_to_decimal(v: f64) -> Result<Decimal, BotError> {
    Decimal::from_f64_retain(v).ok_or_else(|| BotError::ModelIntegrity(format!("ATR value {v} is not representable as Decimal")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, FilterConfig, ModelConfig, ShutdownConfig};
    use crate::types::SignalKind;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn config() -> BotConfig {
        BotConfig {
            exchange: ExchangeConfig { name: "binance".into(), sandbox: true },
            symbol: "BTCUSDT".into(),
            timeframe_feed: "5".into(),
            timeframe_strategy: "15".into(),
            cycle_period_seconds: 30,
            risk_per_trade: 0.01,
            max_concurrent_trades: 1,
            sl_atr_multiplier: 2.0,
            tp_atr_multiplier: 4.0,
            trail_activation_profit_frac: 0.01,
            trail_retrace_frac: 0.01,
            conf_threshold: 0.1,
            filters: FilterConfig {
                atr_min: 0.001,
                atr_max: 0.2,
                vol_ratio_min: 1.0,
                trend_lookback: 5,
                rsi_overbought: 75.0,
                rsi_oversold: 25.0,
                cci_bound: 200.0,
            },
            model: ModelConfig { path: PathBuf::from("model") },
            shutdown: ShutdownConfig::default(),
            min_lot_size: dec!(0.001),
            min_notional: dec!(10),
            qty_step: dec!(0.001),
            tick_size: dec!(0.01),
            fee_buffer: 0.001,
            position_adoption: None,
        }
    }

    fn signal(kind: SignalKind, close: Decimal, atr: f64) -> Signal {
        Signal {
            kind,
            confidence: 0.5,
            reason: "test",
            bar_time: chrono::Utc::now(),
            indicators_snapshot: HashMap::new(),
            atr,
            close,
        }
    }

    fn account(free_quote: Decimal, free_base: Decimal, price: Decimal) -> AccountSnapshot {
        AccountSnapshot::new(Quote::new(free_quote), Base::new(free_base), Price::new(price), Quote::ZERO)
    }

    #[test]
    fn long_signal_sizes_within_risk_budget() {
        let cfg = config();
        let sizer = Sizer::new(&cfg);
        let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
        let acct = account(dec!(100000), dec!(0), dec!(30000));
        let intent = sizer.size(&sig, &acct, 0).unwrap();
        assert!(intent.risk_quote.0 <= dec!(1000) * dec!(1.01));
    }

    #[test]
    fn max_concurrent_trades_rejects() {
        let cfg = config();
        let sizer = Sizer::new(&cfg);
        let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
        let acct = account(dec!(100000), dec!(0), dec!(30000));
        let err = sizer.size(&sig, &acct, 1).unwrap_err();
        match err {
            BotError::PolicyRejection { reason, .. } => assert_eq!(reason, "max_concurrent_trades"),
            _ => panic!("expected PolicyRejection"),
        }
    }

    #[test]
    fn short_signal_checks_base_balance_not_quote() {
        let cfg = config();
        let sizer = Sizer::new(&cfg);
        let sig = signal(SignalKind::OpenShort, dec!(30000), 200.0);
        // Plenty of quote, zero base: a SELL must be rejected on base
        // balance even though quote balance looks ample.
        let acct = account(dec!(1_000_000), dec!(0), dec!(30000));
        let err = sizer.size(&sig, &acct, 0).unwrap_err();
        match err {
            BotError::PolicyRejection { reason, .. } => assert_eq!(reason, "insufficient_base_balance"),
            _ => panic!("expected insufficient_base_balance, a quote-balance check here would be the historical bug"),
        }
    }

    #[test]
    fn long_signal_checks_quote_balance() {
        let cfg = config();
        let sizer = Sizer::new(&cfg);
        let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
        let acct = account(dec!(1), dec!(0), dec!(30000));
        let err = sizer.size(&sig, &acct, 0).unwrap_err();
        match err {
            BotError::PolicyRejection { reason, .. } => assert_eq!(reason, "insufficient_quote_balance"),
            _ => panic!("expected insufficient_quote_balance"),
        }
    }

    #[test]
    fn below_min_notional_rejects() {
        let mut cfg = config();
        cfg.min_notional = dec!(100000);
        let sizer = Sizer::new(&cfg);
        let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
        let acct = account(dec!(100000), dec!(0), dec!(30000));
        let err = sizer.size(&sig, &acct, 0).unwrap_err();
        match err {
            BotError::PolicyRejection { reason, .. } => assert_eq!(reason, "min_notional"),
            _ => panic!("expected min_notional"),
        }
    }

    #[test]
    fn brackets_are_consistent_for_long() {
        let cfg = config();
        let sizer = Sizer::new(&cfg);
        let sig = signal(SignalKind::OpenLong, dec!(30000), 200.0);
        let acct = account(dec!(100000), dec!(0), dec!(30000));
        let intent = sizer.size(&sig, &acct, 0).unwrap();
        assert!(intent.stop_loss.0 < intent.entry_ref_price.0);
        assert!(intent.entry_ref_price.0 < intent.take_profit.0);
    }
}
