//! Indicator & Feature Pipeline (C3). Every indicator is a pure function
//! over a bar window; the pipeline drops any snapshot with a NaN in it
//! rather than imputing a value. Small free functions over bar slices, no
//! indicator object graph.

use crate::types::Bar;
use std::collections::HashMap;

/// One fully-computed indicator snapshot for the bar at the end of a
/// window. `as_feature_vector` extracts values by name in the order the
/// loaded model expects — the order is fixed at training time and must
/// match exactly at inference time.
#[derive(Clone, Debug)]
pub struct IndicatorSnapshot {
    pub values: HashMap<String, f64>,
    pub atr: f64,
    pub close: f64,
}

impl IndicatorSnapshot {
    /// `None` if any named feature is missing or NaN — the caller (the
    /// signal engine) treats that bar as "no signal" rather than guessing.
    pub fn as_feature_vector(&self, feature_names: &[String]) -> Option<Vec<f64>> {
        let mut out = Vec::with_capacity(feature_names.len());
        for name in feature_names {
            let v = *self.values.get(name)?;
            if v.is_nan() || v.is_infinite() {
                return None;
            }
            out.push(v);
        }
        Some(out)
    }
}

/// Minimum bars needed before any indicator here produces a real value.
/// EMA(200) is the longest lookback in the set.
pub const MIN_WARMUP_BARS: usize = 210;

/// Compute the full indicator set for the bar at the end of `bars`.
/// Returns `None` if there isn't enough history to warm up every indicator
/// — fewer bars than the longest lookback produces no feature vector, not
/// a partially-populated one.
pub fn compute(bars: &[Bar]) -> Option<IndicatorSnapshot> {
    if bars.len() < MIN_WARMUP_BARS {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| dec_to_f64(b.close)).collect();
    let highs: Vec<f64> = bars.iter().map(|b| dec_to_f64(b.high)).collect();
    let lows: Vec<f64> = bars.iter().map(|b| dec_to_f64(b.low)).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| dec_to_f64(b.volume)).collect();
    let opens: Vec<f64> = bars.iter().map(|b| dec_to_f64(b.open)).collect();

    let mut values = HashMap::new();

    let ema10 = ema(&closes, 10);
    let ema20 = ema(&closes, 20);
    let ema200 = ema(&closes, 200);
    values.insert("ema10".into(), last(&ema10));
    values.insert("ema20".into(), last(&ema20));
    values.insert("ema200".into(), last(&ema200));

    let rsi14 = rsi(&closes, 14);
    values.insert("rsi14".into(), last(&rsi14));

    let (macd_line, signal_line) = macd(&closes, 12, 26, 9);
    values.insert("macd".into(), last(&macd_line));
    values.insert("macd_signal".into(), last(&signal_line));
    values.insert("macd_hist".into(), last(&macd_line) - last(&signal_line));

    let atr14 = atr(&highs, &lows, &closes, 14);
    let atr_last = last(&atr14);
    values.insert("atr14".into(), atr_last);

    let adx14 = adx(&highs, &lows, &closes, 14);
    values.insert("adx14".into(), last(&adx14));

    let (bb_upper, bb_mid, bb_lower) = bollinger_bands(&closes, 20, 2.0);
    values.insert("bb_upper".into(), last(&bb_upper));
    values.insert("bb_mid".into(), last(&bb_mid));
    values.insert("bb_lower".into(), last(&bb_lower));
    let bb_width = (last(&bb_upper) - last(&bb_lower)) / last(&bb_mid).max(f64::EPSILON);
    values.insert("bb_width".into(), bb_width);

    let (stoch_k, stoch_d) = stochastic(&highs, &lows, &closes, 14, 3, 3);
    values.insert("stoch_k".into(), last(&stoch_k));
    values.insert("stoch_d".into(), last(&stoch_d));

    let cci20 = cci(&highs, &lows, &closes, 20);
    values.insert("cci20".into(), last(&cci20));

    let sar = parabolic_sar(&highs, &lows, 0.02, 0.2);
    values.insert("psar".into(), last(&sar));

    let mom5 = momentum(&closes, 5);
    let mom10 = momentum(&closes, 10);
    values.insert("momentum5".into(), last(&mom5));
    values.insert("momentum10".into(), last(&mom10));

    let vol_ratio = volume_ratio(&volumes, 20);
    values.insert("volume_ratio".into(), last(&vol_ratio));

    let log_ret = log_return(&closes);
    values.insert("log_return".into(), last(&log_ret));

    let close_last = *closes.last().unwrap();
    values.insert("volatility_proxy".into(), atr_last / close_last.max(f64::EPSILON));
    values.insert("trend_strength".into(), (last(&ema10) - last(&ema200)) / close_last.max(f64::EPSILON));

    let ha = heikin_ashi(&opens, &highs, &lows, &closes);
    let (ha_o, ha_h, ha_l, ha_c) = ha.last().copied().unwrap_or((f64::NAN, f64::NAN, f64::NAN, f64::NAN));
    values.insert("ha_open".into(), ha_o);
    values.insert("ha_high".into(), ha_h);
    values.insert("ha_low".into(), ha_l);
    values.insert("ha_close".into(), ha_c);

    if values.values().any(|v| v.is_nan() || v.is_infinite()) {
        return None;
    }

    Some(IndicatorSnapshot { values, atr: atr_last, close: close_last })
}

fn dec_to_f64(d: rust_decimal::Decimal) -> f64 {
    d.to_string().parse().unwrap_or(f64::NAN)
}

fn last(v: &[f64]) -> f64 {
    v.last().copied().unwrap_or(f64::NAN)
}

pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    out
}

pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;
    let mut prev = seed;
    for (i, &v) in values.iter().enumerate().skip(period) {
        let e = v * k + prev * (1.0 - k);
        out[i] = e;
        prev = e;
    }
    out
}

pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if closes.len() <= period {
        return out;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in (period + 1)..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>) {
    let ema_fast = ema(closes, fast);
    let ema_slow = ema(closes, slow);
    let macd_line: Vec<f64> = ema_fast.iter().zip(ema_slow.iter()).map(|(f, s)| f - s).collect();
    let signal_line = ema(&macd_line, signal);
    (macd_line, signal_line)
}

pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; highs.len()];
    if highs.is_empty() {
        return out;
    }
    out[0] = highs[0] - lows[0];
    for i in 1..highs.len() {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        out[i] = hl.max(hc).max(lc);
    }
    out
}

pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let tr = true_range(highs, lows, closes);
    wilder_smooth(&tr, period)
}

fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if values.len() <= period {
        return out;
    }
    let seed: f64 = values[1..=period].iter().sum::<f64>() / period as f64;
    out[period] = seed;
    let mut prev = seed;
    for i in (period + 1)..values.len() {
        let smoothed = (prev * (period as f64 - 1.0) + values[i]) / period as f64;
        out[i] = smoothed;
        prev = smoothed;
    }
    out
}

pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = highs.len();
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }
    let tr = true_range(highs, lows, closes);
    let smoothed_tr = wilder_smooth(&tr, period);
    let smoothed_plus = wilder_smooth(&plus_dm, period);
    let smoothed_minus = wilder_smooth(&minus_dm, period);

    let mut dx = vec![f64::NAN; n];
    for i in 0..n {
        if smoothed_tr[i].is_nan() || smoothed_tr[i] == 0.0 {
            continue;
        }
        let plus_di = 100.0 * smoothed_plus[i] / smoothed_tr[i];
        let minus_di = 100.0 * smoothed_minus[i] / smoothed_tr[i];
        let sum = plus_di + minus_di;
        if sum > 0.0 {
            dx[i] = 100.0 * (plus_di - minus_di).abs() / sum;
        }
    }
    wilder_smooth(&dx, period)
}

pub fn bollinger_bands(closes: &[f64], period: usize, k: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mid = sma(closes, period);
    let mut upper = vec![f64::NAN; closes.len()];
    let mut lower = vec![f64::NAN; closes.len()];
    if closes.len() < period {
        return (upper, mid, lower);
    }
    for i in (period - 1)..closes.len() {
        let window = &closes[i + 1 - period..=i];
        let mean = mid[i];
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        let sd = variance.sqrt();
        upper[i] = mean + k * sd;
        lower[i] = mean - k * sd;
    }
    (upper, mid, lower)
}

pub fn stochastic(highs: &[f64], lows: &[f64], closes: &[f64], period: usize, smooth_k: usize, smooth_d: usize) -> (Vec<f64>, Vec<f64>) {
    let n = closes.len();
    let mut raw_k = vec![f64::NAN; n];
    if n < period {
        return (raw_k.clone(), raw_k);
    }
    for i in (period - 1)..n {
        let hh = highs[i + 1 - period..=i].iter().cloned().fold(f64::MIN, f64::max);
        let ll = lows[i + 1 - period..=i].iter().cloned().fold(f64::MAX, f64::min);
        let range = hh - ll;
        raw_k[i] = if range.abs() < f64::EPSILON { 50.0 } else { 100.0 * (closes[i] - ll) / range };
    }
    let k = sma(&raw_k, smooth_k);
    let d = sma(&k, smooth_d);
    (k, d)
}

pub fn cci(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let typical: Vec<f64> = (0..n).map(|i| (highs[i] + lows[i] + closes[i]) / 3.0).collect();
    let tp_sma = sma(&typical, period);
    let mut out = vec![f64::NAN; n];
    if n < period {
        return out;
    }
    for i in (period - 1)..n {
        let window = &typical[i + 1 - period..=i];
        let mean = tp_sma[i];
        let mean_dev = window.iter().map(|v| (v - mean).abs()).sum::<f64>() / period as f64;
        out[i] = if mean_dev.abs() < f64::EPSILON {
            0.0
        } else {
            (typical[i] - mean) / (0.015 * mean_dev)
        };
    }
    out
}

pub fn parabolic_sar(highs: &[f64], lows: &[f64], af_step: f64, af_max: f64) -> Vec<f64> {
    let n = highs.len();
    let mut out = vec![f64::NAN; n];
    if n < 2 {
        return out;
    }
    let mut uptrend = highs[1] >= highs[0];
    let mut sar = if uptrend { lows[0] } else { highs[0] };
    let mut ep = if uptrend { highs[0] } else { lows[0] };
    let mut af = af_step;
    out[0] = sar;

    for i in 1..n {
        sar += af * (ep - sar);
        if uptrend {
            sar = sar.min(lows[i - 1]).min(if i >= 2 { lows[i - 2] } else { lows[i - 1] });
            if lows[i] < sar {
                uptrend = false;
                sar = ep;
                ep = lows[i];
                af = af_step;
            } else if highs[i] > ep {
                ep = highs[i];
                af = (af + af_step).min(af_max);
            }
        } else {
            sar = sar.max(highs[i - 1]).max(if i >= 2 { highs[i - 2] } else { highs[i - 1] });
            if highs[i] > sar {
                uptrend = true;
                sar = ep;
                ep = highs[i];
                af = af_step;
            } else if lows[i] < ep {
                ep = lows[i];
                af = (af + af_step).min(af_max);
            }
        }
        out[i] = sar;
    }
    out
}

pub fn momentum(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    for i in period..closes.len() {
        out[i] = closes[i] - closes[i - period];
    }
    out
}

pub fn volume_ratio(volumes: &[f64], period: usize) -> Vec<f64> {
    let avg = sma(volumes, period);
    volumes
        .iter()
        .zip(avg.iter())
        .map(|(v, a)| if a.is_nan() || *a == 0.0 { f64::NAN } else { v / a })
        .collect()
}

pub fn log_return(closes: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    for i in 1..closes.len() {
        if closes[i - 1] > 0.0 && closes[i] > 0.0 {
            out[i] = (closes[i] / closes[i - 1]).ln();
        }
    }
    out
}

/// Heikin-Ashi smoothed candles; only the close of the final synthetic
/// candle is used downstream, but open/high/low are computed for
/// completeness and for callers that want the full series.
pub fn heikin_ashi(opens: &[f64], highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<(f64, f64, f64, f64)> {
    let n = closes.len();
    let mut out = Vec::with_capacity(n);
    if n == 0 {
        return out;
    }
    let mut prev_open = opens[0];
    let mut prev_close = closes[0];
    for i in 0..n {
        let ha_close = (opens[i] + highs[i] + lows[i] + closes[i]) / 4.0;
        let ha_open = if i == 0 { (opens[i] + closes[i]) / 2.0 } else { (prev_open + prev_close) / 2.0 };
        let ha_high = highs[i].max(ha_open).max(ha_close);
        let ha_low = lows[i].min(ha_open).min(ha_close);
        out.push((ha_open, ha_high, ha_low, ha_close));
        prev_open = ha_open;
        prev_close = ha_close;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn synthetic_bars(n: usize) -> Vec<Bar> {
        let mut bars = Vec::with_capacity(n);
        let mut price = dec!(100.0);
        for i in 0..n {
            let drift = Decimal::new((i % 7) as i64 - 3, 1);
            price += drift;
            bars.push(Bar {
                open_time: Utc.timestamp_opt(1_700_000_000 + i as i64 * 300, 0).unwrap(),
                open: price,
                high: price + dec!(1.0),
                low: price - dec!(1.0),
                close: price + Decimal::new((i % 3) as i64, 1),
                volume: dec!(100) + Decimal::new(i as i64, 0),
            });
        }
        bars
    }

    #[test]
    fn too_few_bars_returns_none() {
        let bars = synthetic_bars(50);
        assert!(compute(&bars).is_none());
    }

    #[test]
    fn enough_bars_produce_a_snapshot_with_no_nans() {
        let bars = synthetic_bars(MIN_WARMUP_BARS + 5);
        let snap = compute(&bars).expect("should warm up");
        assert!(snap.values.values().all(|v| v.is_finite()));
        assert!(snap.atr > 0.0);
    }

    #[test]
    fn feature_vector_respects_requested_order() {
        let bars = synthetic_bars(MIN_WARMUP_BARS + 5);
        let snap = compute(&bars).unwrap();
        let names = vec!["ema10".to_string(), "rsi14".to_string()];
        let vec = snap.as_feature_vector(&names).unwrap();
        assert_eq!(vec.len(), 2);
        assert_eq!(vec[0], snap.values["ema10"]);
        assert_eq!(vec[1], snap.values["rsi14"]);
    }

    #[test]
    fn missing_feature_name_yields_none() {
        let bars = synthetic_bars(MIN_WARMUP_BARS + 5);
        let snap = compute(&bars).unwrap();
        let names = vec!["not_a_real_feature".to_string()];
        assert!(snap.as_feature_vector(&names).is_none());
    }

    #[test]
    fn rsi_is_bounded() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let r = rsi(&closes, 14);
        for v in r.iter().skip(14) {
            assert!(*v >= 0.0 && *v <= 100.0);
        }
    }
}
