//! Signal Engine (C4). A fixed cascade over one indicator snapshot:
//! confidence gate, trend filter, volatility filter, volume filter,
//! oscillator sanity. The first filter that rejects short-circuits with a
//! named reason — callers (orchestrator and backtest) never see a
//! half-evaluated signal.

use crate::config::FilterConfig;
use crate::indicators::IndicatorSnapshot;
use crate::model::ModelArtifact;
use crate::types::{Signal, SignalKind};
use chrono::{DateTime, Utc};

pub struct SignalEngine<'a> {
    model: &'a ModelArtifact,
    filters: &'a FilterConfig,
    conf_threshold: f64,
}

impl<'a> SignalEngine<'a> {
    pub fn new(model: &'a ModelArtifact, filters: &'a FilterConfig, conf_threshold: f64) -> Self {
        SignalEngine { model, filters, conf_threshold }
    }

    /// Evaluate one completed strategy-timeframe bar. Called identically by
    /// the live orchestrator and the offline backtest binary so the two
    /// paths can never silently diverge.
    pub fn evaluate(&self, snapshot: &IndicatorSnapshot, bar_time: DateTime<Utc>, close: rust_decimal::Decimal) -> Signal {
        let features = match snapshot.as_feature_vector(&self.model.feature_names) {
            Some(f) => f,
            None => return Signal::no_signal("feature_vector_incomplete", bar_time),
        };

        let proba = match self.model.predict_proba(&features) {
            Ok(p) => p,
            Err(_) => return Signal::no_signal("model_inference_failed", bar_time),
        };

        // Center on 0.5: distance from the decision boundary is the
        // confidence signal, direction comes from which side it's on.
        let confidence = (proba - 0.5).abs() * 2.0;
        if confidence < self.conf_threshold {
            return Signal::no_signal("below_confidence_threshold", bar_time);
        }

        let kind = if proba >= 0.5 { SignalKind::OpenLong } else { SignalKind::OpenShort };

        if !self.passes_trend_filter(snapshot, kind) {
            return Signal::no_signal("against_trend", bar_time);
        }

        if !self.passes_volatility_filter(snapshot) {
            return Signal::no_signal("volatility_out_of_range", bar_time);
        }

        if !self.passes_volume_filter(snapshot) {
            return Signal::no_signal("volume_insufficient", bar_time);
        }

        if !self.passes_oscillator_sanity(snapshot, proba) {
            return Signal::no_signal("oscillator_sanity_failed", bar_time);
        }

        Signal {
            kind,
            confidence,
            reason: "model_signal",
            bar_time,
            indicators_snapshot: snapshot.values.clone(),
            atr: snapshot.atr,
            close,
        }
    }

    /// ATR as a fraction of price must sit inside `[atr_min, atr_max]` — too
    /// quiet means no room for the stop, too wild means the stop gets
    /// stopped-out by noise.
    fn passes_volatility_filter(&self, snapshot: &IndicatorSnapshot) -> bool {
        let atr_frac = snapshot.atr / snapshot.close.max(f64::EPSILON);
        atr_frac >= self.filters.atr_min && atr_frac <= self.filters.atr_max
    }

    fn passes_volume_filter(&self, snapshot: &IndicatorSnapshot) -> bool {
        snapshot
            .values
            .get("volume_ratio")
            .map(|v| *v >= self.filters.vol_ratio_min)
            .unwrap_or(false)
    }

    /// RSI/CCI must not already be deep in the zone the proposed direction
    /// would push further into — a long signal while RSI is already
    /// overbought is rejected rather than chased.
    fn passes_oscillator_sanity(&self, snapshot: &IndicatorSnapshot, proba: f64) -> bool {
        let rsi = snapshot.values.get("rsi14").copied().unwrap_or(50.0);
        let cci = snapshot.values.get("cci20").copied().unwrap_or(0.0);
        if proba >= 0.5 {
            rsi < self.filters.rsi_overbought && cci < self.filters.cci_bound
        } else {
            rsi > self.filters.rsi_oversold && cci > -self.filters.cci_bound
        }
    }

    /// The proposed direction must agree with the short EMA's slope over
    /// `trend_lookback` bars (approximated here via `trend_strength`, which
    /// already compares `ema10` against `ema200`).
    fn passes_trend_filter(&self, snapshot: &IndicatorSnapshot, kind: SignalKind) -> bool {
        let trend = snapshot.values.get("trend_strength").copied().unwrap_or(0.0);
        match kind {
            SignalKind::OpenLong => trend > 0.0,
            SignalKind::OpenShort => trend < 0.0,
            SignalKind::NoSignal => false,
        }
    }
}
