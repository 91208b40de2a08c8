use super::{SignalDecision, WindowSet};
use crate::indicators::{
    calculate_sma, closed_only, is_reversal_pattern, lower_closes_drop, recent_high,
    IndicatorSettings, IndicatorSnapshot,
};
use crate::models::{Candle, Timeframe};
use serde::{Deserialize, Serialize};

/// Configuration for entry/exit signal generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub fast_timeframe: Timeframe,
    pub confirm_timeframes: Vec<Timeframe>,
    pub trend_ma_period: usize, // SMA on each confirmation timeframe
    pub indicators: IndicatorSettings,
    pub rsi_lower: f64,
    pub rsi_upper: f64,
    pub rsi_overbought: f64,
    pub volume_factor: f64, // Multiple of baseline volume
    pub adx_threshold: f64,
    pub require_fresh_crossover: bool,
    // Exit settings
    pub retrace_pct: f64,          // Drop from recent high that forces exit
    pub retrace_lookback: usize,   // Closed candles scanned for the recent high
    pub reversal_drop_pct: f64,    // Cumulative drop for the lower-closes pattern
    pub exit_on_trend_exhaustion: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            fast_timeframe: Timeframe::Min15,
            confirm_timeframes: vec![Timeframe::Hour1],
            trend_ma_period: 50,
            indicators: IndicatorSettings::default(),
            rsi_lower: 40.0,
            rsi_upper: 70.0,
            rsi_overbought: 70.0,
            volume_factor: 1.2,
            adx_threshold: 20.0,
            require_fresh_crossover: false,
            retrace_pct: 3.0,
            retrace_lookback: 20,
            reversal_drop_pct: 1.5,
            exit_on_trend_exhaustion: false,
        }
    }
}

impl SignalConfig {
    /// Candles needed on a confirmation timeframe
    pub fn trend_window_len(&self) -> usize {
        self.trend_ma_period + 1
    }
}

fn pass(ok: bool) -> &'static str {
    if ok {
        "PASS"
    } else {
        "FAIL"
    }
}

/// Conjunctive entry gate
///
/// (a) price above the trend SMA on every confirmation timeframe,
/// (b) RSI inside the healthy zone, (c) fast MA above slow MA,
/// (d) volume above baseline * factor, (e) ADX at threshold with +DI > -DI.
/// The rationale lists PASS/FAIL for every condition.
pub fn evaluate_entry_conditions(windows: &WindowSet, config: &SignalConfig) -> SignalDecision {
    let mut missing: Vec<String> = Vec::new();

    let snapshot = match windows.get(&config.fast_timeframe) {
        Some(candles) => match IndicatorSnapshot::compute(candles, &config.indicators) {
            Ok(snapshot) => Some(snapshot),
            Err(names) => {
                missing.extend(
                    names
                        .iter()
                        .map(|n| format!("{}({})", n, config.fast_timeframe)),
                );
                None
            }
        },
        None => {
            missing.push(format!("window({})", config.fast_timeframe));
            None
        }
    };

    let mut trends = Vec::with_capacity(config.confirm_timeframes.len());
    for tf in &config.confirm_timeframes {
        let Some(candles) = windows.get(tf) else {
            missing.push(format!("window({})", tf));
            continue;
        };
        let closes: Vec<f64> = closed_only(candles).iter().map(|c| c.close).collect();
        match (calculate_sma(&closes, config.trend_ma_period), candles.last()) {
            (Some(sma), Some(last)) => trends.push((*tf, last.close, sma)),
            _ => missing.push(format!("trend_sma({})", tf)),
        }
    }

    let snapshot = match snapshot {
        Some(s) if missing.is_empty() => s,
        _ => return SignalDecision::insufficient(missing.join(", ")),
    };

    let mut parts = Vec::new();
    let mut all = true;

    for (tf, price, sma) in &trends {
        let ok = price > sma;
        all &= ok;
        parts.push(format!(
            "Trend({}) {:.6}>SMA{} {:.6}={}",
            tf,
            price,
            config.trend_ma_period,
            sma,
            pass(ok)
        ));
    }

    let rsi_ok = snapshot.rsi >= config.rsi_lower && snapshot.rsi <= config.rsi_upper;
    all &= rsi_ok;
    parts.push(format!(
        "RSI {:.1} in [{:.0},{:.0}]={}",
        snapshot.rsi,
        config.rsi_lower,
        config.rsi_upper,
        pass(rsi_ok)
    ));

    let ordered = snapshot.fast_ma > snapshot.slow_ma;
    let ma_ok = if config.require_fresh_crossover {
        ordered && snapshot.prev_fast_ma <= snapshot.prev_slow_ma
    } else {
        ordered
    };
    all &= ma_ok;
    parts.push(format!(
        "MA{} {:.6}>{:.6}={}",
        if config.require_fresh_crossover {
            " cross↑"
        } else {
            "↑"
        },
        snapshot.fast_ma,
        snapshot.slow_ma,
        pass(ma_ok)
    ));

    let volume_ratio = if snapshot.volume_baseline > 0.0 {
        snapshot.last_volume / snapshot.volume_baseline
    } else {
        0.0
    };
    let volume_ok = snapshot.last_volume > snapshot.volume_baseline * config.volume_factor;
    all &= volume_ok;
    parts.push(format!(
        "Vol {:.2}x>{:.2}x={}",
        volume_ratio,
        config.volume_factor,
        pass(volume_ok)
    ));

    let adx_ok = snapshot.adx >= config.adx_threshold && snapshot.plus_di > snapshot.minus_di;
    all &= adx_ok;
    parts.push(format!(
        "ADX {:.1}>={:.0} +DI {:.1}>-DI {:.1}={}",
        snapshot.adx,
        config.adx_threshold,
        snapshot.plus_di,
        snapshot.minus_di,
        pass(adx_ok)
    ));

    SignalDecision::new(
        all,
        format!(
            "ENTRY {}: {} (all required)",
            if all { "YES" } else { "NO" },
            parts.join(", ")
        ),
    )
}

/// Disjunctive exit check on the fast timeframe
///
/// Any of RSI overbought, bearish MA ordering, retrace from the recent high,
/// optional trend exhaustion, or the lower-closes reversal pattern fires.
pub fn evaluate_exit_conditions(candles: &[Candle], config: &SignalConfig) -> SignalDecision {
    let snapshot = match IndicatorSnapshot::compute(candles, &config.indicators) {
        Ok(s) => s,
        Err(names) => return SignalDecision::insufficient(names.join(", ")),
    };
    let closed = closed_only(candles);

    let Some(high) = recent_high(closed, config.retrace_lookback) else {
        return SignalDecision::insufficient("recent_high");
    };

    let overbought = snapshot.rsi > config.rsi_overbought;
    let bearish = snapshot.fast_ma < snapshot.slow_ma;
    let retrace = if high > 0.0 {
        (high - snapshot.last_price) / high * 100.0
    } else {
        0.0
    };
    let retraced = retrace > config.retrace_pct;
    let exhausted = config.exit_on_trend_exhaustion
        && snapshot
            .prev_adx
            .map(|prev| prev >= config.adx_threshold && snapshot.adx < config.adx_threshold)
            .unwrap_or(false);
    let reversal = is_reversal_pattern(closed, config.reversal_drop_pct);

    let fired = overbought || bearish || retraced || exhausted || reversal;

    let mut parts = vec![
        format!(
            "RSI {:.1}>{:.0}={}",
            snapshot.rsi,
            config.rsi_overbought,
            pass(overbought)
        ),
        format!(
            "MA↓ {:.6}<{:.6}={}",
            snapshot.fast_ma,
            snapshot.slow_ma,
            pass(bearish)
        ),
        format!(
            "Retrace {:.2}%>{:.2}%={}",
            retrace,
            config.retrace_pct,
            pass(retraced)
        ),
    ];
    if config.exit_on_trend_exhaustion {
        parts.push(format!("ADX fading={}", pass(exhausted)));
    }
    parts.push(format!(
        "Reversal 3LC {:.2}%>{:.2}%={}",
        lower_closes_drop(closed).unwrap_or(0.0),
        config.reversal_drop_pct,
        pass(reversal)
    ));

    SignalDecision::new(
        fired,
        format!(
            "EXIT {}: {} (any)",
            if fired { "YES" } else { "NO" },
            parts.join(", ")
        ),
    )
}
