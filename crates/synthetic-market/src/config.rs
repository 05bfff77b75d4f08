use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::candles::CandleSettings;
use crate::session::SessionCalendar;
use crate::stochastic::ReturnLimits;

/// Generator-wide tuning shared by every scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub max_return_per_bar: f64,
    pub fat_tail_min: f64,
    pub fat_tail_max: f64,
    pub range_multiplier: f64,
    pub live_jitter_scale: f64,
    pub base_daily_volume: f64,
    /// EMA span of the mean-reversion reference price
    pub mean_reversion_span: u32,
    pub max_bars_per_request: usize,
    pub session_tz: String,
    /// `HH:MM`, exchange-local
    pub session_open: String,
    pub session_close: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_return_per_bar: 0.02,
            fat_tail_min: 2.0,
            fat_tail_max: 4.0,
            range_multiplier: 0.6,
            live_jitter_scale: 0.35,
            base_daily_volume: 5_000_000.0,
            mean_reversion_span: 20,
            max_bars_per_request: 5_000,
            session_tz: "America/New_York".to_string(),
            session_open: "09:30".to_string(),
            session_close: "16:00".to_string(),
        }
    }
}

/// Parse an env var, falling back to `default` (with a warning) when it is
/// set but unparseable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Invalid {}={:?}, using default", key, raw);
                default
            }
        },
        _ => default,
    }
}

impl GeneratorConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_return_per_bar: env_or("SIM_MAX_RETURN_PER_BAR", defaults.max_return_per_bar),
            fat_tail_min: env_or("SIM_FAT_TAIL_MIN", defaults.fat_tail_min),
            fat_tail_max: env_or("SIM_FAT_TAIL_MAX", defaults.fat_tail_max),
            range_multiplier: env_or("SIM_RANGE_MULTIPLIER", defaults.range_multiplier),
            live_jitter_scale: env_or("SIM_LIVE_JITTER_SCALE", defaults.live_jitter_scale),
            base_daily_volume: env_or("SIM_BASE_DAILY_VOLUME", defaults.base_daily_volume),
            mean_reversion_span: env_or("SIM_MEAN_REVERSION_SPAN", defaults.mean_reversion_span),
            max_bars_per_request: env_or("SIM_MAX_BARS", defaults.max_bars_per_request),
            session_tz: env_or("SIM_SESSION_TZ", defaults.session_tz),
            session_open: env_or("SIM_SESSION_OPEN", defaults.session_open),
            session_close: env_or("SIM_SESSION_CLOSE", defaults.session_close),
        }
        .sanitized()
    }

    /// Replace out-of-range values with defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if !(self.max_return_per_bar.is_finite()
            && self.max_return_per_bar > 0.0
            && self.max_return_per_bar < 1.0)
        {
            tracing::warn!(
                "max_return_per_bar {} out of range, using default",
                self.max_return_per_bar
            );
            self.max_return_per_bar = defaults.max_return_per_bar;
        }
        let tails_ok = self.fat_tail_min.is_finite()
            && self.fat_tail_max.is_finite()
            && self.fat_tail_min >= 1.0
            && self.fat_tail_max >= self.fat_tail_min;
        if !tails_ok {
            tracing::warn!(
                "fat tail range [{}, {}] invalid, using default",
                self.fat_tail_min,
                self.fat_tail_max
            );
            self.fat_tail_min = defaults.fat_tail_min;
            self.fat_tail_max = defaults.fat_tail_max;
        }
        if !(self.range_multiplier.is_finite() && self.range_multiplier >= 0.0) {
            self.range_multiplier = defaults.range_multiplier;
        }
        if !(self.live_jitter_scale.is_finite() && self.live_jitter_scale >= 0.0) {
            self.live_jitter_scale = defaults.live_jitter_scale;
        }
        if !(self.base_daily_volume.is_finite() && self.base_daily_volume > 0.0) {
            self.base_daily_volume = defaults.base_daily_volume;
        }
        if self.mean_reversion_span == 0 {
            self.mean_reversion_span = defaults.mean_reversion_span;
        }
        if self.max_bars_per_request == 0 {
            self.max_bars_per_request = defaults.max_bars_per_request;
        }
        if let Err(e) =
            SessionCalendar::parse(&self.session_tz, &self.session_open, &self.session_close)
        {
            tracing::warn!("Invalid session calendar ({}), using default", e);
            self.session_tz = defaults.session_tz;
            self.session_open = defaults.session_open;
            self.session_close = defaults.session_close;
        }
        self
    }

    pub fn return_limits(&self) -> ReturnLimits {
        ReturnLimits {
            max_return_per_bar: self.max_return_per_bar,
            fat_tail_min: self.fat_tail_min,
            fat_tail_max: self.fat_tail_max,
        }
    }

    pub fn candle_settings(&self) -> CandleSettings {
        CandleSettings {
            range_multiplier: self.range_multiplier,
            live_jitter_scale: self.live_jitter_scale,
            base_daily_volume: self.base_daily_volume,
        }
    }

    pub fn session(&self) -> SessionCalendar {
        SessionCalendar::parse(&self.session_tz, &self.session_open, &self.session_close)
            .unwrap_or_default()
    }

    /// Smoothing factor of the reference-price EMA.
    pub fn ema_alpha(&self) -> f64 {
        2.0 / (f64::from(self.mean_reversion_span.max(1)) + 1.0)
    }
}
