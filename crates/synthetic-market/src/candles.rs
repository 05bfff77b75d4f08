use chrono::{DateTime, Utc};
use market_core::{round_price, Bar, MIN_PRICE};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::seed::SeedDeriver;
use crate::session::SessionCalendar;
use crate::stochastic::BarDraws;

/// Upper bound on sub-bar grid points in a live bar.
const LIVE_GRID_POINTS: i64 = 900;
const LIVE_JITTER_CLAMP: f64 = 3.0;

/// Settings for candle construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandleSettings {
    /// Wick length scale, in units of `open × sigma`
    pub range_multiplier: f64,
    /// Live-path jitter scale, in units of `open × sigma`
    pub live_jitter_scale: f64,
    /// Volume of one full session at multiplier 1.0
    pub base_daily_volume: f64,
}

impl Default for CandleSettings {
    fn default() -> Self {
        Self {
            range_multiplier: 0.6,
            live_jitter_scale: 0.35,
            base_daily_volume: 5_000_000.0,
        }
    }
}

/// Per-bar inputs gathered by the generator
#[derive(Debug, Clone, Copy)]
pub struct CandleInputs<'a> {
    pub timestamp: DateTime<Utc>,
    pub bar_secs: i64,
    pub open: f64,
    pub close: f64,
    pub sigma: f64,
    pub range_scale: f64,
    /// Regime × phase volume multiplier
    pub volume_multiplier: f64,
    pub volume_boost: f64,
    pub draws: &'a BarDraws,
}

/// Turns returns into OHLCV bars and renders partially elapsed bars.
#[derive(Debug, Clone, Copy)]
pub struct CandleAssembler {
    settings: CandleSettings,
    session: SessionCalendar,
}

impl CandleAssembler {
    pub fn new(settings: CandleSettings, session: SessionCalendar) -> Self {
        Self { settings, session }
    }

    pub fn session(&self) -> &SessionCalendar {
        &self.session
    }

    /// Open and close of a bar walked forward from the previous close.
    pub fn forward_prices(prev_close: f64, gap: f64, bar_return: f64) -> (f64, f64) {
        let open = round_price(prev_close * (1.0 + gap));
        let close = round_price(open * (1.0 + bar_return));
        (open, close)
    }

    /// Open and close of a bar walked backward from the following bar.
    ///
    /// `next_gap` is the gap the following bar opened with.
    pub fn backward_prices(next_open: f64, next_gap: f64, bar_return: f64) -> (f64, f64) {
        let close = round_price(next_open / (1.0 + next_gap));
        let open = round_price(close / (1.0 + bar_return));
        (open, close)
    }

    pub fn assemble(&self, inputs: &CandleInputs<'_>) -> Bar {
        let open = inputs.open;
        let close = inputs.close;
        let wick =
            open * inputs.sigma * self.settings.range_multiplier * inputs.range_scale.max(0.0);

        let body_high = open.max(close);
        let body_low = open.min(close);
        let high = round_price(body_high + wick * inputs.draws.high_u).max(body_high);
        let low = round_price(body_low - wick * inputs.draws.low_u)
            .max(MIN_PRICE)
            .min(body_low);

        Bar {
            timestamp: inputs.timestamp,
            open,
            high,
            low,
            close,
            volume: self.volume(inputs),
        }
    }

    /// Volume for the full bar.
    pub fn volume(&self, inputs: &CandleInputs<'_>) -> u64 {
        let draws = inputs.draws;
        let jitter = 0.7 + 0.6 * draws.volume_u;
        let move_factor = 1.0 + 0.25 * draws.z.abs().min(3.0);
        let volume = self.base_volume(inputs.bar_secs)
            * self.session.time_of_day_multiplier(inputs.timestamp, inputs.bar_secs)
            * inputs.volume_multiplier
            * inputs.volume_boost
            * jitter
            * move_factor;
        if volume.is_finite() {
            volume.round().max(1.0) as u64
        } else {
            1
        }
    }

    /// Baseline volume for a bar of this length.
    fn base_volume(&self, bar_secs: i64) -> f64 {
        let session_secs = self.session.session_minutes() * 60.0;
        let share = (bar_secs as f64).min(session_secs) / session_secs;
        (self.settings.base_daily_volume * share).max(100.0)
    }

    /// Render the open bar as it looks `elapsed_secs` after it started.
    ///
    /// The path runs on a fixed sub-bar grid so every grid point is a pure
    /// function of `(seed, elapsed second)`. High and low are the extremes over
    /// the points reached so far, which makes them monotone in `elapsed_secs`.
    /// Points stay inside the completed bar's range so the hand-off to the
    /// finished bar never pulls an extreme back.
    pub fn live_bar(
        &self,
        full: &Bar,
        sigma: f64,
        bar_secs: i64,
        elapsed_secs: i64,
        seeds: &SeedDeriver,
    ) -> Bar {
        let bar_secs = bar_secs.max(1);
        if elapsed_secs >= bar_secs {
            return full.clone();
        }
        let elapsed_secs = elapsed_secs.max(0);

        let step = (bar_secs / LIVE_GRID_POINTS).max(1);
        let open = full.open;
        let mut high = open;
        let mut low = open;
        let mut last = open;

        let mut second = step;
        while second <= elapsed_secs {
            let price = self.live_price(full, sigma, bar_secs, second, seeds);
            high = high.max(price);
            low = low.min(price);
            last = price;
            second += step;
        }

        let progress = elapsed_secs as f64 / bar_secs as f64;
        let close = round_price(last);
        Bar {
            timestamp: full.timestamp,
            open,
            high: round_price(high).max(open.max(close)),
            low: round_price(low).min(open.min(close)),
            close,
            volume: (full.volume as f64 * progress).floor() as u64,
        }
    }

    fn live_price(
        &self,
        full: &Bar,
        sigma: f64,
        bar_secs: i64,
        second: i64,
        seeds: &SeedDeriver,
    ) -> f64 {
        let p = second as f64 / bar_secs as f64;
        let path = full.open + (full.close - full.open) * p;
        let g: f64 = seeds.live_rng(full.timestamp, second as u64).sample(StandardNormal);
        let jitter = full.open
            * sigma
            * self.settings.live_jitter_scale
            * g.clamp(-LIVE_JITTER_CLAMP, LIVE_JITTER_CLAMP)
            * (p * (1.0 - p)).max(0.0).sqrt();
        (path + jitter).clamp(full.low, full.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draws() -> BarDraws {
        BarDraws {
            z: 1.0,
            fat_tail_u: 0.5,
            fat_tail_factor_u: 0.5,
            gap_u: 0.5,
            gap_size_u: 0.5,
            gap_sign_u: 0.5,
            high_u: 0.8,
            low_u: 0.3,
            volume_u: 0.5,
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 12, 15, 0, 0).unwrap()
    }

    fn assembler() -> CandleAssembler {
        CandleAssembler::new(CandleSettings::default(), SessionCalendar::us_equities())
    }

    fn full_bar(d: &BarDraws) -> Bar {
        assembler().assemble(&CandleInputs {
            timestamp: ts(),
            bar_secs: 300,
            open: 100.0,
            close: 101.0,
            sigma: 0.01,
            range_scale: 1.0,
            volume_multiplier: 1.0,
            volume_boost: 1.0,
            draws: d,
        })
    }

    #[test]
    fn test_forward_prices_round_to_cents() {
        let (open, close) = CandleAssembler::forward_prices(100.0, 0.0, 0.012345);
        assert_eq!(open, 100.0);
        assert_eq!(close, 101.23);

        let (open, _) = CandleAssembler::forward_prices(100.0, -0.02, 0.0);
        assert_eq!(open, 98.0);
    }

    #[test]
    fn test_backward_prices_invert_forward() {
        let (open, close) = CandleAssembler::backward_prices(101.0, 0.0, 0.01);
        assert_eq!(close, 101.0);
        assert_eq!(open, 100.0);
    }

    #[test]
    fn test_assembled_bar_is_sane() {
        let d = draws();
        let bar = full_bar(&d);
        assert!(bar.is_sane());
        assert!(bar.high > 101.0);
        assert!(bar.low < 100.0);
        assert!(bar.volume > 0);
    }

    #[test]
    fn test_price_floor() {
        let (open, close) = CandleAssembler::forward_prices(0.01, 0.0, -0.02);
        assert_eq!(open, MIN_PRICE);
        assert_eq!(close, MIN_PRICE);
    }

    #[test]
    fn test_boost_raises_volume() {
        let d = draws();
        let base = CandleInputs {
            timestamp: ts(),
            bar_secs: 300,
            open: 100.0,
            close: 101.0,
            sigma: 0.01,
            range_scale: 1.0,
            volume_multiplier: 1.0,
            volume_boost: 1.0,
            draws: &d,
        };
        let boosted = CandleInputs {
            volume_boost: 2.0,
            ..base
        };
        assert!(assembler().volume(&boosted) > assembler().volume(&base));
    }

    #[test]
    fn test_live_bar_monotone_extremes() {
        let d = draws();
        let full = full_bar(&d);
        let seeds = SeedDeriver::new("AAPL", 1);
        let assembler = assembler();

        let mut prev = assembler.live_bar(&full, 0.01, 300, 0, &seeds);
        assert_eq!(prev.close, full.open);
        assert_eq!(prev.volume, 0);

        for elapsed in 1..300 {
            let live = assembler.live_bar(&full, 0.01, 300, elapsed, &seeds);
            assert!(live.is_sane());
            assert!(live.high >= prev.high);
            assert!(live.low <= prev.low);
            assert!(live.volume >= prev.volume);
            prev = live;
        }
    }

    #[test]
    fn test_live_bar_repeatable() {
        let d = draws();
        let full = full_bar(&d);
        let seeds = SeedDeriver::new("AAPL", 1);
        let a = assembler().live_bar(&full, 0.01, 300, 137, &seeds);
        let b = assembler().live_bar(&full, 0.01, 300, 137, &seeds);
        assert_eq!(a, b);
    }

    #[test]
    fn test_live_bar_complete_returns_full() {
        let d = draws();
        let full = full_bar(&d);
        let seeds = SeedDeriver::new("AAPL", 1);
        assert_eq!(assembler().live_bar(&full, 0.01, 300, 300, &seeds), full);
    }
}
