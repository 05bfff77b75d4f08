//! Bar generation.
//!
//! Bars are indexed relative to an anchor: bar 0 starts at the scenario anchor
//! (or the clock's simulation start) aligned down to the timeframe and opens
//! at the base price. Bars inside the scripted timeline are walked forward
//! from there; bars past it are walked epoch by epoch from seeded boundary
//! levels (see [`crate::epoch`]), so a request costs the same however long
//! the clock has been running. Earlier bars are walked backward. History never
//! depends on how many bars a caller asked for or on when it asked.

use chrono::{DateTime, Utc};
use market_core::Bar;
use tracing::{debug, warn};

use crate::candles::{CandleAssembler, CandleInputs};
use crate::config::GeneratorConfig;
use crate::epoch::{EpochBridge, LevelPath, EPOCH_BARS};
use crate::patterns::{ActiveOverlay, OverlayAdjustment, OverlayContext, PatternOverlayInjector};
use crate::regime::ResolvedRegime;
use crate::scenario::ScenarioConfig;
use crate::seed::{symbol_hash, SeedDeriver};
use crate::stochastic::{BarDraws, StochasticBarGenerator};

const DERIVED_PRICE_MIN: f64 = 20.0;
const DERIVED_PRICE_SPAN: f64 = 480.0;

/// One `generate_bars` call
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub symbol: &'a str,
    pub timeframe_minutes: u32,
    pub count: usize,
    /// Bars are produced up to and including the one containing this instant
    pub as_of: DateTime<Utc>,
    pub scenario: Option<&'a ScenarioConfig>,
    /// Anchor used when the scenario does not carry one
    pub default_anchor: DateTime<Utc>,
}

/// Deterministic OHLCV generator
#[derive(Debug, Clone)]
pub struct BarGenerator {
    config: GeneratorConfig,
    stochastic: StochasticBarGenerator,
    candles: CandleAssembler,
    baseline: ScenarioConfig,
}

/// A completed bar plus what the live renderer needs
struct GeneratedBar {
    bar: Bar,
    sigma: f64,
}

/// Everything fixed for one (symbol, scenario, timeframe, anchor)
struct PathContext<'a> {
    scenario: &'a ScenarioConfig,
    seeds: SeedDeriver,
    injector: PatternOverlayInjector,
    bar_secs: i64,
    anchor_secs: i64,
    base_price: f64,
    /// First bar past every phase and overlay window
    horizon: i64,
}

impl PathContext<'_> {
    fn bar_time(&self, index: i64) -> Option<DateTime<Utc>> {
        let secs = self
            .anchor_secs
            .checked_add(index.checked_mul(self.bar_secs)?)?;
        DateTime::from_timestamp(secs, 0)
    }
}

impl Default for BarGenerator {
    fn default() -> Self {
        Self::new(GeneratorConfig::default())
    }
}

impl BarGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let config = config.sanitized();
        Self {
            stochastic: StochasticBarGenerator::new(config.return_limits()),
            candles: CandleAssembler::new(config.candle_settings(), config.session()),
            baseline: ScenarioConfig::baseline(),
            config,
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Price bar 0 opens at when the scenario does not fix one: a stable
    /// symbol-specific value in `[20, 500)`.
    pub fn derived_base_price(symbol: &str) -> f64 {
        let unit = (symbol_hash(symbol) >> 11) as f64 / (1u64 << 53) as f64;
        market_core::round_price(DERIVED_PRICE_MIN + DERIVED_PRICE_SPAN * unit)
    }

    fn scenario_for<'a>(
        &'a self,
        symbol: &str,
        scenario: Option<&'a ScenarioConfig>,
    ) -> &'a ScenarioConfig {
        match scenario {
            Some(s) if s.applies_to(symbol) => s,
            _ => &self.baseline,
        }
    }

    fn context<'s>(&'s self, request: &GenerationRequest<'s>, symbol: &str) -> PathContext<'s> {
        let scenario = self.scenario_for(symbol, request.scenario);
        self.build_context(scenario, request, symbol)
    }

    fn build_context<'a>(
        &self,
        scenario: &'a ScenarioConfig,
        request: &GenerationRequest<'_>,
        symbol: &str,
    ) -> PathContext<'a> {
        let bar_secs = i64::from(request.timeframe_minutes.max(1)) * 60;
        let anchor = scenario.anchor().unwrap_or(request.default_anchor);
        let seeds = SeedDeriver::new(symbol, scenario.seed());
        let injector = PatternOverlayInjector::new(scenario.overlays(), &seeds);
        let overlays_end = injector
            .overlays()
            .iter()
            .map(|o| o.end_bar.saturating_add(1))
            .max()
            .unwrap_or(0);
        let phases_end = i64::try_from(scenario.scheduler().total_bars()).unwrap_or(i64::MAX);
        PathContext {
            scenario,
            injector,
            seeds,
            bar_secs,
            anchor_secs: anchor.timestamp().div_euclid(bar_secs) * bar_secs,
            base_price: market_core::round_price(
                scenario
                    .base_price()
                    .unwrap_or_else(|| Self::derived_base_price(symbol)),
            ),
            horizon: phases_end.max(overlays_end).max(1),
        }
    }

    /// Index of the bar containing `as_of`.
    fn bar_index_at(ctx: &PathContext<'_>, as_of: DateTime<Utc>) -> (i64, i64) {
        let bar_start = as_of.timestamp().div_euclid(ctx.bar_secs) * ctx.bar_secs;
        let index = (bar_start - ctx.anchor_secs).div_euclid(ctx.bar_secs);
        (index, as_of.timestamp() - bar_start)
    }

    /// Generate up to `count` bars ending with the (live) bar containing `as_of`.
    pub fn generate_bars(&self, request: &GenerationRequest<'_>) -> Vec<Bar> {
        let symbol = request.symbol.trim().to_ascii_uppercase();
        let mut count = request.count;
        if count > self.config.max_bars_per_request {
            warn!(
                "Requested {} bars for {}, clamping to {}",
                count, symbol, self.config.max_bars_per_request
            );
            count = self.config.max_bars_per_request;
        }
        if count == 0 || symbol.is_empty() {
            return Vec::new();
        }

        let ctx = self.context(request, &symbol);
        let (last_index, elapsed) = Self::bar_index_at(&ctx, request.as_of);
        let first_index = last_index - (count as i64 - 1);

        let mut bars = Vec::with_capacity(count);
        if first_index < 0 {
            bars.extend(self.walk_backward(&ctx, first_index, last_index.min(-1)));
        }
        if last_index >= 0 {
            bars.extend(self.walk_forward(&ctx, first_index.max(0), last_index));
        }

        if let Some(last) = bars.last_mut() {
            last.bar = self
                .candles
                .live_bar(&last.bar, last.sigma, ctx.bar_secs, elapsed, &ctx.seeds);
        }

        debug!(
            "Generated {} {}m bars for {} (scenario '{}', last index {})",
            bars.len(),
            request.timeframe_minutes.max(1),
            symbol,
            ctx.scenario.name(),
            last_index
        );

        bars.into_iter().map(|b| b.bar).collect()
    }

    /// Regime in force for the bar containing `as_of`.
    pub fn regime_at(&self, request: &GenerationRequest<'_>) -> ResolvedRegime {
        let symbol = request.symbol.trim().to_ascii_uppercase();
        let ctx = self.context(request, &symbol);
        let (index, _) = Self::bar_index_at(&ctx, request.as_of);
        ctx.scenario.scheduler().resolve(index)
    }

    /// Overlay windows after timing noise, for the scenario that drives `symbol`.
    pub fn overlay_windows(
        &self,
        symbol: &str,
        scenario: Option<&ScenarioConfig>,
    ) -> Vec<ActiveOverlay> {
        let scenario = self.scenario_for(symbol, scenario);
        let seeds = SeedDeriver::new(symbol, scenario.seed());
        PatternOverlayInjector::new(scenario.overlays(), &seeds)
            .overlays()
            .to_vec()
    }

    /// Bars `from..=to` (`from >= 0`).
    fn walk_forward(&self, ctx: &PathContext<'_>, from: i64, to: i64) -> Vec<GeneratedBar> {
        let (mut out, last_close) = self.walk_scripted(ctx, from, to.min(ctx.horizon - 1));
        if to >= ctx.horizon {
            out.extend(self.walk_epochs(ctx, from.max(ctx.horizon), to, last_close));
        }
        out
    }

    /// Scripted bars `0..=to`, keeping those at or after `from`. Also returns
    /// the close of bar `to`.
    fn walk_scripted(&self, ctx: &PathContext<'_>, from: i64, to: i64) -> (Vec<GeneratedBar>, f64) {
        let alpha = self.config.ema_alpha();
        let max_gap = ctx.scenario.gaps().max_pct;
        let mut out = Vec::with_capacity((to - from + 1).max(0) as usize);

        let mut prev_close = ctx.base_price;
        let mut reference = ctx.base_price;
        let mut entry: Option<(usize, f64)> = None;

        for index in 0..=to {
            let Some(timestamp) = ctx.bar_time(index) else {
                break;
            };
            let resolved = ctx.scenario.scheduler().resolve(index);
            let params = resolved.params;
            let draws = BarDraws::sample(&mut ctx.seeds.bar_rng(timestamp));

            let adjustment = match ctx.injector.active_at(index) {
                Some(overlay) => {
                    let entry_price = match entry {
                        Some((ordinal, price)) if ordinal == overlay.index => price,
                        _ => {
                            entry = Some((overlay.index, prev_close));
                            prev_close
                        }
                    };
                    ctx.injector.adjustment(
                        index,
                        &OverlayContext {
                            sigma: params.sigma,
                            prev_close,
                            entry_price,
                        },
                    )
                }
                None => OverlayAdjustment::default(),
            };

            let base = self
                .stochastic
                .bar_return(&params, &draws, prev_close, reference);
            let bar_return = self.stochastic.clamp_return(adjustment.apply(base.value));

            // bar 0 has no session gap: the pre-anchor walk closes at the base price
            let gap = match adjustment.forced_gap {
                Some(forced) => forced.clamp(-max_gap, max_gap),
                None if index > 0 && self.session_open(ctx, timestamp) => self
                    .stochastic
                    .session_gap(&params, ctx.scenario.gaps(), &draws)
                    .unwrap_or(0.0),
                None => 0.0,
            };
            let (open, close) = CandleAssembler::forward_prices(prev_close, gap, bar_return);

            if index >= from {
                let bar = self.candles.assemble(&CandleInputs {
                    timestamp,
                    bar_secs: ctx.bar_secs,
                    open,
                    close,
                    sigma: params.sigma,
                    range_scale: adjustment.range_scale,
                    volume_multiplier: params.volume_multiplier,
                    volume_boost: adjustment.volume_boost,
                    draws: &draws,
                });
                out.push(GeneratedBar {
                    bar,
                    sigma: params.sigma,
                });
            }

            prev_close = close;
            reference += alpha * (close - reference);
        }
        (out, prev_close)
    }

    /// Bars `from..=to` past the scripted timeline (`from >= horizon`).
    ///
    /// Each epoch starts from its boundary level with a fresh mean-reversion
    /// reference, so only the epochs holding `from..=to` are walked. `origin`
    /// is the close of the last scripted bar.
    fn walk_epochs(
        &self,
        ctx: &PathContext<'_>,
        from: i64,
        to: i64,
        origin: f64,
    ) -> Vec<GeneratedBar> {
        let params = ctx.scenario.scheduler().resolve(ctx.horizon).params;
        let levels = LevelPath::new(ctx.seeds, origin, params.sigma, params.drift);
        let max_return = self.stochastic.limits().max_return_per_bar;
        let alpha = self.config.ema_alpha();
        let mut out = Vec::with_capacity((to - from + 1).max(0) as usize);

        let first_epoch = (from - ctx.horizon) / EPOCH_BARS;
        let last_epoch = (to - ctx.horizon) / EPOCH_BARS;

        for epoch in first_epoch..=last_epoch {
            let start = ctx.horizon + epoch * EPOCH_BARS;
            let end = (start + EPOCH_BARS - 1).min(to);
            let bridge = EpochBridge::new(levels.level(epoch as u64 + 1), max_return);

            let mut prev_close = levels.level(epoch as u64);
            let mut reference = prev_close;

            for index in start..=end {
                let Some(timestamp) = ctx.bar_time(index) else {
                    return out;
                };
                let draws = BarDraws::sample(&mut ctx.seeds.bar_rng(timestamp));
                let remaining = start + EPOCH_BARS - index;

                let gap = if self.session_open(ctx, timestamp) {
                    self.stochastic
                        .session_gap(&params, ctx.scenario.gaps(), &draws)
                        .unwrap_or(0.0)
                } else {
                    0.0
                };
                let gap = bridge.admit_gap(prev_close, gap, remaining);

                let base = self
                    .stochastic
                    .bar_return(&params, &draws, prev_close, reference);
                let open = market_core::round_price(prev_close * (1.0 + gap));
                let bar_return = bridge.steer(open, base.value, params.drift, remaining);
                let (open, close) = CandleAssembler::forward_prices(prev_close, gap, bar_return);

                if index >= from {
                    let bar = self.candles.assemble(&CandleInputs {
                        timestamp,
                        bar_secs: ctx.bar_secs,
                        open,
                        close,
                        sigma: params.sigma,
                        range_scale: 1.0,
                        volume_multiplier: params.volume_multiplier,
                        volume_boost: 1.0,
                        draws: &draws,
                    });
                    out.push(GeneratedBar {
                        bar,
                        sigma: params.sigma,
                    });
                }

                prev_close = close;
                reference += alpha * (close - reference);
            }
        }
        out
    }

    fn session_open(&self, ctx: &PathContext<'_>, timestamp: DateTime<Utc>) -> bool {
        self.candles.session().contains_open(timestamp, ctx.bar_secs)
    }

    /// Pre-anchor bars `from..=to` (both negative), walked back from bar 0's open.
    fn walk_backward(&self, ctx: &PathContext<'_>, from: i64, to: i64) -> Vec<GeneratedBar> {
        let warmup = ctx.scenario.scheduler().warmup();
        let mut params = warmup.params;
        // pre-anchor history is anchored to bar 0, so no pull toward a reference
        params.mean_reversion = 0.0;

        let mut out = Vec::with_capacity((to - from + 1).max(0) as usize);
        let mut next_open = ctx.base_price;
        let mut next_gap = 0.0;

        let mut index = -1;
        while index >= from {
            let Some(timestamp) = ctx.bar_time(index) else {
                break;
            };
            let draws = BarDraws::sample(&mut ctx.seeds.bar_rng(timestamp));
            let base = self
                .stochastic
                .bar_return(&params, &draws, next_open, next_open);
            let (open, close) = CandleAssembler::backward_prices(next_open, next_gap, base.value);

            if index <= to {
                let bar = self.candles.assemble(&CandleInputs {
                    timestamp,
                    bar_secs: ctx.bar_secs,
                    open,
                    close,
                    sigma: params.sigma,
                    range_scale: 1.0,
                    volume_multiplier: params.volume_multiplier,
                    volume_boost: 1.0,
                    draws: &draws,
                });
                out.push(GeneratedBar {
                    bar,
                    sigma: params.sigma,
                });
            }

            next_gap = if self.session_open(ctx, timestamp) {
                self.stochastic
                    .session_gap(&params, ctx.scenario.gaps(), &draws)
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            next_open = open;
            index -= 1;
        }
        out.reverse();
        out
    }
}
