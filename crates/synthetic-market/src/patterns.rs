//! Chart-pattern overlays.
//!
//! An overlay never replaces the stochastic path. For each bar inside its
//! window it yields an [`OverlayAdjustment`] that rescales the random
//! component and adds a deterministic shift:
//!
//! ```text
//! r' = clamp(r * scale + shift, ±max_return_per_bar)
//! ```
//!
//! Shapes that describe a price path (double top, head and shoulders) do so
//! as a piecewise-linear cumulative return curve; the per-bar shift is the
//! increment of that curve.

use market_core::Direction;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::seed::SeedDeriver;

const OVERLAY_STREAM_SALT: u64 = 0x6F76_6572_6C61_7900;

const DOUBLE_TOP_KNOTS: &[(f64, f64)] =
    &[(0.0, 0.0), (0.25, 1.0), (0.5, 0.55), (0.75, 1.0), (1.0, 0.0)];
const HEAD_AND_SHOULDERS_KNOTS: &[(f64, f64)] = &[
    (0.0, 0.0),
    (0.17, 0.7),
    (0.33, 0.35),
    (0.5, 1.0),
    (0.67, 0.35),
    (0.83, 0.7),
    (1.0, 0.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriangleSide {
    Ascending,
    Descending,
    #[default]
    Symmetric,
}

fn default_setup_bars() -> u32 {
    10
}

/// Chart pattern and its shape-specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum PatternShape {
    /// Compressed setup, then a directional impulse from `start_bar`
    Breakout {
        #[serde(default = "default_setup_bars")]
        setup_bars: u32,
    },
    /// Trend leg followed by a retracement of `depth` sigmas
    Pullback {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<f64>,
    },
    DoubleTop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<f64>,
    },
    DoubleBottom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<f64>,
    },
    HeadAndShoulders {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<f64>,
        #[serde(default)]
        inverse: bool,
    },
    Triangle {
        #[serde(default)]
        side: TriangleSide,
    },
    Flag {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pole_fraction: Option<f64>,
    },
    GapAndGo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gap_sigmas: Option<f64>,
    },
    MeanReversion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        band_sigmas: Option<f64>,
    },
}

impl PatternShape {
    pub fn name(&self) -> &'static str {
        match self {
            PatternShape::Breakout { .. } => "breakout",
            PatternShape::Pullback { .. } => "pullback",
            PatternShape::DoubleTop { .. } => "double_top",
            PatternShape::DoubleBottom { .. } => "double_bottom",
            PatternShape::HeadAndShoulders { .. } => "head_and_shoulders",
            PatternShape::Triangle { .. } => "triangle",
            PatternShape::Flag { .. } => "flag",
            PatternShape::GapAndGo { .. } => "gap_and_go",
            PatternShape::MeanReversion { .. } => "mean_reversion",
        }
    }

    /// Window length used when an overlay has no explicit end bar.
    pub fn default_length(&self) -> u32 {
        match self {
            PatternShape::Breakout { .. } => 6,
            PatternShape::Pullback { .. } => 20,
            PatternShape::DoubleTop { .. } | PatternShape::DoubleBottom { .. } => 40,
            PatternShape::HeadAndShoulders { .. } => 60,
            PatternShape::Triangle { .. } => 30,
            PatternShape::Flag { .. } => 20,
            PatternShape::GapAndGo { .. } => 8,
            PatternShape::MeanReversion { .. } => 30,
        }
    }

    /// Bars before `start_bar` that belong to the pattern.
    pub fn lead_in(&self) -> u32 {
        match self {
            PatternShape::Breakout { setup_bars } => *setup_bars,
            _ => 0,
        }
    }

    /// Clamp shape parameters into usable ranges; `None` keeps the shape default.
    fn sanitized(&self) -> Self {
        fn positive(value: Option<f64>, max: f64) -> Option<f64> {
            value.filter(|v| v.is_finite() && *v > 0.0).map(|v| v.min(max))
        }
        match self {
            PatternShape::Breakout { setup_bars } => PatternShape::Breakout {
                setup_bars: (*setup_bars).min(500),
            },
            PatternShape::Pullback { depth } => PatternShape::Pullback {
                depth: positive(*depth, 10.0),
            },
            PatternShape::DoubleTop { depth } => PatternShape::DoubleTop {
                depth: positive(*depth, 10.0),
            },
            PatternShape::DoubleBottom { depth } => PatternShape::DoubleBottom {
                depth: positive(*depth, 10.0),
            },
            PatternShape::HeadAndShoulders { depth, inverse } => PatternShape::HeadAndShoulders {
                depth: positive(*depth, 10.0),
                inverse: *inverse,
            },
            PatternShape::Triangle { side } => PatternShape::Triangle { side: *side },
            PatternShape::Flag { pole_fraction } => PatternShape::Flag {
                pole_fraction: positive(*pole_fraction, 0.9),
            },
            PatternShape::GapAndGo { gap_sigmas } => PatternShape::GapAndGo {
                gap_sigmas: positive(*gap_sigmas, 20.0),
            },
            PatternShape::MeanReversion { band_sigmas } => PatternShape::MeanReversion {
                band_sigmas: positive(*band_sigmas, 10.0),
            },
        }
    }
}

impl std::fmt::Display for PatternShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn default_volume_boost() -> f64 {
    1.5
}

/// A pattern scheduled on the scenario timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternOverlay {
    pub shape: PatternShape,
    pub start_bar: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_bar: Option<u32>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "default_volume_boost")]
    pub volume_boost: f64,
    /// Timing jitter; the window moves by up to this many bars either way
    #[serde(default)]
    pub noise_bars: u32,
}

impl PatternOverlay {
    pub fn new(shape: PatternShape, start_bar: u32) -> Self {
        Self {
            shape,
            start_bar,
            end_bar: None,
            direction: Direction::Up,
            volume_boost: default_volume_boost(),
            noise_bars: 0,
        }
    }

    pub fn with_end(mut self, end_bar: u32) -> Self {
        self.end_bar = Some(end_bar);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_volume_boost(mut self, boost: f64) -> Self {
        self.volume_boost = boost;
        self
    }

    pub fn with_noise_bars(mut self, noise_bars: u32) -> Self {
        self.noise_bars = noise_bars;
        self
    }

    /// Configured last bar (inclusive), before timing noise.
    pub fn configured_end(&self) -> u32 {
        self.end_bar.unwrap_or_else(|| {
            self.start_bar
                .saturating_add(self.shape.default_length().saturating_sub(1))
        })
    }

    /// Widest span of bars this overlay can touch once timing noise is applied.
    pub fn footprint(&self) -> (i64, i64) {
        let noise = i64::from(self.noise_bars);
        let lo = i64::from(self.start_bar) - i64::from(self.shape.lead_in()) - noise;
        let hi = i64::from(self.configured_end()) + noise;
        (lo.max(0), hi)
    }

    /// Check structure and clamp magnitudes. `index` is the overlay's position
    /// in the scenario and is only used in error reporting.
    pub(crate) fn validated(&self, index: usize) -> Result<Self, ConfigError> {
        if let Some(end) = self.end_bar {
            if end < self.start_bar {
                return Err(ConfigError::InvalidOverlayRange {
                    index,
                    start: self.start_bar,
                    end,
                });
            }
        }
        let volume_boost = if self.volume_boost.is_finite() && self.volume_boost > 0.0 {
            self.volume_boost.min(20.0)
        } else {
            default_volume_boost()
        };
        Ok(Self {
            shape: self.shape.sanitized(),
            volume_boost,
            noise_bars: self.noise_bars.min(1_000),
            ..self.clone()
        })
    }
}

/// Reject overlays whose noise-widened footprints intersect.
pub(crate) fn check_overlaps(overlays: &[PatternOverlay]) -> Result<(), ConfigError> {
    for (first, a) in overlays.iter().enumerate() {
        let (a_lo, a_hi) = a.footprint();
        for (offset, b) in overlays[first + 1..].iter().enumerate() {
            let (b_lo, b_hi) = b.footprint();
            if a_lo <= b_hi && b_lo <= a_hi {
                return Err(ConfigError::OverlappingOverlays {
                    first,
                    second: first + 1 + offset,
                });
            }
        }
    }
    Ok(())
}

/// An overlay with its timing noise resolved for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveOverlay {
    pub index: usize,
    pub shape: PatternShape,
    pub direction: Direction,
    pub volume_boost: f64,
    /// First bar of the main pattern; the breakout bar for breakouts
    pub trigger_bar: i64,
    pub end_bar: i64,
    /// First bar the overlay touches (setup included)
    pub window_start: i64,
}

impl ActiveOverlay {
    pub fn contains(&self, bar_index: i64) -> bool {
        bar_index >= self.window_start && bar_index <= self.end_bar
    }

    fn length(&self) -> i64 {
        (self.end_bar - self.trigger_bar + 1).max(1)
    }
}

/// What the generator knows when asking for a bar's adjustment
#[derive(Debug, Clone, Copy)]
pub struct OverlayContext {
    pub sigma: f64,
    /// Close of the previous bar
    pub prev_close: f64,
    /// Close just before the overlay window began
    pub entry_price: f64,
}

/// Per-bar modification of the stochastic draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayAdjustment {
    pub scale: f64,
    pub shift: f64,
    pub range_scale: f64,
    pub volume_boost: f64,
    /// Gap forced onto this bar's open (fraction of the previous close)
    pub forced_gap: Option<f64>,
}

impl Default for OverlayAdjustment {
    fn default() -> Self {
        Self {
            scale: 1.0,
            shift: 0.0,
            range_scale: 1.0,
            volume_boost: 1.0,
            forced_gap: None,
        }
    }
}

impl OverlayAdjustment {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, bar_return: f64) -> f64 {
        bar_return * self.scale + self.shift
    }
}

/// Resolves overlay windows for one symbol and produces per-bar adjustments.
#[derive(Debug, Clone)]
pub struct PatternOverlayInjector {
    overlays: Vec<ActiveOverlay>,
}

impl PatternOverlayInjector {
    pub fn new(overlays: &[PatternOverlay], seeds: &SeedDeriver) -> Self {
        let overlays = overlays
            .iter()
            .enumerate()
            .map(|(index, overlay)| {
                let offset = if overlay.noise_bars == 0 {
                    0
                } else {
                    let noise = i64::from(overlay.noise_bars);
                    seeds
                        .stream_rng(OVERLAY_STREAM_SALT.wrapping_add(index as u64))
                        .gen_range(-noise..=noise)
                };
                let trigger_bar = (i64::from(overlay.start_bar) + offset).max(0);
                let end_bar = (i64::from(overlay.configured_end()) + offset).max(trigger_bar);
                let window_start = (trigger_bar - i64::from(overlay.shape.lead_in())).max(0);
                ActiveOverlay {
                    index,
                    shape: overlay.shape.clone(),
                    direction: overlay.direction,
                    volume_boost: overlay.volume_boost,
                    trigger_bar,
                    end_bar,
                    window_start,
                }
            })
            .collect();
        Self { overlays }
    }

    pub fn overlays(&self) -> &[ActiveOverlay] {
        &self.overlays
    }

    pub fn active_at(&self, bar_index: i64) -> Option<&ActiveOverlay> {
        self.overlays.iter().find(|o| o.contains(bar_index))
    }

    /// Adjustment for `bar_index`; identity outside every window.
    pub fn adjustment(&self, bar_index: i64, ctx: &OverlayContext) -> OverlayAdjustment {
        match self.active_at(bar_index) {
            Some(overlay) => shape_adjustment(overlay, bar_index, ctx),
            None => OverlayAdjustment::default(),
        }
    }
}

fn shape_adjustment(
    overlay: &ActiveOverlay,
    bar_index: i64,
    ctx: &OverlayContext,
) -> OverlayAdjustment {
    let d = overlay.direction.sign();
    let sigma = ctx.sigma;
    let boost = overlay.volume_boost;
    let len = overlay.length();
    let t = bar_index - overlay.trigger_bar;
    let p0 = t as f64 / len as f64;
    let p1 = (t + 1) as f64 / len as f64;

    match &overlay.shape {
        PatternShape::Breakout { .. } => {
            if bar_index < overlay.trigger_bar {
                OverlayAdjustment {
                    scale: 0.3,
                    range_scale: 0.6,
                    volume_boost: 0.8,
                    ..Default::default()
                }
            } else {
                OverlayAdjustment {
                    scale: 0.4,
                    shift: d * 1.5 * sigma,
                    range_scale: 1.2,
                    volume_boost: boost,
                    forced_gap: None,
                }
            }
        }
        PatternShape::Pullback { depth } => {
            let trend_len = ((len as f64 * 0.6).ceil() as i64).clamp(1, len);
            if t < trend_len || trend_len == len {
                OverlayAdjustment {
                    scale: 0.7,
                    shift: d * 0.8 * sigma,
                    volume_boost: boost,
                    ..Default::default()
                }
            } else {
                let retrace_len = (len - trend_len) as f64;
                let total = depth.unwrap_or(4.0) * sigma;
                OverlayAdjustment {
                    scale: 0.6,
                    shift: -d * total / retrace_len,
                    volume_boost: boost.sqrt().recip(),
                    ..Default::default()
                }
            }
        }
        PatternShape::DoubleTop { depth } => {
            scripted(DOUBLE_TOP_KNOTS, 1.0, *depth, sigma, len, p0, p1, boost)
        }
        PatternShape::DoubleBottom { depth } => {
            scripted(DOUBLE_TOP_KNOTS, -1.0, *depth, sigma, len, p0, p1, boost)
        }
        PatternShape::HeadAndShoulders { depth, inverse } => {
            let sign = if *inverse { -1.0 } else { 1.0 };
            scripted(
                HEAD_AND_SHOULDERS_KNOTS,
                sign,
                *depth,
                sigma,
                len,
                p0,
                p1,
                boost,
            )
        }
        PatternShape::Triangle { side } => {
            let narrowing = 1.0 - 0.85 * p0.clamp(0.0, 1.0);
            if t == len - 1 && len > 1 {
                return OverlayAdjustment {
                    scale: 0.5,
                    shift: d * 1.2 * sigma,
                    range_scale: 1.0,
                    volume_boost: boost,
                    forced_gap: None,
                };
            }
            let bias = match side {
                TriangleSide::Ascending => 0.1,
                TriangleSide::Descending => -0.1,
                TriangleSide::Symmetric => 0.0,
            };
            OverlayAdjustment {
                scale: narrowing,
                shift: bias * sigma * narrowing,
                range_scale: narrowing,
                volume_boost: 0.6 + 0.4 * narrowing,
                forced_gap: None,
            }
        }
        PatternShape::Flag { pole_fraction } => {
            let pole_len =
                ((len as f64 * pole_fraction.unwrap_or(0.3)).round() as i64).clamp(1, len);
            if t < pole_len {
                OverlayAdjustment {
                    scale: 0.5,
                    shift: d * 1.4 * sigma,
                    volume_boost: boost,
                    ..Default::default()
                }
            } else {
                OverlayAdjustment {
                    scale: 0.4,
                    shift: -d * 0.15 * sigma,
                    range_scale: 0.6,
                    volume_boost: 0.8,
                    forced_gap: None,
                }
            }
        }
        PatternShape::GapAndGo { gap_sigmas } => {
            if t == 0 {
                OverlayAdjustment {
                    scale: 0.6,
                    shift: d * 0.5 * sigma,
                    range_scale: 1.3,
                    volume_boost: boost,
                    forced_gap: Some(d * gap_sigmas.unwrap_or(3.0) * sigma),
                }
            } else {
                OverlayAdjustment {
                    scale: 0.6,
                    shift: d * 0.8 * sigma * (1.0 - 0.5 * p0),
                    volume_boost: 1.0 + (boost - 1.0) * (1.0 - p0),
                    ..Default::default()
                }
            }
        }
        PatternShape::MeanReversion { band_sigmas } => {
            let band = band_sigmas.unwrap_or(2.0) * sigma * (len as f64).sqrt();
            let rel = if ctx.entry_price > 0.0 && ctx.prev_close > 0.0 {
                (ctx.prev_close / ctx.entry_price).ln()
            } else {
                0.0
            };
            let approach_len = ((len as f64 * 0.4).ceil()).max(1.0);
            let shift = if (t as f64) < approach_len {
                // drift toward support (up) or resistance (down)
                -d * band / approach_len
            } else if rel.abs() > band {
                let excess = rel - rel.clamp(-band, band);
                -0.5 * excess - rel.signum() * 0.5 * sigma
            } else {
                -0.1 * rel
            };
            OverlayAdjustment {
                scale: 0.7,
                shift,
                volume_boost: if rel.abs() > band { boost } else { 1.0 },
                ..Default::default()
            }
        }
    }
}

/// Per-bar increment of a scripted cumulative path.
#[allow(clippy::too_many_arguments)]
fn scripted(
    knots: &[(f64, f64)],
    sign: f64,
    depth: Option<f64>,
    sigma: f64,
    len: i64,
    p0: f64,
    p1: f64,
    boost: f64,
) -> OverlayAdjustment {
    let amplitude = sign * depth.unwrap_or(2.5) * sigma * (len as f64).sqrt();
    let shift = amplitude * (interpolate(knots, p1) - interpolate(knots, p0));
    // volume picks up on the final leg
    let final_leg = knots.len().checked_sub(2).map(|i| knots[i].0).unwrap_or(1.0);
    OverlayAdjustment {
        scale: 0.35,
        shift,
        volume_boost: if p0 >= final_leg { boost } else { 1.0 },
        ..Default::default()
    }
}

fn interpolate(knots: &[(f64, f64)], x: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    for pair in knots.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            if x1 <= x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    knots.last().map(|k| k.1).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds() -> SeedDeriver {
        SeedDeriver::new("AAPL", 42)
    }

    fn ctx() -> OverlayContext {
        OverlayContext {
            sigma: 0.01,
            prev_close: 100.0,
            entry_price: 100.0,
        }
    }

    #[test]
    fn test_breakout_window_and_trigger() {
        let overlay = PatternOverlay::new(PatternShape::Breakout { setup_bars: 10 }, 180);
        let injector = PatternOverlayInjector::new(&[overlay], &seeds());
        let active = &injector.overlays()[0];
        assert_eq!(active.trigger_bar, 180);
        assert_eq!(active.window_start, 170);
        assert_eq!(active.end_bar, 185);

        let setup = injector.adjustment(175, &ctx());
        assert_eq!(setup.scale, 0.3);
        assert_eq!(setup.shift, 0.0);

        let impulse = injector.adjustment(180, &ctx());
        assert!(impulse.shift > 0.0);
        assert_eq!(impulse.volume_boost, 1.5);

        assert!(injector.adjustment(169, &ctx()).is_identity());
        assert!(injector.adjustment(186, &ctx()).is_identity());
    }

    #[test]
    fn test_timing_noise_bounded_and_deterministic() {
        let overlay =
            PatternOverlay::new(PatternShape::Breakout { setup_bars: 10 }, 180).with_noise_bars(2);
        for seed in 0..50u64 {
            let deriver = SeedDeriver::new("AAPL", seed);
            let a = PatternOverlayInjector::new(std::slice::from_ref(&overlay), &deriver);
            let b = PatternOverlayInjector::new(std::slice::from_ref(&overlay), &deriver);
            let trigger = a.overlays()[0].trigger_bar;
            assert!((178..=182).contains(&trigger), "trigger {} out of range", trigger);
            assert_eq!(trigger, b.overlays()[0].trigger_bar);
        }
    }

    #[test]
    fn test_noise_never_moves_window_before_zero() {
        let flag = PatternShape::Flag {
            pole_fraction: None,
        };
        let overlay = PatternOverlay::new(flag, 1).with_noise_bars(5);
        for seed in 0..20u64 {
            let seeds = SeedDeriver::new("X", seed);
            let injector = PatternOverlayInjector::new(std::slice::from_ref(&overlay), &seeds);
            assert!(injector.overlays()[0].trigger_bar >= 0);
        }
    }

    #[test]
    fn test_down_direction_flips_shift() {
        let overlay = PatternOverlay::new(PatternShape::Breakout { setup_bars: 0 }, 10)
            .with_direction(Direction::Down);
        let injector = PatternOverlayInjector::new(&[overlay], &seeds());
        assert!(injector.adjustment(10, &ctx()).shift < 0.0);
    }

    #[test]
    fn test_scripted_path_returns_to_origin() {
        let overlay =
            PatternOverlay::new(PatternShape::DoubleTop { depth: Some(2.0) }, 0).with_end(39);
        let injector = PatternOverlayInjector::new(&[overlay], &seeds());
        let total: f64 = (0..40).map(|i| injector.adjustment(i, &ctx()).shift).sum();
        assert!(total.abs() < 1e-12);

        let first_peak: f64 = (0..10).map(|i| injector.adjustment(i, &ctx()).shift).sum();
        assert!(first_peak > 0.0);
    }

    #[test]
    fn test_pullback_retraces_depth_sigmas() {
        for (direction, sign) in [(Direction::Up, 1.0), (Direction::Down, -1.0)] {
            let overlay = PatternOverlay::new(PatternShape::Pullback { depth: Some(3.0) }, 100)
                .with_end(124)
                .with_direction(direction);
            let injector = PatternOverlayInjector::new(&[overlay], &seeds());
            let shifts: Vec<f64> = (100..=124)
                .map(|i| injector.adjustment(i, &ctx()).shift)
                .collect();

            // 25 bars: a 15-bar trend leg, then 10 retracing bars
            let trend: f64 = shifts[..15].iter().sum();
            let retrace: f64 = shifts[15..].iter().sum();
            assert!(sign * trend > 0.0);
            assert!((retrace + sign * 3.0 * 0.01).abs() < 1e-12, "retrace {}", retrace);
        }

        let default_depth =
            PatternOverlay::new(PatternShape::Pullback { depth: None }, 0).with_end(9);
        let injector = PatternOverlayInjector::new(&[default_depth], &seeds());
        let retrace: f64 = (6..10).map(|i| injector.adjustment(i, &ctx()).shift).sum();
        assert!((retrace + 4.0 * 0.01).abs() < 1e-12, "retrace {}", retrace);
    }

    #[test]
    fn test_inverse_head_and_shoulders_dips_first() {
        let shape = PatternShape::HeadAndShoulders {
            depth: None,
            inverse: true,
        };
        let injector = PatternOverlayInjector::new(&[PatternOverlay::new(shape, 0)], &seeds());
        let left_shoulder: f64 = (0..10).map(|i| injector.adjustment(i, &ctx()).shift).sum();
        assert!(left_shoulder < 0.0);
    }

    #[test]
    fn test_gap_and_go_forces_gap_on_first_bar() {
        let shape = PatternShape::GapAndGo {
            gap_sigmas: Some(4.0),
        };
        let overlay = PatternOverlay::new(shape, 50);
        let injector = PatternOverlayInjector::new(&[overlay], &seeds());
        let first = injector.adjustment(50, &ctx());
        assert_eq!(first.forced_gap, Some(0.04));
        assert!(injector.adjustment(51, &ctx()).forced_gap.is_none());
    }

    #[test]
    fn test_triangle_narrows() {
        let shape = PatternShape::Triangle {
            side: TriangleSide::Symmetric,
        };
        let overlay = PatternOverlay::new(shape, 0).with_end(19);
        let injector = PatternOverlayInjector::new(&[overlay], &seeds());
        let early = injector.adjustment(0, &ctx());
        let late = injector.adjustment(17, &ctx());
        assert!(late.range_scale < early.range_scale);
        assert!(late.scale < early.scale);
    }

    #[test]
    fn test_mean_reversion_bounces_outside_band() {
        let shape = PatternShape::MeanReversion {
            band_sigmas: Some(1.0),
        };
        let overlay = PatternOverlay::new(shape, 0).with_end(24);
        let injector = PatternOverlayInjector::new(&[overlay], &seeds());
        let stretched = OverlayContext {
            prev_close: 80.0,
            ..ctx()
        };
        assert!(injector.adjustment(20, &stretched).shift > 0.0);
        let extended = OverlayContext {
            prev_close: 120.0,
            ..ctx()
        };
        assert!(injector.adjustment(20, &extended).shift < 0.0);
    }

    #[test]
    fn test_overlap_detection_uses_noise_and_setup() {
        let flag = PatternShape::Flag {
            pole_fraction: None,
        };
        let a = PatternOverlay::new(flag, 0).with_end(50);
        let b = PatternOverlay::new(PatternShape::Breakout { setup_bars: 10 }, 58);
        assert!(check_overlaps(&[a.clone(), b.clone()]).is_err());

        let b_later = PatternOverlay::new(PatternShape::Breakout { setup_bars: 10 }, 61);
        assert!(check_overlaps(&[a.clone(), b_later.clone()]).is_ok());

        let a_noisy = a.with_noise_bars(3);
        assert_eq!(
            check_overlaps(&[a_noisy, b_later]),
            Err(ConfigError::OverlappingOverlays {
                first: 0,
                second: 1,
            })
        );
    }

    #[test]
    fn test_inverted_range_rejected() {
        let overlay = PatternOverlay::new(PatternShape::Pullback { depth: None }, 30).with_end(10);
        assert_eq!(
            overlay.validated(2),
            Err(ConfigError::InvalidOverlayRange {
                index: 2,
                start: 30,
                end: 10,
            })
        );
    }

    #[test]
    fn test_shape_serde_tagged() {
        let shape = PatternShape::HeadAndShoulders {
            depth: Some(3.0),
            inverse: true,
        };
        let overlay = PatternOverlay::new(shape, 5);
        let json = serde_json::to_value(&overlay).unwrap();
        assert_eq!(json["shape"]["pattern"], "head_and_shoulders");
        let back: PatternOverlay = serde_json::from_value(json).unwrap();
        assert_eq!(back, overlay);

        let parsed: PatternOverlay =
            serde_json::from_str(r#"{"shape":{"pattern":"breakout"},"start_bar":100}"#).unwrap();
        assert_eq!(parsed.shape, PatternShape::Breakout { setup_bars: 10 });
        assert_eq!(parsed.volume_boost, 1.5);
    }
}
