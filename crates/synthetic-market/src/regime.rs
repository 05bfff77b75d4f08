use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeKind {
    /// Persistent positive drift
    TrendUp,
    /// Persistent negative drift
    TrendDown,
    /// Sideways, strongly mean-reverting
    Range,
    /// Elevated volatility, no directional bias
    HighVol,
    /// Quiet tape
    LowVol,
    /// Sharp sell-off with heavy tails
    Crash,
    /// Short-lived burst of volatility and volume
    NewsSpike,
}

impl RegimeKind {
    pub const ALL: [RegimeKind; 7] = [
        RegimeKind::TrendUp,
        RegimeKind::TrendDown,
        RegimeKind::Range,
        RegimeKind::HighVol,
        RegimeKind::LowVol,
        RegimeKind::Crash,
        RegimeKind::NewsSpike,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RegimeKind::TrendUp => "trend_up",
            RegimeKind::TrendDown => "trend_down",
            RegimeKind::Range => "range",
            RegimeKind::HighVol => "high_vol",
            RegimeKind::LowVol => "low_vol",
            RegimeKind::Crash => "crash",
            RegimeKind::NewsSpike => "news_spike",
        }
    }

    /// Default statistical parameters for this regime.
    pub fn default_parameters(&self) -> RegimeParameters {
        let (volatility_multiplier, drift, mean_reversion, gap_modifier, fat_tail, volume) =
            match self {
                RegimeKind::TrendUp => (1.0, 0.0008, 0.02, 1.0, 0.02, 1.2),
                RegimeKind::TrendDown => (1.1, -0.0008, 0.02, 1.0, 0.03, 1.3),
                RegimeKind::Range => (0.8, 0.0, 0.15, 0.5, 0.01, 0.9),
                RegimeKind::HighVol => (2.0, 0.0, 0.05, 1.5, 0.06, 1.6),
                RegimeKind::LowVol => (0.5, 0.0, 0.10, 0.3, 0.005, 0.7),
                RegimeKind::Crash => (2.5, -0.004, 0.0, 2.0, 0.10, 2.5),
                RegimeKind::NewsSpike => (3.0, 0.0, 0.0, 3.0, 0.15, 3.0),
            };
        RegimeParameters {
            volatility_multiplier,
            drift,
            mean_reversion,
            gap_probability_modifier: gap_modifier,
            fat_tail_probability: fat_tail,
            volume_multiplier: volume,
        }
    }
}

impl std::fmt::Display for RegimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for RegimeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        RegimeKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| ConfigError::InvalidField {
                field: "regime",
                reason: format!("unknown regime '{}'", s),
            })
    }
}

/// Statistical parameters attached to a regime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeParameters {
    pub volatility_multiplier: f64,
    /// Per-bar expected return
    pub drift: f64,
    /// Strength of the pull back toward the reference price (0 = none)
    pub mean_reversion: f64,
    pub gap_probability_modifier: f64,
    pub fat_tail_probability: f64,
    pub volume_multiplier: f64,
}

fn default_volume_multiplier() -> f64 {
    1.0
}

/// One contiguous stretch of the scenario timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePhase {
    pub regime: RegimeKind,
    pub bars: u32,
    /// Per-bar sigma override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<f64>,
    /// Per-bar drift override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift: Option<f64>,
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,
}

impl RegimePhase {
    pub fn new(regime: RegimeKind, bars: u32) -> Self {
        Self {
            regime,
            bars,
            volatility: None,
            drift: None,
            volume_multiplier: 1.0,
        }
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = Some(volatility);
        self
    }

    pub fn with_drift(mut self, drift: f64) -> Self {
        self.drift = Some(drift);
        self
    }

    pub fn with_volume_multiplier(mut self, multiplier: f64) -> Self {
        self.volume_multiplier = multiplier;
        self
    }
}

const MIN_SIGMA: f64 = 1e-5;
const MAX_SIGMA: f64 = 0.25;
const MAX_DRIFT: f64 = 0.05;
const MAX_VOLUME_MULTIPLIER: f64 = 100.0;

/// Parameters in force for one bar after overrides are applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveParameters {
    /// Per-bar return standard deviation
    pub sigma: f64,
    pub drift: f64,
    pub mean_reversion: f64,
    pub gap_probability_modifier: f64,
    pub fat_tail_probability: f64,
    /// Regime volume multiplier times the phase multiplier
    pub volume_multiplier: f64,
}

impl EffectiveParameters {
    fn resolve(phase: Option<&RegimePhase>, regime: RegimeKind, base_volatility: f64) -> Self {
        let defaults = regime.default_parameters();

        let sigma = phase
            .and_then(|p| p.volatility)
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(base_volatility * defaults.volatility_multiplier)
            .clamp(MIN_SIGMA, MAX_SIGMA);

        let drift = phase
            .and_then(|p| p.drift)
            .filter(|d| d.is_finite())
            .unwrap_or(defaults.drift)
            .clamp(-MAX_DRIFT, MAX_DRIFT);

        let phase_volume = phase
            .map(|p| p.volume_multiplier)
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(1.0);

        Self {
            sigma,
            drift,
            mean_reversion: defaults.mean_reversion,
            gap_probability_modifier: defaults.gap_probability_modifier,
            fat_tail_probability: defaults.fat_tail_probability,
            volume_multiplier: (defaults.volume_multiplier * phase_volume)
                .min(MAX_VOLUME_MULTIPLIER),
        }
    }
}

/// Regime in force at a bar index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRegime {
    /// Index into the phase list; `None` for pre-anchor warm-up bars
    pub phase_index: Option<usize>,
    pub regime: RegimeKind,
    pub params: EffectiveParameters,
}

/// Maps bar indices (relative to the scenario anchor) to regime parameters.
///
/// Indices past the end of the timeline stay in the last phase. Negative
/// indices are pre-anchor history and use a `Range` warm-up regime.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeScheduler {
    phases: Vec<RegimePhase>,
    /// `ends[k]` = total bars in phases `0..=k`
    ends: Vec<u64>,
    base_volatility: f64,
}

impl RegimeScheduler {
    pub fn new(phases: Vec<RegimePhase>, base_volatility: f64) -> Result<Self, ConfigError> {
        if phases.is_empty() {
            return Err(ConfigError::EmptyRegimes);
        }
        if let Some(index) = phases.iter().position(|p| p.bars == 0) {
            return Err(ConfigError::ZeroBarPhase { index });
        }

        let ends = phases
            .iter()
            .scan(0u64, |total, phase| {
                *total += u64::from(phase.bars);
                Some(*total)
            })
            .collect();

        Ok(Self {
            phases,
            ends,
            base_volatility,
        })
    }

    /// A timeline that stays in `regime` indefinitely.
    pub fn constant(regime: RegimeKind, base_volatility: f64) -> Self {
        Self {
            phases: vec![RegimePhase::new(regime, 1)],
            ends: vec![1],
            base_volatility,
        }
    }

    pub fn phases(&self) -> &[RegimePhase] {
        &self.phases
    }

    pub fn base_volatility(&self) -> f64 {
        self.base_volatility
    }

    /// Length of the scripted timeline in bars.
    pub fn total_bars(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }

    pub fn resolve(&self, bar_index: i64) -> ResolvedRegime {
        if bar_index < 0 {
            return self.warmup();
        }

        let index = bar_index as u64;
        let phase_index = self
            .ends
            .partition_point(|&end| end <= index)
            .min(self.phases.len() - 1);
        let phase = &self.phases[phase_index];

        ResolvedRegime {
            phase_index: Some(phase_index),
            regime: phase.regime,
            params: EffectiveParameters::resolve(Some(phase), phase.regime, self.base_volatility),
        }
    }

    /// Regime used for history before the anchor.
    pub fn warmup(&self) -> ResolvedRegime {
        ResolvedRegime {
            phase_index: None,
            regime: RegimeKind::Range,
            params: EffectiveParameters::resolve(None, RegimeKind::Range, self.base_volatility),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_then_trend() -> RegimeScheduler {
        RegimeScheduler::new(
            vec![
                RegimePhase::new(RegimeKind::Range, 100),
                RegimePhase::new(RegimeKind::TrendUp, 50),
            ],
            0.01,
        )
        .unwrap()
    }

    #[test]
    fn test_phase_boundaries() {
        let scheduler = range_then_trend();
        assert_eq!(scheduler.resolve(0).regime, RegimeKind::Range);
        assert_eq!(scheduler.resolve(99).regime, RegimeKind::Range);
        assert_eq!(scheduler.resolve(100).regime, RegimeKind::TrendUp);
        assert_eq!(scheduler.resolve(149).regime, RegimeKind::TrendUp);
        assert_eq!(scheduler.total_bars(), 150);
    }

    #[test]
    fn test_exhausted_timeline_clamps_to_last_phase() {
        let scheduler = range_then_trend();
        let resolved = scheduler.resolve(10_000);
        assert_eq!(resolved.regime, RegimeKind::TrendUp);
        assert_eq!(resolved.phase_index, Some(1));
    }

    #[test]
    fn test_negative_index_uses_warmup() {
        let scheduler = range_then_trend();
        let resolved = scheduler.resolve(-1);
        assert_eq!(resolved.regime, RegimeKind::Range);
        assert_eq!(resolved.phase_index, None);
    }

    #[test]
    fn test_rejects_empty_and_zero_bar_phases() {
        assert_eq!(RegimeScheduler::new(vec![], 0.01), Err(ConfigError::EmptyRegimes));
        let err = RegimeScheduler::new(
            vec![
                RegimePhase::new(RegimeKind::Range, 10),
                RegimePhase::new(RegimeKind::Crash, 0),
            ],
            0.01,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::ZeroBarPhase { index: 1 });
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let scheduler = RegimeScheduler::new(
            vec![RegimePhase::new(RegimeKind::TrendUp, 10)
                .with_volatility(0.03)
                .with_drift(-0.001)
                .with_volume_multiplier(2.0)],
            0.01,
        )
        .unwrap();
        let params = scheduler.resolve(3).params;
        assert_eq!(params.sigma, 0.03);
        assert_eq!(params.drift, -0.001);
        assert!((params.volume_multiplier - 2.4).abs() < 1e-12);
    }

    #[test]
    fn test_sigma_derived_from_base_volatility() {
        let scheduler =
            RegimeScheduler::new(vec![RegimePhase::new(RegimeKind::HighVol, 10)], 0.01).unwrap();
        assert!((scheduler.resolve(0).params.sigma - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_overrides_fall_back() {
        let scheduler = RegimeScheduler::new(
            vec![RegimePhase::new(RegimeKind::Range, 10)
                .with_volatility(f64::NAN)
                .with_drift(f64::INFINITY)],
            0.01,
        )
        .unwrap();
        let params = scheduler.resolve(0).params;
        assert!((params.sigma - 0.008).abs() < 1e-12);
        assert_eq!(params.drift, 0.0);
    }

    #[test]
    fn test_regime_parsing() {
        assert_eq!("trend-up".parse::<RegimeKind>().unwrap(), RegimeKind::TrendUp);
        assert_eq!("NEWS_SPIKE".parse::<RegimeKind>().unwrap(), RegimeKind::NewsSpike);
        assert!("sideways".parse::<RegimeKind>().is_err());
    }
}
