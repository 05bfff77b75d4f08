//! Pre-built scenarios
//!
//! Ready-made regime timelines with pattern overlays for demos and tests.

use market_core::Direction;

use crate::error::ConfigError;
use crate::patterns::{PatternOverlay, PatternShape, TriangleSide};
use crate::regime::{RegimeKind, RegimePhase};
use crate::scenario::ScenarioConfig;

/// A named scenario recipe
#[derive(Debug, Clone, Copy)]
pub struct ScenarioPreset {
    pub name: &'static str,
    pub description: &'static str,
    build: fn() -> Result<ScenarioConfig, ConfigError>,
}

impl ScenarioPreset {
    pub fn scenario(&self) -> Result<ScenarioConfig, ConfigError> {
        (self.build)()
    }
}

/// Library of pre-built scenarios
pub struct ScenarioLibrary;

impl ScenarioLibrary {
    /// Get all available presets
    pub fn all_presets() -> Vec<ScenarioPreset> {
        vec![
            ScenarioPreset {
                name: "calm-range",
                description: "Quiet, sideways tape with tight ranges",
                build: Self::calm_range,
            },
            ScenarioPreset {
                name: "bull-trend",
                description: "Steady uptrend with a mid-trend pullback",
                build: Self::bull_trend,
            },
            ScenarioPreset {
                name: "bear-trend",
                description: "Persistent downtrend with a bear flag",
                build: Self::bear_trend,
            },
            ScenarioPreset {
                name: "flash-crash",
                description: "Calm market, sudden crash, volatile recovery",
                build: Self::flash_crash,
            },
            ScenarioPreset {
                name: "news-spike",
                description: "Headline-driven gap and go followed by elevated volatility",
                build: Self::news_spike,
            },
            ScenarioPreset {
                name: "breakout-setup",
                description: "Long consolidation that breaks out near bar 180",
                build: Self::breakout_setup,
            },
            ScenarioPreset {
                name: "double-top-reversal",
                description: "Uptrend that stalls into a double top and rolls over",
                build: Self::double_top_reversal,
            },
            ScenarioPreset {
                name: "volatile-chop",
                description: "High-volatility whipsaw with a mean-reverting stretch",
                build: Self::volatile_chop,
            },
        ]
    }

    pub fn names() -> Vec<&'static str> {
        Self::all_presets().iter().map(|p| p.name).collect()
    }

    /// Build a preset by name (case-insensitive)
    pub fn get_preset(name: &str) -> Result<ScenarioConfig, ConfigError> {
        let wanted = name.trim().to_lowercase();
        Self::all_presets()
            .into_iter()
            .find(|p| p.name == wanted)
            .ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))?
            .scenario()
    }

    pub fn calm_range() -> Result<ScenarioConfig, ConfigError> {
        ScenarioConfig::builder("calm-range")
            .regime(RegimeKind::LowVol, 200)
            .regime(RegimeKind::Range, 300)
            .gap_probability(0.1)
            .build()
    }

    pub fn bull_trend() -> Result<ScenarioConfig, ConfigError> {
        ScenarioConfig::builder("bull-trend")
            .regime(RegimeKind::Range, 50)
            .regime(RegimeKind::TrendUp, 300)
            .regime(RegimeKind::Range, 50)
            .overlay(
                PatternOverlay::new(PatternShape::Pullback { depth: Some(4.0) }, 150)
                    .with_end(174)
                    .with_noise_bars(3),
            )
            .build()
    }

    pub fn bear_trend() -> Result<ScenarioConfig, ConfigError> {
        let flag = PatternShape::Flag {
            pole_fraction: Some(0.3),
        };
        ScenarioConfig::builder("bear-trend")
            .regime(RegimeKind::Range, 50)
            .regime(RegimeKind::TrendDown, 300)
            .overlay(
                PatternOverlay::new(flag, 200)
                    .with_end(229)
                    .with_direction(Direction::Down)
                    .with_noise_bars(2),
            )
            .build()
    }

    pub fn flash_crash() -> Result<ScenarioConfig, ConfigError> {
        ScenarioConfig::builder("flash-crash")
            .regime(RegimeKind::Range, 150)
            .phase(RegimePhase::new(RegimeKind::Crash, 20).with_volume_multiplier(1.5))
            .regime(RegimeKind::HighVol, 60)
            .regime(RegimeKind::Range, 200)
            .build()
    }

    pub fn news_spike() -> Result<ScenarioConfig, ConfigError> {
        let gap_and_go = PatternShape::GapAndGo {
            gap_sigmas: Some(4.0),
        };
        ScenarioConfig::builder("news-spike")
            .regime(RegimeKind::LowVol, 120)
            .regime(RegimeKind::NewsSpike, 10)
            .regime(RegimeKind::HighVol, 40)
            .regime(RegimeKind::Range, 200)
            .overlay(
                PatternOverlay::new(gap_and_go, 120)
                    .with_end(127)
                    .with_volume_boost(2.5),
            )
            .build()
    }

    pub fn breakout_setup() -> Result<ScenarioConfig, ConfigError> {
        let triangle = PatternShape::Triangle {
            side: TriangleSide::Ascending,
        };
        ScenarioConfig::builder("breakout-setup")
            .regime(RegimeKind::Range, 180)
            .regime(RegimeKind::TrendUp, 200)
            .overlay(PatternOverlay::new(triangle, 120).with_end(160))
            .overlay(
                PatternOverlay::new(PatternShape::Breakout { setup_bars: 10 }, 180)
                    .with_end(190)
                    .with_volume_boost(2.0)
                    .with_noise_bars(2),
            )
            .build()
    }

    pub fn double_top_reversal() -> Result<ScenarioConfig, ConfigError> {
        ScenarioConfig::builder("double-top-reversal")
            .regime(RegimeKind::TrendUp, 120)
            .regime(RegimeKind::Range, 80)
            .regime(RegimeKind::TrendDown, 150)
            .overlay(
                PatternOverlay::new(PatternShape::DoubleTop { depth: Some(2.5) }, 110)
                    .with_end(189)
                    .with_direction(Direction::Down)
                    .with_noise_bars(2),
            )
            .build()
    }

    pub fn volatile_chop() -> Result<ScenarioConfig, ConfigError> {
        let band = PatternShape::MeanReversion {
            band_sigmas: Some(2.0),
        };
        ScenarioConfig::builder("volatile-chop")
            .regime(RegimeKind::HighVol, 150)
            .regime(RegimeKind::Range, 50)
            .regime(RegimeKind::HighVol, 150)
            .overlay(PatternOverlay::new(band, 60).with_end(119))
            .gap_probability(0.4)
            .build()
    }
}
