use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::patterns::{check_overlaps, PatternOverlay};
use crate::regime::{RegimeKind, RegimePhase, RegimeScheduler};
use crate::seed::symbol_hash;
use crate::stochastic::GapSettings;

pub const DEFAULT_BASE_VOLATILITY: f64 = 0.01;
pub const DEFAULT_GAP_PROBABILITY: f64 = 0.25;
pub const DEFAULT_MIN_GAP_PCT: f64 = 0.002;
pub const DEFAULT_MAX_GAP_PCT: f64 = 0.03;

const MAX_BASE_VOLATILITY: f64 = 0.25;
const MAX_GAP_PCT: f64 = 0.5;
const MAX_BASE_PRICE: f64 = 1_000_000.0;

fn default_base_volatility() -> f64 {
    DEFAULT_BASE_VOLATILITY
}

fn default_gap_probability() -> f64 {
    DEFAULT_GAP_PROBABILITY
}

fn default_min_gap_pct() -> f64 {
    DEFAULT_MIN_GAP_PCT
}

fn default_max_gap_pct() -> f64 {
    DEFAULT_MAX_GAP_PCT
}

fn default_active() -> bool {
    true
}

/// Wire form of a scenario; converted to [`ScenarioConfig`] with validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Restrict the scenario to one symbol; `None` applies to all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub regimes: Vec<RegimePhase>,
    #[serde(default)]
    pub overlays: Vec<PatternOverlay>,
    #[serde(default = "default_base_volatility")]
    pub base_volatility: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_price: Option<f64>,
    /// Start of bar 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<DateTime<Utc>>,
    #[serde(default = "default_gap_probability")]
    pub gap_probability: f64,
    #[serde(default = "default_min_gap_pct")]
    pub min_gap_pct: f64,
    #[serde(default = "default_max_gap_pct")]
    pub max_gap_pct: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl ScenarioSpec {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            seed: None,
            symbol: None,
            regimes: Vec::new(),
            overlays: Vec::new(),
            base_volatility: DEFAULT_BASE_VOLATILITY,
            base_price: None,
            anchor: None,
            gap_probability: DEFAULT_GAP_PROBABILITY,
            min_gap_pct: DEFAULT_MIN_GAP_PCT,
            max_gap_pct: DEFAULT_MAX_GAP_PCT,
            active: true,
        }
    }
}

/// Immutable, validated scenario.
///
/// Built through [`ScenarioConfig::builder`] or deserialized; either path
/// runs the same validation. Variations (another symbol, another seed) are
/// produced with the `with_*` / [`for_symbol`](Self::for_symbol) copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScenarioSpec", into = "ScenarioSpec")]
pub struct ScenarioConfig {
    name: String,
    seed: Option<u64>,
    symbol: Option<String>,
    scheduler: RegimeScheduler,
    overlays: Vec<PatternOverlay>,
    base_price: Option<f64>,
    anchor: Option<DateTime<Utc>>,
    gaps: GapSettings,
    active: bool,
}

fn normalize_symbol(symbol: &str) -> Option<String> {
    let symbol = symbol.trim().to_ascii_uppercase();
    (!symbol.is_empty()).then_some(symbol)
}

fn clamp_base_price(price: Option<f64>) -> Option<f64> {
    price
        .filter(|p| p.is_finite() && *p > 0.0)
        .map(|p| p.clamp(market_core::MIN_PRICE, MAX_BASE_PRICE))
}

fn clamp_fraction(value: f64, default: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, max)
    } else {
        default
    }
}

impl TryFrom<ScenarioSpec> for ScenarioConfig {
    type Error = ConfigError;

    fn try_from(spec: ScenarioSpec) -> Result<Self, Self::Error> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "name",
                reason: "scenario name is empty".to_string(),
            });
        }

        let symbol = match spec.symbol {
            Some(raw) => Some(normalize_symbol(&raw).ok_or_else(|| ConfigError::InvalidField {
                field: "symbol",
                reason: "symbol scope is empty".to_string(),
            })?),
            None => None,
        };

        let base_volatility = if spec.base_volatility.is_finite() && spec.base_volatility > 0.0 {
            spec.base_volatility.min(MAX_BASE_VOLATILITY)
        } else {
            DEFAULT_BASE_VOLATILITY
        };
        let scheduler = RegimeScheduler::new(spec.regimes, base_volatility)?;

        let overlays = spec
            .overlays
            .iter()
            .enumerate()
            .map(|(index, overlay)| overlay.validated(index))
            .collect::<Result<Vec<_>, _>>()?;
        check_overlaps(&overlays)?;

        let min_gap = clamp_fraction(spec.min_gap_pct, DEFAULT_MIN_GAP_PCT, MAX_GAP_PCT);
        let max_gap = clamp_fraction(spec.max_gap_pct, DEFAULT_MAX_GAP_PCT, MAX_GAP_PCT);
        let gaps = GapSettings {
            probability: clamp_fraction(spec.gap_probability, DEFAULT_GAP_PROBABILITY, 1.0),
            min_pct: min_gap.min(max_gap),
            max_pct: min_gap.max(max_gap),
        };

        Ok(Self {
            name,
            seed: spec.seed,
            symbol,
            scheduler,
            overlays,
            base_price: clamp_base_price(spec.base_price),
            anchor: spec.anchor,
            gaps,
            active: spec.active,
        })
    }
}

impl From<ScenarioConfig> for ScenarioSpec {
    fn from(config: ScenarioConfig) -> Self {
        Self {
            name: config.name,
            seed: config.seed,
            symbol: config.symbol,
            base_volatility: config.scheduler.base_volatility(),
            regimes: config.scheduler.phases().to_vec(),
            overlays: config.overlays,
            base_price: config.base_price,
            anchor: config.anchor,
            gap_probability: config.gaps.probability,
            min_gap_pct: config.gaps.min_pct,
            max_gap_pct: config.gaps.max_pct,
            active: config.active,
        }
    }
}

impl ScenarioConfig {
    pub fn builder(name: &str) -> ScenarioBuilder {
        ScenarioBuilder {
            spec: ScenarioSpec::new(name),
        }
    }

    /// Single-phase `Range` scenario used when no scenario applies.
    pub fn baseline() -> Self {
        Self {
            name: "baseline".to_string(),
            seed: None,
            symbol: None,
            scheduler: RegimeScheduler::constant(RegimeKind::Range, DEFAULT_BASE_VOLATILITY),
            overlays: Vec::new(),
            base_price: None,
            anchor: None,
            gaps: GapSettings {
                probability: DEFAULT_GAP_PROBABILITY,
                min_pct: DEFAULT_MIN_GAP_PCT,
                max_pct: DEFAULT_MAX_GAP_PCT,
            },
            active: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured seed, if any.
    pub fn configured_seed(&self) -> Option<u64> {
        self.seed
    }

    /// Seed used for derivation: the configured seed, else a hash of the name.
    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| symbol_hash(&self.name))
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn scheduler(&self) -> &RegimeScheduler {
        &self.scheduler
    }

    pub fn phases(&self) -> &[RegimePhase] {
        self.scheduler.phases()
    }

    pub fn overlays(&self) -> &[PatternOverlay] {
        &self.overlays
    }

    pub fn base_volatility(&self) -> f64 {
        self.scheduler.base_volatility()
    }

    pub fn base_price(&self) -> Option<f64> {
        self.base_price
    }

    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.anchor
    }

    pub fn gaps(&self) -> &GapSettings {
        &self.gaps
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether this scenario drives `symbol`: active and either unscoped or
    /// scoped to exactly this symbol.
    pub fn applies_to(&self, symbol: &str) -> bool {
        if !self.active {
            return false;
        }
        match &self.symbol {
            Some(scope) => symbol.trim().eq_ignore_ascii_case(scope),
            None => true,
        }
    }

    /// Copy scoped to `symbol`; an empty symbol removes the scope.
    pub fn for_symbol(&self, symbol: &str) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            ..self.clone()
        }
    }

    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self.clone()
        }
    }

    pub fn with_active(&self, active: bool) -> Self {
        Self {
            active,
            ..self.clone()
        }
    }

    pub fn with_anchor(&self, anchor: DateTime<Utc>) -> Self {
        Self {
            anchor: Some(anchor),
            ..self.clone()
        }
    }

    /// Copy with a new base price; invalid prices fall back to the symbol-derived price.
    pub fn with_base_price(&self, price: f64) -> Self {
        Self {
            base_price: clamp_base_price(Some(price)),
            ..self.clone()
        }
    }
}

/// Fluent builder for [`ScenarioConfig`]
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    spec: ScenarioSpec,
}

impl ScenarioBuilder {
    pub fn seed(mut self, seed: u64) -> Self {
        self.spec.seed = Some(seed);
        self
    }

    pub fn symbol(mut self, symbol: &str) -> Self {
        self.spec.symbol = Some(symbol.to_string());
        self
    }

    pub fn phase(mut self, phase: RegimePhase) -> Self {
        self.spec.regimes.push(phase);
        self
    }

    pub fn regime(self, regime: RegimeKind, bars: u32) -> Self {
        self.phase(RegimePhase::new(regime, bars))
    }

    pub fn overlay(mut self, overlay: PatternOverlay) -> Self {
        self.spec.overlays.push(overlay);
        self
    }

    pub fn base_volatility(mut self, volatility: f64) -> Self {
        self.spec.base_volatility = volatility;
        self
    }

    pub fn base_price(mut self, price: f64) -> Self {
        self.spec.base_price = Some(price);
        self
    }

    pub fn anchor(mut self, anchor: DateTime<Utc>) -> Self {
        self.spec.anchor = Some(anchor);
        self
    }

    pub fn gap_probability(mut self, probability: f64) -> Self {
        self.spec.gap_probability = probability;
        self
    }

    pub fn gap_range(mut self, min_pct: f64, max_pct: f64) -> Self {
        self.spec.min_gap_pct = min_pct;
        self.spec.max_gap_pct = max_pct;
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.spec.active = active;
        self
    }

    pub fn build(self) -> Result<ScenarioConfig, ConfigError> {
        ScenarioConfig::try_from(self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternShape;
    use chrono::TimeZone;
    use market_core::Direction;

    fn sample() -> ScenarioConfig {
        ScenarioConfig::builder("test")
            .seed(42)
            .regime(RegimeKind::Range, 100)
            .regime(RegimeKind::TrendUp, 50)
            .overlay(
                PatternOverlay::new(PatternShape::Breakout { setup_bars: 10 }, 120)
                    .with_direction(Direction::Up)
                    .with_noise_bars(2),
            )
            .base_price(100.0)
            .anchor(Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_accessors() {
        let config = sample();
        assert_eq!(config.name(), "test");
        assert_eq!(config.seed(), 42);
        assert_eq!(config.phases().len(), 2);
        assert_eq!(config.overlays().len(), 1);
        assert_eq!(config.base_price(), Some(100.0));
        assert!(config.is_active());
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(
            ScenarioConfig::builder("empty").build(),
            Err(ConfigError::EmptyRegimes)
        );
        assert_eq!(
            ScenarioConfig::builder("zero").regime(RegimeKind::Range, 0).build(),
            Err(ConfigError::ZeroBarPhase { index: 0 })
        );
        assert!(matches!(
            ScenarioConfig::builder("  ").regime(RegimeKind::Range, 5).build(),
            Err(ConfigError::InvalidField { field: "name", .. })
        ));

        let flag = PatternShape::Flag {
            pole_fraction: None,
        };
        let overlapping = ScenarioConfig::builder("overlap")
            .regime(RegimeKind::Range, 100)
            .overlay(PatternOverlay::new(flag, 10).with_end(30))
            .overlay(PatternOverlay::new(PatternShape::Pullback { depth: None }, 25))
            .build();
        assert_eq!(
            overlapping,
            Err(ConfigError::OverlappingOverlays {
                first: 0,
                second: 1,
            })
        );
    }

    #[test]
    fn test_magnitudes_are_clamped() {
        let config = ScenarioConfig::builder("wild")
            .regime(RegimeKind::HighVol, 10)
            .base_volatility(f64::NAN)
            .base_price(-5.0)
            .gap_probability(7.0)
            .gap_range(0.05, 0.01)
            .build()
            .unwrap();
        assert_eq!(config.base_volatility(), DEFAULT_BASE_VOLATILITY);
        assert_eq!(config.base_price(), None);
        assert_eq!(config.gaps().probability, 1.0);
        assert_eq!((config.gaps().min_pct, config.gaps().max_pct), (0.01, 0.05));
    }

    #[test]
    fn test_seed_defaults_to_name_hash() {
        let a = ScenarioConfig::builder("alpha").regime(RegimeKind::Range, 1).build().unwrap();
        let b = ScenarioConfig::builder("alpha").regime(RegimeKind::Crash, 9).build().unwrap();
        assert_eq!(a.seed(), b.seed());
        assert_eq!(a.seed(), symbol_hash("alpha"));
        assert_eq!(a.configured_seed(), None);
    }

    #[test]
    fn test_symbol_scoping() {
        let scoped = sample().for_symbol(" aapl ");
        assert_eq!(scoped.symbol(), Some("AAPL"));
        assert!(scoped.applies_to("AAPL"));
        assert!(scoped.applies_to("aapl"));
        assert!(!scoped.applies_to("MSFT"));

        let unscoped = scoped.for_symbol("");
        assert!(unscoped.applies_to("MSFT"));
        assert!(!unscoped.with_active(false).applies_to("MSFT"));
    }

    #[test]
    fn test_copies_leave_original_untouched() {
        let original = sample();
        let reseeded = original.with_seed(7);
        assert_eq!(original.seed(), 42);
        assert_eq!(reseeded.seed(), 7);
        assert_eq!(reseeded.phases(), original.phases());
    }

    #[test]
    fn test_serde_roundtrip_and_validation() {
        let config = sample();
        let json = serde_json::to_string(&config).unwrap();
        let back: ScenarioConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let invalid = r#"{"name":"bad","regimes":[]}"#;
        assert!(serde_json::from_str::<ScenarioConfig>(invalid).is_err());

        let minimal = r#"{"name":"min","regimes":[{"regime":"crash","bars":20}]}"#;
        let parsed: ScenarioConfig = serde_json::from_str(minimal).unwrap();
        assert_eq!(parsed.phases()[0].regime, RegimeKind::Crash);
        assert_eq!(parsed.gaps().probability, DEFAULT_GAP_PROBABILITY);
        assert!(parsed.is_active());
    }
}
