//! Synthetic market data.
//!
//! Deterministic OHLCV bars shaped by a scenario: an ordered timeline of
//! market regimes plus optional chart-pattern overlays. Every bar is a pure
//! function of `(symbol, bar time, scenario seed)`, so history is stable
//! across calls and the open bar evolves smoothly as the clock advances.

pub mod candles;
pub mod config;
pub mod epoch;
pub mod error;
pub mod generator;
pub mod patterns;
pub mod presets;
pub mod regime;
pub mod scenario;
pub mod seed;
pub mod session;
pub mod simulator;
pub mod stochastic;
pub mod store;

pub use candles::{CandleAssembler, CandleSettings};
pub use config::GeneratorConfig;
pub use error::ConfigError;
pub use generator::{BarGenerator, GenerationRequest};
pub use patterns::{
    ActiveOverlay, PatternOverlay, PatternOverlayInjector, PatternShape, TriangleSide,
};
pub use presets::{ScenarioLibrary, ScenarioPreset};
pub use regime::{
    EffectiveParameters, RegimeKind, RegimeParameters, RegimePhase, RegimeScheduler,
    ResolvedRegime,
};
pub use scenario::{ScenarioBuilder, ScenarioConfig, ScenarioSpec};
pub use seed::SeedDeriver;
pub use session::SessionCalendar;
pub use simulator::{MarketSimulator, ScenarioSlot};
pub use stochastic::{BarDraws, StochasticBarGenerator};
pub use store::{ScenarioStore, StoredScenario};
