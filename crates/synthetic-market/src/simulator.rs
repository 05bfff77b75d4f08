use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use market_clock::{Clock, ClockMode};
use market_core::{Bar, StoreError};
use tracing::{info, warn};

use crate::config::GeneratorConfig;
use crate::error::ConfigError;
use crate::generator::{BarGenerator, GenerationRequest};
use crate::presets::ScenarioLibrary;
use crate::regime::ResolvedRegime;
use crate::scenario::ScenarioConfig;
use crate::store::{ScenarioStore, StoredScenario};

/// Current scenario selection
#[derive(Debug, Clone, Default)]
pub struct ScenarioSlot {
    pub scenario: Option<Arc<ScenarioConfig>>,
    pub preset_name: Option<String>,
    pub enabled: bool,
}

impl ScenarioSlot {
    /// Scenario to generate with, if one is set and enabled.
    pub fn effective(&self) -> Option<Arc<ScenarioConfig>> {
        if self.enabled {
            self.scenario.clone()
        } else {
            None
        }
    }

    fn to_stored(&self) -> StoredScenario {
        StoredScenario {
            preset_name: self.preset_name.clone(),
            scenario: self.scenario.as_deref().cloned(),
            enabled: self.enabled,
        }
    }
}

/// Entry point for consumers: clock-aware bar generation plus scenario control.
pub struct MarketSimulator {
    clock: Clock,
    generator: BarGenerator,
    slot: RwLock<ScenarioSlot>,
    store: Option<Arc<dyn ScenarioStore>>,
}

impl MarketSimulator {
    pub fn new(clock: Clock, config: GeneratorConfig) -> Self {
        Self {
            clock,
            generator: BarGenerator::new(config),
            slot: RwLock::new(ScenarioSlot::default()),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ScenarioStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn generator(&self) -> &BarGenerator {
        &self.generator
    }

    pub fn current_time(&self) -> (DateTime<Utc>, ClockMode) {
        self.clock.current_time()
    }

    /// Scenario slot snapshot.
    pub fn scenario(&self) -> ScenarioSlot {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Requests past the clock's "now" are truncated to now.
    fn effective_as_of(&self, symbol: &str, as_of: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let now = self.clock.now();
        match as_of {
            Some(requested) if requested > now => {
                warn!(
                    "Temporal violation: {} requested bars as of {} but the clock is at {}; truncating",
                    symbol,
                    requested.to_rfc3339(),
                    now.to_rfc3339()
                );
                now
            }
            Some(requested) => requested,
            None => now,
        }
    }

    /// Most recent `count` bars for `symbol`, oldest first. The final bar is
    /// the one in progress at `as_of` (default: the clock's current time).
    pub fn generate_bars(
        &self,
        symbol: &str,
        timeframe_minutes: u32,
        count: usize,
        as_of: Option<DateTime<Utc>>,
    ) -> Vec<Bar> {
        let as_of = self.effective_as_of(symbol, as_of);
        let scenario = self.scenario().effective();
        self.generator.generate_bars(&GenerationRequest {
            symbol,
            timeframe_minutes,
            count,
            as_of,
            scenario: scenario.as_deref(),
            default_anchor: self.clock.sim_start(),
        })
    }

    /// Regime driving `symbol` at `as_of` (default: now).
    pub fn regime_at(
        &self,
        symbol: &str,
        timeframe_minutes: u32,
        as_of: Option<DateTime<Utc>>,
    ) -> ResolvedRegime {
        let as_of = self.effective_as_of(symbol, as_of);
        let scenario = self.scenario().effective();
        self.generator.regime_at(&GenerationRequest {
            symbol,
            timeframe_minutes,
            count: 1,
            as_of,
            scenario: scenario.as_deref(),
            default_anchor: self.clock.sim_start(),
        })
    }

    /// Replace the scenario wholesale and enable it.
    pub async fn set_scenario(&self, scenario: ScenarioConfig) {
        info!("Scenario set to '{}'", scenario.name());
        self.replace(ScenarioSlot {
            scenario: Some(Arc::new(scenario)),
            preset_name: None,
            enabled: true,
        })
        .await;
    }

    /// Load a named preset and enable it.
    pub async fn set_preset(&self, name: &str) -> Result<(), ConfigError> {
        let scenario = ScenarioLibrary::get_preset(name)?;
        info!("Scenario preset '{}' loaded", scenario.name());
        self.replace(ScenarioSlot {
            preset_name: Some(scenario.name().to_string()),
            scenario: Some(Arc::new(scenario)),
            enabled: true,
        })
        .await;
        Ok(())
    }

    /// Drop the scenario; every symbol follows the baseline path.
    pub async fn clear_scenario(&self) {
        info!("Scenario cleared");
        self.replace(ScenarioSlot::default()).await;
    }

    /// Toggle the scenario without discarding it. Returns `true` if the flag changed.
    pub async fn enable_scenario(&self, enabled: bool) -> bool {
        let snapshot = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            if slot.enabled == enabled {
                return false;
            }
            slot.enabled = enabled;
            slot.to_stored()
        };
        info!("Scenario {}", if enabled { "enabled" } else { "disabled" });
        self.persist(snapshot).await;
        true
    }

    /// Load the persisted scenario slot. Returns `true` if one was found.
    pub async fn restore(&self) -> Result<bool, StoreError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(stored) = store.load_scenario().await? else {
            return Ok(false);
        };

        let restored = ScenarioSlot {
            scenario: stored.scenario.map(Arc::new),
            preset_name: stored.preset_name,
            enabled: stored.enabled,
        };
        info!(
            "Restored scenario '{}' (enabled: {})",
            restored.scenario.as_ref().map(|s| s.name()).unwrap_or("none"),
            restored.enabled
        );
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = restored;
        Ok(true)
    }

    async fn replace(&self, slot: ScenarioSlot) {
        let snapshot = slot.to_stored();
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = slot;
        self.persist(snapshot).await;
    }

    async fn persist(&self, stored: StoredScenario) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_scenario(&stored).await {
                warn!("Failed to persist scenario: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::RegimeKind;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Option<StoredScenario>>,
    }

    #[async_trait]
    impl ScenarioStore for MemoryStore {
        async fn load_scenario(&self) -> Result<Option<StoredScenario>, StoreError> {
            Ok(self.saved.lock().unwrap().clone())
        }

        async fn save_scenario(&self, stored: &StoredScenario) -> Result<(), StoreError> {
            *self.saved.lock().unwrap() = Some(stored.clone());
            Ok(())
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap()
    }

    fn simulator() -> MarketSimulator {
        let clock = Clock::simulated(start());
        clock.set_time(start() + chrono::Duration::hours(6)).unwrap();
        MarketSimulator::new(clock, GeneratorConfig::default())
    }

    #[test]
    fn test_future_as_of_is_truncated() {
        let sim = simulator();
        let now = sim.clock().now();
        let future = now + chrono::Duration::days(3);

        let truncated = sim.generate_bars("SPY", 5, 50, Some(future));
        let at_now = sim.generate_bars("SPY", 5, 50, None);
        assert_eq!(truncated, at_now);
        assert!(truncated.iter().all(|b| b.timestamp <= now));
    }

    #[test]
    fn test_past_as_of_is_respected() {
        let sim = simulator();
        let past = sim.clock().now() - chrono::Duration::hours(2);
        let bars = sim.generate_bars("SPY", 5, 10, Some(past));
        assert_eq!(bars.len(), 10);
        assert!(bars.last().unwrap().timestamp <= past);
    }

    #[tokio::test]
    async fn test_preset_and_enable_toggle() {
        let sim = simulator();
        sim.set_preset("flash-crash").await.unwrap();
        let slot = sim.scenario();
        assert_eq!(slot.preset_name.as_deref(), Some("flash-crash"));
        assert!(slot.effective().is_some());

        assert!(sim.enable_scenario(false).await);
        assert!(!sim.enable_scenario(false).await);
        assert!(sim.scenario().effective().is_none());
        assert!(sim.scenario().scenario.is_some());
    }

    #[tokio::test]
    async fn test_unknown_preset_leaves_slot_untouched() {
        let sim = simulator();
        assert!(sim.set_preset("nope").await.is_err());
        assert!(sim.scenario().scenario.is_none());
    }

    #[tokio::test]
    async fn test_disabled_scenario_uses_baseline() {
        let sim = simulator();
        let baseline = sim.generate_bars("QQQ", 5, 30, None);

        let crash = ScenarioConfig::builder("crash-only")
            .regime(RegimeKind::Crash, 500)
            .build()
            .unwrap();
        sim.set_scenario(crash).await;
        let crashing = sim.generate_bars("QQQ", 5, 30, None);
        assert_ne!(baseline, crashing);
        assert_eq!(sim.regime_at("QQQ", 5, None).regime, RegimeKind::Crash);

        sim.enable_scenario(false).await;
        assert_eq!(sim.generate_bars("QQQ", 5, 30, None), baseline);
        assert_eq!(sim.regime_at("QQQ", 5, None).regime, RegimeKind::Range);
    }

    #[tokio::test]
    async fn test_scenario_persists_and_restores() {
        let store = Arc::new(MemoryStore::default());
        let sim = simulator().with_store(store.clone());
        sim.set_preset("bull-trend").await.unwrap();
        sim.enable_scenario(false).await;

        let restored = simulator().with_store(store);
        assert!(restored.restore().await.unwrap());
        let slot = restored.scenario();
        assert_eq!(slot.preset_name.as_deref(), Some("bull-trend"));
        assert!(!slot.enabled);
        assert_eq!(
            slot.scenario.as_deref(),
            sim.scenario().scenario.as_deref()
        );
    }

    #[tokio::test]
    async fn test_restore_without_store() {
        let sim = simulator();
        assert!(!sim.restore().await.unwrap());
    }
}
