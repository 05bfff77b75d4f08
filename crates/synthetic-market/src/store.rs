use async_trait::async_trait;
use market_core::StoreError;
use serde::{Deserialize, Serialize};

use crate::scenario::ScenarioConfig;

/// Persisted scenario slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredScenario {
    /// Preset the scenario was loaded from, if any
    pub preset_name: Option<String>,
    pub scenario: Option<ScenarioConfig>,
    pub enabled: bool,
}

/// Storage for the active scenario
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    async fn load_scenario(&self) -> Result<Option<StoredScenario>, StoreError>;

    async fn save_scenario(&self, stored: &StoredScenario) -> Result<(), StoreError>;
}
