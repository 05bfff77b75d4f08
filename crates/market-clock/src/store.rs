use async_trait::async_trait;
use market_core::StoreError;

use crate::clock::ClockState;

/// Persistence port for clock state.
///
/// Implementations must tolerate frequent overwrites: the driver saves the
/// latest snapshot after explicit transitions and periodically while ticking.
#[async_trait]
pub trait ClockStore: Send + Sync {
    async fn load_clock(&self) -> Result<Option<ClockState>, StoreError>;
    async fn save_clock(&self, state: &ClockState) -> Result<(), StoreError>;
}
