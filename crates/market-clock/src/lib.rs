//! Market Clock
//!
//! A single time source for the simulator. In `Real` mode it reports wall-clock
//! time; in `Simulated` mode it reports a simulated instant that a background
//! [`ClockDriver`] advances at a configurable speed and that can be paused,
//! reset, or restored from persisted state.

pub mod clock;
pub mod driver;
pub mod error;
pub mod store;

pub use clock::{Clock, ClockMode, ClockState};
pub use driver::{ClockDriver, DriverConfig};
pub use error::ClockError;
pub use store::ClockStore;
