use thiserror::Error;

/// Scenario and generator configuration errors.
///
/// These are raised when a configuration is built or loaded and are never
/// silently repaired. Out-of-range magnitudes are clamped instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Scenario must contain at least one regime phase")]
    EmptyRegimes,

    #[error("Regime phase {index} has zero bars")]
    ZeroBarPhase { index: usize },

    #[error("Overlay {index} ends before it starts (start {start}, end {end})")]
    InvalidOverlayRange { index: usize, start: u32, end: u32 },

    #[error("Overlays {first} and {second} overlap")]
    OverlappingOverlays { first: usize, second: usize },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unknown scenario preset: {0}")]
    UnknownPreset(String),
}
