use thiserror::Error;

/// Rejected clock operations. State is left unchanged whenever one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClockError {
    #[error("Invalid speed multiplier: {0} (must be a finite value > 0)")]
    InvalidSpeed(f64),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Invalid clock mode: {0}")]
    InvalidMode(String),

    #[error("Operation not allowed while the clock is running")]
    Running,
}
