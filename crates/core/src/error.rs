//! Core error types

use thiserror::Error;

/// Core error type for Muster
#[derive(Debug, Error)]
pub enum CoreError {
    /// Value could not be parsed into a closed enumeration
    #[error("Parse error: {0}")]
    Parse(String),

    /// Coordinate outside WGS84 bounds
    #[error("Coordinate out of range: lat={latitude}, lon={longitude}")]
    InvalidCoordinate {
        /// Offending latitude
        latitude: f64,
        /// Offending longitude
        longitude: f64,
    },

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
