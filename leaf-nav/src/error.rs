//! Error types for the leaf-nav binary

use thiserror::Error;

/// Top-level error type, folding in the library crates
#[derive(Error, Debug)]
pub enum NavError {
    #[error(transparent)]
    Geometry(#[from] canopy::CanopyError),

    #[error(transparent)]
    Gimbal(#[from] gimbal_io::GimbalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CNC error: {0}")]
    Cnc(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for NavError {
    fn from(e: toml::de::Error) -> Self {
        NavError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for NavError {
    fn from(e: toml::ser::Error) -> Self {
        NavError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NavError>;
