// src/error.rs

use thiserror::Error;

/// Failures inside the transport core.
///
/// Public transport and metronome operations never return these; they log
/// them and leave state untouched. Constructors and loaders do return them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("resource not found: {name}.{extension}")]
    ResourceMissing { name: String, extension: String },

    #[error("failed to decode '{name}': {reason}")]
    Decode { name: String, reason: String },

    #[error("audio engine failed to start: {0}")]
    EngineStart(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
