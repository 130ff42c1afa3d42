//! Error taxonomy for the surrogate.
//!
//! Three families surface to callers: input validation (bad category labels,
//! malformed rings), missing resources (no checkpoint at any resolution tier)
//! and configuration mismatches (a checkpoint the loader cannot rebuild).
//! Degenerate but well-formed geometry is never an error.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SurrogateError {
    #[error("Unknown room_type '{label}'. Must be one of: {known}")]
    UnknownRoomType { label: String, known: String },

    #[error("Unknown apartment_type '{label}'. Must be one of: {known}")]
    UnknownApartmentType { label: String, known: String },

    #[error("Malformed polygon: {0}")]
    MalformedPolygon(String),

    #[error("{}", checkpoint_not_found_message(.tried, .env_var))]
    CheckpointNotFound { tried: Vec<PathBuf>, env_var: String },

    #[error("Unsupported n_tabular={0} in checkpoint config (supported: 3, 5)")]
    UnsupportedTabularWidth(usize),

    #[error("Checkpoint architecture mismatch: {0}")]
    ArchitectureMismatch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Room '{0}' has no score; is this an inference-time room?")]
    MissingScore(String),

    #[error("Dataset archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl SurrogateError {
    /// True for errors caused by the caller's input rather than the environment.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownRoomType { .. } | Self::UnknownApartmentType { .. } | Self::MalformedPolygon(_)
        )
    }

    /// True for errors caused by a checkpoint the loader cannot rebuild.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedTabularWidth(_) | Self::ArchitectureMismatch(_) | Self::Config(_)
        )
    }
}

fn checkpoint_not_found_message(tried: &[PathBuf], env_var: &str) -> String {
    let mut message = String::from("No model found. Either:\n");
    message.push_str("  1. Pass an explicit checkpoint path\n");
    message.push_str(&format!("  2. Set the {env_var} environment variable\n"));
    message.push_str("  3. Place a checkpoint in the model directory");
    if !tried.is_empty() {
        message.push_str("\nLocations tried:");
        for path in tried {
            message.push_str(&format!("\n  - {}", path.display()));
        }
    }
    message
}

impl From<serde_json::Error> for SurrogateError {
    fn from(e: serde_json::Error) -> Self {
        SurrogateError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for SurrogateError {
    fn from(e: toml::de::Error) -> Self {
        SurrogateError::Config(e.to_string())
    }
}

impl From<safetensors::SafeTensorError> for SurrogateError {
    fn from(e: safetensors::SafeTensorError) -> Self {
        SurrogateError::Config(format!("safetensors: {e}"))
    }
}

impl From<ndarray_npy::WriteNpzError> for SurrogateError {
    fn from(e: ndarray_npy::WriteNpzError) -> Self {
        SurrogateError::Archive(e.to_string())
    }
}

impl From<ndarray_npy::ReadNpzError> for SurrogateError {
    fn from(e: ndarray_npy::ReadNpzError) -> Self {
        SurrogateError::Archive(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SurrogateError>;
