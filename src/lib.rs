//! Furniture-placement score surrogate.
//!
//! A room (polygon + door + category) is rasterized into a 3-channel 64×64
//! image, paired with a handful of standardized scalars and scored by a
//! small dual-branch CNN loaded from a self-describing checkpoint.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod cache;
pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod features;
pub mod frame;
pub mod model;
pub mod normalize;
pub mod predict;
pub mod raster;
pub mod room;

pub use cache::ModelCache;
pub use checkpoint::{Checkpoint, CheckpointResolver, ModelConfig};
pub use error::{Result, SurrogateError};
pub use features::{extract_features, GeometryFeatures, TabularLayout};
pub use frame::{encode_frame, EncodedPolygon, PixelFrame, IMG_SIZE};
pub use normalize::{NormalizationStats, Standardizer};
pub use predict::{predict_score, InferenceService, PreparedInput, ScoreRequest};
pub use raster::{rasterize, rasterize_room, RasterImage};
pub use room::{ApartmentType, Room, RoomType};

/// File read by [`ServiceConfig::discover`].
pub const CONFIG_FILE: &str = "furnisher.toml";

/// Where the inference service looks for checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "ServiceConfig::default_model_dir")]
    pub model_dir: PathBuf,
    /// Environment variable holding a checkpoint path override.
    #[serde(default = "ServiceConfig::default_model_env_var")]
    pub model_env_var: String,
    #[serde(default = "ServiceConfig::default_checkpoint_prefix")]
    pub checkpoint_prefix: String,
    #[serde(default = "ServiceConfig::default_checkpoint_extension")]
    pub checkpoint_extension: String,
}

impl ServiceConfig {
    fn default_model_dir() -> PathBuf {
        PathBuf::from("models")
    }
    fn default_model_env_var() -> String {
        "FURNISHER_MODEL_PATH".to_string()
    }
    fn default_checkpoint_prefix() -> String {
        "cnn_".to_string()
    }
    fn default_checkpoint_extension() -> String {
        "safetensors".to_string()
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ServiceConfig =
            toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// `furnisher.toml` from the working directory, or defaults.
    pub fn discover() -> Self {
        let path = Path::new(CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|err| {
            log::warn!("{err:#}; using default service configuration");
            Self::default()
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_dir: Self::default_model_dir(),
            model_env_var: Self::default_model_env_var(),
            checkpoint_prefix: Self::default_checkpoint_prefix(),
            checkpoint_extension: Self::default_checkpoint_extension(),
        }
    }
}

#[cfg(feature = "python-bindings")]
pub mod python_bindings;

#[cfg(feature = "python-bindings")]
use pyo3::prelude::*;

#[cfg(feature = "python-bindings")]
#[pymodule]
fn furnisher_surrogate(py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    python_bindings::register(py, m)
}
