//! Self-describing model checkpoints.
//!
//! A checkpoint is one `.safetensors` file. The tensors are the trained
//! weights; the header metadata carries the architecture config and the
//! normalization statistics frozen at training time, both as JSON strings.
//! A loaded [`Checkpoint`] is immutable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::error::{Result, SurrogateError};
use crate::features::TabularLayout;
use crate::model::{ArchitectureVariant, RoomCnn};
use crate::normalize::NormalizationStats;
use crate::raster::{RasterImage, CHANNELS};
use crate::frame::IMG_SIZE;
use crate::room::RoomType;
use crate::ServiceConfig;

pub use crate::model::ModelConfig;

pub const FORMAT_VERSION: &str = "1";
const KEY_CONFIG: &str = "config";
const KEY_NORMALIZATION: &str = "normalization";
const KEY_FORMAT_VERSION: &str = "format_version";
/// Bookkeeping buffers some exporters write next to batch-norm statistics.
const IGNORED_SUFFIX: &str = ".num_batches_tracked";

pub struct Checkpoint {
    path: PathBuf,
    config: ModelConfig,
    layout: TabularLayout,
    stats: NormalizationStats,
    model: RoomCnn,
    device: Device,
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn metadata_entry<'a>(meta: &'a HashMap<String, String>, key: &str, path: &Path) -> Result<&'a str> {
    meta.get(key).map(String::as_str).ok_or_else(|| {
        SurrogateError::Config(format!(
            "checkpoint {} has no '{key}' metadata entry",
            path.display()
        ))
    })
}

/// Every expected tensor must be present with the expected shape and nothing
/// outside the configured architecture may be present.
fn check_tensors(config: &ModelConfig, tensors: &HashMap<String, Tensor>) -> Result<()> {
    let expected = config.parameter_shapes();
    for (name, shape) in &expected {
        let tensor = tensors
            .get(name)
            .ok_or_else(|| SurrogateError::ArchitectureMismatch(format!("missing tensor '{name}'")))?;
        if tensor.dims() != shape.as_slice() {
            return Err(SurrogateError::ArchitectureMismatch(format!(
                "tensor '{name}' has shape {:?}, config expects {shape:?}",
                tensor.dims()
            )));
        }
    }
    let mut unexpected: Vec<&String> = tensors
        .keys()
        .filter(|k| !k.ends_with(IGNORED_SUFFIX))
        .filter(|k| !expected.iter().any(|(name, _)| name == *k))
        .collect();
    unexpected.sort();
    if let Some(first) = unexpected.first() {
        return Err(SurrogateError::ArchitectureMismatch(format!(
            "unexpected tensor '{first}' ({} not described by the config)",
            unexpected.len()
        )));
    }
    Ok(())
}

impl Checkpoint {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let (_, header) = safetensors::SafeTensors::read_metadata(&bytes)?;
        let meta = header.metadata().as_ref().ok_or_else(|| {
            SurrogateError::Config(format!("checkpoint {} has no metadata header", path.display()))
        })?;

        if let Some(version) = meta.get(KEY_FORMAT_VERSION) {
            if version != FORMAT_VERSION {
                log::warn!(
                    "checkpoint {} declares format_version {version}, expected {FORMAT_VERSION}",
                    path.display()
                );
            }
        }
        let config: ModelConfig = serde_json::from_str(metadata_entry(meta, KEY_CONFIG, path)?)?;
        let layout = config.validate()?;
        let stats: NormalizationStats =
            serde_json::from_str(metadata_entry(meta, KEY_NORMALIZATION, path)?)?;
        if layout == TabularLayout::Extended && !stats.has_geometry() {
            log::warn!(
                "checkpoint {} has n_tabular=5 but lacks aspect_ratio/n_vertices statistics; \
                 those features pass through unstandardized",
                path.display()
            );
        }

        let device = Device::Cpu;
        let tensors = candle_core::safetensors::load_buffer(&bytes, &device)?;
        check_tensors(&config, &tensors)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let model = RoomCnn::load(&config, vb)?;
        log::info!(
            "loaded checkpoint {} ({}, n_tabular={})",
            path.display(),
            config.variant().describe(),
            config.n_tabular
        );
        Ok(Self {
            path: path.to_path_buf(),
            config,
            layout,
            stats,
            model,
            device,
        })
    }

    /// Writes weights plus config and statistics into one file. The tensors
    /// are checked against the config first so every saved file loads.
    pub fn save(
        path: &Path,
        tensors: &HashMap<String, Tensor>,
        config: &ModelConfig,
        stats: &NormalizationStats,
    ) -> Result<()> {
        config.validate()?;
        check_tensors(config, tensors)?;
        let metadata = HashMap::from([
            (KEY_CONFIG.to_string(), serde_json::to_string(config)?),
            (KEY_NORMALIZATION.to_string(), serde_json::to_string(stats)?),
            (KEY_FORMAT_VERSION.to_string(), FORMAT_VERSION.to_string()),
        ]);
        let mut entries: Vec<(&String, &Tensor)> = tensors.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        safetensors::serialize_to_file(entries, &Some(metadata), path)?;
        log::info!("saved checkpoint {}", path.display());
        Ok(())
    }

    /// All-zero weights for `config` (unit running variance), the starting
    /// point for checkpoints whose weights are set by hand.
    pub fn zeroed_parameters(config: &ModelConfig) -> Result<HashMap<String, Tensor>> {
        let device = Device::Cpu;
        config
            .parameter_shapes()
            .into_iter()
            .map(|(name, shape)| -> Result<(String, Tensor)> {
                let t = if name.ends_with(".running_var") {
                    Tensor::ones(shape, DType::F32, &device)?
                } else {
                    Tensor::zeros(shape, DType::F32, &device)?
                };
                Ok((name, t))
            })
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn layout(&self) -> TabularLayout {
        self.layout
    }

    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    pub fn variant(&self) -> ArchitectureVariant {
        self.config.variant()
    }

    /// Raw (unclamped) model output for one room.
    pub fn evaluate(&self, image: &RasterImage, room_type: RoomType, tabular: &[f32]) -> Result<f64> {
        if tabular.len() != self.layout.width() {
            return Err(SurrogateError::ArchitectureMismatch(format!(
                "tabular vector has {} values, checkpoint expects {}",
                tabular.len(),
                self.layout.width()
            )));
        }
        let image = Tensor::from_vec(
            image.to_f32_normalized(),
            (1, CHANNELS, IMG_SIZE, IMG_SIZE),
            &self.device,
        )?;
        let room_type_idx = Tensor::new(&[room_type.index() as u32], &self.device)?;
        let tabular = Tensor::from_slice(tabular, (1, tabular.len()), &self.device)?;
        let out = self
            .model
            .forward(&image, &room_type_idx, &tabular)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        Ok(out[0] as f64)
    }
}

/// Finds the checkpoint to use, in order: an explicit path, the environment
/// override, the last-by-name checkpoint in the model directory.
#[derive(Clone, Debug)]
pub struct CheckpointResolver {
    model_dir: PathBuf,
    env_var: String,
    prefix: String,
    extension: String,
}

impl CheckpointResolver {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            model_dir: config.model_dir.clone(),
            env_var: config.model_env_var.clone(),
            prefix: config.checkpoint_prefix.clone(),
            extension: config.checkpoint_extension.clone(),
        }
    }

    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    pub fn resolve(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        let env_value = std::env::var_os(&self.env_var).filter(|v| !v.is_empty());
        self.resolve_with(explicit, env_value.as_deref().map(Path::new))
    }

    /// [`CheckpointResolver::resolve`] with the environment value supplied by
    /// the caller.
    pub fn resolve_with(&self, explicit: Option<&Path>, env_value: Option<&Path>) -> Result<PathBuf> {
        let not_found = |tried: Vec<PathBuf>| SurrogateError::CheckpointNotFound {
            tried,
            env_var: self.env_var.clone(),
        };
        if let Some(path) = explicit {
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(not_found(vec![path.to_path_buf()]))
            };
        }
        if let Some(path) = env_value {
            return if path.is_file() {
                log::debug!("checkpoint from ${}: {}", self.env_var, path.display());
                Ok(path.to_path_buf())
            } else {
                Err(not_found(vec![path.to_path_buf()]))
            };
        }
        self.latest_in_dir()
            .ok_or_else(|| not_found(vec![self.model_dir.join(self.pattern())]))
    }

    fn pattern(&self) -> String {
        format!("{}*.{}", self.prefix, self.extension)
    }

    /// Lexicographically last `{prefix}*.{extension}` file in the model
    /// directory.
    pub fn latest_in_dir(&self) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.model_dir).ok()?;
        let suffix = format!(".{}", self.extension);
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&self.prefix) && n.ends_with(&suffix))
                    .unwrap_or(false)
            })
            .max()
    }
}
