//! Standardization statistics.
//!
//! Statistics are fitted once on the training rooms, stored inside the
//! checkpoint and replayed verbatim at inference. Nothing on the inference
//! path recomputes them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SurrogateError};
use crate::features::GeometryFeatures;
use crate::room::Room;

/// `(value - mean) / (std + EPS)`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: f64,
    pub std: f64,
}

impl Standardizer {
    pub const EPS: f64 = 1e-8;

    /// Leaves values unchanged (up to `EPS`).
    pub const IDENTITY: Standardizer = Standardizer {
        mean: 0.0,
        std: 1.0,
    };

    pub fn new(mean: f64, std: f64) -> Self {
        Self { mean, std }
    }

    pub fn apply(&self, value: f64) -> f64 {
        (value - self.mean) / (self.std + Self::EPS)
    }

    /// Population mean and standard deviation (ddof = 0).
    pub fn fit(values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(SurrogateError::Config(
                "cannot fit normalization statistics on an empty sample".to_string(),
            ));
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Ok(Self {
            mean,
            std: var.sqrt(),
        })
    }
}

/// Per-feature statistics persisted with a checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub area: Standardizer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<Standardizer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_vertices: Option<Standardizer>,
}

impl NormalizationStats {
    pub fn area_only(area: Standardizer) -> Self {
        Self {
            area,
            aspect_ratio: None,
            n_vertices: None,
        }
    }

    /// Fits statistics on training rooms. `include_geometry` adds the
    /// aspect-ratio and vertex-count statistics needed by 5-wide models.
    pub fn fit(rooms: &[Room], include_geometry: bool) -> Result<Self> {
        let feats: Vec<GeometryFeatures> = rooms.iter().map(GeometryFeatures::from_room).collect();
        let column = |f: fn(&GeometryFeatures) -> f64| feats.iter().map(f).collect::<Vec<f64>>();

        let area = Standardizer::fit(&column(|g| g.area))?;
        if !include_geometry {
            return Ok(Self::area_only(area));
        }
        Ok(Self {
            area,
            aspect_ratio: Some(Standardizer::fit(&column(|g| g.aspect_ratio))?),
            n_vertices: Some(Standardizer::fit(&column(|g| g.n_vertices as f64))?),
        })
    }

    pub fn has_geometry(&self) -> bool {
        self.aspect_ratio.is_some() && self.n_vertices.is_some()
    }
}
