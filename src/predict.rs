//! Single-room scoring.
//!
//! Takes a raw room description (meters, category labels), applies exactly
//! the preprocessing the training data went through and returns a score in
//! [0, 100].

use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::cache::ModelCache;
use crate::checkpoint::{Checkpoint, CheckpointResolver};
use crate::error::{Result, SurrogateError};
use crate::features::GeometryFeatures;
use crate::raster::{rasterize_room, RasterImage};
use crate::room::{ApartmentType, Room, RoomType};
use crate::ServiceConfig;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// One room to score. The polygon may be open or closed.
#[derive(Clone, Copy, Debug)]
pub struct ScoreRequest<'a> {
    pub polygon: &'a [[f64; 2]],
    pub door: [f64; 2],
    pub room_type: &'a str,
    pub apartment_type: Option<&'a str>,
    pub checkpoint: Option<&'a Path>,
}

impl<'a> ScoreRequest<'a> {
    pub fn new(polygon: &'a [[f64; 2]], door: [f64; 2], room_type: &'a str) -> Self {
        Self {
            polygon,
            door,
            room_type,
            apartment_type: None,
            checkpoint: None,
        }
    }

    pub fn with_apartment_type(mut self, apartment_type: &'a str) -> Self {
        self.apartment_type = Some(apartment_type);
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: &'a Path) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }
}

/// Exactly what the model sees for one request.
#[derive(Debug)]
pub struct PreparedInput {
    pub room: Room,
    pub image: RasterImage,
    pub tabular: Vec<f32>,
    pub checkpoint: Arc<Checkpoint>,
}

impl PreparedInput {
    /// Model output clamped to the score range.
    pub fn evaluate(&self) -> Result<f64> {
        let raw = self
            .checkpoint
            .evaluate(&self.image, self.room.room_type, &self.tabular)?;
        // infinities clip like any other out-of-range score
        if raw.is_nan() {
            return Err(SurrogateError::Config(format!(
                "checkpoint {} produced a NaN score",
                self.checkpoint.path().display()
            )));
        }
        Ok(raw.clamp(MIN_SCORE, MAX_SCORE))
    }
}

pub struct InferenceService {
    config: ServiceConfig,
    resolver: CheckpointResolver,
    cache: Arc<ModelCache>,
}

impl InferenceService {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_cache(config, Arc::new(ModelCache::new()))
    }

    /// Shares `cache` with other services.
    pub fn with_cache(config: ServiceConfig, cache: Arc<ModelCache>) -> Self {
        let resolver = CheckpointResolver::from_config(&config);
        Self {
            config,
            resolver,
            cache,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &CheckpointResolver {
        &self.resolver
    }

    /// Validates, rasterizes and standardizes the request against the
    /// checkpoint it resolves to, without running the model.
    pub fn prepare(&self, request: &ScoreRequest) -> Result<PreparedInput> {
        let room_type: RoomType = request.room_type.parse()?;
        if let Some(label) = request.apartment_type {
            let apartment_type: ApartmentType = label.parse()?;
            log::warn!("apartment type '{apartment_type}' is not a model input; ignored");
        }
        let room = Room::new(request.polygon, request.door, room_type)?;

        let path = self.resolver.resolve(request.checkpoint)?;
        log::debug!("scoring with checkpoint {}", path.display());
        let checkpoint = self.cache.get_or_load(&path)?;

        let image = rasterize_room(&room)?;
        let geometry = GeometryFeatures::from_room(&room);
        let tabular = checkpoint.layout().build(&geometry, checkpoint.stats());
        Ok(PreparedInput {
            room,
            image,
            tabular,
            checkpoint,
        })
    }

    pub fn predict(&self, request: &ScoreRequest) -> Result<f64> {
        self.prepare(request)?.evaluate()
    }

    /// Scores each request independently; the first failure aborts.
    pub fn predict_batch(&self, requests: &[ScoreRequest]) -> Result<Vec<f64>> {
        requests.iter().map(|r| self.predict(r)).collect()
    }
}

impl Default for InferenceService {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

static DEFAULT_SERVICE: OnceLock<InferenceService> = OnceLock::new();

/// Process-wide service built from [`ServiceConfig::discover`] on first use.
pub fn default_service() -> &'static InferenceService {
    DEFAULT_SERVICE.get_or_init(|| InferenceService::new(ServiceConfig::discover()))
}

/// One-call scoring through [`default_service`].
pub fn predict_score(
    polygon: &[[f64; 2]],
    door: [f64; 2],
    room_type: &str,
    apartment_type: Option<&str>,
    checkpoint: Option<&Path>,
) -> Result<f64> {
    let request = ScoreRequest {
        polygon,
        door,
        room_type,
        apartment_type,
        checkpoint,
    };
    default_service().predict(&request)
}
