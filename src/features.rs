//! Scalar geometric descriptors, one-hot encodings and the tabular vector
//! layouts fed to the CNN.
//!
//! The `ring_*` functions accept a ring closed or open and are what both the
//! batch precompute and the inference path call, so the two cannot drift
//! apart.

use crate::error::{Result, SurrogateError};
use crate::normalize::{NormalizationStats, Standardizer};
use crate::room::{close_ring, ApartmentType, Room, RoomType};

fn shoelace(closed: &[[f64; 2]]) -> f64 {
    let twice: f64 = closed
        .windows(2)
        .map(|w| w[0][0] * w[1][1] - w[1][0] * w[0][1])
        .sum();
    0.5 * twice.abs()
}

/// Shoelace area, always non-negative.
pub fn ring_area(ring: &[[f64; 2]]) -> f64 {
    shoelace(&close_ring(ring))
}

fn ring_bounds(ring: &[[f64; 2]]) -> ([f64; 2], [f64; 2]) {
    let mut min = [f64::INFINITY; 2];
    let mut max = [f64::NEG_INFINITY; 2];
    for p in ring {
        for k in 0..2 {
            min[k] = min[k].min(p[k]);
            max[k] = max[k].max(p[k]);
        }
    }
    (min, max)
}

/// Bounding-box width / height folded to be >= 1. A zero-width or
/// zero-height box yields exactly 1.
pub fn ring_aspect_ratio(ring: &[[f64; 2]]) -> f64 {
    let (min, max) = ring_bounds(ring);
    let (w, h) = (max[0] - min[0], max[1] - min[1]);
    if w == 0.0 || h == 0.0 {
        return 1.0;
    }
    let ratio = w / h;
    if ratio >= 1.0 {
        ratio
    } else {
        1.0 / ratio
    }
}

/// Vertex count without the closing repeat.
pub fn ring_n_vertices(ring: &[[f64; 2]]) -> usize {
    close_ring(ring).len().saturating_sub(1)
}

/// Door position relative to the bounding box. A zero-extent axis divides
/// by 1.0, so that component is an offset from the min corner rather than
/// a fraction; existing normalization statistics depend on this.
pub fn ring_door_rel_position(ring: &[[f64; 2]], door: [f64; 2]) -> (f64, f64) {
    let (min, max) = ring_bounds(ring);
    let rel = |k: usize| {
        let extent = max[k] - min[k];
        let extent = if extent == 0.0 { 1.0 } else { extent };
        (door[k] - min[k]) / extent
    };
    (rel(0), rel(1))
}

pub fn area(room: &Room) -> f64 {
    ring_area(&room.polygon)
}

pub fn aspect_ratio(room: &Room) -> f64 {
    ring_aspect_ratio(&room.polygon)
}

pub fn n_vertices(room: &Room) -> usize {
    ring_n_vertices(&room.polygon)
}

pub fn door_rel_position(room: &Room) -> (f64, f64) {
    ring_door_rel_position(&room.polygon, room.door)
}

pub fn room_type_onehot(room_type: RoomType) -> [f32; RoomType::COUNT] {
    let mut v = [0.0; RoomType::COUNT];
    v[room_type.index()] = 1.0;
    v
}

/// All zeros when the apartment type is unknown.
pub fn apartment_type_onehot(apartment_type: Option<ApartmentType>) -> [f32; ApartmentType::COUNT] {
    let mut v = [0.0; ApartmentType::COUNT];
    if let Some(t) = apartment_type {
        v[t.index()] = 1.0;
    }
    v
}

/// Raw scalar descriptors of one room, computed once and shared by every
/// downstream layout.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeometryFeatures {
    pub area: f64,
    pub aspect_ratio: f64,
    pub n_vertices: usize,
    pub door_rel_x: f64,
    pub door_rel_y: f64,
}

impl GeometryFeatures {
    pub fn from_ring(ring: &[[f64; 2]], door: [f64; 2]) -> Self {
        let ring = close_ring(ring);
        let (door_rel_x, door_rel_y) = ring_door_rel_position(&ring, door);
        Self {
            area: shoelace(&ring),
            aspect_ratio: ring_aspect_ratio(&ring),
            n_vertices: ring.len().saturating_sub(1),
            door_rel_x,
            door_rel_y,
        }
    }

    pub fn from_room(room: &Room) -> Self {
        Self::from_ring(&room.polygon, room.door)
    }
}

pub const N_BASELINE_FEATURES: usize = 5 + RoomType::COUNT + ApartmentType::COUNT;

/// Column names of [`extract_features`], in order.
pub fn feature_names() -> Vec<String> {
    let mut names: Vec<String> = ["area", "aspect_ratio", "n_vertices", "door_rel_x", "door_rel_y"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    names.extend(RoomType::ALL.iter().map(|t| format!("room_type_{}", t.label())));
    names.extend(ApartmentType::ALL.iter().map(|t| format!("apt_type_{}", t.label())));
    names
}

/// Baseline tabular vector: 5 scalars, room-type one-hot, apartment-type one-hot.
pub fn extract_features(room: &Room) -> [f32; N_BASELINE_FEATURES] {
    let g = GeometryFeatures::from_room(room);
    let mut v = [0.0f32; N_BASELINE_FEATURES];
    v[0] = g.area as f32;
    v[1] = g.aspect_ratio as f32;
    v[2] = g.n_vertices as f32;
    v[3] = g.door_rel_x as f32;
    v[4] = g.door_rel_y as f32;
    v[5..5 + RoomType::COUNT].copy_from_slice(&room_type_onehot(room.room_type));
    v[5 + RoomType::COUNT..].copy_from_slice(&apartment_type_onehot(room.apartment_type));
    v
}

pub fn extract_feature_matrix(rooms: &[Room]) -> Vec<[f32; N_BASELINE_FEATURES]> {
    rooms.iter().map(extract_features).collect()
}

/// Labels of training rooms; an unlabeled room is an error.
pub fn extract_scores(rooms: &[Room]) -> Result<Vec<f32>> {
    rooms
        .iter()
        .map(|r| {
            r.score.map(|s| s as f32).ok_or_else(|| {
                let seed = r.apartment_seed.map_or_else(|| "none".to_string(), |s| s.to_string());
                SurrogateError::MissingScore(format!("{} (apt seed={seed})", r.room_type))
            })
        })
        .collect()
}

/// Scalar subset consumed by the CNN's tabular branch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TabularLayout {
    /// `[area, door_rel_x, door_rel_y]`
    Compact,
    /// `[area, door_rel_x, door_rel_y, aspect_ratio, n_vertices]`
    Extended,
}

impl TabularLayout {
    pub fn from_width(n_tabular: usize) -> Result<Self> {
        match n_tabular {
            3 => Ok(Self::Compact),
            5 => Ok(Self::Extended),
            other => Err(SurrogateError::UnsupportedTabularWidth(other)),
        }
    }

    pub fn width(self) -> usize {
        match self {
            Self::Compact => 3,
            Self::Extended => 5,
        }
    }

    /// Standardizes with the stored statistics. Door positions are already
    /// in [0, 1] and pass through unchanged.
    pub fn build(self, g: &GeometryFeatures, stats: &NormalizationStats) -> Vec<f32> {
        let area = stats.area.apply(g.area);
        let mut v = vec![area as f32, g.door_rel_x as f32, g.door_rel_y as f32];
        if self == Self::Extended {
            let aspect = stats.aspect_ratio.unwrap_or(Standardizer::IDENTITY);
            let verts = stats.n_vertices.unwrap_or(Standardizer::IDENTITY);
            v.push(aspect.apply(g.aspect_ratio) as f32);
            v.push(verts.apply(g.n_vertices as f64) as f32);
        }
        v
    }
}
