//! Batch pre-rasterization and the dataset archive.
//!
//! Rooms are rasterized in parallel into disjoint per-room slots of one
//! buffer, so the output order is the input order regardless of scheduling.
//! The archive is a compressed `.npz` with one array per key; `-1` marks an
//! absent label.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use anyhow::Context;
use ndarray::{Array1, Array4};
use ndarray_npy::{NpzReader, NpzWriter, ReadableElement};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SurrogateError};
use crate::features::GeometryFeatures;
use crate::frame::IMG_SIZE;
use crate::predict::ScoreRequest;
use crate::raster::{rasterize_room, RasterImage, CHANNELS};
use crate::room::{ApartmentType, Room, RoomType};

/// Value stored for an absent label.
pub const MISSING: i8 = -1;

pub const KEY_IMAGES: &str = "images";
pub const KEY_SCORES: &str = "scores";
pub const KEY_ROOM_TYPE_IDX: &str = "room_type_idx";
pub const KEY_APARTMENT_TYPE_IDX: &str = "apartment_type_idx";
pub const KEY_AREA: &str = "area";
pub const KEY_DOOR_REL_X: &str = "door_rel_x";
pub const KEY_DOOR_REL_Y: &str = "door_rel_y";
pub const KEY_APARTMENT_SEEDS: &str = "apartment_seeds";

#[derive(Clone, Debug, PartialEq)]
pub struct DatasetArrays {
    /// (N, 3, 64, 64)
    pub images: Array4<u8>,
    pub scores: Array1<f32>,
    pub room_type_idx: Array1<i8>,
    pub apartment_type_idx: Array1<i8>,
    pub area: Array1<f32>,
    pub door_rel_x: Array1<f32>,
    pub door_rel_y: Array1<f32>,
    pub apartment_seeds: Array1<i64>,
}

pub fn precompute_dataset(rooms: &[Room]) -> Result<DatasetArrays> {
    let n = rooms.len();
    let mut pixels = vec![0u8; n * RasterImage::LEN];
    pixels
        .par_chunks_mut(RasterImage::LEN)
        .zip(rooms.par_iter())
        .try_for_each(|(slot, room)| -> Result<()> {
            slot.copy_from_slice(rasterize_room(room)?.as_bytes());
            Ok(())
        })?;
    let images = Array4::from_shape_vec((n, CHANNELS, IMG_SIZE, IMG_SIZE), pixels)
        .map_err(|e| SurrogateError::Archive(e.to_string()))?;

    let geometry: Vec<GeometryFeatures> = rooms.par_iter().map(GeometryFeatures::from_room).collect();
    let arrays = DatasetArrays {
        images,
        scores: rooms.iter().map(|r| r.score.map_or(-1.0, |s| s as f32)).collect(),
        room_type_idx: rooms.iter().map(|r| r.room_type.index() as i8).collect(),
        apartment_type_idx: rooms
            .iter()
            .map(|r| r.apartment_type.map_or(MISSING, |a| a.index() as i8))
            .collect(),
        area: geometry.iter().map(|g| g.area as f32).collect(),
        door_rel_x: geometry.iter().map(|g| g.door_rel_x as f32).collect(),
        door_rel_y: geometry.iter().map(|g| g.door_rel_y as f32).collect(),
        apartment_seeds: rooms
            .iter()
            .map(|r| r.apartment_seed.unwrap_or(MISSING as i64))
            .collect(),
    };
    log::info!("rasterized {n} rooms");
    Ok(arrays)
}

/// Reads `key`, accepting archives written with or without the `.npy`
/// member suffix.
fn read_array<R, A, D>(npz: &mut NpzReader<R>, names: &[String], key: &str) -> Result<Option<ndarray::Array<A, D>>>
where
    R: Read + Seek,
    A: ReadableElement,
    D: ndarray::Dimension,
{
    let with_suffix = format!("{key}.npy");
    let member = names.iter().find(|n| **n == with_suffix || *n == key);
    match member {
        Some(name) => Ok(Some(npz.by_name(name)?)),
        None => Ok(None),
    }
}

fn require<T>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| SurrogateError::Archive(format!("archive has no '{key}' array")))
}

impl DatasetArrays {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// One stored image.
    pub fn image(&self, i: usize) -> Option<RasterImage> {
        if i >= self.len() {
            return None;
        }
        let view = self.images.index_axis(ndarray::Axis(0), i);
        RasterImage::from_bytes(&view.iter().copied().collect::<Vec<u8>>())
    }

    pub fn write_npz(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut npz = NpzWriter::new_compressed(file);
        npz.add_array(KEY_IMAGES, &self.images)?;
        npz.add_array(KEY_SCORES, &self.scores)?;
        npz.add_array(KEY_ROOM_TYPE_IDX, &self.room_type_idx)?;
        npz.add_array(KEY_APARTMENT_TYPE_IDX, &self.apartment_type_idx)?;
        npz.add_array(KEY_AREA, &self.area)?;
        npz.add_array(KEY_DOOR_REL_X, &self.door_rel_x)?;
        npz.add_array(KEY_DOOR_REL_Y, &self.door_rel_y)?;
        npz.add_array(KEY_APARTMENT_SEEDS, &self.apartment_seeds)?;
        npz.finish()?;
        log::info!("wrote {} rooms to {}", self.len(), path.display());
        Ok(())
    }

    /// Archives predating apartment types read back with every
    /// `apartment_type_idx` set to -1.
    pub fn read_npz(path: &Path) -> Result<Self> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let names = npz.names()?;
        let images: Array4<u8> = require(read_array(&mut npz, &names, KEY_IMAGES)?, KEY_IMAGES)?;
        let scores: Array1<f32> = require(read_array(&mut npz, &names, KEY_SCORES)?, KEY_SCORES)?;
        let n = scores.len();
        let apartment_type_idx = match read_array(&mut npz, &names, KEY_APARTMENT_TYPE_IDX)? {
            Some(a) => a,
            None => {
                log::warn!("{} has no {KEY_APARTMENT_TYPE_IDX}; filling with -1", path.display());
                Array1::from_elem(n, MISSING)
            }
        };
        let arrays = Self {
            images,
            scores,
            room_type_idx: require(read_array(&mut npz, &names, KEY_ROOM_TYPE_IDX)?, KEY_ROOM_TYPE_IDX)?,
            apartment_type_idx,
            area: require(read_array(&mut npz, &names, KEY_AREA)?, KEY_AREA)?,
            door_rel_x: require(read_array(&mut npz, &names, KEY_DOOR_REL_X)?, KEY_DOOR_REL_X)?,
            door_rel_y: require(read_array(&mut npz, &names, KEY_DOOR_REL_Y)?, KEY_DOOR_REL_Y)?,
            apartment_seeds: require(
                read_array(&mut npz, &names, KEY_APARTMENT_SEEDS)?,
                KEY_APARTMENT_SEEDS,
            )?,
        };
        arrays.check_lengths()?;
        Ok(arrays)
    }

    fn check_lengths(&self) -> Result<()> {
        let n = self.len();
        let lengths = [
            (KEY_IMAGES, self.images.len_of(ndarray::Axis(0))),
            (KEY_ROOM_TYPE_IDX, self.room_type_idx.len()),
            (KEY_APARTMENT_TYPE_IDX, self.apartment_type_idx.len()),
            (KEY_AREA, self.area.len()),
            (KEY_DOOR_REL_X, self.door_rel_x.len()),
            (KEY_DOOR_REL_Y, self.door_rel_y.len()),
            (KEY_APARTMENT_SEEDS, self.apartment_seeds.len()),
        ];
        for (key, len) in lengths {
            if len != n {
                return Err(SurrogateError::Archive(format!(
                    "'{key}' has {len} entries, '{KEY_SCORES}' has {n}"
                )));
            }
        }
        if self.images.shape()[1..] != [CHANNELS, IMG_SIZE, IMG_SIZE] {
            return Err(SurrogateError::Archive(format!(
                "images have shape {:?}",
                self.images.shape()
            )));
        }
        Ok(())
    }
}

/// One entry of a room fixture file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    #[serde(default)]
    pub name: Option<String>,
    pub polygon: Vec<[f64; 2]>,
    pub door: [f64; 2],
    pub room_type: String,
    #[serde(default)]
    pub apartment_type: Option<String>,
    #[serde(default, alias = "expected_score")]
    pub score: Option<f64>,
    #[serde(default)]
    pub apartment_seed: Option<i64>,
}

impl RoomRecord {
    pub fn display_name(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("room {index}"))
    }

    pub fn to_room(&self) -> Result<Room> {
        let room_type: RoomType = self.room_type.parse()?;
        let mut room = Room::new(&self.polygon, self.door, room_type)?;
        if let Some(label) = &self.apartment_type {
            room = room.with_apartment_type(label.parse::<ApartmentType>()?);
        }
        if let Some(score) = self.score {
            room = room.with_score(score);
        }
        if let Some(seed) = self.apartment_seed {
            room = room.with_apartment_seed(seed);
        }
        Ok(room)
    }

    pub fn request(&self) -> ScoreRequest<'_> {
        ScoreRequest {
            polygon: &self.polygon,
            door: self.door,
            room_type: &self.room_type,
            apartment_type: self.apartment_type.as_deref(),
            checkpoint: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordFile {
    List(Vec<RoomRecord>),
    Wrapped { rooms: Vec<RoomRecord> },
}

/// Reads a JSON list of records, bare or under a top-level `rooms` key.
pub fn load_room_records(path: &Path) -> anyhow::Result<Vec<RoomRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: RecordFile =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(match file {
        RecordFile::List(records) => records,
        RecordFile::Wrapped { rooms } => rooms,
    })
}
