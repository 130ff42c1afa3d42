#![cfg(feature = "python-bindings")]

use std::path::PathBuf;

use pyo3::exceptions::{PyFileNotFoundError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;

use crate::error::SurrogateError;
use crate::predict::default_service;
use crate::room::{ApartmentType, Room, RoomType};

pub fn register(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(py_predict_score, m)?)?;
    m.add_function(wrap_pyfunction!(py_rasterize, m)?)?;
    m.add_function(wrap_pyfunction!(py_extract_features, m)?)?;
    m.add_function(wrap_pyfunction!(py_clear_model_cache, m)?)?;
    m.add_function(wrap_pyfunction!(py_model_cache_size, m)?)?;
    m.add("IMG_SIZE", crate::frame::IMG_SIZE)?;
    m.add(
        "ROOM_TYPES",
        RoomType::ALL.iter().map(|t| t.label()).collect::<Vec<_>>(),
    )?;
    m.add(
        "APARTMENT_TYPES",
        ApartmentType::ALL.iter().map(|t| t.label()).collect::<Vec<_>>(),
    )?;
    Ok(())
}

#[pyfunction(name = "predict_score", signature = (polygon, door, room_type, apartment_type=None, model_path=None))]
fn py_predict_score(
    py: Python<'_>,
    polygon: Vec<[f64; 2]>,
    door: [f64; 2],
    room_type: String,
    apartment_type: Option<String>,
    model_path: Option<PathBuf>,
) -> PyResult<f64> {
    py.allow_threads(|| {
        crate::predict::predict_score(
            &polygon,
            door,
            &room_type,
            apartment_type.as_deref(),
            model_path.as_deref(),
        )
    })
    .map_err(surrogate_err)
}

/// (3, 64, 64) uint8 image as raw bytes in channel-major order.
#[pyfunction(name = "rasterize")]
fn py_rasterize<'py>(py: Python<'py>, polygon: Vec<[f64; 2]>, door: [f64; 2]) -> PyResult<Bound<'py, PyBytes>> {
    let ring = crate::room::close_ring(&polygon);
    let image = crate::raster::rasterize(&ring, door).map_err(surrogate_err)?;
    Ok(PyBytes::new_bound(py, image.as_bytes()))
}

#[pyfunction(name = "extract_features", signature = (polygon, door, room_type, apartment_type=None))]
fn py_extract_features(
    polygon: Vec<[f64; 2]>,
    door: [f64; 2],
    room_type: String,
    apartment_type: Option<String>,
) -> PyResult<Vec<f32>> {
    let room_type: RoomType = room_type.parse().map_err(surrogate_err)?;
    let mut room = Room::new(&polygon, door, room_type).map_err(surrogate_err)?;
    if let Some(label) = apartment_type {
        room = room.with_apartment_type(label.parse().map_err(surrogate_err)?);
    }
    Ok(crate::features::extract_features(&room).to_vec())
}

#[pyfunction(name = "clear_model_cache")]
fn py_clear_model_cache() {
    default_service().cache().clear();
}

#[pyfunction(name = "model_cache_size")]
fn py_model_cache_size() -> usize {
    default_service().cache().len()
}

fn surrogate_err(err: SurrogateError) -> PyErr {
    if err.is_input_error() {
        PyValueError::new_err(err.to_string())
    } else if matches!(err, SurrogateError::CheckpointNotFound { .. }) {
        PyFileNotFoundError::new_err(err.to_string())
    } else {
        PyRuntimeError::new_err(err.to_string())
    }
}
