//! Room value type and the fixed category vocabularies.
//!
//! Category order is part of the model contract: one-hot layouts and the
//! room-type embedding table are indexed by position, so variants must never
//! be reordered.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SurrogateError};

/// Room categories, in embedding-table order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RoomType {
    Bedroom,
    LivingRoom,
    Bathroom,
    Wc,
    Kitchen,
    Children1,
    Children2,
    Children3,
    Children4,
}

impl RoomType {
    pub const ALL: [RoomType; 9] = [
        RoomType::Bedroom,
        RoomType::LivingRoom,
        RoomType::Bathroom,
        RoomType::Wc,
        RoomType::Kitchen,
        RoomType::Children1,
        RoomType::Children2,
        RoomType::Children3,
        RoomType::Children4,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn label(self) -> &'static str {
        match self {
            RoomType::Bedroom => "Bedroom",
            RoomType::LivingRoom => "Living room",
            RoomType::Bathroom => "Bathroom",
            RoomType::Wc => "WC",
            RoomType::Kitchen => "Kitchen",
            RoomType::Children1 => "Children 1",
            RoomType::Children2 => "Children 2",
            RoomType::Children3 => "Children 3",
            RoomType::Children4 => "Children 4",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    fn known_labels() -> String {
        Self::ALL.iter().map(|t| t.label()).collect::<Vec<_>>().join(", ")
    }
}

impl FromStr for RoomType {
    type Err = SurrogateError;

    fn from_str(label: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.label() == label)
            .ok_or_else(|| SurrogateError::UnknownRoomType {
                label: label.to_string(),
                known: Self::known_labels(),
            })
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Apartment categories, in one-hot order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApartmentType {
    StudioBedroom,
    StudioLiving,
    OneBedroom,
    TwoBedroom,
    ThreeBedroom,
    FourBedroom,
    FiveBedroom,
}

impl ApartmentType {
    pub const ALL: [ApartmentType; 7] = [
        ApartmentType::StudioBedroom,
        ApartmentType::StudioLiving,
        ApartmentType::OneBedroom,
        ApartmentType::TwoBedroom,
        ApartmentType::ThreeBedroom,
        ApartmentType::FourBedroom,
        ApartmentType::FiveBedroom,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn label(self) -> &'static str {
        match self {
            ApartmentType::StudioBedroom => "Studio (bedroom)",
            ApartmentType::StudioLiving => "Studio (living)",
            ApartmentType::OneBedroom => "1-Bedroom",
            ApartmentType::TwoBedroom => "2-Bedroom",
            ApartmentType::ThreeBedroom => "3-Bedroom",
            ApartmentType::FourBedroom => "4-Bedroom",
            ApartmentType::FiveBedroom => "5-Bedroom",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    fn known_labels() -> String {
        Self::ALL.iter().map(|t| t.label()).collect::<Vec<_>>().join(", ")
    }
}

impl FromStr for ApartmentType {
    type Err = SurrogateError;

    fn from_str(label: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.label() == label)
            .ok_or_else(|| SurrogateError::UnknownApartmentType {
                label: label.to_string(),
                known: Self::known_labels(),
            })
    }
}

impl fmt::Display for ApartmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Same tolerance rule as numpy's `allclose` defaults.
fn nearly_equal(a: [f64; 2], b: [f64; 2]) -> bool {
    const ATOL: f64 = 1e-8;
    const RTOL: f64 = 1e-5;
    (0..2).all(|k| (a[k] - b[k]).abs() <= ATOL + RTOL * b[k].abs())
}

/// Returns the ring closed: the first point is appended when the last one
/// does not already repeat it.
pub fn close_ring(vtx2xy: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut ring = vtx2xy.to_vec();
    if let (Some(&first), Some(&last)) = (vtx2xy.first(), vtx2xy.last()) {
        if vtx2xy.len() == 1 || !nearly_equal(first, last) {
            ring.push(first);
        }
    }
    ring
}

/// Checks that a closed ring has at least three vertices besides the
/// closing repeat. Coincident vertices are allowed; they are degenerate
/// geometry, not malformed input.
pub fn validate_ring(ring: &[[f64; 2]]) -> Result<()> {
    if ring.len() < 4 {
        return Err(SurrogateError::MalformedPolygon(format!(
            "expected at least 3 vertices plus the closing point, got {} points",
            ring.len()
        )));
    }
    if ring.iter().flatten().any(|v| !v.is_finite()) {
        return Err(SurrogateError::MalformedPolygon(
            "polygon contains a non-finite coordinate".to_string(),
        ));
    }
    Ok(())
}

/// One scorable room. `polygon` is always a closed ring in meters.
#[derive(Clone, Debug, PartialEq)]
pub struct Room {
    pub polygon: Vec<[f64; 2]>,
    pub door: [f64; 2],
    pub room_type: RoomType,
    pub score: Option<f64>,
    pub apartment_type: Option<ApartmentType>,
    pub apartment_seed: Option<i64>,
}

impl Room {
    /// Builds an unlabeled room, closing the ring if needed.
    pub fn new(polygon: &[[f64; 2]], door: [f64; 2], room_type: RoomType) -> Result<Self> {
        let polygon = close_ring(polygon);
        validate_ring(&polygon)?;
        if !door.iter().all(|v| v.is_finite()) {
            return Err(SurrogateError::MalformedPolygon(
                "door contains a non-finite coordinate".to_string(),
            ));
        }
        Ok(Self {
            polygon,
            door,
            room_type,
            score: None,
            apartment_type: None,
            apartment_seed: None,
        })
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_apartment_type(mut self, apartment_type: ApartmentType) -> Self {
        self.apartment_type = Some(apartment_type);
        self
    }

    pub fn with_apartment_seed(mut self, seed: i64) -> Self {
        self.apartment_seed = Some(seed);
        self
    }

    /// Distinct vertices, i.e. the ring without its closing repeat.
    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.polygon[..self.polygon.len() - 1]
    }
}
