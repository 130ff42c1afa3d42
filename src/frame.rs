//! Meter-space to pixel-space similarity transform.
//!
//! The longest bounding-box side is scaled to [`FIT_SIZE`] pixels, the shape
//! is centred in the [`IMG_SIZE`]² canvas and the vertical axis is flipped so
//! that row 0 is the top of the image. The polygon and the door must go
//! through the same [`PixelFrame`]; the frame is only obtainable from
//! [`encode_frame`] so call sites cannot compute their own.

use nalgebra::{Matrix3, Vector2};

use crate::error::Result;
use crate::room::{close_ring, validate_ring};

/// Output image side in pixels.
pub const IMG_SIZE: usize = 64;
/// Pixels spanned by the longest polygon side (2 pixel margin on each side).
pub const FIT_SIZE: f64 = 60.0;
/// Bounding boxes whose longest side is below this are treated as a point.
pub const DEGENERATE_EXTENT: f64 = 1e-6;

const CENTER: f64 = IMG_SIZE as f64 / 2.0;

#[inline]
fn flip_y(y: f64) -> f64 {
    (IMG_SIZE as f64 - 1.0) - y
}

/// Scale and pre-flip offset shared by every point of one room.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PixelFrame {
    scale: f64,
    offset: Vector2<f64>,
}

impl PixelFrame {
    /// Meters to pixels.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Additive offset applied after scaling and before the y-flip.
    pub fn offset(&self) -> Vector2<f64> {
        self.offset
    }

    /// Maps a single meter-space point (typically the door) into pixels.
    pub fn point_to_pixel(&self, p: [f64; 2]) -> [f64; 2] {
        let x = p[0] * self.scale + self.offset.x;
        let y = p[1] * self.scale + self.offset.y;
        [x, flip_y(y)]
    }

    /// Homogeneous form of [`PixelFrame::point_to_pixel`], flip included.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.scale,
            0.0,
            self.offset.x,
            0.0,
            -self.scale,
            flip_y(self.offset.y),
            0.0,
            0.0,
            1.0,
        )
    }
}

/// Polygon in pixel coordinates (closed ring) plus the frame that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedPolygon {
    pub pixels: Vec<[f64; 2]>,
    pub frame: PixelFrame,
}

impl EncodedPolygon {
    /// Maps the door (or any other point) through this polygon's frame.
    pub fn point_to_pixel(&self, p: [f64; 2]) -> [f64; 2] {
        self.frame.point_to_pixel(p)
    }
}

fn bounding_box(vtx2xy: &[[f64; 2]]) -> (Vector2<f64>, Vector2<f64>) {
    let mut min = Vector2::new(f64::INFINITY, f64::INFINITY);
    let mut max = Vector2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in vtx2xy {
        min.x = min.x.min(p[0]);
        min.y = min.y.min(p[1]);
        max.x = max.x.max(p[0]);
        max.y = max.y.max(p[1]);
    }
    (min, max)
}

/// Transforms a ring from meters into the pixel frame. An open ring is
/// closed first.
pub fn encode_frame(polygon: &[[f64; 2]]) -> Result<EncodedPolygon> {
    let ring = close_ring(polygon);
    validate_ring(&ring)?;
    let vtx2xy = &ring[..ring.len() - 1];
    let (min, max) = bounding_box(vtx2xy);
    let extent = max - min;
    let longest_side = extent.x.max(extent.y);

    let (mut pixels, frame) = if longest_side < DEGENERATE_EXTENT {
        let frame = PixelFrame {
            scale: 1.0,
            offset: Vector2::new(CENTER, CENTER),
        };
        (vec![[CENTER, CENTER]; vtx2xy.len()], frame)
    } else {
        let scale = FIT_SIZE / longest_side;
        let padding = (Vector2::repeat(IMG_SIZE as f64) - extent * scale) / 2.0;
        // translate-then-scale for vertices; the door uses the folded offset
        let pixels = vtx2xy
            .iter()
            .map(|p| {
                [
                    (p[0] - min.x) * scale + padding.x,
                    (p[1] - min.y) * scale + padding.y,
                ]
            })
            .collect();
        let frame = PixelFrame {
            scale,
            offset: -min * scale + padding,
        };
        (pixels, frame)
    };

    for p in pixels.iter_mut() {
        p[1] = flip_y(p[1]);
    }
    pixels.push(pixels[0]);
    Ok(EncodedPolygon { pixels, frame })
}
