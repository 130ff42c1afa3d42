//! Three-channel room rasterization.
//!
//! * channel 0: interior mask, {0, 255}
//! * channel 1: wall edges, {0, 255}
//! * channel 2: door gaussian blob, 0..=255, peak at the door pixel
//!
//! Mask and edges are drawn with `imageproc` on integer vertices, the blob is
//! plain f64 arithmetic, so the batch precompute and single-room inference
//! produce the same bytes for the same ring.

use std::fmt;

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;

use crate::error::Result;
use crate::frame::{encode_frame, IMG_SIZE};
use crate::room::Room;

pub const CHANNELS: usize = 3;
/// Door blob standard deviation in pixels.
pub const DOOR_SIGMA: f64 = 2.0;

const PLANE: usize = IMG_SIZE * IMG_SIZE;
const INK: Luma<u8> = Luma([255]);

/// Immutable (C, H, W) = (3, 64, 64) image.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    data: Vec<u8>,
}

impl RasterImage {
    pub const LEN: usize = CHANNELS * PLANE;

    fn from_planes(mask: Vec<u8>, edges: Vec<u8>, door: Vec<u8>) -> Self {
        let mut data = Vec::with_capacity(Self::LEN);
        data.extend_from_slice(&mask);
        data.extend_from_slice(&edges);
        data.extend_from_slice(&door);
        Self { data }
    }

    /// Rebuilds an image from `LEN` bytes in (C, H, W) order.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == Self::LEN).then(|| Self {
            data: bytes.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn channel(&self, c: usize) -> &[u8] {
        &self.data[c * PLANE..(c + 1) * PLANE]
    }

    pub fn get(&self, c: usize, row: usize, col: usize) -> u8 {
        self.data[c * PLANE + row * IMG_SIZE + col]
    }

    /// Pixel values scaled to [0, 1] as the model consumes them.
    pub fn to_f32_normalized(&self) -> Vec<f32> {
        self.data.iter().map(|&v| v as f32 / 255.0).collect()
    }

    /// RGB preview: red = interior, green = edges, blue = door.
    pub fn to_rgb_image(&self) -> image::RgbImage {
        image::RgbImage::from_fn(IMG_SIZE as u32, IMG_SIZE as u32, |x, y| {
            let (row, col) = (y as usize, x as usize);
            image::Rgb([self.get(0, row, col), self.get(1, row, col), self.get(2, row, col)])
        })
    }
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lit = |c: usize| self.channel(c).iter().filter(|&&v| v > 0).count();
        f.debug_struct("RasterImage")
            .field("mask_px", &lit(0))
            .field("edge_px", &lit(1))
            .field("door_px", &lit(2))
            .finish()
    }
}

fn canvas() -> GrayImage {
    GrayImage::new(IMG_SIZE as u32, IMG_SIZE as u32)
}

/// 1-pixel segments between consecutive vertices. Vertices are inked
/// explicitly so a ring collapsed onto one pixel still leaves a mark.
fn stroke(canvas: &mut GrayImage, ring: &[Point<i32>]) {
    for pair in ring.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        draw_line_segment_mut(canvas, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), INK);
    }
    let side = IMG_SIZE as i32;
    for p in ring {
        if (0..side).contains(&p.x) && (0..side).contains(&p.y) {
            canvas.put_pixel(p.x as u32, p.y as u32, INK);
        }
    }
}

/// Scanline polygon fill, then the outline so boundary pixels always belong
/// to the interior.
fn fill(canvas: &mut GrayImage, ring: &[Point<i32>]) {
    // the fill primitive takes an open ring whose ends differ
    let mut open = &ring[..ring.len() - 1];
    while open.len() > 1 && open[0] == open[open.len() - 1] {
        open = &open[..open.len() - 1];
    }
    if open.len() >= 3 {
        draw_polygon_mut(canvas, open, INK);
    }
    stroke(canvas, ring);
}

/// Gaussian door intensity; truncated to u8 like the archived training data.
fn door_blob(center: [f64; 2]) -> Vec<u8> {
    let two_sigma_sq = 2.0 * DOOR_SIGMA * DOOR_SIGMA;
    let mut plane = vec![0u8; PLANE];
    for row in 0..IMG_SIZE {
        for col in 0..IMG_SIZE {
            let dx = col as f64 - center[0];
            let dy = row as f64 - center[1];
            let gauss = (-(dx * dx + dy * dy) / two_sigma_sq).exp();
            plane[row * IMG_SIZE + col] = (gauss * 255.0).clamp(0.0, 255.0) as u8;
        }
    }
    plane
}

/// Rasterizes a ring (closed or open) and a door, both in meters.
pub fn rasterize(polygon: &[[f64; 2]], door: [f64; 2]) -> Result<RasterImage> {
    let encoded = encode_frame(polygon)?;
    let door_px = encoded.point_to_pixel(door);

    let vtx2pix: Vec<Point<i32>> = encoded
        .pixels
        .iter()
        .map(|p| Point::new(p[0].round_ties_even() as i32, p[1].round_ties_even() as i32))
        .collect();

    let mut mask = canvas();
    fill(&mut mask, &vtx2pix);
    let mut edges = canvas();
    stroke(&mut edges, &vtx2pix);
    let door = door_blob(door_px);

    Ok(RasterImage::from_planes(mask.into_raw(), edges.into_raw(), door))
}

pub fn rasterize_room(room: &Room) -> Result<RasterImage> {
    rasterize(&room.polygon, room.door)
}
