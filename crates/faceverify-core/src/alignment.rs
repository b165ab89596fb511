//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face so its five landmarks land on the InsightFace
//! reference positions, scaled to the recognizer's input size.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 crop.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const REFERENCE_SIZE: f32 = 112.0;

/// Similarity transform `dst = [[a, -b], [b, a]] * src + [tx, ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst` points.
    ///
    /// Closed form on centred coordinates; a degenerate source (all points
    /// coincide) yields the identity.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut energy = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            energy += sx * sx + sy * sy;
        }

        if energy < 1e-12 {
            return Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };
        }

        let a = dot / energy;
        let b = cross / energy;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    /// Map a destination point back into source coordinates.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Bilinear sample with black outside the image.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let p = image.get_pixel(px as u32, py as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr) = (px(x0, y0), px(x0 + 1, y0));
    let (bl, br) = (px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Reference landmark positions for a square crop of `size` pixels.
pub fn reference_landmarks(size: u32) -> [(f32, f32); 5] {
    let ratio = size as f32 / REFERENCE_SIZE;
    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * ratio, y * ratio))
}

/// Align a face to a canonical `size`×`size` crop using its five landmarks.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5], size: u32) -> RgbImage {
    let transform = Similarity::fit(landmarks, &reference_landmarks(size));
    RgbImage::from_fn(size, size, |ox, oy| match transform.invert_point(ox as f32, oy as f32) {
        Some((sx, sy)) => sample(image, sx, sy),
        None => Rgb([0, 0, 0]),
    })
}

/// Crop `region` (clamped to the image) and resize it to `size`×`size`.
///
/// Used when a detection carries no landmarks, and with the full-frame
/// region when no localization is performed.
pub fn crop_region(image: &RgbImage, region: &BoundingBox, size: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let left = region.x.max(0.0).floor().min(w.saturating_sub(1) as f32) as u32;
    let top = region.y.max(0.0).floor().min(h.saturating_sub(1) as f32) as u32;
    let right = (region.x + region.width).ceil().clamp(left as f32 + 1.0, w as f32) as u32;
    let bottom = (region.y + region.height).ceil().clamp(top as f32 + 1.0, h as f32) as u32;

    let cropped = imageops::crop_imm(image, left, top, right - left, bottom - top).to_image();
    imageops::resize(&cropped, size, size, FilterType::Triangle)
}
