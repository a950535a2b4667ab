//! Face alignment via 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace reference layout and
//! warps the face into the 112×112 RGB crop ArcFace expects.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Least-squares similarity transform (scale, rotation, translation) taking
/// `src` onto `dst`.
///
/// Returns `[a, -b, tx, b, a, ty]`, i.e. the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
/// Solved in closed form on the centred point sets. Coincident source points
/// give an identity matrix.
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    let n = src.len() as f32;
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (src_mx, src_my) = mean(src);
    let (dst_mx, dst_my) = mean(dst);

    let mut spread = 0.0f32;
    let mut cos_term = 0.0f32;
    let mut sin_term = 0.0f32;

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - src_mx, sy - src_my);
        let (dx, dy) = (dx - dst_mx, dy - dst_my);
        spread += sx * sx + sy * sy;
        cos_term += sx * dx + sy * dy;
        sin_term += sx * dy - sy * dx;
    }

    if spread < 1e-12 {
        return [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    }

    let a = cos_term / spread;
    let b = sin_term / spread;
    let tx = dst_mx - (a * src_mx - b * src_my);
    let ty = dst_my - (b * src_mx + a * src_my);

    [a, -b, tx, b, a, ty]
}

/// Bilinear sample of one channel; outside the image reads as 0.
fn sample(image: &RgbImage, x: i64, y: i64, channel: usize) -> f32 {
    if x < 0 || y < 0 || x >= image.width() as i64 || y >= image.height() as i64 {
        return 0.0;
    }
    image.get_pixel(x as u32, y as u32)[channel] as f32
}

/// Warp `image` through the similarity `matrix` into an `out_size` square.
///
/// Each output pixel is mapped back through the inverse transform and
/// bilinearly interpolated. Out-of-bounds pixels are black.
fn warp_affine(image: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, b) = (matrix[0], matrix[3]);
    let (tx, ty) = (matrix[2], matrix[5]);

    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let ia = a / det;
    let ib = b / det;

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let mut px = [0u8; 3];
        for (c, out) in px.iter_mut().enumerate() {
            let val = sample(image, x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(image, x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(image, x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(image, x0 + 1, y0 + 1, c) * fx * fy;
            *out = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}

/// Align a detected face to a canonical 112×112 RGB crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(image, &matrix, ALIGNED_SIZE)
}
