//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face so its five landmarks land on the InsightFace
//! reference template, scaled to the requested square output size.

use crate::types::Landmarks;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks, defined on a 112×112 canvas.
const REFERENCE_LANDMARKS_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const REFERENCE_CANVAS: f32 = 112.0;

/// Square side of the aligned crop handed to the stylizer trainer.
pub const DEFAULT_ALIGNED_SIZE: u32 = 256;

/// 2×3 similarity matrix `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub type SimilarityMatrix = [f32; 6];

/// Reference template scaled from the 112×112 canvas to `size × size`.
pub fn reference_landmarks(size: u32) -> Landmarks {
    let s = size as f32 / REFERENCE_CANVAS;
    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * s, y * s))
}

/// Least-squares similarity transform mapping `src` onto `dst`.
///
/// Each point pair contributes two rows to the system
/// `A * [a, b, tx, ty]^T = B`:
///   sx * a - sy * b + tx = dx
///   sy * a + sx * b + ty = dy
pub fn estimate_similarity_transform(src: &Landmarks, dst: &Landmarks) -> SimilarityMatrix {
    let mut normal = [[0.0f32; 5]; 4]; // [AᵀA | Aᵀb]

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
        for (row, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    normal[j][k] += row[j] * row[k];
                }
                normal[j][4] += row[j] * rhs;
            }
        }
    }

    let [a, b, tx, ty] = solve_normal_equations(normal);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting on an augmented 4×5 matrix.
///
/// A singular system yields the unit scale `[1, 0, 0, 0]`.
#[allow(clippy::needless_range_loop)]
fn solve_normal_equations(mut m: [[f32; 5]; 4]) -> [f32; 4] {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (m[i][4] - tail) / m[i][i];
    }
    x
}

/// Warp `image` through `matrix` into a `size × size` RGB crop.
///
/// Each output pixel is mapped back through the inverse similarity and
/// sampled bilinearly. Out-of-bounds samples contribute black.
pub fn warp_affine(image: &RgbImage, matrix: &SimilarityMatrix, size: u32) -> RgbImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Inverse of [[a, -b], [b, a]] is [[a, b], [-b, a]] / (a² + b²).
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(size, size);
    }
    let ia = a / det;
    let ib = b / det;

    let (w, h) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.get_pixel(x as u32, y as u32).0[c] as f32
        } else {
            0.0
        }
    };

    RgbImage::from_fn(size, size, |ox, oy| {
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
            let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            *out = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}

/// Align a face to a canonical `size × size` crop from its five landmarks.
pub fn align_face(image: &RgbImage, landmarks: &Landmarks, size: u32) -> RgbImage {
    let matrix = estimate_similarity_transform(landmarks, &reference_landmarks(size));
    warp_affine(image, &matrix, size)
}
