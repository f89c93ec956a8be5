//! World-frame rotation of sample batches.
//!
//! Raw accelerometer samples are device-relative. Rotating them into a frame
//! whose Z axis is the measured gravity direction separates vertical from
//! horizontal motion regardless of how the phone is carried.
//!
//! Compass data is not available, so the horizontal reference that usually
//! comes from magnetic north is derived from gravity itself: take the device
//! axis on which normalized gravity is smallest, and remove its projection
//! onto gravity. The result is a unit vector orthogonal to gravity.

use crate::stats::{dot, magnitude, normalize};
use crate::types::{Vec3, AXES, STANDARD_GRAVITY};

/// Row-major 3×3 matrix.
pub type Matrix3 = [[f64; AXES]; AXES];

/// Gravity vectors shorter than this are treated as free fall.
/// Matches the 1% of g² threshold used by Android's `getRotationMatrix`.
const MIN_GRAVITY_SQUARED: f64 = 0.01 * STANDARD_GRAVITY * STANDARD_GRAVITY;

/// Cross-product norms below this mean the frame cannot be built.
const MIN_HORIZONTAL_NORM: f64 = 0.1;

/// Derive the horizontal reference vector for a gravity vector.
///
/// Returns `None` if gravity is degenerate.
pub fn horizontal_reference(gravity: &[f64; AXES]) -> Option<[f64; AXES]> {
    let mut g = *gravity;
    if magnitude(&g) == 0.0 || !g.iter().all(|v| v.is_finite()) {
        return None;
    }
    normalize(&mut g);

    let mut axis = 0;
    for i in 1..AXES {
        if g[i] < g[axis] {
            axis = i;
        }
    }

    project_out(axis, &g).or_else(|| {
        // Gravity lies on the most negative axis (phone face down); use the
        // axis least aligned with gravity instead.
        let mut least = 0;
        for i in 1..AXES {
            if g[i].abs() < g[least].abs() {
                least = i;
            }
        }
        project_out(least, &g)
    })
}

fn project_out(axis: usize, unit_gravity: &[f64; AXES]) -> Option<[f64; AXES]> {
    let mut h = [0.0; AXES];
    h[axis] = 1.0;
    let along = dot(&h, unit_gravity);
    for i in 0..AXES {
        h[i] -= along * unit_gravity[i];
    }
    if magnitude(&h) < MIN_HORIZONTAL_NORM {
        return None;
    }
    normalize(&mut h);
    Some(h)
}

fn cross(a: &[f64; AXES], b: &[f64; AXES]) -> [f64; AXES] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Build the device-to-world rotation matrix for a gravity vector.
///
/// Rows are (east-like, north-like, up) in the convention of a
/// gravity + geomagnetic alignment, with the derived horizontal reference
/// standing in for the geomagnetic vector.
pub fn rotation_matrix(gravity: &[f64; AXES]) -> Option<Matrix3> {
    let norm_sq = dot(gravity, gravity);
    if !norm_sq.is_finite() || norm_sq < MIN_GRAVITY_SQUARED {
        return None;
    }
    let reference = horizontal_reference(gravity)?;

    let mut up = *gravity;
    normalize(&mut up);

    let mut east = cross(&reference, &up);
    if magnitude(&east) < MIN_HORIZONTAL_NORM {
        return None;
    }
    normalize(&mut east);
    let north = cross(&up, &east);

    Some([east, north, up])
}

/// Apply a rotation matrix to one sample.
pub fn apply(matrix: &Matrix3, sample: &Vec3) -> Vec3 {
    let s = [sample[0] as f64, sample[1] as f64, sample[2] as f64];
    [
        dot(&matrix[0], &s) as f32,
        dot(&matrix[1], &s) as f32,
        dot(&matrix[2], &s) as f32,
    ]
}

/// Rotate the first `count` samples into the world frame defined by `gravity`.
///
/// Returns false and leaves the samples untouched if the rotation cannot be
/// derived (near-zero or non-finite gravity). The caller skips
/// classification for that batch and keeps sampling.
pub fn rotate(gravity: &[f64; AXES], samples: &mut [Vec3], count: usize) -> bool {
    let matrix = match rotation_matrix(gravity) {
        Some(m) => m,
        None => return false,
    };
    let count = count.min(samples.len());
    for sample in samples[..count].iter_mut() {
        *sample = apply(&matrix, sample);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mag(v: &Vec3) -> f64 {
        let d = [v[0] as f64, v[1] as f64, v[2] as f64];
        magnitude(&d)
    }

    fn test_samples() -> Vec<Vec3> {
        (0..64)
            .map(|i| {
                let t = i as f32 * 0.37;
                [t.sin() * 3.0, t.cos() * 1.5 - 0.4, 9.81 + (t * 2.0).sin()]
            })
            .collect()
    }

    #[test]
    fn test_rotation_preserves_magnitude() {
        let gravities = [
            [0.0, 0.0, 9.81],
            [9.81, 0.0, 0.0],
            [0.0, -9.81, 0.0],
            [3.0, 4.0, 8.0],
            [-2.0, 6.5, -7.1],
            [0.0, 0.0, -9.81],
        ];
        for g in gravities {
            let original = test_samples();
            let mut rotated = original.clone();
            assert!(rotate(&g, &mut rotated, original.len()), "gravity {:?}", g);
            for (a, b) in original.iter().zip(&rotated) {
                assert!((mag(a) - mag(b)).abs() < 1e-4, "gravity {:?}", g);
            }
        }
    }

    #[test]
    fn test_gravity_maps_to_vertical_axis() {
        let g = [3.0, 4.0, 8.0];
        let m = rotation_matrix(&g).unwrap();
        let rotated = apply(&m, &[3.0, 4.0, 8.0]);
        let norm = magnitude(&g);
        assert!(rotated[0].abs() < 1e-4);
        assert!(rotated[1].abs() < 1e-4);
        assert!((rotated[2] as f64 - norm).abs() < 1e-4);
    }

    #[test]
    fn test_matrix_is_orthonormal() {
        let m = rotation_matrix(&[1.0, -2.0, 9.5]).unwrap();
        for i in 0..3 {
            assert!((magnitude(&m[i]) - 1.0).abs() < 1e-9);
            for j in (i + 1)..3 {
                assert!(dot(&m[i], &m[j]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_horizontal_reference_orthogonal_to_gravity() {
        let g = [2.0, -5.0, 7.0];
        let h = horizontal_reference(&g).unwrap();
        let mut unit = g;
        normalize(&mut unit);
        assert!(dot(&h, &unit).abs() < 1e-9);
        assert!((magnitude(&h) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_gravity_leaves_samples_unchanged() {
        let original = test_samples();
        let mut samples = original.clone();
        assert!(!rotate(&[0.0, 0.0, 0.0], &mut samples, original.len()));
        assert_eq!(samples, original);
    }

    #[test]
    fn test_free_fall_and_nan_rejected() {
        let mut samples = test_samples();
        assert!(!rotate(&[0.1, 0.1, 0.1], &mut samples, 4));
        assert!(!rotate(&[f64::NAN, 0.0, 9.81], &mut samples, 4));
    }

    #[test]
    fn test_partial_count() {
        let original = test_samples();
        let mut samples = original.clone();
        assert!(rotate(&[9.81, 0.0, 0.0], &mut samples, 10));
        assert_ne!(samples[0], original[0]);
        assert_eq!(samples[10..], original[10..]);
    }
}
