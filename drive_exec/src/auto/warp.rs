//! Perspective warp from the rover camera onto a top-down grid.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use ndarray::{Array2, Array3, ArrayView3};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A planar homography mapping `(x, y)` pixel coordinates from one image into another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Homography(Matrix3<f64>);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Homography {
    /// Solve for the homography taking each of the `from` points onto the matching `to` point.
    ///
    /// Returns `None` if the points are degenerate (e.g. coincident).
    pub fn from_points(from: &[[f64; 2]; 4], to: &[[f64; 2]; 4]) -> Option<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for (i, (f, t)) in from.iter().zip(to.iter()).enumerate() {
            let (x, y) = (f[0], f[1]);
            let (u, v) = (t[0], t[1]);

            let r = 2 * i;
            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -u * x;
            a[(r, 7)] = -u * y;
            b[r] = u;

            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -v * x;
            a[(r + 1, 7)] = -v * y;
            b[r + 1] = v;
        }

        let h = a.lu().solve(&b)?;

        if h.iter().any(|v| !v.is_finite()) {
            return None
        }

        Some(Self(Matrix3::new(
            h[0], h[1], h[2],
            h[3], h[4], h[5],
            h[6], h[7], 1.0
        )))
    }

    /// Map a single point, returning `None` if it lands at infinity.
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.0 * Vector3::new(x, y, 1.0);

        if p.z.abs() < f64::EPSILON {
            return None
        }

        Some((p.x / p.z, p.y / p.z))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Warp `image` into an image of the same size using nearest-neighbour sampling.
///
/// `dst_to_src` maps output pixel coordinates back into the input image. The returned mask is
/// true where the output pixel was sampled from inside the input.
pub(super) fn warp(image: ArrayView3<u8>, dst_to_src: &Homography) -> (Array3<u8>, Array2<bool>) {
    let (rows, cols, channels) = image.dim();

    let mut warped = Array3::<u8>::zeros((rows, cols, channels));
    let mut in_view = Array2::from_elem((rows, cols), false);

    for r in 0..rows {
        for c in 0..cols {
            let (x, y) = match dst_to_src.apply(c as f64, r as f64) {
                Some(p) => p,
                None => continue
            };

            let (sx, sy) = (x.round(), y.round());
            if sx < 0.0 || sy < 0.0 || sx >= cols as f64 || sy >= rows as f64 {
                continue
            }

            let (sx, sy) = (sx as usize, sy as usize);
            for ch in 0..channels {
                warped[(r, c, ch)] = image[(sy, sx, ch)];
            }
            in_view[(r, c)] = true;
        }
    }

    (warped, in_view)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const SQUARE: [[f64; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

    fn assert_close(a: (f64, f64), b: (f64, f64)) {
        assert!((a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_homography_maps_points() {
        let to = [[10.0, 10.0], [30.0, 12.0], [28.0, 40.0], [8.0, 35.0]];
        let h = Homography::from_points(&SQUARE, &to).unwrap();

        for (f, t) in SQUARE.iter().zip(to.iter()) {
            assert_close(h.apply(f[0], f[1]).unwrap(), (t[0], t[1]));
        }
    }

    #[test]
    fn test_degenerate_points() {
        let coincident = [[2.0, 3.0]; 4];
        assert!(Homography::from_points(&coincident, &SQUARE).is_none());
    }

    #[test]
    fn test_identity_warp() {
        let image = Array3::from_shape_fn((4, 5, 3), |(r, c, ch)| (r * 20 + c * 3 + ch) as u8);
        let h = Homography::from_points(&SQUARE, &SQUARE).unwrap();

        let (warped, in_view) = warp(image.view(), &h);
        assert_eq!(warped, image);
        assert!(in_view.iter().all(|&v| v));
    }
}
