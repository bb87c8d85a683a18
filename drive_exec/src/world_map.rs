//! # World Map
//!
//! Builds the operator overlay from the accumulated worldmap and the ground truth map, and loads
//! the ground truth asset at startup.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use ndarray::{s, Array3, ArrayView3, Zip};

use comms_if::eqpt::cam::Raster;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Weight of the worldmap in the overlay
const WORLDMAP_WEIGHT: f64 = 1.0;

/// Weight of the ground truth in the overlay
const GROUND_TRUTH_WEIGHT: f64 = 0.4;

/// Channel of the ground truth raster holding the map
const GROUND_TRUTH_CHANNEL: usize = 1;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ComposeError {
    #[error("Rotated worldmap has shape {worldmap:?} but ground truth has shape {ground_truth:?}")]
    ShapeMismatch {
        worldmap: Vec<usize>,
        ground_truth: Vec<usize>
    },

    #[error("Expected 3 channels, found {0}")]
    NotThreeChannel(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum GroundTruthError {
    #[error("Cannot load the ground truth map from {0:?}: {1}")]
    LoadError(PathBuf, image::ImageError),

    #[error("Ground truth map at {0:?} is empty")]
    Empty(PathBuf),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Rotate the first two axes of a raster by 90 degrees counter-clockwise, so that
/// `out[i][j] = in[j][W - 1 - i]`.
pub fn rot90<T>(raster: ArrayView3<T>) -> ArrayView3<T> {
    raster.slice_move(s![.., ..;-1, ..]).permuted_axes([1, 0, 2])
}

/// Combine the worldmap and ground truth into a displayable overlay.
///
/// The worldmap is clipped to `[0, 255]` and rotated into display orientation before being
/// weighted with the ground truth. Neither input is modified.
pub fn compose(worldmap: &Array3<f64>, ground_truth: &Array3<f64>) -> Result<Raster, ComposeError> {
    for a in [worldmap, ground_truth].iter() {
        if a.dim().2 != 3 {
            return Err(ComposeError::NotThreeChannel(a.dim().2))
        }
    }

    let rotated = rot90(worldmap.view());

    if rotated.shape() != ground_truth.shape() {
        return Err(ComposeError::ShapeMismatch {
            worldmap: rotated.shape().to_vec(),
            ground_truth: ground_truth.shape().to_vec()
        })
    }

    let mut overlay = Raster::zeros(ground_truth.raw_dim());

    Zip::from(&mut overlay)
        .and(&rotated)
        .and(ground_truth)
        .for_each(|o, &w, &g| {
            let v = w.max(0.0).min(255.0) * WORLDMAP_WEIGHT + g * GROUND_TRUTH_WEIGHT;
            *o = v.max(0.0).min(255.0) as u8;
        });

    Ok(overlay)
}

/// Load the ground truth map from a grayscale image, placing it in the green channel.
pub fn load_ground_truth<P: AsRef<Path>>(path: P) -> Result<Array3<f64>, GroundTruthError> {
    let path = path.as_ref();

    let gray = image::open(path)
        .map_err(|e| GroundTruthError::LoadError(path.to_path_buf(), e))?
        .to_luma8();

    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(GroundTruthError::Empty(path.to_path_buf()))
    }

    let mut ground_truth = Array3::zeros((height as usize, width as usize, 3));

    for (x, y, p) in gray.enumerate_pixels() {
        ground_truth[(y as usize, x as usize, GROUND_TRUTH_CHANNEL)] = p[0] as f64;
    }

    Ok(ground_truth)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rot90() {
        // 2 rows, 3 columns
        let a = Array3::from_shape_fn((2, 3, 1), |(r, c, _)| (r * 10 + c) as u8);
        let r = rot90(a.view());

        assert_eq!(r.shape(), &[3, 2, 1]);
        for i in 0..3 {
            for j in 0..2 {
                assert_eq!(r[(i, j, 0)], a[(j, 2 - i, 0)]);
            }
        }
    }

    #[test]
    fn test_compose_values() {
        let mut worldmap = Array3::<f64>::zeros((4, 4, 3));
        worldmap[(0, 3, 2)] = 300.0;
        worldmap[(1, 1, 0)] = -20.0;
        worldmap[(2, 0, 2)] = 100.0;
        let ground_truth = Array3::from_elem((4, 4, 3), 100.0);

        let overlay = compose(&worldmap, &ground_truth).unwrap();

        // in[0][3] lands at out[0][0], clipped to 255 before and after weighting
        assert_eq!(overlay[(0, 0, 2)], 255);
        // Negative values clipped to zero
        assert_eq!(overlay[(2, 1, 0)], 40);
        // in[2][0] lands at out[3][2]
        assert_eq!(overlay[(3, 2, 2)], 140);
        assert_eq!(overlay[(3, 3, 1)], 40);
    }

    #[test]
    fn test_compose_is_pure() {
        let worldmap = Array3::from_shape_fn((5, 5, 3), |(r, c, ch)| (r * 50 + c * 7 + ch) as f64);
        let ground_truth = Array3::from_shape_fn((5, 5, 3), |(r, c, _)| (r + c) as f64 * 20.0);
        let (w0, g0) = (worldmap.clone(), ground_truth.clone());

        let first = compose(&worldmap, &ground_truth).unwrap();
        let second = compose(&worldmap, &ground_truth).unwrap();

        assert_eq!(first, second);
        assert_eq!(worldmap, w0);
        assert_eq!(ground_truth, g0);
    }

    #[test]
    fn test_compose_shape_mismatch() {
        let worldmap = Array3::<f64>::zeros((4, 6, 3));
        let ground_truth = Array3::<f64>::zeros((4, 6, 3));

        assert_eq!(
            compose(&worldmap, &ground_truth),
            Err(ComposeError::ShapeMismatch {
                worldmap: vec![6, 4, 3],
                ground_truth: vec![4, 6, 3]
            })
        );

        let ground_truth = Array3::<f64>::zeros((6, 4, 1));
        assert_eq!(compose(&worldmap, &ground_truth), Err(ComposeError::NotThreeChannel(1)));
    }

    #[test]
    fn test_load_ground_truth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map_bw.png");

        let gray = image::GrayImage::from_fn(3, 2, |x, y| image::Luma([(x * 10 + y * 100) as u8]));
        gray.save(&path).unwrap();

        let gt = load_ground_truth(&path).unwrap();
        assert_eq!(gt.shape(), &[2, 3, 3]);
        assert_eq!(gt[(1, 2, 1)], 120.0);
        assert_eq!(gt[(1, 2, 0)], 0.0);
        assert_eq!(gt[(1, 2, 2)], 0.0);

        assert!(load_ground_truth(dir.path().join("missing.png")).is_err());
    }
}
