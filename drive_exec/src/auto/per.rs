//! Threshold perception - finds navigable terrain by colour in a top-down view of the camera
//! frame.
//!
//! General procedure:
//!  - Warp the camera frame onto a top-down grid using four calibrated ground points
//!  - Threshold the warped frame, bright pixels are navigable ground and everything else inside
//!    the camera's field of view is an obstacle
//!  - Convert pixels into rover-centric coordinates, then into polar form for the decision stage
//!  - Rotate and translate the pixels into world cells and accumulate them in the worldmap delta

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use log::trace;
use ndarray::Array3;
use serde::Deserialize;

use util::maths::{cart_to_polar, deg_from_level, rotate_deg};

use super::{Perception, PerceptionInput, PerceptionOutput, PerError, warp::{self, Homography}};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Worldmap channel holding obstacle observations
pub const OBSTACLE_CHANNEL: usize = 0;

/// Worldmap channel holding navigable terrain observations
pub const NAVIGABLE_CHANNEL: usize = 2;

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ThresholdPerception {
    pub params: PerParams,

    /// Side length of the (square) worldmap
    worldmap_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerParams {
    /// Pixels brighter than this in all channels are navigable
    pub rgb_thresh: [u8; 3],

    /// Corners of a 1 m ground square in the camera image, in the order bottom-left,
    /// bottom-right, top-right, top-left.
    ///
    /// Units: pixels (x, y)
    pub src_points: [[f64; 2]; 4],

    /// Half the side length of the ground square in the top-down view.
    ///
    /// Units: pixels
    pub dst_size: f64,

    /// Distance from the bottom of the top-down view to the ground square, accounting for the
    /// ground hidden in front of the rover.
    ///
    /// Units: pixels
    pub bottom_offset: f64,

    /// Number of top-down pixels per worldmap cell
    pub world_scale: f64,

    /// The worldmap is only updated when both pitch and roll are within this of level, as the
    /// perspective calibration is wrong otherwise.
    ///
    /// Units: degrees
    pub max_tilt_deg: f64,

    /// Value added to a worldmap cell for each navigable pixel landing in it
    pub navigable_increment: f64,

    /// Value added to a worldmap cell for each obstacle pixel landing in it
    pub obstacle_increment: f64,
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl ThresholdPerception {
    pub fn new(params: PerParams, worldmap_size: usize) -> Self {
        Self {
            params,
            worldmap_size
        }
    }

    /// Location of the ground square in the top-down view of an image of the given size.
    fn dst_points(&self, rows: usize, cols: usize) -> [[f64; 2]; 4] {
        let (h, w) = (rows as f64, cols as f64);
        let d = self.params.dst_size;
        let bottom = h - self.params.bottom_offset;

        [
            [w / 2.0 - d, bottom],
            [w / 2.0 + d, bottom],
            [w / 2.0 + d, bottom - 2.0 * d],
            [w / 2.0 - d, bottom - 2.0 * d],
        ]
    }

    /// Convert a rover-centric point into a worldmap cell index, clipped to the map.
    fn to_world_cell(&self, x: f64, y: f64, input: &PerceptionInput<'_>) -> (usize, usize) {
        let (x_rot, y_rot) = rotate_deg(x, y, input.pose.yaw_deg);

        let x_world = x_rot / self.params.world_scale + input.pose.position_m.x;
        let y_world = y_rot / self.params.world_scale + input.pose.position_m.y;

        let max = self.worldmap_size.saturating_sub(1) as i64;
        let clip = |v: f64| (v as i64).max(0).min(max) as usize;

        (clip(x_world), clip(y_world))
    }
}

impl Perception for ThresholdPerception {
    fn perceive(&mut self, input: PerceptionInput<'_>) -> Result<PerceptionOutput, PerError> {
        let (rows, cols, channels) = input.image.dim();
        if rows == 0 || cols == 0 || channels < 3 {
            return Err(PerError::ImageIsEmpty)
        }

        // Map from top-down pixels back into the camera frame
        let dst_to_src = Homography::from_points(
            &self.dst_points(rows, cols), 
            &self.params.src_points
        ).ok_or(PerError::DegenerateCalibration)?;

        let (warped, in_view) = warp::warp(input.image.view(), &dst_to_src);

        let update_map = deg_from_level(input.pose.pitch_deg) <= self.params.max_tilt_deg
            && deg_from_level(input.pose.roll_deg) <= self.params.max_tilt_deg;

        let mut vision_image = Array3::<u8>::zeros((rows, cols, 3));
        let mut worldmap_delta = Array3::<f64>::zeros(
            (self.worldmap_size, self.worldmap_size, 3)
        );
        let mut nav_angles = Vec::new();
        let mut nav_dists = Vec::new();

        let thresh = self.params.rgb_thresh;

        for ((r, c), &visible) in in_view.indexed_iter() {
            if !visible {
                continue
            }

            let navigable = (0..3).all(|ch| warped[(r, c, ch)] > thresh[ch]);

            // Rover-centric coordinates, x forward and y to the left
            let x = rows as f64 - r as f64;
            let y = cols as f64 / 2.0 - c as f64;

            let (channel, increment) = if navigable {
                let (dist, angle) = cart_to_polar(x, y);
                nav_dists.push(dist);
                nav_angles.push(angle);
                (NAVIGABLE_CHANNEL, self.params.navigable_increment)
            }
            else {
                (OBSTACLE_CHANNEL, self.params.obstacle_increment)
            };

            vision_image[(r, c, channel)] = 255;

            if update_map {
                let (x_cell, y_cell) = self.to_world_cell(x, y, &input);
                worldmap_delta[(y_cell, x_cell, channel)] += increment;
            }
        }

        trace!(
            "Perception found {} navigable points (map update: {})", 
            nav_angles.len(), 
            update_map
        );

        Ok(PerceptionOutput {
            nav_angles,
            nav_dists,
            vision_image,
            worldmap_delta,
        })
    }
}

impl Default for PerParams {
    fn default() -> Self {
        Self {
            rgb_thresh: [160, 160, 160],
            src_points: [[14.0, 140.0], [301.0, 140.0], [200.0, 96.0], [118.0, 96.0]],
            dst_size: 5.0,
            bottom_offset: 6.0,
            world_scale: 10.0,
            max_tilt_deg: 0.5,
            navigable_increment: 10.0,
            obstacle_increment: 1.0,
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
