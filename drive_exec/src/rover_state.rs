//! # Rover State
//!
//! The single record carried between control loop cycles. It is owned by the control loop, which
//! is the only thing that writes to it. The perception and decision stages see narrow views of it
//! (see [`crate::auto`]) and the loop merges their outputs back in.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Point2;
use ndarray::{Array3, Zip};
use serde::Deserialize;

use comms_if::{eqpt::cam::Raster, sim::Telemetry};

use crate::auto::{DecisionInput, DecisionOutput, PerceptionInput, PerceptionOutput};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Pose of the rover as reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Position in the world frame
    ///
    /// Units: meters
    pub position_m: Point2<f64>,

    /// Units: degrees
    pub yaw_deg: f64,

    /// Units: degrees
    pub pitch_deg: f64,

    /// Units: degrees
    pub roll_deg: f64,
}

/// Limits and set points used by the decision stage. These are loaded once and never change
/// during a run.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DriveLimits {
    /// Throttle applied when accelerating
    pub throttle_set: f64,

    /// Brake applied when braking
    pub brake_set: f64,

    /// Number of navigable terrain points below which the rover stops
    pub stop_forward: usize,

    /// Number of navigable terrain points above which a stopped rover drives forward again
    pub go_forward: usize,

    /// Maximum velocity
    ///
    /// Units: meters/second
    pub max_vel: f64,
}

/// The rover state record.
#[derive(Debug, Clone)]
pub struct RoverState {
    /// Current camera image, `None` before the first frame or after an undecodable one
    pub img: Option<Raster>,

    /// Current pose, `None` before the first telemetry
    pub pose: Option<Pose>,

    /// Current velocity, `None` before the first telemetry
    ///
    /// Units: meters/second
    pub vel: Option<f64>,

    /// Current steering angle
    ///
    /// Units: degrees
    pub steer: f64,

    /// Current throttle value
    pub throttle: f64,

    /// Current brake value
    pub brake: f64,

    /// Angles of navigable terrain points relative to the rover heading
    ///
    /// Units: radians
    pub nav_angles: Vec<f64>,

    /// Distances of navigable terrain points, paired with `nav_angles`
    ///
    /// Units: map cells
    pub nav_dists: Vec<f64>,

    pub mode: NavMode,

    pub limits: DriveLimits,

    /// Debug image produced by perception for display to the operator
    pub vision_image: Raster,

    /// Accumulated occupancy map of all terrain seen this run
    pub worldmap: Array3<f64>,

    /// Static reference map, used for display only
    pub ground_truth: Array3<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Navigation mode, owned by the decision stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavMode {
    Forward,
    Stop,
}

/// Errors raised when merging stage outputs into the state.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StateError {
    #[error("Perception produced {angles} angles but {dists} distances")]
    NavLengthMismatch {
        angles: usize,
        dists: usize
    },

    #[error("Perception vision image has shape {found:?}, expected {expected:?}")]
    VisionShapeMismatch {
        found: Vec<usize>,
        expected: Vec<usize>
    },

    #[error("Perception worldmap delta has shape {found:?}, expected {expected:?}")]
    WorldmapShapeMismatch {
        found: Vec<usize>,
        expected: Vec<usize>
    },
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl Default for DriveLimits {
    fn default() -> Self {
        Self {
            throttle_set: 0.2,
            brake_set: 10.0,
            stop_forward: 100,
            go_forward: 1000,
            max_vel: 2.0,
        }
    }
}

impl RoverState {
    /// Create the initial state.
    ///
    /// `vision_shape` is the `(rows, cols)` of the vision image and `worldmap_size` the side
    /// length of the square worldmap.
    pub fn new(
        limits: DriveLimits,
        vision_shape: (usize, usize),
        worldmap_size: usize,
        ground_truth: Array3<f64>
    ) -> Self {
        Self {
            img: None,
            pose: None,
            vel: None,
            steer: 0.0,
            throttle: 0.0,
            brake: 0.0,
            nav_angles: Vec::new(),
            nav_dists: Vec::new(),
            mode: NavMode::Forward,
            limits,
            vision_image: Array3::zeros((vision_shape.0, vision_shape.1, 3)),
            worldmap: Array3::zeros((worldmap_size, worldmap_size, 3)),
            ground_truth,
        }
    }

    /// Overwrite the pose, velocity and reported actuation with the telemetry values.
    pub fn apply_telemetry(&mut self, tm: &Telemetry) {
        self.vel = Some(tm.speed_ms);
        self.pose = Some(Pose {
            position_m: Point2::new(tm.position_m[0], tm.position_m[1]),
            yaw_deg: tm.yaw_deg,
            pitch_deg: tm.pitch_deg,
            roll_deg: tm.roll_deg,
        });
        self.throttle = tm.throttle;
        self.steer = tm.steering_angle_deg;
    }

    /// Input for the perception stage, or `None` if there is no image or pose yet.
    pub fn perception_input(&self) -> Option<PerceptionInput<'_>> {
        match (&self.img, &self.pose) {
            (Some(image), Some(pose)) => Some(PerceptionInput { image, pose }),
            _ => None
        }
    }

    /// Input for the decision stage, or `None` if there is no velocity yet.
    pub fn decision_input(&self) -> Option<DecisionInput<'_>> {
        Some(DecisionInput {
            nav_angles: &self.nav_angles,
            nav_dists: &self.nav_dists,
            vel: self.vel?,
            mode: self.mode,
            limits: &self.limits,
        })
    }

    /// Merge the output of the perception stage.
    ///
    /// The output is checked in full before anything is written. The worldmap only ever grows:
    /// negative delta components are ignored.
    pub fn merge_perception(&mut self, output: PerceptionOutput) -> Result<(), StateError> {
        if output.nav_angles.len() != output.nav_dists.len() {
            return Err(StateError::NavLengthMismatch {
                angles: output.nav_angles.len(),
                dists: output.nav_dists.len()
            })
        }
        if output.vision_image.shape() != self.vision_image.shape() {
            return Err(StateError::VisionShapeMismatch {
                found: output.vision_image.shape().to_vec(),
                expected: self.vision_image.shape().to_vec()
            })
        }
        if output.worldmap_delta.shape() != self.worldmap.shape() {
            return Err(StateError::WorldmapShapeMismatch {
                found: output.worldmap_delta.shape().to_vec(),
                expected: self.worldmap.shape().to_vec()
            })
        }

        self.nav_angles = output.nav_angles;
        self.nav_dists = output.nav_dists;
        self.vision_image = output.vision_image;

        Zip::from(&mut self.worldmap)
            .and(&output.worldmap_delta)
            .for_each(|w, &d| {
                if d > 0.0 {
                    *w += d;
                }
            });

        Ok(())
    }

    /// Merge the output of the decision stage.
    pub fn merge_decision(&mut self, output: DecisionOutput) {
        self.throttle = output.throttle;
        self.brake = output.brake;
        self.steer = output.steer;
        self.mode = output.mode;
    }

    /// Clear the accumulated worldmap.
    pub fn reset_worldmap(&mut self) {
        self.worldmap.fill(0.0);
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
