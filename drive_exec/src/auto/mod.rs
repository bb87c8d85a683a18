//! # Autonomy stages
//!
//! The control loop calls two stages on each telemetry event, always perception first and then
//! decision. Each stage gets a narrow input borrowed from the [`RoverState`] and returns an
//! output which the loop merges back into the state; neither stage can write the state directly.
//!
//! [`per::ThresholdPerception`] and [`dec::ModeDecision`] are the reference stages used by the
//! executable. Any other implementation of [`Perception`] or [`Decision`] can be swapped in.
//!
//! [`RoverState`]: crate::rover_state::RoverState

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod dec;
pub mod per;
mod warp;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use ndarray::Array3;

use comms_if::eqpt::cam::Raster;

use crate::rover_state::{DriveLimits, NavMode, Pose};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Identifies navigable terrain in a camera frame.
pub trait Perception {
    fn perceive(&mut self, input: PerceptionInput<'_>) -> Result<PerceptionOutput, PerError>;
}

/// Chooses the actuation command from the perceived terrain.
pub trait Decision {
    fn decide(&mut self, input: DecisionInput<'_>) -> Result<DecisionOutput, DecError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PerceptionInput<'a> {
    /// The current camera frame
    pub image: &'a Raster,

    /// The pose of the rover when the frame was taken
    pub pose: &'a Pose,
}

#[derive(Debug, Clone)]
pub struct PerceptionOutput {
    /// Angles to navigable terrain points relative to the rover heading
    ///
    /// Units: radians
    pub nav_angles: Vec<f64>,

    /// Distances to the navigable terrain points, paired with `nav_angles`
    pub nav_dists: Vec<f64>,

    /// Replacement for the vision debug image
    pub vision_image: Raster,

    /// Values to add to the worldmap, same shape as the worldmap
    pub worldmap_delta: Array3<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub nav_angles: &'a [f64],
    pub nav_dists: &'a [f64],

    /// Current velocity, always finite
    ///
    /// Units: meters/second
    pub vel: f64,

    pub mode: NavMode,
    pub limits: &'a DriveLimits,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionOutput {
    pub throttle: f64,
    pub brake: f64,

    /// Units: degrees
    pub steer: f64,

    pub mode: NavMode,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PerError {
    #[error("The provided camera image was empty")]
    ImageIsEmpty,

    #[error("Could not compute the perspective transform from the calibration points")]
    DegenerateCalibration,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum DecError {
    #[error("Received {angles} navigation angles but {dists} distances")]
    NavLengthMismatch {
        angles: usize,
        dists: usize
    },
}
