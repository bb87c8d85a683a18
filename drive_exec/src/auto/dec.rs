//! Mode decision - a two state forward/stop driver.
//!
//! In `Forward` the rover follows the mean direction of the navigable terrain until too little of
//! it is visible, at which point it brakes and switches to `Stop`. Once stopped it turns in place
//! until enough terrain is visible again and then resumes `Forward`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use serde::Deserialize;

use util::maths::mean;

use crate::rover_state::NavMode;

use super::{Decision, DecisionInput, DecisionOutput, DecError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ModeDecision {
    pub params: DecParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecParams {
    /// Limit on the demanded steering angle in either direction
    ///
    /// Units: degrees
    pub max_steer_deg: f64,

    /// Velocity below which the rover counts as stopped
    ///
    /// Units: meters/second
    pub stop_vel: f64,

    /// Steering angle used when turning in place, negative is clockwise
    ///
    /// Units: degrees
    pub turn_steer_deg: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ModeDecision {
    pub fn new(params: DecParams) -> Self {
        Self { params }
    }

    /// Steer towards the mean navigable angle.
    fn steer_to(&self, nav_angles: &[f64]) -> f64 {
        mean(nav_angles)
            .map(|a| a.to_degrees())
            .unwrap_or(0.0)
            .max(-self.params.max_steer_deg)
            .min(self.params.max_steer_deg)
    }

    fn forward(&self, input: &DecisionInput<'_>) -> DecisionOutput {
        let limits = input.limits;

        if input.nav_angles.len() >= limits.stop_forward {
            DecisionOutput {
                throttle: if input.vel < limits.max_vel { limits.throttle_set } else { 0.0 },
                brake: 0.0,
                steer: self.steer_to(input.nav_angles),
                mode: NavMode::Forward,
            }
        }
        else {
            debug!(
                "Only {} navigable points visible, stopping", 
                input.nav_angles.len()
            );
            DecisionOutput {
                throttle: 0.0,
                brake: limits.brake_set,
                steer: 0.0,
                mode: NavMode::Stop,
            }
        }
    }

    fn stop(&self, input: &DecisionInput<'_>) -> DecisionOutput {
        let limits = input.limits;

        // Still rolling
        if input.vel > self.params.stop_vel {
            return DecisionOutput {
                throttle: 0.0,
                brake: limits.brake_set,
                steer: 0.0,
                mode: NavMode::Stop,
            }
        }

        if input.nav_angles.len() < limits.go_forward {
            DecisionOutput {
                throttle: 0.0,
                brake: 0.0,
                steer: self.params.turn_steer_deg,
                mode: NavMode::Stop,
            }
        }
        else {
            debug!(
                "{} navigable points visible, resuming forward", 
                input.nav_angles.len()
            );
            DecisionOutput {
                throttle: limits.throttle_set,
                brake: 0.0,
                steer: self.steer_to(input.nav_angles),
                mode: NavMode::Forward,
            }
        }
    }
}

impl Decision for ModeDecision {
    fn decide(&mut self, input: DecisionInput<'_>) -> Result<DecisionOutput, DecError> {
        if input.nav_angles.len() != input.nav_dists.len() {
            return Err(DecError::NavLengthMismatch {
                angles: input.nav_angles.len(),
                dists: input.nav_dists.len()
            })
        }

        Ok(match input.mode {
            NavMode::Forward => self.forward(&input),
            NavMode::Stop => self.stop(&input)
        })
    }
}

impl Default for DecParams {
    fn default() -> Self {
        Self {
            max_steer_deg: 15.0,
            stop_vel: 0.2,
            turn_steer_deg: -15.0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
