//! # Drive library.
//!
//! This library allows other crates in the workspace, and the tests, to access items defined
//! inside the drive crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Autonomy stages - perception and decision, behind traits
pub mod auto;

/// Command emitter - sends actuation commands towards the simulator
pub mod cmd_emitter;

/// Control loop - turns simulator events into commands
pub mod ctrl_loop;

/// Frame archive - saves raw camera frames in the background
pub mod frame_archive;

/// Executable parameters
pub mod params;

/// Rover state - the record carried between control loop cycles
pub mod rover_state;

/// Simulator server - the WebSocket link to the simulator
pub mod sim_server;

/// World map - overlay composition and ground truth loading
pub mod world_map;
