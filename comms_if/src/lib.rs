//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Camera frame definitions and the frame codec
pub mod eqpt;

/// Network module
pub mod net;

/// Events and messages exchanged with the simulator
pub mod sim;
