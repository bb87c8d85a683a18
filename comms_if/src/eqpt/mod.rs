//! # Equipment Interface
//!
//! This module defines the data structures exchanged with the rover's (simulated) equipment.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod cam;
