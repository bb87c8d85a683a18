//! # Drive Executable Parameters
//!
//! This module provides parameters for the drive executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::PathBuf;

use serde::Deserialize;

use crate::rover_state::DriveLimits;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DriveExecParams {
    /// Path to the grayscale ground truth map, relative to the software root
    pub ground_truth_path: PathBuf,

    /// JPEG quality of the images sent back to the simulator
    pub jpeg_quality: u8,

    /// Number of rows in the vision debug image
    pub vision_rows: usize,

    /// Number of columns in the vision debug image
    pub vision_cols: usize,

    /// Side length of the square worldmap
    pub worldmap_size: usize,

    pub limits: DriveLimits,

    /// Clear the worldmap whenever the simulator (re)connects
    #[serde(default)]
    pub reset_worldmap_on_connect: bool,
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    use comms_if::net::NetParams;

    use crate::auto::{dec::DecParams, per::PerParams};

    fn params_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../params")
    }

    #[test]
    fn test_shipped_params_load() {
        let exec: DriveExecParams = util::params::load_from(params_dir(), "drive_exec.toml").unwrap();
        assert_eq!(exec.limits, DriveLimits::default());
        assert_eq!((exec.vision_rows, exec.vision_cols), (160, 320));
        assert_eq!(exec.worldmap_size, 200);
        assert!(!exec.reset_worldmap_on_connect);

        let net: NetParams = util::params::load_from(params_dir(), "net.toml").unwrap();
        assert_eq!(net.port, 4567);

        let per: PerParams = util::params::load_from(params_dir(), "per.toml").unwrap();
        assert_eq!(per.src_points, PerParams::default().src_points);

        let dec: DecParams = util::params::load_from(params_dir(), "dec.toml").unwrap();
        assert_eq!(dec.max_steer_deg, 15.0);
    }
}
