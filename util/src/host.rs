//! Host platform utility functions

use std::{env, path::PathBuf};

/// Environment variable pointing at the root of the software tree (the directory holding
/// `params/` and `sessions/`).
pub const SW_ROOT_ENV_VAR: &str = "ROVER_SW_ROOT";

/// Get the root directory of the software.
///
/// Uses `ROVER_SW_ROOT` if it is set, otherwise the current working directory.
pub fn get_sw_root() -> std::io::Result<PathBuf> {
    match env::var_os(SW_ROOT_ENV_VAR) {
        Some(root) => Ok(PathBuf::from(root)),
        None => env::current_dir()
    }
}
