//! Generic logger utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{self, info};
use fern;
use colored::{ColoredString, Colorize};
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Targets which are held at or below the given level whatever the minimum level is.
///
/// The websocket stack logs every frame at debug, and each telemetry frame carries a camera
/// image.
const QUIET_TARGETS: &[(&str, LevelFilter)] = &[
    ("tungstenite", LevelFilter::Info),
    ("tokio_tungstenite", LevelFilter::Info),
];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level less than `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
/// 
/// `target_levels` sets the level of individual log targets (module paths), for example
/// `("drive_lib::ctrl_loop", LevelFilter::Trace)` to follow the control loop event by event
/// while the rest of the executable stays at `min_level`.
/// 
/// # Notes
/// 
/// - `min_level` must be greater than `log::Level::Info`.
/// 
/// # Safety
/// 
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    min_level: self::LevelFilter, 
    target_levels: &[(String, LevelFilter)],
    session: &session::Session
) -> Result<(), LoggerInitError> {

    if min_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level))
    }

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let levels = resolve_target_levels(min_level, target_levels);

    // Setup the logger using fern's builder pattern
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            let elapsed = session::get_elapsed_seconds();
            let tag = level_to_str(record.level());

            // Only debug and trace lines carry their target
            match record.level() {
                log::Level::Debug | log::Level::Trace => out.finish(format_args!(
                    "[{:10.6} {}] {}: {}", elapsed, tag, record.target(), message
                )),
                _ => out.finish(format_args!("[{:10.6} {}] {}", elapsed, tag, message))
            }
        })
        .level(min_level);

    let dispatch = levels.iter().fold(dispatch, |d, (target, level)| {
        d.level_for(target.clone(), *level)
    });

    dispatch
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;
    
    info!("Logging initialised");
    if let Some(epoch) = session::get_epoch() {
        info!("    Session epoch: {}", epoch);
    }
    info!("    Log level: {:?}", min_level);
    for (target, level) in levels.iter().filter(|(_, l)| *l > min_level) {
        info!("    Log level for {}: {:?}", target, level);
    }
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

/// Work out the per-target levels the logger is built with.
///
/// Quiet targets are capped at `min_level`, so they never log more than everything else does.
/// Requested levels come after them and take precedence, a target named twice keeps its last
/// level.
pub fn resolve_target_levels(
    min_level: LevelFilter,
    requested: &[(String, LevelFilter)]
) -> Vec<(String, LevelFilter)> {
    let mut levels: Vec<(String, LevelFilter)> = QUIET_TARGETS
        .iter()
        .map(|(target, cap)| (target.to_string(), (*cap).min(min_level)))
        .collect();

    for (target, level) in requested {
        levels.retain(|(t, _)| t != target);
        levels.push((target.clone(), *level));
    }

    levels
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the string representation of a log level
fn level_to_str(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => "TRC".dimmed().italic(),
        log::Level::Debug => "DBG".dimmed(),
        log::Level::Info  => "INF".normal(),
        log::Level::Warn  => "WRN".yellow(),
        log::Level::Error => "ERR".red().bold()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
