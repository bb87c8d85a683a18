//! Main drive executable entry point.
//!
//! # Architecture
//!
//! The executable bridges the rover simulator to the autonomy stages. Two tasks run on a single
//! threaded runtime:
//!
//!     - The simulator server, which owns the WebSocket and turns wire packets into events
//!     - The control loop, which owns the rover state and turns events into commands
//!
//! They are connected by two bounded queues, events flowing into the loop and commands flowing
//! back out to the server.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::path::PathBuf;

use color_eyre::{Report, eyre::{WrapErr, eyre}};
use log::info;
use structopt::StructOpt;
use tokio::sync::mpsc;

// Internal
use comms_if::net::NetParams;
use drive_lib::{
    auto::{dec::{DecParams, ModeDecision}, per::{PerParams, ThresholdPerception}},
    cmd_emitter::ChannelSink,
    ctrl_loop::{self, CtrlLoop},
    frame_archive::FrameArchive,
    params::DriveExecParams,
    rover_state::RoverState,
    sim_server::SimServer,
    world_map,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    params,
    session::Session,
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Drive the simulated rover autonomously.
#[derive(Debug, StructOpt)]
#[structopt(name = "drive_exec")]
struct Opt {
    /// Folder to record the camera frames of this run into. The folder is emptied first.
    #[structopt(parse(from_os_str))]
    image_folder: Option<PathBuf>,

    /// Directory holding the parameter files, defaults to `<sw_root>/params`
    #[structopt(long, parse(from_os_str))]
    params_dir: Option<PathBuf>,

    /// Log everything, including per-event traces
    #[structopt(short, long)]
    verbose: bool,

    /// Log target to trace on its own, e.g. `drive_lib::ctrl_loop`. May be given more than once.
    #[structopt(long = "trace", number_of_values = 1)]
    trace_targets: Vec<String>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "drive_exec", 
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    let level = if opt.verbose { LevelFilter::Trace } else { LevelFilter::Debug };
    let target_levels: Vec<(String, LevelFilter)> = opt.trace_targets
        .iter()
        .map(|t| (t.clone(), LevelFilter::Trace))
        .collect();
    logger_init(level, &target_levels, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Rover Drive Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params_dir = match opt.params_dir {
        Some(ref d) => d.clone(),
        None => params::default_dir().wrap_err("Could not find the parameters directory")?
    };

    let net_params: NetParams = params::load_from(&params_dir, "net.toml")
        .wrap_err("Could not load net params")?;
    let exec_params: DriveExecParams = params::load_from(&params_dir, "drive_exec.toml")
        .wrap_err("Could not load exec params")?;
    let per_params: PerParams = params::load_from(&params_dir, "per.toml")
        .wrap_err("Could not load perception params")?;
    let dec_params: DecParams = params::load_from(&params_dir, "dec.toml")
        .wrap_err("Could not load decision params")?;

    info!("Parameters loaded from {:?}", params_dir);

    // ---- INITIALISE STATE ----

    let ground_truth_path = host::get_sw_root()
        .wrap_err("Could not find the software root")?
        .join(&exec_params.ground_truth_path);
    let ground_truth = world_map::load_ground_truth(&ground_truth_path)
        .wrap_err("Failed to load the ground truth map")?;

    let (gt_rows, gt_cols, _) = ground_truth.dim();
    if (gt_rows, gt_cols) != (exec_params.worldmap_size, exec_params.worldmap_size) {
        return Err(eyre!(
            "Ground truth map is {}x{} but the worldmap is {}x{}",
            gt_rows,
            gt_cols,
            exec_params.worldmap_size,
            exec_params.worldmap_size
        ));
    }

    info!("Ground truth loaded from {:?}", ground_truth_path);

    let state = RoverState::new(
        exec_params.limits,
        (exec_params.vision_rows, exec_params.vision_cols),
        exec_params.worldmap_size,
        ground_truth
    );

    // ---- INITIALISE NETWORK ----

    let (events_tx, events_rx) = mpsc::channel(net_params.event_queue_depth.max(1));
    let (out_tx, out_rx) = mpsc::channel(net_params.outbound_queue_depth.max(1));

    let server = SimServer::new(net_params)
        .wrap_err("Failed to initialise the SimServer")?;

    // ---- INITIALISE CONTROL LOOP ----

    let mut ctrl = CtrlLoop::new(
        state,
        ThresholdPerception::new(per_params, exec_params.worldmap_size),
        ModeDecision::new(dec_params),
        ChannelSink::new(out_tx)
    )
    .with_jpeg_quality(exec_params.jpeg_quality)
    .with_reset_worldmap_on_connect(exec_params.reset_worldmap_on_connect);

    match opt.image_folder {
        Some(ref folder) => {
            let archive = FrameArchive::new(folder)
                .wrap_err("Failed to create the image folder")?;
            info!("Recording this run into {:?}", archive.folder());
            ctrl = ctrl.with_archive(archive);
        },
        None => info!("Not recording this run")
    }

    // ---- MAIN LOOP ----

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("Failed to build the runtime")?;

    info!("Beginning main loop\n");

    runtime.block_on(async move {
        tokio::select! {
            res = server.run(events_tx, out_rx) => 
                res.wrap_err("The SimServer stopped"),
            _ = ctrl_loop::run(ctrl, events_rx) => 
                Err(eyre!("The control loop stopped unexpectedly")),
        }
    })
}
