//! # Control Loop
//!
//! Turns simulator events into actuation commands. The loop owns the [`RoverState`] and is the
//! only thing that writes to it; events are handled one at a time, each to completion, before the
//! next is looked at.
//!
//! On each telemetry event the loop:
//!  - Validates the whole payload, dropping the event without any state change if it is malformed
//!  - Writes the reported pose and actuation into the state, then decodes the base64 camera frame
//!  - Runs perception and then decision, merging each output back into the state
//!  - Composes the world map overlay, encodes both display images and emits the `steer` command
//!
//! Non-finite velocities, undecodable frames and stage failures all fall back to the neutral
//! command.
//!
//! When events back up, stale telemetry is skipped (see [`coalesce`]). Skipped frames are never
//! processed, so they are not archived either.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;

use log::{debug, info, trace, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use comms_if::{
    eqpt::cam::{self, CamFrame, ImageFormat},
    sim::{is_manual_payload, OutboundEvent, SimEvent, Telemetry, TelemetryError},
};

use crate::{
    auto::{Decision, Perception},
    cmd_emitter::{emit_command, emit_neutral, EventSink},
    frame_archive::FrameArchive,
    rover_state::RoverState,
    world_map,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// JPEG quality used for the display images unless overridden
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct CtrlLoop<P, D, S> {
    state: RoverState,

    per: P,
    dec: D,
    sink: S,

    /// Where raw frames are saved, if recording
    archive: Option<FrameArchive>,

    jpeg_quality: u8,

    /// Clear the worldmap whenever a new simulator session connects
    reset_worldmap_on_connect: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What the loop did with a (valid) telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryOutcome {
    /// The payload was empty, the simulator was told to switch to manual
    Manual,

    /// Perception and decision ran and their command was sent
    Driven,

    /// The neutral command was sent instead of driving
    Neutral(NeutralCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeutralCause {
    NonFiniteVelocity,
    UndecodableFrame,
    PerceptionFailed,
    DecisionFailed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<P, D, S> CtrlLoop<P, D, S>
where
    P: Perception,
    D: Decision,
    S: EventSink
{
    pub fn new(state: RoverState, per: P, dec: D, sink: S) -> Self {
        Self {
            state,
            per,
            dec,
            sink,
            archive: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            reset_worldmap_on_connect: false,
        }
    }

    /// Save the frame of every processed telemetry event into the archive.
    pub fn with_archive(mut self, archive: FrameArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_reset_worldmap_on_connect(mut self, reset: bool) -> Self {
        self.reset_worldmap_on_connect = reset;
        self
    }

    pub fn state(&self) -> &RoverState {
        &self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Handle a single event to completion.
    pub fn handle(&mut self, event: SimEvent) {
        match event {
            SimEvent::Connect => self.on_connect(),
            SimEvent::Disconnect => self.on_disconnect(),
            SimEvent::Telemetry(payload) => match self.on_telemetry(payload.as_ref()) {
                Ok(outcome) => debug!("Telemetry handled: {:?}", outcome),
                Err(e) => warn!("Dropping malformed telemetry: {}", e)
            }
        }
    }

    /// A simulator has connected: make sure it starts from rest and ask for the sample locations.
    pub fn on_connect(&mut self) {
        info!("Simulator connected");

        if self.reset_worldmap_on_connect {
            info!("Clearing the worldmap for the new session");
            self.state.reset_worldmap();
        }

        emit_neutral(&mut self.sink);
        self.sink.emit(OutboundEvent::GetSamples);
    }

    pub fn on_disconnect(&mut self) {
        info!("Simulator disconnected");
    }

    /// Process one telemetry payload.
    ///
    /// An error means the payload was malformed: nothing was written to the state and nothing
    /// was emitted.
    pub fn on_telemetry(&mut self, payload: Option<&Value>) -> Result<TelemetryOutcome, TelemetryError> {
        let payload = match payload {
            Some(p) if !is_manual_payload(Some(p)) => p,
            _ => {
                debug!("Empty telemetry, requesting manual control");
                self.sink.emit(OutboundEvent::Manual);
                return Ok(TelemetryOutcome::Manual)
            }
        };

        let tm = Telemetry::from_payload(payload)?;

        trace!(
            "Telemetry: speed {}, position {:?}, throttle {}, steer {}",
            tm.speed_ms,
            tm.position_m,
            tm.throttle,
            tm.steering_angle_deg
        );

        self.state.apply_telemetry(&tm);

        let frame = CamFrame::from_base64(&tm.image);

        let outcome = self.drive(&tm, frame.as_ref().map_err(|e| e.to_string()));

        // Only frames which made it through base64 have any bytes worth keeping
        if let (Some(archive), Ok(frame)) = (&self.archive, frame) {
            archive.save(frame);
        }

        Ok(outcome)
    }

    fn drive(&mut self, tm: &Telemetry, frame: Result<&CamFrame, String>) -> TelemetryOutcome {
        let raster = frame.and_then(|f| f.to_raster().map_err(|e| e.to_string()));

        match raster {
            Ok(raster) => self.state.img = Some(raster),
            Err(e) => {
                warn!("Cannot decode the camera frame: {}", e);
                self.state.img = None;
                return self.neutral(NeutralCause::UndecodableFrame)
            }
        }

        if !tm.speed_ms.is_finite() {
            warn!("Velocity is not finite ({}), sending neutral command", tm.speed_ms);
            return self.neutral(NeutralCause::NonFiniteVelocity)
        }

        // Perception
        let per_result = match self.state.perception_input() {
            Some(input) => self.per.perceive(input).map_err(|e| e.to_string()),
            None => Err(String::from("no camera frame or pose"))
        };

        let merged = per_result.and_then(|output| 
            self.state.merge_perception(output).map_err(|e| e.to_string())
        );

        if let Err(e) = merged {
            warn!("Perception failed: {}", e);
            return self.neutral(NeutralCause::PerceptionFailed)
        }

        // Decision
        let dec_result = match self.state.decision_input() {
            Some(input) => self.dec.decide(input).map_err(|e| e.to_string()),
            None => Err(String::from("no velocity"))
        };

        match dec_result {
            Ok(output) => self.state.merge_decision(output),
            Err(e) => {
                warn!("Decision failed: {}", e);
                return self.neutral(NeutralCause::DecisionFailed)
            }
        }

        // Output
        let format = ImageFormat::Jpeg(self.jpeg_quality);

        let overlay = world_map::compose(&self.state.worldmap, &self.state.ground_truth)
            .map_err(|e| e.to_string())
            .and_then(|o| cam::encode(o.view(), format).map_err(|e| e.to_string()))
            .unwrap_or_else(|e| {
                warn!("Cannot produce the world map overlay: {}", e);
                String::new()
            });

        let vision = cam::encode(self.state.vision_image.view(), format)
            .unwrap_or_else(|e| {
                warn!("Cannot encode the vision image: {}", e);
                String::new()
            });

        emit_command(
            &mut self.sink, 
            self.state.throttle, 
            self.state.brake, 
            self.state.steer, 
            overlay, 
            vision
        );

        TelemetryOutcome::Driven
    }

    fn neutral(&mut self, cause: NeutralCause) -> TelemetryOutcome {
        emit_neutral(&mut self.sink);
        TelemetryOutcome::Neutral(cause)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Skip stale telemetry: a telemetry event carrying data is dropped when another telemetry event
/// directly follows it in the queue.
///
/// Empty payloads are manual-control requests and are always kept, as are connect and disconnect
/// events. Kept events keep their order. Returns the number of events dropped.
pub fn coalesce(queue: &mut VecDeque<SimEvent>) -> usize {
    let before = queue.len();
    let mut kept: VecDeque<SimEvent> = VecDeque::with_capacity(before);

    for event in queue.drain(..) {
        let superseded = match (&event, kept.back()) {
            (SimEvent::Telemetry(_), Some(SimEvent::Telemetry(prev))) => 
                !is_manual_payload(prev.as_ref()),
            _ => false
        };

        if superseded {
            kept.pop_back();
        }
        kept.push_back(event);
    }

    *queue = kept;

    before - queue.len()
}

/// Run the control loop until the event channel closes, returning the loop so its state can be
/// inspected.
pub async fn run<P, D, S>(
    mut ctrl: CtrlLoop<P, D, S>, 
    mut events_rx: mpsc::Receiver<SimEvent>
) -> CtrlLoop<P, D, S>
where
    P: Perception,
    D: Decision,
    S: EventSink
{
    let mut pending = VecDeque::new();

    loop {
        if pending.is_empty() {
            match events_rx.recv().await {
                Some(event) => pending.push_back(event),
                None => break
            }
        }

        // Take everything that is already waiting so stale telemetry can be skipped
        while let Ok(event) = events_rx.try_recv() {
            pending.push_back(event);
        }

        let dropped = coalesce(&mut pending);
        if dropped > 0 {
            debug!("Skipped {} stale telemetry events", dropped);
        }

        if let Some(event) = pending.pop_front() {
            ctrl.handle(event);
        }
    }

    info!("Event channel closed, control loop stopping");

    ctrl
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    use ndarray::Array3;
    use serde_json::json;

    use comms_if::sim::SteerCmd;

    use crate::{
        auto::{
            DecError, DecisionInput, DecisionOutput, PerError, PerceptionInput, PerceptionOutput
        },
        rover_state::{DriveLimits, NavMode},
    };

    type CallLog = Rc<RefCell<Vec<&'static str>>>;

    const VISION: (usize, usize) = (4, 8);
    const WORLD: usize = 6;

    /// Perception double which records its calls and returns a fixed output.
    struct MockPer {
        log: CallLog,
        fail: bool,
    }

    /// Decision double which records its calls and returns a fixed output.
    struct MockDec {
        log: CallLog,
        seen_vel: Option<f64>,
    }

    impl Perception for MockPer {
        fn perceive(&mut self, input: PerceptionInput<'_>) -> Result<PerceptionOutput, PerError> {
            self.log.borrow_mut().push("perceive");
            if self.fail {
                return Err(PerError::ImageIsEmpty)
            }

            assert_eq!(input.pose.position_m.x, 10.0);

            Ok(PerceptionOutput {
                nav_angles: vec![0.1, 0.2, 0.3],
                nav_dists: vec![1.0, 2.0, 3.0],
                vision_image: Array3::from_elem((VISION.0, VISION.1, 3), 128),
                worldmap_delta: Array3::from_elem((WORLD, WORLD, 3), 1.0),
            })
        }
    }

    impl Decision for MockDec {
        fn decide(&mut self, input: DecisionInput<'_>) -> Result<DecisionOutput, DecError> {
            self.log.borrow_mut().push("decide");
            self.seen_vel = Some(input.vel);
            assert_eq!(input.nav_angles.len(), 3);

            Ok(DecisionOutput {
                throttle: 0.2,
                brake: 0.0,
                steer: 5.5,
                mode: NavMode::Forward,
            })
        }
    }

    fn ctrl(fail_per: bool) -> (CtrlLoop<MockPer, MockDec, Vec<OutboundEvent>>, CallLog) {
        let log = CallLog::default();
        let state = RoverState::new(
            DriveLimits::default(),
            VISION,
            WORLD,
            Array3::zeros((WORLD, WORLD, 3))
        );

        let ctrl = CtrlLoop::new(
            state,
            MockPer { log: log.clone(), fail: fail_per },
            MockDec { log: log.clone(), seen_vel: None },
            Vec::new()
        );

        (ctrl, log)
    }

    fn frame_b64() -> String {
        let raster = Array3::from_elem((8, 16, 3), 90u8);
        cam::encode(raster.view(), ImageFormat::Jpeg(90)).unwrap()
    }

    fn payload(speed: &str) -> Value {
        json!({
            "speed": speed,
            "position": "10.0,20.0",
            "yaw": "45",
            "pitch": "0",
            "roll": "0",
            "throttle": "0.1",
            "steering_angle": "0",
            "image": frame_b64(),
        })
    }

    fn steer_cmds(sink: &[OutboundEvent]) -> Vec<&SteerCmd> {
        sink.iter()
            .filter_map(|e| match e {
                OutboundEvent::Steer(c) => Some(c),
                _ => None
            })
            .collect()
    }

    #[test]
    fn test_telemetry_drives() {
        let (mut ctrl, log) = ctrl(false);

        let outcome = ctrl.on_telemetry(Some(&payload("1.5"))).unwrap();
        assert_eq!(outcome, TelemetryOutcome::Driven);

        // Pose written from the payload
        let state = ctrl.state();
        let pose = state.pose.unwrap();
        assert_eq!((pose.position_m.x, pose.position_m.y), (10.0, 20.0));
        assert_eq!(pose.yaw_deg, 45.0);
        assert_eq!(state.vel, Some(1.5));
        assert_eq!(state.img.as_ref().map(|i| i.dim()), Some((8, 16, 3)));

        // Stages ran once each, perception first
        assert_eq!(*log.borrow(), vec!["perceive", "decide"]);
        assert_eq!(ctrl.dec.seen_vel, Some(1.5));

        // Outputs merged
        assert_eq!(state.nav_angles, vec![0.1, 0.2, 0.3]);
        assert!(state.worldmap.iter().all(|&v| v == 1.0));

        // Exactly one command with the decision's values and both images
        let cmds = steer_cmds(ctrl.sink());
        assert_eq!(ctrl.sink().len(), 1);
        assert_eq!(cmds[0].throttle, "0.2");
        assert_eq!(cmds[0].brake, "0");
        assert_eq!(cmds[0].steering_angle, "5.5");
        assert!(!cmds[0].inset_image.is_empty());
        assert!(!cmds[0].inset_image3.is_empty());
    }

    #[test]
    fn test_non_finite_velocity() {
        let (mut ctrl, log) = ctrl(false);

        let outcome = ctrl.on_telemetry(Some(&payload("nan"))).unwrap();
        assert_eq!(outcome, TelemetryOutcome::Neutral(NeutralCause::NonFiniteVelocity));

        // Stages skipped, pose still written
        assert!(log.borrow().is_empty());
        assert!(ctrl.state().pose.is_some());

        assert_eq!(ctrl.sink(), &vec![OutboundEvent::Steer(SteerCmd::neutral())]);
    }

    #[test]
    fn test_empty_payload_is_manual() {
        let (mut ctrl, log) = ctrl(false);

        assert_eq!(ctrl.on_telemetry(None).unwrap(), TelemetryOutcome::Manual);
        assert_eq!(ctrl.on_telemetry(Some(&json!({}))).unwrap(), TelemetryOutcome::Manual);
        assert_eq!(ctrl.on_telemetry(Some(&Value::Null)).unwrap(), TelemetryOutcome::Manual);

        assert_eq!(ctrl.sink(), &vec![OutboundEvent::Manual; 3]);
        assert!(log.borrow().is_empty());
        assert!(ctrl.state().pose.is_none());
    }

    #[test]
    fn test_malformed_payload_changes_nothing() {
        let (mut ctrl, log) = ctrl(false);

        let mut p = payload("1.5");
        p["roll"] = json!("sideways");
        assert!(ctrl.on_telemetry(Some(&p)).is_err());

        let mut p = payload("1.5");
        p["image"] = json!(["not", "a", "string"]);
        assert!(ctrl.on_telemetry(Some(&p)).is_err());

        let state = ctrl.state();
        assert!(state.pose.is_none() && state.vel.is_none() && state.img.is_none());
        assert!(ctrl.sink().is_empty());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_undecodable_frame_is_neutral() {
        let (mut ctrl, log) = ctrl(false);

        let mut p = payload("1.5");
        p["image"] = json!(CamFrame { data: b"definitely not a jpeg".to_vec() }.to_base64());

        assert_eq!(
            ctrl.on_telemetry(Some(&p)).unwrap(),
            TelemetryOutcome::Neutral(NeutralCause::UndecodableFrame)
        );
        assert!(ctrl.state().pose.is_some());
        assert!(ctrl.state().img.is_none());
        assert!(log.borrow().is_empty());
        assert_eq!(ctrl.sink(), &vec![OutboundEvent::Steer(SteerCmd::neutral())]);
    }

    #[test]
    fn test_invalid_base64_is_neutral() {
        let (mut ctrl, log) = ctrl(false);

        let mut p = payload("1.5");
        p["image"] = json!("%%%not-base64%%%");

        assert_eq!(
            ctrl.on_telemetry(Some(&p)).unwrap(),
            TelemetryOutcome::Neutral(NeutralCause::UndecodableFrame)
        );

        // The rest of the payload still lands in the state
        let state = ctrl.state();
        let pose = state.pose.unwrap();
        assert_eq!((pose.position_m.x, pose.position_m.y), (10.0, 20.0));
        assert_eq!(state.vel, Some(1.5));
        assert!(state.img.is_none());

        assert!(log.borrow().is_empty());
        assert_eq!(ctrl.sink(), &vec![OutboundEvent::Steer(SteerCmd::neutral())]);
    }

    #[test]
    fn test_invalid_base64_is_not_archived() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("frames");

        let (ctrl, _) = ctrl(false);
        let mut ctrl = ctrl.with_archive(FrameArchive::new(&folder).unwrap());

        let mut p = payload("1.5");
        p["image"] = json!("%%%not-base64%%%");
        ctrl.on_telemetry(Some(&p)).unwrap();

        // Dropping the loop drops the archive, which flushes its queue
        drop(ctrl);
        assert_eq!(std::fs::read_dir(&folder).unwrap().count(), 0);
    }

    #[test]
    fn test_perception_failure_is_neutral() {
        let (mut ctrl, log) = ctrl(true);

        assert_eq!(
            ctrl.on_telemetry(Some(&payload("1.0"))).unwrap(),
            TelemetryOutcome::Neutral(NeutralCause::PerceptionFailed)
        );
        assert_eq!(*log.borrow(), vec!["perceive"]);
        assert_eq!(ctrl.sink(), &vec![OutboundEvent::Steer(SteerCmd::neutral())]);
    }

    #[test]
    fn test_connect_sequence() {
        let (mut ctrl, _) = ctrl(false);

        ctrl.handle(SimEvent::Connect);

        assert_eq!(ctrl.sink(), &vec![
            OutboundEvent::Steer(SteerCmd::neutral()),
            OutboundEvent::GetSamples
        ]);
        assert!(ctrl.state().pose.is_none());
    }

    #[test]
    fn test_worldmap_reset_on_connect() {
        let (ctrl, _) = ctrl(false);
        let mut ctrl = ctrl.with_reset_worldmap_on_connect(true);

        ctrl.on_telemetry(Some(&payload("1.5"))).unwrap();
        assert!(ctrl.state().worldmap.iter().all(|&v| v == 1.0));

        ctrl.handle(SimEvent::Disconnect);
        assert!(ctrl.state().worldmap.iter().all(|&v| v == 1.0));

        ctrl.handle(SimEvent::Connect);
        assert!(ctrl.state().worldmap.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_coalesce() {
        let tm = |n: i64| SimEvent::Telemetry(Some(json!({ "n": n })));

        let mut queue: VecDeque<_> = vec![
            tm(1), tm(2), SimEvent::Connect, tm(3), tm(4), tm(5), SimEvent::Disconnect, tm(6)
        ].into();

        assert_eq!(coalesce(&mut queue), 3);
        assert_eq!(queue, VecDeque::from(vec![
            tm(2), SimEvent::Connect, tm(5), SimEvent::Disconnect, tm(6)
        ]));

        let mut queue: VecDeque<_> = vec![SimEvent::Connect, SimEvent::Connect].into();
        assert_eq!(coalesce(&mut queue), 0);
    }

    #[test]
    fn test_coalesce_keeps_manual_requests() {
        let tm = |n: i64| SimEvent::Telemetry(Some(json!({ "n": n })));

        let mut queue: VecDeque<_> = vec![
            SimEvent::Telemetry(None), tm(1), tm(2), SimEvent::Telemetry(Some(json!({}))), tm(3)
        ].into();

        // Data superseded by any newer telemetry is stale, manual requests stay put
        assert_eq!(coalesce(&mut queue), 2);
        assert_eq!(queue, VecDeque::from(vec![
            SimEvent::Telemetry(None), SimEvent::Telemetry(Some(json!({}))), tm(3)
        ]));
    }

    #[tokio::test]
    async fn test_run_answers_manual_request_behind_telemetry() {
        let (ctrl, log) = ctrl(false);
        let (tx, rx) = mpsc::channel(8);

        tx.send(SimEvent::Telemetry(None)).await.unwrap();
        tx.send(SimEvent::Telemetry(Some(payload("1.5")))).await.unwrap();
        drop(tx);

        let ctrl = run(ctrl, rx).await;

        assert_eq!(ctrl.sink()[0], OutboundEvent::Manual);
        assert_eq!(steer_cmds(ctrl.sink()).len(), 1);
        assert_eq!(*log.borrow(), vec!["perceive", "decide"]);
    }

    #[tokio::test]
    async fn test_run_skips_stale_telemetry() {
        let (ctrl, log) = ctrl(false);
        let (tx, rx) = mpsc::channel(8);

        // Queue everything before the loop starts so it all arrives at once
        tx.send(SimEvent::Connect).await.unwrap();
        tx.send(SimEvent::Telemetry(Some(payload("1.0")))).await.unwrap();
        tx.send(SimEvent::Telemetry(Some(payload("1.5")))).await.unwrap();
        drop(tx);

        let ctrl = run(ctrl, rx).await;

        // Only the newest telemetry was processed
        assert_eq!(*log.borrow(), vec!["perceive", "decide"]);
        assert_eq!(ctrl.state().vel, Some(1.5));

        let sink = ctrl.sink();
        assert_eq!(sink.len(), 3);
        assert_eq!(sink[1], OutboundEvent::GetSamples);
        assert_eq!(steer_cmds(sink)[1].throttle, "0.2");
    }
}
