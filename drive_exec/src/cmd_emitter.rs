//! # Command Emitter
//!
//! Sends actuation commands and other control loop output towards the simulator. Delivery is
//! fire-and-forget: the loop never waits on the connection.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{trace, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use comms_if::sim::{OutboundEvent, SteerCmd};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Destination for events produced by the control loop.
pub trait EventSink {
    /// Send the event. Must not block, an event which cannot be delivered is dropped.
    fn emit(&mut self, event: OutboundEvent);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Sink which forwards events onto the server's outbound queue.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundEvent>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OutboundEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: OutboundEvent) {
        match self.tx.try_send(event) {
            Ok(_) => (),
            Err(TrySendError::Full(e)) => warn!(
                "Outbound queue is full, dropping {:?} event", 
                e.name()
            ),
            Err(TrySendError::Closed(e)) => warn!(
                "No simulator link, dropping {:?} event", 
                e.name()
            )
        }
    }
}

/// Records every event, used where the output is inspected rather than sent.
impl EventSink for Vec<OutboundEvent> {
    fn emit(&mut self, event: OutboundEvent) {
        self.push(event);
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Emit a `steer` event with the given actuation values and encoded images.
pub fn emit_command<S: EventSink + ?Sized>(
    sink: &mut S,
    throttle: f64,
    brake: f64,
    steer: f64,
    overlay: String,
    debug: String
) {
    let cmd = SteerCmd::new(throttle, brake, steer, overlay, debug);
    trace!(
        "Steer: throttle {}, brake {}, steering angle {}", 
        cmd.throttle, 
        cmd.brake, 
        cmd.steering_angle
    );
    sink.emit(OutboundEvent::Steer(cmd));
}

/// Emit the neutral `steer` event, zero actuation and no images.
pub fn emit_neutral<S: EventSink + ?Sized>(sink: &mut S) {
    sink.emit(OutboundEvent::Steer(SteerCmd::neutral()));
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_emit_command_formatting() {
        let mut sink = Vec::new();
        emit_command(&mut sink, 0.2, 0.0, -15.0, "a".into(), "b".into());

        assert_eq!(sink, vec![OutboundEvent::Steer(SteerCmd {
            throttle: "0.2".into(),
            brake: "0".into(),
            steering_angle: "-15".into(),
            inset_image: "a".into(),
            inset_image3: "b".into(),
        })]);
    }

    #[test]
    fn test_emit_neutral() {
        let mut sink = Vec::new();
        emit_neutral(&mut sink);

        match &sink[..] {
            [OutboundEvent::Steer(cmd)] => {
                assert_eq!((&cmd.throttle[..], &cmd.brake[..], &cmd.steering_angle[..]), ("0", "0", "0"));
                assert!(cmd.inset_image.is_empty() && cmd.inset_image3.is_empty());
            },
            other => panic!("Unexpected events: {:?}", other)
        }
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);

        sink.emit(OutboundEvent::Manual);
        sink.emit(OutboundEvent::GetSamples);

        assert_eq!(rx.try_recv().unwrap(), OutboundEvent::Manual);
        assert!(rx.try_recv().is_err());

        drop(rx);
        // Closed channel is not an error for the caller
        sink.emit(OutboundEvent::Manual);
    }
}
