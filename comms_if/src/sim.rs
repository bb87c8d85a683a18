//! # Simulator events
//!
//! Defines the events exchanged with the rover simulator: the inbound telemetry payload and the
//! outbound steering command, manual-mode and sample request events.
//!
//! All numeric values are transferred as strings by the simulator. Parsing accepts JSON numbers
//! as well, since they carry the same information.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::net::SioPacket;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Inbound telemetry event name
pub const EVENT_TELEMETRY: &str = "telemetry";

/// Outbound actuation command event name
pub const EVENT_STEER: &str = "steer";

/// Outbound event telling the simulator autonomous control is yielded
pub const EVENT_MANUAL: &str = "manual";

/// Outbound event requesting sample information from the simulator
pub const EVENT_GET_SAMPLES: &str = "get_samples";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A validated telemetry payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Current speed of the rover
    ///
    /// Units: meters/second
    pub speed_ms: f64,

    /// Position of the rover in the world frame
    ///
    /// Units: meters
    pub position_m: [f64; 2],

    /// Units: degrees
    pub yaw_deg: f64,

    /// Units: degrees
    pub pitch_deg: f64,

    /// Units: degrees
    pub roll_deg: f64,

    /// Current throttle setting reported by the simulator
    pub throttle: f64,

    /// Current steering angle reported by the simulator
    ///
    /// Units: degrees
    pub steering_angle_deg: f64,

    /// The camera frame, still base64 encoded.
    ///
    /// Decoding happens in the control loop, where a bad frame degrades the cycle instead of
    /// rejecting the whole event.
    pub image: String,
}

/// Actuation command sent to the simulator, with all values stringified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SteerCmd {
    pub throttle: String,
    pub brake: String,
    pub steering_angle: String,

    /// Base64 JPEG of the world map overlay, or empty
    pub inset_image: String,

    /// Base64 JPEG of the vision debug image, or empty
    pub inset_image3: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Events delivered from the simulator link to the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// The simulator has connected
    Connect,

    /// A telemetry event with its (possibly absent) payload
    Telemetry(Option<Value>),

    /// The simulator has disconnected
    Disconnect,
}

/// Events sent from the control loop to the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Steer(SteerCmd),
    Manual,
    GetSamples,
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Telemetry payload is not a mapping")]
    NotAMapping,

    #[error("Telemetry field {0:?} is missing")]
    MissingField(&'static str),

    #[error("Telemetry field {field:?} is not numeric: {value}")]
    NotNumeric {
        field: &'static str,
        value: String
    },

    #[error("Telemetry position {0:?} is not two comma-separated numbers")]
    InvalidPosition(String),

    #[error("Telemetry image is not a string")]
    ImageNotAString,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Telemetry {
    /// Validate and coerce a raw telemetry payload.
    ///
    /// Every field is checked before anything is returned, so a failure never yields a partially
    /// filled telemetry.
    pub fn from_payload(payload: &Value) -> Result<Self, TelemetryError> {
        let map = payload.as_object().ok_or(TelemetryError::NotAMapping)?;

        let image_str = match field(map, "image")? {
            Value::String(s) => s,
            _ => return Err(TelemetryError::ImageNotAString)
        };

        Ok(Self {
            speed_ms: scalar(map, "speed")?,
            position_m: position(map, "position")?,
            yaw_deg: scalar(map, "yaw")?,
            pitch_deg: scalar(map, "pitch")?,
            roll_deg: scalar(map, "roll")?,
            throttle: scalar(map, "throttle")?,
            steering_angle_deg: scalar(map, "steering_angle")?,
            image: image_str.clone(),
        })
    }
}

impl SteerCmd {
    /// Build a command from actuation values and the two encoded images.
    pub fn new(throttle: f64, brake: f64, steer: f64, inset_image: String, inset_image3: String) -> Self {
        Self {
            throttle: throttle.to_string(),
            brake: brake.to_string(),
            steering_angle: steer.to_string(),
            inset_image,
            inset_image3,
        }
    }

    /// The neutral command: no throttle, no brake, straight ahead, no images.
    pub fn neutral() -> Self {
        Self::new(0.0, 0.0, 0.0, String::new(), String::new())
    }
}

impl OutboundEvent {
    /// Name of the event on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Steer(_) => EVENT_STEER,
            OutboundEvent::Manual => EVENT_MANUAL,
            OutboundEvent::GetSamples => EVENT_GET_SAMPLES,
        }
    }

    /// Data argument of the event on the wire.
    pub fn data(&self) -> Value {
        match self {
            OutboundEvent::Steer(cmd) => json!(cmd),
            OutboundEvent::Manual | OutboundEvent::GetSamples => Value::Object(Map::new()),
        }
    }

    /// The Socket.IO packet carrying this event.
    pub fn to_sio_packet(&self) -> SioPacket {
        SioPacket::event(self.name(), self.data())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Returns true if the telemetry payload signals that manual control has been requested.
///
/// This is the case for an absent payload and for any empty or falsy payload (`null`, `false`,
/// `0`, empty string, array or mapping).
pub fn is_manual_payload(payload: Option<&Value>) -> bool {
    match payload {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn field<'a>(map: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, TelemetryError> {
    match map.get(name) {
        Some(Value::Null) | None => Err(TelemetryError::MissingField(name)),
        Some(v) => Ok(v)
    }
}

/// Coerce a scalar field, accepting numeric strings (including `nan` and `inf`) and numbers.
fn scalar(map: &Map<String, Value>, name: &'static str) -> Result<f64, TelemetryError> {
    let value = field(map, name)?;

    let parsed = match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None
    };

    parsed.ok_or_else(|| TelemetryError::NotNumeric {
        field: name,
        value: value.to_string()
    })
}

fn position(map: &Map<String, Value>, name: &'static str) -> Result<[f64; 2], TelemetryError> {
    let values: Option<Vec<f64>> = match field(map, name)? {
        Value::String(s) => s
            .split(',')
            .map(|v| v.trim().parse::<f64>().ok())
            .collect(),
        Value::Array(a) => a.iter().map(Value::as_f64).collect(),
        _ => None
    };

    match values.as_deref() {
        Some(&[x, y]) => Ok([x, y]),
        _ => Err(TelemetryError::InvalidPosition(map[name].to_string()))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn payload() -> Value {
        json!({
            "speed": "1.5",
            "position": "10.0,20.0",
            "yaw": "90.5",
            "pitch": "0.1",
            "roll": "359.9",
            "throttle": "0.2",
            "steering_angle": "-3",
            "image": base64::encode(b"jpeg bytes"),
        })
    }

    #[test]
    fn test_from_payload() {
        let tm = Telemetry::from_payload(&payload()).unwrap();

        assert_eq!(tm.speed_ms, 1.5);
        assert_eq!(tm.position_m, [10.0, 20.0]);
        assert_eq!(tm.yaw_deg, 90.5);
        assert_eq!(tm.pitch_deg, 0.1);
        assert_eq!(tm.roll_deg, 359.9);
        assert_eq!(tm.throttle, 0.2);
        assert_eq!(tm.steering_angle_deg, -3.0);
        assert_eq!(tm.image, base64::encode(b"jpeg bytes"));
    }

    #[test]
    fn test_non_finite_speed_parses() {
        let mut p = payload();
        p["speed"] = json!("nan");
        assert!(Telemetry::from_payload(&p).unwrap().speed_ms.is_nan());

        p["speed"] = json!("inf");
        assert!(Telemetry::from_payload(&p).unwrap().speed_ms.is_infinite());
    }

    #[test]
    fn test_numbers_accepted() {
        let mut p = payload();
        p["speed"] = json!(2);
        p["position"] = json!(" 1.5, -2 ");
        let tm = Telemetry::from_payload(&p).unwrap();
        assert_eq!(tm.speed_ms, 2.0);
        assert_eq!(tm.position_m, [1.5, -2.0]);
    }

    #[test]
    fn test_invalid_payloads() {
        let mut p = payload();
        p.as_object_mut().unwrap().remove("yaw");
        assert!(matches!(
            Telemetry::from_payload(&p),
            Err(TelemetryError::MissingField("yaw"))
        ));

        let mut p = payload();
        p["pitch"] = json!("level");
        assert!(matches!(
            Telemetry::from_payload(&p),
            Err(TelemetryError::NotNumeric { field: "pitch", .. })
        ));

        let mut p = payload();
        p["position"] = json!("1.0,2.0,3.0");
        assert!(matches!(
            Telemetry::from_payload(&p),
            Err(TelemetryError::InvalidPosition(_))
        ));

        let mut p = payload();
        p["image"] = json!(42);
        assert!(matches!(
            Telemetry::from_payload(&p),
            Err(TelemetryError::ImageNotAString)
        ));

        assert!(matches!(
            Telemetry::from_payload(&json!([1, 2])),
            Err(TelemetryError::NotAMapping)
        ));
    }

    #[test]
    fn test_bad_base64_image_still_parses() {
        let mut p = payload();
        p["image"] = json!("%%%not-base64%%%");

        let tm = Telemetry::from_payload(&p).unwrap();
        assert_eq!(tm.speed_ms, 1.5);
        assert_eq!(tm.image, "%%%not-base64%%%");
    }

    #[test]
    fn test_is_manual_payload() {
        assert!(is_manual_payload(None));
        assert!(is_manual_payload(Some(&Value::Null)));
        assert!(is_manual_payload(Some(&json!({}))));
        assert!(is_manual_payload(Some(&json!(""))));
        assert!(!is_manual_payload(Some(&payload())));
    }

    #[test]
    fn test_steer_cmd_strings() {
        let cmd = SteerCmd::new(0.2, 10.0, -15.0, "a".into(), "b".into());
        assert_eq!(cmd.throttle, "0.2");
        assert_eq!(cmd.brake, "10");
        assert_eq!(cmd.steering_angle, "-15");

        let neutral = SteerCmd::neutral();
        assert_eq!(neutral.throttle, "0");
        assert_eq!(neutral.brake, "0");
        assert_eq!(neutral.steering_angle, "0");
        assert!(neutral.inset_image.is_empty() && neutral.inset_image3.is_empty());
    }

    #[test]
    fn test_outbound_packets() {
        assert_eq!(OutboundEvent::Manual.to_sio_packet().encode(), "2[\"manual\",{}]");
        assert_eq!(OutboundEvent::GetSamples.to_sio_packet().encode(), "2[\"get_samples\",{}]");

        let steer = OutboundEvent::Steer(SteerCmd::new(0.2, 0.0, -15.0, "map".into(), String::new())).data();
        assert_eq!(steer, json!({
            "throttle": "0.2",
            "brake": "0",
            "steering_angle": "-15",
            "inset_image": "map",
            "inset_image3": "",
        }));
    }
}
