//! # Socket.IO framing
//!
//! Socket.IO packets travel inside Engine.IO message packets and have the form
//! `<type>[<namespace>,][<ack id>][<json>]`. Events are JSON arrays whose first element is the
//! event name.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde_json::Value;

use super::PacketError;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The default namespace, which is omitted on the wire.
pub const DEFAULT_NAMESPACE: &str = "/";

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A single Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SioPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SioPacket {
    /// Build an event on the default namespace with a single data argument.
    pub fn event(name: &str, data: Value) -> Self {
        SioPacket::Event {
            namespace: DEFAULT_NAMESPACE.into(),
            id: None,
            name: name.into(),
            args: vec![data],
        }
    }

    /// Parse a packet from the payload of an Engine.IO message.
    pub fn parse(payload: &str) -> Result<Self, PacketError> {
        let mut chars = payload.chars();
        let packet_type = chars.next().ok_or(PacketError::Empty)?;
        let mut rest = chars.as_str();

        // Namespace, only present when it isn't the default one
        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        }
        else {
            DEFAULT_NAMESPACE.to_string()
        };

        // Acknowledgement ID
        let id_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let id = if id_len > 0 {
            Some(rest[..id_len].parse::<u64>().map_err(|e| {
                PacketError::Malformed(format!("invalid ack id: {}", e))
            })?)
        }
        else {
            None
        };
        rest = &rest[id_len..];

        // JSON data
        let data = if rest.is_empty() {
            None
        }
        else {
            Some(serde_json::from_str::<Value>(rest).map_err(|e| {
                PacketError::Malformed(format!("invalid JSON data: {}", e))
            })?)
        };

        match packet_type {
            '0' => Ok(SioPacket::Connect { namespace, data }),
            '1' => Ok(SioPacket::Disconnect { namespace }),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(a)) => a,
                    _ => return Err(PacketError::Malformed("event data is not an array".into()))
                };

                if args.is_empty() {
                    return Err(PacketError::Malformed("event has no name".into()))
                }

                let name = match args.remove(0) {
                    Value::String(s) => s,
                    v => return Err(PacketError::Malformed(format!("invalid event name {}", v)))
                };

                Ok(SioPacket::Event { namespace, id, name, args })
            },
            '3' => {
                let id = id.ok_or_else(|| PacketError::Malformed("ack without an id".into()))?;
                let args = match data {
                    Some(Value::Array(a)) => a,
                    None => Vec::new(),
                    _ => return Err(PacketError::Malformed("ack data is not an array".into()))
                };

                Ok(SioPacket::Ack { namespace, id, args })
            },
            '4' => Ok(SioPacket::ConnectError { namespace, data }),
            '5' | '6' => Err(PacketError::BinaryUnsupported),
            c => Err(PacketError::UnknownType(c))
        }
    }

    /// Encode the packet as the payload of an Engine.IO message.
    pub fn encode(&self) -> String {
        match self {
            SioPacket::Connect { namespace, data } => 
                format!("0{}{}", ns_prefix(namespace), opt_json(data)),
            SioPacket::Disconnect { namespace } =>
                format!("1{}", ns_prefix(namespace)),
            SioPacket::Event { namespace, id, name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());

                format!(
                    "2{}{}{}",
                    ns_prefix(namespace),
                    id.map(|i| i.to_string()).unwrap_or_default(),
                    Value::Array(array)
                )
            },
            SioPacket::Ack { namespace, id, args } =>
                format!("3{}{}{}", ns_prefix(namespace), id, Value::Array(args.clone())),
            SioPacket::ConnectError { namespace, data } =>
                format!("4{}{}", ns_prefix(namespace), opt_json(data)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Namespace prefix as it appears on the wire, empty for the default namespace.
fn ns_prefix(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        String::new()
    }
    else {
        format!("{},", namespace)
    }
}

fn opt_json(data: &Option<Value>) -> String {
    match data {
        Some(v) => v.to_string(),
        None => String::new()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_event() {
        let p = SioPacket::parse("2[\"telemetry\",{\"speed\":\"0.5\"}]").unwrap();
        assert_eq!(p, SioPacket::Event {
            namespace: "/".into(),
            id: None,
            name: "telemetry".into(),
            args: vec![json!({"speed": "0.5"})],
        });

        // Event without data, as sent when the simulator hands over to manual control
        let p = SioPacket::parse("2[\"telemetry\"]").unwrap();
        match p {
            SioPacket::Event { name, args, .. } => {
                assert_eq!(name, "telemetry");
                assert!(args.is_empty());
            },
            p => panic!("Expected event, got {:?}", p)
        }
    }

    #[test]
    fn test_parse_namespace_and_id() {
        let p = SioPacket::parse("2/rover,12[\"telemetry\",null]").unwrap();
        assert_eq!(p, SioPacket::Event {
            namespace: "/rover".into(),
            id: Some(12),
            name: "telemetry".into(),
            args: vec![Value::Null],
        });

        assert_eq!(
            SioPacket::parse("0").unwrap(),
            SioPacket::Connect { namespace: "/".into(), data: None }
        );
        assert_eq!(
            SioPacket::parse("1/rover,").unwrap(),
            SioPacket::Disconnect { namespace: "/rover".into() }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(SioPacket::parse(""), Err(PacketError::Empty));
        assert_eq!(SioPacket::parse("5[]"), Err(PacketError::BinaryUnsupported));
        assert!(matches!(SioPacket::parse("2{}"), Err(PacketError::Malformed(_))));
        assert!(matches!(SioPacket::parse("2[]"), Err(PacketError::Malformed(_))));
        assert!(matches!(SioPacket::parse("2[1]"), Err(PacketError::Malformed(_))));
        assert!(matches!(SioPacket::parse("2[\"x\""), Err(PacketError::Malformed(_))));
    }

    #[test]
    fn test_encode() {
        assert_eq!(
            SioPacket::event("manual", json!({})).encode(),
            "2[\"manual\",{}]"
        );
        assert_eq!(
            SioPacket::Connect { namespace: "/".into(), data: Some(json!({"sid": "x"})) }.encode(),
            "0{\"sid\":\"x\"}"
        );
        assert_eq!(
            SioPacket::Ack { namespace: "/rover".into(), id: 3, args: vec![] }.encode(),
            "3/rover,3[]"
        );
    }
}
