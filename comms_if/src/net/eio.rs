//! # Engine.IO framing
//!
//! Every WebSocket text message is one Engine.IO packet: a single digit packet type followed by
//! an optional payload. Revisions 3 and 4 share the packet encoding but differ in who pings whom.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use super::PacketError;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Payload of the open packet sent by the server when a session starts.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Engine.IO protocol revision negotiated through the `EIO` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EioVersion {
    /// Client pings, server pongs. Socket.IO connect is implicit on the default namespace.
    V3,

    /// Server pings, client pongs. The client must send an explicit Socket.IO connect.
    V4,
}

/// A single Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EioPacket {
    Open(String),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EioVersion {
    /// Determine the revision from a request query string such as
    /// `EIO=3&transport=websocket`, falling back to `default` when absent or unrecognised.
    pub fn from_query(query: Option<&str>, default: EioVersion) -> EioVersion {
        let value = query
            .into_iter()
            .flat_map(|q| q.split('&'))
            .filter_map(|pair| {
                let mut kv = pair.splitn(2, '=');
                match (kv.next(), kv.next()) {
                    (Some("EIO"), Some(v)) => Some(v),
                    _ => None
                }
            })
            .next();

        match value {
            Some("3") => EioVersion::V3,
            Some("4") => EioVersion::V4,
            _ => default
        }
    }

    /// Build a revision from its number, as found in parameter files.
    pub fn from_number(n: u8) -> Option<EioVersion> {
        match n {
            3 => Some(EioVersion::V3),
            4 => Some(EioVersion::V4),
            _ => None
        }
    }
}

impl Handshake {
    /// Build the handshake for the given revision. Only revision 4 advertises `maxPayload`.
    pub fn new(sid: String, version: EioVersion, ping_interval_ms: u64, ping_timeout_ms: u64) -> Self {
        Self {
            sid,
            upgrades: Vec::new(),
            ping_interval: ping_interval_ms,
            ping_timeout: ping_timeout_ms,
            max_payload: match version {
                EioVersion::V3 => None,
                EioVersion::V4 => Some(1_000_000),
            },
        }
    }

    /// The open packet carrying this handshake.
    pub fn to_packet(&self) -> Result<EioPacket, serde_json::Error> {
        Ok(EioPacket::Open(serde_json::to_string(self)?))
    }
}

impl EioPacket {
    /// Parse a packet from a WebSocket text message.
    pub fn parse(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();

        let packet_type = chars.next().ok_or(PacketError::Empty)?;
        let payload = chars.as_str().to_string();

        match packet_type {
            '0' => Ok(EioPacket::Open(payload)),
            '1' => Ok(EioPacket::Close),
            '2' => Ok(EioPacket::Ping(payload)),
            '3' => Ok(EioPacket::Pong(payload)),
            '4' => Ok(EioPacket::Message(payload)),
            '5' => Ok(EioPacket::Upgrade),
            '6' => Ok(EioPacket::Noop),
            // Revision 3 prefixes binary frames sent as text with 'b'
            'b' => Err(PacketError::BinaryUnsupported),
            c => Err(PacketError::UnknownType(c))
        }
    }

    /// Encode the packet as a WebSocket text message.
    pub fn encode(&self) -> String {
        match self {
            EioPacket::Open(p) => format!("0{}", p),
            EioPacket::Close => String::from("1"),
            EioPacket::Ping(p) => format!("2{}", p),
            EioPacket::Pong(p) => format!("3{}", p),
            EioPacket::Message(p) => format!("4{}", p),
            EioPacket::Upgrade => String::from("5"),
            EioPacket::Noop => String::from("6"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(EioPacket::parse("2"), Ok(EioPacket::Ping(String::new())));
        assert_eq!(EioPacket::parse("2hello"), Ok(EioPacket::Ping("hello".into())));
        assert_eq!(EioPacket::parse("3"), Ok(EioPacket::Pong(String::new())));
        assert_eq!(EioPacket::parse("1"), Ok(EioPacket::Close));
        assert_eq!(
            EioPacket::parse("42[\"telemetry\",{}]"),
            Ok(EioPacket::Message("2[\"telemetry\",{}]".into()))
        );
        assert_eq!(EioPacket::parse(""), Err(PacketError::Empty));
        assert_eq!(EioPacket::parse("9"), Err(PacketError::UnknownType('9')));
        assert_eq!(EioPacket::parse("b4AAAA"), Err(PacketError::BinaryUnsupported));
    }

    #[test]
    fn test_encode() {
        assert_eq!(EioPacket::Pong("hello".into()).encode(), "3hello");
        assert_eq!(EioPacket::Message("40".into()).encode(), "440");
        assert_eq!(EioPacket::Close.encode(), "1");
    }

    #[test]
    fn test_version_from_query() {
        assert_eq!(
            EioVersion::from_query(Some("EIO=3&transport=websocket"), EioVersion::V4),
            EioVersion::V3
        );
        assert_eq!(
            EioVersion::from_query(Some("transport=websocket&EIO=4"), EioVersion::V3),
            EioVersion::V4
        );
        assert_eq!(EioVersion::from_query(None, EioVersion::V3), EioVersion::V3);
        assert_eq!(EioVersion::from_query(Some("EIO=9"), EioVersion::V4), EioVersion::V4);
    }

    #[test]
    fn test_handshake() {
        let hs = Handshake::new("abc".into(), EioVersion::V3, 25000, 20000);
        assert_eq!(
            hs.to_packet().unwrap().encode(),
            "0{\"sid\":\"abc\",\"upgrades\":[],\"pingInterval\":25000,\"pingTimeout\":20000}"
        );

        let hs = Handshake::new("abc".into(), EioVersion::V4, 25000, 20000);
        assert!(hs.to_packet().unwrap().encode().ends_with("\"maxPayload\":1000000}"));
    }
}
