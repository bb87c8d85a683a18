//! # Network Module
//!
//! The simulator talks Socket.IO, which is layered on Engine.IO, carried over a WebSocket. This
//! module provides the parameters of the server socket and codecs for both framing layers. The
//! socket itself lives with the executable that owns it.
//!
//! Only the WebSocket transport is supported; HTTP long-polling and binary attachments are not.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Engine.IO packet codec and handshake
pub mod eio;

/// Socket.IO packet codec
pub mod sio;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

pub use eio::{EioPacket, EioVersion, Handshake};
pub use sio::SioPacket;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters for the simulator link.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetParams {
    /// Address the server binds to
    pub bind_addr: String,

    /// Port the server listens on
    pub port: u16,

    /// Engine.IO protocol revision assumed when the client does not give an `EIO` query
    /// parameter
    pub default_eio_version: u8,

    /// Interval between server pings (Engine.IO 4) and the value advertised in the handshake.
    ///
    /// Units: milliseconds
    pub ping_interval_ms: u64,

    /// Time after a missed ping before the client is considered lost.
    ///
    /// Units: milliseconds
    pub ping_timeout_ms: u64,

    /// Maximum number of inbound events waiting for the control loop before the connection stops
    /// reading from the socket
    pub event_queue_depth: usize,

    /// Maximum number of outbound events waiting to be written before new ones are dropped
    pub outbound_queue_depth: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised while parsing a packet from the wire.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PacketError {
    #[error("Received an empty packet")]
    Empty,

    #[error("Unknown packet type {0:?}")]
    UnknownType(char),

    #[error("Binary packets are not supported")]
    BinaryUnsupported,

    #[error("Malformed packet: {0}")]
    Malformed(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NetParams {
    fn default() -> Self {
        Self {
            bind_addr: String::from("0.0.0.0"),
            port: 4567,
            default_eio_version: 4,
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
            event_queue_depth: 8,
            outbound_queue_depth: 16,
        }
    }
}

impl NetParams {
    /// The `host:port` string the server binds to.
    pub fn bind_endpoint(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}
