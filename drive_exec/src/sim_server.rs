//! # Simulator Server
//!
//! WebSocket server the simulator connects to. Each WebSocket text message carries one Engine.IO
//! packet, which in turn carries Socket.IO packets on the default namespace.
//!
//! Connections are served one at a time. While a simulator is connected the server:
//!  - Forwards `telemetry` events to the control loop, waiting when the loop's queue is full
//!  - Writes events from the control loop's outbound queue onto the socket
//!  - Answers client pings (Engine.IO 3) or sends its own pings and drops silent clients
//!    (Engine.IO 4)
//!
//! The control loop is sent `Connect` when the Socket.IO connect completes and `Disconnect` when
//! a connected session ends for any reason.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use serde_json::json;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{self, Instant},
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        self,
        handshake::server::{ErrorResponse, Request, Response},
        Message,
    },
    WebSocketStream,
};
use uuid::Uuid;

use comms_if::{
    net::{sio::DEFAULT_NAMESPACE, EioPacket, EioVersion, Handshake, NetParams, SioPacket},
    sim::{OutboundEvent, SimEvent, EVENT_TELEMETRY},
};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct SimServer {
    params: NetParams,

    /// Revision used when the client does not ask for one
    default_version: EioVersion,
}

/// One simulator session on an accepted connection.
struct Session {
    sid: String,

    version: EioVersion,

    /// True once the Socket.IO connect has completed
    connected: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimServerError {
    #[error("Cannot bind the simulator server to {0}: {1}")]
    BindError(String, std::io::Error),

    #[error("Unsupported default Engine.IO revision {0}, expected 3 or 4")]
    InvalidEioVersion(u8),

    #[error("The control loop is no longer accepting events")]
    LoopClosed,
}

/// Reasons a single session ends abnormally.
#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(tungstenite::Error),

    #[error("WebSocket error: {0}")]
    Ws(tungstenite::Error),

    #[error("Cannot serialise the handshake: {0}")]
    Serialise(serde_json::Error),

    #[error("No response from the client within {0} ms")]
    PingTimeout(u64),

    #[error("The control loop is no longer accepting events")]
    LoopClosed,
}

/// What to do with a packet received from the client.
#[derive(Debug, Clone, PartialEq)]
enum Inbound {
    /// Send the packet back to the client
    Reply(EioPacket),

    /// The Socket.IO connect completed, with an optional acknowledgement for the client
    Connected(Option<EioPacket>),

    /// Pass the event on to the control loop
    Forward(SimEvent),

    /// The client is closing the session
    Close,

    Ignore,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimServer {
    pub fn new(params: NetParams) -> Result<Self, SimServerError> {
        let default_version = EioVersion::from_number(params.default_eio_version)
            .ok_or(SimServerError::InvalidEioVersion(params.default_eio_version))?;

        Ok(Self {
            params,
            default_version,
        })
    }

    /// Accept and serve simulator connections until the control loop goes away.
    pub async fn run(
        self,
        events_tx: mpsc::Sender<SimEvent>,
        mut out_rx: mpsc::Receiver<OutboundEvent>
    ) -> Result<(), SimServerError> {
        let endpoint = self.params.bind_endpoint();

        let listener = TcpListener::bind(&endpoint)
            .await
            .map_err(|e| SimServerError::BindError(endpoint.clone(), e))?;

        info!("Waiting for the simulator on {}", endpoint);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(s) => s,
                Err(e) => {
                    warn!("Failed to accept a connection: {}", e);
                    continue;
                }
            };

            info!("Connection from {}", peer);

            // Anything still queued was meant for the previous session
            let mut stale = 0;
            while out_rx.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                debug!("Discarded {} outbound events from the previous session", stale);
            }

            let mut session = Session {
                sid: Uuid::new_v4().to_string(),
                version: self.default_version,
                connected: false,
            };

            let result = self.serve(stream, &mut session, &events_tx, &mut out_rx).await;

            match result {
                Ok(()) => info!("Session {} with {} closed", session.sid, peer),
                Err(SessionError::LoopClosed) => return Err(SimServerError::LoopClosed),
                Err(e) => warn!("Session {} with {} ended: {}", session.sid, peer, e)
            }

            if session.connected {
                events_tx.send(SimEvent::Disconnect)
                    .await
                    .map_err(|_| SimServerError::LoopClosed)?;
            }
        }
    }

    async fn serve(
        &self,
        stream: TcpStream,
        session: &mut Session,
        events_tx: &mpsc::Sender<SimEvent>,
        out_rx: &mut mpsc::Receiver<OutboundEvent>
    ) -> Result<(), SessionError> {
        // The Engine.IO revision is given in the upgrade request's query string
        let mut query: Option<String> = None;
        let ws = accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                query = req.uri().query().map(String::from);
                Ok(resp)
            }
        )
        .await
        .map_err(SessionError::Handshake)?;

        session.version = EioVersion::from_query(query.as_deref(), self.default_version);
        debug!("Session {} using Engine.IO {:?}", session.sid, session.version);

        let (mut ws_tx, mut ws_rx) = ws.split();

        let handshake = Handshake::new(
            session.sid.clone(),
            session.version,
            self.params.ping_interval_ms,
            self.params.ping_timeout_ms
        );
        send(&mut ws_tx, handshake.to_packet().map_err(SessionError::Serialise)?).await?;

        // Revision 3 clients are connected to the default namespace without asking
        if session.version == EioVersion::V3 {
            let connect = SioPacket::Connect { namespace: DEFAULT_NAMESPACE.into(), data: None };
            send(&mut ws_tx, EioPacket::Message(connect.encode())).await?;
            mark_connected(session, events_tx).await?;
        }

        let ping_period = Duration::from_millis(self.params.ping_interval_ms.max(1));
        let silence_limit_ms = self.params.ping_interval_ms + self.params.ping_timeout_ms;
        let mut ping_timer = time::interval_at(Instant::now() + ping_period, ping_period);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();

                        match classify(text.as_str(), session) {
                            Inbound::Reply(packet) => send(&mut ws_tx, packet).await?,
                            Inbound::Connected(ack) => {
                                if let Some(packet) = ack {
                                    send(&mut ws_tx, packet).await?;
                                }
                                mark_connected(session, events_tx).await?;
                            },
                            Inbound::Forward(event) => events_tx.send(event)
                                .await
                                .map_err(|_| SessionError::LoopClosed)?,
                            Inbound::Close => return Ok(()),
                            Inbound::Ignore => ()
                        }
                    },
                    Some(Ok(Message::Binary(_))) => warn!("Ignoring binary WebSocket message"),
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    // WebSocket level pings are answered by tungstenite
                    Some(Ok(_)) => (),
                    Some(Err(e)) => return Err(SessionError::Ws(e))
                },
                out = out_rx.recv(), if session.connected => match out {
                    Some(event) => {
                        trace!("Sending {:?} event", event.name());
                        send(&mut ws_tx, EioPacket::Message(event.to_sio_packet().encode())).await?
                    },
                    None => return Err(SessionError::LoopClosed)
                },
                _ = ping_timer.tick(), if session.version == EioVersion::V4 => {
                    if last_seen.elapsed() > Duration::from_millis(silence_limit_ms) {
                        return Err(SessionError::PingTimeout(silence_limit_ms))
                    }
                    send(&mut ws_tx, EioPacket::Ping(String::new())).await?;
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

async fn send(ws_tx: &mut WsSink, packet: EioPacket) -> Result<(), SessionError> {
    ws_tx.send(Message::Text(packet.encode().into()))
        .await
        .map_err(SessionError::Ws)
}

/// Mark the session connected and tell the control loop.
async fn mark_connected(
    session: &mut Session, 
    events_tx: &mpsc::Sender<SimEvent>
) -> Result<(), SessionError> {
    session.connected = true;
    info!("Simulator session {} connected", session.sid);

    events_tx.send(SimEvent::Connect)
        .await
        .map_err(|_| SessionError::LoopClosed)
}

/// Decide what to do with a text message from the client.
fn classify(text: &str, session: &Session) -> Inbound {
    let packet = match EioPacket::parse(text) {
        Ok(p) => p,
        Err(e) => {
            warn!("Ignoring Engine.IO packet: {}", e);
            return Inbound::Ignore
        }
    };

    match packet {
        EioPacket::Ping(payload) => Inbound::Reply(EioPacket::Pong(payload)),
        EioPacket::Close => Inbound::Close,
        EioPacket::Message(payload) => classify_sio(&payload, session),
        p => {
            trace!("Ignoring Engine.IO packet {:?}", p);
            Inbound::Ignore
        }
    }
}

fn classify_sio(payload: &str, session: &Session) -> Inbound {
    let packet = match SioPacket::parse(payload) {
        Ok(p) => p,
        Err(e) => {
            warn!("Ignoring Socket.IO packet: {}", e);
            return Inbound::Ignore
        }
    };

    match packet {
        SioPacket::Connect { namespace, .. } if namespace != DEFAULT_NAMESPACE => {
            warn!("Client asked for unknown namespace {:?}", namespace);
            let err = SioPacket::ConnectError {
                namespace,
                data: Some(json!({ "message": "Invalid namespace" }))
            };
            Inbound::Reply(EioPacket::Message(err.encode()))
        },
        SioPacket::Connect { .. } if session.connected => Inbound::Ignore,
        SioPacket::Connect { .. } => match session.version {
            EioVersion::V3 => Inbound::Connected(None),
            EioVersion::V4 => {
                let ack = SioPacket::Connect {
                    namespace: DEFAULT_NAMESPACE.into(),
                    data: Some(json!({ "sid": session.sid }))
                };
                Inbound::Connected(Some(EioPacket::Message(ack.encode())))
            }
        },
        SioPacket::Disconnect { .. } => Inbound::Close,
        SioPacket::Event { name, args, .. } => {
            if !session.connected {
                warn!("Ignoring {:?} event received before connect", name);
                Inbound::Ignore
            }
            else if name == EVENT_TELEMETRY {
                Inbound::Forward(SimEvent::Telemetry(args.into_iter().next()))
            }
            else {
                debug!("Ignoring unknown event {:?}", name);
                Inbound::Ignore
            }
        },
        p => {
            trace!("Ignoring Socket.IO packet {:?}", p);
            Inbound::Ignore
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
