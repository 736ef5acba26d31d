use std::sync::Arc;
use std::time::Duration;

use sonic_rs::{JsonValueTrait, Value};
use tracing::{debug, warn};

use crate::core::envelope::{self, Decoded, GatewayEvent};
use crate::core::opcode::OpCode;
use crate::core::session::SessionShared;
use crate::core::{GatewayError, WsFrame, frame_bytes};

/// Control signal extracted from an inbound frame and forwarded to the
/// lifecycle controller.
#[derive(Debug)]
pub(crate) enum ControlEvent {
    /// Server-initiated HEARTBEAT: reply immediately, timer untouched.
    HeartbeatRequest,
    /// RECONNECT opcode: resumable teardown.
    Reconnect,
    InvalidSession {
        resumable: bool,
    },
    Hello {
        heartbeat_interval: Duration,
    },
    /// ACK observed; `rtt` present when a heartbeat was actually pending.
    HeartbeatAck {
        rtt: Option<Duration>,
    },
    /// READY dispatch, with its payload for session/roster extraction.
    Ready {
        payload: Value,
    },
    GuildCreate {
        payload: Value,
    },
    Resumed,
}

/// What the reader should do with a frame it just pulled off the wire.
#[derive(Debug)]
pub(crate) enum Routed {
    /// DISPATCH: hand the event to the consumer, then forward the optional
    /// control observation to the actor.
    Deliver {
        event: GatewayEvent,
        control: Option<ControlEvent>,
    },
    /// Control frame for the actor only.
    Control(ControlEvent),
    /// Nothing to do (unknown opcode, ws ping/pong, ...).
    Ignore,
    /// Server sent a close frame or the stream is over.
    Remote {
        code: Option<u16>,
        reason: String,
    },
    /// Protocol violation; the session is done for.
    Fatal(GatewayError),
}

/// Tight-loop frame demultiplexer run by the reader task, outside the actor.
///
/// Owns the dispatch-path side effects that must happen before delivery:
/// recording the sequence number and completing the heartbeat ack cycle.
pub(crate) struct FrameRouter {
    shared: Arc<SessionShared>,
}

impl FrameRouter {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn route(&self, frame: &WsFrame) -> Routed {
        let payload = match frame {
            WsFrame::Close(close) => {
                return Routed::Remote {
                    code: close.as_ref().map(|f| f.code),
                    reason: close
                        .as_ref()
                        .map(|f| f.reason_text())
                        .unwrap_or_else(|| "connection closed".to_string()),
                };
            }
            // The gateway speaks JSON text; websocket-level ping/pong is
            // handled by the transport and carries no protocol meaning here.
            WsFrame::Ping(_) | WsFrame::Pong(_) => return Routed::Ignore,
            _ => match frame_bytes(frame) {
                Some(bytes) => bytes,
                None => return Routed::Ignore,
            },
        };

        let decoded = match envelope::decode(payload) {
            Ok(decoded) => decoded,
            Err(err) => return Routed::Fatal(err),
        };

        let (op, d, s, t) = match decoded {
            Decoded::Known { op, d, s, t } => (op, d, s, t),
            Decoded::Unknown { op } => {
                debug!(op, "ignoring unknown gateway opcode");
                return Routed::Ignore;
            }
        };

        if !op.is_server_op() {
            warn!(%op, "server sent a client-only opcode; ignoring");
            return Routed::Ignore;
        }

        match op {
            OpCode::Dispatch => self.route_dispatch(d, s, t),
            OpCode::Heartbeat => Routed::Control(ControlEvent::HeartbeatRequest),
            OpCode::Reconnect => Routed::Control(ControlEvent::Reconnect),
            OpCode::InvalidSession => Routed::Control(ControlEvent::InvalidSession {
                resumable: d.as_ref().and_then(|v| v.as_bool()).unwrap_or(false),
            }),
            OpCode::Hello => match d.get("heartbeat_interval").as_u64() {
                Some(ms) => Routed::Control(ControlEvent::Hello {
                    heartbeat_interval: Duration::from_millis(ms),
                }),
                None => Routed::Fatal(GatewayError::Protocol(
                    "HELLO missing heartbeat_interval".to_string(),
                )),
            },
            OpCode::HeartbeatAck => Routed::Control(ControlEvent::HeartbeatAck {
                rtt: self.shared.liveness.acknowledge(),
            }),
            // is_server_op filtered the rest already
            _ => Routed::Ignore,
        }
    }

    fn route_dispatch(&self, d: Option<Value>, s: Option<u64>, t: Option<String>) -> Routed {
        let Some(seq) = s else {
            return Routed::Fatal(GatewayError::Protocol(
                "DISPATCH missing sequence number".to_string(),
            ));
        };
        let Some(name) = t else {
            return Routed::Fatal(GatewayError::Protocol(
                "DISPATCH missing event name".to_string(),
            ));
        };

        // The sequence must be visible to the heartbeat and to RESUME
        // construction before the consumer ever sees this event.
        self.shared.sequence.record(seq);
        self.shared.count_event();

        let payload = d.unwrap_or_default();
        let control = match name.as_str() {
            "READY" => Some(ControlEvent::Ready {
                payload: payload.clone(),
            }),
            "GUILD_CREATE" => Some(ControlEvent::GuildCreate {
                payload: payload.clone(),
            }),
            "RESUMED" => Some(ControlEvent::Resumed),
            _ => None,
        };

        Routed::Deliver {
            event: GatewayEvent { name, payload },
            control,
        }
    }
}
