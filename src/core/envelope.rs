use serde::Deserialize;
use sonic_rs::Value;

use super::opcode::OpCode;
use super::types::{GatewayError, GatewayResult};

/// Decoded inbound wire envelope: `{op, d, s?, t?}`.
///
/// `s` and `t` are only populated for DISPATCH frames; `d` stays opaque
/// until an opcode handler gives it meaning.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Value>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// An inbound envelope with its opcode resolved against the known table.
#[derive(Debug)]
pub enum Decoded {
    Known {
        op: OpCode,
        d: Option<Value>,
        s: Option<u64>,
        t: Option<String>,
    },
    /// Forward-compatible: an opcode this engine does not know about.
    Unknown { op: u8 },
}

/// Parse one websocket message payload into a gateway envelope.
///
/// Malformed JSON is a protocol violation: the server controls this channel
/// and is not allowed to send garbage.
pub fn decode(payload: &[u8]) -> GatewayResult<Decoded> {
    let envelope: InboundEnvelope = sonic_rs::from_slice(payload)
        .map_err(|err| GatewayError::Protocol(format!("malformed gateway frame: {err}")))?;

    match OpCode::from_u8(envelope.op) {
        Some(op) => Ok(Decoded::Known {
            op,
            d: envelope.d,
            s: envelope.s,
            t: envelope.t,
        }),
        None => Ok(Decoded::Unknown { op: envelope.op }),
    }
}

/// A decoded DISPATCH payload as delivered to the consumer.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    /// Event name from the envelope's `t` field, e.g. `MESSAGE_CREATE`.
    pub name: String,
    /// Opaque event data from the envelope's `d` field.
    pub payload: Value,
}
