use serde::Serialize;
use sonic_rs::Value;

use super::frame::WsFrame;
use super::opcode::OpCode;
use super::types::{GatewayError, GatewayResult};

/// Client properties reported in the IDENTIFY payload.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        let lib = concat!("discord-gateway/", env!("CARGO_PKG_VERSION"));
        Self {
            os: std::env::consts::OS.to_string(),
            browser: lib.to_string(),
            device: lib.to_string(),
        }
    }
}

/// IDENTIFY body (opcode 2). Built only by the lifecycle controller.
#[derive(Clone, Serialize)]
pub struct Identify {
    pub token: String,
    pub properties: ConnectionProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<Value>,
}

impl std::fmt::Debug for Identify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identify")
            .field("token", &"<redacted>")
            .field("properties", &self.properties)
            .field("shard", &self.shard)
            .field("compress", &self.compress)
            .finish_non_exhaustive()
    }
}

/// RESUME body (opcode 6). Built only by the lifecycle controller.
#[derive(Clone, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: Option<u64>,
}

impl std::fmt::Debug for Resume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resume")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}

/// A frame queued for transmission.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// Heartbeat carrying the last observed sequence (null when absent).
    Heartbeat { seq: Option<u64> },
    Identify(Box<Identify>),
    Resume(Resume),
    PresenceUpdate(Value),
    VoiceStateUpdate(Value),
    RequestGuildMembers(Value),
    /// Escape hatch for opcodes this enum does not model.
    Raw { op: u8, d: Value },
}

#[derive(Serialize)]
struct Carrier<'a, D: Serialize> {
    op: u8,
    d: &'a D,
}

fn encode_with<D: Serialize>(op: u8, d: &D) -> GatewayResult<WsFrame> {
    let text = sonic_rs::to_string(&Carrier { op, d })
        .map_err(|err| GatewayError::Encode(err.to_string()))?;
    Ok(WsFrame::text(text))
}

impl OutboundFrame {
    pub fn op(&self) -> u8 {
        match self {
            Self::Heartbeat { .. } => OpCode::Heartbeat.as_u8(),
            Self::Identify(_) => OpCode::Identify.as_u8(),
            Self::Resume(_) => OpCode::Resume.as_u8(),
            Self::PresenceUpdate(_) => OpCode::PresenceUpdate.as_u8(),
            Self::VoiceStateUpdate(_) => OpCode::VoiceStateUpdate.as_u8(),
            Self::RequestGuildMembers(_) => OpCode::RequestGuildMembers.as_u8(),
            Self::Raw { op, .. } => *op,
        }
    }

    /// Short identifier used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::Identify(_) => "identify",
            Self::Resume(_) => "resume",
            Self::PresenceUpdate(_) => "presence_update",
            Self::VoiceStateUpdate(_) => "voice_state_update",
            Self::RequestGuildMembers(_) => "request_guild_members",
            Self::Raw { .. } => "raw",
        }
    }

    /// Serialize to a text websocket frame carrying the `{op, d}` envelope.
    pub fn encode(&self) -> GatewayResult<WsFrame> {
        match self {
            // `d` must be present (null when no sequence was seen yet).
            Self::Heartbeat { seq } => encode_with(self.op(), seq),
            Self::Identify(body) => encode_with(self.op(), body.as_ref()),
            Self::Resume(body) => encode_with(self.op(), body),
            Self::PresenceUpdate(d)
            | Self::VoiceStateUpdate(d)
            | Self::RequestGuildMembers(d)
            | Self::Raw { d, .. } => encode_with(self.op(), d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::frame_bytes;
    use sonic_rs::JsonValueTrait;

    fn encoded_value(frame: &OutboundFrame) -> Value {
        let wire = frame.encode().expect("encode");
        sonic_rs::from_slice(frame_bytes(&wire).expect("payload")).expect("valid json")
    }

    #[test]
    fn heartbeat_without_sequence_sends_null() {
        let value = encoded_value(&OutboundFrame::Heartbeat { seq: None });
        assert_eq!(value.get("op").as_u64(), Some(1));
        assert!(value.get("d").is_some());
        assert!(value.get("d").as_u64().is_none());
    }

    #[test]
    fn heartbeat_carries_last_sequence() {
        let value = encoded_value(&OutboundFrame::Heartbeat { seq: Some(41) });
        assert_eq!(value.get("d").as_u64(), Some(41));
    }

    #[test]
    fn identify_carries_token_and_properties() {
        let frame = OutboundFrame::Identify(Box::new(Identify {
            token: "T".to_string(),
            properties: ConnectionProperties {
                os: "linux".to_string(),
                browser: "lib".to_string(),
                device: "lib".to_string(),
            },
            shard: Some([0, 1]),
            compress: None,
            presence: None,
        }));
        let wire = frame.encode().expect("encode");
        let raw = std::str::from_utf8(frame_bytes(&wire).expect("payload")).expect("utf8");
        assert!(raw.contains(r#""shard":[0,1]"#), "missing shard in {raw}");

        let value = encoded_value(&frame);
        assert_eq!(value.get("op").as_u64(), Some(2));
        let d = value.get("d").expect("d");
        assert_eq!(d.get("token").as_str(), Some("T"));
        assert_eq!(d.get("properties").get("os").as_str(), Some("linux"));
        // absent options are omitted, not null
        assert!(d.get("compress").is_none());
        assert!(d.get("presence").is_none());
    }

    #[test]
    fn resume_matches_wire_shape() {
        let frame = OutboundFrame::Resume(Resume {
            token: "T".to_string(),
            session_id: "abc".to_string(),
            seq: Some(42),
        });
        let value = encoded_value(&frame);
        assert_eq!(value.get("op").as_u64(), Some(6));
        let d = value.get("d").expect("d");
        assert_eq!(d.get("session_id").as_str(), Some("abc"));
        assert_eq!(d.get("seq").as_u64(), Some(42));
    }

    #[test]
    fn identify_debug_does_not_leak_the_token() {
        let body = Identify {
            token: "super-secret".to_string(),
            properties: ConnectionProperties::default(),
            shard: None,
            compress: None,
            presence: None,
        };
        let rendered = format!("{body:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
