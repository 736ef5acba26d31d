//! The session engine: lifecycle actor, IO tasks, and the public handle.

mod actor;
mod heartbeat;
mod router;
pub mod session;
mod writer;

pub use session::{GatewaySession, SessionOptions, TokenSource};

// The canonical protocol types live in `crate::core`; this is their public
// face.
pub use crate::core::backoff::{ExponentialBackoff, ReconnectPolicy, jitter_delay};
pub use crate::core::close::{close_code_name, is_fatal_close};
pub use crate::core::envelope::{Decoded, GatewayEvent, InboundEnvelope, decode};
pub use crate::core::frame::{WsCloseFrame, WsFrame, frame_bytes};
pub use crate::core::opcode::OpCode;
pub use crate::core::payload::{ConnectionProperties, Identify, OutboundFrame, Resume};
pub use crate::core::queue::{OutboundQueue, QueuePolicy};
pub use crate::core::roster::{ChannelStub, Guild, GuildRoster, GuildStub, ReadyPayload};
pub use crate::core::types::{
    BufferConfig, DisconnectAction, DisconnectCause, GatewayError, GatewayPhase, GatewayResult,
    SessionStats,
};
