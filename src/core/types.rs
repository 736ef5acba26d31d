use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Canonical error surface for the session engine.
///
/// Only the fatal variants ever reach the consumer through the event stream;
/// everything else is recovered internally by the reconnect machinery.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transport error ({context}): {error}")]
    Transport {
        context: &'static str,
        error: String,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("authentication failed: close code {code}: {reason}")]
    AuthenticationFailed { code: u16, reason: String },

    #[error("gateway closed the session: close code {code}: {reason}")]
    FatalClose { code: u16, reason: String },

    #[error("token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("outbound queue closed")]
    QueueClosed,

    #[error("session closed")]
    SessionClosed,
}

/// Handshake and steady-state phases of a gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, kameo::Reply)]
pub enum GatewayPhase {
    /// Transport handshake in progress.
    Connecting,
    /// Transport is up, first frame (HELLO) expected.
    AwaitingHello,
    /// IDENTIFY enqueued, waiting for READY.
    Identifying,
    /// RESUME enqueued, waiting for the replay to catch up.
    Resuming,
    /// Normal operation.
    Ready,
    /// Transport torn down, a reconnect is scheduled or in flight.
    Reconnecting,
    /// Terminal. All tasks joined, queue closed.
    Closed,
}

impl GatewayPhase {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for GatewayPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a connection was (or is being) torn down.
#[derive(Debug, Clone)]
pub enum DisconnectCause {
    /// The transport-level connect/upgrade failed.
    HandshakeFailed { error: String },
    /// The read side of the transport failed.
    ReadFailure { error: String },
    /// The write side of the transport failed.
    WriteFailure { error: String },
    /// The server sent a close frame or the stream ended.
    RemoteClosed { code: Option<u16>, reason: String },
    /// A heartbeat went unacknowledged for a full interval.
    ZombieConnection,
    /// The server asked us to reconnect (RECONNECT opcode).
    ServerRequestedReconnect,
}

impl DisconnectCause {
    /// Short identifier used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HandshakeFailed { .. } => "handshake_failed",
            Self::ReadFailure { .. } => "read_failure",
            Self::WriteFailure { .. } => "write_failure",
            Self::RemoteClosed { .. } => "remote_closed",
            Self::ZombieConnection => "zombie_connection",
            Self::ServerRequestedReconnect => "server_requested",
        }
    }
}

/// What the lifecycle controller decided to do about a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Surface a terminal error, do not reconnect.
    Abort,
    /// Reconnect without delay (server-requested reconnects).
    Immediate,
    /// Reconnect after the backoff policy's next delay.
    Backoff,
}

/// Transport buffer sizing forwarded to the websocket implementation.
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    pub read_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read_buffer_bytes: 64 << 10,
            // READY for a bot in many guilds can run into megabytes.
            max_message_bytes: 16 << 20,
            max_frame_bytes: 16 << 20,
            write_buffer_bytes: 64 << 10,
            max_write_buffer_bytes: 1 << 20,
        }
    }
}

/// Point-in-time snapshot of a session's health counters.
#[derive(Debug, Clone, Copy, Default, kameo::Reply)]
pub struct SessionStats {
    pub uptime: Duration,
    pub events: u64,
    pub frames: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub last_inbound_age: Duration,
    pub heartbeat_p50_us: u64,
    pub heartbeat_p99_us: u64,
    pub heartbeat_samples: u64,
    pub recent_errors: usize,
}
