/// Gateway operation codes (Discord Gateway v6+).
///
/// Opcode 5 is unused by the protocol and intentionally has no variant;
/// it is treated like any other unknown opcode (logged and ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Server event delivery, carries a sequence number and event name.
    Dispatch = 0,
    /// Liveness ping; received heartbeats must be answered immediately.
    Heartbeat = 1,
    /// Fresh session authentication (client only).
    Identify = 2,
    /// Presence update passthrough (client only).
    PresenceUpdate = 3,
    /// Voice state update passthrough (client only).
    VoiceStateUpdate = 4,
    /// Session resumption with a prior session id and sequence (client only).
    Resume = 6,
    /// Server requests a graceful, resumable reconnect.
    Reconnect = 7,
    /// Guild member chunk request passthrough (client only).
    RequestGuildMembers = 8,
    /// Session invalidated; `d` says whether it is resumable.
    InvalidSession = 9,
    /// First server frame, carries `heartbeat_interval`.
    Hello = 10,
    /// Liveness pong.
    HeartbeatAck = 11,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::PresenceUpdate),
            4 => Some(Self::VoiceStateUpdate),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            8 => Some(Self::RequestGuildMembers),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the server is allowed to send this opcode to us.
    pub const fn is_server_op(self) -> bool {
        matches!(
            self,
            Self::Dispatch
                | Self::Heartbeat
                | Self::Reconnect
                | Self::InvalidSession
                | Self::Hello
                | Self::HeartbeatAck
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "DISPATCH",
            Self::Heartbeat => "HEARTBEAT",
            Self::Identify => "IDENTIFY",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::VoiceStateUpdate => "VOICE_STATE_UPDATE",
            Self::Resume => "RESUME",
            Self::Reconnect => "RECONNECT",
            Self::RequestGuildMembers => "REQUEST_GUILD_MEMBERS",
            Self::InvalidSession => "INVALID_SESSION",
            Self::Hello => "HELLO",
            Self::HeartbeatAck => "HEARTBEAT_ACK",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}
