use super::types::GatewayError;

/// Gateway close codes that must not trigger a reconnect.
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;
pub const CLOSE_INVALID_SHARD: u16 = 4010;
pub const CLOSE_SHARDING_REQUIRED: u16 = 4011;
pub const CLOSE_INVALID_API_VERSION: u16 = 4012;
pub const CLOSE_INVALID_INTENTS: u16 = 4013;
pub const CLOSE_DISALLOWED_INTENTS: u16 = 4014;

/// Whether a server close code ends the session for good. Everything else
/// (including the 4000-4009 transient range and plain 1000/1001 closes)
/// goes through the normal reconnect path.
pub fn is_fatal_close(code: u16) -> bool {
    matches!(
        code,
        CLOSE_AUTHENTICATION_FAILED
            | CLOSE_INVALID_SHARD
            | CLOSE_SHARDING_REQUIRED
            | CLOSE_INVALID_API_VERSION
            | CLOSE_INVALID_INTENTS
            | CLOSE_DISALLOWED_INTENTS
    )
}

pub fn close_code_name(code: u16) -> Option<&'static str> {
    Some(match code {
        4000 => "unknown error",
        4001 => "unknown opcode",
        4002 => "decode error",
        4003 => "not authenticated",
        CLOSE_AUTHENTICATION_FAILED => "authentication failed",
        4005 => "already authenticated",
        4007 => "invalid sequence",
        4008 => "rate limited",
        4009 => "session timed out",
        CLOSE_INVALID_SHARD => "invalid shard",
        CLOSE_SHARDING_REQUIRED => "sharding required",
        CLOSE_INVALID_API_VERSION => "invalid API version",
        CLOSE_INVALID_INTENTS => "invalid intents",
        CLOSE_DISALLOWED_INTENTS => "disallowed intents",
        _ => return None,
    })
}

/// Map a fatal close code to the terminal error surfaced to the consumer.
pub fn fatal_close_error(code: u16, reason: String) -> GatewayError {
    let reason = if reason.is_empty() {
        close_code_name(code).unwrap_or("closed by gateway").to_string()
    } else {
        reason
    };
    if code == CLOSE_AUTHENTICATION_FAILED {
        GatewayError::AuthenticationFailed { code, reason }
    } else {
        GatewayError::FatalClose { code, reason }
    }
}
