use std::collections::HashMap;

use serde::Deserialize;
use sonic_rs::{JsonValueTrait, Value};

use super::types::{GatewayError, GatewayResult};

/// READY event payload, as far as the engine cares about it. Everything
/// else in READY stays opaque and reaches the consumer untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
    #[serde(default)]
    pub guilds: Vec<GuildStub>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildStub {
    pub id: String,
    #[serde(default)]
    pub unavailable: bool,
}

pub fn parse_ready(d: &Value) -> GatewayResult<ReadyPayload> {
    sonic_rs::from_value(d)
        .map_err(|err| GatewayError::Protocol(format!("malformed READY payload: {err}")))
}

#[derive(Debug, Clone, Deserialize)]
struct GuildCreatePayload {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    permissions: Option<Value>,
    #[serde(default)]
    channels: Vec<ChannelStub>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelStub {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// A guild as known to the session: the READY stub, later filled in by the
/// matching GUILD_CREATE.
#[derive(Debug, Clone)]
pub struct Guild {
    pub id: String,
    pub unavailable: bool,
    pub name: Option<String>,
    pub permissions: Option<u64>,
    pub channels: Vec<ChannelStub>,
}

/// Guild cache seeded from READY and filled by GUILD_CREATE.
///
/// A convenience for consumers; protocol correctness never depends on it.
#[derive(Debug, Default)]
pub struct GuildRoster {
    guilds: HashMap<String, Guild>,
}

impl GuildRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the guild stubs announced by READY. READY after a fresh
    /// IDENTIFY replaces whatever an earlier session knew.
    pub fn seed(&mut self, stubs: &[GuildStub]) {
        self.guilds.clear();
        for stub in stubs {
            self.guilds.insert(
                stub.id.clone(),
                Guild {
                    id: stub.id.clone(),
                    unavailable: stub.unavailable,
                    name: None,
                    permissions: None,
                    channels: Vec::new(),
                },
            );
        }
    }

    /// Fill in a roster entry from GUILD_CREATE. Guilds joined after READY
    /// also announce themselves this way, so unknown ids are inserted.
    pub fn apply_guild_create(&mut self, d: &Value) -> GatewayResult<()> {
        let payload: GuildCreatePayload = sonic_rs::from_value(d)
            .map_err(|err| GatewayError::Protocol(format!("malformed GUILD_CREATE: {err}")))?;

        let permissions = payload.permissions.as_ref().and_then(permission_bits);
        let entry = self.guilds.entry(payload.id.clone()).or_insert_with(|| Guild {
            id: payload.id.clone(),
            unavailable: false,
            name: None,
            permissions: None,
            channels: Vec::new(),
        });
        entry.unavailable = false;
        entry.name = payload.name;
        entry.permissions = permissions;
        entry.channels = payload.channels;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Guild> {
        self.guilds.get(id)
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Guild> {
        self.guilds.values().cloned().collect()
    }
}

// Permissions arrive as an integer on v6 and as a stringified integer on
// newer gateway versions; accept both.
fn permission_bits(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
