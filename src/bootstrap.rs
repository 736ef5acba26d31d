//! Gateway URL bootstrap.
//!
//! The REST client is a collaborator, not part of this crate: callers fetch
//! `GET /api/gateway` however they like and hand the response body (or an
//! already-known host) to [`GatewayEndpoint`]. This module only owns the
//! URL munging: stripping the `wss://` scheme and appending the protocol
//! query parameters the gateway expects.

use serde::Deserialize;

use crate::core::{GatewayError, GatewayResult};

pub const DEFAULT_GATEWAY_VERSION: u8 = 6;
pub const GATEWAY_ENCODING: &str = "json";

#[derive(Debug, Deserialize)]
struct GatewayInfo {
    url: String,
}

/// A resolved gateway host (no scheme, no query), port 443 implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    host: String,
}

impl GatewayEndpoint {
    /// Use a known host such as `gateway.discord.gg`.
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Parse the body of `GET /api/gateway`: `{"url": "wss://..."}`.
    pub fn from_rest_response(body: &[u8]) -> GatewayResult<Self> {
        let info: GatewayInfo = sonic_rs::from_slice(body).map_err(|err| {
            GatewayError::ConnectionFailed(format!("malformed gateway info: {err}"))
        })?;
        Ok(Self::from_url(&info.url))
    }

    /// Accept a `wss://` URL (as served by the REST API) or a bare host.
    pub fn from_url(url: &str) -> Self {
        Self {
            host: strip_scheme(url).trim_end_matches('/').to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Full websocket request URL with the protocol query parameters.
    pub fn request_url(&self, version: u8, compress: bool) -> String {
        build_request_url(&self.host, version, compress)
    }
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url)
}

/// Append `?v=<version>&encoding=json[&compress=zlib-stream]` to a gateway
/// host or resume URL. Compression is a pass-through toggle for the
/// transport; this crate never inflates anything itself.
pub fn build_request_url(base: &str, version: u8, compress: bool) -> String {
    let host = strip_scheme(base).trim_end_matches('/');
    let mut url = format!("wss://{host}/?v={version}&encoding={GATEWAY_ENCODING}");
    if compress {
        url.push_str("&compress=zlib-stream");
    }
    url
}
