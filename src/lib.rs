//! Discord Gateway session engine.
//!
//! A single-shard client for the real-time bot Gateway: it owns the
//! websocket, walks the protocol lifecycle (HELLO → IDENTIFY/RESUME →
//! steady state → reconnect), keeps the heartbeat watchdog honest, funnels
//! all writes through one queue and one writer, and hands decoded DISPATCH
//! events to the consumer as a backpressured stream.
//!
//! The REST API, voice UDP, and multi-process sharding are collaborators,
//! not residents: the only REST artifact this crate touches is the
//! `GET /api/gateway` response used to bootstrap the connect URL.

pub mod bootstrap;
mod core;
pub mod gateway;
pub mod supervision;
pub mod testing;
pub mod transport;

pub use bootstrap::GatewayEndpoint;
pub use gateway::{
    ExponentialBackoff, GatewayError, GatewayEvent, GatewayPhase, GatewayResult, GatewaySession,
    OpCode, OutboundFrame, QueuePolicy, ReconnectPolicy, SessionOptions, SessionStats, TokenSource,
};
pub use transport::tungstenite::TungsteniteTransport;
