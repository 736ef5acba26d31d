// Canonical definitions live here; the module itself is crate-private and
// the public surface re-exports through `crate::gateway`.
pub mod backoff;
pub mod close;
pub mod envelope;
pub mod frame;
pub mod health;
pub mod opcode;
pub mod payload;
pub mod queue;
pub mod ring;
pub mod roster;
pub mod session;
pub mod types;

pub(crate) use frame::*;
pub(crate) use types::*;
