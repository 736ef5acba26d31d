//! Minimal typed supervisor for session actors.
//!
//! Gateway sessions recover by reconnecting the transport, not by
//! restarting the actor, so there is no automatic restart policy here.
//! The supervisor exists as a stable, actor-managed parent to link a
//! session actor to, so an actor death is observed instead of silent.

use std::convert::Infallible;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use kameo::{
    Actor,
    actor::{ActorID, ActorRef, WeakActorRef},
    error::ActorStopReason,
};
use tracing::warn;

/// Link-based parent for a single kind of session actor.
pub struct SessionSupervisor<A>
where
    A: Actor,
{
    name: &'static str,
    _phantom: PhantomData<fn() -> A>,
}

impl<A> SessionSupervisor<A>
where
    A: Actor,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }
}

impl<A> Actor for SessionSupervisor<A>
where
    A: Actor,
{
    type Args = Self;
    type Error = Infallible;

    fn name() -> &'static str {
        "SessionSupervisor"
    }

    async fn on_start(args: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    fn on_link_died(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        id: ActorID,
        reason: ActorStopReason,
    ) -> impl std::future::Future<Output = Result<ControlFlow<ActorStopReason>, Self::Error>> + Send
    {
        let name = self.name;
        async move {
            if !matches!(reason, ActorStopReason::Normal) {
                warn!(supervisor = name, child = %id, reason = ?reason, "supervised session actor died");
            }
            Ok(ControlFlow::Continue(()))
        }
    }
}

/// Spawn a supervisor for one gateway session actor.
pub fn spawn_session_supervisor<A>() -> ActorRef<SessionSupervisor<A>>
where
    A: Actor,
{
    SessionSupervisor::spawn(SessionSupervisor::new("gateway-session"))
}
