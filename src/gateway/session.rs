use std::path::PathBuf;
use std::sync::Arc;

use kameo::prelude::{Actor, ActorRef};
use sonic_rs::Value;
use tokio::sync::mpsc;

use crate::bootstrap::{DEFAULT_GATEWAY_VERSION, GatewayEndpoint};
use crate::core::backoff::{ExponentialBackoff, ReconnectPolicy};
use crate::core::envelope::GatewayEvent;
use crate::core::payload::{ConnectionProperties, OutboundFrame};
use crate::core::queue::{OutboundQueue, QueuePolicy};
use crate::core::roster::Guild;
use crate::core::session::SessionShared;
use crate::core::{BufferConfig, GatewayError, GatewayPhase, GatewayResult, SessionStats};
use crate::gateway::actor::{
    GatewayActor, GatewayActorArgs, GatewayCommand, GetGuilds, GetPhase, GetStats, SendFrame,
    SessionItem, Shutdown,
};
use crate::supervision::{SessionSupervisor, spawn_session_supervisor};
use crate::transport::GatewayTransport;

/// Where the bot token comes from. Whatever the source, trailing whitespace
/// is stripped (token files routinely end in a newline).
#[derive(Debug, Clone)]
pub enum TokenSource {
    Inline(String),
    File(PathBuf),
    Env(String),
}

impl TokenSource {
    pub(crate) fn resolve(&self) -> GatewayResult<String> {
        let raw = match self {
            Self::Inline(token) => token.clone(),
            Self::File(path) => std::fs::read_to_string(path).map_err(|err| {
                GatewayError::TokenUnavailable(format!("{}: {err}", path.display()))
            })?,
            Self::Env(name) => std::env::var(name)
                .map_err(|err| GatewayError::TokenUnavailable(format!("${name}: {err}")))?,
        };
        let token = raw.trim_end().to_string();
        if token.is_empty() {
            return Err(GatewayError::TokenUnavailable("token is empty".to_string()));
        }
        Ok(token)
    }
}

/// Tunables for a gateway session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Gateway protocol version put on the connect URL.
    pub version: u8,
    /// Forward `compress=zlib-stream` to the transport. The engine itself
    /// never inflates anything.
    pub compress: bool,
    /// `(shard_id, shard_count)` routing tuple.
    pub shard: Option<[u32; 2]>,
    /// Initial presence attached to IDENTIFY.
    pub presence: Option<Value>,
    pub properties: ConnectionProperties,
    pub queue_policy: QueuePolicy,
    /// Consumer event buffer; once full, the reader stalls (backpressure).
    pub event_buffer: usize,
    /// Jitter the first heartbeat inside the interval.
    pub heartbeat_jitter: bool,
    pub buffers: BufferConfig,
    /// Consecutive failed resume attempts before identifying fresh.
    pub resume_attempt_limit: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            version: DEFAULT_GATEWAY_VERSION,
            compress: false,
            shard: None,
            presence: None,
            properties: ConnectionProperties::default(),
            queue_policy: QueuePolicy::Fifo,
            event_buffer: 64,
            heartbeat_jitter: true,
            buffers: BufferConfig::default(),
            resume_attempt_limit: 3,
        }
    }
}

/// Handle to a live gateway session.
///
/// Owns the consumer side of the event stream; the protocol machinery runs
/// in the session actor and its IO tasks until [`GatewaySession::close`].
pub struct GatewaySession<T, R = ExponentialBackoff>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    actor: ActorRef<GatewayActor<T, R>>,
    supervisor: ActorRef<SessionSupervisor<GatewayActor<T, R>>>,
    events: mpsc::Receiver<SessionItem>,
    shared: Arc<SessionShared>,
}

impl<T> GatewaySession<T, ExponentialBackoff>
where
    T: GatewayTransport,
{
    /// Connect with the default exponential reconnect policy.
    pub async fn connect(
        transport: T,
        endpoint: GatewayEndpoint,
        token: TokenSource,
        options: SessionOptions,
    ) -> GatewayResult<Self> {
        Self::connect_with_policy(transport, endpoint, token, options, ExponentialBackoff::default())
            .await
    }
}

impl<T, R> GatewaySession<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    /// Connect with a caller-supplied reconnect policy.
    ///
    /// Returns as soon as the session machinery is running; the handshake
    /// proceeds in the background. Watch [`GatewaySession::phase`] or wait
    /// for the READY event to know when the session is usable.
    pub async fn connect_with_policy(
        transport: T,
        endpoint: GatewayEndpoint,
        token: TokenSource,
        options: SessionOptions,
        reconnect: R,
    ) -> GatewayResult<Self> {
        let shared = Arc::new(SessionShared::new());
        let queue = OutboundQueue::new(options.queue_policy);
        let (events_tx, events_rx) = mpsc::channel(options.event_buffer.max(1));

        let supervisor = spawn_session_supervisor::<GatewayActor<T, R>>();
        let actor = GatewayActor::spawn(GatewayActorArgs {
            transport,
            endpoint,
            token,
            options,
            reconnect,
            events: events_tx,
            shared: Arc::clone(&shared),
            queue,
        });
        actor.link(&supervisor).await;

        actor
            .tell(GatewayCommand::Connect)
            .send()
            .await
            .map_err(|_| GatewayError::SessionClosed)?;

        Ok(Self {
            actor,
            supervisor,
            events: events_rx,
            shared,
        })
    }

    /// Next decoded DISPATCH event, in server order.
    ///
    /// Yields `Some(Err(_))` exactly once for a terminal failure, then
    /// `None`. `None` also means the session was closed.
    pub async fn next_event(&mut self) -> Option<GatewayResult<GatewayEvent>> {
        self.events.recv().await
    }

    /// Enqueue a frame for transmission (presence, voice state, member
    /// requests, raw).
    pub async fn send(&self, frame: OutboundFrame) -> GatewayResult<()> {
        ask_flat(self.actor.ask(SendFrame(frame)).await)
    }

    pub async fn update_presence(&self, payload: Value) -> GatewayResult<()> {
        self.send(OutboundFrame::PresenceUpdate(payload)).await
    }

    pub async fn update_voice_state(&self, payload: Value) -> GatewayResult<()> {
        self.send(OutboundFrame::VoiceStateUpdate(payload)).await
    }

    pub async fn request_guild_members(&self, payload: Value) -> GatewayResult<()> {
        self.send(OutboundFrame::RequestGuildMembers(payload)).await
    }

    pub async fn phase(&self) -> GatewayResult<GatewayPhase> {
        self.actor
            .ask(GetPhase)
            .await
            .map_err(|_| GatewayError::SessionClosed)
    }

    pub async fn stats(&self) -> GatewayResult<SessionStats> {
        self.actor
            .ask(GetStats)
            .await
            .map_err(|_| GatewayError::SessionClosed)
    }

    /// Snapshot of the guild roster seeded from READY/GUILD_CREATE.
    pub async fn guilds(&self) -> GatewayResult<Vec<Guild>> {
        self.actor
            .ask(GetGuilds)
            .await
            .map_err(|_| GatewayError::SessionClosed)
    }

    /// Last DISPATCH sequence observed, read directly off the shared cell.
    pub fn sequence(&self) -> Option<u64> {
        self.shared.sequence.get()
    }

    /// Whether a heartbeat is currently awaiting its ACK.
    pub fn heartbeat_ack_pending(&self) -> bool {
        self.shared.liveness.ack_pending()
    }

    /// Graceful shutdown: drains the outbound queue, joins every task, and
    /// guarantees nothing is written to the transport after this returns.
    pub async fn close(mut self) -> GatewayResult<()> {
        // Unblock a reader stalled on a full event buffer; we are not going
        // to read those events anymore.
        self.events.close();

        let result = ask_flat(self.actor.ask(Shutdown).await);

        self.actor.unlink(&self.supervisor).await;
        let _ = self.actor.stop_gracefully().await;
        self.actor.wait_for_shutdown().await;
        let _ = self.supervisor.stop_gracefully().await;
        self.supervisor.wait_for_shutdown().await;

        result
    }
}

fn ask_flat<M>(result: Result<(), kameo::error::SendError<M, GatewayError>>) -> GatewayResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(kameo::error::SendError::HandlerError(err)) => Err(err),
        Err(_) => Err(GatewayError::SessionClosed),
    }
}
