//! Gateway session actor.
//!
//! The IO loops run outside kameo for throughput; the actor owns session
//! state and policies and receives frames via messages. Hub-and-spoke: the
//! actor owns the outbound queue and the task handles, the reader/writer/
//! heartbeat tasks hold channel handles and exit when those close.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::bootstrap::{GatewayEndpoint, build_request_url};
use crate::core::backoff::{ReconnectPolicy, invalid_session_delay, jitter_delay};
use crate::core::close::{fatal_close_error, is_fatal_close};
use crate::core::envelope::GatewayEvent;
use crate::core::health::ConnectionHealth;
use crate::core::payload::{Identify, OutboundFrame, Resume};
use crate::core::queue::OutboundQueue;
use crate::core::roster::{Guild, GuildRoster, parse_ready};
use crate::core::session::SessionShared;
use crate::core::{
    DisconnectAction, DisconnectCause, GatewayError, GatewayPhase, GatewayResult, SessionStats,
};
use crate::gateway::heartbeat::{HeartbeatExit, drive_heartbeat};
use crate::gateway::router::{ControlEvent, FrameRouter, Routed};
use crate::gateway::session::{SessionOptions, TokenSource};
use crate::gateway::writer::drive_writer;
use crate::transport::GatewayTransport;

/// Items surfaced on the consumer event stream: decoded DISPATCH payloads,
/// or one terminal error when the session dies fatally.
pub type SessionItem = GatewayResult<GatewayEvent>;

pub struct GatewayActorArgs<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    pub transport: T,
    pub endpoint: GatewayEndpoint,
    pub token: TokenSource,
    pub options: SessionOptions,
    pub reconnect: R,
    pub events: mpsc::Sender<SessionItem>,
    pub shared: Arc<SessionShared>,
    pub queue: OutboundQueue,
}

pub struct GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    transport: T,
    endpoint: GatewayEndpoint,
    token: TokenSource,
    options: SessionOptions,
    reconnect: R,
    shared: Arc<SessionShared>,
    queue: OutboundQueue,
    events: Option<mpsc::Sender<SessionItem>>,
    actor_ref: ActorRef<Self>,

    phase: GatewayPhase,
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    shard: Option<[u32; 2]>,
    heartbeat_interval: Option<Duration>,
    roster: GuildRoster,
    health: ConnectionHealth,
    resume_failures: u32,
    reconnect_attempt: u64,

    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T, R> Actor for GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    type Args = GatewayActorArgs<T, R>;
    type Error = GatewayError;

    fn name() -> &'static str {
        "GatewayActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> GatewayResult<Self> {
        let GatewayActorArgs {
            transport,
            endpoint,
            token,
            options,
            reconnect,
            events,
            shared,
            queue,
        } = args;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shard = options.shard;

        Ok(Self {
            transport,
            endpoint,
            token,
            options,
            reconnect,
            shared,
            queue,
            events: Some(events),
            actor_ref: ctx,
            phase: GatewayPhase::Connecting,
            session_id: None,
            resume_gateway_url: None,
            shard,
            heartbeat_interval: None,
            roster: GuildRoster::new(),
            health: ConnectionHealth::new(),
            resume_failures: 0,
            reconnect_attempt: 0,
            reader_task: None,
            writer_task: None,
            heartbeat_task: None,
            shutdown_tx,
            shutdown_rx,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> GatewayResult<()> {
        self.teardown().await;
        Ok(())
    }

    #[allow(clippy::manual_async_fn)]
    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            error!(error = ?err, "GatewayActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

/// Fire-and-forget commands from the IO tasks and the timer machinery.
pub(crate) enum GatewayCommand {
    /// Open (or reopen) the transport.
    Connect,
    /// Control frame observed by the reader.
    Control(ControlEvent),
    /// An IO task died or the server told us to go away.
    Disconnect { cause: DisconnectCause },
    /// Construct IDENTIFY or RESUME for the current session state
    /// (scheduled after an INVALID_SESSION backoff).
    Authenticate,
    /// Unrecoverable protocol failure observed by the reader.
    Fatal(GatewayError),
}

pub(crate) struct ConnectionEstablished<T: GatewayTransport>(
    pub(crate) T::Reader,
    pub(crate) T::Writer,
);

pub(crate) struct ConnectionFailed {
    pub(crate) error: String,
}

/// Ask: enqueue a caller-supplied frame (presence, voice state, member
/// requests, raw).
pub struct SendFrame(pub OutboundFrame);

/// Ask: current lifecycle phase.
pub struct GetPhase;

/// Ask: health counters.
pub struct GetStats;

/// Ask: guild roster snapshot.
pub struct GetGuilds;

/// Ask: graceful shutdown; resolves once nothing will ever be written again.
pub struct Shutdown;

impl<T, R> KameoMessage<GatewayCommand> for GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    type Reply = ();

    async fn handle(&mut self, command: GatewayCommand, _ctx: &mut Context<Self, Self::Reply>) {
        match command {
            GatewayCommand::Connect => self.handle_connect(),
            GatewayCommand::Control(event) => self.handle_control(event).await,
            GatewayCommand::Disconnect { cause } => self.handle_disconnect(cause).await,
            GatewayCommand::Authenticate => self.authenticate().await,
            GatewayCommand::Fatal(err) => self.fail(err).await,
        }
    }
}

impl<T, R> KameoMessage<ConnectionEstablished<T>> for GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) {
        if self.phase != GatewayPhase::Connecting {
            debug!(phase = %self.phase, "dropping stale transport");
            return;
        }
        self.on_connection_established(msg.0, msg.1);
    }
}

impl<T, R> KameoMessage<ConnectionFailed> for GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    type Reply = ();

    async fn handle(&mut self, msg: ConnectionFailed, _ctx: &mut Context<Self, Self::Reply>) {
        if self.phase != GatewayPhase::Connecting {
            return;
        }
        self.health.record_error("connect", &msg.error);
        self.handle_disconnect(DisconnectCause::HandshakeFailed { error: msg.error })
            .await;
    }
}

impl<T, R> KameoMessage<SendFrame> for GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    type Reply = GatewayResult<()>;

    async fn handle(&mut self, msg: SendFrame, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.phase == GatewayPhase::Closed {
            return Err(GatewayError::SessionClosed);
        }
        self.queue.push(msg.0)
    }
}

impl<T, R> KameoMessage<GetPhase> for GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    type Reply = GatewayPhase;

    async fn handle(&mut self, _msg: GetPhase, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.phase
    }
}

impl<T, R> KameoMessage<GetStats> for GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    type Reply = SessionStats;

    async fn handle(&mut self, _msg: GetStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.health.stats(&self.shared)
    }
}

impl<T, R> KameoMessage<GetGuilds> for GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    type Reply = Vec<Guild>;

    async fn handle(&mut self, _msg: GetGuilds, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.roster.snapshot()
    }
}

impl<T, R> KameoMessage<Shutdown> for GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    type Reply = GatewayResult<()>;

    async fn handle(&mut self, _msg: Shutdown, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.phase != GatewayPhase::Closed {
            info!("closing gateway session");
            self.teardown().await;
            self.phase = GatewayPhase::Closed;
        }
        Ok(())
    }
}

impl<T, R> GatewayActor<T, R>
where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    fn handle_connect(&mut self) {
        if self.phase == GatewayPhase::Closed {
            return;
        }
        self.phase = GatewayPhase::Connecting;

        // Resumes prefer the URL READY handed back, with the same protocol
        // query parameters as the original connect.
        let url = if self.session_id.is_some() {
            let base = self
                .resume_gateway_url
                .clone()
                .unwrap_or_else(|| self.endpoint.host().to_string());
            build_request_url(&base, self.options.version, self.options.compress)
        } else {
            self.endpoint
                .request_url(self.options.version, self.options.compress)
        };

        debug!(%url, resuming = self.session_id.is_some(), "opening gateway transport");

        let transport = self.transport.clone();
        let buffers = self.options.buffers;
        let self_ref = self.actor_ref.clone();
        tokio::spawn(async move {
            match transport.connect(url, buffers).await {
                Ok((reader, writer)) => {
                    let _ = self_ref
                        .tell(ConnectionEstablished::<T>(reader, writer))
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = self_ref
                        .tell(ConnectionFailed {
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        });
    }

    fn on_connection_established(&mut self, reader: T::Reader, writer: T::Writer) {
        info!("gateway transport established");
        self.phase = GatewayPhase::AwaitingHello;
        self.health.mark_connected();
        self.shared.liveness.reset();
        self.reconnect.reset();
        self.reconnect_attempt = 0;
        self.reset_shutdown_channel();

        self.spawn_writer(writer);
        self.spawn_reader(reader);
        // The heartbeat timer waits for HELLO.
    }

    fn spawn_writer(&mut self, writer: T::Writer) {
        let queue = self.queue.clone();
        let shutdown = self.shutdown_rx.clone();
        let self_ref = self.actor_ref.clone();
        self.writer_task = Some(tokio::spawn(async move {
            if let Err(err) = drive_writer(writer, queue, shutdown).await {
                let _ = self_ref
                    .tell(GatewayCommand::Disconnect {
                        cause: DisconnectCause::WriteFailure {
                            error: err.to_string(),
                        },
                    })
                    .send()
                    .await;
            }
        }));
    }

    fn spawn_reader(&mut self, reader: T::Reader) {
        let router = FrameRouter::new(Arc::clone(&self.shared));
        let events = self.events.clone();
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown_rx.clone();
        let self_ref = self.actor_ref.clone();

        self.reader_task = Some(tokio::spawn(async move {
            let mut read = reader;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow_and_update() { break; }
                    }
                    frame = read.next() => {
                        let frame = match frame {
                            Some(Ok(frame)) => frame,
                            Some(Err(err)) => {
                                let _ = self_ref
                                    .tell(GatewayCommand::Disconnect {
                                        cause: DisconnectCause::ReadFailure { error: err.to_string() },
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            None => {
                                let _ = self_ref
                                    .tell(GatewayCommand::Disconnect {
                                        cause: DisconnectCause::RemoteClosed {
                                            code: None,
                                            reason: "stream ended".to_string(),
                                        },
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                        };

                        shared.count_frame();

                        match router.route(&frame) {
                            Routed::Deliver { event, control } => {
                                if let Some(events) = events.as_ref() {
                                    // A full buffer stalls this loop, and with it
                                    // the next read. A dropped receiver just
                                    // discards the event.
                                    tokio::select! {
                                        changed = shutdown.changed() => {
                                            if changed.is_err() || *shutdown.borrow_and_update() { break; }
                                        }
                                        sent = events.send(Ok(event)) => { let _ = sent; }
                                    }
                                }
                                if let Some(control) = control
                                    && self_ref
                                        .tell(GatewayCommand::Control(control))
                                        .send()
                                        .await
                                        .is_err()
                                {
                                    break;
                                }
                            }
                            Routed::Control(control) => {
                                if self_ref
                                    .tell(GatewayCommand::Control(control))
                                    .send()
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Routed::Ignore => {}
                            Routed::Remote { code, reason } => {
                                let _ = self_ref
                                    .tell(GatewayCommand::Disconnect {
                                        cause: DisconnectCause::RemoteClosed { code, reason },
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            Routed::Fatal(err) => {
                                let _ = self_ref.tell(GatewayCommand::Fatal(err)).send().await;
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        // A fresh timer replaces any previous one (re-HELLO, resume).
        if let Some(previous) = self.heartbeat_task.take() {
            previous.abort();
        }
        // Each timer starts a fresh ack cycle: an ACK still owed to the
        // replaced timer must not count against the new one's first tick.
        self.shared.liveness.reset();

        let first_delay = crate::core::backoff::first_heartbeat_delay(
            interval,
            self.options.heartbeat_jitter,
        );
        debug!(
            interval_ms = interval.as_millis() as u64,
            first_delay_ms = first_delay.as_millis() as u64,
            "starting heartbeat timer"
        );

        let shared = Arc::clone(&self.shared);
        let queue = self.queue.clone();
        let shutdown = self.shutdown_rx.clone();
        let self_ref = self.actor_ref.clone();
        self.heartbeat_task = Some(tokio::spawn(async move {
            match drive_heartbeat(shared, queue, interval, first_delay, shutdown).await {
                HeartbeatExit::Zombie => {
                    let _ = self_ref
                        .tell(GatewayCommand::Disconnect {
                            cause: DisconnectCause::ZombieConnection,
                        })
                        .send()
                        .await;
                }
                HeartbeatExit::Shutdown | HeartbeatExit::QueueClosed => {}
            }
        }));
    }

    async fn handle_control(&mut self, event: ControlEvent) {
        // Control frames from a connection we already tore down are noise.
        if matches!(
            self.phase,
            GatewayPhase::Connecting | GatewayPhase::Reconnecting | GatewayPhase::Closed
        ) {
            debug!(phase = %self.phase, "dropping control event from stale connection");
            return;
        }

        match event {
            ControlEvent::HeartbeatRequest => {
                debug!("server requested an immediate heartbeat");
                let frame = OutboundFrame::Heartbeat {
                    seq: self.shared.sequence.get(),
                };
                let _ = self
                    .queue
                    .push_with_deadline(frame, Some(std::time::Instant::now()));
            }
            ControlEvent::Reconnect => {
                info!("server requested reconnect");
                self.handle_disconnect(DisconnectCause::ServerRequestedReconnect)
                    .await;
            }
            ControlEvent::InvalidSession { resumable } => {
                self.handle_invalid_session(resumable).await;
            }
            ControlEvent::Hello { heartbeat_interval } => {
                self.handle_hello(heartbeat_interval).await;
            }
            ControlEvent::HeartbeatAck { rtt } => match rtt {
                Some(rtt) => {
                    trace!(rtt_us = rtt.as_micros() as u64, "heartbeat acknowledged");
                    self.health.record_heartbeat_rtt(rtt);
                }
                None => debug!("unsolicited heartbeat ack"),
            },
            ControlEvent::Ready { payload } => self.handle_ready(&payload).await,
            ControlEvent::GuildCreate { payload } => {
                // The roster is a convenience cache; a malformed guild must
                // not take the session down.
                if let Err(err) = self.roster.apply_guild_create(&payload) {
                    warn!(%err, "ignoring unparseable GUILD_CREATE");
                    self.health.record_error("roster", &err.to_string());
                }
            }
            ControlEvent::Resumed => {
                info!(seq = ?self.shared.sequence.get(), "session resumed");
                self.phase = GatewayPhase::Ready;
                self.resume_failures = 0;
            }
        }
    }

    async fn handle_hello(&mut self, interval: Duration) {
        if let Some(previous) = self.heartbeat_interval
            && previous != interval
        {
            debug!(
                previous_ms = previous.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "heartbeat interval changed"
            );
        }
        self.heartbeat_interval = Some(interval);
        self.start_heartbeat(interval);

        match self.phase {
            GatewayPhase::AwaitingHello => self.authenticate().await,
            // A re-HELLO in steady state restarts the heartbeat but must
            // not trigger a second IDENTIFY.
            phase => debug!(%phase, "HELLO outside handshake; heartbeat restarted"),
        }
    }

    /// Build IDENTIFY or RESUME depending on whether a session exists.
    /// This is the only place those frames are ever constructed.
    async fn authenticate(&mut self) {
        if matches!(
            self.phase,
            GatewayPhase::Connecting | GatewayPhase::Reconnecting | GatewayPhase::Closed
        ) {
            return;
        }

        let token = match self.token.resolve() {
            Ok(token) => token,
            Err(err) => {
                // No token, no session; nothing to retry.
                self.fail(err).await;
                return;
            }
        };

        let frame = match &self.session_id {
            Some(session_id) => {
                let seq = self.shared.sequence.get();
                info!(seq = ?seq, "resuming gateway session");
                self.phase = GatewayPhase::Resuming;
                OutboundFrame::Resume(Resume {
                    token,
                    session_id: session_id.clone(),
                    seq,
                })
            }
            None => {
                info!(shard = ?self.shard, "identifying");
                self.phase = GatewayPhase::Identifying;
                OutboundFrame::Identify(Box::new(Identify {
                    token,
                    properties: self.options.properties.clone(),
                    shard: self.shard,
                    compress: None,
                    presence: self.options.presence.clone(),
                }))
            }
        };

        if self.queue.push(frame).is_err() {
            debug!("queue closed while authenticating; session is shutting down");
        }
    }

    async fn handle_invalid_session(&mut self, resumable: bool) {
        self.health.record_error("session", "INVALID_SESSION");

        if resumable && self.session_id.is_some() {
            self.resume_failures += 1;
            if self.resume_failures < self.options.resume_attempt_limit {
                warn!(
                    attempt = self.resume_failures,
                    "session invalidated but resumable; resuming again"
                );
                self.authenticate().await;
                return;
            }
            warn!("resume attempts exhausted; falling back to a fresh identify");
        } else {
            warn!("session invalidated; identifying fresh after backoff");
        }

        // Non-resumable (or hopeless): forget the session and identify
        // again after the mandated randomized 1-5 s delay.
        self.session_id = None;
        self.resume_failures = 0;
        let delay = invalid_session_delay();
        debug!(delay_ms = delay.as_millis() as u64, "scheduling re-identify");
        let self_ref = self.actor_ref.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = self_ref.tell(GatewayCommand::Authenticate).send().await;
        });
    }

    async fn handle_ready(&mut self, payload: &sonic_rs::Value) {
        let ready = match parse_ready(payload) {
            Ok(ready) => ready,
            Err(err) => {
                self.fail(err).await;
                return;
            }
        };

        info!(
            session_id = %ready.session_id,
            guilds = ready.guilds.len(),
            "gateway session ready"
        );
        self.session_id = Some(ready.session_id);
        if ready.resume_gateway_url.is_some() {
            self.resume_gateway_url = ready.resume_gateway_url;
        }
        if let Some(shard) = ready.shard {
            self.shard = Some(shard);
        }
        self.roster.seed(&ready.guilds);
        self.phase = GatewayPhase::Ready;
        self.resume_failures = 0;
    }

    async fn handle_disconnect(&mut self, cause: DisconnectCause) {
        if matches!(
            self.phase,
            GatewayPhase::Connecting | GatewayPhase::Reconnecting | GatewayPhase::Closed
        ) && !matches!(cause, DisconnectCause::HandshakeFailed { .. })
        {
            debug!(cause = cause.kind(), "ignoring duplicate disconnect");
            return;
        }

        let action = match &cause {
            DisconnectCause::RemoteClosed {
                code: Some(code), ..
            } if is_fatal_close(*code) => DisconnectAction::Abort,
            DisconnectCause::ServerRequestedReconnect => DisconnectAction::Immediate,
            _ => DisconnectAction::Backoff,
        };

        if !matches!(cause, DisconnectCause::ServerRequestedReconnect) {
            self.health.record_error(cause.kind(), &format!("{cause:?}"));
        }

        // A connection lost mid-resume counts against the resume budget.
        if self.phase == GatewayPhase::Resuming {
            self.resume_failures += 1;
            if self.resume_failures >= self.options.resume_attempt_limit {
                warn!("resume attempts exhausted; next connect identifies fresh");
                self.session_id = None;
                self.resume_failures = 0;
            }
        }

        self.stop_io_tasks().await;

        if action == DisconnectAction::Abort {
            let (code, reason) = match &cause {
                DisconnectCause::RemoteClosed { code, reason } => {
                    (code.unwrap_or_default(), reason.clone())
                }
                _ => unreachable!("only fatal close codes abort"),
            };
            self.fail(fatal_close_error(code, reason)).await;
            return;
        }

        self.phase = GatewayPhase::Reconnecting;

        if !self.reconnect.should_retry() {
            self.fail(GatewayError::ConnectionFailed(format!(
                "not reconnecting after {}",
                cause.kind()
            )))
            .await;
            return;
        }

        self.reconnect_attempt += 1;
        self.health.increment_reconnect();
        let delay = match action {
            DisconnectAction::Immediate => Duration::ZERO,
            _ => jitter_delay(self.reconnect.next_delay()),
        };

        warn!(
            cause = cause.kind(),
            action = ?action,
            attempt = self.reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            session_retained = self.session_id.is_some(),
            seq = ?self.shared.sequence.get(),
            "gateway reconnect scheduled"
        );

        let self_ref = self.actor_ref.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = self_ref.tell(GatewayCommand::Connect).send().await;
        });
    }

    /// Terminal failure: surface the error on the event stream, tear down,
    /// and close for good.
    async fn fail(&mut self, err: GatewayError) {
        if self.phase == GatewayPhase::Closed {
            return;
        }
        error!(%err, "gateway session failed terminally");
        self.health.record_error("fatal", &err.to_string());
        // Grab the sender before teardown drops it: the terminal error is
        // the one item that must still reach the consumer.
        let events = self.events.take();
        self.teardown().await;
        self.phase = GatewayPhase::Closed;

        if let Some(events) = events {
            // The consumer may be slow; deliver the terminal error without
            // wedging the actor, then let the sender drop to end the stream.
            tokio::spawn(async move {
                let _ = events.send(Err(err)).await;
            });
        }
    }

    /// Stop the per-connection tasks, leaving the queue (and any frames
    /// accepted for after the reconnect) intact.
    async fn stop_io_tasks(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(heartbeat) = self.heartbeat_task.take() {
            heartbeat.abort();
        }
        Self::await_task(&mut self.reader_task).await;
        Self::await_task(&mut self.writer_task).await;
        self.reset_shutdown_channel();
    }

    /// Full teardown for close/fatal paths: drain the writer, then stop
    /// everything. Nothing is written to any transport after this returns.
    async fn teardown(&mut self) {
        self.queue.close();
        Self::await_task(&mut self.writer_task).await;
        let _ = self.shutdown_tx.send(true);
        if let Some(heartbeat) = self.heartbeat_task.take() {
            heartbeat.abort();
        }
        Self::await_task(&mut self.reader_task).await;
        self.events = None;
    }

    async fn await_task(handle: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = handle.take()
            && let Err(err) = handle.await
            && !err.is_cancelled()
        {
            warn!("gateway task terminated with error: {err}");
        }
    }

    fn reset_shutdown_channel(&mut self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;
        self.shutdown_rx = shutdown_rx;
    }
}
