//! Adapter session: handshake, receive loop, and teardown for one connection.
//!
//! ```text
//! Disconnected ─► Connecting ─► Registered ─► Subscribed ─► Listening
//!       ▲                                                       │
//!       └─────────────────────── Closing ◄──────────────────────┘
//! ```
//!
//! The session exclusively owns the transport. Everything else that wants to
//! write (task replies, pongs, client-role requests) goes through the
//! outbound queue, which the receive loop drains alongside inbound frames.
//! Invoke tasks are handed to a per-connection scheduler that admits them in
//! arrival order through a semaphore and runs each as its own tokio task, so
//! a slow handler never stalls the receive loop. With the default of one
//! permit, tasks also complete in arrival order.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use meshlink_core::{
    codec, intents, new_trace_id, Envelope, ErrorKind, TaskCall, TaskError, KERNEL_TARGET,
};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};

use super::connection::{OutboundHandle, OutboundMessage};
use super::correlation::{CorrelationError, CorrelationTracker};
use super::shutdown::{ShutdownController, TaskGuard};
use super::transport::{Connector, Transport, TransportError};
use crate::config::{AdapterConfig, ProtocolFlavor};
use crate::service::registry::HandlerRegistry;
use crate::service::{classify, Classified, Dispatcher};

/// Capacity of the inbound broadcast for client-role subscribers.
const INBOUND_BROADCAST_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// State and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Registered,
    Subscribed,
    Listening,
    Closing,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Subscribed => "subscribed",
            Self::Listening => "listening",
            Self::Closing => "closing",
        }
    }

    /// `true` while outbound sends are allowed.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Registered | Self::Subscribed | Self::Listening)
    }
}

/// Why a session that reached `Listening` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// Shutdown was requested through the controller or a handle.
    Shutdown,
    /// The peer closed the connection.
    PeerClosed,
    /// A handle asked the loop to close the transport.
    Closed(Option<String>),
    /// The transport failed while receiving.
    ReceiveFailed(String),
}

/// Failure before the session reached `Listening`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open transport: {0}")]
    Connect(#[source] TransportError),
    #[error("handshake failed: {0}")]
    Handshake(#[source] TransportError),
}

impl SessionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}

/// Failure of a correlated request issued through a [`SessionHandle`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

impl RequestError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Shared {
    config: Arc<AdapterConfig>,
    state: ArcSwap<SessionState>,
    tracker: Arc<CorrelationTracker>,
    shutdown: ShutdownController,
    outbound: OutboundHandle,
    inbound: broadcast::Sender<Envelope>,
}

impl Shared {
    fn state(&self) -> SessionState {
        **self.state.load()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.swap(Arc::new(next));
        if *prev != next {
            tracing::debug!(from = prev.as_str(), to = next.as_str(), "session state");
        }
    }

    /// Queues an envelope produced outside the loop (task replies). Replies
    /// finishing while the session drains are still written.
    async fn enqueue(&self, envelope: &Envelope) {
        let state = self.state();
        if !(state.is_connected() || state == SessionState::Closing) {
            tracing::warn!(
                trace_id = envelope.trace_id().unwrap_or(""),
                intent = %envelope.intent,
                "session not connected; dropping outbound envelope"
            );
            return;
        }
        let frame = OutboundMessage::Frame(codec::encode(envelope));
        if let Err(e) = self
            .outbound
            .send_timeout(frame, self.config.connection.send_timeout)
            .await
        {
            tracing::warn!(
                trace_id = envelope.trace_id().unwrap_or(""),
                error = %e,
                "failed to queue outbound envelope"
            );
        }
    }

    /// Queues an envelope from inside the loop. Never waits: the loop is the
    /// queue's only consumer.
    fn enqueue_now(&self, envelope: &Envelope) {
        let frame = OutboundMessage::Frame(codec::encode(envelope));
        if let Err(e) = self.outbound.try_send(frame) {
            tracing::warn!(
                trace_id = envelope.trace_id().unwrap_or(""),
                intent = %envelope.intent,
                error = %e,
                "failed to queue outbound envelope"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One adapter's connection lifecycle. Reusable across reconnects: every
/// call to [`run`](Session::run) opens a fresh transport.
pub struct Session {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    permits: Arc<Semaphore>,
    /// Present while `Listening`; dropping it stops the scheduler once its
    /// queue is empty.
    tasks: Option<mpsc::Sender<ScheduledTask>>,
}

/// An accepted invoke waiting for a permit.
struct ScheduledTask {
    envelope: Envelope,
    call: TaskCall,
    _guard: TaskGuard,
}

impl Session {
    #[must_use]
    pub fn new(config: AdapterConfig, registry: Arc<HandlerRegistry>) -> Self {
        let dispatcher = Dispatcher::new(registry, &config);
        let (outbound, outbound_rx) =
            OutboundHandle::channel(config.connection.outbound_channel_capacity);
        let (inbound, _) = broadcast::channel(INBOUND_BROADCAST_CAPACITY);
        let permits = Arc::new(Semaphore::new(config.dispatch.max_concurrent_tasks.max(1)));
        let tracker = CorrelationTracker::new(config.connection.max_pending_requests);

        Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                state: ArcSwap::from_pointee(SessionState::Disconnected),
                tracker,
                shutdown: ShutdownController::new(),
                outbound,
                inbound,
            }),
            dispatcher,
            outbound_rx,
            permits,
            tasks: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.shared.config
    }

    /// Connects, registers, and serves until the connection ends.
    ///
    /// Returns `Ok` once the session has been `Listening`, whatever ended it.
    ///
    /// # Errors
    ///
    /// `SessionError` if the transport cannot be opened or the handshake
    /// envelopes cannot be written.
    pub async fn run<C: Connector>(&mut self, connector: &C) -> Result<SessionExit, SessionError> {
        // subscribed before connecting so a shutdown during the handshake is seen
        let mut shutdown_rx = self.shared.shutdown.subscribe();
        if self.shared.shutdown.is_triggered() {
            return Ok(SessionExit::Shutdown);
        }

        self.discard_outbound();
        self.shared.set_state(SessionState::Connecting);

        let opened = tokio::select! {
            biased;
            () = shutdown_requested(&mut shutdown_rx) => None,
            opened = connector.open() => Some(opened),
        };
        let mut transport = match opened {
            Some(Ok(transport)) => transport,
            Some(Err(e)) => {
                self.shared.set_state(SessionState::Disconnected);
                return Err(SessionError::Connect(e));
            }
            None => {
                self.shared.set_state(SessionState::Disconnected);
                tracing::info!("shutdown requested while connecting");
                return Ok(SessionExit::Shutdown);
            }
        };

        let handshake = tokio::select! {
            biased;
            () = shutdown_requested(&mut shutdown_rx) => None,
            result = self.handshake(&mut transport) => Some(result),
        };
        match handshake {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                let _ = transport.close().await;
                self.shared.set_state(SessionState::Disconnected);
                return Err(SessionError::Handshake(e));
            }
            None => {
                self.shared.set_state(SessionState::Closing);
                let _ = transport.close().await;
                self.shared.set_state(SessionState::Disconnected);
                tracing::info!("shutdown requested during handshake");
                return Ok(SessionExit::Shutdown);
            }
        }

        self.tasks = Some(self.start_scheduler());
        self.shared.set_state(SessionState::Listening);
        tracing::info!(
            adapter_id = %self.shared.config.adapter_id,
            transport = transport.kind().as_str(),
            "session listening"
        );

        let exit = self.listen(&mut transport, &mut shutdown_rx).await;
        self.teardown(&mut transport, &exit).await;
        Ok(exit)
    }

    async fn handshake<T: Transport>(&mut self, transport: &mut T) -> Result<(), TransportError> {
        let config = &self.shared.config;

        transport.send(codec::encode(&register_envelope(config))).await?;
        self.shared.set_state(SessionState::Registered);
        tracing::info!(
            adapter_id = %config.adapter_id,
            intent = config.flavor.register_intent(),
            "registered with kernel"
        );

        if config.flavor == ProtocolFlavor::Control {
            if let Some(topic) = &config.subscribe_topic {
                transport.send(codec::encode(&subscribe_envelope(config, topic))).await?;
                self.shared.set_state(SessionState::Subscribed);
                tracing::info!(topic = %topic, "subscribed");
            }
        }
        Ok(())
    }

    async fn listen<T: Transport>(
        &mut self,
        transport: &mut T,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionExit {
        loop {
            tokio::select! {
                biased;

                () = shutdown_requested(shutdown_rx) => return SessionExit::Shutdown,

                Some(msg) = self.outbound_rx.recv() => match msg {
                    OutboundMessage::Frame(frame) => {
                        if let Err(e) = transport.send(frame).await {
                            tracing::warn!(error = %e, "transport send failed");
                        }
                    }
                    OutboundMessage::Close(reason) => return SessionExit::Closed(reason),
                },

                frame = transport.recv() => match frame {
                    None => return SessionExit::PeerClosed,
                    Some(Err(
                        e @ (TransportError::FrameTooLarge { .. } | TransportError::InvalidUtf8),
                    )) => {
                        tracing::warn!(
                            error = %e,
                            kind = %ErrorKind::Protocol,
                            "dropping inbound frame"
                        );
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "transport receive failed");
                        return SessionExit::ReceiveFailed(e.to_string());
                    }
                    Some(Ok(bytes)) => self.on_frame(&bytes),
                },
            }
        }
    }

    fn on_frame(&self, bytes: &[u8]) {
        let envelope = match codec::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, kind = %e.kind(), "dropping undecodable frame");
                return;
            }
        };

        let expected = self.shared.config.version();
        if envelope.version != expected {
            if self.shared.config.version_policy.accepts(expected, &envelope.version) {
                tracing::debug!(expected, got = %envelope.version, "tolerating version mismatch");
            } else {
                tracing::warn!(
                    expected,
                    got = %envelope.version,
                    intent = %envelope.intent,
                    "rejecting envelope with incompatible version"
                );
                return;
            }
        }

        if envelope.intent == intents::RESPONSE {
            if let Some(trace_id) = envelope.trace_id().map(str::to_string) {
                if self.shared.tracker.contains(&trace_id) {
                    self.shared.tracker.resolve(&trace_id, envelope);
                    return;
                }
            }
        }

        match classify(&envelope) {
            Classified::Task(call) => self.schedule(envelope, call),
            Classified::Rejected(err) => {
                tracing::debug!(
                    trace_id = envelope.trace_id().unwrap_or(""),
                    error = %err,
                    "rejecting invoke"
                );
                let response = self.dispatcher.reject(&err);
                let reply = self.dispatcher.responses().reply(&envelope, &response);
                self.shared.enqueue_now(&reply);
            }
            Classified::Ping => {
                if self.shared.config.dispatch.answer_pings {
                    let pong = self.dispatcher.responses().pong(&envelope);
                    self.shared.enqueue_now(&pong);
                }
            }
            skipped @ (Classified::ControlPlane | Classified::NotATask) => {
                tracing::debug!(
                    intent = %envelope.intent,
                    target = %envelope.target,
                    kind = ?skipped.error_kind(),
                    "skipping non-task envelope"
                );
                if self.shared.inbound.receiver_count() > 0 {
                    let _ = self.shared.inbound.send(envelope);
                }
            }
        }
    }

    fn schedule(&self, envelope: Envelope, call: TaskCall) {
        let Some(tasks) = &self.tasks else {
            return;
        };
        let task = ScheduledTask {
            envelope,
            call,
            _guard: self.shared.shutdown.track_task(),
        };
        if let Err(e) = tasks.try_send(task) {
            let task = match e {
                mpsc::error::TrySendError::Full(task)
                | mpsc::error::TrySendError::Closed(task) => task,
            };
            tracing::warn!(
                trace_id = task.envelope.trace_id().unwrap_or(""),
                task = %task.call.key,
                "task queue full; rejecting invoke"
            );
            let response = self.dispatcher.reject(&TaskError::execution("Task queue is full"));
            let reply = self.dispatcher.responses().reply(&task.envelope, &response);
            self.shared.enqueue_now(&reply);
        }
    }

    /// Admits queued tasks in arrival order, one permit each, and runs every
    /// admitted task on its own tokio task.
    fn start_scheduler(&self) -> mpsc::Sender<ScheduledTask> {
        let capacity = self.shared.config.connection.outbound_channel_capacity;
        let (tx, mut rx) = mpsc::channel::<ScheduledTask>(capacity);
        let permits = Arc::clone(&self.permits);
        let dispatcher = self.dispatcher.clone();
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let dispatcher = dispatcher.clone();
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let response = dispatcher.dispatch(task.call).await;
                    let reply = dispatcher.responses().reply(&task.envelope, &response);
                    shared.enqueue(&reply).await;
                    // held until the reply is queued so replies keep admission order
                    drop(permit);
                });
            }
        });
        tx
    }

    async fn teardown<T: Transport>(&mut self, transport: &mut T, exit: &SessionExit) {
        self.shared.set_state(SessionState::Closing);
        let cancelled = self.shared.tracker.cancel_all("disconnected");

        if *exit == SessionExit::Shutdown {
            self.drain(transport).await;
        }

        self.tasks = None;
        self.discard_outbound();
        if let Err(e) = transport.close().await {
            tracing::debug!(error = %e, "error closing transport");
        }
        self.shared.set_state(SessionState::Disconnected);
        tracing::info!(reason = ?exit, cancelled, "session closed");
    }

    /// Keeps writing replies while running tasks finish, up to `drain_timeout`.
    async fn drain<T: Transport>(&mut self, transport: &mut T) {
        let timeout = self.shared.config.dispatch.drain_timeout;
        let shared = Arc::clone(&self.shared);
        let drain = shared.shutdown.drained(timeout);
        tokio::pin!(drain);
        loop {
            tokio::select! {
                drained = &mut drain => {
                    if !drained {
                        tracing::warn!(
                            running = self.shared.shutdown.running_tasks(),
                            "drain timeout elapsed with tasks still running"
                        );
                    }
                    break;
                }
                Some(msg) = self.outbound_rx.recv() => {
                    if let OutboundMessage::Frame(frame) = msg {
                        if let Err(e) = transport.send(frame).await {
                            tracing::debug!(error = %e, "send failed while draining");
                        }
                    }
                }
            }
        }
        while let Ok(msg) = self.outbound_rx.try_recv() {
            if let OutboundMessage::Frame(frame) = msg {
                let _ = transport.send(frame).await;
            }
        }
    }

    fn discard_outbound(&mut self) {
        let mut discarded = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "discarded stale outbound messages");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("adapter_id", &self.shared.config.adapter_id)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

/// Resolves once shutdown has been triggered, including before this call.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // the controller is gone; nothing can trigger shutdown any more
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake envelopes
// ---------------------------------------------------------------------------

/// Registration envelope for the configured flavor.
#[must_use]
pub fn register_envelope(config: &AdapterConfig) -> Envelope {
    let version = config.version();
    let id = config.adapter_id.as_str();
    match config.flavor {
        ProtocolFlavor::Control => Envelope::new(
            version,
            id,
            KERNEL_TARGET,
            intents::REGISTER_ADAPTER,
            json!({
                "adapterId": id,
                "capabilities": config.capabilities,
                "runtime": config.language,
            }),
        )
        .with_trace_id(id)
        .with_meta("language", config.language.as_str())
        .with_meta("adapter_version", config.adapter_version.as_str()),
        ProtocolFlavor::Legacy => Envelope::new(
            version,
            id,
            KERNEL_TARGET,
            intents::REGISTER,
            json!({ "service_id": id }),
        ),
    }
}

#[must_use]
pub fn subscribe_envelope(config: &AdapterConfig, topic: &str) -> Envelope {
    let id = config.adapter_id.as_str();
    Envelope::new(
        config.version(),
        id,
        KERNEL_TARGET,
        intents::SUBSCRIBE,
        json!({ "topic": topic }),
    )
    .with_trace_id(format!("{id}-sub"))
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Cloneable handle for code that does not own the session loop.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Stream of inbound envelopes that are neither tasks nor correlated replies.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.shared.inbound.subscribe()
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.tracker.len()
    }

    /// Queues an envelope without waiting for a reply.
    ///
    /// # Errors
    ///
    /// `TransportError::NotConnected` outside `Registered`..`Listening`, or a
    /// queue error if the outbound queue stays full.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.send_frame(codec::encode(envelope)).await
    }

    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.shared
            .outbound
            .send_timeout(
                OutboundMessage::Frame(frame),
                self.shared.config.connection.send_timeout,
            )
            .await?;
        Ok(())
    }

    /// Sends `envelope` and waits for the `response` carrying its trace id.
    ///
    /// A trace id is generated when the envelope has none. Retryable send
    /// failures are retried up to `send_retries` times while the pending
    /// entry stays registered.
    ///
    /// # Errors
    ///
    /// `RequestError::Transport` if the envelope could not be sent,
    /// `RequestError::Correlation` on timeout, disconnect, or a duplicate
    /// trace id.
    pub async fn request(
        &self,
        mut envelope: Envelope,
        timeout: Option<Duration>,
    ) -> Result<Envelope, RequestError> {
        let trace_id = envelope
            .meta
            .trace_id
            .get_or_insert_with(new_trace_id)
            .clone();
        let timeout = timeout.or(Some(self.shared.config.connection.request_timeout));
        let pending = self.shared.tracker.register(&trace_id, timeout)?;
        let frame = codec::encode(&envelope);

        let retries = self.shared.config.connection.send_retries;
        let mut attempt = 0;
        loop {
            match self.send_frame(frame.clone()).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    tracing::debug!(
                        trace_id = %trace_id,
                        attempt,
                        error = %e,
                        "retrying request send"
                    );
                }
                Err(e) => {
                    // dropping the waitable removes the pending entry
                    drop(pending);
                    return Err(e.into());
                }
            }
        }

        Ok(pending.wait().await?)
    }

    /// Asks the session loop to close the transport without shutting down
    /// the supervisor.
    ///
    /// # Errors
    ///
    /// A queue error if the loop cannot be reached.
    pub fn close(&self, reason: Option<String>) -> Result<(), TransportError> {
        self.shared
            .outbound
            .try_send(OutboundMessage::Close(reason))
            .map_err(TransportError::from)
    }

    /// Triggers shutdown. The loop drains running tasks and exits.
    pub fn shutdown(&self) {
        self.shared.shutdown.trigger();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.is_triggered()
    }

    pub(crate) fn shutdown_receiver(&self) -> tokio::sync::watch::Receiver<bool> {
        self.shared.shutdown.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use meshlink_core::TaskStatus;
    use serde_json::Value;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::network::transport::memory::{self, MemoryConnector, MemoryPeer};
    use crate::network::transport::TransportKind;
    use crate::service::default_registry;

    fn config() -> AdapterConfig {
        let mut config = AdapterConfig::new("rust-adapter");
        config.dispatch.drain_timeout = Duration::from_secs(2);
        config
    }

    type RunResult = Result<SessionExit, SessionError>;

    fn start(config: AdapterConfig) -> (SessionHandle, MemoryPeer, JoinHandle<RunResult>) {
        let registry = Arc::new(default_registry(&config).unwrap());
        let mut session = Session::new(config, registry);
        let handle = session.handle();
        let (transport, peer) = memory::pair();
        let connector = MemoryConnector::new([transport]);
        let join = tokio::spawn(async move { session.run(&connector).await });
        (handle, peer, join)
    }

    async fn wait_listening(handle: &SessionHandle) {
        for _ in 0..200 {
            if handle.state() == SessionState::Listening {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never reached Listening");
    }

    fn invoke(trace_id: &str, payload: Value) -> Envelope {
        Envelope::new("8.0", "caller", "rust-adapter", intents::INVOKE, payload)
            .with_trace_id(trace_id)
    }

    #[tokio::test]
    async fn handshake_sends_register_then_subscribe() {
        let (handle, mut peer, _join) = start(config());

        let register = peer.recv().await.unwrap();
        assert_eq!(register.intent, "register_adapter");
        assert_eq!(register.target, "kernel");
        assert_eq!(register.version, "8.0");
        assert_eq!(register.trace_id(), Some("rust-adapter"));
        assert_eq!(register.payload["adapterId"], "rust-adapter");
        assert_eq!(register.payload["capabilities"], json!(["execute", "math"]));
        assert_eq!(register.meta.extra["language"], "rust");

        let subscribe = peer.recv().await.unwrap();
        assert_eq!(subscribe.intent, "subscribe");
        assert_eq!(subscribe.trace_id(), Some("rust-adapter-sub"));
        assert_eq!(subscribe.payload["topic"], "adapter:rust-adapter:execute");

        wait_listening(&handle).await;
        handle.shutdown();
    }

    #[tokio::test]
    async fn legacy_flavor_registers_without_subscribe() {
        let mut config = config();
        config.flavor = ProtocolFlavor::Legacy;
        let (handle, mut peer, _join) = start(config);

        let register = peer.recv().await.unwrap();
        assert_eq!(register.intent, "REGISTER");
        assert_eq!(register.version, "1.0");
        assert_eq!(register.target, "kernel");
        assert_eq!(register.payload, json!({"service_id": "rust-adapter"}));

        wait_listening(&handle).await;
        handle.shutdown();
    }

    #[tokio::test]
    async fn invoke_is_answered_with_response() {
        let (handle, mut peer, _join) = start(config());
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        peer.send(&invoke("t-1", json!({"task_name": "math.sum", "inputs": [1, 2, 3]})))
            .await
            .unwrap();

        let reply = peer.recv().await.unwrap();
        assert_eq!(reply.intent, "response");
        assert_eq!(reply.target, "caller");
        assert_eq!(reply.trace_id(), Some("t-1"));
        assert_eq!(reply.payload["status"], "ok");
        assert_eq!(reply.payload["result"], json!(6.0));
        assert_eq!(reply.payload["executed_by"], "rust-adapter");
        handle.shutdown();
    }

    #[tokio::test]
    async fn sequential_tasks_complete_in_order() {
        let (handle, mut peer, _join) = start(config());
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        for i in 0..5 {
            peer.send(&invoke(&format!("t-{i}"), json!({"task_name": "echo", "data": {"i": i}})))
                .await
                .unwrap();
        }
        for i in 0..5 {
            let reply = peer.recv().await.unwrap();
            assert_eq!(reply.trace_id(), Some(format!("t-{i}").as_str()));
            assert_eq!(reply.payload["result"]["i"], i);
        }
        handle.shutdown();
    }

    #[tokio::test]
    async fn bad_frames_and_control_traffic_do_not_end_session() {
        let (handle, mut peer, _join) = start(config());
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        peer.send_raw(b"not-json".to_vec()).await.unwrap();
        peer.send(&Envelope::new(
            "8.0",
            "someone",
            "kernel",
            intents::REGISTER_ADAPTER,
            json!({"task_name": "math.sum", "inputs": [1]}),
        ))
        .await
        .unwrap();
        peer.send(&Envelope::new("8.0", "kernel", "rust-adapter", "GREETING", json!({})))
            .await
            .unwrap();
        peer.send(&invoke("after", json!({"task_name": "echo"}))).await.unwrap();

        let reply = peer.recv().await.unwrap();
        assert_eq!(reply.trace_id(), Some("after"));
        assert_eq!(handle.state(), SessionState::Listening);
        handle.shutdown();
    }

    #[tokio::test]
    async fn invoke_without_task_name_gets_validation_error() {
        let (handle, mut peer, _join) = start(config());
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        peer.send(&invoke("bad", json!({"inputs": [1]}))).await.unwrap();
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply.payload["status"], "error");
        assert_eq!(reply.payload["error_kind"], "ValidationError");
        handle.shutdown();
    }

    #[tokio::test]
    async fn handler_error_is_error_response() {
        let (handle, mut peer, _join) = start(config());
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        peer.send(&invoke("div", json!({"task_name": "math.divide", "inputs": [10, 2, 0]})))
            .await
            .unwrap();
        let reply = peer.recv().await.unwrap();
        let response: meshlink_core::TaskResponse = serde_json::from_value(reply.payload).unwrap();
        assert_eq!(response.status, TaskStatus::Error);
        assert_eq!(response.error.as_deref(), Some("Division by zero"));
        assert!(response.result.is_none());
        handle.shutdown();
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (handle, mut peer, _join) = start(config());
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        let ping = Envelope::new("8.0", "kernel", "rust-adapter", "PING", Value::Null)
            .with_trace_id("p-1");
        peer.send(&ping).await.unwrap();
        let pong = peer.recv().await.unwrap();
        assert_eq!(pong.intent, "pong");
        assert_eq!(pong.trace_id(), Some("p-1"));
        handle.shutdown();
    }

    #[tokio::test]
    async fn request_is_resolved_by_matching_response() {
        let (handle, mut peer, _join) = start(config());
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();
        wait_listening(&handle).await;

        let requester = handle.clone();
        let call = tokio::spawn(async move {
            let payload = json!({"task_name": "echo"});
            let env = Envelope::new("8.0", "rust-adapter", "other", intents::INVOKE, payload)
                .with_trace_id("req-1");
            requester.request(env, Some(Duration::from_secs(5))).await
        });

        let outgoing = peer.recv().await.unwrap();
        assert_eq!(outgoing.trace_id(), Some("req-1"));
        // unrelated traffic before the reply
        let unrelated = Envelope::new("8.0", "other", "rust-adapter", intents::RESPONSE, json!({}))
            .with_trace_id("zzz");
        peer.send(&unrelated).await.unwrap();
        let answer = json!({"status": "ok", "result": 1});
        peer.send(&outgoing.reply("8.0", "other", intents::RESPONSE, answer))
            .await
            .unwrap();

        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.payload["result"], 1);
        assert_eq!(handle.pending_requests(), 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn peer_close_cancels_pending_requests() {
        let (handle, mut peer, join) = start(config());
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();
        wait_listening(&handle).await;

        let mut calls = Vec::new();
        for i in 0..3 {
            let requester = handle.clone();
            calls.push(tokio::spawn(async move {
                let env = Envelope::new("8.0", "rust-adapter", "other", intents::INVOKE, json!({}))
                    .with_trace_id(format!("r-{i}"));
                requester.request(env, None).await
            }));
        }
        for _ in 0..3 {
            peer.recv().await.unwrap();
        }
        drop(peer);

        assert_eq!(join.await.unwrap().unwrap(), SessionExit::PeerClosed);
        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert!(matches!(
                err,
                RequestError::Correlation(CorrelationError::Cancelled { ref reason, .. })
                    if reason == "disconnected"
            ));
        }
        assert_eq!(handle.state(), SessionState::Disconnected);
        assert_eq!(handle.pending_requests(), 0);
    }

    #[tokio::test]
    async fn send_while_disconnected_is_refused() {
        let config = config();
        let registry = Arc::new(default_registry(&config).unwrap());
        let session = Session::new(config, registry);
        let handle = session.handle();
        let env = Envelope::new("8.0", "rust-adapter", "other", intents::INVOKE, json!({}));
        assert!(matches!(handle.send(&env).await, Err(TransportError::NotConnected)));
        let err = handle.request(env, None).await.unwrap_err();
        assert!(matches!(err, RequestError::Transport(TransportError::NotConnected)));
        assert_eq!(handle.pending_requests(), 0);
    }

    #[tokio::test]
    async fn shutdown_drains_running_task() {
        let mut config = config();
        config.execution.program = "sh".to_string();
        config.execution.args = vec!["-c".to_string()];
        let (handle, mut peer, join) = start(config);
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        let slow = json!({"task_name": "code.execute", "code": "sleep 0.2; echo done"});
        peer.send(&invoke("slow", slow)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        let reply = peer.recv().await.unwrap();
        assert_eq!(reply.trace_id(), Some("slow"));
        assert_eq!(reply.payload["result"], "done\n");
        assert_eq!(join.await.unwrap().unwrap(), SessionExit::Shutdown);
    }

    #[tokio::test]
    async fn slow_task_does_not_stall_pings_or_order() {
        let mut config = config();
        config.execution.program = "sh".to_string();
        config.execution.args = vec!["-c".to_string()];
        let (handle, mut peer, _join) = start(config);
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        let slow = json!({"task_name": "code.execute", "code": "sleep 0.3; echo slow"});
        peer.send(&invoke("slow", slow)).await.unwrap();
        peer.send(&invoke("fast", json!({"task_name": "echo"}))).await.unwrap();
        let ping = Envelope::new("8.0", "kernel", "rust-adapter", "ping", Value::Null)
            .with_trace_id("p");
        peer.send(&ping).await.unwrap();

        let first = peer.recv().await.unwrap();
        assert_eq!(first.intent, "pong");
        assert_eq!(peer.recv().await.unwrap().trace_id(), Some("slow"));
        assert_eq!(peer.recv().await.unwrap().trace_id(), Some("fast"));
        handle.shutdown();
    }

    #[tokio::test]
    async fn connect_failure_is_error_and_disconnected() {
        let config = config();
        let registry = Arc::new(default_registry(&config).unwrap());
        let mut session = Session::new(config, registry);
        let connector = MemoryConnector::new([]);
        let err = session.run(&connector).await.unwrap_err();
        assert!(matches!(err, SessionError::Connect(TransportError::ConnectionRefused(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn strict_version_policy_drops_mismatched_envelopes() {
        let mut config = config();
        config.version_policy = crate::config::VersionPolicy::Exact;
        let (handle, mut peer, _join) = start(config);
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        let mut old = invoke("old", json!({"task_name": "echo"}));
        old.version = "1.0".to_string();
        peer.send(&old).await.unwrap();
        peer.send(&invoke("new", json!({"task_name": "echo"}))).await.unwrap();

        let reply = peer.recv().await.unwrap();
        assert_eq!(reply.trace_id(), Some("new"));
        handle.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replies_keep_arrival_order_on_multi_thread_runtime() {
        let (handle, mut peer, _join) = start(config());
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();
        wait_listening(&handle).await;

        for i in 0..50 {
            // alternate large and small replies so encoding time varies
            let data = if i % 2 == 0 { "x".repeat(64 * 1024) } else { String::new() };
            peer.send(&invoke(&format!("t{i}"), json!({"task_name": "echo", "data": data})))
                .await
                .unwrap();
        }
        for i in 0..50 {
            let reply = peer.recv().await.unwrap();
            assert_eq!(reply.trace_id(), Some(format!("t{i}").as_str()));
        }
        handle.shutdown();
    }

    /// Connector whose `open` never completes.
    struct HangingConnector;

    #[async_trait::async_trait]
    impl Connector for HangingConnector {
        type Transport = StalledTransport;

        async fn open(&self) -> Result<StalledTransport, TransportError> {
            std::future::pending().await
        }
    }

    /// Opens a transport whose writes never complete.
    struct StalledConnector;

    #[async_trait::async_trait]
    impl Connector for StalledConnector {
        type Transport = StalledTransport;

        async fn open(&self) -> Result<StalledTransport, TransportError> {
            Ok(StalledTransport)
        }
    }

    struct StalledTransport;

    #[async_trait::async_trait]
    impl Transport for StalledTransport {
        async fn send(&mut self, _frame: Vec<u8>) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Memory
        }
    }

    async fn shutdown_while_stuck<C: Connector + 'static>(connector: C, stuck_in: SessionState) {
        let config = config();
        let registry = Arc::new(default_registry(&config).unwrap());
        let mut session = Session::new(config, registry);
        let handle = session.handle();
        let join = tokio::spawn(async move { session.run(&connector).await });

        for _ in 0..200 {
            if handle.state() == stuck_in {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.state(), stuck_in);

        handle.shutdown();
        let exit = tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .expect("session ignored shutdown")
            .unwrap()
            .unwrap();
        assert_eq!(exit, SessionExit::Shutdown);
        assert_eq!(handle.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn shutdown_while_connecting_stops_the_session() {
        shutdown_while_stuck(HangingConnector, SessionState::Connecting).await;
    }

    #[tokio::test]
    async fn shutdown_during_handshake_stops_the_session() {
        shutdown_while_stuck(StalledConnector, SessionState::Connecting).await;
    }
}
