//! Connection state machine and socket ownership.

use std::sync::Arc;

use futures_util::SinkExt;
use futures_util::stream::{SplitSink, SplitStream};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::CredentialsProvider;
use crate::error::FmpError;
use crate::ws::config::WsConfig;
use crate::ws::gate::{AckWaiter, CorrelationGate, deadline};
use crate::ws::messages::{AckKind, ControlFrame, Quote};
use crate::ws::registry::SubscriptionRegistry;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, WsMessage>;
pub(crate) type WsReceiver = SplitStream<WsStream>;

/// Lifecycle of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Dialing.
    Connecting,
    /// Login frame sent, waiting for its acknowledgement.
    Authenticating,
    /// Authenticated and streaming.
    Connected,
    /// `disconnect` in progress.
    Closing,
}

/// One connect-to-disconnect lifetime of the socket and its tasks.
#[derive(Debug, Clone)]
pub(crate) struct Generation {
    pub(crate) id: u64,
    pub(crate) token: CancellationToken,
}

pub(crate) enum ConnectStart {
    AlreadyConnected,
    Begin(Generation),
}

/// The connection state machine.
///
/// A failed connect is sticky: every later `connect` replays the same error
/// until `disconnect` resets the machine.
#[derive(Debug, Default)]
pub(crate) struct Connection {
    state: ConnectionState,
    generation: u64,
    token: Option<CancellationToken>,
    failure: Option<FmpError>,
    established: bool,
}

impl Connection {
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn begin_connect(
        &mut self,
        parent: &CancellationToken,
    ) -> Result<ConnectStart, FmpError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        match self.state {
            // Connecting/Authenticating here means the supervisor is re-dialing
            // an established session.
            ConnectionState::Connected
            | ConnectionState::Connecting
            | ConnectionState::Authenticating => Ok(ConnectStart::AlreadyConnected),
            ConnectionState::Closing => Err(FmpError::NotConnected),
            ConnectionState::Disconnected => {
                self.generation += 1;
                let token = parent.child_token();
                self.token = Some(token.clone());
                self.state = ConnectionState::Connecting;
                self.established = false;
                Ok(ConnectStart::Begin(Generation {
                    id: self.generation,
                    token,
                }))
            }
        }
    }

    pub(crate) fn is_current(&self, generation: &Generation) -> bool {
        self.generation == generation.id
            && !matches!(
                self.state,
                ConnectionState::Disconnected | ConnectionState::Closing
            )
    }

    /// Whether `generation` completed its initial login.
    pub(crate) fn was_established(&self, generation: &Generation) -> bool {
        self.is_current(generation) && self.established
    }

    pub(crate) fn advance(
        &mut self,
        generation: &Generation,
        state: ConnectionState,
    ) -> Result<(), FmpError> {
        if !self.is_current(generation) {
            return Err(FmpError::Cancelled);
        }
        self.state = state;
        if state == ConnectionState::Connected {
            self.established = true;
        }
        Ok(())
    }

    /// Take `generation` out of `Connected` while its supervisor recovers.
    /// Returns `false` when the generation was already gone.
    pub(crate) fn suspend(&mut self, generation: &Generation) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Connecting;
        }
        true
    }

    /// The live generation, when authenticated.
    pub(crate) fn live_generation(&self) -> Option<Generation> {
        match (self.state, &self.token) {
            (ConnectionState::Connected, Some(token)) => Some(Generation {
                id: self.generation,
                token: token.clone(),
            }),
            _ => None,
        }
    }

    /// Record a failed connect of `generation`.
    pub(crate) fn fail(&mut self, generation: &Generation, err: FmpError) {
        if self.generation != generation.id {
            return;
        }
        generation.token.cancel();
        self.token = None;
        self.state = ConnectionState::Disconnected;
        self.failure = Some(err);
    }

    /// End a generation without recording a failure. Returns `false` when the
    /// generation was already gone.
    pub(crate) fn retire(&mut self, generation: &Generation) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        generation.token.cancel();
        self.token = None;
        self.state = ConnectionState::Disconnected;
        true
    }

    pub(crate) fn begin_close(&mut self) -> Option<CancellationToken> {
        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Closing;
        }
        self.token.take()
    }

    pub(crate) fn finish_close(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.failure = None;
        self.established = false;
        self.generation += 1;
    }
}

struct SinkSlot {
    generation: u64,
    sink: WsSink,
}

/// State shared between the client handle and its background tasks.
pub(crate) struct Shared {
    pub(crate) config: WsConfig,
    pub(crate) credentials: Arc<dyn CredentialsProvider>,
    /// Governs every generation; cancelled when the client is dropped.
    pub(crate) cancel: CancellationToken,
    pub(crate) connection: Mutex<Connection>,
    /// Serializes `connect` and `disconnect`.
    pub(crate) connect_lock: tokio::sync::Mutex<()>,
    sink: tokio::sync::Mutex<Option<SinkSlot>>,
    pub(crate) gate: CorrelationGate,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) quotes: Mutex<Option<mpsc::Receiver<Quote>>>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.connection.lock().state())
            .field("config", &self.config)
            .finish()
    }
}

impl Shared {
    pub(crate) fn new(
        config: WsConfig,
        credentials: Arc<dyn CredentialsProvider>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            credentials,
            cancel,
            connection: Mutex::new(Connection::default()),
            connect_lock: tokio::sync::Mutex::new(()),
            sink: tokio::sync::Mutex::new(None),
            gate: CorrelationGate::new(),
            registry: SubscriptionRegistry::new(),
            quotes: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.connection.lock().state()
    }

    pub(crate) fn advance(
        &self,
        generation: &Generation,
        state: ConnectionState,
    ) -> Result<(), FmpError> {
        self.connection.lock().advance(generation, state)
    }

    /// Register a wait for `kind` on the live generation.
    ///
    /// Checked and registered under the connection lock, so a concurrent
    /// [`suspend`](Self::suspend) either refuses the wait or aborts it.
    pub(crate) fn register_live(
        &self,
        kind: AckKind,
    ) -> Result<(Generation, AckWaiter), FmpError> {
        let connection = self.connection.lock();
        let generation = connection.live_generation().ok_or(FmpError::NotConnected)?;
        Ok((generation, self.gate.register(kind)))
    }

    /// Stop admitting control operations on `generation` and fail pending
    /// waits with `failure`.
    pub(crate) fn suspend(&self, generation: &Generation, failure: &FmpError) {
        let mut connection = self.connection.lock();
        if connection.suspend(generation) {
            self.gate.abort_all(failure);
        }
    }

    /// Dial `endpoint`, bounded by both tokens and the configured dial timeout.
    pub(crate) async fn dial(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
        scope: &CancellationToken,
    ) -> Result<WsStream, FmpError> {
        let url = Url::parse(endpoint)?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FmpError::Cancelled),
            () = scope.cancelled() => Err(FmpError::Cancelled),
            () = deadline(self.config.dial_timeout) => Err(FmpError::Timeout),
            result = connect_async(url.as_str()) => match result {
                Ok((stream, _)) => Ok(stream),
                Err(e) => Err(FmpError::WebSocketMsg(format!("Failed to connect to {url}: {e}"))),
            },
        }
    }

    /// Make `sink` the socket of `generation`. Fails when the generation ended.
    pub(crate) async fn install_sink(
        &self,
        generation: &Generation,
        sink: WsSink,
    ) -> Result<(), FmpError> {
        let mut slot = self.sink.lock().await;
        if !self.connection.lock().is_current(generation) {
            return Err(FmpError::Cancelled);
        }
        *slot = Some(SinkSlot {
            generation: generation.id,
            sink,
        });
        Ok(())
    }

    /// Send a control frame on the current socket.
    pub(crate) async fn send_frame(&self, frame: &ControlFrame) -> Result<(), FmpError> {
        let json = serde_json::to_string(frame)?;

        let mut slot = self.sink.lock().await;
        let slot = slot.as_mut().ok_or(FmpError::NotConnected)?;
        slot.sink
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| {
                FmpError::WebSocketMsg(format!("Failed to send {} frame: {e}", frame.ack_kind()))
            })
    }

    /// Close the socket. With `Some(generation)` only that generation's socket
    /// is closed. Closing a missing or already closed socket succeeds.
    pub(crate) async fn close_sink(&self, generation: Option<u64>) -> Result<(), FmpError> {
        let slot = {
            let mut guard = self.sink.lock().await;
            let stale = matches!(
                (generation, guard.as_ref()),
                (Some(id), Some(slot)) if slot.generation != id
            );
            if stale { None } else { guard.take() }
        };
        let Some(mut slot) = slot else {
            return Ok(());
        };

        match slot.sink.close().await {
            Ok(()) => Ok(()),
            Err(
                e @ (WsError::ConnectionClosed
                | WsError::AlreadyClosed
                | WsError::Io(_)
                | WsError::Protocol(_)),
            ) => {
                tracing::debug!(error = %e, "socket already closed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tear down a failed connect attempt.
    pub(crate) async fn abandon(&self, generation: &Generation, err: FmpError) {
        self.connection.lock().fail(generation, err);
        if let Err(e) = self.close_sink(Some(generation.id)).await {
            tracing::debug!(error = %e, "closing socket of failed connect");
        }
    }

    /// End `generation` after its supervisor stopped.
    pub(crate) async fn retire(&self, generation: &Generation) {
        if !self.connection.lock().retire(generation) {
            return;
        }
        if let Err(e) = self.close_sink(Some(generation.id)).await {
            tracing::debug!(error = %e, "closing socket of retired connection");
        }
        self.gate.abort_all(&FmpError::NotConnected);
        tracing::info!(generation = generation.id, "connection retired");
    }
}
