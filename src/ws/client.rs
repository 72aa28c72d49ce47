//! FMP WebSocket client implementation.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::CredentialsProvider;
use crate::config::Settings;
use crate::error::FmpError;
use crate::ws::config::WsConfig;
use crate::ws::connection::{ConnectStart, ConnectionState, Generation, Shared};
use crate::ws::messages::{AckKind, ControlFrame};
use crate::ws::stream::QuoteStream;
use crate::ws::supervisor::Supervisor;

/// FMP real-time quote client.
///
/// One client owns at most one live connection. Connecting, subscribing and
/// disconnecting may be called concurrently from any task; the client
/// serializes them internally. Quotes arrive on the [`QuoteStream`] returned
/// by [`quotes`](Self::quotes).
///
/// Dropping the client stops its background tasks.
///
/// # Example
///
/// ```rust,ignore
/// use fmp_api_client::auth::StaticCredentials;
/// use fmp_api_client::ws::{FmpWsClient, endpoints};
/// use std::sync::Arc;
///
/// let client = FmpWsClient::new(Arc::new(StaticCredentials::new("api_key")));
/// client.connect(endpoints::QUOTES).await?;
/// client.subscribe(&["AAPL", "MSFT"]).await?;
///
/// let mut quotes = client.quotes().expect("first call after connect");
/// while let Some(quote) = quotes.recv().await {
///     println!("{} {}", quote.symbol, quote.last_price);
/// }
/// ```
pub struct FmpWsClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FmpWsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FmpWsClient")
            .field("shared", &self.shared)
            .finish()
    }
}

impl FmpWsClient {
    /// Create a new client with default settings.
    pub fn new(credentials: Arc<dyn CredentialsProvider>) -> Self {
        Self::with_config(credentials, WsConfig::default())
    }

    /// Create a new client with custom configuration.
    pub fn with_config(credentials: Arc<dyn CredentialsProvider>, config: WsConfig) -> Self {
        Self::with_cancellation(credentials, config, &CancellationToken::new())
    }

    /// Create a client governed by `parent`.
    ///
    /// Cancelling `parent` stops every connection this client makes, as if
    /// the client had been dropped.
    pub fn with_cancellation(
        credentials: Arc<dyn CredentialsProvider>,
        config: WsConfig,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, credentials, parent.child_token())),
        }
    }

    /// Create a client from loaded [`Settings`].
    pub fn from_settings(settings: &Settings, config: WsConfig) -> Self {
        Self::with_config(settings.credentials_provider(), config)
    }

    /// Get the configuration.
    pub fn config(&self) -> &WsConfig {
        &self.shared.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Check if the connection is authenticated and streaming.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Symbols currently subscribed, sorted.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.shared.registry.snapshot().await
    }

    /// Connect to `endpoint` and log in.
    ///
    /// Returns once the server accepted the login. Calling `connect` on a
    /// connected client is a no-op. After a failed connect every further call
    /// returns the same error until [`disconnect`](Self::disconnect).
    pub async fn connect(&self, endpoint: &str) -> Result<(), FmpError> {
        self.connect_with_cancel(endpoint, &CancellationToken::new()).await
    }

    /// [`connect`](Self::connect), abandoned when `cancel` fires.
    ///
    /// An abandoned attempt is recorded as a [`FmpError::Cancelled`] failure
    /// and its socket is closed by the next `disconnect`.
    pub async fn connect_with_cancel(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FmpError> {
        let _serial = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FmpError::Cancelled),
            guard = self.shared.connect_lock.lock() => guard,
        };

        let start = self.shared.connection.lock().begin_connect(&self.shared.cancel)?;
        let generation = match start {
            ConnectStart::AlreadyConnected => {
                tracing::debug!("already connected");
                return Ok(());
            }
            ConnectStart::Begin(generation) => generation,
        };

        let mut attempt = ConnectAttempt {
            shared: &self.shared,
            generation: generation.clone(),
            armed: true,
        };
        let result = self.establish(endpoint, &generation, cancel).await;
        attempt.armed = false;

        match result {
            Ok(()) => {
                tracing::info!(endpoint, generation = generation.id, "connected");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(endpoint, error = %err, "connect failed");
                self.shared.abandon(&generation, err.clone()).await;
                Err(err)
            }
        }
    }

    async fn establish(
        &self,
        endpoint: &str,
        generation: &Generation,
        cancel: &CancellationToken,
    ) -> Result<(), FmpError> {
        let shared = &self.shared;

        let stream = shared.dial(endpoint, cancel, &generation.token).await?;
        let (sink, reader) = stream.split();
        shared.install_sink(generation, sink).await?;

        shared.registry.lock().await.clear();
        shared.registry.reset_sequence();
        let (quotes_tx, quotes_rx) = mpsc::channel(shared.config.quote_buffer.max(1));
        *shared.quotes.lock() = Some(quotes_rx);

        shared.advance(generation, ConnectionState::Authenticating)?;
        Supervisor::spawn(
            Arc::clone(shared),
            generation.clone(),
            endpoint.to_string(),
            reader,
            quotes_tx,
        );

        let waiter = shared.gate.register(AckKind::Login);
        let login = ControlFrame::login(shared.credentials.get_credentials().expose_api_key());
        shared.send_frame(&login).await?;
        waiter
            .wait(cancel, &generation.token, shared.config.ack_timeout)
            .await?
            .into_result()
            .map_err(FmpError::Auth)?;

        shared.advance(generation, ConnectionState::Connected)
    }

    /// Close the connection.
    ///
    /// Stops the read loop, fails pending acknowledgement waits with
    /// [`FmpError::NotConnected`] and forgets subscriptions. Idempotent; also
    /// clears a sticky connect failure.
    pub async fn disconnect(&self) -> Result<(), FmpError> {
        let _serial = self.shared.connect_lock.lock().await;

        let token = self.shared.connection.lock().begin_close();
        let closed = self.shared.close_sink(None).await;
        if let Some(token) = token {
            token.cancel();
        }
        self.shared.connection.lock().finish_close();

        self.shared.gate.abort_all(&FmpError::NotConnected);
        self.shared.registry.lock().await.clear();
        self.shared.registry.reset_sequence();
        *self.shared.quotes.lock() = None;

        tracing::info!("disconnected");
        closed
    }

    /// Subscribe to quotes for `symbols`.
    ///
    /// Returns once the server acknowledged the request. A rejected request
    /// fails with [`FmpError::Subscription`] and leaves the connection usable.
    pub async fn subscribe<S: AsRef<str>>(&self, symbols: &[S]) -> Result<(), FmpError> {
        self.subscribe_with_cancel(symbols, &CancellationToken::new()).await
    }

    /// [`subscribe`](Self::subscribe), abandoned when `cancel` fires.
    pub async fn subscribe_with_cancel<S: AsRef<str>>(
        &self,
        symbols: &[S],
        cancel: &CancellationToken,
    ) -> Result<(), FmpError> {
        let symbols = collect_symbols(symbols)?;

        let mut set = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FmpError::Cancelled),
            set = self.shared.registry.lock() => set,
        };
        let (generation, waiter) = self.shared.register_live(AckKind::Subscribe)?;
        self.shared
            .send_frame(&ControlFrame::subscribe(symbols.clone()))
            .await?;
        waiter
            .wait(cancel, &generation.token, self.shared.config.ack_timeout)
            .await?
            .into_result()
            .map_err(FmpError::Subscription)?;

        set.insert_all(&symbols);
        self.shared.registry.cancel_drain();
        tracing::debug!(?symbols, "subscribed");
        Ok(())
    }

    /// Unsubscribe from quotes for `symbols`.
    ///
    /// Returns once the request is written; the acknowledgement is not
    /// awaited. When this removes the last subscription and
    /// [`WsConfig::close_when_unsubscribed`] is set, the quote stream ends
    /// after the server acknowledges.
    pub async fn unsubscribe<S: AsRef<str>>(&self, symbols: &[S]) -> Result<(), FmpError> {
        let symbols = collect_symbols(symbols)?;

        let mut set = self.shared.registry.lock().await;
        if self.shared.connection.lock().live_generation().is_none() {
            return Err(FmpError::NotConnected);
        }

        let mut remaining = set.clone();
        remaining.remove_all(&symbols);
        let drain =
            !set.is_empty() && remaining.is_empty() && self.shared.config.close_when_unsubscribed;
        self.shared.registry.begin_unsubscribe(drain);

        let sent = self
            .shared
            .send_frame(&ControlFrame::unsubscribe(symbols.clone()))
            .await;
        if let Err(err) = sent {
            self.shared.registry.abort_unsubscribe();
            return Err(err);
        }

        *set = remaining;
        tracing::debug!(?symbols, drain, "unsubscribed");
        Ok(())
    }

    /// Take the quote stream of the current connection.
    ///
    /// Returns `None` before the first connect and on every call after the
    /// first one per connection.
    pub fn quotes(&self) -> Option<QuoteStream> {
        self.shared.quotes.lock().take().map(QuoteStream::new)
    }
}

impl Drop for FmpWsClient {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// Records an abandoned connect when the future is dropped mid-flight.
struct ConnectAttempt<'a> {
    shared: &'a Shared,
    generation: Generation,
    armed: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(generation = self.generation.id, "connect abandoned");
            self.shared
                .connection
                .lock()
                .fail(&self.generation, FmpError::Cancelled);
        }
    }
}

fn collect_symbols<S: AsRef<str>>(symbols: &[S]) -> Result<Vec<String>, FmpError> {
    if symbols.is_empty() {
        return Err(FmpError::InvalidRequest("no symbols given".into()));
    }

    symbols
        .iter()
        .map(|s| {
            let symbol = s.as_ref().trim();
            if symbol.is_empty() {
                Err(FmpError::InvalidRequest("empty symbol".into()))
            } else {
                Ok(symbol.to_string())
            }
        })
        .collect()
}
