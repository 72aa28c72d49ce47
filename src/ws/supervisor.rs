//! Read loop supervision and reconnection.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::FmpError;
use crate::ws::config::ResubscribePolicy;
use crate::ws::connection::{ConnectionState, Generation, Shared, WsReceiver};
use crate::ws::dispatcher::{Dispatcher, LoopExit};
use crate::ws::messages::{AckEvent, AckKind, ControlFrame, InboundEnvelope, Quote};

enum Recovery {
    /// Keep reading the same socket.
    Resume,
    /// Read from a freshly dialed socket.
    Redialed(WsReceiver),
}

/// Owns the read loop of one generation and restarts it after failures.
///
/// Restarts draw on a single budget for the whole generation. When the budget
/// is spent, the generation is cancelled or the feed drains, the connection is
/// retired and the quote channel closes.
pub(crate) struct Supervisor {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    generation: Generation,
    endpoint: String,
}

impl Supervisor {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        generation: Generation,
        endpoint: String,
        reader: WsReceiver,
        quotes: mpsc::Sender<Quote>,
    ) -> JoinHandle<()> {
        let dispatcher = Dispatcher::new(Arc::clone(&shared), quotes, generation.token.clone());
        let supervisor = Self {
            shared,
            dispatcher,
            generation,
            endpoint,
        };
        tokio::spawn(supervisor.run(reader))
    }

    async fn run(self, mut reader: WsReceiver) {
        let mut attempt = 0u32;

        loop {
            let failure = match self.dispatcher.run(&mut reader).await {
                Ok(LoopExit::Cancelled) => {
                    tracing::debug!(generation = self.generation.id, "read loop cancelled");
                    break;
                }
                Ok(LoopExit::Drained) => {
                    tracing::info!(generation = self.generation.id, "read loop drained");
                    break;
                }
                Err(err) => err,
            };

            self.shared.suspend(&self.generation, &failure);

            match self.recover(failure, &mut attempt).await {
                Some(Recovery::Resume) => {}
                Some(Recovery::Redialed(next)) => reader = next,
                None => break,
            }
        }

        self.shared.retire(&self.generation).await;
    }

    /// Decide how to continue after `failure`. `None` ends the generation.
    async fn recover(&self, mut failure: FmpError, attempt: &mut u32) -> Option<Recovery> {
        loop {
            if self.generation.token.is_cancelled() {
                tracing::debug!(error = %failure, "read loop stopped by shutdown");
                return None;
            }
            if !self.shared.connection.lock().was_established(&self.generation) {
                // The pending connect call reports this failure itself.
                tracing::debug!(error = %failure, "read loop failed before login completed");
                return None;
            }
            if !failure.is_retryable() {
                tracing::error!(error = %failure, "read loop failed");
                return None;
            }

            *attempt += 1;
            let Some(delay) = self.shared.config.backoff_for(*attempt) else {
                tracing::error!(
                    restarts = *attempt - 1,
                    error = %failure,
                    "restart budget exhausted, closing quote stream"
                );
                return None;
            };

            tracing::warn!(
                attempt = *attempt,
                ?delay,
                error = %failure,
                "read loop failed, restarting"
            );
            tokio::select! {
                () = self.generation.token.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            if failure.is_decode() {
                let resumed = self.shared.advance(&self.generation, ConnectionState::Connected);
                if let Err(err) = resumed {
                    tracing::debug!(error = %err, "generation ended during backoff");
                    return None;
                }
                return Some(Recovery::Resume);
            }

            match self.reestablish().await {
                Ok(reader) => return Some(Recovery::Redialed(reader)),
                Err(err) => failure = err,
            }
        }
    }

    /// Dial, log in and restore subscriptions on a new socket.
    ///
    /// The generation stays out of `Connected` until subscriptions are restored.
    async fn reestablish(&self) -> Result<WsReceiver, FmpError> {
        let generation = &self.generation;
        let shared = &self.shared;

        shared.advance(generation, ConnectionState::Connecting)?;
        let stream = shared
            .dial(&self.endpoint, &generation.token, &generation.token)
            .await?;
        let (sink, mut reader) = stream.split();
        shared.install_sink(generation, sink).await?;
        shared.gate.abort_all(&FmpError::ConnectionClosed {
            reason: "socket replaced".into(),
        });
        shared.registry.reset_sequence();

        shared.advance(generation, ConnectionState::Authenticating)?;
        let login = ControlFrame::login(shared.credentials.get_credentials().expose_api_key());
        shared.send_frame(&login).await?;
        self.await_login(&mut reader).await?;
        self.restore_subscriptions().await?;

        shared.advance(generation, ConnectionState::Connected)?;
        tracing::info!(generation = generation.id, endpoint = %self.endpoint, "reconnected");
        Ok(reader)
    }

    /// Read the login acknowledgement directly off a new socket.
    async fn await_login(&self, reader: &mut WsReceiver) -> Result<(), FmpError> {
        let timeout = tokio::time::sleep(self.shared.config.handshake_timeout);
        tokio::pin!(timeout);

        loop {
            let next = tokio::select! {
                biased;
                () = self.generation.token.cancelled() => return Err(FmpError::Cancelled),
                () = &mut timeout => return Err(FmpError::Timeout),
                next = reader.next() => next,
            };

            let text = match next {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(FmpError::ConnectionClosed {
                        reason: "closed during login".into(),
                    });
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            let envelope: InboundEnvelope = serde_json::from_str(text.as_str())?;
            if envelope.event == Some(AckKind::Login) {
                return AckEvent::from_envelope(AckKind::Login, envelope)
                    .into_result()
                    .map(|_| ())
                    .map_err(FmpError::Auth);
            }
            tracing::debug!("skipping frame while waiting for login acknowledgement");
        }
    }

    async fn restore_subscriptions(&self) -> Result<(), FmpError> {
        let mut set = self.shared.registry.lock().await;
        if set.is_empty() {
            return Ok(());
        }

        match self.shared.config.resubscribe {
            ResubscribePolicy::Replay => {
                let symbols = set.symbols();
                tracing::info!(count = symbols.len(), "restoring subscriptions");
                self.shared
                    .send_frame(&ControlFrame::subscribe(symbols))
                    .await
            }
            ResubscribePolicy::Clear => {
                tracing::info!(symbols = ?set.symbols(), "dropping subscriptions after reconnect");
                set.clear();
                Ok(())
            }
        }
    }
}
