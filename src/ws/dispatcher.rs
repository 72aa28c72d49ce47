//! Inbound frame routing.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::error::FmpError;
use crate::ws::connection::{Shared, WsReceiver};
use crate::ws::messages::{AckEvent, AckKind, InboundEnvelope, QUOTE_MESSAGE_TYPE, Quote};

/// Why a read loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// The generation token fired.
    Cancelled,
    /// The unsubscribe that emptied the subscription set was acknowledged.
    Drained,
}

/// Outcome of routing one frame.
#[derive(Debug, PartialEq)]
pub(crate) enum Routed {
    Continue,
    Quote(Quote),
    Drain,
}

/// Reads frames and routes them to the correlation gate or the quote channel.
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    quotes: mpsc::Sender<Quote>,
    token: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<Shared>,
        quotes: mpsc::Sender<Quote>,
        token: CancellationToken,
    ) -> Self {
        Self {
            shared,
            quotes,
            token,
        }
    }

    /// Run until cancelled, drained, or the first failure.
    ///
    /// A decode failure leaves `reader` usable; the loop may be resumed on it.
    pub(crate) async fn run(&self, reader: &mut WsReceiver) -> Result<LoopExit, FmpError> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.token.cancelled() => return Ok(LoopExit::Cancelled),
                next = reader.next() => next,
            };

            let routed = match next {
                Some(Ok(WsMessage::Text(text))) => self.route(text.as_str())?,
                Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => self.route(text)?,
                    Err(_) => {
                        tracing::debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                        continue;
                    }
                },
                // Handled by tungstenite
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return Err(FmpError::ConnectionClosed { reason });
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(FmpError::ConnectionClosed {
                        reason: "stream ended".into(),
                    });
                }
            };

            match routed {
                Routed::Continue => {}
                Routed::Drain => return Ok(LoopExit::Drained),
                Routed::Quote(quote) => {
                    if let Some(exit) = self.forward(quote).await {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    /// Classify one text frame.
    pub(crate) fn route(&self, text: &str) -> Result<Routed, FmpError> {
        let envelope: InboundEnvelope = serde_json::from_str(text)?;

        match envelope.event {
            Some(AckKind::Heartbeat) => {
                tracing::debug!(timestamp = ?envelope.timestamp, "heartbeat");
                Ok(Routed::Continue)
            }
            Some(kind @ (AckKind::Login | AckKind::Subscribe | AckKind::Unsubscribe)) => {
                let ack = AckEvent::from_envelope(kind, envelope);
                tracing::debug!(%kind, status = ?ack.status, message = ?ack.message, "acknowledgement");
                self.shared.gate.deliver(ack);

                if kind == AckKind::Unsubscribe && self.shared.registry.ack_unsubscribe() {
                    tracing::info!("last subscription removed, stopping read loop");
                    return Ok(Routed::Drain);
                }
                Ok(Routed::Continue)
            }
            Some(AckKind::Unknown) => {
                tracing::warn!(frame = text, "ignoring frame with unknown event");
                Ok(Routed::Continue)
            }
            None => {
                if let Some(message_type) = envelope.message_type.as_deref() {
                    if message_type != QUOTE_MESSAGE_TYPE {
                        tracing::debug!(message_type, "ignoring non-quote frame");
                        return Ok(Routed::Continue);
                    }
                }

                let quote: Quote = serde_json::from_str(text)?;
                if !quote.has_trade() {
                    tracing::trace!(symbol = %quote.symbol, "dropping quote without last price");
                    return Ok(Routed::Continue);
                }
                Ok(Routed::Quote(quote))
            }
        }
    }

    /// Deliver a quote, waiting for channel capacity.
    async fn forward(&self, quote: Quote) -> Option<LoopExit> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Some(LoopExit::Cancelled),
            sent = self.quotes.send(quote) => {
                if let Err(mpsc::error::SendError(quote)) = sent {
                    tracing::trace!(symbol = %quote.symbol, "quote receiver dropped");
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;
    use crate::auth::StaticCredentials;
    use crate::ws::config::WsConfig;

    fn dispatcher(config: WsConfig) -> (Dispatcher, mpsc::Receiver<Quote>) {
        let shared = Arc::new(Shared::new(
            config,
            Arc::new(StaticCredentials::new("test-key")),
            CancellationToken::new(),
        ));
        let (tx, rx) = mpsc::channel(4);
        (Dispatcher::new(shared, tx, CancellationToken::new()), rx)
    }

    #[test]
    fn test_routes_trade_quote() {
        let (dispatcher, _rx) = dispatcher(WsConfig::default());
        let routed = dispatcher
            .route(r#"{"s":"AAPL","type":"Q","ap":150.3,"bp":150.1,"lp":150.2,"t":1706000000000}"#)
            .unwrap();

        let Routed::Quote(quote) = routed else {
            panic!("expected a quote, got {routed:?}");
        };
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.last_price, Decimal::from_str("150.2").unwrap());
    }

    #[test]
    fn test_drops_quote_without_trade() {
        let (dispatcher, _rx) = dispatcher(WsConfig::default());
        assert_eq!(
            dispatcher.route(r#"{"s":"AAPL","type":"Q","ap":1.5,"lp":0}"#).unwrap(),
            Routed::Continue
        );
    }

    #[test]
    fn test_skips_heartbeat_unknown_event_and_other_types() {
        let (dispatcher, _rx) = dispatcher(WsConfig::default());
        for frame in [
            r#"{"event":"heartbeat","timestamp":1706000000000}"#,
            r#"{"event":"error","message":"boom"}"#,
            r#"{"s":"AAPL","type":"T","lp":150.2}"#,
        ] {
            assert_eq!(dispatcher.route(frame).unwrap(), Routed::Continue, "{frame}");
        }
    }

    #[test]
    fn test_malformed_frame_is_decode_error() {
        let (dispatcher, _rx) = dispatcher(WsConfig::default());
        assert!(dispatcher.route("{not json").unwrap_err().is_decode());
        // A quote frame must carry a symbol.
        assert!(dispatcher.route(r#"{"lp":1.0}"#).unwrap_err().is_decode());
    }

    #[tokio::test]
    async fn test_ack_reaches_registered_waiter() {
        let (dispatcher, _rx) = dispatcher(WsConfig::default());
        let token = CancellationToken::new();
        let waiter = dispatcher.shared.gate.register(AckKind::Login);

        let routed = dispatcher
            .route(r#"{"event":"login","status":401,"message":"Invalid API KEY"}"#)
            .unwrap();
        assert_eq!(routed, Routed::Continue);

        let ack = waiter.wait(&token, &token, None).await.unwrap();
        assert_eq!(ack.status, Some(401));
        assert_eq!(ack.into_result().unwrap_err(), "Invalid API KEY");
    }

    #[test]
    fn test_unsubscribe_ack_drains_only_when_it_emptied_the_set() {
        let (dispatcher, _rx) = dispatcher(WsConfig::default());
        let frame = r#"{"event":"unsubscribe","status":200}"#;

        dispatcher.shared.registry.begin_unsubscribe(false);
        assert_eq!(dispatcher.route(frame).unwrap(), Routed::Continue);

        dispatcher.shared.registry.begin_unsubscribe(false);
        dispatcher.shared.registry.begin_unsubscribe(true);
        assert_eq!(dispatcher.route(frame).unwrap(), Routed::Continue);
        assert_eq!(dispatcher.route(frame).unwrap(), Routed::Drain);
    }

    #[tokio::test]
    async fn test_forward_observes_cancellation_when_full() {
        let shared = Arc::new(Shared::new(
            WsConfig::default(),
            Arc::new(StaticCredentials::new("test-key")),
            CancellationToken::new(),
        ));
        let (tx, mut rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let dispatcher = Dispatcher::new(shared, tx, token.clone());

        let quote: Quote = serde_json::from_str(r#"{"s":"AAPL","lp":1.0}"#).unwrap();
        assert_eq!(dispatcher.forward(quote.clone()).await, None);

        token.cancel();
        assert_eq!(dispatcher.forward(quote.clone()).await, Some(LoopExit::Cancelled));
        assert_eq!(rx.recv().await, Some(quote));
    }
}
