//! Consumer side of the quote channel.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::ws::messages::Quote;

/// Quotes delivered by a connection, in arrival order.
///
/// The stream ends once the connection gives up: retries exhausted, the last
/// subscription removed, or the client shut down. Quotes already buffered are
/// still yielded before the end.
#[derive(Debug)]
pub struct QuoteStream {
    inner: ReceiverStream<Quote>,
}

impl QuoteStream {
    pub(crate) fn new(receiver: mpsc::Receiver<Quote>) -> Self {
        Self {
            inner: ReceiverStream::new(receiver),
        }
    }

    /// Receive the next quote. `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Quote> {
        self.inner.as_mut().recv().await
    }

    /// Unwrap the underlying channel receiver.
    pub fn into_inner(self) -> mpsc::Receiver<Quote> {
        self.inner.into_inner()
    }
}

impl Stream for QuoteStream {
    type Item = Quote;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
