//! Correlation of control frames with their acknowledgements.
//!
//! The feed distinguishes acknowledgements only by their event kind, so at most
//! one wait per kind may be outstanding. Callers serialize control operations
//! (the connect and registry locks) to keep that true.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::FmpError;
use crate::ws::messages::{AckEvent, AckKind};

type AckSender = oneshot::Sender<Result<AckEvent, FmpError>>;

/// Single-slot mailbox per acknowledgement kind.
#[derive(Debug, Default)]
pub(crate) struct CorrelationGate {
    pending: Mutex<HashMap<AckKind, AckSender>>,
}

impl CorrelationGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next acknowledgement of `kind`.
    ///
    /// Must be called before the control frame is written, otherwise a fast
    /// server may answer before anyone is listening.
    pub(crate) fn register(&self, kind: AckKind) -> AckWaiter {
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.lock().insert(kind, tx);
        if let Some(previous) = previous {
            if !previous.is_closed() {
                tracing::warn!(%kind, "superseding an outstanding acknowledgement wait");
            }
        }
        AckWaiter { kind, rx }
    }

    /// Hand an acknowledgement to its waiter without blocking.
    ///
    /// Returns `false` when nobody was waiting and the event was dropped.
    pub(crate) fn deliver(&self, ack: AckEvent) -> bool {
        let waiter = self.pending.lock().remove(&ack.kind);
        let Some(waiter) = waiter else {
            if ack.is_success() {
                tracing::debug!(kind = %ack.kind, status = ?ack.status, "dropping unsolicited acknowledgement");
            } else {
                tracing::warn!(
                    kind = %ack.kind,
                    status = ?ack.status,
                    reason = %ack.failure_reason(),
                    "dropping unsolicited failed acknowledgement"
                );
            }
            return false;
        };

        match waiter.send(Ok(ack)) {
            Ok(()) => true,
            Err(returned) => {
                tracing::debug!(ack = ?returned, "acknowledgement waiter went away, dropping");
                false
            }
        }
    }

    /// Fail every outstanding wait with `err`.
    pub(crate) fn abort_all(&self, err: &FmpError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (kind, waiter) in drained {
            if waiter.send(Err(err.clone())).is_ok() {
                tracing::debug!(%kind, error = %err, "aborted acknowledgement wait");
            }
        }
    }

    /// Number of registered waits, including abandoned ones not yet reaped.
    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// A registered wait for one acknowledgement.
#[derive(Debug)]
pub(crate) struct AckWaiter {
    kind: AckKind,
    rx: oneshot::Receiver<Result<AckEvent, FmpError>>,
}

impl AckWaiter {
    /// Wait for the acknowledgement.
    ///
    /// Returns [`FmpError::Cancelled`] when either token fires and
    /// [`FmpError::Timeout`] when `timeout` elapses first.
    pub(crate) async fn wait(
        self,
        cancel: &CancellationToken,
        scope: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<AckEvent, FmpError> {
        let kind = self.kind;
        tokio::select! {
            biased;
            result = self.rx => match result {
                Ok(ack) => ack,
                Err(_) => Err(FmpError::ConnectionClosed {
                    reason: format!("{kind} acknowledgement abandoned"),
                }),
            },
            () = cancel.cancelled() => Err(FmpError::Cancelled),
            () = scope.cancelled() => Err(FmpError::Cancelled),
            () = deadline(timeout) => Err(FmpError::Timeout),
        }
    }
}

/// Sleep for `timeout`, or forever when unbounded.
pub(crate) async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
