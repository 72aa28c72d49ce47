//! Bookkeeping of subscribed symbols.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};

/// Symbols currently believed subscribed.
///
/// Each symbol carries the number of accepted subscribe requests not yet
/// matched by an unsubscribe, so `subscribe(S)` followed by `unsubscribe(S)`
/// always restores the previous contents, even when `S` overlaps them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    counts: BTreeMap<String, usize>,
}

impl SubscriptionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record accepted subscriptions.
    pub fn insert_all(&mut self, symbols: &[String]) {
        for symbol in symbols {
            *self.counts.entry(symbol.clone()).or_insert(0) += 1;
        }
    }

    /// Forget subscriptions. Unknown symbols are ignored.
    pub fn remove_all(&mut self, symbols: &[String]) {
        for symbol in symbols {
            if let Some(count) = self.counts.get_mut(symbol) {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(symbol);
                }
            }
        }
    }

    /// Check if a symbol is subscribed.
    pub fn contains(&self, symbol: &str) -> bool {
        self.counts.contains_key(symbol)
    }

    /// Subscribed symbols in sorted order.
    pub fn symbols(&self) -> Vec<String> {
        self.counts.keys().cloned().collect()
    }

    /// Number of distinct symbols.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Check if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

/// Serializes subscription changes and owns the [`SubscriptionSet`].
///
/// The lock is held for the whole subscribe or unsubscribe call, including
/// the acknowledgement wait. Quote delivery never takes it.
///
/// Unsubscribe frames are numbered as they are written and their
/// acknowledgements counted as they arrive, so the read loop can stop on the
/// acknowledgement of exactly the unsubscribe that emptied the set.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    set: Mutex<SubscriptionSet>,
    unsubscribes_sent: AtomicU64,
    unsubscribes_acked: AtomicU64,
    /// Number of the unsubscribe whose acknowledgement drains; 0 for none.
    drain_at: AtomicU64,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, SubscriptionSet> {
        self.set.lock().await
    }

    pub(crate) async fn snapshot(&self) -> Vec<String> {
        self.set.lock().await.symbols()
    }

    /// Number the next unsubscribe frame. Call with the set locked, before
    /// writing.
    pub(crate) fn begin_unsubscribe(&self, drain: bool) {
        let number = self.unsubscribes_sent.fetch_add(1, Ordering::SeqCst) + 1;
        self.drain_at
            .store(if drain { number } else { 0 }, Ordering::SeqCst);
    }

    /// Undo [`begin_unsubscribe`](Self::begin_unsubscribe) after a failed write.
    pub(crate) fn abort_unsubscribe(&self) {
        self.unsubscribes_sent.fetch_sub(1, Ordering::SeqCst);
        self.drain_at.store(0, Ordering::SeqCst);
    }

    /// Count an unsubscribe acknowledgement. Returns `true` when it answers
    /// the unsubscribe that emptied the set.
    pub(crate) fn ack_unsubscribe(&self) -> bool {
        let number = self.unsubscribes_acked.fetch_add(1, Ordering::SeqCst) + 1;
        let drain_at = self.drain_at.load(Ordering::SeqCst);
        drain_at != 0 && number >= drain_at
    }

    /// Forget a pending drain; the set is no longer empty.
    pub(crate) fn cancel_drain(&self) {
        self.drain_at.store(0, Ordering::SeqCst);
    }

    /// Restart numbering on a new socket.
    pub(crate) fn reset_sequence(&self) {
        self.unsubscribes_sent.store(0, Ordering::SeqCst);
        self.unsubscribes_acked.store(0, Ordering::SeqCst);
        self.drain_at.store(0, Ordering::SeqCst);
    }
}
