//! Collects per-host records from concurrent workers into one sorted sequence.

use crate::model::HostKey;
use std::cmp::Ordering;
use tokio::sync::mpsc;

/// Receiving end of one phase. Drained exactly once by [`Aggregator::finish`].
pub struct Aggregator<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: mpsc::UnboundedReceiver<T>,
}

/// Handle a worker uses to hand its finished record over.
pub struct Collector<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self { Collector { tx: self.tx.clone() } }
}

impl<T> Collector<T> {
    pub fn submit(&self, item: T) {
        // The receiver lives until finish() has seen every collector drop.
        let _ = self.tx.send(item);
    }
}

impl<T: HostKey> Aggregator<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Aggregator { tx, rx }
    }

    pub fn collector(&self) -> Collector<T> {
        Collector { tx: self.tx.clone() }
    }

    /// Wait for every collector to be dropped, then return the records sorted by host.
    pub async fn finish(self) -> Vec<T> {
        let Aggregator { tx, mut rx } = self;
        drop(tx);
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await { out.push(item); }
        sort_by_host(&mut out);
        out
    }
}

impl<T: HostKey> Default for Aggregator<T> {
    fn default() -> Self { Self::new() }
}

/// Case-insensitive ordering on host identifiers.
pub fn compare_hosts(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

pub fn sort_by_host<T: HostKey>(items: &mut [T]) {
    items.sort_by(|a, b| compare_hosts(a.host_key(), b.host_key()));
}
