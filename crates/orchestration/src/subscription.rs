//! Bounded fan-out used by every streaming surface
//!
//! Producers never block on a slow consumer: each subscriber owns a
//! bounded queue, and on overflow the oldest undelivered item is evicted
//! and the subscription's drop counter increments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Default queue depth for a subscription
pub(crate) const DEFAULT_DEPTH: usize = 256;

/// Receiving side of a fan-out subscription
pub struct Subscription<T> {
    rx: async_channel::Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Subscription<T> {
    /// Receive the next item; `None` once the publisher is gone
    pub async fn recv(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    /// Non-blocking receive
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// How many items were evicted from this queue so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Slot<T> {
    tx: async_channel::Sender<T>,
    // The publisher keeps a receiver clone so it can evict the oldest
    // queued item when the subscriber falls behind.
    evict: async_channel::Receiver<T>,
    dropped: Arc<AtomicU64>,
}

/// Publishing side: clones every item to all live subscriptions
pub(crate) struct Publisher<T> {
    slots: Mutex<Vec<Slot<T>>>,
    depth: usize,
}

impl<T: Clone> Publisher<T> {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            depth,
        }
    }

    pub(crate) fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = async_channel::bounded(self.depth);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut slots = self.slots.lock().expect("publisher lock");
        slots.push(Slot {
            tx,
            evict: rx.clone(),
            dropped: dropped.clone(),
        });
        Subscription { rx, dropped }
    }

    /// Deliver to all subscribers without ever blocking.
    pub(crate) fn publish(&self, item: T) {
        let mut slots = self.slots.lock().expect("publisher lock");
        slots.retain(|slot| {
            if slot.tx.receiver_count() <= 1 {
                // Only our eviction clone is left; the subscriber is gone.
                return false;
            }
            match slot.tx.try_send(item.clone()) {
                Ok(()) => true,
                Err(async_channel::TrySendError::Full(rejected)) => {
                    let _ = slot.evict.try_recv();
                    slot.dropped.fetch_add(1, Ordering::Relaxed);
                    let _ = slot.tx.try_send(rejected);
                    true
                }
                Err(async_channel::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Number of live subscriptions
    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.slots.lock().expect("publisher lock").len()
    }

    /// Close every subscription
    pub(crate) fn close(&self) {
        let mut slots = self.slots.lock().expect("publisher lock");
        for slot in slots.drain(..) {
            slot.tx.close();
        }
    }
}
