//! Channel-backed subscriptions with synchronously detachable handles.
//!
//! Every listener a store hands out is a typed mpsc receiver paired
//! with a [`ListenerHandle`]. `detach()` flips an atomic flag shared
//! with the producing side, so teardown takes effect immediately and
//! in any order; dropping the handle detaches too. The producer skips
//! detached subscribers and prunes them on its next delivery pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

/// Buffer size for subscription channels. A consumer that falls this
/// far behind starts losing events rather than stalling the producer.
const SUBSCRIPTION_BUFFER: usize = 64;

/// Owner-side handle for one listener. Single ownership: whoever holds
/// the handle is responsible for the subscription's lifetime.
#[derive(Debug)]
pub struct ListenerHandle {
    attached: Arc<AtomicBool>,
}

impl ListenerHandle {
    /// Stop delivery now. Synchronous and idempotent; events already
    /// buffered in the receiver are still readable but nothing new is
    /// delivered after this returns.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

/// A live subscription: the handle plus the stream of events.
#[derive(Debug)]
pub struct Subscription<T> {
    pub handle: ListenerHandle,
    pub events: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Create a subscription and its producing half.
    pub fn channel() -> (SubscriptionSender<T>, Subscription<T>) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let attached = Arc::new(AtomicBool::new(true));
        let sender = SubscriptionSender {
            attached: attached.clone(),
            tx,
        };
        let subscription = Subscription {
            handle: ListenerHandle { attached },
            events: rx,
        };
        (sender, subscription)
    }

    /// Split into the handle and the raw receiver, for callers that
    /// park them in different places.
    pub fn into_parts(self) -> (ListenerHandle, mpsc::Receiver<T>) {
        (self.handle, self.events)
    }
}

/// Producer half of a subscription, held by the store.
#[derive(Debug, Clone)]
pub struct SubscriptionSender<T> {
    attached: Arc<AtomicBool>,
    tx: mpsc::Sender<T>,
}

impl<T> SubscriptionSender<T> {
    /// Deliver one event. Detached or closed subscribers are skipped.
    pub fn deliver(&self, event: T) {
        if !self.attached.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("subscription buffer full, dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {}
            }
        }
    }

    /// Whether this subscriber should still receive events.
    pub fn is_live(&self) -> bool {
        self.attached.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}
