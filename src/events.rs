//! Event hub: bounded multi-subscriber fan-out for scan and tx events.
//!
//! A bounded multi-subscriber broadcaster. Subscribing hands back a
//! bounded channel; broadcasting never blocks the emitter — a full
//! subscriber channel just drops that event for that subscriber, logged
//! as a slow client, while every other subscriber still receives it.
//! Two independent hubs exist: scan events and transaction events.

use std::sync::Mutex;
use std::time::Duration;

use log::warn;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{Chain, TxStatus};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum ScanEvent {
    Progress {
        chain: Chain,
        scanned: i64,
        total: i64,
        found: i64,
        elapsed: Duration,
    },
    Complete {
        chain: Chain,
        scanned: i64,
        found: i64,
        elapsed: Duration,
    },
    Error {
        chain: Chain,
        reason: String,
    },
    TokenError {
        chain: Chain,
        token: crate::models::TokenSymbol,
        reason: String,
    },
    StateSnapshot {
        chain: Chain,
        status: crate::models::ScanStatus,
        last_scanned_index: i64,
    },
}

#[derive(Debug, Clone)]
pub enum TxEvent {
    StatusChanged {
        sweep_id: String,
        tx_hash: Option<String>,
        status: TxStatus,
    },
    SweepComplete {
        sweep_id: String,
        chain: Chain,
    },
    SweepError {
        sweep_id: String,
        chain: Chain,
        reason: String,
    },
}

struct Subscriber<T> {
    id: Uuid,
    sender: mpsc::Sender<T>,
}

/// A broadcaster for one event type. Generic so `scan_*` and `tx_*`
/// hubs share the same subscribe/broadcast/shutdown machinery.
pub struct EventHub<T: Clone + Send + 'static> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T: Clone + Send + 'static> Default for EventHub<T> {
    fn default() -> Self {
        EventHub { subscribers: Mutex::new(Vec::new()) }
    }
}

impl<T: Clone + Send + 'static> EventHub<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber, returning its id (for `unsubscribe`)
    /// and the receiving half of a bounded channel.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<T>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = Uuid::new_v4();
        self.subscribers.lock().expect("event hub mutex poisoned").push(Subscriber { id, sender });
        (id, receiver)
    }

    /// Removes a subscriber; its channel is dropped, closing the receiver.
    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.lock().expect("event hub mutex poisoned").retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("event hub mutex poisoned").len()
    }

    /// Broadcasts to every subscriber without blocking. A subscriber
    /// whose channel is full gets this event dropped; every other
    /// subscriber is unaffected.
    pub fn broadcast(&self, event: T) {
        let subscribers = self.subscribers.lock().expect("event hub mutex poisoned");
        for subscriber in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.sender.try_send(event.clone()) {
                warn!(subscriber_id:% = subscriber.id; "event hub dropped event for slow subscriber");
            }
        }
    }

    /// Closes every subscriber channel, signalling shutdown downstream.
    pub fn shutdown(&self) {
        self.subscribers.lock().expect("event hub mutex poisoned").clear();
    }
}

pub type ScanEventHub = EventHub<ScanEvent>;
pub type TxEventHub = EventHub<TxEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let hub: EventHub<u32> = EventHub::new();
        let (_id1, mut rx1) = hub.subscribe();
        let (_id2, mut rx2) = hub.subscribe();

        hub.broadcast(7);

        assert_eq!(rx1.recv().await, Some(7));
        assert_eq!(rx2.recv().await, Some(7));
    }

    #[tokio::test]
    async fn full_channel_drops_for_that_subscriber_only() {
        let hub: EventHub<u32> = EventHub::new();
        let (_slow_id, slow_rx) = hub.subscribe();
        let (_fast_id, mut fast_rx) = hub.subscribe();
        drop(slow_rx); // closed channel counts as "full"-equivalent for try_send

        for i in 0..SUBSCRIBER_CHANNEL_CAPACITY as u32 + 10 {
            hub.broadcast(i);
        }

        // The fast subscriber should have received at least the first batch
        // before its buffer filled; later drops for it don't error the hub.
        let mut received = Vec::new();
        while let Ok(v) = fast_rx.try_recv() {
            received.push(v);
        }
        assert!(!received.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_channel() {
        let hub: EventHub<u32> = EventHub::new();
        let (id, _rx) = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_clears_all_subscribers() {
        let hub: EventHub<u32> = EventHub::new();
        hub.subscribe();
        hub.subscribe();
        hub.shutdown();
        assert_eq!(hub.subscriber_count(), 0);
    }
}
