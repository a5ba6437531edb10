//! Channel-keyed publish routing for the raw transport.
//!
//! On the raw transport one message shape means both "start watching this
//! channel" and "publish a newer state for it". Which one is decided per
//! channel id by a two-state machine:
//!
//! | state      | on start/publish message                                   | next state |
//! |------------|------------------------------------------------------------|------------|
//! | `Unrouted` | install a bounded queue; caller starts the watch handler   | `Routed`   |
//! | `Routed`   | push the message onto the queue for the running handler    | `Routed`   |
//!
//! A route whose handler has exited (its queue receiver is gone) counts as
//! `Unrouted`. Routes are evicted explicitly with [`RouteTable::evict`] or,
//! generation-checked, with [`RouteTable::evict_route`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use paych_sdk::objects::{ChannelId, StartWatchingLedgerChannelReq, Transaction};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::watching::StateFeed;

/// Publish queue capacity used when none is configured.
pub const DEFAULT_PUBLISH_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Unrouted,
    Routed,
}

/// Generation of one installed route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(u64);

/// Outcome of routing one start/publish message.
#[derive(Debug)]
pub enum Routing<T> {
    /// A route was installed. The caller starts the watch handler with
    /// `first` as its initial message and `queue` as its feed.
    Start { first: T, queue: PublishQueue<T> },
    /// The message was queued for the running handler.
    Published,
}

/// Receiving end of a route, owned by the watch handler.
#[derive(Debug)]
pub struct PublishQueue<T> {
    route: RouteId,
    channel: ChannelId,
    rx: mpsc::Receiver<T>,
}

impl<T> PublishQueue<T> {
    pub fn route(&self) -> RouteId {
        self.route
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Next published message; `None` once the route is evicted.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

#[async_trait]
impl StateFeed for PublishQueue<StartWatchingLedgerChannelReq> {
    async fn next_state(&mut self) -> Option<Transaction> {
        self.recv().await.map(StartWatchingLedgerChannelReq::into_transaction)
    }
}

struct Route<T> {
    id: u64,
    tx: mpsc::Sender<T>,
}

enum Step<T> {
    Install(PublishQueue<T>),
    Push(mpsc::Sender<T>),
}

pub struct RouteTable<T> {
    routes: Mutex<HashMap<ChannelId, Route<T>>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl<T: Send + 'static> RouteTable<T> {
    /// A zero `capacity` falls back to [`DEFAULT_PUBLISH_QUEUE_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_PUBLISH_QUEUE_CAPACITY
        } else {
            capacity
        };
        Self {
            routes: Mutex::new(HashMap::new()),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    fn state_of(route: Option<&Route<T>>) -> RouteState {
        match route {
            Some(route) if !route.tx.is_closed() => RouteState::Routed,
            _ => RouteState::Unrouted,
        }
    }

    pub fn state(&self, channel: &ChannelId) -> RouteState {
        Self::state_of(self.routes.lock().get(channel))
    }

    /// The transition function: decide under the table lock, act outside it.
    fn transition(&self, channel: ChannelId) -> Step<T> {
        let mut routes = self.routes.lock();
        let current = routes.get(&channel);
        match (Self::state_of(current), current) {
            (RouteState::Routed, Some(route)) => Step::Push(route.tx.clone()),
            _ => {
                let (tx, rx) = mpsc::channel(self.capacity);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                routes.insert(channel, Route { id, tx });
                Step::Install(PublishQueue {
                    route: RouteId(id),
                    channel,
                    rx,
                })
            }
        }
    }

    /// Route one start/publish message for `channel`.
    ///
    /// Waits while the channel's queue is full.
    pub async fn route(&self, channel: ChannelId, message: T) -> Routing<T> {
        let mut message = message;
        loop {
            match self.transition(channel) {
                Step::Install(queue) => {
                    debug!(channel = %channel, route = queue.route.0, "Route installed");
                    return Routing::Start {
                        first: message,
                        queue,
                    };
                }
                Step::Push(tx) => match tx.send(message).await {
                    Ok(()) => return Routing::Published,
                    // the handler exited after the state check; the closed
                    // route now reads as unrouted
                    Err(mpsc::error::SendError(returned)) => message = returned,
                },
            }
        }
    }

    /// Drop the route for `channel`, ending its handler's feed.
    pub fn evict(&self, channel: &ChannelId) -> bool {
        let evicted = self.routes.lock().remove(channel).is_some();
        if evicted {
            debug!(channel = %channel, "Route evicted");
        }
        evicted
    }

    /// Drop the route for `channel` only if it is still `route`.
    pub fn evict_route(&self, channel: &ChannelId, route: RouteId) -> bool {
        let mut routes = self.routes.lock();
        match routes.get(channel) {
            Some(current) if current.id == route.0 => {
                routes.remove(channel);
                true
            }
            _ => false,
        }
    }

    /// Drop every route, ending all handler feeds.
    pub fn clear(&self) -> usize {
        let routes: Vec<_> = self.routes.lock().drain().collect();
        routes.len()
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const A: ChannelId = ChannelId([0xab; 32]);
    const B: ChannelId = ChannelId([0xcd; 32]);

    #[tokio::test]
    async fn first_message_starts_and_the_second_is_published() {
        let table = RouteTable::new(10);
        assert_eq!(table.state(&A), RouteState::Unrouted);

        let Routing::Start { first, mut queue } = table.route(A, 1u32).await else {
            panic!("first message must start a handler");
        };
        assert_eq!(first, 1);
        assert_eq!(queue.channel(), A);
        assert_eq!(table.state(&A), RouteState::Routed);

        assert!(matches!(table.route(A, 2).await, Routing::Published));
        assert!(matches!(table.route(A, 3).await, Routing::Published));
        assert_eq!(queue.recv().await, Some(2));
        assert_eq!(queue.recv().await, Some(3));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn different_channels_get_independent_routes() {
        let table = RouteTable::new(10);
        let a = table.route(A, "a").await;
        let b = table.route(B, "b").await;
        let (Routing::Start { queue: qa, .. }, Routing::Start { queue: qb, .. }) = (a, b) else {
            panic!("each channel must start its own handler");
        };
        assert_ne!(qa.route(), qb.route());
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn eviction_ends_the_feed_and_the_next_message_starts_again() {
        let table = RouteTable::new(10);
        let Routing::Start { mut queue, .. } = table.route(A, 1u32).await else {
            panic!("expected start");
        };
        assert!(table.evict(&A));
        assert!(!table.evict(&A));
        assert_eq!(queue.recv().await, None);

        assert!(matches!(table.route(A, 2).await, Routing::Start { first: 2, .. }));
    }

    #[tokio::test]
    async fn exited_handler_route_is_replaced() {
        let table = RouteTable::new(10);
        let Routing::Start { queue, .. } = table.route(A, 1u32).await else {
            panic!("expected start");
        };
        let old = queue.route();
        drop(queue);
        assert_eq!(table.state(&A), RouteState::Unrouted);

        let Routing::Start { first, queue } = table.route(A, 2).await else {
            panic!("a closed route must be reinstalled");
        };
        assert_eq!(first, 2);
        assert_ne!(queue.route(), old);
        // the stale generation cannot evict the new route
        assert!(!table.evict_route(&A, old));
        assert!(table.evict_route(&A, queue.route()));
    }

    #[tokio::test]
    async fn clear_ends_every_feed() {
        let table = RouteTable::new(10);
        let Routing::Start { queue: mut qa, .. } = table.route(A, 1u32).await else {
            panic!("expected start");
        };
        let Routing::Start { queue: mut qb, .. } = table.route(B, 1u32).await else {
            panic!("expected start");
        };
        assert_eq!(table.clear(), 2);
        assert_eq!(qa.recv().await, None);
        assert_eq!(qb.recv().await, None);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn full_queue_waits_for_the_handler() {
        let table = std::sync::Arc::new(RouteTable::new(1));
        let Routing::Start { mut queue, .. } = table.route(A, 0u32).await else {
            panic!("expected start");
        };
        assert!(matches!(table.route(A, 1).await, Routing::Published));

        let blocked = {
            let table = table.clone();
            tokio::spawn(async move { table.route(A, 2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        assert_eq!(queue.recv().await, Some(1));
        let routed = tokio::time::timeout(Duration::from_secs(5), blocked)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(routed, Routing::Published));
        assert_eq!(queue.recv().await, Some(2));
    }
}
