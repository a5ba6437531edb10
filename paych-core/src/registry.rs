//! Subscription registry and event forwarding.
//!
//! A [`SubscriptionTable`] maps a key to at most one live subscription. Each
//! subscription owns a stop signal and its event source, and is driven by
//! one forwarding task that pulls events, translates them into
//! [`Notification`]s and hands them to a [`NotificationSink`].
//!
//! # Lifecycle
//!
//! 1. `subscribe` reserves the key, opens the source through the caller's
//!    factory, activates the slot and spawns the forwarding task. A failing
//!    or cancelled factory releases the reservation.
//! 2. `unsubscribe` removes the slot first, then raises the stop signal, then
//!    closes the source. The task observes the signal between events.
//! 3. A failed delivery or a terminal notification makes the task retire its
//!    own slot. Retiring is generation-checked so it never removes a newer
//!    subscription that reused the key.
//! 4. When the source simply ends, the task exits and the slot stays until
//!    it is unsubscribed or released.
//!
//! Table locks are only held for map updates, never across an await.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use paych_sdk::objects::{Notification, SessionId};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Error;
use crate::signal::{StopListener, StopSignal};
use crate::sink::NotificationSink;
use crate::source::{Closable, EventSource};

/// Keys a [`SubscriptionTable`] can be indexed by.
pub trait TableKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> TableKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Generation of one subscription; unique within its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Handle {
    id: u64,
    stop: StopSignal,
    source: Arc<dyn Closable>,
}

enum Slot {
    /// The source is being opened.
    Reserved,
    Active(Handle),
}

pub struct SubscriptionTable<K> {
    name: &'static str,
    slots: Mutex<HashMap<K, Slot>>,
    next_id: AtomicU64,
}

/// Releases a reserved slot unless it was activated.
struct Reservation<'a, K: TableKey> {
    table: &'a SubscriptionTable<K>,
    key: Option<K>,
}

impl<K: TableKey> Reservation<'_, K> {
    fn activate(mut self, handle: Handle) {
        if let Some(key) = self.key.take() {
            self.table.slots.lock().insert(key, Slot::Active(handle));
        }
    }
}

impl<K: TableKey> Drop for Reservation<'_, K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut slots = self.table.slots.lock();
            if matches!(slots.get(&key), Some(Slot::Reserved)) {
                slots.remove(&key);
            }
        }
    }
}

impl<K: TableKey> SubscriptionTable<K> {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn reserve(&self, key: &K) -> Result<Reservation<'_, K>, Error> {
        let mut slots = self.slots.lock();
        if slots.contains_key(key) {
            return Err(Error::AlreadySubscribed);
        }
        slots.insert(key.clone(), Slot::Reserved);
        Ok(Reservation {
            table: self,
            key: Some(key.clone()),
        })
    }

    /// Open a source with `open` and forward its events to `sink`.
    ///
    /// `open` may return an extra value alongside the source (e.g. a state
    /// publisher); it is passed through to the caller.
    pub async fn subscribe<S, X, F, Fut>(
        self: &Arc<Self>,
        key: K,
        open: F,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<(SubscriptionId, X), Error>
    where
        S: EventSource,
        S::Event: Into<Notification>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(Arc<S>, X), Error>>,
    {
        let reservation = self.reserve(&key)?;
        let (source, extra) = open().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = StopSignal::new();
        let listener = stop.listener();
        let closer: Arc<dyn Closable> = source.clone();
        reservation.activate(Handle {
            id,
            stop,
            source: closer,
        });

        debug!(table = self.name, key = ?key, id, "Subscription started");
        tokio::spawn(forward(Arc::clone(self), key, id, source, sink, listener));
        Ok((SubscriptionId(id), extra))
    }

    fn take(&self, key: &K) -> Option<Handle> {
        let mut slots = self.slots.lock();
        match slots.remove(key) {
            Some(Slot::Active(handle)) => Some(handle),
            Some(Slot::Reserved) => {
                slots.insert(key.clone(), Slot::Reserved);
                None
            }
            None => None,
        }
    }

    /// Tear down the subscription under `key`.
    pub async fn unsubscribe(&self, key: &K) -> Result<(), Error> {
        let handle = self.take(key).ok_or(Error::NotSubscribed)?;
        debug!(table = self.name, key = ?key, id = handle.id, "Unsubscribing");
        handle.stop.raise();
        Error::context("close subscription", handle.source.close().await)
    }

    /// Remove the slot under `key` if it still belongs to generation `id`.
    fn retire(&self, key: &K, id: u64) -> Option<Handle> {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(Slot::Active(handle)) if handle.id == id => match slots.remove(key) {
                Some(Slot::Active(handle)) => Some(handle),
                _ => None,
            },
            _ => None,
        }
    }

    /// Tear down the subscription under `key` only if it is still `id`.
    ///
    /// Returns whether anything was torn down.
    pub async fn release(&self, key: &K, id: SubscriptionId) -> bool {
        let Some(handle) = self.retire(key, id.0) else {
            return false;
        };
        debug!(table = self.name, key = ?key, id = id.0, "Releasing subscription");
        handle.stop.raise();
        if let Err(e) = handle.source.close().await {
            warn!(table = self.name, key = ?key, error = %e, "Failed to close released subscription");
        }
        true
    }

    /// Tear down every active subscription.
    pub async fn close_all(&self) {
        let handles: Vec<(K, Handle)> = {
            let mut slots = self.slots.lock();
            let keys: Vec<K> = slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| match slots.remove(&key) {
                    Some(Slot::Active(handle)) => Some((key, handle)),
                    _ => None,
                })
                .collect()
        };

        for (key, handle) in handles {
            handle.stop.raise();
            if let Err(e) = handle.source.close().await {
                warn!(table = self.name, key = ?key, error = %e, "Failed to close subscription");
            }
        }
    }

    /// Whether an active subscription exists under `key`.
    pub fn contains(&self, key: &K) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Active(_)))
    }

    /// Whether a subscribe for `key` is still opening its source.
    pub fn is_reserved(&self, key: &K) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Reserved))
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Forwarding task
// ---------------------------------------------------------------------------

async fn forward<K, S>(
    table: Arc<SubscriptionTable<K>>,
    key: K,
    id: u64,
    source: Arc<S>,
    sink: Arc<dyn NotificationSink>,
    mut stop: StopListener,
) where
    K: TableKey,
    S: EventSource,
    S::Event: Into<Notification>,
{
    loop {
        // Stop is only raced against waiting for the next event, never
        // against a delivery in progress.
        let event = tokio::select! {
            biased;
            _ = stop.stopped() => {
                debug!(table = table.name, key = ?key, id, "Stop observed");
                return;
            }
            event = source.next() => event,
        };

        let Some(event) = event else {
            if let Some(err) = source.end_error() {
                debug!(table = table.name, key = ?key, id, error = %err, "Source ended with error");
                let _ = sink.deliver(Notification::Error(err)).await;
            } else {
                debug!(table = table.name, key = ?key, id, "Source ended");
            }
            return;
        };

        let notification: Notification = event.into();
        let terminal = notification.is_terminal();

        if let Err(e) = sink.deliver(notification).await {
            warn!(
                table = table.name,
                key = ?key,
                id,
                error = %e,
                "Delivery failed, dropping subscription"
            );
            teardown(&table, &key, id, source.as_ref()).await;
            return;
        }

        if terminal {
            debug!(table = table.name, key = ?key, id, "Terminal event delivered");
            teardown(&table, &key, id, source.as_ref()).await;
            return;
        }
    }
}

async fn teardown<K: TableKey, S: EventSource>(
    table: &SubscriptionTable<K>,
    key: &K,
    id: u64,
    source: &S,
) {
    if let Some(handle) = table.retire(key, id) {
        handle.stop.raise();
    }
    if let Err(e) = source.close().await {
        debug!(table = table.name, key = ?key, id, error = %e, "Failed to close source");
    }
}

// ---------------------------------------------------------------------------
// Per-session tables
// ---------------------------------------------------------------------------

/// One [`SubscriptionTable`] per session, for channel-scoped subscriptions.
///
/// Sessions never contend on each other's table lock.
pub struct SessionTables<K> {
    name: &'static str,
    tables: Mutex<HashMap<SessionId, Arc<SubscriptionTable<K>>>>,
}

impl<K: TableKey> SessionTables<K> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// The session's table, created on first use.
    pub fn table(&self, session: &SessionId) -> Arc<SubscriptionTable<K>> {
        let mut tables = self.tables.lock();
        tables
            .entry(session.clone())
            .or_insert_with(|| SubscriptionTable::new(self.name))
            .clone()
    }

    pub fn existing(&self, session: &SessionId) -> Option<Arc<SubscriptionTable<K>>> {
        self.tables.lock().get(session).cloned()
    }

    /// Drop the session's table and tear down its subscriptions.
    pub async fn close_session(&self, session: &SessionId) {
        let table = self.tables.lock().remove(session);
        if let Some(table) = table {
            table.close_all().await;
        }
    }

    pub async fn close_all(&self) {
        let tables: Vec<_> = self.tables.lock().drain().map(|(_, t)| t).collect();
        for table in tables {
            table.close_all().await;
        }
    }
}
