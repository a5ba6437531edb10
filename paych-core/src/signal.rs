//! Cooperative stop signals.
//!
//! A [`StopSignal`] is raised at most once in effect: raising it again is a
//! no-op. Listeners observe it whenever they next poll
//! [`StopListener::stopped`], never preemptively.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::Error;

#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopListener {
    /// Resolve once the signal is raised or its owner is gone.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|raised| *raised).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

// ---------------------------------------------------------------------------
// SignalTable
// ---------------------------------------------------------------------------

/// Out-of-band stop signals keyed like their subscriptions.
///
/// Lets a call that must stay open for the lifetime of a stream wait until a
/// separate call (the matching unsubscribe) raises its signal.
pub struct SignalTable<K> {
    signals: Mutex<HashMap<K, StopSignal>>,
}

impl<K> SignalTable<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(HashMap::new()),
        }
    }

    /// Install a fresh signal under `key`.
    pub fn register(&self, key: K) -> Result<StopListener, Error> {
        let mut signals = self.signals.lock();
        if signals.contains_key(&key) {
            return Err(Error::AlreadySubscribed);
        }
        let signal = StopSignal::new();
        let listener = signal.listener();
        signals.insert(key, signal);
        Ok(listener)
    }

    /// Install a fresh signal under `key` that is forgotten again when the
    /// returned guard is dropped before [`Registration::disarm`].
    pub fn register_guarded(self: &Arc<Self>, key: K) -> Result<Registration<K>, Error> {
        let listener = self.register(key.clone())?;
        Ok(Registration {
            table: Arc::clone(self),
            key,
            listener,
            armed: true,
        })
    }

    /// Raise every signal whose key matches `pred`. Returns how many.
    pub fn raise_where(&self, pred: impl Fn(&K) -> bool) -> usize {
        let raised: Vec<StopSignal> = {
            let mut signals = self.signals.lock();
            let keys: Vec<K> = signals.keys().filter(|k| pred(*k)).cloned().collect();
            keys.iter().filter_map(|k| signals.remove(k)).collect()
        };
        for signal in &raised {
            signal.raise();
        }
        raised.len()
    }

    /// Remove and raise the signal under `key`. Returns whether there was one.
    pub fn raise(&self, key: &K) -> bool {
        let signal = self.signals.lock().remove(key);
        match signal {
            Some(signal) => {
                signal.raise();
                true
            }
            None => false,
        }
    }

    /// Remove the signal under `key` without raising it, but only if it is
    /// the one `listener` was registered with.
    pub fn forget(&self, key: &K, listener: &StopListener) -> bool {
        let mut signals = self.signals.lock();
        match signals.get(key) {
            Some(signal) if signal.tx.subscribe().same_channel(&listener.rx) => {
                signals.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Raise every signal, e.g. on shutdown.
    pub fn raise_all(&self) {
        let signals: Vec<_> = self.signals.lock().drain().collect();
        for (_, signal) in signals {
            signal.raise();
        }
    }

    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A signal registered in a [`SignalTable`] by a call that may still be
/// cancelled.
pub struct Registration<K>
where
    K: Eq + Hash + Clone,
{
    table: Arc<SignalTable<K>>,
    key: K,
    listener: StopListener,
    armed: bool,
}

impl<K> Registration<K>
where
    K: Eq + Hash + Clone,
{
    pub fn listener(&self) -> StopListener {
        self.listener.clone()
    }

    /// Keep the signal registered; its owner forgets it from now on.
    pub fn disarm(mut self) -> StopListener {
        self.armed = false;
        self.listener.clone()
    }
}

impl<K> Drop for Registration<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if self.armed {
            self.table.forget(&self.key, &self.listener);
        }
    }
}

impl<K> Default for SignalTable<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
