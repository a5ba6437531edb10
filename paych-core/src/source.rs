//! Event source adapters.
//!
//! The engine produces events either push-style (a notifier channel it
//! sends into) or pull-style (an [`AdjudicatorSubscription`] that is polled).
//! Both are adapted to [`EventSource`]: "next event or end" plus an
//! idempotent close.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use paych_sdk::objects::ApiError;
use tokio::sync::{Mutex, mpsc};

use crate::engine::{AdjudicatorSubscription, EngineError};
use crate::events::AdjudicatorEvent;

/// Something that can be closed once; later closes are no-ops.
#[async_trait]
pub trait Closable: Send + Sync + 'static {
    async fn close(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait EventSource: Closable {
    type Event: Send + 'static;

    /// Next event; `None` at end of stream.
    async fn next(&self) -> Option<Self::Event>;

    /// Why the stream ended, if it ended abnormally.
    fn end_error(&self) -> Option<ApiError> {
        None
    }
}

/// Detaches a push-style notifier from the engine.
pub type Detach = Box<dyn Fn() -> BoxFuture<'static, Result<(), EngineError>> + Send + Sync>;

/// Adapter over a push-style engine notifier.
///
/// The engine sends into the notifier channel; closing calls `detach` so the
/// engine drops its sender.
pub struct NotifierSource<E> {
    rx: Mutex<mpsc::Receiver<E>>,
    detach: Detach,
    closed: AtomicBool,
}

impl<E> NotifierSource<E> {
    pub fn new(rx: mpsc::Receiver<E>, detach: Detach) -> Self {
        Self {
            rx: Mutex::new(rx),
            detach,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<E: Send + 'static> Closable for NotifierSource<E> {
    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        (self.detach)().await
    }
}

#[async_trait]
impl<E: Send + 'static> EventSource for NotifierSource<E> {
    type Event = E;

    async fn next(&self) -> Option<E> {
        self.rx.lock().await.recv().await
    }
}

/// Adapter over a pull-style adjudicator subscription.
pub struct AdjudicatorSource {
    sub: Box<dyn AdjudicatorSubscription>,
    closed: AtomicBool,
}

impl AdjudicatorSource {
    pub fn new(sub: Box<dyn AdjudicatorSubscription>) -> Self {
        Self {
            sub,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Closable for AdjudicatorSource {
    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.sub.close().await
    }
}

#[async_trait]
impl EventSource for AdjudicatorSource {
    type Event = AdjudicatorEvent;

    async fn next(&self) -> Option<AdjudicatorEvent> {
        self.sub.next().await
    }

    fn end_error(&self) -> Option<ApiError> {
        self.sub.err().map(|e| e.0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use futures_util::FutureExt;

    use super::*;

    #[tokio::test]
    async fn notifier_source_detaches_once() {
        let detached = Arc::new(AtomicUsize::new(0));
        let counter = detached.clone();
        let (tx, rx) = mpsc::channel::<u32>(4);
        let source = NotifierSource::new(
            rx,
            Box::new(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), EngineError>(())
                }
                .boxed()
            }),
        );

        tx.send(1).await.unwrap();
        assert_eq!(source.next().await, Some(1));

        source.close().await.unwrap();
        source.close().await.unwrap();
        assert_eq!(detached.load(Ordering::SeqCst), 1);

        drop(tx);
        assert_eq!(source.next().await, None);
    }
}
