//! The long-running ledger channel watch handler.
//!
//! A watch starts from one signed state. Afterwards the handler pulls newer
//! states from a [`StateFeed`] and publishes them to the adjudicator
//! watcher, while the watch's on-chain events are forwarded to the client by
//! the registry. The handler ends when the feed ends or publishing fails; its
//! event forwarding is released at that point.

use std::sync::Arc;

use async_trait::async_trait;
use paych_sdk::objects::{SessionId, SignedState, Transaction};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Error;
use crate::sink::NotificationSink;
use crate::subscriptions::Subscriptions;

/// Where a watch handler gets the states to publish from.
#[async_trait]
pub trait StateFeed: Send {
    /// Next state; `None` when the client is done.
    async fn next_state(&mut self) -> Option<Transaction>;
}

#[async_trait]
impl StateFeed for mpsc::Receiver<Transaction> {
    async fn next_state(&mut self) -> Option<Transaction> {
        self.recv().await
    }
}

/// Run a watch for `signed_state` until `feed` ends.
pub async fn watch_ledger_channel<F: StateFeed>(
    subscriptions: &Subscriptions,
    session: &SessionId,
    signed_state: SignedState,
    sink: Arc<dyn NotificationSink>,
    mut feed: F,
) -> Result<(), Error> {
    let watch = subscriptions
        .start_watching(session, signed_state, sink)
        .await?;

    let mut published = 0u64;
    let result = loop {
        let Some(tx) = feed.next_state().await else {
            break Ok(());
        };
        let version = tx.state.version;
        if let Err(e) = watch.publisher.publish(tx).await {
            warn!(
                session = %session,
                channel = %watch.channel,
                version,
                error = %e,
                "Failed to publish state"
            );
            break Err(Error::engine("publish state", e));
        }
        published += 1;
        debug!(session = %session, channel = %watch.channel, version, "Published state");
    };

    subscriptions.end_watch(session, &watch).await;
    debug!(session = %session, channel = %watch.channel, published, "Watch handler finished");
    result
}
