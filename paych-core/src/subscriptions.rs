//! The subscription surface shared by both transports.
//!
//! [`Subscriptions`] owns one registry per subscription kind and knows how
//! to open each kind's event source against the engine. Transports only
//! call [`Subscriptions::subscribe`], [`Subscriptions::unsubscribe`] and the
//! watch operations.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use futures_util::FutureExt;
use paych_sdk::objects::{ChannelId, SessionId, SignedState};
use tracing::{debug, info};

use crate::engine::{NodeApi, SessionApi, StatePublisher};
use crate::error::Error;
use crate::events::{proposal_channel, update_channel};
use crate::registry::{SessionTables, SubscriptionId, SubscriptionTable};
use crate::sink::NotificationSink;
use crate::source::{AdjudicatorSource, NotifierSource};

/// Which feed a client subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// Channel proposals of a session.
    Proposals(SessionId),
    /// Updates of one channel.
    Updates(SessionId, ChannelId),
    /// On-chain events of one channel.
    Adjudicator(SessionId, ChannelId),
}

impl SubscriptionKey {
    pub fn session(&self) -> &SessionId {
        match self {
            SubscriptionKey::Proposals(s)
            | SubscriptionKey::Updates(s, _)
            | SubscriptionKey::Adjudicator(s, _) => s,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKey::Proposals(s) => write!(f, "proposals/{s}"),
            SubscriptionKey::Updates(s, ch) => write!(f, "updates/{s}/{ch}"),
            SubscriptionKey::Adjudicator(s, ch) => write!(f, "adjudicator/{s}/{ch}"),
        }
    }
}

/// A running ledger channel watch.
pub struct Watch {
    pub channel: ChannelId,
    pub subscription: SubscriptionId,
    pub publisher: Box<dyn StatePublisher>,
}

pub struct Subscriptions {
    node: Arc<dyn NodeApi>,
    proposals: Arc<SubscriptionTable<SessionId>>,
    updates: SessionTables<ChannelId>,
    adjudicator: SessionTables<ChannelId>,
    watches: SessionTables<ChannelId>,
}

impl Subscriptions {
    pub fn new(node: Arc<dyn NodeApi>) -> Self {
        Self {
            node,
            proposals: SubscriptionTable::new("proposals"),
            updates: SessionTables::new("updates"),
            adjudicator: SessionTables::new("adjudicator"),
            watches: SessionTables::new("watches"),
        }
    }

    pub fn node(&self) -> &Arc<dyn NodeApi> {
        &self.node
    }

    pub fn session(&self, id: &SessionId) -> Result<Arc<dyn SessionApi>, Error> {
        self.node
            .session(id)
            .ok_or_else(|| Error::SessionNotFound(id.clone()))
    }

    pub async fn open_session(&self, config: Option<&Path>) -> Result<SessionId, Error> {
        let id = Error::context("open session", self.node.open_session(config).await)?;
        info!(session = %id, "Opened session");
        Ok(id)
    }

    /// Close a session in the engine, then tear down what was forwarded
    /// from it.
    pub async fn end_session(&self, id: &SessionId) -> Result<(), Error> {
        self.session(id)?;
        Error::context("close session", self.node.close_session(id).await)?;
        self.close_session(id).await;
        info!(session = %id, "Closed session");
        Ok(())
    }

    /// Start forwarding the feed named by `key` into `sink`.
    pub async fn subscribe(
        &self,
        key: &SubscriptionKey,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<SubscriptionId, Error> {
        let session = self.session(key.session())?;

        let (id, ()) = match key {
            SubscriptionKey::Proposals(session_id) => {
                self.proposals
                    .subscribe(
                        session_id.clone(),
                        || async move {
                            let (notifier, rx) = proposal_channel();
                            Error::context(
                                "subscribe proposals",
                                session.subscribe_proposals(notifier).await,
                            )?;
                            let detach_session = session.clone();
                            let source = NotifierSource::new(
                                rx,
                                Box::new(move || {
                                    let session = detach_session.clone();
                                    async move { session.unsubscribe_proposals().await }.boxed()
                                }),
                            );
                            Ok::<_, Error>((Arc::new(source), ()))
                        },
                        sink,
                    )
                    .await?
            }
            SubscriptionKey::Updates(session_id, ch) => {
                let channel = session.channel(ch).ok_or(Error::ChannelNotFound(*ch))?;
                self.updates
                    .table(session_id)
                    .subscribe(
                        *ch,
                        || async move {
                            let (notifier, rx) = update_channel();
                            Error::context(
                                "subscribe updates",
                                channel.subscribe_updates(notifier).await,
                            )?;
                            let detach_channel = channel.clone();
                            let source = NotifierSource::new(
                                rx,
                                Box::new(move || {
                                    let channel = detach_channel.clone();
                                    async move { channel.unsubscribe_updates().await }.boxed()
                                }),
                            );
                            Ok::<_, Error>((Arc::new(source), ()))
                        },
                        sink,
                    )
                    .await?
            }
            SubscriptionKey::Adjudicator(session_id, ch) => {
                let ch = *ch;
                self.adjudicator
                    .table(session_id)
                    .subscribe(
                        ch,
                        || async move {
                            let sub = Error::context(
                                "subscribe adjudicator",
                                session.subscribe_adjudicator(ch).await,
                            )?;
                            Ok::<_, Error>((Arc::new(AdjudicatorSource::new(sub)), ()))
                        },
                        sink,
                    )
                    .await?
            }
        };

        info!(key = %key, "Subscribed");
        Ok(id)
    }

    /// Tear down the subscription under `key`.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> Result<(), Error> {
        match key {
            SubscriptionKey::Proposals(session_id) => self.proposals.unsubscribe(session_id).await?,
            SubscriptionKey::Updates(session_id, ch) => {
                self.updates
                    .existing(session_id)
                    .ok_or(Error::NotSubscribed)?
                    .unsubscribe(ch)
                    .await?
            }
            SubscriptionKey::Adjudicator(session_id, ch) => {
                self.adjudicator
                    .existing(session_id)
                    .ok_or(Error::NotSubscribed)?
                    .unsubscribe(ch)
                    .await?
            }
        }
        info!(key = %key, "Unsubscribed");
        Ok(())
    }

    /// Whether a subscribe for `key` is still opening its source.
    pub fn is_reserved(&self, key: &SubscriptionKey) -> bool {
        match key {
            SubscriptionKey::Proposals(session_id) => self.proposals.is_reserved(session_id),
            SubscriptionKey::Updates(session_id, ch) => self
                .updates
                .existing(session_id)
                .is_some_and(|table| table.is_reserved(ch)),
            SubscriptionKey::Adjudicator(session_id, ch) => self
                .adjudicator
                .existing(session_id)
                .is_some_and(|table| table.is_reserved(ch)),
        }
    }

    /// Tear down `key` only if it is still subscription `id`.
    pub async fn release(&self, key: &SubscriptionKey, id: SubscriptionId) -> bool {
        match key {
            SubscriptionKey::Proposals(session_id) => self.proposals.release(session_id, id).await,
            SubscriptionKey::Updates(session_id, ch) => match self.updates.existing(session_id) {
                Some(table) => table.release(ch, id).await,
                None => false,
            },
            SubscriptionKey::Adjudicator(session_id, ch) => {
                match self.adjudicator.existing(session_id) {
                    Some(table) => table.release(ch, id).await,
                    None => false,
                }
            }
        }
    }

    /// Start watching a ledger channel and forward its on-chain events into
    /// `sink`.
    pub async fn start_watching(
        &self,
        session_id: &SessionId,
        signed_state: SignedState,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Watch, Error> {
        let session = self.session(session_id)?;
        let channel = signed_state.channel_id();
        let (subscription, publisher) = self
            .watches
            .table(session_id)
            .subscribe(
                channel,
                || async move {
                    let (publisher, sub) = Error::context(
                        "start watching",
                        session.start_watching(signed_state).await,
                    )?;
                    Ok::<_, Error>((Arc::new(AdjudicatorSource::new(sub)), publisher))
                },
                sink,
            )
            .await?;

        info!(session = %session_id, channel = %channel, "Started watching");
        Ok(Watch {
            channel,
            subscription,
            publisher,
        })
    }

    /// Release a watch's forwarding once its owner is done with it.
    pub async fn end_watch(&self, session_id: &SessionId, watch: &Watch) {
        if let Some(table) = self.watches.existing(session_id) {
            if table.release(&watch.channel, watch.subscription).await {
                debug!(session = %session_id, channel = %watch.channel, "Watch forwarding released");
            }
        }
    }

    /// Stop watching through the engine and drop the watch's forwarding.
    pub async fn stop_watching(&self, session_id: &SessionId, channel: ChannelId) -> Result<(), Error> {
        let session = self.session(session_id)?;
        Error::context("stop watching", session.stop_watching(channel).await)?;
        if let Some(table) = self.watches.existing(session_id) {
            // the engine already closed the source; the entry may be gone too
            let _ = table.unsubscribe(&channel).await;
        }
        info!(session = %session_id, channel = %channel, "Stopped watching");
        Ok(())
    }

    /// Tear down every subscription and watch forwarding of a session.
    pub async fn close_session(&self, session_id: &SessionId) {
        let _ = self.proposals.unsubscribe(session_id).await;
        self.updates.close_session(session_id).await;
        self.adjudicator.close_session(session_id).await;
        self.watches.close_session(session_id).await;
        debug!(session = %session_id, "Session subscriptions closed");
    }

    /// Tear down everything, e.g. on shutdown.
    pub async fn close_all(&self) {
        self.proposals.close_all().await;
        self.updates.close_all().await;
        self.adjudicator.close_all().await;
        self.watches.close_all().await;
    }
}
