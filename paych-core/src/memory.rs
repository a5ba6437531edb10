//! In-process implementation of the engine contracts.
//!
//! `MemoryNode` keeps sessions, channels, watches and adjudicator listeners
//! in memory and performs no on-chain work. `register` is observed as a
//! `Registered` event, `progress` as `Progressed` and `withdraw` as
//! `Concluded`. It backs the server in
//! development mode and every transport test; the hooks on
//! [`MemorySession`] and [`MemoryChannel`] play the part of peers and the
//! chain.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use paych_sdk::objects::{
    AdjudicatorReq, ApiError, ChannelId, ErrorCode, PayChInfo, SessionId, SignedState,
    StateMapEntry, Transaction,
};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use crate::engine::{
    AdjudicatorSubscription, ChannelApi, EngineError, FundingReq, NodeApi, ProgressionReq,
    SessionApi, StatePublisher,
};
use crate::events::{
    AdjudicatorEvent, AdjudicatorEventBase, DEFAULT_CHANNEL_BUFFER, ProposalEvent,
    ProposalNotifier, Timeout, UpdateEvent, UpdateNotifier,
};
use crate::signal::StopSignal;

fn engine_error(code: ErrorCode, message: impl Into<String>) -> EngineError {
    EngineError(ApiError::new(code, message))
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryNode {
    sessions: Mutex<HashMap<SessionId, Arc<MemorySession>>>,
}

impl MemoryNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a session with a caller-chosen id, replacing any previous one.
    pub fn insert_session(&self, id: SessionId) -> Arc<MemorySession> {
        let session = Arc::new(MemorySession::new(id.clone()));
        self.sessions.lock().insert(id, session.clone());
        session
    }

    pub fn memory_session(&self, id: &SessionId) -> Option<Arc<MemorySession>> {
        self.sessions.lock().get(id).cloned()
    }
}

#[async_trait]
impl NodeApi for MemoryNode {
    async fn open_session(&self, config: Option<&Path>) -> Result<SessionId, EngineError> {
        if let Some(path) = config {
            debug!(path = %path.display(), "Session config is not used by the in-memory engine");
        }
        let id = SessionId::from(Uuid::now_v7().to_string());
        self.insert_session(id.clone());
        Ok(id)
    }

    fn session(&self, id: &SessionId) -> Option<Arc<dyn SessionApi>> {
        let session = self.memory_session(id)?;
        Some(session as Arc<dyn SessionApi>)
    }

    async fn close_session(&self, id: &SessionId) -> Result<(), EngineError> {
        let session = self.sessions.lock().remove(id);
        match session {
            Some(session) => {
                session.shut_down();
                debug!(session = %id, "Closed session");
                Ok(())
            }
            None => Err(EngineError(ApiError::resource_not_found("session", id))),
        }
    }
}

// ---------------------------------------------------------------------------
// Adjudicator subscriptions
// ---------------------------------------------------------------------------

/// Emitting side of one adjudicator subscription.
#[derive(Clone)]
struct Listener {
    tx: mpsc::Sender<AdjudicatorEvent>,
    err: Arc<Mutex<Option<EngineError>>>,
    stop: Arc<StopSignal>,
}

fn listener() -> (Listener, MemorySubscription) {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
    let err = Arc::new(Mutex::new(None));
    let stop = Arc::new(StopSignal::new());
    let sub = MemorySubscription {
        rx: tokio::sync::Mutex::new(rx),
        err: err.clone(),
        stop: stop.clone(),
    };
    (Listener { tx, err, stop }, sub)
}

impl Listener {
    fn is_live(&self) -> bool {
        !self.stop.is_raised() && !self.tx.is_closed()
    }
}

pub struct MemorySubscription {
    rx: tokio::sync::Mutex<mpsc::Receiver<AdjudicatorEvent>>,
    err: Arc<Mutex<Option<EngineError>>>,
    stop: Arc<StopSignal>,
}

#[async_trait]
impl AdjudicatorSubscription for MemorySubscription {
    async fn next(&self) -> Option<AdjudicatorEvent> {
        let mut stop = self.stop.listener();
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = stop.stopped() => None,
            event = rx.recv() => event,
        }
    }

    fn err(&self) -> Option<EngineError> {
        self.err.lock().clone()
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.stop.raise();
        Ok(())
    }
}

/// Publisher of one watch; records what it was given.
struct MemoryPublisher {
    published: Arc<Mutex<Vec<Transaction>>>,
    stop: Arc<StopSignal>,
}

#[async_trait]
impl StatePublisher for MemoryPublisher {
    async fn publish(&self, tx: Transaction) -> Result<(), EngineError> {
        if self.stop.is_raised() {
            return Err(engine_error(
                ErrorCode::FailedPreCondition,
                format!("channel {} is no longer watched", tx.state.id),
            ));
        }
        self.published.lock().push(tx);
        Ok(())
    }
}

struct Watched {
    initial: SignedState,
    published: Arc<Mutex<Vec<Transaction>>>,
    listener: Listener,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct MemorySession {
    id: SessionId,
    proposals: Mutex<Option<ProposalNotifier>>,
    channels: Mutex<HashMap<ChannelId, Arc<MemoryChannel>>>,
    listeners: Mutex<HashMap<ChannelId, Vec<Listener>>>,
    watches: Mutex<HashMap<ChannelId, Watched>>,
    funded: Mutex<Vec<(ChannelId, u16)>>,
    /// `false` while adjudicator subscriptions are held back.
    subscribe_gate: watch::Sender<bool>,
}

impl MemorySession {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            proposals: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            watches: Mutex::new(HashMap::new()),
            funded: Mutex::new(Vec::new()),
            subscribe_gate: watch::Sender::new(true),
        }
    }

    /// Drop every notifier and end every adjudicator subscription and watch.
    fn shut_down(&self) {
        self.proposals.lock().take();
        for channel in self.channels.lock().drain().map(|(_, channel)| channel) {
            channel.updates.lock().take();
        }
        for listener in self.listeners.lock().drain().flat_map(|(_, l)| l) {
            listener.stop.raise();
        }
        for watched in self.watches.lock().drain().map(|(_, w)| w) {
            watched.listener.stop.raise();
        }
    }

    /// Make `subscribe_adjudicator` wait until [`Self::release_subscriptions`].
    pub fn hold_subscriptions(&self) {
        self.subscribe_gate.send_replace(false);
    }

    pub fn release_subscriptions(&self) {
        self.subscribe_gate.send_replace(true);
    }

    /// Open a channel in this session.
    pub fn add_channel(&self, info: PayChInfo) -> Arc<MemoryChannel> {
        let channel = Arc::new(MemoryChannel {
            info: Mutex::new(info.clone()),
            updates: Mutex::new(None),
        });
        self.channels.lock().insert(info.ch_id, channel.clone());
        channel
    }

    pub fn memory_channel(&self, id: &ChannelId) -> Option<Arc<MemoryChannel>> {
        self.channels.lock().get(id).cloned()
    }

    /// Deliver a proposal from a peer. Returns whether anyone listened.
    pub async fn propose(&self, event: ProposalEvent) -> bool {
        let notifier = self.proposals.lock().clone();
        match notifier {
            Some(notifier) => notifier.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Deliver an on-chain event for `channel` to every listener and watch.
    ///
    /// Returns how many subscriptions received it.
    pub async fn emit_adjudicator(&self, channel: ChannelId, event: AdjudicatorEvent) -> usize {
        let mut targets: Vec<Listener> = {
            let mut listeners = self.listeners.lock();
            let entry = listeners.entry(channel).or_default();
            entry.retain(Listener::is_live);
            entry.clone()
        };
        if let Some(watched) = self.watches.lock().get(&channel) {
            targets.push(watched.listener.clone());
        }

        let mut delivered = 0;
        for target in targets {
            if target.is_live() && target.tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// End every adjudicator subscription of `channel` with `err`.
    pub fn fail_adjudicator(&self, channel: ChannelId, err: EngineError) {
        let listeners = self.listeners.lock().remove(&channel).unwrap_or_default();
        for listener in listeners {
            *listener.err.lock() = Some(err.clone());
            listener.stop.raise();
        }
    }

    pub fn is_watching(&self, channel: &ChannelId) -> bool {
        self.watches.lock().contains_key(channel)
    }

    /// The state a watch was started from.
    pub fn watched_state(&self, channel: &ChannelId) -> Option<SignedState> {
        self.watches
            .lock()
            .get(channel)
            .map(|watched| watched.initial.clone())
    }

    /// States published to the watch of `channel`, oldest first.
    pub fn published(&self, channel: &ChannelId) -> Vec<Transaction> {
        self.watches
            .lock()
            .get(channel)
            .map(|watched| watched.published.lock().clone())
            .unwrap_or_default()
    }

    pub fn funded(&self) -> Vec<(ChannelId, u16)> {
        self.funded.lock().clone()
    }

    pub fn has_proposal_subscriber(&self) -> bool {
        self.proposals.lock().is_some()
    }
}

fn challenge_timeout(challenge_duration: u64) -> Timeout {
    let now = OffsetDateTime::now_utc();
    let secs = i64::try_from(challenge_duration).unwrap_or(i64::MAX);
    match now.checked_add(time::Duration::seconds(secs)) {
        Some(at) => Timeout::At(at),
        None => Timeout::At(now),
    }
}

#[async_trait]
impl SessionApi for MemorySession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn subscribe_proposals(&self, notifier: ProposalNotifier) -> Result<(), EngineError> {
        let mut proposals = self.proposals.lock();
        if proposals.as_ref().is_some_and(|n| !n.is_closed()) {
            return Err(EngineError(ApiError::resource_exists(
                "proposal notifier",
                &self.id,
            )));
        }
        *proposals = Some(notifier);
        Ok(())
    }

    async fn unsubscribe_proposals(&self) -> Result<(), EngineError> {
        match self.proposals.lock().take() {
            Some(_) => Ok(()),
            None => Err(EngineError(ApiError::resource_not_found(
                "proposal notifier",
                &self.id,
            ))),
        }
    }

    fn channel(&self, id: &ChannelId) -> Option<Arc<dyn ChannelApi>> {
        let channel = self.memory_channel(id)?;
        Some(channel as Arc<dyn ChannelApi>)
    }

    async fn fund(&self, req: FundingReq) -> Result<(), EngineError> {
        if req.params.parts.is_empty() {
            return Err(EngineError(ApiError::invalid_argument(
                "params.parts",
                "[]",
                "at least one participant",
            )));
        }
        if usize::from(req.idx) >= req.params.parts.len() {
            return Err(EngineError(ApiError::invalid_argument(
                "idx",
                req.idx,
                "must index a participant",
            )));
        }
        self.funded.lock().push((req.state.id, req.idx));
        Ok(())
    }

    async fn register(
        &self,
        req: AdjudicatorReq,
        _signed_states: Vec<SignedState>,
    ) -> Result<(), EngineError> {
        let state = req.tx.state;
        let event = AdjudicatorEvent::Registered {
            base: AdjudicatorEventBase {
                channel_id: state.id,
                timeout: challenge_timeout(req.params.challenge_duration),
                version: state.version,
            },
            state,
        };
        let channel = event.base().channel_id;
        self.emit_adjudicator(channel, event).await;
        Ok(())
    }

    async fn progress(&self, req: ProgressionReq) -> Result<(), EngineError> {
        let ProgressionReq {
            adj_req,
            new_state,
            sig,
        } = req;
        let channel = adj_req.tx.state.id;
        if new_state.id != channel {
            return Err(EngineError(ApiError::invalid_argument(
                "new_state.id",
                new_state.id,
                "must match the registered channel",
            )));
        }
        if new_state.version <= adj_req.tx.state.version {
            return Err(EngineError(ApiError::invalid_argument(
                "new_state.version",
                new_state.version,
                "must be newer than the registered state",
            )));
        }
        if usize::from(adj_req.idx) >= adj_req.params.parts.len() {
            return Err(EngineError(ApiError::invalid_argument(
                "adj_req.idx",
                adj_req.idx,
                "must index a participant",
            )));
        }
        if sig.0.is_empty() {
            debug!(%channel, "Progressing without a signature");
        }
        let event = AdjudicatorEvent::Progressed {
            base: AdjudicatorEventBase {
                channel_id: channel,
                timeout: challenge_timeout(adj_req.params.challenge_duration),
                version: new_state.version,
            },
            state: new_state,
            idx: adj_req.idx,
        };
        self.emit_adjudicator(channel, event).await;
        Ok(())
    }

    async fn withdraw(
        &self,
        req: AdjudicatorReq,
        _state_map: Vec<StateMapEntry>,
    ) -> Result<(), EngineError> {
        let state = req.tx.state;
        if !state.is_final && !req.secondary {
            debug!(channel = %state.id, "Withdrawing a non-final state");
        }
        let event = AdjudicatorEvent::Concluded {
            base: AdjudicatorEventBase {
                channel_id: state.id,
                timeout: Timeout::Elapsed,
                version: state.version,
            },
        };
        self.emit_adjudicator(state.id, event).await;
        Ok(())
    }

    async fn subscribe_adjudicator(
        &self,
        channel: ChannelId,
    ) -> Result<Box<dyn AdjudicatorSubscription>, EngineError> {
        let mut gate = self.subscribe_gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(engine_error(ErrorCode::UnknownInternal, "session is closing"));
        }
        let (listener, sub) = listener();
        self.listeners.lock().entry(channel).or_default().push(listener);
        Ok(Box::new(sub))
    }

    async fn start_watching(
        &self,
        signed_state: SignedState,
    ) -> Result<(Box<dyn StatePublisher>, Box<dyn AdjudicatorSubscription>), EngineError> {
        let channel = signed_state.channel_id();
        let mut watches = self.watches.lock();
        if watches.contains_key(&channel) {
            return Err(EngineError(ApiError::resource_exists("watch", channel)));
        }

        let (listener, sub) = listener();
        let published = Arc::new(Mutex::new(Vec::new()));
        let publisher = MemoryPublisher {
            published: published.clone(),
            stop: listener.stop.clone(),
        };
        watches.insert(
            channel,
            Watched {
                initial: signed_state,
                published,
                listener,
            },
        );
        Ok((Box::new(publisher), Box::new(sub)))
    }

    async fn stop_watching(&self, channel: ChannelId) -> Result<(), EngineError> {
        let watched = self.watches.lock().remove(&channel);
        match watched {
            Some(watched) => {
                watched.listener.stop.raise();
                Ok(())
            }
            None => Err(EngineError(ApiError::resource_not_found("watch", channel))),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

pub struct MemoryChannel {
    info: Mutex<PayChInfo>,
    updates: Mutex<Option<UpdateNotifier>>,
}

impl MemoryChannel {
    pub fn info(&self) -> PayChInfo {
        self.info.lock().clone()
    }

    /// Deliver an update from the peer. Returns whether anyone listened.
    pub async fn push_update(&self, event: UpdateEvent) -> bool {
        *self.info.lock() = event.proposed.clone();
        let notifier = self.updates.lock().clone();
        match notifier {
            Some(notifier) => notifier.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn has_update_subscriber(&self) -> bool {
        self.updates.lock().is_some()
    }
}

#[async_trait]
impl ChannelApi for MemoryChannel {
    fn id(&self) -> ChannelId {
        self.info.lock().ch_id
    }

    async fn subscribe_updates(&self, notifier: UpdateNotifier) -> Result<(), EngineError> {
        let mut updates = self.updates.lock();
        if updates.as_ref().is_some_and(|n| !n.is_closed()) {
            return Err(EngineError(ApiError::resource_exists(
                "update notifier",
                self.info.lock().ch_id,
            )));
        }
        *updates = Some(notifier);
        Ok(())
    }

    async fn unsubscribe_updates(&self) -> Result<(), EngineError> {
        match self.updates.lock().take() {
            Some(_) => Ok(()),
            None => Err(EngineError(ApiError::resource_not_found(
                "update notifier",
                self.info.lock().ch_id,
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use paych_sdk::objects::{Allocation, HexBytes, Params, State};

    use super::*;

    pub fn signed_state(channel: ChannelId, version: u64) -> SignedState {
        SignedState {
            params: Params {
                challenge_duration: 60,
                parts: vec![HexBytes(vec![1; 20]), HexBytes(vec![2; 20])],
                app: None,
                nonce: "1".into(),
                ledger_channel: true,
                virtual_channel: false,
            },
            state: State {
                id: channel,
                version,
                app: None,
                allocation: Allocation::default(),
                data: HexBytes::default(),
                is_final: false,
            },
            sigs: vec![HexBytes(vec![9; 65]), HexBytes(vec![8; 65])],
        }
    }

    pub fn paych_info(channel: ChannelId) -> PayChInfo {
        PayChInfo {
            ch_id: channel,
            bal_info: paych_sdk::objects::BalInfo::default(),
            version: "0".to_owned(),
        }
    }
}
