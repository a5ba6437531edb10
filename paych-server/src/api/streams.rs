//! Server-push subscription streams and their unsubscribe calls.
//!
//! A stream call subscribes before upgrading, so a refused subscription is
//! answered with an HTTP status. Once upgraded, the call stays open until
//! the matching unsubscribe raises its stop signal, the client leaves, the
//! feed ends or the server shuts down.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use paych_core::events::{NotificationReceiver, notification_channel};
use paych_core::registry::SubscriptionId;
use paych_core::signal::StopListener;
use paych_core::subscriptions::SubscriptionKey;
use paych_sdk::objects::{AckResp, ChannelId, SessionId, UnsubscribeResp};

use super::StreamError;
use crate::shutdown::shutdown_requested;
use crate::state::{AppState, StreamKey};

/// `GET /proposals/ws`
pub(super) async fn proposals_ws(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    ws: WebSocketUpgrade,
) -> Result<Response, StreamError> {
    open_stream(state, SubscriptionKey::Proposals(session_id), ws).await
}

/// `GET /channels/{ch_id}/updates/ws`
pub(super) async fn updates_ws(
    State(state): State<AppState>,
    Path((session_id, ch_id)): Path<(SessionId, ChannelId)>,
    ws: WebSocketUpgrade,
) -> Result<Response, StreamError> {
    open_stream(state, SubscriptionKey::Updates(session_id, ch_id), ws).await
}

/// `GET /channels/{ch_id}/adjudicator/ws`
pub(super) async fn adjudicator_ws(
    State(state): State<AppState>,
    Path((session_id, ch_id)): Path<(SessionId, ChannelId)>,
    ws: WebSocketUpgrade,
) -> Result<Response, StreamError> {
    open_stream(state, SubscriptionKey::Adjudicator(session_id, ch_id), ws).await
}

/// `DELETE /proposals`
pub(super) async fn unsubscribe_proposals(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Json<UnsubscribeResp> {
    close_stream(&state, SubscriptionKey::Proposals(session_id)).await
}

/// `DELETE /channels/{ch_id}/updates`
pub(super) async fn unsubscribe_updates(
    State(state): State<AppState>,
    Path((session_id, ch_id)): Path<(SessionId, ChannelId)>,
) -> Json<UnsubscribeResp> {
    close_stream(&state, SubscriptionKey::Updates(session_id, ch_id)).await
}

/// `DELETE /channels/{ch_id}/adjudicator`
pub(super) async fn unsubscribe_adjudicator(
    State(state): State<AppState>,
    Path((session_id, ch_id)): Path<(SessionId, ChannelId)>,
) -> Json<UnsubscribeResp> {
    close_stream(&state, SubscriptionKey::Adjudicator(session_id, ch_id)).await
}

/// Tear the subscription down, then wake its stream call.
///
/// A stream whose subscribe is still opening its source is left alone.
async fn close_stream(state: &AppState, key: SubscriptionKey) -> Json<UnsubscribeResp> {
    let result = state.subscriptions.unsubscribe(&key).await;
    if result.is_ok() || !state.subscriptions.is_reserved(&key) {
        state.streams.raise(&StreamKey::Subscription(key.clone()));
    }
    if let Err(e) = &result {
        tracing::debug!(key = %key, error = %e, "Unsubscribe refused");
    }
    Json(AckResp::from_result(result))
}

/// Everything an upgraded subscription stream owns.
struct Stream {
    state: AppState,
    key: SubscriptionKey,
    id: SubscriptionId,
    stop: StopListener,
    notifications: NotificationReceiver,
}

async fn open_stream(
    state: AppState,
    key: SubscriptionKey,
    ws: WebSocketUpgrade,
) -> Result<Response, StreamError> {
    // Forgotten again if subscribing fails or this call is dropped.
    let registration = state
        .streams
        .register_guarded(StreamKey::Subscription(key.clone()))?;

    let buffer = state.config.snapshot().notification_buffer;
    let (tx, notifications) = notification_channel(buffer);
    let id = state.subscriptions.subscribe(&key, Arc::new(tx)).await?;
    let stop = registration.disarm();

    let failed = FailedUpgrade {
        state: state.clone(),
        key: key.clone(),
        id,
        stop: stop.clone(),
    };
    let stream = Stream {
        state,
        key,
        id,
        stop,
        notifications,
    };
    Ok(ws
        .on_failed_upgrade(move |e| failed.cleanup(e))
        .on_upgrade(move |socket| stream.run(socket))
        .into_response())
}

/// Releases a subscription whose WebSocket upgrade never completed.
struct FailedUpgrade {
    state: AppState,
    key: SubscriptionKey,
    id: SubscriptionId,
    stop: StopListener,
}

impl FailedUpgrade {
    fn cleanup(self, error: axum::Error) {
        tracing::warn!(key = %self.key, error = %error, "WebSocket upgrade failed");
        tokio::spawn(async move {
            self.state.subscriptions.release(&self.key, self.id).await;
            self.state
                .streams
                .forget(&StreamKey::Subscription(self.key), &self.stop);
        });
    }
}

impl Stream {
    async fn run(mut self, mut socket: WebSocket) {
        tracing::debug!(key = %self.key, "Stream opened");
        let mut shutdown = self.state.shutdown.clone();

        loop {
            tokio::select! {
                biased;
                _ = self.stop.stopped() => {
                    tracing::debug!(key = %self.key, "Stream stopped by unsubscribe");
                    break;
                }
                _ = shutdown_requested(&mut shutdown) => break,
                notification = self.notifications.recv() => {
                    let Some(notification) = notification else {
                        tracing::debug!(key = %self.key, "Stream feed ended");
                        break;
                    };
                    if send_json(&mut socket, &notification).await.is_err() {
                        tracing::debug!(key = %self.key, "Stream client gone");
                        break;
                    }
                }
                msg = socket.recv() => match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        tracing::debug!(key = %self.key, "Stream closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        let _ = socket.send(Message::Close(None)).await;
        self.state.subscriptions.release(&self.key, self.id).await;
        self.state
            .streams
            .forget(&StreamKey::Subscription(self.key), &self.stop);
    }
}

/// Serialize `value` as JSON and send it as a text WebSocket frame.
///
/// Returns `Err(())` if the send fails (client disconnected).
pub(super) async fn send_json<T: serde::Serialize>(
    socket: &mut WebSocket,
    value: &T,
) -> Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}
