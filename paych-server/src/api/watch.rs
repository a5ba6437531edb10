//! Ledger channel watch stream and the stop-watching call.
//!
//! The first text frame a client sends on `/watch/ws` starts the watch;
//! every later frame publishes a newer state for the same channel. Events
//! of the watched channel come back as [`StartWatchingLedgerChannelResp`]
//! frames.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use kanau::processor::Processor;
use paych_core::events::notification_channel;
use paych_core::watching::watch_ledger_channel;
use paych_sdk::objects::{
    ApiError, ChannelId, SessionId, StartWatchingLedgerChannelReq,
    StartWatchingLedgerChannelResp, StopWatchingReq, StopWatchingResp,
};
use tokio::sync::mpsc;

use super::streams::send_json;
use crate::shutdown::shutdown_requested;
use crate::state::{AppState, StreamKey};

/// `GET /watch/ws`
pub(super) async fn watch_ws(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_watch(socket, state, session_id))
}

/// `POST /channels/{ch_id}/stop-watching`
pub(super) async fn stop_watching(
    State(state): State<AppState>,
    Path((session_id, ch_id)): Path<(SessionId, ChannelId)>,
) -> Json<StopWatchingResp> {
    let req = StopWatchingReq {
        session_id: session_id.clone(),
        ch_id,
    };
    let resp = match state.handler.process(req).await {
        Ok(resp) => resp,
        Err(never) => match never {},
    };
    state.streams.raise(&StreamKey::Watch(session_id, ch_id));
    Json(resp)
}

/// Next state request from the client; `None` once the client left.
async fn next_request(
    socket: &mut WebSocket,
) -> Option<Result<StartWatchingLedgerChannelReq, ApiError>> {
    loop {
        match socket.recv().await? {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(text.as_str()).map_err(|e| {
                    ApiError::invalid_argument("request", e, "a start_watching_ledger_channel_req")
                }));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn fail(socket: &mut WebSocket, error: ApiError) -> Result<(), ()> {
    send_json(socket, &StartWatchingLedgerChannelResp::failed(error)).await
}

async fn run_watch(mut socket: WebSocket, state: AppState, session_id: SessionId) {
    let first = match next_request(&mut socket).await {
        Some(Ok(req)) => req,
        Some(Err(error)) => {
            let _ = fail(&mut socket, error).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        None => return,
    };
    let channel = first.channel_id();
    let registration = match state
        .streams
        .register_guarded(StreamKey::Watch(session_id.clone(), channel))
    {
        Ok(registration) => registration,
        Err(e) => {
            let _ = fail(&mut socket, e.into()).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let mut stop = registration.listener();
    tracing::debug!(session = %session_id, channel = %channel, "Watch stream opened");

    let config = state.config.snapshot();
    let (sink, mut notifications) = notification_channel(config.notification_buffer);
    let (feed, states) = mpsc::channel(config.publish_queue_capacity.max(1));
    let handler = {
        let subscriptions = state.subscriptions.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            watch_ledger_channel(
                &subscriptions,
                &session_id,
                first.signed_state(),
                Arc::new(sink),
                states,
            )
            .await
        })
    };

    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            biased;
            _ = stop.stopped() => break,
            _ = shutdown_requested(&mut shutdown) => break,
            notification = notifications.recv() => {
                let Some(notification) = notification else {
                    break;
                };
                let Some(resp) = StartWatchingLedgerChannelResp::from_notification(notification) else {
                    continue;
                };
                if send_json(&mut socket, &resp).await.is_err() {
                    break;
                }
            }
            request = next_request(&mut socket) => match request {
                None => break,
                Some(Ok(req)) if req.channel_id() != channel => {
                    let error = ApiError::invalid_argument(
                        "state.id",
                        req.channel_id(),
                        "a watch stream publishes states of one channel",
                    );
                    if fail(&mut socket, error).await.is_err() {
                        break;
                    }
                }
                Some(Ok(req)) => {
                    if feed.send(req.into_transaction()).await.is_err() {
                        break;
                    }
                }
                Some(Err(error)) => {
                    if fail(&mut socket, error).await.is_err() {
                        break;
                    }
                }
            },
        }
    }

    // Ending the feed ends the handler, which releases the watch forwarding.
    drop(feed);
    drop(notifications);
    match handler.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(session = %session_id, channel = %channel, error = %e, "Watch ended with error");
            let _ = fail(&mut socket, e.into()).await;
        }
        Err(e) => {
            tracing::error!(session = %session_id, channel = %channel, error = %e, "Watch handler task failed");
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    drop(registration);
    tracing::debug!(session = %session_id, channel = %channel, "Watch stream closed");
}
