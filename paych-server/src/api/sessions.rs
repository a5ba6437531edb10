//! Opening and closing sessions.

use axum::{
    Json,
    extract::{Path, State},
};
use kanau::processor::Processor;
use paych_sdk::objects::{
    CloseSessionReq, CloseSessionResp, OpenSessionReq, OpenSessionResp, SessionId,
};

use crate::state::AppState;

/// `POST /api/v1/sessions`
///
/// The body is optional; without one the session gets the node's defaults.
pub async fn open_session(
    State(state): State<AppState>,
    req: Option<Json<OpenSessionReq>>,
) -> Json<OpenSessionResp> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    match state.handler.process(req).await {
        Ok(resp) => Json(resp),
        Err(never) => match never {},
    }
}

/// `DELETE /api/v1/sessions/{session_id}`
///
/// Closes the session and ends every stream still open on it.
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Json<CloseSessionResp> {
    let req = CloseSessionReq {
        session_id: session_id.clone(),
    };
    let resp = match state.handler.process(req).await {
        Ok(resp) => resp,
        Err(never) => match never {},
    };
    if resp.error.is_none() {
        let ended = state.streams.raise_where(|key| key.session() == &session_id);
        tracing::debug!(session = %session_id, streams = ended, "Ended session streams");
    }
    Json(resp)
}
