//! Unary requests: fund, register, progress and withdraw.
//!
//! The session in the path wins over the one in the body.

use axum::{
    Json,
    extract::{Path, State},
};
use kanau::processor::Processor;
use paych_sdk::objects::{
    FundReq, FundResp, ProgressReq, ProgressResp, RegisterReq, RegisterResp, SessionId,
    WithdrawReq, WithdrawResp,
};

use crate::state::AppState;

/// `POST /fund`
pub(super) async fn fund(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(mut req): Json<FundReq>,
) -> Json<FundResp> {
    req.session_id = session_id;
    match state.handler.process(req).await {
        Ok(resp) => Json(resp),
        Err(never) => match never {},
    }
}

/// `POST /register`
pub(super) async fn register(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(mut req): Json<RegisterReq>,
) -> Json<RegisterResp> {
    req.session_id = session_id;
    match state.handler.process(req).await {
        Ok(resp) => Json(resp),
        Err(never) => match never {},
    }
}

/// `POST /progress`
pub(super) async fn progress(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(mut req): Json<ProgressReq>,
) -> Json<ProgressResp> {
    req.session_id = session_id;
    match state.handler.process(req).await {
        Ok(resp) => Json(resp),
        Err(never) => match never {},
    }
}

/// `POST /withdraw`
pub(super) async fn withdraw(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(mut req): Json<WithdrawReq>,
) -> Json<WithdrawResp> {
    req.session_id = session_id;
    match state.handler.process(req).await {
        Ok(resp) => Json(resp),
        Err(never) => match never {},
    }
}
