//! Streaming transport: HTTP and WebSocket endpoints.
//!
//! # Endpoints
//!
//! - `POST   /api/v1/sessions`                  – open a session
//! - `DELETE /api/v1/sessions/{session_id}`     – close a session and its streams
//!
//! The rest are under `/api/v1/sessions/{session_id}`:
//!
//! - `GET    /proposals/ws`                     – proposal stream
//! - `DELETE /proposals`                        – end the proposal stream
//! - `GET    /channels/{ch_id}/updates/ws`      – channel update stream
//! - `DELETE /channels/{ch_id}/updates`         – end the update stream
//! - `GET    /channels/{ch_id}/adjudicator/ws`  – adjudicator event stream
//! - `DELETE /channels/{ch_id}/adjudicator`     – end the adjudicator stream
//! - `GET    /watch/ws`                         – ledger channel watch
//! - `POST   /channels/{ch_id}/stop-watching`   – stop a watch
//! - `POST   /fund`, `/register`, `/progress`,
//!   `/withdraw`                              – unary requests
//!
//! Unary calls always answer `200` with an [`AckResp`] whose `error` field
//! carries any failure. Stream calls that cannot start answer with an HTTP
//! error status instead of upgrading.

use axum::{
    Json, Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use paych_core::error::Error;
use paych_sdk::objects::{AckResp, ApiError, ErrorCode};

use crate::state::AppState;

mod requests;
mod sessions;
mod streams;
mod watch;

pub use sessions::{close_session, open_session};

/// Build the session API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/proposals/ws", get(streams::proposals_ws))
        .route("/proposals", delete(streams::unsubscribe_proposals))
        .route(
            "/channels/{ch_id}/updates/ws",
            get(streams::updates_ws),
        )
        .route(
            "/channels/{ch_id}/updates",
            delete(streams::unsubscribe_updates),
        )
        .route(
            "/channels/{ch_id}/adjudicator/ws",
            get(streams::adjudicator_ws),
        )
        .route(
            "/channels/{ch_id}/adjudicator",
            delete(streams::unsubscribe_adjudicator),
        )
        .route("/watch/ws", get(watch::watch_ws))
        .route(
            "/channels/{ch_id}/stop-watching",
            post(watch::stop_watching),
        )
        .route("/fund", post(requests::fund))
        .route("/register", post(requests::register))
        .route("/progress", post(requests::progress))
        .route("/withdraw", post(requests::withdraw))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// A stream call that could not be started.
#[derive(Debug)]
struct StreamError(ApiError);

impl From<Error> for StreamError {
    fn from(value: Error) -> Self {
        Self(value.into())
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0.code {
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ResourceExists => StatusCode::CONFLICT,
            ErrorCode::InvalidArgument | ErrorCode::FailedPreCondition => StatusCode::BAD_REQUEST,
            ErrorCode::ChainNotReachable => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Stream call failed");
        }
        let body = AckResp {
            error: Some(self.0),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, header};
    use paych_core::config::SharedConfig;
    use paych_core::events::ProposalEvent;
    use paych_core::memory::{MemoryNode, MemorySession};
    use paych_core::subscriptions::{SubscriptionKey, Subscriptions};
    use paych_sdk::client::{ClientError, NotificationStream, StreamClient};
    use paych_sdk::objects::{
        AdjudicatorNotif, AdjudicatorReq, Allocation, BalInfo, ChannelId, FundReq, HexBytes,
        Notification, OpenSessionReq, Params, PayChInfo, ProgressReq, RegisterReq, SessionId,
        StartWatchingLedgerChannelReq, State, WithdrawReq,
    };
    use rust_decimal::Decimal;
    use tokio::sync::watch;
    use tower::ServiceExt;

    use super::*;

    const CH: ChannelId = ChannelId([0xab; 32]);

    fn setup() -> (Arc<MemorySession>, AppState, watch::Sender<bool>) {
        let node = MemoryNode::new();
        let session = node.insert_session("s1".into());
        let subscriptions = Arc::new(Subscriptions::new(node));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState::new(subscriptions, SharedConfig::new(Default::default()), shutdown_rx);
        (session, state, shutdown_tx)
    }

    fn params() -> Params {
        Params {
            challenge_duration: 60,
            parts: vec![HexBytes(vec![1; 20]), HexBytes(vec![2; 20])],
            app: None,
            nonce: "7".to_owned(),
            ledger_channel: true,
            virtual_channel: false,
        }
    }

    fn channel_state(version: u64) -> State {
        State {
            id: CH,
            version,
            app: None,
            allocation: Allocation {
                assets: vec![HexBytes(vec![0xaa; 20])],
                balances: vec![vec![Decimal::new(3, 0), Decimal::new(7, 0)]],
                locked: vec![],
            },
            data: HexBytes::default(),
            is_final: false,
        }
    }

    fn watch_req(version: u64) -> StartWatchingLedgerChannelReq {
        StartWatchingLedgerChannelReq {
            session_id: "s1".into(),
            params: params(),
            state: channel_state(version),
            sigs: vec![HexBytes(vec![9; 65])],
        }
    }

    fn adj_req(version: u64) -> AdjudicatorReq {
        let signed = watch_req(version).signed_state();
        AdjudicatorReq {
            params: signed.params.clone(),
            tx: signed.transaction(),
            idx: 0,
            secondary: false,
        }
    }

    fn progress_req(version: u64) -> ProgressReq {
        ProgressReq {
            session_id: "s1".into(),
            adj_req: adj_req(version - 1),
            new_state: channel_state(version),
            sig: HexBytes(vec![5; 65]),
        }
    }

    async fn adjudicator_event(stream: &mut NotificationStream) -> AdjudicatorNotif {
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        match next {
            Some(Ok(Notification::Adjudicator { event })) => event,
            other => panic!("expected an adjudicator notification, got {other:?}"),
        }
    }

    async fn assert_ended(stream: &mut NotificationStream) {
        let ended = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(ended.is_none() || matches!(ended, Some(Err(_))));
    }

    async fn ack(router: Router, req: Request<Body>) -> (StatusCode, AckResp) {
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn serve(state: AppState) -> StreamClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = crate::server::build_router(state);
        tokio::spawn(async move { axum::serve(listener, router).await });
        StreamClient::new(format!("http://{addr}").parse().unwrap())
    }

    #[tokio::test]
    async fn fund_answers_with_an_empty_ack() {
        let (session, state, _shutdown) = setup();
        let body = serde_json::to_vec(&FundReq {
            session_id: "ignored".into(),
            params: params(),
            state: channel_state(0),
            idx: 1,
        })
        .unwrap();
        let req = Request::post("/api/v1/sessions/s1/fund")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();

        let (status, resp) = ack(crate::server::build_router(state), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp, AckResp::ok());
        assert_eq!(session.funded(), vec![(CH, 1)]);
    }

    #[tokio::test]
    async fn unknown_session_is_reported_in_band() {
        let (_session, state, _shutdown) = setup();
        let body = serde_json::to_vec(&FundReq {
            session_id: "nope".into(),
            params: params(),
            state: channel_state(0),
            idx: 0,
        })
        .unwrap();
        let req = Request::post("/api/v1/sessions/nope/fund")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();

        let (status, resp) = ack(crate::server::build_router(state), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.error.unwrap().code, ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn unsubscribe_without_subscription_is_not_subscribed() {
        let (_session, state, _shutdown) = setup();
        let req = Request::delete("/api/v1/sessions/s1/proposals")
            .body(Body::empty())
            .unwrap();
        let (status, resp) = ack(crate::server::build_router(state), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.error.unwrap().code, ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn proposal_stream_delivers_until_unsubscribed() {
        let (session, state, _shutdown) = setup();
        let client = serve(state).await;
        let sid = SessionId::from("s1");

        let mut stream = client.subscribe_proposals(&sid).await.unwrap();
        eventually(|| session.has_proposal_subscriber()).await;
        assert!(
            session
                .propose(ProposalEvent {
                    proposal_id: "p1".to_owned(),
                    opening_balances: BalInfo::default(),
                    challenge_duration: Duration::from_secs(30),
                    expiry: time::OffsetDateTime::UNIX_EPOCH,
                })
                .await
        );
        let Some(Ok(Notification::Proposal(notif))) = stream.next().await else {
            panic!("expected a proposal notification");
        };
        assert_eq!(notif.proposal_id, "p1");
        assert_eq!(notif.challenge_dur_secs, 30);

        // a second stream on the same key is refused
        assert!(matches!(
            client.subscribe_proposals(&sid).await,
            Err(ClientError::WebSocket(_))
        ));

        client.unsubscribe_proposals(&sid).await.unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(ended.is_none() || matches!(ended, Some(Err(_))));
        assert!(!session.has_proposal_subscriber());
        assert!(matches!(
            client.unsubscribe_proposals(&sid).await,
            Err(ClientError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn update_stream_ends_when_the_client_leaves() {
        let (session, state, _shutdown) = setup();
        let channel = session.add_channel(PayChInfo {
            ch_id: CH,
            bal_info: BalInfo::default(),
            version: "0".to_owned(),
        });
        let client = serve(state).await;

        let stream = client
            .subscribe_updates(&SessionId::from("s1"), CH)
            .await
            .unwrap();
        eventually(|| channel.has_update_subscriber()).await;
        stream.close().await.unwrap();
        eventually(|| !channel.has_update_subscriber()).await;
    }

    #[tokio::test]
    async fn watch_stream_publishes_and_reports_adjudicator_events() {
        let (session, state, _shutdown) = setup();
        let client = serve(state).await;
        let sid = SessionId::from("s1");

        let mut watch = client.watch(&sid, &watch_req(1)).await.unwrap();
        eventually(|| session.is_watching(&CH)).await;
        watch.publish(&watch_req(2)).await.unwrap();
        eventually(|| session.published(&CH).len() == 1).await;
        assert_eq!(session.published(&CH)[0].state.version, 2);

        let signed = watch_req(2).signed_state();
        client
            .register(&RegisterReq {
                session_id: sid.clone(),
                adj_req: AdjudicatorReq {
                    params: signed.params.clone(),
                    tx: signed.transaction(),
                    idx: 0,
                    secondary: false,
                },
                signed_states: vec![],
            })
            .await
            .unwrap();
        let Some(Ok(resp)) = watch.next().await else {
            panic!("expected a watch response");
        };
        assert!(matches!(
            resp.event,
            Some(AdjudicatorNotif::Registered { version: 2, .. })
        ));

        client.stop_watching(&sid, CH).await.unwrap();
        assert!(!session.is_watching(&CH));
        let ended = tokio::time::timeout(Duration::from_secs(5), watch.next())
            .await
            .unwrap();
        assert!(ended.is_none() || matches!(ended, Some(Err(_))));
    }

    #[tokio::test]
    async fn shutdown_ends_open_streams() {
        let (session, state, shutdown) = setup();
        let client = serve(state).await;

        let mut stream = client
            .subscribe_proposals(&SessionId::from("s1"))
            .await
            .unwrap();
        eventually(|| session.has_proposal_subscriber()).await;
        shutdown.send_replace(true);
        let ended = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(ended.is_none() || matches!(ended, Some(Err(_))));
        eventually(|| !session.has_proposal_subscriber()).await;
    }

    #[tokio::test]
    async fn adjudicator_stream_reports_progress_and_ends_on_conclusion() {
        let (_session, state, _shutdown) = setup();
        let client = serve(state).await;
        let sid = SessionId::from("s1");

        let mut stream = client.subscribe_adjudicator(&sid, CH).await.unwrap();
        assert!(matches!(
            client.subscribe_adjudicator(&sid, CH).await,
            Err(ClientError::WebSocket(_))
        ));

        client.progress(&progress_req(2)).await.unwrap();
        assert!(matches!(
            adjudicator_event(&mut stream).await,
            AdjudicatorNotif::Progressed { version: 2, idx: 0, .. }
        ));

        client
            .withdraw(&WithdrawReq {
                session_id: sid.clone(),
                adj_req: adj_req(2),
                state_map: vec![],
            })
            .await
            .unwrap();
        assert!(matches!(
            adjudicator_event(&mut stream).await,
            AdjudicatorNotif::Concluded { version: 2, .. }
        ));
        assert_ended(&mut stream).await;

        // the concluded subscription retired itself, so the key is free again
        let mut again = None;
        for _ in 0..100 {
            if let Ok(stream) = client.subscribe_adjudicator(&sid, CH).await {
                again = Some(stream);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut again = again.expect("adjudicator stream could not be reopened");

        client.unsubscribe_adjudicator(&sid, CH).await.unwrap();
        assert_ended(&mut again).await;
        assert!(matches!(
            client.unsubscribe_adjudicator(&sid, CH).await,
            Err(ClientError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn unsubscribe_during_a_pending_subscribe_leaves_the_new_stream_open() {
        let (session, state, _shutdown) = setup();
        let subscriptions = state.subscriptions.clone();
        let streams = state.streams.clone();
        let client = serve(state).await;
        let sid = SessionId::from("s1");
        let key = SubscriptionKey::Adjudicator(sid.clone(), CH);
        session.hold_subscriptions();

        let pending = {
            let (client, sid) = (client.clone(), sid.clone());
            tokio::spawn(async move { client.subscribe_adjudicator(&sid, CH).await })
        };
        eventually(|| subscriptions.is_reserved(&key)).await;
        assert!(matches!(
            client.unsubscribe_adjudicator(&sid, CH).await,
            Err(ClientError::Rejected(_))
        ));
        assert_eq!(streams.len(), 1);

        session.release_subscriptions();
        let mut stream = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        client.progress(&progress_req(3)).await.unwrap();
        assert!(matches!(
            adjudicator_event(&mut stream).await,
            AdjudicatorNotif::Progressed { version: 3, .. }
        ));
    }

    #[tokio::test]
    async fn closing_a_session_ends_its_streams() {
        let (session, state, _shutdown) = setup();
        let streams = state.streams.clone();
        let client = serve(state).await;

        let opened = client.open_session(&OpenSessionReq::default()).await.unwrap();
        let mut closing = client.subscribe_proposals(&opened).await.unwrap();
        let mut kept = client
            .subscribe_proposals(&SessionId::from("s1"))
            .await
            .unwrap();
        assert_eq!(streams.len(), 2);

        client.close_session(&opened).await.unwrap();
        assert_eq!(streams.len(), 1);
        assert_ended(&mut closing).await;

        assert!(matches!(
            client.subscribe_proposals(&opened).await,
            Err(ClientError::WebSocket(_))
        ));
        assert!(matches!(
            client.close_session(&opened).await,
            Err(ClientError::Rejected(_))
        ));

        // the other session's stream still delivers
        eventually(|| session.has_proposal_subscriber()).await;
        assert!(
            session
                .propose(ProposalEvent {
                    proposal_id: "p2".to_owned(),
                    opening_balances: BalInfo::default(),
                    challenge_duration: Duration::from_secs(5),
                    expiry: time::OffsetDateTime::UNIX_EPOCH,
                })
                .await
        );
        let Some(Ok(Notification::Proposal(notif))) = kept.next().await else {
            panic!("expected a proposal notification");
        };
        assert_eq!(notif.proposal_id, "p2");
    }
}
