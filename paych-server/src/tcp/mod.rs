//! Raw multiplexed transport.
//!
//! One TCP connection carries length-prefixed JSON frames in both
//! directions (see `paych_sdk::codec`). Every request runs in its own task;
//! watch requests are routed per channel on the read loop (see
//! [`paych_core::routes`]). All raw requests act on one session chosen at
//! startup.

mod connection;

use std::sync::Arc;

use paych_core::config::SharedConfig;
use paych_core::handlers::RequestHandler;
use paych_core::subscriptions::Subscriptions;
use paych_sdk::objects::SessionId;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::shutdown::shutdown_requested;

/// What every raw connection shares.
pub struct RawServer {
    subscriptions: Arc<Subscriptions>,
    handler: RequestHandler,
    session: SessionId,
    config: SharedConfig,
}

impl RawServer {
    pub fn new(subscriptions: Arc<Subscriptions>, session: SessionId, config: SharedConfig) -> Self {
        Self {
            handler: RequestHandler::new(subscriptions.clone()),
            subscriptions,
            session,
            config,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }
}

/// Accept raw connections until `shutdown` fires.
pub async fn serve(listener: TcpListener, server: Arc<RawServer>, shutdown: watch::Receiver<bool>) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!(session = %server.session, "Raw transport listening on {}", addr),
        Err(e) => tracing::warn!(error = %e, "Raw transport listening on an unknown address"),
    }

    let mut stop = shutdown.clone();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut stop) => {
                tracing::info!("Raw transport stopped accepting connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    tokio::spawn(connection::run(stream, peer, server.clone(), shutdown.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept raw connection");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use paych_core::memory::{MemoryNode, MemorySession};
    use paych_sdk::client::{ClientError, RawClient};
    use paych_sdk::codec::{FrameError, read_frame, write_frame};
    use paych_sdk::objects::{
        AckResp, AdjudicatorNotif, AdjudicatorReq, Allocation, ApiMessage, ChannelId, Envelope,
        ErrorCode, FundReq, HexBytes, Params, ProgressReq, RegisterReq, StartWatchingLedgerChannelReq,
        StartWatchingLedgerChannelResp, State, StopWatchingReq, WithdrawReq,
    };
    use rust_decimal::Decimal;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use super::*;

    const AB: ChannelId = ChannelId([0xab; 32]);
    const CD: ChannelId = ChannelId([0xcd; 32]);

    struct Harness {
        session: Arc<MemorySession>,
        addr: SocketAddr,
        config: SharedConfig,
        _shutdown: watch::Sender<bool>,
    }

    async fn start() -> Harness {
        let node = MemoryNode::new();
        let session = node.insert_session("raw".into());
        let config = SharedConfig::new(Default::default());
        let server = Arc::new(RawServer::new(
            Arc::new(Subscriptions::new(node)),
            "raw".into(),
            config.clone(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = watch::channel(false);
        tokio::spawn(serve(listener, server, rx));
        Harness {
            session,
            addr,
            config,
            _shutdown: shutdown,
        }
    }

    fn params() -> Params {
        Params {
            challenge_duration: 60,
            parts: vec![HexBytes(vec![1; 20]), HexBytes(vec![2; 20])],
            app: None,
            nonce: "1".to_owned(),
            ledger_channel: true,
            virtual_channel: false,
        }
    }

    fn state(channel: ChannelId, version: u64) -> State {
        State {
            id: channel,
            version,
            app: None,
            allocation: Allocation {
                assets: vec![HexBytes(vec![0xaa; 20])],
                balances: vec![vec![Decimal::new(5, 0), Decimal::new(5, 0)]],
                locked: vec![],
            },
            data: HexBytes::default(),
            is_final: false,
        }
    }

    fn watch_req(channel: ChannelId, version: u64) -> StartWatchingLedgerChannelReq {
        StartWatchingLedgerChannelReq {
            // overridden by the server's session
            session_id: "whatever".into(),
            params: params(),
            state: state(channel, version),
            sigs: vec![HexBytes(vec![9; 65])],
        }
    }

    fn adj_req(channel: ChannelId, version: u64) -> AdjudicatorReq {
        let signed = watch_req(channel, version).signed_state();
        AdjudicatorReq {
            params: signed.params.clone(),
            tx: signed.transaction(),
            idx: 0,
            secondary: false,
        }
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

    fn versions(session: &MemorySession, channel: ChannelId) -> Vec<u64> {
        session
            .published(&channel)
            .iter()
            .map(|tx| tx.state.version)
            .collect()
    }

    #[tokio::test]
    async fn second_start_for_a_channel_is_published_to_the_running_watch() {
        let h = start().await;
        let mut client = RawClient::connect(h.addr).await.unwrap();

        client.watch(watch_req(AB, 1)).await.unwrap();
        client.watch(watch_req(AB, 2)).await.unwrap();
        client.watch(watch_req(AB, 3)).await.unwrap();

        eventually(|| versions(&h.session, AB) == vec![2, 3]).await;
        assert_eq!(h.session.watched_state(&AB).unwrap().state.version, 1);
    }

    #[tokio::test]
    async fn different_channels_get_their_own_watches() {
        let h = start().await;
        let mut client = RawClient::connect(h.addr).await.unwrap();

        client.watch(watch_req(AB, 1)).await.unwrap();
        client.watch(watch_req(CD, 1)).await.unwrap();
        eventually(|| h.session.is_watching(&AB) && h.session.is_watching(&CD)).await;
        assert!(versions(&h.session, AB).is_empty());
        assert!(versions(&h.session, CD).is_empty());
    }

    #[tokio::test]
    async fn watch_events_come_back_on_the_connection() {
        let h = start().await;
        let mut client = RawClient::connect(h.addr).await.unwrap();

        let watch_id = client.watch(watch_req(AB, 1)).await.unwrap();
        eventually(|| h.session.is_watching(&AB)).await;

        client
            .register(RegisterReq {
                session_id: "ignored".into(),
                adj_req: adj_req(AB, 1),
                signed_states: vec![],
            })
            .await
            .unwrap();
        let resp = tokio::time::timeout(Duration::from_secs(5), client.next_watch_event(AB))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            resp.event,
            Some(AdjudicatorNotif::Registered { version: 1, .. })
        ));

        client
            .withdraw(WithdrawReq {
                session_id: "ignored".into(),
                adj_req: adj_req(AB, 1),
                state_map: vec![],
            })
            .await
            .unwrap();
        let env = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let env = client.recv().await.unwrap();
                if matches!(env.message, ApiMessage::StartWatchingLedgerChannelResp(_)) {
                    return env;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(env.request_id, Some(watch_id));
        assert!(matches!(
            env.message,
            ApiMessage::StartWatchingLedgerChannelResp(StartWatchingLedgerChannelResp {
                event: Some(AdjudicatorNotif::Concluded { .. }),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn progress_reaches_the_watch_as_progressed() {
        let h = start().await;
        let mut client = RawClient::connect(h.addr).await.unwrap();

        client.watch(watch_req(AB, 1)).await.unwrap();
        eventually(|| h.session.is_watching(&AB)).await;

        client
            .progress(ProgressReq {
                session_id: "ignored".into(),
                adj_req: adj_req(AB, 1),
                new_state: state(AB, 2),
                sig: HexBytes(vec![4; 65]),
            })
            .await
            .unwrap();
        let resp = tokio::time::timeout(Duration::from_secs(5), client.next_watch_event(AB))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            resp.event,
            Some(AdjudicatorNotif::Progressed { version: 2, idx: 0, .. })
        ));

        let stale = client
            .progress(ProgressReq {
                session_id: "ignored".into(),
                adj_req: adj_req(AB, 2),
                new_state: state(AB, 2),
                sig: HexBytes::default(),
            })
            .await;
        assert!(matches!(
            stale,
            Err(ClientError::Rejected(e)) if e.code == ErrorCode::InvalidArgument
        ));
    }

    #[tokio::test]
    async fn stop_watching_evicts_the_route_so_the_next_start_is_fresh() {
        let h = start().await;
        let mut client = RawClient::connect(h.addr).await.unwrap();

        client.watch(watch_req(AB, 1)).await.unwrap();
        eventually(|| h.session.is_watching(&AB)).await;
        client
            .stop_watching(StopWatchingReq {
                session_id: "ignored".into(),
                ch_id: AB,
            })
            .await
            .unwrap();
        assert!(!h.session.is_watching(&AB));

        client.watch(watch_req(AB, 5)).await.unwrap();
        eventually(|| h.session.is_watching(&AB)).await;
        assert_eq!(h.session.watched_state(&AB).unwrap().state.version, 5);
    }

    #[tokio::test]
    async fn kept_route_after_stop_fails_the_old_watch_and_reroutes() {
        let h = start().await;
        let mut runtime = h.config.snapshot();
        runtime.evict_routes_on_stop = false;
        h.config.update(runtime);
        let mut client = RawClient::connect(h.addr).await.unwrap();

        client.watch(watch_req(AB, 1)).await.unwrap();
        eventually(|| h.session.is_watching(&AB)).await;
        client
            .stop_watching(StopWatchingReq {
                session_id: "ignored".into(),
                ch_id: AB,
            })
            .await
            .unwrap();

        // goes to the stale handler, whose publish fails and ends it
        client.watch(watch_req(AB, 2)).await.unwrap();
        let resp = tokio::time::timeout(Duration::from_secs(5), client.next_watch_event(AB))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.error.unwrap().code, ErrorCode::FailedPreCondition);

        client.watch(watch_req(AB, 3)).await.unwrap();
        eventually(|| h.session.is_watching(&AB)).await;
        assert_eq!(h.session.watched_state(&AB).unwrap().state.version, 3);
    }

    #[tokio::test]
    async fn fund_reply_echoes_the_request_id() {
        let h = start().await;
        let mut client = RawClient::connect(h.addr).await.unwrap();

        client
            .fund(FundReq {
                session_id: "ignored".into(),
                params: params(),
                state: state(AB, 0),
                idx: 0,
            })
            .await
            .unwrap();
        assert_eq!(h.session.funded(), vec![(AB, 0)]);

        let err = client
            .fund(FundReq {
                session_id: "ignored".into(),
                params: params(),
                state: state(AB, 0),
                idx: 9,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected(e) if e.code == ErrorCode::InvalidArgument));
    }

    #[tokio::test]
    async fn stop_watching_an_unwatched_channel_is_rejected() {
        let h = start().await;
        let mut client = RawClient::connect(h.addr).await.unwrap();
        let err = client
            .stop_watching(StopWatchingReq {
                session_id: "ignored".into(),
                ch_id: CD,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected(e) if e.code == ErrorCode::ResourceNotFound));
    }

    async fn expect_closed(stream: &mut TcpStream) {
        let read = tokio::time::timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .unwrap();
        assert!(matches!(
            read,
            Err(FrameError::Closed) | Err(FrameError::Io(_))
        ));
    }

    #[tokio::test]
    async fn undecodable_payload_closes_the_connection() {
        let h = start().await;
        let mut stream = TcpStream::connect(h.addr).await.unwrap();
        write_frame(&mut stream, b"{not json").await.unwrap();
        expect_closed(&mut stream).await;
    }

    #[tokio::test]
    async fn response_kind_from_a_client_closes_the_connection() {
        let h = start().await;
        let mut stream = TcpStream::connect(h.addr).await.unwrap();
        let env = Envelope::new(ApiMessage::FundResp(AckResp::ok()));
        write_frame(&mut stream, &env.to_vec().unwrap()).await.unwrap();
        expect_closed(&mut stream).await;
    }

    #[tokio::test]
    async fn truncated_frame_ends_the_connection_without_dispatch() {
        let h = start().await;
        let mut stream = TcpStream::connect(h.addr).await.unwrap();
        // declares 100 bytes, sends 3, then half-closes
        stream.write_all(&[0, 100, b'{', b'"', b'x']).await.unwrap();
        stream.shutdown().await.unwrap();
        expect_closed(&mut stream).await;
        assert!(h.session.funded().is_empty());
    }

    #[tokio::test]
    async fn watch_left_by_a_closed_connection_can_be_stopped_and_restarted() {
        let h = start().await;
        let mut client = RawClient::connect(h.addr).await.unwrap();
        client.watch(watch_req(AB, 1)).await.unwrap();
        eventually(|| h.session.is_watching(&AB)).await;
        drop(client);

        // the engine keeps watching, so a plain restart is refused in-band
        let mut client = RawClient::connect(h.addr).await.unwrap();
        client.watch(watch_req(AB, 2)).await.unwrap();
        let resp = tokio::time::timeout(Duration::from_secs(5), client.next_watch_event(AB))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.error.unwrap().code, ErrorCode::ResourceExists);

        client
            .stop_watching(StopWatchingReq {
                session_id: "ignored".into(),
                ch_id: AB,
            })
            .await
            .unwrap();
        client.watch(watch_req(AB, 3)).await.unwrap();
        eventually(|| h.session.watched_state(&AB).is_some_and(|s| s.state.version == 3)).await;
    }
}
