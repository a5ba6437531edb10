//! Unary request handlers shared by both transports.
//!
//! Failures never escape as `Err`: they are logged and reported in the
//! response's error field, so a transport can always answer.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use kanau::processor::Processor;
use paych_sdk::objects::{
    AckResp, CloseSessionReq, CloseSessionResp, FundReq, FundResp, OpenSessionReq,
    OpenSessionResp, ProgressReq, ProgressResp, RegisterReq, RegisterResp, StopWatchingReq,
    StopWatchingResp, WithdrawReq, WithdrawResp,
};
use tracing::{error, info};

use crate::engine::{FundingReq, ProgressionReq};
use crate::error::Error;
use crate::subscriptions::Subscriptions;

#[derive(Clone)]
pub struct RequestHandler {
    subscriptions: Arc<Subscriptions>,
}

impl RequestHandler {
    pub fn new(subscriptions: Arc<Subscriptions>) -> Self {
        Self { subscriptions }
    }

    fn respond(op: &'static str, result: Result<(), Error>) -> AckResp {
        match result {
            Ok(()) => {
                info!(op, "Request succeeded");
                AckResp::ok()
            }
            Err(e) => {
                error!(op, error = %e, "Request failed");
                AckResp::from_result(Err(e))
            }
        }
    }
}

impl Processor<FundReq> for RequestHandler {
    type Output = FundResp;
    type Error = Infallible;

    #[tracing::instrument(skip_all, name = "Handler:Fund", fields(session = %req.session_id, channel = %req.state.id))]
    async fn process(&self, req: FundReq) -> Result<FundResp, Infallible> {
        let result = async {
            let session = self.subscriptions.session(&req.session_id)?;
            let funding = FundingReq {
                params: req.params,
                state: req.state,
                idx: req.idx,
            };
            Error::context("fund", session.fund(funding).await)
        }
        .await;
        Ok(Self::respond("fund", result))
    }
}

impl Processor<RegisterReq> for RequestHandler {
    type Output = RegisterResp;
    type Error = Infallible;

    #[tracing::instrument(skip_all, name = "Handler:Register", fields(session = %req.session_id, channel = %req.adj_req.tx.state.id))]
    async fn process(&self, req: RegisterReq) -> Result<RegisterResp, Infallible> {
        let result = async {
            let session = self.subscriptions.session(&req.session_id)?;
            Error::context(
                "register",
                session.register(req.adj_req, req.signed_states).await,
            )
        }
        .await;
        Ok(Self::respond("register", result))
    }
}

impl Processor<WithdrawReq> for RequestHandler {
    type Output = WithdrawResp;
    type Error = Infallible;

    #[tracing::instrument(skip_all, name = "Handler:Withdraw", fields(session = %req.session_id, channel = %req.adj_req.tx.state.id))]
    async fn process(&self, req: WithdrawReq) -> Result<WithdrawResp, Infallible> {
        let result = async {
            let session = self.subscriptions.session(&req.session_id)?;
            Error::context("withdraw", session.withdraw(req.adj_req, req.state_map).await)
        }
        .await;
        Ok(Self::respond("withdraw", result))
    }
}

impl Processor<ProgressReq> for RequestHandler {
    type Output = ProgressResp;
    type Error = Infallible;

    #[tracing::instrument(skip_all, name = "Handler:Progress", fields(session = %req.session_id, channel = %req.adj_req.tx.state.id, version = req.new_state.version))]
    async fn process(&self, req: ProgressReq) -> Result<ProgressResp, Infallible> {
        let result = async {
            let session = self.subscriptions.session(&req.session_id)?;
            let progression = ProgressionReq {
                adj_req: req.adj_req,
                new_state: req.new_state,
                sig: req.sig,
            };
            Error::context("progress", session.progress(progression).await)
        }
        .await;
        Ok(Self::respond("progress", result))
    }
}

impl Processor<OpenSessionReq> for RequestHandler {
    type Output = OpenSessionResp;
    type Error = Infallible;

    #[tracing::instrument(skip_all, name = "Handler:OpenSession")]
    async fn process(&self, req: OpenSessionReq) -> Result<OpenSessionResp, Infallible> {
        let result = self
            .subscriptions
            .open_session(req.config_file.as_deref().map(Path::new))
            .await;
        if let Err(e) = &result {
            error!(op = "open session", error = %e, "Request failed");
        }
        Ok(OpenSessionResp::from_result(result))
    }
}

impl Processor<CloseSessionReq> for RequestHandler {
    type Output = CloseSessionResp;
    type Error = Infallible;

    #[tracing::instrument(skip_all, name = "Handler:CloseSession", fields(session = %req.session_id))]
    async fn process(&self, req: CloseSessionReq) -> Result<CloseSessionResp, Infallible> {
        let result = self.subscriptions.end_session(&req.session_id).await;
        Ok(Self::respond("close session", result))
    }
}

impl Processor<StopWatchingReq> for RequestHandler {
    type Output = StopWatchingResp;
    type Error = Infallible;

    #[tracing::instrument(skip_all, name = "Handler:StopWatching", fields(session = %req.session_id, channel = %req.ch_id))]
    async fn process(&self, req: StopWatchingReq) -> Result<StopWatchingResp, Infallible> {
        let result = self
            .subscriptions
            .stop_watching(&req.session_id, req.ch_id)
            .await;
        Ok(Self::respond("stop watching", result))
    }
}

#[cfg(test)]
mod tests {
    use paych_sdk::objects::{AdjudicatorReq, ChannelId, ErrorCode, HexBytes, SessionId};

    use super::*;
    use crate::engine::NodeApi;
    use crate::memory::MemoryNode;
    use crate::memory::fixtures::signed_state;

    async fn setup() -> (Arc<MemoryNode>, SessionId, RequestHandler) {
        let node = MemoryNode::new();
        let session = node.open_session(None).await.unwrap();
        let handler = RequestHandler::new(Arc::new(Subscriptions::new(node.clone())));
        (node, session, handler)
    }

    fn fund_req(session_id: SessionId, channel: ChannelId, idx: u16) -> FundReq {
        let signed = signed_state(channel, 0);
        FundReq {
            session_id,
            params: signed.params,
            state: signed.state,
            idx,
        }
    }

    #[tokio::test]
    async fn fund_is_acknowledged_and_reaches_the_engine() {
        let (node, session, handler) = setup().await;
        let ch = ChannelId([3; 32]);

        let resp = handler.process(fund_req(session.clone(), ch, 1)).await.unwrap();
        assert_eq!(resp, AckResp::ok());
        assert_eq!(node.memory_session(&session).unwrap().funded(), vec![(ch, 1)]);
    }

    #[tokio::test]
    async fn engine_errors_are_reported_in_the_response() {
        let (_node, session, handler) = setup().await;

        let resp = handler
            .process(fund_req(session, ChannelId([3; 32]), 7))
            .await
            .unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, ErrorCode::InvalidArgument);
        assert!(error.message.starts_with("fund"), "{}", error.message);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (_node, _session, handler) = setup().await;

        let resp = handler
            .process(fund_req("missing".into(), ChannelId([3; 32]), 0))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn progress_is_acknowledged() {
        let (_node, session, handler) = setup().await;
        let ch = ChannelId([5; 32]);
        let registered = signed_state(ch, 1);

        let resp = handler
            .process(ProgressReq {
                session_id: session,
                adj_req: AdjudicatorReq {
                    params: registered.params.clone(),
                    tx: registered.transaction(),
                    idx: 0,
                    secondary: false,
                },
                new_state: signed_state(ch, 2).state,
                sig: HexBytes(vec![1; 65]),
            })
            .await
            .unwrap();
        assert_eq!(resp, AckResp::ok());
    }

    #[tokio::test]
    async fn sessions_open_and_close_through_the_handler() {
        let (node, _session, handler) = setup().await;

        let opened = handler
            .process(OpenSessionReq::default())
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert!(node.memory_session(&opened).is_some());

        let closed = handler
            .process(CloseSessionReq {
                session_id: opened.clone(),
            })
            .await
            .unwrap();
        assert_eq!(closed, AckResp::ok());
        assert!(node.memory_session(&opened).is_none());

        let again = handler
            .process(CloseSessionReq { session_id: opened })
            .await
            .unwrap();
        assert_eq!(again.error.unwrap().code, ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn stopping_an_unwatched_channel_is_not_found() {
        let (_node, session, handler) = setup().await;

        let resp = handler
            .process(StopWatchingReq {
                session_id: session,
                ch_id: ChannelId([4; 32]),
            })
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, ErrorCode::ResourceNotFound);
    }
}
