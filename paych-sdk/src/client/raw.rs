//! Client for the raw multiplexed transport.

use std::collections::VecDeque;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use super::ClientError;
use crate::codec::{read_envelope, write_envelope};
use crate::objects::{
    AckResp, ApiMessage, ChannelId, Envelope, FundReq, ProgressReq, RegisterReq,
    StartWatchingLedgerChannelReq, StartWatchingLedgerChannelResp, StopWatchingReq, WithdrawReq,
};

/// One persistent connection to the raw transport.
///
/// Every request is tagged with a fresh `request_id`. Messages that arrive
/// while waiting for a particular reply (typically watch events) are kept
/// and handed out by [`RawClient::recv`] and
/// [`RawClient::next_watch_event`].
pub struct RawClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    next_id: u64,
    backlog: VecDeque<Envelope>,
}

impl RawClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(crate::codec::FrameError::from)?;
        stream.set_nodelay(true).map_err(crate::codec::FrameError::from)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            next_id: 1,
            backlog: VecDeque::new(),
        })
    }

    /// Send one message and return the request id it was tagged with.
    pub async fn send(&mut self, message: ApiMessage) -> Result<u64, ClientError> {
        let id = self.next_id;
        self.next_id += 1;
        write_envelope(&mut self.writer, &Envelope::reply(Some(id), message)).await?;
        Ok(id)
    }

    /// Next message from the server, oldest buffered one first.
    pub async fn recv(&mut self) -> Result<Envelope, ClientError> {
        if let Some(env) = self.backlog.pop_front() {
            return Ok(env);
        }
        Ok(read_envelope(&mut self.reader).await?)
    }

    async fn call(&mut self, message: ApiMessage) -> Result<ApiMessage, ClientError> {
        let id = self.send(message).await?;
        loop {
            let env = read_envelope(&mut self.reader).await?;
            if env.request_id == Some(id) {
                return Ok(env.message);
            }
            self.backlog.push_back(env);
        }
    }

    pub async fn fund(&mut self, req: FundReq) -> Result<(), ClientError> {
        match self.call(ApiMessage::FundReq(req)).await? {
            ApiMessage::FundResp(resp) => ack(resp),
            _ => Err(ClientError::UnexpectedReply("expected fund_resp")),
        }
    }

    pub async fn register(&mut self, req: RegisterReq) -> Result<(), ClientError> {
        match self.call(ApiMessage::RegisterReq(req)).await? {
            ApiMessage::RegisterResp(resp) => ack(resp),
            _ => Err(ClientError::UnexpectedReply("expected register_resp")),
        }
    }

    pub async fn progress(&mut self, req: ProgressReq) -> Result<(), ClientError> {
        match self.call(ApiMessage::ProgressReq(req)).await? {
            ApiMessage::ProgressResp(resp) => ack(resp),
            _ => Err(ClientError::UnexpectedReply("expected progress_resp")),
        }
    }

    pub async fn withdraw(&mut self, req: WithdrawReq) -> Result<(), ClientError> {
        match self.call(ApiMessage::WithdrawReq(req)).await? {
            ApiMessage::WithdrawResp(resp) => ack(resp),
            _ => Err(ClientError::UnexpectedReply("expected withdraw_resp")),
        }
    }

    pub async fn stop_watching(&mut self, req: StopWatchingReq) -> Result<(), ClientError> {
        match self.call(ApiMessage::StopWatchingReq(req)).await? {
            ApiMessage::StopWatchingResp(resp) => ack(resp),
            _ => Err(ClientError::UnexpectedReply("expected stop_watching_resp")),
        }
    }

    /// Start watching a channel, or publish a newer state if this
    /// connection already watches it.
    pub async fn watch(&mut self, req: StartWatchingLedgerChannelReq) -> Result<u64, ClientError> {
        self.send(ApiMessage::StartWatchingLedgerChannelReq(req)).await
    }

    /// Next watch event for `channel`, buffering anything else.
    pub async fn next_watch_event(
        &mut self,
        channel: ChannelId,
    ) -> Result<StartWatchingLedgerChannelResp, ClientError> {
        let is_match = |env: &Envelope| {
            matches!(
                &env.message,
                ApiMessage::StartWatchingLedgerChannelResp(resp)
                    if resp.event.as_ref().is_none_or(|e| e.channel_id() == channel)
            )
        };

        if let Some(pos) = self.backlog.iter().position(is_match) {
            if let Some(Envelope {
                message: ApiMessage::StartWatchingLedgerChannelResp(resp),
                ..
            }) = self.backlog.remove(pos)
            {
                return Ok(resp);
            }
        }
        loop {
            let env = read_envelope(&mut self.reader).await?;
            if is_match(&env) {
                if let ApiMessage::StartWatchingLedgerChannelResp(resp) = env.message {
                    return Ok(resp);
                }
            }
            self.backlog.push_back(env);
        }
    }
}

fn ack(resp: AckResp) -> Result<(), ClientError> {
    resp.into_result().map_err(ClientError::Rejected)
}
