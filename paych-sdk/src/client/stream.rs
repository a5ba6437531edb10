//! Client for the streaming HTTP/WebSocket transport.

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{ClientError, parse_response};
use crate::objects::{
    AckResp, ChannelId, FundReq, Notification, OpenSessionReq, OpenSessionResp, ProgressReq,
    RegisterReq, SessionId, StartWatchingLedgerChannelReq, StartWatchingLedgerChannelResp,
    WithdrawReq,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Typed client for the streaming transport.
///
/// Subscribe calls return a stream that stays open until the matching
/// unsubscribe call is made (from this or any other client), the source
/// ends, or either side disconnects.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: Client,
    base_url: Url,
}

impl StreamClient {
    /// `base_url` is the root of the server, e.g. `http://127.0.0.1:50051`.
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    fn url(&self, session: &SessionId, path: &str) -> Result<Url, ClientError> {
        let session = urlencoding::encode(session.as_str());
        Ok(self
            .base_url
            .join(&format!("/api/v1/sessions/{session}{path}"))?)
    }

    fn ws_url(&self, session: &SessionId, path: &str) -> Result<Url, ClientError> {
        let mut url = self.url(session, path)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ClientError::Scheme(other.to_owned())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Scheme(scheme.to_owned()))?;
        Ok(url)
    }

    async fn open(&self, url: Url) -> Result<Socket, ClientError> {
        let (socket, _) = connect_async(url.as_str()).await?;
        Ok(socket)
    }

    async fn delete(&self, url: Url) -> Result<(), ClientError> {
        let resp = self.http.delete(url).send().await?;
        let ack: AckResp = parse_response(resp).await?;
        ack.into_result().map_err(ClientError::Rejected)
    }

    async fn post<T: serde::Serialize>(&self, url: Url, body: &T) -> Result<(), ClientError> {
        let resp = self.http.post(url).json(body).send().await?;
        let ack: AckResp = parse_response(resp).await?;
        ack.into_result().map_err(ClientError::Rejected)
    }

    /// `POST /api/v1/sessions`
    pub async fn open_session(&self, req: &OpenSessionReq) -> Result<SessionId, ClientError> {
        let url = self.base_url.join("/api/v1/sessions")?;
        let resp = self.http.post(url).json(req).send().await?;
        let opened: OpenSessionResp = parse_response(resp).await?;
        opened.into_result().map_err(ClientError::Rejected)
    }

    /// `DELETE /api/v1/sessions/{session}`
    ///
    /// Every stream still open on the session ends.
    pub async fn close_session(&self, session: &SessionId) -> Result<(), ClientError> {
        self.delete(self.url(session, "")?).await
    }

    /// `GET /api/v1/sessions/{session}/proposals/ws`
    pub async fn subscribe_proposals(
        &self,
        session: &SessionId,
    ) -> Result<NotificationStream, ClientError> {
        let socket = self.open(self.ws_url(session, "/proposals/ws")?).await?;
        Ok(NotificationStream { socket })
    }

    /// `DELETE /api/v1/sessions/{session}/proposals`
    pub async fn unsubscribe_proposals(&self, session: &SessionId) -> Result<(), ClientError> {
        self.delete(self.url(session, "/proposals")?).await
    }

    /// `GET /api/v1/sessions/{session}/channels/{ch_id}/updates/ws`
    pub async fn subscribe_updates(
        &self,
        session: &SessionId,
        channel: ChannelId,
    ) -> Result<NotificationStream, ClientError> {
        let url = self.ws_url(session, &format!("/channels/{channel}/updates/ws"))?;
        Ok(NotificationStream {
            socket: self.open(url).await?,
        })
    }

    /// `DELETE /api/v1/sessions/{session}/channels/{ch_id}/updates`
    pub async fn unsubscribe_updates(
        &self,
        session: &SessionId,
        channel: ChannelId,
    ) -> Result<(), ClientError> {
        self.delete(self.url(session, &format!("/channels/{channel}/updates"))?)
            .await
    }

    /// `GET /api/v1/sessions/{session}/channels/{ch_id}/adjudicator/ws`
    pub async fn subscribe_adjudicator(
        &self,
        session: &SessionId,
        channel: ChannelId,
    ) -> Result<NotificationStream, ClientError> {
        let url = self.ws_url(session, &format!("/channels/{channel}/adjudicator/ws"))?;
        Ok(NotificationStream {
            socket: self.open(url).await?,
        })
    }

    /// `DELETE /api/v1/sessions/{session}/channels/{ch_id}/adjudicator`
    pub async fn unsubscribe_adjudicator(
        &self,
        session: &SessionId,
        channel: ChannelId,
    ) -> Result<(), ClientError> {
        self.delete(self.url(session, &format!("/channels/{channel}/adjudicator"))?)
            .await
    }

    /// `GET /api/v1/sessions/{session}/watch/ws`
    ///
    /// Sends `req` as the initial state; later states go through
    /// [`WatchStream::publish`].
    pub async fn watch(
        &self,
        session: &SessionId,
        req: &StartWatchingLedgerChannelReq,
    ) -> Result<WatchStream, ClientError> {
        let mut socket = self.open(self.ws_url(session, "/watch/ws")?).await?;
        socket
            .send(Message::Text(serde_json::to_string(req)?.into()))
            .await?;
        Ok(WatchStream { socket })
    }

    /// `POST /api/v1/sessions/{session}/channels/{ch_id}/stop-watching`
    pub async fn stop_watching(
        &self,
        session: &SessionId,
        channel: ChannelId,
    ) -> Result<(), ClientError> {
        let url = self.url(session, &format!("/channels/{channel}/stop-watching"))?;
        let resp = self.http.post(url).send().await?;
        let ack: AckResp = parse_response(resp).await?;
        ack.into_result().map_err(ClientError::Rejected)
    }

    /// `POST /api/v1/sessions/{session}/fund`
    pub async fn fund(&self, req: &FundReq) -> Result<(), ClientError> {
        self.post(self.url(&req.session_id, "/fund")?, req).await
    }

    /// `POST /api/v1/sessions/{session}/register`
    pub async fn register(&self, req: &RegisterReq) -> Result<(), ClientError> {
        self.post(self.url(&req.session_id, "/register")?, req).await
    }

    /// `POST /api/v1/sessions/{session}/progress`
    pub async fn progress(&self, req: &ProgressReq) -> Result<(), ClientError> {
        self.post(self.url(&req.session_id, "/progress")?, req).await
    }

    /// `POST /api/v1/sessions/{session}/withdraw`
    pub async fn withdraw(&self, req: &WithdrawReq) -> Result<(), ClientError> {
        self.post(self.url(&req.session_id, "/withdraw")?, req).await
    }
}

/// Next JSON text frame, skipping control frames. `None` once closed.
async fn next_text(socket: &mut Socket) -> Option<Result<String, ClientError>> {
    loop {
        match socket.next().await? {
            Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => return Some(Err(e.into())),
        }
    }
}

/// Server-push stream of a subscription.
pub struct NotificationStream {
    socket: Socket,
}

impl NotificationStream {
    /// Next notification; `None` once the server ended the subscription.
    pub async fn next(&mut self) -> Option<Result<Notification, ClientError>> {
        let text = next_text(&mut self.socket).await?;
        Some(text.and_then(|t| serde_json::from_str(&t).map_err(ClientError::from)))
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.socket.close(None).await?;
        Ok(())
    }
}

/// Bidirectional stream of a ledger channel watch.
pub struct WatchStream {
    socket: Socket,
}

impl WatchStream {
    /// Hand a newer state to the watcher.
    pub async fn publish(&mut self, req: &StartWatchingLedgerChannelReq) -> Result<(), ClientError> {
        self.socket
            .send(Message::Text(serde_json::to_string(req)?.into()))
            .await?;
        Ok(())
    }

    /// Next adjudicator event; `None` once the watch ended.
    pub async fn next(&mut self) -> Option<Result<StartWatchingLedgerChannelResp, ClientError>> {
        let text = next_text(&mut self.socket).await?;
        Some(text.and_then(|t| serde_json::from_str(&t).map_err(ClientError::from)))
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.socket.close(None).await?;
        Ok(())
    }
}
