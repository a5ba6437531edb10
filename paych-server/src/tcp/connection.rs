//! One raw-transport connection.
//!
//! The read loop decodes one envelope per frame and dispatches it. Unary
//! requests are handled in their own tasks. Watch requests are routed on the
//! read loop itself so that starts and publishes for a channel keep their
//! arrival order; the watch handler then runs in its own task. Every write
//! goes through one lock shared by all tasks of the connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use kanau::processor::Processor;
use paych_core::config::RuntimeConfig;
use paych_core::error::Error;
use paych_core::routes::{PublishQueue, RouteTable, Routing};
use paych_core::sink::{DeliveryError, NotificationSink};
use paych_core::watching::watch_ledger_channel;
use paych_sdk::codec::{FrameError, read_envelope, write_envelope};
use paych_sdk::objects::{
    ApiMessage, Envelope, Notification, StartWatchingLedgerChannelReq,
    StartWatchingLedgerChannelResp,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, watch};

use super::RawServer;
use crate::shutdown::shutdown_requested;

type Writer = Arc<Mutex<OwnedWriteHalf>>;

async fn write(writer: &Writer, envelope: &Envelope) -> Result<(), FrameError> {
    let mut writer = writer.lock().await;
    write_envelope(&mut *writer, envelope).await
}

struct Connection {
    server: Arc<RawServer>,
    peer: SocketAddr,
    writer: Writer,
    routes: RouteTable<StartWatchingLedgerChannelReq>,
    config: RuntimeConfig,
}

pub(super) async fn run(
    stream: TcpStream,
    peer: SocketAddr,
    server: Arc<RawServer>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, writer) = stream.into_split();
    let config = server.config.snapshot();
    let conn = Arc::new(Connection {
        routes: RouteTable::new(config.publish_queue_capacity),
        server,
        peer,
        writer: Arc::new(Mutex::new(writer)),
        config,
    });
    tracing::debug!(%peer, "Raw connection opened");

    let result = loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break Ok(()),
            envelope = read_envelope(&mut reader) => envelope,
        };
        match envelope {
            Ok(envelope) => {
                if let Err(e) = conn.dispatch(envelope).await {
                    break Err(e);
                }
            }
            Err(FrameError::Closed) => break Ok(()),
            Err(e) => break Err(Error::Transport(e)),
        }
    };

    match result {
        Ok(()) => tracing::debug!(%peer, "Raw connection closed"),
        Err(e) => tracing::warn!(%peer, error = %e, "Closing raw connection"),
    }

    // End every watch handler's feed; their forwarding is released as they exit.
    let routes = conn.routes.clear();
    if routes > 0 {
        tracing::debug!(%peer, routes, "Dropped connection routes");
    }
    if let Err(e) = conn.writer.lock().await.shutdown().await {
        tracing::debug!(%peer, error = %e, "Failed to shut down raw connection");
    }
}

impl Connection {
    /// Act on one envelope. Errors are protocol violations that close the
    /// connection.
    async fn dispatch(self: &Arc<Self>, envelope: Envelope) -> Result<(), Error> {
        let Envelope {
            request_id,
            message,
        } = envelope;
        let session = self.server.session().clone();

        match message {
            ApiMessage::FundReq(mut req) => {
                req.session_id = session;
                let handler = self.server.handler.clone();
                self.spawn_reply(request_id, async move {
                    ApiMessage::FundResp(handler.process(req).await.unwrap_or_else(|e| match e {}))
                });
            }
            ApiMessage::RegisterReq(mut req) => {
                req.session_id = session;
                let handler = self.server.handler.clone();
                self.spawn_reply(request_id, async move {
                    ApiMessage::RegisterResp(
                        handler.process(req).await.unwrap_or_else(|e| match e {}),
                    )
                });
            }
            ApiMessage::WithdrawReq(mut req) => {
                req.session_id = session;
                let handler = self.server.handler.clone();
                self.spawn_reply(request_id, async move {
                    ApiMessage::WithdrawResp(
                        handler.process(req).await.unwrap_or_else(|e| match e {}),
                    )
                });
            }
            ApiMessage::ProgressReq(mut req) => {
                req.session_id = session;
                let handler = self.server.handler.clone();
                self.spawn_reply(request_id, async move {
                    ApiMessage::ProgressResp(
                        handler.process(req).await.unwrap_or_else(|e| match e {}),
                    )
                });
            }
            ApiMessage::StopWatchingReq(mut req) => {
                req.session_id = session;
                let channel = req.ch_id;
                let conn = Arc::clone(self);
                self.spawn_reply(request_id, async move {
                    let resp = conn
                        .server
                        .handler
                        .process(req)
                        .await
                        .unwrap_or_else(|e| match e {});
                    if resp.error.is_none() && conn.config.evict_routes_on_stop {
                        conn.routes.evict(&channel);
                    }
                    ApiMessage::StopWatchingResp(resp)
                });
            }
            ApiMessage::StartWatchingLedgerChannelReq(mut req) => {
                req.session_id = session;
                let channel = req.channel_id();
                match self.routes.route(channel, req).await {
                    Routing::Start { first, queue } => {
                        tracing::debug!(peer = %self.peer, %channel, "Starting watch handler");
                        tokio::spawn(Arc::clone(self).run_watch(request_id, first, queue));
                    }
                    Routing::Published => {
                        tracing::trace!(peer = %self.peer, %channel, "Queued state for watch handler");
                    }
                }
            }
            other => return Err(Error::UnexpectedMessage(other.kind())),
        }
        Ok(())
    }

    /// Run `reply` in its own task and write its result back.
    fn spawn_reply<F>(&self, request_id: Option<u64>, reply: F)
    where
        F: Future<Output = ApiMessage> + Send + 'static,
    {
        let writer = self.writer.clone();
        let peer = self.peer;
        tokio::spawn(async move {
            let message = reply.await;
            let kind = message.kind();
            if let Err(e) = write(&writer, &Envelope::reply(request_id, message)).await {
                tracing::warn!(%peer, kind, error = %e, "Failed to write reply");
            }
        });
    }

    async fn run_watch(
        self: Arc<Self>,
        request_id: Option<u64>,
        first: StartWatchingLedgerChannelReq,
        queue: PublishQueue<StartWatchingLedgerChannelReq>,
    ) {
        let route = queue.route();
        let channel = queue.channel();
        let sink = Arc::new(ConnectionSink {
            writer: self.writer.clone(),
            request_id,
        });

        let result = watch_ledger_channel(
            &self.server.subscriptions,
            self.server.session(),
            first.signed_state(),
            sink,
            queue,
        )
        .await;
        self.routes.evict_route(&channel, route);

        if let Err(e) = result {
            tracing::error!(peer = %self.peer, %channel, error = %e, "Watch handler failed");
            let resp = StartWatchingLedgerChannelResp::failed(e.into());
            let envelope =
                Envelope::reply(request_id, ApiMessage::StartWatchingLedgerChannelResp(resp));
            if let Err(e) = write(&self.writer, &envelope).await {
                tracing::debug!(peer = %self.peer, %channel, error = %e, "Failed to report watch failure");
            }
        }
    }
}

/// Writes a watch's events to its connection, tagged with the request id
/// that started the watch.
struct ConnectionSink {
    writer: Writer,
    request_id: Option<u64>,
}

#[async_trait]
impl NotificationSink for ConnectionSink {
    async fn deliver(&self, notification: Notification) -> Result<(), DeliveryError> {
        let Some(resp) = StartWatchingLedgerChannelResp::from_notification(notification) else {
            return Ok(());
        };
        let envelope =
            Envelope::reply(self.request_id, ApiMessage::StartWatchingLedgerChannelResp(resp));
        write(&self.writer, &envelope)
            .await
            .map_err(|e| DeliveryError(Error::Transport(e).to_string()))
    }
}
