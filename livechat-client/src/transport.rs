//! Realtime transport: one authenticated websocket, pumped through channels.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ChatError, ChatResult};

/// What the remote half reports to the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The remote end acknowledged the connection
    Opened,
    /// One text frame, undecoded
    Frame(String),
    /// The connection ended; `reason` is the raw close reason, possibly empty
    Closed {
        /// Close reason sent by the server
        reason: String,
    },
}

/// Local half of a live connection.
///
/// Dropping or closing it stops the connection; closing twice is a no-op.
#[derive(Debug)]
pub struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown: CancellationToken,
}

/// Remote half of a [`Transport`], driven by a connector's pump task or by a test.
#[derive(Debug)]
pub struct TransportPeer {
    /// Delivers events to the local half
    pub events: mpsc::UnboundedSender<TransportEvent>,
    /// Frames queued by the local half
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Cancelled when the local half closes or is dropped
    pub shutdown: CancellationToken,
}

impl Transport {
    /// Creates a connected transport/peer pair.
    #[must_use]
    pub fn pair() -> (Self, TransportPeer) {
        let (outbound, sent) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        (
            Self {
                outbound,
                inbound,
                shutdown: shutdown.clone(),
            },
            TransportPeer {
                events,
                sent,
                shutdown,
            },
        )
    }

    /// Queues one text frame.
    ///
    /// # Errors
    /// Returns [`ChatError::Transport`] once the connection is closed.
    pub fn send(&self, text: String) -> ChatResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(ChatError::transport("connection is closed"));
        }
        self.outbound
            .send(text)
            .map_err(|_| ChatError::transport("connection is closed"))
    }

    /// Next event from the remote half; `None` once it is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Next already-delivered event, without waiting.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.inbound.try_recv().ok()
    }

    /// Signals the remote half to shut the connection down.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens realtime connections authenticated by a chat token.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection to `endpoint` authenticated by `token`.
    ///
    /// # Errors
    /// Returns [`ChatError::Transport`] when the connection cannot be opened.
    async fn connect(&self, endpoint: &Url, token: &str) -> ChatResult<Transport>;
}

/// Production connector presenting the token as the websocket subprotocol.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Connector that gives up on the handshake after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Url, token: &str) -> ChatResult<Transport> {
        let mut request = endpoint.as_str().into_client_request()?;
        let protocol = HeaderValue::from_str(token)
            .map_err(|err| ChatError::transport(format!("token is not a valid header: {err}")))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);

        info!(endpoint = %endpoint, "opening chat connection");
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                ChatError::transport(format!(
                    "connection timeout after {:?}",
                    self.connect_timeout
                ))
            })??;

        let (transport, peer) = Transport::pair();
        tokio::spawn(pump(stream, peer));
        Ok(transport)
    }
}

async fn pump<S>(stream: S, peer: TransportPeer)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let TransportPeer {
        events,
        mut sent,
        shutdown,
    } = peer;
    let (mut sink, mut stream) = stream.split();
    let _ = events.send(TransportEvent::Opened);

    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                debug!("chat connection closed locally");
                return;
            }
            outgoing = sent.recv() => match outgoing {
                Some(text) => {
                    debug!(bytes = text.len(), "sending frame");
                    if let Err(err) = sink.send(Message::text(text)).await {
                        warn!(error = %err, "failed to write frame");
                        break err.to_string();
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|frame| frame.reason.as_str().to_owned()).unwrap_or_default();
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "chat connection failed");
                    break err.to_string();
                }
                None => break String::new(),
            },
        }
    };

    info!(reason = %reason, "chat connection closed by remote");
    let _ = events.send(TransportEvent::Closed { reason });
}
