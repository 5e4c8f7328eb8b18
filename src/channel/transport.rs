//! Channel transports
//!
//! A [`Transport`] opens one [`Link`]: a receiver of inbound frames plus a
//! sender for outbound frames. The link is gone once the inbound receiver
//! yields `None`; dropping both halves closes the underlying connection.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::channel::protocol::ChannelFrame;
use crate::error::{NotifyError, Result};
use crate::schema::Credential;

/// Both directions of one established channel
pub struct Link {
    pub inbound: mpsc::UnboundedReceiver<ChannelFrame>,
    pub outbound: mpsc::UnboundedSender<ChannelFrame>,
}

/// Opens channels to the notification server
pub trait Transport: Send + Sync + 'static {
    fn open<'a>(&'a self, credential: &'a Credential) -> BoxFuture<'a, Result<Link>>;
}

/// WebSocket transport; the credential travels as a bearer `Authorization` header
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open_ws(&self, credential: &Credential) -> Result<Link> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(NotifyError::transport)?;
        let auth = HeaderValue::from_str(&credential.header_value()).map_err(NotifyError::transport)?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (ws, _response) = connect_async(request).await.map_err(NotifyError::transport)?;
        tracing::debug!("WebSocket handshake with {} complete", self.url);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws, inbound_tx, outbound_rx));

        Ok(Link {
            inbound: inbound_rx,
            outbound: outbound_tx,
        })
    }
}

impl Transport for WsTransport {
    fn open<'a>(&'a self, credential: &'a Credential) -> BoxFuture<'a, Result<Link>> {
        Box::pin(self.open_ws(credential))
    }
}

/// Move frames between the socket and the link until either side goes away
async fn pump(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    inbound: mpsc::UnboundedSender<ChannelFrame>,
    mut outbound: mpsc::UnboundedReceiver<ChannelFrame>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match ChannelFrame::parse(&text) {
                        Ok(frame) => {
                            if inbound.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Dropping malformed frame: {}", e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Server closed the notification channel");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Notification channel error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            cmd = outbound.recv() => {
                match cmd {
                    Some(frame) => match frame.to_text() {
                        Ok(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                tracing::warn!("Failed to send {}: {}", frame.event, e);
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Failed to encode {}: {}", frame.event, e),
                    },
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = inbound.closed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
