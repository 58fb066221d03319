//! Venue WebSocket transport.
//!
//! Owns one socket at a time. The connection manager drives the lifecycle:
//! [`connect`](Transport::connect) opens the socket, [`next_frame`](Transport::next_frame)
//! yields decoded messages until the socket closes, and the manager decides
//! whether to connect again.
//!
//! Frame handling:
//!
//! - **Text**: decoded into an [`Inbound`](crate::port::Inbound); parse
//!   failures are logged and skipped
//! - **Ping**: answered with a Pong carrying the same payload
//! - **Close** or a socket error: surfaced as [`TransportFrame::Closed`]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::dto::message;
use crate::error::{Error, Result};
use crate::port::{Envelope, Transport, TransportFrame};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport for the venue's JSON API.
pub struct VenueStream {
    url: Url,
    ws: Option<Socket>,
}

impl VenueStream {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self { url, ws: None }
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.ws.is_some()
    }
}

#[async_trait]
impl Transport for VenueStream {
    async fn connect(&mut self) -> Result<()> {
        // A process-wide provider may already be installed; either is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        if let Some(mut old) = self.ws.take() {
            let _ = old.close(None).await;
        }

        info!(url = %self.url, "Connecting to WebSocket");
        let (ws, response) = connect_async(self.url.as_str()).await?;
        info!(status = %response.status(), "WebSocket connected");
        self.ws = Some(ws);
        Ok(())
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| Error::Connection("Not connected".into()))?;
        let json = message::encode(envelope)?;
        trace!(req_id = %envelope.req_id, kind = envelope.body.label(), "Sending frame");
        ws.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> TransportFrame {
        let Some(ws) = self.ws.as_mut() else {
            return TransportFrame::Closed {
                reason: "not connected".into(),
            };
        };

        let frame = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(bytes = text.len(), "Received WebSocket text frame");
                    match message::decode(&text) {
                        Ok(inbound) => break TransportFrame::Message(inbound),
                        Err(e) => warn!(error = %e, bytes = text.len(), "Failed to parse message"),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!("Received ping, sending pong");
                    if let Err(e) = ws.send(Message::Pong(data)).await {
                        break TransportFrame::Closed {
                            reason: format!("pong failed: {e}"),
                        };
                    }
                }
                Some(Ok(Message::Close(close))) => {
                    let reason = close.map_or_else(
                        || "closed by server".to_string(),
                        |c| format!("closed by server: {} {}", c.code, c.reason),
                    );
                    break TransportFrame::Closed { reason };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    break TransportFrame::Closed {
                        reason: e.to_string(),
                    }
                }
                None => {
                    break TransportFrame::Closed {
                        reason: "stream ended".into(),
                    }
                }
            }
        };

        if let TransportFrame::Closed { reason } = &frame {
            debug!(%reason, "WebSocket closed");
            self.ws = None;
        }
        frame
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "Error closing WebSocket");
            }
        }
    }

    fn venue_name(&self) -> &'static str {
        "venue"
    }
}
