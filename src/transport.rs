//! Duplex connection seam and the WebSocket implementation.
//!
//! A [`Transport`] produces a ([`WireSink`], [`WireStream`]) pair whose
//! halves are independently owned, so the send and receive pipelines can
//! run concurrently without blocking one another. [`RealtimeTransport`] is
//! the production implementation over tokio-tungstenite; tests substitute
//! scripted implementations.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

/// Outbound half of a duplex connection.
#[async_trait]
pub trait WireSink: Send {
    /// Send one text message.
    async fn send(&mut self, message: String) -> SessionResult<()>;

    /// Close the connection. Idempotent.
    async fn close(&mut self) -> SessionResult<()>;
}

/// Inbound half of a duplex connection.
#[async_trait]
pub trait WireStream: Send {
    /// Receive the next text message; `None` once the connection is closed.
    async fn next_message(&mut self) -> Option<SessionResult<String>>;
}

/// Connection factory consumed by the session.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection and split it into its two halves.
    async fn connect(
        &mut self,
        config: &SessionConfig,
    ) -> SessionResult<(Box<dyn WireSink>, Box<dyn WireStream>)>;
}

// =============================================================================
// WebSocket implementation
// =============================================================================

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket transport for the realtime service.
#[derive(Debug, Default)]
pub struct RealtimeTransport;

#[async_trait]
impl Transport for RealtimeTransport {
    async fn connect(
        &mut self,
        config: &SessionConfig,
    ) -> SessionResult<(Box<dyn WireSink>, Box<dyn WireStream>)> {
        let url = config.ws_url();
        let uri: http::Uri = url
            .parse()
            .map_err(|e| SessionError::ConnectionFailed(format!("invalid endpoint: {e}")))?;
        let host = uri
            .host()
            .ok_or_else(|| {
                SessionError::ConnectionFailed(format!("endpoint has no host: {url}"))
            })?
            .to_string();

        let request = http::Request::builder()
            .uri(&url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header("Sec-WebSocket-Protocol", "realtime")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        tracing::info!("connected to realtime service");

        let (sink, stream) = ws_stream.split();
        Ok((
            Box::new(TextSink { inner: sink }),
            Box::new(TextStream { inner: stream }),
        ))
    }
}

struct TextSink {
    inner: WsSink,
}

#[async_trait]
impl WireSink for TextSink {
    async fn send(&mut self, message: String) -> SessionResult<()> {
        self.inner
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.inner
            .close()
            .await
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))
    }
}

struct TextStream {
    inner: WsStream,
}

#[async_trait]
impl WireStream for TextStream {
    async fn next_message(&mut self) -> Option<SessionResult<String>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        tracing::info!("connection closed by server: {} {}", frame.code, frame.reason);
                    }
                    return None;
                }
                // Binary, ping and pong frames carry no events. tungstenite
                // queues pong replies itself; the capture pipeline's sends
                // flush them.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(SessionError::ConnectionFailed(e.to_string()))),
                None => return None,
            }
        }
    }
}
