//! The persistent, bidirectional text-frame connection.
//!
//! [`Transport`] opens connections and [`Connection`] exchanges frames over
//! one.  [`WebSocketTransport`] is the production implementation; tests
//! substitute an in-memory fake.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, Result};
use crate::observability::MALFORMED_FRAMES;

/// Opens connections.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>>;
}

/// One open connection carrying newline-free JSON text frames.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Write one frame.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Wait for the next frame.  `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>> {
        tracing::debug!(host = url.host_str(), path = url.path(), "opening websocket");
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| {
                Error::connection(
                    format!("WebSocket connect failed: {}", e),
                    Some(Box::new(e)),
                )
            })?;
        tracing::debug!(status = %response.status(), "websocket open");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// An open WebSocket.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream.send(Message::Text(frame)).await.map_err(|e| {
            Error::transport(format!("WebSocket send failed: {}", e), Some(Box::new(e)))
        })
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(err) => {
                        MALFORMED_FRAMES.click();
                        tracing::warn!(error = %err, "dropping non-UTF-8 binary frame");
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "websocket closed by peer");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => {
                    return Some(Err(Error::transport(
                        format!("WebSocket receive failed: {}", e),
                        Some(Box::new(e)),
                    )));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await.map_err(|e| {
            Error::transport(format!("WebSocket close failed: {}", e), Some(Box::new(e)))
        })
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection").finish_non_exhaustive()
    }
}
