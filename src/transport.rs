//! Transport abstraction
//!
//! The bus does not own a socket type. It is handed an already-handshaken
//! duplex stream that can receive and send whole text messages and be
//! closed. The read and write pumps each own one half, so the abstraction
//! is a splittable pair of traits rather than a single object.
//!
//! `WsTransport` is the bundled implementation over tokio-tungstenite.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::AppError;

/// Receiving half of a transport
#[async_trait]
pub trait TransportRx: Send {
    /// Receive the next whole text message.
    ///
    /// Returns `Ok(Some(text))` for a message, `Ok(None)` when the peer
    /// closed cleanly, and `Err` on a transport failure. All failures are
    /// terminal; the caller never retries.
    async fn receive(&mut self) -> Result<Option<String>, AppError>;
}

/// Sending half of a transport
#[async_trait]
pub trait TransportTx: Send {
    /// Transmit one whole text message
    async fn send(&mut self, text: String) -> Result<(), AppError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), AppError>;
}

/// A duplex transport that can be split into its two halves
pub trait Transport: Send {
    /// Receiving half handed to the read pump
    type Rx: TransportRx + 'static;
    /// Sending half handed to the write pump
    type Tx: TransportTx + 'static;

    /// Split into independent read/write halves
    fn split(self) -> (Self::Rx, Self::Tx);
}

/// WebSocket transport over tokio-tungstenite
///
/// Wraps an already-upgraded `WebSocketStream`. Text frames pass through
/// as messages; close frames end the stream; ping, pong and binary frames
/// are skipped (tungstenite answers pings itself).
pub struct WsTransport<S> {
    inner: WebSocketStream<S>,
}

impl<S> WsTransport<S> {
    /// Wrap an upgraded WebSocket stream
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }
}

impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Rx = WsRx<S>;
    type Tx = WsTx<S>;

    fn split(self) -> (Self::Rx, Self::Tx) {
        let (sink, stream) = self.inner.split();
        (WsRx { stream }, WsTx { sink })
    }
}

/// Receiving half of a [`WsTransport`]
pub struct WsRx<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> TransportRx for WsRx<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<String>, AppError> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Close(_) => return Ok(None),
                // Pong is handled automatically by tungstenite;
                // binary and other frame types are ignored
                _ => continue,
            }
        }
        Ok(None)
    }
}

/// Sending half of a [`WsTransport`]
pub struct WsTx<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> TransportTx for WsTx<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, text: String) -> Result<(), AppError> {
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AppError> {
        self.sink.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    /// Build a connected server/client WebSocket pair over an in-memory duplex
    async fn ws_pair() -> (
        WsTransport<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (server_io, client_io) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (WsTransport::new(server), client)
    }

    #[tokio::test]
    async fn test_text_message_passes_through() {
        let (transport, mut client) = ws_pair().await;
        let (mut rx, _tx) = transport.split();

        client
            .send(Message::Text("hello".to_string()))
            .await
            .unwrap();

        assert_eq!(rx.receive().await.unwrap(), Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_binary_frames_skipped() {
        let (transport, mut client) = ws_pair().await;
        let (mut rx, _tx) = transport.split();

        client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        client
            .send(Message::Text("after".to_string()))
            .await
            .unwrap();

        assert_eq!(rx.receive().await.unwrap(), Some("after".to_string()));
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let (transport, mut client) = ws_pair().await;
        let (mut rx, _tx) = transport.split();

        client.close(None).await.unwrap();

        assert_eq!(rx.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (transport, mut client) = ws_pair().await;
        let (_rx, mut tx) = transport.split();

        tx.send("out".to_string()).await.unwrap();

        match client.next().await.unwrap().unwrap() {
            Message::Text(text) => assert_eq!(text, "out"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
