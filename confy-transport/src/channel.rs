//! WebSocket framing transport.
//!
//! Internal module for WebSocket communication with the relay.
//!
//! # Frame Handling Invariants
//!
//! - Strict 1:1 mapping: one WS text message = one Frame
//! - No buffering, no message combining/splitting
//! - Each `send_frame()` = exactly one `ws.send(Text(...))`
//! - Each `recv_frame()` = exactly one text message → `Frame::parse`
//! - Binary, Ping and Pong messages are skipped

use std::time::Duration;

use confy_core::Frame;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message as WsMessage, Error as WsError},
    MaybeTlsStream, WebSocketStream,
};

use crate::error::TransportError;

/// A client WebSocket as returned by [`connect`].
pub(crate) type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket to `uri`, bounded by `timeout`.
pub(crate) async fn connect(uri: &str, timeout: Duration) -> Result<ClientStream, TransportError> {
    match tokio::time::timeout(timeout, connect_async(uri)).await {
        Err(_) => Err(TransportError::ConnectTimeout),
        Ok(Err(e)) => Err(TransportError::ConnectionFailed(e.to_string())),
        Ok(Ok((ws, _response))) => Ok(ws),
    }
}

/// Split a stream into independent write and read halves.
pub(crate) fn split<S>(ws: WebSocketStream<S>) -> (FrameSink<S>, FrameStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = ws.split();
    (FrameSink { sink }, FrameStream { stream })
}

/// Write half.
pub(crate) struct FrameSink<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> FrameSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send one frame as one text message.
    pub(crate) async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.sink
            .send(WsMessage::Text(frame.to_wire()))
            .await
            .map_err(TransportError::from)
    }

    /// Best-effort close handshake.
    pub(crate) async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

/// Read half.
pub(crate) struct FrameStream<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> FrameStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` once the peer closed the channel.
    pub(crate) async fn recv_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(Frame::parse(&text))),
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}
