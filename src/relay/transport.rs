//! Duplex text-frame transport to a relay.
//!
//! [`RelayConnection`](super::RelayConnection) only needs a sink and a
//! stream of text frames. [`WebSocketTransport`] provides them over
//! `tokio-tungstenite`; tests substitute an in-memory transport.

use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use super::error::{RelayError, RelayResult};
use super::url::RelayUrl;

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = RelayError> + Send>>;

/// Inbound half of a transport. An `Err` item or the end of the stream
/// means the connection is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = RelayResult<String>> + Send>>;

/// Opens duplex text-frame connections.
pub trait Transport: Send + Sync + 'static {
    /// Connects to `url`.
    ///
    /// # Errors
    ///
    /// The returned future resolves to [`RelayError::Connection`] if the
    /// handshake fails.
    fn connect(&self, url: &RelayUrl) -> BoxFuture<'static, RelayResult<(FrameSink, FrameStream)>>;
}

/// WebSocket transport (TLS through rustls with webpki roots).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Creates the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, url: &RelayUrl) -> BoxFuture<'static, RelayResult<(FrameSink, FrameStream)>> {
        let url = url.clone();
        async move {
            let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| RelayError::Connection {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            debug!(relay = %url, "websocket handshake complete");

            let (sink, stream) = socket.split();
            let sink = sink
                .with(|text: String| {
                    future::ready(Ok::<_, tungstenite::Error>(Message::Text(text.into())))
                })
                .sink_map_err(|e| RelayError::ConnectionClosed(e.to_string()));
            let stream = stream.filter_map(|message| future::ready(frame_from_message(message)));

            Ok((Box::pin(sink) as FrameSink, Box::pin(stream) as FrameStream))
        }
        .boxed()
    }
}

fn frame_from_message(message: Result<Message, tungstenite::Error>) -> Option<RelayResult<String>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes.to_vec())
                .map_err(|e| RelayError::ProtocolFrame(format!("binary frame is not UTF-8: {e}"))),
        ),
        Ok(Message::Close(frame)) => Some(Err(RelayError::ConnectionClosed(
            frame.map_or_else(|| "closed by relay".to_string(), |f| f.reason.to_string()),
        ))),
        // Pings are answered by tungstenite itself.
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(RelayError::ConnectionClosed(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_pass_through() {
        let frame = frame_from_message(Ok(Message::Text("[\"EOSE\",\"s\"]".into())));
        assert_eq!(frame.unwrap().unwrap(), "[\"EOSE\",\"s\"]");
    }

    #[test]
    fn control_frames_are_skipped() {
        assert!(frame_from_message(Ok(Message::Ping(Vec::new().into()))).is_none());
        assert!(frame_from_message(Ok(Message::Pong(Vec::new().into()))).is_none());
    }

    #[test]
    fn close_ends_the_connection() {
        assert!(matches!(
            frame_from_message(Ok(Message::Close(None))),
            Some(Err(RelayError::ConnectionClosed(_)))
        ));
    }

    #[test]
    fn invalid_utf8_binary_is_a_frame_error() {
        assert!(matches!(
            frame_from_message(Ok(Message::Binary(vec![0xff, 0xfe].into()))),
            Some(Err(RelayError::ProtocolFrame(_)))
        ));
    }

    #[tokio::test]
    async fn unreachable_relay_is_connection_error() {
        let url = RelayUrl::parse("ws://127.0.0.1:1", true).unwrap();
        let result = WebSocketTransport::new().connect(&url).await;
        assert!(matches!(result, Err(RelayError::Connection { .. })));
    }
}
