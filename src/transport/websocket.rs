//! WebSocket adapter built on tokio-tungstenite.
//!
//! - Binary and text messages become [`Inbound`] chunks; an empty message
//!   is the end-of-message marker.
//! - Ping/pong are answered by tungstenite and never reach the inbox.
//! - A close frame or stream error ends the reader and cancels the
//!   connection.
//! - Response frames are sent as text messages.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use jobwire::transport::websocket;
//!
//! let ws = websocket::accept(tcp_stream, "/websocket").await?;
//! let (sink, source) = ws.split();
//! let reader = websocket::spawn_reader(source, inbound_tx, cancel.clone());
//! let sink = websocket::frame_sink(sink);
//! ```

use bytes::Bytes;
use futures::future;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use super::Inbound;
use crate::error::Result;

/// What the reader does with one WebSocket message.
#[derive(Debug, PartialEq, Eq)]
pub enum Mapped {
    /// Push into the inbox.
    Deliver(Inbound),
    /// Control traffic, nothing to deliver.
    Skip,
    /// The peer closed the connection.
    Close,
}

/// Map a WebSocket message onto the inbound queue.
pub fn map_message(message: Message) -> Mapped {
    match message {
        Message::Binary(data) => Mapped::Deliver(Inbound::from_bytes(Bytes::from(data))),
        Message::Text(text) => Mapped::Deliver(Inbound::from_bytes(Bytes::from(text.into_bytes()))),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Mapped::Skip,
        Message::Close(_) => Mapped::Close,
    }
}

/// Perform the server handshake, accepting only requests for `path`.
pub async fn accept<S>(stream: S, path: &str) -> Result<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let expected = path.to_string();
    let callback = move |request: &Request, response: Response| {
        if request.uri().path() == expected {
            Ok(response)
        } else {
            tracing::debug!(path = %request.uri().path(), "Rejecting WebSocket upgrade");
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    Ok(tokio_tungstenite::accept_hdr_async(stream, callback).await?)
}

/// Spawn the task that moves WebSocket messages into the inbox channel.
///
/// The task ends on close, error, cancellation, or when the inbox is
/// dropped. On exit it cancels `cancel` so an in-flight job stops.
pub fn spawn_reader<S>(
    mut source: S,
    tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = source.next() => message,
            };

            match message {
                Some(Ok(message)) => match map_message(message) {
                    Mapped::Deliver(inbound) => {
                        if tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Mapped::Skip => {}
                    Mapped::Close => {
                        tracing::info!("WebSocket disconnected.");
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read failed");
                    break;
                }
                None => {
                    tracing::info!("WebSocket disconnected.");
                    break;
                }
            }
        }

        cancel.cancel();
    })
}

/// Adapt the WebSocket sink to the writer task's `Sink<Bytes>`.
pub fn frame_sink<S>(sink: S) -> impl Sink<Bytes, Error = WsError> + Unpin + Send + 'static
where
    S: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    sink.with(|frame: Bytes| {
        future::ready(Ok::<_, WsError>(Message::Text(
            String::from_utf8_lossy(&frame).into_owned(),
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_binary_message_is_chunk() {
        assert_eq!(
            map_message(Message::Binary(b"echo    {}".to_vec())),
            Mapped::Deliver(Inbound::Chunk(Bytes::from_static(b"echo    {}")))
        );
    }

    #[test]
    fn test_text_message_is_chunk() {
        assert_eq!(
            map_message(Message::Text("echo    {}".into())),
            Mapped::Deliver(Inbound::Chunk(Bytes::from_static(b"echo    {}")))
        );
    }

    #[test]
    fn test_empty_message_ends_payload() {
        assert_eq!(
            map_message(Message::Binary(Vec::new())),
            Mapped::Deliver(Inbound::EndOfMessage)
        );
    }

    #[test]
    fn test_control_messages() {
        assert_eq!(map_message(Message::Ping(vec![1])), Mapped::Skip);
        assert_eq!(map_message(Message::Pong(vec![1])), Mapped::Skip);
        assert_eq!(map_message(Message::Close(None)), Mapped::Close);
    }

    #[tokio::test]
    async fn test_reader_forwards_until_close() {
        let messages: Vec<std::result::Result<Message, WsError>> = vec![
            Ok(Message::Binary(b"abc".to_vec())),
            Ok(Message::Ping(vec![])),
            Ok(Message::Binary(Vec::new())),
            Ok(Message::Close(None)),
            Ok(Message::Binary(b"ignored".to_vec())),
        ];
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        spawn_reader(stream::iter(messages), tx, cancel.clone())
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Inbound::Chunk(Bytes::from_static(b"abc"))));
        assert_eq!(rx.recv().await, Some(Inbound::EndOfMessage));
        assert_eq!(rx.recv().await, None);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_frame_sink_sends_text() {
        let (tx, mut rx) = futures::channel::mpsc::unbounded::<Message>();
        let mut sink = frame_sink(tx.sink_map_err(|_| WsError::ConnectionClosed));

        sink.send(Bytes::from_static(br#"{"status":"success"}"#))
            .await
            .unwrap();

        assert_eq!(
            rx.next().await,
            Some(Message::Text(r#"{"status":"success"}"#.to_string()))
        );
    }
}
