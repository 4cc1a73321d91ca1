//! Socket establishment for the signaling channel.

use crate::errors::TransportError;
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use signaling_protocol::SUBPROTOCOL;
use std::borrow::Cow;
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

/// Frame written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// JSON text frame
    Text(String),
    /// Close handshake
    Close { code: u16, reason: String },
}

/// Outbound half of a live connection.
pub type FrameSink = Pin<Box<dyn Sink<OutboundFrame, Error = TransportError> + Send>>;

/// Inbound half of a live connection. The stream ends on a clean remote close.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// A live, split connection.
pub struct WireConnection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl std::fmt::Debug for WireConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireConnection").finish_non_exhaustive()
    }
}

/// Opens connections to the signaling endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<WireConnection, TransportError>;
}

/// WebSocket connector negotiating the `protoo` sub-protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<WireConnection, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!(target: "room.transport", url = %url, "WebSocket connected");

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| TransportError::Socket(e.to_string()))
            .with(|frame: OutboundFrame| future::ready(Ok::<_, TransportError>(to_ws(frame))));

        let stream = read
            .take_while(|item| future::ready(!matches!(item, Ok(WsMessage::Close(_)))))
            .filter_map(|item| {
                future::ready(match item {
                    Ok(WsMessage::Text(text)) => Some(Ok(text)),
                    Ok(WsMessage::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
                })
            });

        Ok(WireConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_ws(frame: OutboundFrame) -> WsMessage {
    match frame {
        OutboundFrame::Text(text) => WsMessage::Text(text),
        OutboundFrame::Close { code, reason } => WsMessage::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason),
        })),
    }
}
