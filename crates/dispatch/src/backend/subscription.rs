//! Chat status subscriptions over `graphql-transport-ws`
//!
//! Each subscription owns its own socket so it can be closed independently:
//! dropping the returned stream stops the pump task, which completes the
//! operation and closes the socket.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use supportchat_shared::{ChatId, ChatStatusUpdate};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::{
    decode_status_payload, errors_to_backend, ClientMessage, ServerMessage,
    CHAT_STATUS_SUBSCRIPTION,
};
use super::StatusStream;
use crate::error::{BackendError, BackendResult};

/// Default bound on the TCP connect and HTTP upgrade
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the `connection_init` / `connection_ack` handshake
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered notifications per subscription
const STREAM_BUFFER: usize = 16;

/// Operation id used on every socket (one operation per socket)
const OPERATION_ID: &str = "1";

/// Close codes the server uses to reject credentials
const CLOSE_UNAUTHORIZED: u16 = 4401;
const CLOSE_FORBIDDEN: u16 = 4403;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, WsMessage>;
type SocketSource = SplitStream<Socket>;

/// Opens status subscriptions against the GraphQL WebSocket endpoint
#[derive(Clone)]
pub struct GraphqlSubscriber {
    url: String,
    api_token: Option<String>,
    connect_timeout: Duration,
}

impl GraphqlSubscriber {
    pub fn new(url: String, api_token: Option<String>) -> Self {
        Self {
            url,
            api_token,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect, authenticate, and start a status subscription for one chat
    pub async fn subscribe(&self, chat_id: &ChatId) -> BackendResult<StatusStream> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| BackendError::Network(format!("Invalid websocket URL: {}", e)))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("graphql-transport-ws"),
        );

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| BackendError::Timeout)?
            .map_err(map_ws_error)?;
        let (mut sink, mut source) = socket.split();

        let init_payload = self
            .api_token
            .as_ref()
            .map(|token| json!({ "authorization": format!("Bearer {}", token) }));
        send_message(&mut sink, &ClientMessage::ConnectionInit { payload: init_payload }).await?;

        tokio::time::timeout(ACK_TIMEOUT, wait_for_ack(&mut sink, &mut source))
            .await
            .map_err(|_| BackendError::Timeout)??;

        send_message(
            &mut sink,
            &ClientMessage::Subscribe {
                id: OPERATION_ID.to_string(),
                payload: json!({
                    "query": CHAT_STATUS_SUBSCRIPTION,
                    "variables": { "chatId": chat_id },
                }),
            },
        )
        .await?;

        tracing::debug!(chat_id = %chat_id, "Chat status subscription opened");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(pump(sink, source, tx, chat_id.clone()));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn wait_for_ack(sink: &mut SocketSink, source: &mut SocketSource) -> BackendResult<()> {
    while let Some(message) = source.next().await {
        let message = message.map_err(|e| BackendError::Network(e.to_string()))?;
        match parse_frame(message)? {
            Frame::Event(ServerMessage::ConnectionAck) => return Ok(()),
            Frame::Event(ServerMessage::Ping) => send_message(sink, &ClientMessage::Pong).await?,
            Frame::Closed(err) => return Err(err),
            _ => {}
        }
    }
    Err(BackendError::Closed)
}

/// Forward socket events into the subscription channel until either side closes
async fn pump(
    mut sink: SocketSink,
    mut source: SocketSource,
    tx: mpsc::Sender<BackendResult<ChatStatusUpdate>>,
    chat_id: ChatId,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => {
                let _ = send_message(&mut sink, &ClientMessage::Complete {
                    id: OPERATION_ID.to_string(),
                }).await;
                let _ = sink.close().await;
                tracing::debug!(chat_id = %chat_id, "Chat status subscription closed by consumer");
                return;
            }
            maybe_message = source.next() => {
                let Some(message) = maybe_message else {
                    let _ = tx.send(Err(BackendError::Closed)).await;
                    return;
                };
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        let _ = tx.send(Err(BackendError::Network(e.to_string()))).await;
                        return;
                    }
                };

                let frame = match parse_frame(message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(chat_id = %chat_id, error = %e, "Ignoring undecodable socket frame");
                        continue;
                    }
                };

                match frame {
                    Frame::Event(ServerMessage::Next { payload, .. }) => {
                        match decode_status_payload(payload) {
                            Ok(update) => {
                                if tx.send(Ok(update)).await.is_err() {
                                    return;
                                }
                            }
                            Err(BackendError::Decode(e)) => {
                                tracing::warn!(chat_id = %chat_id, error = %e, "Ignoring undecodable status payload");
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        }
                    }
                    Frame::Event(ServerMessage::Error { payload, .. }) => {
                        let _ = tx.send(Err(errors_to_backend(&payload))).await;
                        return;
                    }
                    Frame::Event(ServerMessage::Complete { .. }) => {
                        let _ = tx.send(Err(BackendError::Closed)).await;
                        return;
                    }
                    Frame::Event(ServerMessage::Ping) => {
                        if let Err(e) = send_message(&mut sink, &ClientMessage::Pong).await {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                    Frame::Event(ServerMessage::ConnectionAck | ServerMessage::Pong) => {}
                    Frame::Closed(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                    Frame::Ignored => {}
                }
            }
        }
    }
}

enum Frame {
    Event(ServerMessage),
    Closed(BackendError),
    Ignored,
}

fn parse_frame(message: WsMessage) -> BackendResult<Frame> {
    match message {
        WsMessage::Text(text) => Ok(Frame::Event(serde_json::from_str(&text)?)),
        WsMessage::Binary(bytes) => Ok(Frame::Event(serde_json::from_slice(&bytes)?)),
        WsMessage::Close(frame) => {
            let code = frame.as_ref().map(|f| u16::from(f.code));
            let reason = frame
                .as_ref()
                .map(|f| f.reason.to_string())
                .unwrap_or_default();
            match code {
                Some(CLOSE_UNAUTHORIZED) | Some(CLOSE_FORBIDDEN) => {
                    Ok(Frame::Closed(BackendError::Unauthorized(reason)))
                }
                _ => Ok(Frame::Closed(BackendError::Closed)),
            }
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Ok(Frame::Ignored),
    }
}

async fn send_message(sink: &mut SocketSink, message: &ClientMessage) -> BackendResult<()> {
    let text = serde_json::to_string(message)?;
    sink.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| BackendError::Network(e.to_string()))
}

fn map_ws_error(err: tokio_tungstenite::tungstenite::Error) -> BackendError {
    use tokio_tungstenite::tungstenite::Error;

    match err {
        Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                BackendError::Unauthorized(format!("websocket upgrade rejected with HTTP {}", status))
            } else {
                BackendError::Http {
                    status,
                    body: "websocket upgrade rejected".to_string(),
                }
            }
        }
        other => BackendError::Network(other.to_string()),
    }
}
