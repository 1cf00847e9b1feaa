//! Websocket transport.
//!
//! Each connection runs in its own task. The task connects, reports
//! [`SessionEvent::Opened`], then pumps outbound text frames and classifies
//! inbound messages until either side closes. Whatever ends it, the task
//! reports exactly one [`SessionEvent::Closed`].

use futures_util::{SinkExt, StreamExt};
use paroli_protocol::InboundFrame;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::session::{Connection, ConnectionId, Connector, SessionEvent};

pub struct WsConnector {
    endpoint: String,
    auth_token: Option<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl WsConnector {
    pub fn new(
        endpoint: impl Into<String>,
        auth_token: Option<String>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token,
            events,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn handshake_request(&self) -> Result<Request, String> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| format!("invalid endpoint {}: {}", self.endpoint, e))?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| format!("invalid auth token: {}", e))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

impl Connector for WsConnector {
    type Connection = WsConnection;

    /// Must be called from within a tokio runtime
    fn open(&mut self, id: ConnectionId) -> WsConnection {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        match self.handshake_request() {
            Ok(request) => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    let reason = run_connection(id, request, frames_rx, shutdown_rx, &events).await;
                    let _ = events.send(SessionEvent::Closed(id, reason));
                });
            }
            Err(reason) => {
                let _ = self.events.send(SessionEvent::Closed(id, Some(reason)));
            }
        }

        WsConnection {
            id,
            frames: frames_tx,
            shutdown: Some(shutdown_tx),
        }
    }
}

/// Handle to a connection task. Dropping it closes the connection.
pub struct WsConnection {
    id: ConnectionId,
    frames: mpsc::UnboundedSender<String>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Connection for WsConnection {
    fn send(&mut self, frame: String) -> bool {
        if self.frames.send(frame).is_err() {
            debug!(connection = %self.id, "Connection task gone, frame not sent");
            return false;
        }
        true
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Returns the close reason, `None` for a local shutdown
async fn run_connection(
    id: ConnectionId,
    request: Request,
    mut frames: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Option<String> {
    let ws_stream = tokio::select! {
        result = tokio_tungstenite::connect_async(request) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => return Some(format!("connect failed: {}", e)),
        },
        _ = &mut shutdown => return None,
    };

    if events.send(SessionEvent::Opened(id)).is_err() {
        return None;
    }
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            // Shutdown wins over pending reads so nothing is delivered after close()
            biased;

            _ = &mut shutdown => {
                let _ = ws_sender.send(Message::Close(None)).await;
                return None;
            }

            Some(frame) = frames.recv() => {
                if let Err(e) = ws_sender.send(Message::Text(frame)).await {
                    return Some(format!("send failed: {}", e));
                }
            }

            msg = ws_receiver.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => return Some(e.to_string()),
                    None => return Some("connection ended".to_string()),
                };

                let frame = match msg {
                    Message::Text(text) => match InboundFrame::from_text(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(connection = %id, "Dropping frame: {}", e);
                            continue;
                        }
                    },
                    Message::Binary(data) => InboundFrame::from_binary(data),
                    Message::Close(frame) => {
                        let reason = frame
                            .map(|f| format!("closed by server ({}): {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        return Some(reason);
                    }
                    // Pings are answered by tungstenite itself
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                };

                if events.send(SessionEvent::Frame(id, frame)).is_err() {
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_carries_bearer_token() {
        let (events, _rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new(
            "ws://127.0.0.1:8848/api/v1/stream",
            Some("secret".to_string()),
            events,
        );
        let request = connector.handshake_request().unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer secret");
    }

    #[test]
    fn test_handshake_without_token() {
        let (events, _rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new("ws://127.0.0.1:8848/api/v1/stream", None, events);
        let request = connector.handshake_request().unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_bad_endpoint_reports_closed() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut connector = WsConnector::new("not a url", None, events);
        let _connection = connector.open(ConnectionId(3));
        match rx.try_recv().unwrap() {
            SessionEvent::Closed(id, Some(reason)) => {
                assert_eq!(id, ConnectionId(3));
                assert!(reason.contains("invalid endpoint"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_reports_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (events, mut rx) = mpsc::unbounded_channel();
        let mut connector = WsConnector::new(format!("ws://{}/api/v1/stream", addr), None, events);
        let mut connection = connector.open(ConnectionId(1));

        match rx.recv().await.unwrap() {
            SessionEvent::Closed(ConnectionId(1), Some(reason)) => {
                assert!(reason.starts_with("connect failed"))
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!connection.send("{}".to_string()));
    }
}
