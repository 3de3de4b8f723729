//! WebSocket transport for conversation sessions.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use huddle_core::{ChatError, RealtimeConnection, RealtimePeer, RealtimeTransport, TransportFrame};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, info, trace};
use url::Url;

use crate::error::map_ws_error;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one WebSocket per session and pumps it on a background task.
#[derive(Debug, Clone, Copy)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(&self, url: &Url) -> Result<RealtimeConnection, ChatError> {
        let handshake = connect_async(url.as_str());
        let (socket, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| ChatError::connect_failed(url, "timed out"))?
            .map_err(|err| map_ws_error(url, err))?;
        debug!(%url, "websocket handshake complete");

        let (connection, peer) = RealtimeConnection::pair();
        tokio::spawn(pump(socket, peer, url.clone()));
        Ok(connection)
    }
}

/// Moves frames between the socket and the session queues until either side
/// closes. Remote closure is reported as `TransportFrame::Closed`.
async fn pump(socket: Socket, peer: RealtimePeer, url: Url) {
    let RealtimePeer {
        mut outbound_rx,
        inbound_tx,
        shutdown,
    } = peer;
    let (mut sink, mut source) = socket.split();

    let remote_reason = loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break None;
            }
            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(err) = sink.send(WsMessage::Text(text.into())).await {
                        break Some(format!("send failed: {err}"));
                    }
                }
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break None;
                }
            },
            inbound = source.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    if inbound_tx.send(TransportFrame::Text(text.as_str().to_owned())).is_err() {
                        break None;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.as_str().to_owned())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".to_owned());
                    break Some(reason);
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    trace!(%url, len = data.len(), "ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break Some(err.to_string()),
                None => break Some("connection reset".to_owned()),
            }
        }
    };

    match remote_reason {
        Some(reason) => {
            info!(%url, %reason, "websocket closed by remote");
            let _ = inbound_tx.send(TransportFrame::Closed {
                reason: Some(reason),
            });
        }
        None => debug!(%url, "websocket closed locally"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use huddle_core::{
        ConnectionState, ConversationRef, Endpoints, HistoryStatus, Participant, SessionManager,
        WireMessage,
    };
    use tokio::{net::TcpListener, time::timeout};
    use tokio_tungstenite::accept_async;

    use super::*;

    /// Echoes text frames; `bye` makes the server close the socket.
    async fn echo_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        match msg {
                            WsMessage::Text(text) if text.as_str() == "bye" => {
                                let _ = ws.close(None).await;
                                break;
                            }
                            WsMessage::Text(text) => {
                                if ws.send(WsMessage::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            WsMessage::Close(_) => break,
                            _ => {}
                        }
                    }
                });
            }
        });

        addr
    }

    fn socket_url(addr: std::net::SocketAddr) -> Url {
        Url::parse(&format!("ws://{addr}/ws/chat/channel/1/")).expect("valid url")
    }

    async fn next_frame(connection: &mut RealtimeConnection) -> TransportFrame {
        timeout(Duration::from_secs(2), connection.next_frame())
            .await
            .expect("frame wait timed out")
            .expect("connection queue open")
    }

    #[tokio::test]
    async fn round_trips_text_frames() {
        let addr = echo_server().await;
        let mut connection = WsTransport::new()
            .connect(&socket_url(addr))
            .await
            .expect("connect should work");

        connection
            .publish(r#"{"message":"hi"}"#.to_owned())
            .expect("publish should queue");

        assert_eq!(
            next_frame(&mut connection).await,
            TransportFrame::Text(r#"{"message":"hi"}"#.to_owned())
        );
        connection.close();
    }

    #[tokio::test]
    async fn reports_server_close() {
        let addr = echo_server().await;
        let mut connection = WsTransport::new()
            .connect(&socket_url(addr))
            .await
            .expect("connect should work");

        connection.publish("bye".to_owned()).expect("publish");

        assert!(matches!(
            next_frame(&mut connection).await,
            TransportFrame::Closed { reason: Some(_) }
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let err = WsTransport::new()
            .with_connect_timeout(Duration::from_secs(2))
            .connect(&socket_url(addr))
            .await
            .expect_err("nothing is listening");
        assert_eq!(err.code, "transport_connect_failed");
        assert!(err.is_user_visible());
    }

    struct EmptyHistory;

    #[async_trait]
    impl huddle_core::ChatApi for EmptyHistory {
        fn has_credentials(&self) -> bool {
            true
        }

        async fn current_user(&self) -> Result<Participant, ChatError> {
            Ok(Participant::new(1, "alice"))
        }

        async fn fetch_history(
            &self,
            _conversation: ConversationRef,
        ) -> Result<Vec<WireMessage>, ChatError> {
            Ok(Vec::new())
        }

        async fn persist_message(
            &self,
            _conversation: ConversationRef,
            _content: &str,
        ) -> Result<(), ChatError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn session_over_websocket_shows_echoed_message() {
        let addr = echo_server().await;
        let endpoints = Endpoints::new(&format!("http://{addr}")).expect("valid base");
        let manager = SessionManager::new(
            Arc::new(EmptyHistory),
            Arc::new(WsTransport::new()),
            endpoints,
        );

        let mut handle = manager
            .open(ConversationRef::Channel(1), Participant::new(1, "alice"), None)
            .await
            .expect("open should work");
        handle.send("hello").expect("send should queue");

        let mut snapshots = handle.subscribe();
        let snapshot = timeout(
            Duration::from_secs(2),
            snapshots.wait_for(|snapshot| snapshot.live_deliveries == 1),
        )
        .await
        .expect("echo timed out")
        .map(|snapshot| snapshot.clone())
        .expect("session alive");

        assert_eq!(snapshot.messages[0].text, "hello");
        assert_eq!(snapshot.messages[0].sender, Participant::new(1, "alice"));
        assert_ne!(snapshot.history, HistoryStatus::Failed);

        handle.close().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
    }
}
