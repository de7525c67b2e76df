//! Native WebSocket transport — `tokio-tungstenite`.
//!
//! For hosts without a browser window: each text frame carries exactly one
//! JSON envelope. Inbound envelopes are attributed to the configured peer
//! origin. A background tokio task owns the socket; the public API talks to
//! it over an mpsc channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};

use crate::error::TransportError;

use super::{target_matches, Envelope, Handler, Inbound, Listeners, Subscription, Transport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`WsTransport::connect`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Origin attributed to every inbound envelope.
    pub peer_origin: String,
}

// ─── Commands from public API to background task ─────────────────────────────

enum Command {
    Post(String),
    Disconnect,
}

// ─── Public WsTransport ──────────────────────────────────────────────────────

/// WebSocket-backed [`Transport`].
pub struct WsTransport {
    peer_origin: String,
    listeners: Arc<Listeners>,
    cmd_tx: mpsc::Sender<Command>,
    task_handle: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
}

impl WsTransport {
    /// Connect to `config.url` and start the background task.
    pub async fn connect(config: WsConfig) -> Result<Self, TransportError> {
        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(config.url.as_str()))
            .await
            .map_err(|_| TransportError::ConnectionFailed("Connection timeout".into()))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        tracing::info!("WebSocket transport connected to {}", config.url);
        Ok(Self::from_stream(ws_stream, config.peer_origin))
    }

    /// Wrap an already-established stream, e.g. one accepted by a server.
    pub fn from_stream<S>(stream: WebSocketStream<S>, peer_origin: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let peer_origin = peer_origin.into();
        let listeners = Listeners::new();
        let connected = Arc::new(AtomicBool::new(true));
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (sink, stream) = stream.split();

        let handle = tokio::spawn(run_task(
            sink,
            stream,
            cmd_rx,
            Arc::clone(&listeners),
            peer_origin.clone(),
            Arc::clone(&connected),
        ));

        Self {
            peer_origin,
            listeners,
            cmd_tx,
            task_handle: Some(handle),
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn peer_origin(&self) -> &str {
        &self.peer_origin
    }

    /// Close the socket gracefully and wait for the background task to finish.
    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        let _ = self.cmd_tx.send(Command::Disconnect).await;
        if let Some(handle) = self.task_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Transport for WsTransport {
    fn post(&self, envelope: &Envelope, target_origin: &str) -> Result<(), TransportError> {
        if !target_matches(target_origin, &self.peer_origin) {
            tracing::debug!(
                "Dropping {} post: target {} does not match peer",
                envelope.topic,
                target_origin
            );
            return Ok(());
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let json = envelope
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.cmd_tx.try_send(Command::Post(json)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::SendFailed("Command channel full".into())
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::NotConnected,
        })
    }

    fn subscribe(&self, handler: Handler) -> Subscription {
        self.listeners.add(handler)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn run_task<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut stream: SplitStream<WebSocketStream<S>>,
    mut cmd_rx: mpsc::Receiver<Command>,
    listeners: Arc<Listeners>,
    peer_origin: String,
    connected: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_str: &str = text.as_ref();
                        dispatch_text(&listeners, &peer_origin, text_str);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("WebSocket transport: {}", close_error(frame.as_ref()));
                        break;
                    }
                    // binary frames carry no envelopes
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket transport error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Post(json)) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            tracing::warn!("Send failed: {}", e);
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Bridge disconnect".into(),
                        }))).await;
                        break;
                    }
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
}

fn dispatch_text(listeners: &Listeners, peer_origin: &str, text: &str) {
    match Envelope::from_json(text) {
        Ok(envelope) => listeners.dispatch(&Inbound {
            origin: peer_origin.to_string(),
            envelope,
        }),
        Err(e) => tracing::warn!("Ignoring undecodable frame ({}): {}", e, text),
    }
}

fn close_error(frame: Option<&CloseFrame>) -> TransportError {
    TransportError::Closed {
        code: frame.map(|f| u16::from(f.code)),
        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Topic;
    use std::sync::Mutex;

    #[test]
    fn test_close_error() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "wallet closed".into(),
        };
        assert!(matches!(
            close_error(Some(&frame)),
            TransportError::Closed { code: Some(1001), ref reason } if reason == "wallet closed"
        ));
        assert!(matches!(
            close_error(None),
            TransportError::Closed { code: None, ref reason } if reason.is_empty()
        ));
    }

    #[test]
    fn test_dispatch_text_attributes_peer_origin() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        listeners.add(Arc::new(move |inbound: &Inbound| {
            sink.lock().unwrap().push(inbound.clone());
        }));

        dispatch_text(&listeners, "wss://peer.example", r#"{"topic":"ready"}"#);
        dispatch_text(&listeners, "wss://peer.example", "garbage");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].origin, "wss://peer.example");
        assert_eq!(seen[0].envelope.topic, Topic::Ready);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = WsTransport::connect(WsConfig {
            url: "ws://127.0.0.1:1".into(),
            peer_origin: "ws://127.0.0.1:1".into(),
        })
        .await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }
}
