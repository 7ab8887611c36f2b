//! WebSocket connection lifecycle.
//!
//! One [`StreamClient`] owns at most one live connection. Each connection
//! gets its own reader task, cancellation token and event channel; a new
//! `connect` after a disconnect starts a fresh event sequence.

use crate::message::{InboundMessage, OutboundMessage, StreamEvent};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, ready};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use vesta_config::StreamConfig;
use vesta_types::{NetworkError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Connection {
    id: u64,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    cancel: CancellationToken,
    events: broadcast::Sender<StreamEvent>,
    reader: JoinHandle<()>,
}

struct Slot {
    state: ConnectionState,
    connection: Option<Connection>,
}

struct Inner {
    config: StreamConfig,
    slot: Mutex<Slot>,
    next_id: AtomicU64,
    /// Serializes `connect` so two callers cannot open two transports.
    connecting: tokio::sync::Mutex<()>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the connection `id` if it is still the live one.
    fn release(&self, id: u64) {
        let mut slot = self.lock();
        if slot.connection.as_ref().is_some_and(|c| c.id == id) {
            slot.connection = None;
            slot.state = ConnectionState::Disconnected;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = slot.connection.take() {
            conn.cancel.cancel();
        }
    }
}

/// Client for the server-push stream.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
}

impl StreamClient {
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                slot: Mutex::new(Slot {
                    state: ConnectionState::Disconnected,
                    connection: None,
                }),
                next_id: AtomicU64::new(1),
                connecting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Open the stream at `url` and subscribe to its events.
    ///
    /// If a connection is already live this only adds a subscription to it.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidUrl`] for a non-`ws(s)` URL,
    /// [`NetworkError::Timeout`] if the handshake exceeds the connect
    /// timeout, otherwise the mapped transport error.
    pub async fn connect(&self, url: &str) -> Result<EventStream> {
        let _connecting = self.inner.connecting.lock().await;
        if let Ok(events) = self.subscribe() {
            tracing::debug!("stream already connected");
            return Ok(events);
        }

        let parsed =
            url::Url::parse(url).map_err(|e| NetworkError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(NetworkError::InvalidUrl(format!(
                "unsupported stream scheme: {}",
                parsed.scheme()
            )));
        }

        self.inner.lock().state = ConnectionState::Connecting;
        tracing::debug!(url = %parsed, "opening stream");

        let timeout = self.inner.config.connect_timeout();
        let ws = match tokio::time::timeout(timeout, connect_async(parsed.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                self.inner.lock().state = ConnectionState::Disconnected;
                tracing::warn!(error = %e, "stream connect failed");
                return Err(map_ws_error(&e));
            }
            Err(_) => {
                self.inner.lock().state = ConnectionState::Disconnected;
                tracing::warn!(timeout_secs = timeout.as_secs(), "stream connect timed out");
                return Err(NetworkError::Timeout);
            }
        };

        let (sink, source) = ws.split();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (events, rx) = broadcast::channel(self.inner.config.event_buffer.max(1));
        let cancel = CancellationToken::new();

        // The reader is spawned under the slot lock so a connection that
        // closes immediately cannot release before it is installed.
        let mut slot = self.inner.lock();
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            id,
            source,
            events.clone(),
            cancel.clone(),
        ));
        slot.connection = Some(Connection {
            id,
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
            cancel,
            events,
            reader,
        });
        slot.state = ConnectionState::Connected;
        drop(slot);

        tracing::info!(connection = id, "stream connected");
        Ok(EventStream::new(rx))
    }

    /// Another subscription to the live connection's events.
    ///
    /// # Errors
    ///
    /// [`NetworkError::NotConnected`] if there is no live connection.
    pub fn subscribe(&self) -> Result<EventStream> {
        self.inner
            .lock()
            .connection
            .as_ref()
            .map(|c| EventStream::new(c.events.subscribe()))
            .ok_or(NetworkError::NotConnected)
    }

    /// Close the live connection with `code`. A no-op when disconnected.
    pub async fn disconnect(&self, code: u16) {
        let taken = {
            let mut slot = self.inner.lock();
            slot.state = ConnectionState::Disconnected;
            slot.connection.take()
        };
        let Some(conn) = taken else {
            return;
        };

        conn.cancel.cancel();
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Utf8Bytes::from_static(""),
        };
        if let Err(e) = conn.sink.lock().await.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, "close frame not delivered");
        }
        if let Err(e) = conn.reader.await {
            tracing::debug!(error = %e, "stream reader ended abnormally");
        }
        let _ = conn.events.send(StreamEvent::Disconnected { code: Some(code) });
        tracing::info!(connection = conn.id, code, "stream disconnected");
    }

    /// Write one control frame.
    ///
    /// # Errors
    ///
    /// [`NetworkError::NotConnected`] without a live connection, otherwise
    /// an encoding or transport error.
    pub async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let sink = self
            .inner
            .lock()
            .connection
            .as_ref()
            .map(|c| Arc::clone(&c.sink))
            .ok_or(NetworkError::NotConnected)?;
        let text = message.to_json()?;
        sink.lock()
            .await
            .send(Message::text(text))
            .await
            .map_err(|e| map_ws_error(&e))
    }

    /// Push every token from `tokens` to the server as a `refresh_token`
    /// frame while connected. Ends when the sender side closes.
    pub fn forward_token_refreshes(&self, mut tokens: broadcast::Receiver<String>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                match tokens.recv().await {
                    Ok(token) => {
                        if client.state() != ConnectionState::Connected {
                            continue;
                        }
                        if let Err(e) = client.send(&OutboundMessage::RefreshToken { token }).await {
                            tracing::warn!(error = %e, "failed to forward refreshed token");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "token forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

async fn read_loop(
    inner: Weak<Inner>,
    id: u64,
    mut source: SplitStream<WsStream>,
    events: broadcast::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    let code = loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            frame = source.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => deliver(&events, text.as_bytes()),
            Some(Ok(Message::Binary(bytes))) => deliver(&events, &bytes),
            Some(Ok(Message::Close(frame))) => break frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(connection = id, error = %e, "stream read failed");
                break None;
            }
            None => break None,
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.release(id);
    }
    tracing::info!(connection = id, code, "stream closed by peer");
    let _ = events.send(StreamEvent::Disconnected { code });
}

fn deliver(events: &broadcast::Sender<StreamEvent>, payload: &[u8]) {
    match InboundMessage::parse(payload) {
        Ok(message) => {
            // No subscribers is not an error.
            let _ = events.send(StreamEvent::Message(message));
        }
        Err(e) => tracing::warn!(error = %e, bytes = payload.len(), "dropping malformed frame"),
    }
}

/// Map a tungstenite failure onto [`NetworkError`].
#[must_use]
pub fn map_ws_error(err: &tungstenite::Error) -> NetworkError {
    use tungstenite::Error;
    match err {
        Error::Url(e) => NetworkError::InvalidUrl(e.to_string()),
        Error::HttpFormat(e) => NetworkError::InvalidUrl(e.to_string()),
        Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => NetworkError::Timeout,
        Error::Io(e) => NetworkError::NoConnection(e.to_string()),
        Error::ConnectionClosed | Error::AlreadyClosed => NetworkError::NotConnected,
        Error::Http(response) => match response.status().as_u16() {
            401 => NetworkError::Unauthorized,
            403 => NetworkError::Forbidden,
            404 => NetworkError::NotFound,
            status @ 400..=499 => NetworkError::ClientError {
                status,
                message: None,
            },
            status @ 500..=599 => NetworkError::ServerError {
                status,
                message: None,
            },
            status => NetworkError::Unknown(format!("unexpected handshake status {status}")),
        },
        Error::Protocol(e) => NetworkError::InvalidMessage(e.to_string()),
        other if other.to_string().to_ascii_lowercase().contains("tls") => {
            NetworkError::SslError(other.to_string())
        }
        other => NetworkError::Unknown(other.to_string()),
    }
}

/// Events of one connection. Ends after the connection's `Disconnected`.
///
/// A subscriber that falls more than `event_buffer` events behind skips the
/// oldest ones.
pub struct EventStream {
    inner: BroadcastStream<StreamEvent>,
}

impl EventStream {
    fn new(rx: broadcast::Receiver<StreamEvent>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
        }
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "stream subscriber lagged");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
