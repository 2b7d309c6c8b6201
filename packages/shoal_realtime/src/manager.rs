//! ConnectionManager: the one multiplexed notification socket.
//!
//! Created once per authenticated session and torn down on logout. Owns
//! the socket lifecycle — token-authenticated connect, bounded exponential
//! reconnect, manual recovery after giving up — plus the room subscription
//! set (replayed in full on every successful connect) and event dispatch
//! into the handler registry. No other component touches the socket.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::event::{Directive, Event, EventKind};
use crate::registry::{HandlerId, HandlerRegistry};
use crate::token::TokenSource;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Socket endpoint; the access token is appended as a query credential.
    pub ws_url: String,
    pub backoff: Backoff,
}

impl RealtimeConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            backoff: Backoff::default(),
        }
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Automatic retries exhausted; only [`ConnectionManager::reconnect`]
    /// resumes.
    GaveUp,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

/// Writer channel capacity. The subscribe burst on reconnect is the
/// largest producer.
const OUTBOUND_CAPACITY: usize = 64;

struct ConnState {
    status: ConnectionStatus,
    /// Automatic reconnect attempts made since the last successful connect.
    attempts: u32,
    /// Sender into the live socket's writer task, if any.
    outbound: Option<mpsc::Sender<tungstenite::Message>>,
    /// Cancels the live socket's reader and writer tasks.
    socket_cancel: Option<CancellationToken>,
    /// Cancels a scheduled backoff retry.
    retry_cancel: Option<CancellationToken>,
    /// Bumped on every connect, manual reconnect, and shutdown so tasks of
    /// an orphaned socket cannot clobber the state of a newer one.
    epoch: u64,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: RealtimeConfig,
    tokens: Arc<dyn TokenSource>,
    conn: Mutex<ConnState>,
    subscriptions: Mutex<HashSet<String>>,
    registry: HandlerRegistry,
    status_tx: watch::Sender<ConnectionStatus>,
    /// Manager lifetime; cancelled exactly once, by `shutdown`.
    cancel: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: RealtimeConfig, tokens: Arc<dyn TokenSource>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                tokens,
                conn: Mutex::new(ConnState {
                    status: ConnectionStatus::Disconnected,
                    attempts: 0,
                    outbound: None,
                    socket_cancel: None,
                    retry_cancel: None,
                    epoch: 0,
                }),
                subscriptions: Mutex::new(HashSet::new()),
                registry: HandlerRegistry::new(),
                status_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Open the socket. A no-op when a connection is already open or being
    /// opened; safe to call concurrently.
    pub async fn connect(&self) {
        ManagerInner::connect(self.inner.clone()).await;
    }

    /// Force the current socket closed, reset the attempt counter, and
    /// connect immediately. The user-triggered escape hatch after the
    /// manager has given up.
    pub async fn reconnect(&self) {
        {
            let mut conn = self.inner.conn.lock().unwrap();
            if let Some(retry) = conn.retry_cancel.take() {
                retry.cancel();
            }
            if let Some(socket) = conn.socket_cancel.take() {
                socket.cancel();
            }
            conn.outbound = None;
            conn.attempts = 0;
            conn.status = ConnectionStatus::Disconnected;
            conn.epoch += 1;
        }
        self.inner
            .status_tx
            .send_replace(ConnectionStatus::Disconnected);
        info!("manual reconnect");
        ManagerInner::connect(self.inner.clone()).await;
    }

    /// Add a room to the subscription set. Idempotent; when connected the
    /// directive goes out immediately, otherwise it is replayed on the
    /// next successful connect.
    pub fn subscribe(&self, room_id: &str) {
        if room_id.is_empty() {
            return;
        }
        if self
            .inner
            .subscriptions
            .lock()
            .unwrap()
            .insert(room_id.to_string())
        {
            debug!(room_id, "subscribed");
        }
        self.inner.try_send_directive(&Directive::subscribe(room_id));
    }

    /// Remove a room from the subscription set. Idempotent; the directive
    /// is only sent while connected.
    pub fn unsubscribe(&self, room_id: &str) {
        if room_id.is_empty() {
            return;
        }
        if self.inner.subscriptions.lock().unwrap().remove(room_id) {
            debug!(room_id, "unsubscribed");
        }
        self.inner
            .try_send_directive(&Directive::unsubscribe(room_id));
    }

    /// The current subscription set.
    pub fn subscribed_rooms(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.registry.on(kind, handler)
    }

    /// Register a wildcard handler invoked for every event.
    pub fn on_any<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.registry.on_any(handler)
    }

    /// Remove a handler. Unknown ids are a no-op.
    pub fn off(&self, kind: &EventKind, id: HandlerId) -> bool {
        self.inner.registry.off(kind, id)
    }

    /// Remove a wildcard handler. Unknown ids are a no-op.
    pub fn off_any(&self, id: HandlerId) -> bool {
        self.inner.registry.off_any(id)
    }

    /// Serialize and transmit a payload, only while connected. There is no
    /// queueing: a payload sent while disconnected is dropped with a
    /// warning.
    pub fn send<T: Serialize>(&self, payload: &T) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "unserializable payload dropped");
                return;
            }
        };
        if !self.inner.try_send_text(json) {
            warn!("not connected; outbound payload dropped");
        }
    }

    /// Watch the connection state; the receiver starts at the current
    /// value.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.lock().unwrap().status.is_connected()
    }

    /// Tear the manager down: close the socket and cancel any pending
    /// reconnect timer. Called on logout or token loss; safe to call more
    /// than once.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        {
            let mut conn = self.inner.conn.lock().unwrap();
            if let Some(retry) = conn.retry_cancel.take() {
                retry.cancel();
            }
            if let Some(socket) = conn.socket_cancel.take() {
                socket.cancel();
            }
            conn.outbound = None;
            conn.status = ConnectionStatus::Disconnected;
            conn.epoch += 1;
        }
        self.inner
            .status_tx
            .send_replace(ConnectionStatus::Disconnected);
        info!("realtime manager shut down");
    }
}

impl ManagerInner {
    async fn connect(inner: Arc<Self>) {
        if inner.cancel.is_cancelled() {
            return;
        }

        // Idempotence under concurrent calls: the status flips to
        // Connecting under the lock, so only one caller proceeds.
        let epoch = {
            let mut conn = inner.conn.lock().unwrap();
            match conn.status {
                ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                    debug!("already connected or connecting");
                    return;
                }
                ConnectionStatus::Disconnected | ConnectionStatus::GaveUp => {}
            }
            conn.status = ConnectionStatus::Connecting;
            conn.epoch += 1;
            conn.epoch
        };
        inner.status_tx.send_replace(ConnectionStatus::Connecting);

        let Some(token) = inner.tokens.access_token() else {
            warn!("no access token; staying disconnected");
            let mut conn = inner.conn.lock().unwrap();
            if conn.epoch == epoch {
                conn.status = ConnectionStatus::Disconnected;
                drop(conn);
                inner
                    .status_tx
                    .send_replace(ConnectionStatus::Disconnected);
            }
            return;
        };

        let url = format!("{}?token={}", inner.config.ws_url, token);
        debug!(endpoint = %inner.config.ws_url, "connecting");
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => Self::install(inner, epoch, stream).await,
            Err(err) => {
                warn!(error = %err, "connect failed");
                Self::handle_close(inner, epoch).await;
            }
        }
    }

    /// Wire up a freshly opened socket: writer and reader tasks, status
    /// flip, and the full subscription replay.
    fn install(
        inner: Arc<Self>,
        epoch: u64,
        stream: WsStream,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
        let (mut sink, mut source) = stream.split();
        let socket_cancel = inner.cancel.child_token();
        let (outbound_tx, mut outbound_rx) =
            mpsc::channel::<tungstenite::Message>(OUTBOUND_CAPACITY);

        {
            let mut conn = inner.conn.lock().unwrap();
            if conn.epoch != epoch || inner.cancel.is_cancelled() {
                // A manual reconnect or shutdown raced the handshake;
                // dropping the stream closes the orphan socket.
                debug!("discarding stale socket");
                return;
            }
            conn.status = ConnectionStatus::Connected;
            conn.attempts = 0;
            conn.outbound = Some(outbound_tx.clone());
            conn.socket_cancel = Some(socket_cancel.clone());
            conn.retry_cancel = None;
        }
        inner.status_tx.send_replace(ConnectionStatus::Connected);
        info!("connected");

        // Writer task: drain the channel into the sink.
        let writer_cancel = socket_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.close().await;
                        break;
                    }
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(err) = sink.send(msg).await {
                                warn!(error = %err, "socket write failed");
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }
            }
        });

        // Replay the full subscription set — rooms subscribed while
        // disconnected included, not just the one active at disconnect.
        let rooms: Vec<String> = {
            let subscriptions = inner.subscriptions.lock().unwrap();
            subscriptions.iter().cloned().collect()
        };
        for room_id in rooms {
            let directive = Directive::subscribe(&room_id);
            match serde_json::to_string(&directive) {
                Ok(json) => {
                    if outbound_tx.send(tungstenite::Message::Text(json.into())).await.is_err() {
                        break;
                    }
                    debug!(room_id = %room_id, "resubscribed");
                }
                Err(err) => warn!(error = %err, "directive serialization failed"),
            }
        }

        // Reader task: frames in, dispatch out. Exiting the loop means the
        // connection closed for a reason other than our own cancellation.
        let reader_inner = inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = socket_cancel.cancelled() => return,
                    frame = source.next() => match frame {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            reader_inner.handle_frame(&text);
                        }
                        Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_))) => {
                            // Answered by the protocol layer.
                        }
                        Some(Ok(tungstenite::Message::Binary(_) | tungstenite::Message::Frame(_))) => {
                            debug!("ignoring non-text frame");
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            debug!(?frame, "server closed the socket");
                            break;
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "socket read failed");
                            break;
                        }
                        None => break,
                    }
                }
            }
            Self::handle_close(reader_inner, epoch).await;
        });
        })
    }

    fn handle_frame(&self, text: &str) {
        match Event::parse(text) {
            Ok(event) => {
                debug!(kind = %event.kind, "event received");
                self.registry.dispatch(&event);
            }
            // Malformed frames are dropped; the connection is unaffected.
            Err(err) => warn!(error = %err, "dropping malformed frame"),
        }
    }

    /// The socket is gone: mark the manager disconnected and schedule a
    /// backoff retry, or give up once the attempts are spent.
    fn handle_close(
        inner: Arc<Self>,
        epoch: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
        if inner.cancel.is_cancelled() {
            return;
        }
        let attempts = {
            let mut conn = inner.conn.lock().unwrap();
            if conn.epoch != epoch {
                // A newer socket owns the state; this close belongs to an
                // orphan.
                return;
            }
            conn.outbound = None;
            conn.socket_cancel = None;
            let attempts = conn.attempts;
            if inner.config.backoff.exhausted(attempts) {
                conn.status = ConnectionStatus::GaveUp;
            } else {
                conn.status = ConnectionStatus::Disconnected;
                conn.attempts += 1;
            }
            attempts
        };

        if inner.config.backoff.exhausted(attempts) {
            inner.status_tx.send_replace(ConnectionStatus::GaveUp);
            error!(attempts, "reconnect attempts exhausted; waiting for manual reconnect");
            return;
        }
        inner
            .status_tx
            .send_replace(ConnectionStatus::Disconnected);

        let delay = inner.config.backoff.delay(attempts);
        info!(
            attempt = attempts + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let retry_cancel = inner.cancel.child_token();
        {
            let mut conn = inner.conn.lock().unwrap();
            if let Some(previous) = conn.retry_cancel.replace(retry_cancel.clone()) {
                previous.cancel();
            }
        }
        let retry_inner = inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = retry_cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => Self::connect(retry_inner).await,
            }
        });
        })
    }

    /// Send a directive if currently connected; otherwise the subscription
    /// set alone carries the intent until the next connect.
    fn try_send_directive(&self, directive: &Directive) {
        match serde_json::to_string(directive) {
            Ok(json) => {
                self.try_send_text(json);
            }
            Err(err) => warn!(error = %err, "directive serialization failed"),
        }
    }

    fn try_send_text(&self, json: String) -> bool {
        let outbound = {
            let conn = self.conn.lock().unwrap();
            match conn.status {
                ConnectionStatus::Connected => conn.outbound.clone(),
                _ => None,
            }
        };
        let Some(tx) = outbound else {
            return false;
        };
        if let Err(err) = tx.try_send(tungstenite::Message::Text(json.into())) {
            warn!(error = %err, "outbound channel full; frame dropped");
            return false;
        }
        true
    }
}
