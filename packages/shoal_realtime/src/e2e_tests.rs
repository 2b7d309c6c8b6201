//! End-to-end tests: the full manager pipeline over real loopback sockets.
//!
//! Each test starts a real tokio-tungstenite server on 127.0.0.1, so
//! connect, reconnect, subscription replay, and dispatch are exercised
//! through the same code paths production uses.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite;

use crate::backoff::Backoff;
use crate::event::EventKind;
use crate::manager::{ConnectionManager, ConnectionStatus, RealtimeConfig};
use crate::room::RoomNotifications;
use crate::token::StaticToken;

/// Outer bound for each async wait in the tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Default)]
struct ServerState {
    /// Text frames received, tagged with the connection ordinal.
    frames: Mutex<Vec<(usize, String)>>,
    /// Senders into the writer task of each live connection.
    peers: Mutex<Vec<mpsc::UnboundedSender<tungstenite::Message>>>,
    connections: AtomicUsize,
}

struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    fn ws_url(&self) -> String {
        // Include a path, as the production ws_url always does
        // (e.g. the default `ws://localhost:8000/ws/rooms/`); the manager
        // appends `?token=...`, and a query with no path is a malformed
        // request target.
        format!("ws://{}/", self.addr)
    }

    /// Push an event frame to every live connection.
    fn push(&self, event: serde_json::Value) {
        let peers = self.state.peers.lock().unwrap();
        for peer in peers.iter() {
            let _ = peer.send(tungstenite::Message::Text(event.to_string().into()));
        }
    }

    fn push_raw(&self, text: &str) {
        let peers = self.state.peers.lock().unwrap();
        for peer in peers.iter() {
            let _ = peer.send(tungstenite::Message::Text(text.to_string().into()));
        }
    }

    /// Close every live connection server-side.
    fn drop_connections(&self) {
        self.state.peers.lock().unwrap().clear();
    }

    /// Frames received on one connection, parsed as JSON.
    fn frames_for(&self, conn: usize) -> Vec<serde_json::Value> {
        self.state
            .frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, text)| serde_json::from_str(text).expect("server received invalid JSON"))
            .collect()
    }

    async fn wait_for_frames(&self, conn: usize, n: usize) -> Vec<serde_json::Value> {
        wait_until(|| {
            let frames = self.frames_for(conn);
            (frames.len() >= n).then_some(frames)
        })
        .await
    }
}

async fn start_server() -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().expect("local addr");
    let state = Arc::new(ServerState::default());
    let accept_state = state.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let conn = accept_state.connections.fetch_add(1, Ordering::SeqCst);
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let (mut sink, mut source) = ws.split();

            // Writer: dropping the sender (drop_connections) closes the
            // socket from the server side.
            let (tx, mut rx) = mpsc::unbounded_channel::<tungstenite::Message>();
            accept_state.peers.lock().unwrap().push(tx);
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if sink.send(msg).await.is_err() {
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            let read_state = accept_state.clone();
            tokio::spawn(async move {
                while let Some(Ok(msg)) = source.next().await {
                    if let tungstenite::Message::Text(text) = msg {
                        read_state
                            .frames
                            .lock()
                            .unwrap()
                            .push((conn, text.to_string()));
                    }
                }
            });
        }
    });

    TestServer { addr, state }
}

/// Poll a condition until it yields a value, bounded by TEST_TIMEOUT.
async fn wait_until<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    timeout(TEST_TIMEOUT, async {
        loop {
            if let Some(value) = probe() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within test timeout")
}

fn fast_config(ws_url: String) -> RealtimeConfig {
    RealtimeConfig {
        ws_url,
        backoff: Backoff {
            base: Duration::from_millis(20),
            cap: Duration::from_millis(100),
            max_attempts: 5,
        },
    }
}

fn new_manager(ws_url: String) -> ConnectionManager {
    ConnectionManager::new(
        fast_config(ws_url),
        Arc::new(StaticToken("test-token".into())),
    )
}

async fn wait_for_status(manager: &ConnectionManager, wanted: ConnectionStatus) {
    let mut status = manager.status();
    timeout(TEST_TIMEOUT, status.wait_for(|s| *s == wanted))
        .await
        .expect("status not reached within test timeout")
        .expect("status channel closed");
}

fn directive_set(frames: &[serde_json::Value]) -> HashSet<(String, String)> {
    frames
        .iter()
        .map(|frame| {
            (
                frame["action"].as_str().expect("action").to_string(),
                frame["room_id"].as_str().expect("room_id").to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn replays_full_subscription_set_after_reconnect() {
    let server = start_server().await;
    let manager = new_manager(server.ws_url());

    // Subscribed while disconnected: deferred until connect.
    manager.subscribe("room-a");
    manager.subscribe("room-b");
    manager.subscribe("room-b");
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    let frames = server.wait_for_frames(0, 2).await;
    assert_eq!(
        directive_set(&frames),
        HashSet::from([
            ("subscribe".to_string(), "room-a".to_string()),
            ("subscribe".to_string(), "room-b".to_string()),
        ])
    );

    // Subscribed while connected: directive goes out immediately.
    manager.subscribe("room-c");
    manager.unsubscribe("room-a");
    server.wait_for_frames(0, 4).await;

    // Server closes the socket; the manager reconnects on its own and
    // replays the whole surviving set, not just the most recent room. The
    // replay frames on the second connection are the proof of reconnect.
    server.drop_connections();
    let frames = server.wait_for_frames(1, 2).await;
    assert_eq!(
        directive_set(&frames),
        HashSet::from([
            ("subscribe".to_string(), "room-b".to_string()),
            ("subscribe".to_string(), "room-c".to_string()),
        ])
    );

    manager.shutdown();
}

#[tokio::test]
async fn dispatches_to_exact_and_wildcard_handlers_once_each() {
    let server = start_server().await;
    let manager = new_manager(server.ws_url());
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    let exact = Arc::new(AtomicUsize::new(0));
    let any = Arc::new(AtomicUsize::new(0));
    let exact_count = exact.clone();
    let exact_id = manager.on(EventKind::NewMessage, move |_| {
        exact_count.fetch_add(1, Ordering::SeqCst);
    });
    let any_count = any.clone();
    manager.on_any(move |_| {
        any_count.fetch_add(1, Ordering::SeqCst);
    });

    server.push(serde_json::json!({
        "type": "new_message", "room_id": "r1", "message_id": "m1"
    }));
    wait_until(|| (exact.load(Ordering::SeqCst) == 1 && any.load(Ordering::SeqCst) == 1).then_some(())).await;

    // A malformed frame is dropped without killing the connection…
    server.push_raw("{definitely not json");
    // …so the next events still arrive. An unknown kind only reaches the
    // wildcard bucket.
    server.push(serde_json::json!({"type": "member_joined", "room_id": "r1"}));
    wait_until(|| (any.load(Ordering::SeqCst) == 2).then_some(())).await;
    assert_eq!(exact.load(Ordering::SeqCst), 1);
    assert!(manager.is_connected());

    // Deregistered handlers never fire again.
    assert!(manager.off(&EventKind::NewMessage, exact_id));
    server.push(serde_json::json!({
        "type": "new_message", "room_id": "r1", "message_id": "m2"
    }));
    wait_until(|| (any.load(Ordering::SeqCst) == 3).then_some(())).await;
    assert_eq!(exact.load(Ordering::SeqCst), 1);

    manager.shutdown();
}

#[tokio::test]
async fn gives_up_after_max_attempts_and_manual_reconnect_resumes() {
    // Bind and immediately free a port so every connect is refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let manager = ConnectionManager::new(
        RealtimeConfig {
            ws_url: format!("ws://{addr}/"),
            backoff: Backoff {
                base: Duration::from_millis(5),
                cap: Duration::from_millis(20),
                max_attempts: 3,
            },
        },
        Arc::new(StaticToken("test-token".into())),
    );
    manager.subscribe("room-a");
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::GaveUp).await;

    // A server comes back, but no automatic attempt remains.
    let listener = tokio::net::TcpListener::bind(addr).await.expect("rebind");
    let state = Arc::new(ServerState::default());
    let accept_state = state.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let conn = accept_state.connections.fetch_add(1, Ordering::SeqCst);
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let (_, mut source) = ws.split();
            let read_state = accept_state.clone();
            tokio::spawn(async move {
                while let Some(Ok(msg)) = source.next().await {
                    if let tungstenite::Message::Text(text) = msg {
                        read_state
                            .frames
                            .lock()
                            .unwrap()
                            .push((conn, text.to_string()));
                    }
                }
            });
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.connections.load(Ordering::SeqCst), 0);

    // Manual reconnect resets the counter and resubscribes.
    manager.reconnect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    assert_eq!(state.connections.load(Ordering::SeqCst), 1);
    wait_until(|| {
        let frames = state.frames.lock().unwrap();
        (!frames.is_empty()).then_some(())
    })
    .await;

    manager.shutdown();
}

#[tokio::test]
async fn send_is_dropped_while_disconnected_and_delivered_while_connected() {
    let server = start_server().await;
    let manager = new_manager(server.ws_url());

    // Dropped with a warning, no queueing, no panic.
    manager.send(&serde_json::json!({"action": "noop"}));

    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    manager.send(&serde_json::json!({"action": "noop", "room_id": "r9"}));

    let frames = server.wait_for_frames(0, 1).await;
    assert_eq!(frames[0]["action"], "noop");
    assert_eq!(frames[0]["room_id"], "r9");

    manager.shutdown();
}

#[tokio::test]
async fn room_adapter_filters_by_room_and_switches_cleanly() {
    let server = start_server().await;
    let manager = new_manager(server.ws_url());
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    let adapter = RoomNotifications::new(manager.clone(), Some("room-a".into()));
    server.wait_for_frames(0, 1).await;
    let latest = adapter.latest();

    // Another room's notification never lands.
    server.push(serde_json::json!({
        "type": "new_message", "room_id": "room-b", "message_id": "mb"
    }));
    server.push(serde_json::json!({
        "type": "new_message", "room_id": "room-a", "message_id": "ma"
    }));
    wait_until(|| {
        latest
            .borrow()
            .as_ref()
            .map(|event| event.message_id.clone())
            .flatten()
    })
    .await;
    assert_eq!(
        latest.borrow().as_ref().and_then(|e| e.message_id.clone()),
        Some("ma".to_string())
    );

    // Switching rooms unsubscribes the old one, clears the latest value,
    // and subscribes the new one.
    adapter.set_room(Some("room-b".into()));
    assert!(latest.borrow().is_none());
    let frames = server.wait_for_frames(0, 3).await;
    assert_eq!(
        directive_set(&frames[1..]),
        HashSet::from([
            ("unsubscribe".to_string(), "room-a".to_string()),
            ("subscribe".to_string(), "room-b".to_string()),
        ])
    );

    server.push(serde_json::json!({
        "type": "new_message", "room_id": "room-b", "message_id": "mb2"
    }));
    wait_until(|| {
        latest
            .borrow()
            .as_ref()
            .and_then(|event| event.message_id.clone())
            .filter(|id| id == "mb2")
    })
    .await;

    // Dropping the adapter unsubscribes its room and detaches the handler.
    drop(adapter);
    let frames = server.wait_for_frames(0, 4).await;
    assert_eq!(
        frames[3],
        serde_json::json!({"action": "unsubscribe", "room_id": "room-b"})
    );
    assert_eq!(manager.subscribed_rooms(), Vec::<String>::new());

    manager.shutdown();
}
