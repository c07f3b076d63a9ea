//! Transport-level tests: two `Connection`s joined over loopback, one dialled
//! and one adopted from a listener, exercising framing across real sockets.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use realtime_core::{ConnectionState, Frame, MessageType};
use realtime_peer::infrastructure::network::{
    Connection, ConnectionHooks, ConnectionId, StreamSource, TransportConfig, TransportError,
};
use tokio::{net::TcpListener, sync::mpsc, time};

const WAIT: Duration = Duration::from_secs(10);

fn collecting_hooks() -> (ConnectionHooks, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hooks = ConnectionHooks {
        on_frame: Arc::new(move |_: ConnectionId, frame: Frame| {
            let _ = tx.send(frame);
        }),
        on_state: Arc::new(|_: ConnectionId, _: &ConnectionState| {}),
    };
    (hooks, rx)
}

async fn wait_for_state(connection: &Connection, wanted: fn(&ConnectionState) -> bool) {
    let mut rx = connection.subscribe_state();
    time::timeout(WAIT, rx.wait_for(wanted))
        .await
        .expect("state reached in time")
        .expect("connection alive");
}

/// Returns `(dialled, accepted, frames seen by accepted side)`.
async fn joined_pair() -> (Arc<Connection>, Arc<Connection>, mpsc::UnboundedReceiver<Frame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dialled = Connection::new(addr, TransportConfig::default(), ConnectionHooks::noop());
    dialled.open(StreamSource::Dial(addr));
    let (stream, peer) = time::timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    let (hooks, frames) = collecting_hooks();
    let accepted = Connection::new(peer, TransportConfig::default(), hooks);
    accepted.open(StreamSource::Accepted(stream));

    wait_for_state(&dialled, ConnectionState::is_ready).await;
    wait_for_state(&accepted, ConnectionState::is_ready).await;
    (dialled, accepted, frames)
}

#[tokio::test]
async fn test_large_payload_arrives_intact() {
    // Arrange
    let (dialled, _accepted, mut frames) = joined_pair().await;
    let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();

    // Act
    dialled.send(&payload, MessageType::HevcData).await.expect("send");

    // Assert
    let frame = time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(frame.message_type(), MessageType::HevcData);
    assert_eq!(frame.payload, payload);
}

#[tokio::test]
async fn test_concurrent_senders_never_interleave_frames() {
    // Arrange
    let (dialled, _accepted, mut frames) = joined_pair().await;
    let tasks = 8u8;
    let per_task = 25usize;

    // Act: every task sends frames filled with its own byte value
    let mut handles = Vec::new();
    for t in 0..tasks {
        let conn = Arc::clone(&dialled);
        handles.push(tokio::spawn(async move {
            for n in 0..per_task {
                let payload = vec![t; 1000 + n * 97];
                conn.send(&payload, MessageType::HevcData).await.expect("send");
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Assert: each frame is homogeneous and each task's frames keep their order
    let mut last_len = vec![0usize; tasks as usize];
    for _ in 0..(tasks as usize * per_task) {
        let frame = time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
        let owner = frame.payload[0];
        assert!(frame.payload.iter().all(|b| *b == owner), "interleaved frame");
        assert!(frame.payload.len() > last_len[owner as usize]);
        last_len[owner as usize] = frame.payload.len();
    }
}

#[tokio::test]
async fn test_cancel_on_one_side_ends_the_other() {
    let (dialled, accepted, _frames) = joined_pair().await;

    dialled.cancel();

    wait_for_state(&accepted, ConnectionState::is_terminal).await;
    assert_eq!(accepted.state(), ConnectionState::Cancelled);
    assert!(matches!(
        dialled.send(b"late", MessageType::HevcData).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_state_changes_are_reported_in_order() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let hooks = ConnectionHooks {
        on_frame: Arc::new(|_: ConnectionId, _: Frame| {}),
        on_state: Arc::new(move |_: ConnectionId, state: &ConnectionState| {
            record.lock().unwrap().push(state.clone());
        }),
    };
    let conn = Connection::new(addr, TransportConfig::default(), hooks);

    // Act
    conn.open(StreamSource::Dial(addr));
    let _server = listener.accept().await.unwrap();
    wait_for_state(&conn, ConnectionState::is_ready).await;
    conn.cancel();

    // Assert
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Ready,
            ConnectionState::Cancelled
        ]
    );
}

#[tokio::test]
async fn test_dial_to_closed_port_fails() {
    let addr: SocketAddr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let conn = Connection::new(addr, TransportConfig::default(), ConnectionHooks::noop());

    conn.open(StreamSource::Dial(addr));

    wait_for_state(&conn, ConnectionState::is_terminal).await;
    assert!(matches!(conn.state(), ConnectionState::Failed(_)));
}
