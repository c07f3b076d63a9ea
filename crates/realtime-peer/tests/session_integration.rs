//! End-to-end tests: two sessions on loopback find each other through
//! discovery, connect, exchange frames, and recover from disconnects.
//!
//! Discovery queries are pointed at 127.0.0.1 on a free UDP port instead of
//! the LAN broadcast address, so tests never leave the host and can run in
//! parallel.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Duration;

use realtime_core::{ConnectionState, DiscoveryState, MessageType};
use realtime_peer::{SessionManager, TransportConfig};
use tokio::{io::AsyncReadExt, net::TcpStream, time};

const SERVICE: &str = "_integration._tcp";
const WAIT: Duration = Duration::from_secs(10);

fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind socket");
    socket.local_addr().expect("socket address").port()
}

fn loopback_config(discovery_port: u16, instance: &str) -> TransportConfig {
    TransportConfig {
        instance_name: instance.to_string(),
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        broadcast_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        discovery_port,
        query_interval: Duration::from_millis(100),
        ..Default::default()
    }
}

async fn wait_connected(session: &SessionManager, expected: bool) {
    let mut rx = session.connectivity();
    time::timeout(WAIT, rx.wait_for(|c| *c == expected))
        .await
        .unwrap_or_else(|_| panic!("connectivity never became {expected}"))
        .expect("session alive");
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    time::timeout(WAIT, async {
        while !condition() {
            time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition met in time");
}

/// Starts an advertiser and a browser on the same discovery port and waits
/// until both report connected.
async fn connected_pair() -> (SessionManager, SessionManager) {
    let port = free_udp_port();
    let receiver = SessionManager::new(loopback_config(port, "receiver"));
    let sender = SessionManager::new(loopback_config(port, "sender"));

    receiver.start_advertising(SERVICE);
    eventually(|| receiver.advertise_state() == DiscoveryState::Ready).await;
    sender.start_browsing(SERVICE);

    wait_connected(&sender, true).await;
    wait_connected(&receiver, true).await;
    (receiver, sender)
}

#[tokio::test]
async fn test_browser_discovers_advertiser_and_connects() {
    // Arrange / Act
    let (receiver, sender) = connected_pair().await;

    // Assert
    let results = sender.browse_results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].instance, "receiver");
    assert_eq!(Some(results[0].addr), receiver.advertised_addr());
    assert_eq!(sender.peer_addr(), receiver.advertised_addr());
}

#[tokio::test]
async fn test_frames_flow_in_both_directions() {
    // Arrange
    let (receiver, sender) = connected_pair().await;
    let mut at_receiver = receiver.received_messages();
    let mut at_sender = sender.received_messages();

    // Act
    sender.send(b"abc", MessageType::HevcData).await.expect("send to receiver");
    receiver.send(b"", MessageType::Unknown).await.expect("send to sender");

    // Assert
    let inbound = time::timeout(WAIT, at_receiver.recv()).await.unwrap().unwrap();
    assert_eq!(&*inbound.payload, b"abc");
    assert_eq!(inbound.message_type, MessageType::HevcData);

    let reply = time::timeout(WAIT, at_sender.recv()).await.unwrap().unwrap();
    assert!(reply.payload.is_empty());
    assert_eq!(reply.message_type, MessageType::Unknown);
}

#[tokio::test]
async fn test_many_frames_arrive_in_order() {
    let (receiver, sender) = connected_pair().await;
    let mut inbound = receiver.received_messages();

    for i in 0..200u32 {
        let payload = vec![(i % 256) as u8; (i as usize * 37) % 5000];
        sender.send(&payload, MessageType::HevcData).await.expect("send");
    }

    for i in 0..200u32 {
        let message = time::timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
        assert_eq!(message.payload.len(), (i as usize * 37) % 5000, "frame {i}");
        assert!(message.payload.iter().all(|b| *b == (i % 256) as u8));
    }
}

#[tokio::test]
async fn test_every_subscriber_gets_every_message_and_dropped_ones_are_pruned() {
    // Arrange
    let (receiver, sender) = connected_pair().await;
    let mut first = receiver.received_messages();
    let second = receiver.received_messages();
    assert_eq!(receiver.subscriber_count(), 2);

    // Act
    drop(second);
    sender.send(b"one", MessageType::HevcData).await.unwrap();
    sender.send(b"two", MessageType::HevcData).await.unwrap();

    // Assert
    let a = time::timeout(WAIT, first.recv()).await.unwrap().unwrap();
    let b = time::timeout(WAIT, first.recv()).await.unwrap().unwrap();
    assert_eq!((&*a.payload, &*b.payload), (&b"one"[..], &b"two"[..]));
    assert_eq!(receiver.subscriber_count(), 1);
}

#[tokio::test]
async fn test_remote_disconnect_clears_connectivity_on_both_sides() {
    let (receiver, sender) = connected_pair().await;

    sender.disconnect();

    wait_connected(&sender, false).await;
    wait_connected(&receiver, false).await;
    assert_eq!(sender.connection_state(), Some(ConnectionState::Cancelled));
    assert_eq!(receiver.connection_state(), Some(ConnectionState::Cancelled));
}

#[tokio::test]
async fn test_attempt_to_reconnect_uses_latest_results() {
    // Arrange
    let (receiver, sender) = connected_pair().await;
    sender.disconnect();
    wait_connected(&sender, false).await;
    wait_connected(&receiver, false).await;

    // Act
    sender.attempt_to_reconnect();

    // Assert
    wait_connected(&sender, true).await;
    wait_connected(&receiver, true).await;
    assert_eq!(sender.peer_addr(), receiver.advertised_addr());
}

#[tokio::test]
async fn test_extra_inbound_stream_is_closed_while_connected() {
    // Arrange
    let (receiver, _sender) = connected_pair().await;
    let listener_addr = receiver.advertised_addr().expect("advertising");

    // Act
    let mut intruder = TcpStream::connect(listener_addr).await.expect("tcp connect");

    // Assert: the intruder sees EOF, the existing session is untouched
    let mut buf = [0u8; 1];
    let read = time::timeout(WAIT, intruder.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(receiver.is_connected());
}

#[tokio::test]
async fn test_start_browsing_again_keeps_existing_session() {
    let (receiver, sender) = connected_pair().await;
    let peer = sender.peer_addr();

    sender.start_browsing(SERVICE);
    time::sleep(Duration::from_millis(300)).await;

    assert!(sender.is_connected());
    assert_eq!(sender.peer_addr(), peer);
    assert_eq!(sender.browse_results().len(), 1);
    assert!(receiver.is_connected());
}

#[tokio::test]
async fn test_start_advertising_again_keeps_listener() {
    let port = free_udp_port();
    let receiver = SessionManager::new(loopback_config(port, "receiver"));
    receiver.start_advertising(SERVICE);
    eventually(|| receiver.advertise_state() == DiscoveryState::Ready).await;
    let addr = receiver.advertised_addr();

    receiver.start_advertising(SERVICE);

    assert_eq!(receiver.advertise_state(), DiscoveryState::Ready);
    assert_eq!(receiver.advertised_addr(), addr);
}

#[tokio::test]
async fn test_stop_advertising_withdraws_listener() {
    let port = free_udp_port();
    let receiver = SessionManager::new(loopback_config(port, "receiver"));
    receiver.start_advertising(SERVICE);
    eventually(|| receiver.advertise_state() == DiscoveryState::Ready).await;
    let addr = receiver.advertised_addr().expect("advertising");

    receiver.stop_advertising();
    receiver.stop_advertising();

    assert_eq!(receiver.advertise_state(), DiscoveryState::Idle);
    eventually(|| std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err())
        .await;
}
