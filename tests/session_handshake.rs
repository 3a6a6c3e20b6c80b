//! End-to-end session scenarios driven over a real loopback TCP
//! connection: this crate's `PeerSession` on one end, a hand-rolled
//! peer (raw codec calls over a `TcpStream`) on the other. Covers the
//! numbered scenarios from the session's testable-properties list.

use bgp_session::codec::{self, BgpMessage, DecodeOutcome, KeepaliveMessage, NotificationMessage, OpenMessage};
use bgp_session::{PeerConfig, PeerSession, PeerState, SessionMode, SessionOptions};
use bytes::BytesMut;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const LOCAL_ID: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);
const LOCAL_ASN: u16 = 65001;
const PEER_ID: Ipv4Addr = Ipv4Addr::new(2, 2, 2, 2);
const PEER_ASN: u16 = 65002;

async fn bind_loopback_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind ephemeral port");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn active_config(peer_port: u16, local_hold_time: u16) -> PeerConfig {
    let mut cfg = PeerConfig::new(LOCAL_ID, LOCAL_ASN, PEER_ID, PEER_ASN, SessionMode::Active);
    cfg.peer_port = peer_port;
    cfg.local_hold_time = local_hold_time;
    cfg
}

async fn read_message(stream: &mut TcpStream) -> BgpMessage {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.expect("read from session");
        assert!(n > 0, "session closed the connection unexpectedly");
        buf.extend_from_slice(&chunk[..n]);
        match codec::decode(&buf, None) {
            DecodeOutcome::Message(msg) => return msg,
            DecodeOutcome::Partial { .. } => continue,
            DecodeOutcome::Protocol(p) => panic!("unexpected protocol error from session: {p:?}"),
        }
    }
}

async fn write_message(stream: &mut TcpStream, msg: &BgpMessage) {
    stream.write_all(&msg.encode()).await.expect("write to session");
}

async fn wait_for_state(session: &PeerSession, target: PeerState) {
    timeout(Duration::from_secs(5), async {
        loop {
            if session.state() == target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {target:?}, last seen {:?}", session.state()));
}

/// Drives a fresh Active-mode session through the handshake up to
/// Established, acting as the peer on `stream`. Mirrors scenario 1
/// ("Active handshake success") from the session's testable properties.
async fn establish(
    local_hold_time: u16,
    peer_hold_time: u16,
) -> (std::sync::Arc<PeerSession>, TcpStream, tokio::task::JoinHandle<()>) {
    let (listener, port) = bind_loopback_listener().await;
    let session = PeerSession::with_null_rib(active_config(port, local_hold_time), SessionOptions::default());

    session.start();
    let session = std::sync::Arc::new(session);
    let run_handle = {
        let session = session.clone();
        tokio::spawn(async move {
            session.run().await;
        })
    };

    let (mut peer_stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("timed out waiting for session to connect")
        .expect("accept failed");

    match read_message(&mut peer_stream).await {
        BgpMessage::Open(open) => {
            assert_eq!(open.version, 4);
            assert_eq!(open.my_asn, LOCAL_ASN);
            assert_eq!(open.hold_time, local_hold_time);
            assert_eq!(open.bgp_identifier, u32::from_be_bytes(LOCAL_ID.octets()));
        }
        other => panic!("expected OPEN, got {other:?}"),
    }

    let peer_open = OpenMessage::new(PEER_ASN, peer_hold_time, u32::from_be_bytes(PEER_ID.octets()));
    write_message(&mut peer_stream, &BgpMessage::Open(peer_open)).await;

    wait_for_state(&session, PeerState::OpenConfirm).await;

    match read_message(&mut peer_stream).await {
        BgpMessage::Keepalive(_) => {}
        other => panic!("expected KEEPALIVE, got {other:?}"),
    }

    write_message(&mut peer_stream, &BgpMessage::Keepalive(KeepaliveMessage)).await;
    wait_for_state(&session, PeerState::Established).await;

    (session, peer_stream, run_handle)
}

#[tokio::test]
async fn active_handshake_negotiates_hold_and_keepalive_time() {
    let (session, _peer_stream, run_handle) = establish(90, 60).await;

    let snap = session.inspect();
    assert_eq!(snap.state, PeerState::Established);
    assert_eq!(snap.hold_time, 60);
    assert_eq!(snap.keepalive_time, 20);
    assert_eq!(snap.peer_router_id, u32::from_be_bytes(PEER_ID.octets()));

    run_handle.abort();
}

#[tokio::test]
async fn manual_stop_from_established_sends_cease_and_resets_counter() {
    let (session, mut peer_stream, run_handle) = establish(30, 30).await;

    session.stop();

    match read_message(&mut peer_stream).await {
        BgpMessage::Notification(NotificationMessage { error_code, error_subcode, .. }) => {
            assert_eq!(error_code, 6, "Cease");
            assert_eq!(error_subcode, 0);
        }
        other => panic!("expected NOTIFICATION(Cease), got {other:?}"),
    }

    wait_for_state(&session, PeerState::Idle).await;
    assert_eq!(session.inspect().connect_retry_counter, 0);
    assert_eq!(session.inspect().peer_port, 0);

    run_handle.abort();
}

#[tokio::test]
async fn open_with_bad_peer_as_is_rejected_with_notification() {
    let (listener, port) = bind_loopback_listener().await;
    let session = std::sync::Arc::new(PeerSession::with_null_rib(active_config(port, 90), SessionOptions::default()));
    session.start();

    let run_handle = {
        let session = session.clone();
        tokio::spawn(async move {
            session.run().await;
        })
    };

    let (mut peer_stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("timed out waiting for session to connect")
        .expect("accept failed");

    let _ = read_message(&mut peer_stream).await; // the session's OPEN

    let bad_open = OpenMessage::new(65099, 90, u32::from_be_bytes(PEER_ID.octets()));
    write_message(&mut peer_stream, &BgpMessage::Open(bad_open)).await;

    match read_message(&mut peer_stream).await {
        BgpMessage::Notification(NotificationMessage { error_code, error_subcode, .. }) => {
            assert_eq!(error_code, 2, "OPEN_MESSAGE_ERROR");
            assert_eq!(error_subcode, 2, "BAD_PEER_AS");
        }
        other => panic!("expected NOTIFICATION(2,2), got {other:?}"),
    }

    wait_for_state(&session, PeerState::Idle).await;
    assert_eq!(session.inspect().connect_retry_counter, 1);

    run_handle.abort();
}

#[tokio::test]
async fn hold_timer_expiry_tears_down_established_session() {
    // Short hold/keepalive so the test doesn't wait out the RFC
    // default 90s: the peer simply goes silent after the handshake.
    let (session, _peer_stream, run_handle) = establish(3, 3).await;

    timeout(Duration::from_secs(6), async {
        loop {
            if session.state() == PeerState::Idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("session did not tear down after hold timer expiry");

    assert_eq!(session.inspect().connect_retry_counter, 1);
    assert_eq!(session.inspect().peer_port, 0);

    run_handle.abort();
}
