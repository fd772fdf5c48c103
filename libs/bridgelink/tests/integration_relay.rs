//! Integration tests for the relay WebSocket transport
//!
//! A local tokio-tungstenite server plays the relay: it captures the handshake
//! cookie and scripts envelopes back to the client.

#[macro_use]
mod common;

use bridgelink::codec::{self, envelope};
use bridgelink::{
    CloseReason, ConnectionState, CredentialError, NeverReconnect, Packet, StaticCredentials,
};
use common::{FailingCredentials, MockRelayServer, RecordingSession, RelayConnection, WAIT};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

async fn send_binary(connection: &mut RelayConnection, bytes: Vec<u8>) {
    connection.ws.send(Message::Binary(bytes)).await.unwrap();
}

/// Next binary message from the client, split into envelope type and body
async fn recv_envelope(connection: &mut RelayConnection) -> (i32, Vec<u8>) {
    loop {
        let message = tokio::time::timeout(WAIT, connection.ws.next())
            .await
            .expect("timed out waiting for client data")
            .expect("client closed the stream")
            .unwrap();
        if let Message::Binary(data) = message {
            let (envelope_type, body) = codec::decode_envelope(&data).unwrap();
            return (envelope_type, body.to_vec());
        }
    }
}

async fn connect_established(
    server: &mut MockRelayServer,
    events: &common::SessionEvents,
    manager: &bridgelink::ConnectionManager,
) -> RelayConnection {
    manager.connect();
    let mut connection = server.accept().await;
    send_binary(&mut connection, codec::encode_envelope(envelope::CONNECTION_OK, &[])).await;
    events.wait_for_state(ConnectionState::Connected);
    connection
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_cookie_and_connection_ok() {
    let mut server = MockRelayServer::start().await;
    let (session, events) = RecordingSession::new();

    let manager = bridgelink::builder()
        .relay("install-1", StaticCredentials::new("id token", "push-1"))
        .relay_url(server.ws_url())
        .session(session)
        .reconnect_strategy(NeverReconnect)
        .build()
        .await
        .unwrap();

    manager.connect();
    let mut connection = server.accept().await;
    let cookie = connection.cookie.clone().unwrap();
    verbose_println!("  cookie: {}", cookie);
    assert_eq!(
        cookie,
        "communications=1; isServer=false; installationID=install-1; idToken=id+token; fcmToken=push-1"
    );

    // Not open until the relay says so
    assert_eq!(manager.connection_state(), ConnectionState::Connecting);
    assert!(!manager.send(Packet::new(1, b"early".to_vec())));

    send_binary(&mut connection, codec::encode_envelope(envelope::CONNECTION_OK, &[])).await;
    events.wait_for_state(ConnectionState::Connected);
    assert!(manager.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_proxied_frames_both_directions() {
    let mut server = MockRelayServer::start().await;
    let (session, events) = RecordingSession::new();

    let manager = bridgelink::builder()
        .relay("install-1", StaticCredentials::new("id", "push"))
        .relay_url(server.ws_url())
        .session(session)
        .reconnect_strategy(NeverReconnect)
        .build()
        .await
        .unwrap();

    let mut connection = connect_established(&mut server, &events, &manager).await;

    send_binary(
        &mut connection,
        codec::encode_relay(envelope::CLIENT_PROXY, 5, b"inbound"),
    )
    .await;
    assert_eq!(events.wait_for_message(), (5, b"inbound".to_vec()));

    // Unknown envelopes are ignored
    send_binary(
        &mut connection,
        codec::encode_envelope(envelope::SERVER_NOTIFY_PUSH, b"ignored"),
    )
    .await;

    assert!(manager.send(Packet::new(9, b"outbound".to_vec())));
    let (envelope_type, body) = recv_envelope(&mut connection).await;
    assert_eq!(envelope_type, envelope::CLIENT_PROXY);
    let frame = codec::decode_relay(&body, 1024).unwrap();
    assert_eq!(frame.message_type, 9);
    assert_eq!(frame.payload, b"outbound");
    assert!(manager.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_proxied_data_before_connection_ok_is_dropped() {
    let mut server = MockRelayServer::start().await;
    let (session, events) = RecordingSession::new();

    let manager = bridgelink::builder()
        .relay("install-1", StaticCredentials::new("id", "push"))
        .relay_url(server.ws_url())
        .session(session)
        .reconnect_strategy(NeverReconnect)
        .build()
        .await
        .unwrap();

    manager.connect();
    let mut connection = server.accept().await;
    send_binary(&mut connection, codec::encode_relay(envelope::CLIENT_PROXY, 1, b"early")).await;
    send_binary(&mut connection, codec::encode_envelope(envelope::CONNECTION_OK, &[])).await;
    send_binary(&mut connection, codec::encode_relay(envelope::CLIENT_PROXY, 2, b"late")).await;

    events.wait_for_state(ConnectionState::Connected);
    assert_eq!(events.wait_for_message(), (2, b"late".to_vec()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_token_registration() {
    let mut server = MockRelayServer::start().await;
    let (session, events) = RecordingSession::new();

    let manager = bridgelink::builder()
        .relay("install-1", StaticCredentials::new("id", "push"))
        .relay_url(server.ws_url())
        .session(session)
        .reconnect_strategy(NeverReconnect)
        .build()
        .await
        .unwrap();

    let mut connection = connect_established(&mut server, &events, &manager).await;

    assert!(manager.register_push_token("token-é"));
    let (envelope_type, body) = recv_envelope(&mut connection).await;
    assert_eq!(envelope_type, envelope::CLIENT_ADD_PUSH_TOKEN);
    assert_eq!(body, b"token-\xE9".to_vec());

    assert!(manager.unregister_push_token("token-1"));
    let (envelope_type, body) = recv_envelope(&mut connection).await;
    assert_eq!(envelope_type, envelope::CLIENT_REMOVE_PUSH_TOKEN);
    assert_eq!(body, b"token-1".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_code_maps_to_reason() {
    let mut server = MockRelayServer::start().await;
    let (session, events) = RecordingSession::new();

    let manager = bridgelink::builder()
        .relay("install-1", StaticCredentials::new("id", "push"))
        .relay_url(server.ws_url())
        .session(session)
        .reconnect_strategy(NeverReconnect)
        .build()
        .await
        .unwrap();

    let mut connection = connect_established(&mut server, &events, &manager).await;

    let frame = CloseFrame {
        code: CloseCode::from(4001),
        reason: Cow::Borrowed("full"),
    };
    connection.ws.send(Message::Close(Some(frame))).await.unwrap();

    let reason = events.wait_for_state(ConnectionState::Disconnected);
    assert_eq!(reason, Some(CloseReason::GroupAtCapacity));
    assert!(!reason.map(|reason| reason.is_silent()).unwrap_or(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_envelope_is_protocol_error() {
    let mut server = MockRelayServer::start().await;
    let (session, events) = RecordingSession::new();

    let manager = bridgelink::builder()
        .relay("install-1", StaticCredentials::new("id", "push"))
        .relay_url(server.ws_url())
        .session(session)
        .reconnect_strategy(NeverReconnect)
        .build()
        .await
        .unwrap();

    let mut connection = connect_established(&mut server, &events, &manager).await;
    send_binary(&mut connection, vec![0x00, 0x01]).await;

    let reason = events.wait_for_state(ConnectionState::Disconnected);
    assert_eq!(reason, Some(CloseReason::ProtocolError));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_timeout_is_connectivity_failure() {
    let mut server = MockRelayServer::start().await;
    let (session, events) = RecordingSession::new();

    let manager = bridgelink::builder()
        .relay("install-1", StaticCredentials::new("id", "push"))
        .relay_url(server.ws_url())
        .handshake_timeout_ms(300)
        .session(session)
        .reconnect_strategy(NeverReconnect)
        .build()
        .await
        .unwrap();

    manager.connect();
    let _connection = server.accept().await;

    let reason = events.wait_for_state(ConnectionState::Disconnected);
    assert_eq!(reason, Some(CloseReason::ConnectivityFailure));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_credential_failures_close_before_dialing() {
    let cases = [
        (CredentialError::Fetch("offline".to_string()), CloseReason::InternalError),
        (CredentialError::NotSignedIn, CloseReason::Unauthorized),
    ];

    for (error, expected) in cases {
        let mut server = MockRelayServer::start().await;
        let (session, events) = RecordingSession::new();

        let manager = bridgelink::builder()
            .relay("install-1", FailingCredentials(error))
            .relay_url(server.ws_url())
            .session(session)
            .reconnect_strategy(NeverReconnect)
            .build()
            .await
            .unwrap();

        manager.connect();
        let reason = events.wait_for_state(ConnectionState::Disconnected);
        assert_eq!(reason, Some(expected));
        assert!(server.try_accept(Duration::from_millis(200)).await.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_sends_close_frame() {
    let mut server = MockRelayServer::start().await;
    let (session, events) = RecordingSession::new();

    let manager = bridgelink::builder()
        .relay("install-1", StaticCredentials::new("id", "push"))
        .relay_url(server.ws_url())
        .session(session)
        .reconnect_strategy(NeverReconnect)
        .build()
        .await
        .unwrap();

    let mut connection = connect_established(&mut server, &events, &manager).await;

    manager.disconnect();
    assert_eq!(
        events.wait_for_state(ConnectionState::Disconnected),
        Some(CloseReason::Requested)
    );

    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match connection.ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_completes_when_relay_stops_reading() {
    let mut server = MockRelayServer::start().await;
    let (session, events) = RecordingSession::new();

    let manager = bridgelink::builder()
        .relay("install-1", StaticCredentials::new("id", "push"))
        .relay_url(server.ws_url())
        .session(session)
        .reconnect_strategy(NeverReconnect)
        .build()
        .await
        .unwrap();

    // The relay accepts, then never reads again
    let _connection = connect_established(&mut server, &events, &manager).await;

    let payload = vec![0x42u8; 256 * 1024];
    for i in 0..200 {
        assert!(manager.send(Packet::new(i, payload.clone())));
    }
    // Let the writer fill the socket buffers and block
    tokio::time::sleep(Duration::from_millis(300)).await;

    let manager = Arc::new(manager);
    let stopping = Arc::clone(&manager);
    let started = Instant::now();
    let stopped = tokio::time::timeout(
        Duration::from_secs(10),
        tokio::task::spawn_blocking(move || stopping.disconnect()),
    )
    .await;
    verbose_println!("  disconnect took {:?}", started.elapsed());

    assert!(stopped.is_ok(), "disconnect blocked on a stalled relay");
    assert_eq!(
        events.wait_for_state(ConnectionState::Disconnected),
        Some(CloseReason::Requested)
    );
    assert!(!manager.is_connected());
}
