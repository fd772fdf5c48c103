//! Common test utilities for bridgelink integration tests
//!
//! Scripted bridge and relay servers plus recording implementations of the
//! host-facing traits.

#![allow(dead_code)]

use async_trait::async_trait;
use bridgelink::{
    CloseReason, ConnectionState, CredentialError, CredentialProvider, HostScheduler,
    SessionListener,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::WebSocketStream;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

pub const WAIT: Duration = Duration::from_secs(5);

/// What a [`RecordingSession`] saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    State(ConnectionState, Option<CloseReason>),
    Message(i32, Vec<u8>),
}

/// Session listener that forwards every callback to a channel
pub struct RecordingSession {
    events: Sender<SessionEvent>,
}

impl RecordingSession {
    pub fn new() -> (Self, SessionEvents) {
        let (events, receiver) = unbounded();
        (Self { events }, SessionEvents { receiver })
    }
}

impl SessionListener for RecordingSession {
    fn on_message(&self, message_type: i32, payload: Vec<u8>) {
        let _ = self.events.send(SessionEvent::Message(message_type, payload));
    }

    fn on_state_change(&self, state: ConnectionState, reason: Option<CloseReason>) {
        let _ = self.events.send(SessionEvent::State(state, reason));
    }
}

/// Receiving side of a [`RecordingSession`]
pub struct SessionEvents {
    receiver: Receiver<SessionEvent>,
}

impl SessionEvents {
    pub fn next(&self, timeout: Duration) -> Option<SessionEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Skip events until `state` is reported; returns its close reason
    pub fn wait_for_state(&self, state: ConnectionState) -> Option<CloseReason> {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(SessionEvent::State(seen, reason)) if seen == state => return reason,
                Ok(event) => verbose_println!("  skipping {:?}", event),
                Err(_) => panic!("timed out waiting for {:?}", state),
            }
        }
    }

    /// Wait for the next inbound frame, skipping state changes
    pub fn wait_for_message(&self) -> (i32, Vec<u8>) {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(SessionEvent::Message(message_type, payload)) => return (message_type, payload),
                Ok(_) => continue,
                Err(_) => panic!("timed out waiting for a message"),
            }
        }
    }

    /// Everything received within `window`
    pub fn drain_for(&self, window: Duration) -> Vec<SessionEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(event) => events.push(event),
                Err(_) => return events,
            }
        }
    }
}

/// Scheduler that counts every hook call
#[derive(Clone, Default)]
pub struct RecordingScheduler {
    pub pings_scheduled: Arc<AtomicUsize>,
    pub pings_cancelled: Arc<AtomicUsize>,
    pub passive_scheduled: Arc<AtomicUsize>,
    pub passive_cancelled: Arc<AtomicUsize>,
}

impl HostScheduler for RecordingScheduler {
    fn schedule_ping(&self) {
        self.pings_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_schedule_ping(&self) {
        self.pings_cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn schedule_passive_reconnection(&self) {
        self.passive_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_schedule_passive_reconnection(&self) {
        self.passive_cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

/// Credentials returned after a fixed delay
pub struct SlowCredentials {
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CredentialProvider for SlowCredentials {
    async fn fetch_identity_token(&self) -> Result<String, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok("slow-identity".to_string())
    }

    async fn fetch_push_token(&self) -> Result<String, CredentialError> {
        Ok("slow-push".to_string())
    }
}

/// Credentials that always fail with the given error
pub struct FailingCredentials(pub CredentialError);

#[async_trait]
impl CredentialProvider for FailingCredentials {
    async fn fetch_identity_token(&self) -> Result<String, CredentialError> {
        Err(self.0.clone())
    }

    async fn fetch_push_token(&self) -> Result<String, CredentialError> {
        Ok("push".to_string())
    }
}

/// Blocking TCP server standing in for the bridge
///
/// Accepted sockets are handed to the test, which scripts the exchange with
/// the public codec.
pub struct MockBridgeServer {
    pub addr: SocketAddr,
    accepted: Receiver<TcpStream>,
    accept_count: Arc<AtomicUsize>,
}

impl MockBridgeServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (sender, accepted) = unbounded();
        let accept_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accept_count);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if sender.send(stream).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        eprintln!("Accept error: {}", e);
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            accepted,
            accept_count,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn accept(&self) -> TcpStream {
        let stream = self
            .accepted
            .recv_timeout(WAIT)
            .expect("client never connected");
        stream.set_read_timeout(Some(WAIT)).unwrap();
        stream
    }

    pub fn accept_count(&self) -> usize {
        self.accept_count.load(Ordering::SeqCst)
    }
}

/// A local address with nothing listening on it
pub fn refused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// One accepted relay WebSocket and the Cookie header it was opened with
pub struct RelayConnection {
    pub cookie: Option<String>,
    pub ws: WebSocketStream<tokio::net::TcpStream>,
}

/// WebSocket server standing in for the relay
pub struct MockRelayServer {
    pub addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<RelayConnection>,
}

impl MockRelayServer {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (sender, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let sender = sender.clone();
                tokio::spawn(async move {
                    let mut cookie = None;
                    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                        cookie = request
                            .headers()
                            .get("cookie")
                            .and_then(|value| value.to_str().ok())
                            .map(str::to_string);
                        Ok(response)
                    };
                    match tokio_tungstenite::accept_hdr_async(stream, callback).await {
                        Ok(ws) => {
                            let _ = sender.send(RelayConnection { cookie, ws });
                        }
                        Err(e) => eprintln!("WebSocket handshake failed: {}", e),
                    }
                });
            }
        });

        Self { addr, accepted }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn accept(&mut self) -> RelayConnection {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("client never connected")
            .expect("relay server stopped")
    }

    /// Whether a connection arrives within `window`
    pub async fn try_accept(&mut self, window: Duration) -> Option<RelayConnection> {
        tokio::time::timeout(window, self.accepted.recv())
            .await
            .ok()
            .flatten()
    }
}
