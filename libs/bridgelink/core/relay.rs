//! Relay WebSocket transport
//!
//! # Lifecycle
//!
//! ```text
//! fetch tokens (joined) ──> WebSocket open (Cookie header)
//!                                  │
//!                                  ├─ handshake deadline armed
//!                                  │
//!                      ConnectionOK ──> on_open, deadline cancelled
//!                      ClientProxy  ──> on_message
//!                      Close(code)  ──> on_close(mapped reason)
//! ```
//!
//! Reads run in a task on the configured runtime. Writes go through the
//! shared writer pipeline on a dedicated OS thread, which drives the
//! WebSocket sink with `Handle::block_on`. Every sink operation races a
//! stop signal, so a peer that stops reading cannot pin the writer once the
//! connection is closing.

use crate::core::codec::{self, envelope};
use crate::core::packet::Packet;
use crate::core::transport::{CloseLatch, TransportEvents};
use crate::core::writer::{PacketSink, QueuedFrame, WriterPipeline};
use crate::credentials::CredentialProvider;
use crate::error::CredentialError;
use crate::reason::CloseReason;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on flushing a close frame when the writer stops
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Endpoint, identity and limits for one relay connection attempt
#[derive(Debug, Clone)]
pub(crate) struct RelaySettings {
    pub(crate) url: String,
    pub(crate) installation_id: String,
    pub(crate) communications_version: u32,
    pub(crate) handshake_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) max_packet_allocation: usize,
}

/// WebSocket tunnel to the relay server
///
/// Cheap to hold; the reader task and writer thread own clones of the
/// shared state.
pub(crate) struct RelayTransport {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    settings: RelaySettings,
    credentials: Arc<dyn CredentialProvider>,
    events: Arc<dyn TransportEvents>,
    runtime: Handle,
    latch: CloseLatch,
    started: AtomicBool,
    open: Arc<AtomicBool>,
    /// Flipped to `true` on close; pending sink operations bail out
    stop: watch::Sender<bool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    writer: Mutex<Option<WriterPipeline>>,
}

impl RelayTransport {
    pub(crate) fn new(
        settings: RelaySettings,
        credentials: Arc<dyn CredentialProvider>,
        events: Arc<dyn TransportEvents>,
        runtime: Handle,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(RelayInner {
                settings,
                credentials,
                events,
                runtime,
                latch: CloseLatch::default(),
                started: AtomicBool::new(false),
                open: Arc::new(AtomicBool::new(false)),
                stop,
                task: Mutex::new(None),
                writer: Mutex::new(None),
            }),
        }
    }

    /// Spawn the reader task; it fetches credentials, dials and reads
    pub(crate) fn start(&self) {
        if self.inner.latch.is_tripped() || self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let task = self.inner.runtime.spawn(run_relay(inner));
        *self.inner.task.lock() = Some(task);
    }

    /// Tear the connection down; the close event reports `reason`
    pub(crate) fn close(&self, reason: CloseReason) {
        self.inner.close(reason);
    }

    /// Queue a proxied packet; `false` until the relay has accepted the connection
    pub(crate) fn send(&self, packet: Packet) -> bool {
        let (message_type, payload, notifier) = packet.into_parts();
        if payload.len() > self.inner.settings.max_packet_allocation {
            warn!(
                "Refusing to send {} byte payload (max {})",
                payload.len(),
                self.inner.settings.max_packet_allocation
            );
            return false;
        }

        let bytes = codec::encode_relay(envelope::CLIENT_PROXY, message_type, &payload);
        self.inner.enqueue(QueuedFrame::new(bytes, notifier))
    }

    /// Ask the relay to start pushing to `token`
    pub(crate) fn register_push_token(&self, token: &str) -> bool {
        let bytes = codec::encode_envelope(envelope::CLIENT_ADD_PUSH_TOKEN, &latin1_bytes(token));
        self.inner.enqueue(QueuedFrame::new(bytes, None))
    }

    /// Ask the relay to stop pushing to `token`
    pub(crate) fn unregister_push_token(&self, token: &str) -> bool {
        let bytes =
            codec::encode_envelope(envelope::CLIENT_REMOVE_PUSH_TOKEN, &latin1_bytes(token));
        self.inner.enqueue(QueuedFrame::new(bytes, None))
    }
}

impl RelayInner {
    fn enqueue(&self, frame: QueuedFrame) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        match self.writer.lock().as_ref() {
            Some(writer) => writer.enqueue(frame),
            None => false,
        }
    }

    fn close(&self, reason: CloseReason) {
        if !self.latch.trip() {
            return;
        }
        debug!("Closing relay connection: {}", reason);
        self.open.store(false, Ordering::Release);

        // Unblock the writer before waiting on it: a stalled peer would
        // otherwise hold it inside a sink write forever
        self.stop.send_replace(true);
        let writer = self.writer.lock().take();
        if let Some(writer) = &writer {
            writer.request_cancel();
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
        }

        if let Some(writer) = writer {
            writer.cancel();
        }

        self.events.on_close(reason);
    }

    /// Handle one binary relay message; `Some` means close with that reason
    fn handle_binary(&self, data: &[u8], established: &mut bool) -> Option<CloseReason> {
        let (envelope_type, body) = match codec::decode_envelope(data) {
            Ok(parts) => parts,
            Err(e) => {
                error!("Malformed relay message: {}", e);
                return Some(CloseReason::ProtocolError);
            }
        };

        match envelope_type {
            envelope::CONNECTION_OK => {
                if !*established {
                    *established = true;
                    self.open.store(true, Ordering::Release);
                    info!("Relay accepted the connection");
                    self.events.on_open();
                }
            }
            envelope::CLIENT_PROXY => {
                if !*established {
                    debug!("Dropping proxied data received before ConnectionOK");
                    return None;
                }
                match codec::decode_relay(body, self.settings.max_packet_allocation) {
                    Ok(frame) => self.events.on_message(frame.message_type, frame.payload),
                    Err(e) => {
                        error!("Malformed proxied frame: {}", e);
                        return Some(CloseReason::ProtocolError);
                    }
                }
            }
            other => {
                debug!("Ignoring relay envelope type {}", other);
            }
        }

        None
    }
}

/// Reader task: credentials, WebSocket open, then the envelope loop
///
/// Every exit path either closes the transport or finds it already closed.
async fn run_relay(inner: Arc<RelayInner>) {
    let (identity, push) = futures::join!(
        inner.credentials.fetch_identity_token(),
        inner.credentials.fetch_push_token()
    );
    let (identity, push) = match (identity, push) {
        (Ok(identity), Ok(push)) => (identity, push),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Unable to fetch relay credentials: {}", e);
            inner.close(credential_close_reason(&e));
            return;
        }
    };

    if inner.latch.is_tripped() {
        return;
    }

    let request = match build_request(&inner.settings, &identity, &push) {
        Ok(request) => request,
        Err(e) => {
            error!("Failed to build relay request: {}", e);
            inner.close(CloseReason::InternalError);
            return;
        }
    };

    let connect = tokio::time::timeout(inner.settings.connect_timeout, connect_async(request));
    let ws_stream = match connect.await {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            warn!("Failed to connect to relay {}: {}", inner.settings.url, e);
            inner.close(CloseReason::ConnectivityFailure);
            return;
        }
        Err(_) => {
            warn!("Timed out connecting to relay {}", inner.settings.url);
            inner.close(CloseReason::ConnectivityFailure);
            return;
        }
    };

    let (write, mut read) = ws_stream.split();
    let sink = RelaySink {
        sink: write,
        runtime: inner.runtime.clone(),
        open: Arc::clone(&inner.open),
        stop: inner.stop.subscribe(),
    };
    let weak: Weak<RelayInner> = Arc::downgrade(&inner);
    let writer = WriterPipeline::spawn("bridgelink-relay-writer", sink, move |reason| {
        if let Some(inner) = weak.upgrade() {
            inner.close(reason);
        }
    });
    match writer {
        Ok(writer) => {
            *inner.writer.lock() = Some(writer);
        }
        Err(e) => {
            error!("Failed to spawn relay writer: {}", e);
            inner.close(CloseReason::InternalError);
            return;
        }
    }

    if inner.latch.is_tripped() {
        let writer = inner.writer.lock().take();
        if let Some(writer) = writer {
            writer.cancel();
        }
        return;
    }

    debug!("WebSocket open, waiting for ConnectionOK");
    let handshake = tokio::time::sleep(inner.settings.handshake_timeout);
    tokio::pin!(handshake);
    let mut established = false;

    loop {
        tokio::select! {
            _ = &mut handshake, if !established => {
                warn!("Relay handshake timed out after {:?}", inner.settings.handshake_timeout);
                inner.close(CloseReason::ConnectivityFailure);
                break;
            }

            message = read.next() => {
                match message {
                    Some(Ok(Message::Binary(data))) => {
                        if let Some(reason) = inner.handle_binary(&data, &mut established) {
                            inner.close(reason);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|frame| CloseReason::from_relay_close_code(u16::from(frame.code)))
                            .unwrap_or(CloseReason::ConnectivityFailure);
                        info!("Relay closed the connection: {}", reason);
                        inner.close(reason);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text, ping and pong carry nothing for the session
                    }
                    Some(Err(e)) => {
                        if !inner.latch.is_tripped() {
                            warn!("Relay read failed: {}", e);
                        }
                        inner.close(CloseReason::ConnectivityFailure);
                        break;
                    }
                    None => {
                        inner.close(CloseReason::ConnectivityFailure);
                        break;
                    }
                }
            }
        }
    }

    debug!("Relay reader exiting");
}

fn credential_close_reason(error: &CredentialError) -> CloseReason {
    match error {
        CredentialError::NotSignedIn => CloseReason::Unauthorized,
        CredentialError::Fetch(_) => CloseReason::InternalError,
    }
}

/// Build the handshake cookie
///
/// Tokens are form-urlencoded; the installation ID is sent as-is.
pub(crate) fn relay_cookie(settings: &RelaySettings, identity_token: &str, push_token: &str) -> String {
    format!(
        "communications={}; isServer=false; installationID={}; idToken={}; fcmToken={}",
        settings.communications_version,
        settings.installation_id,
        url_encode(identity_token),
        url_encode(push_token),
    )
}

fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn build_request(
    settings: &RelaySettings,
    identity_token: &str,
    push_token: &str,
) -> Result<Request, String> {
    let mut request = settings
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;
    let cookie = relay_cookie(settings, identity_token, push_token);
    let value = HeaderValue::from_str(&cookie).map_err(|e| e.to_string())?;
    request.headers_mut().insert(COOKIE, value);
    Ok(request)
}

/// Token bytes as ISO-8859-1; unmappable characters become `?`
pub(crate) fn latin1_bytes(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Write half of the WebSocket, driven from the writer thread
struct RelaySink {
    sink: SplitSink<WsStream, Message>,
    runtime: Handle,
    open: Arc<AtomicBool>,
    stop: watch::Receiver<bool>,
}

fn to_io(error: tokio_tungstenite::tungstenite::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error.to_string())
}

fn closing_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "relay connection closing")
}

impl PacketSink for RelaySink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let message = Message::Binary(frame.to_vec());
        let RelaySink {
            sink, runtime, stop, ..
        } = self;
        runtime.block_on(async {
            tokio::select! {
                result = sink.feed(message) => result.map_err(to_io),
                _ = stop.wait_for(|stopped| *stopped) => Err(closing_error()),
            }
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        let RelaySink {
            sink, runtime, stop, ..
        } = self;
        runtime.block_on(async {
            tokio::select! {
                result = sink.flush() => result.map_err(to_io),
                _ = stop.wait_for(|stopped| *stopped) => Err(closing_error()),
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&mut self) {
        let sink = &mut self.sink;
        let _ = self
            .runtime
            .block_on(async { tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await });
    }
}
