//! Direct TCP transport
//!
//! # Threads
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │  Reader Thread           │      │  Writer Thread           │
//! │                          │      │  (see writer.rs)         │
//! │  1. Dial primary         │      │                          │
//! │  2. Dial fallback        │ ───> │  spawned once connected  │
//! │  3. on_open              │      │                          │
//! │  4. read_frame loop      │      └──────────────────────────┘
//! └──────────────────────────┘
//! ```
//!
//! Any fault on either thread, or a local `close()`, ends in exactly one
//! `on_close` event. The dial runs on a small single-threaded runtime owned
//! by the reader thread and races the stop signal, so `close()` can always
//! join the reader.

use crate::core::codec::{self, FrameError};
use crate::core::config::Endpoint;
use crate::core::packet::Packet;
use crate::core::transport::{CloseLatch, TransportEvents};
use crate::core::writer::{join_thread, PacketSink, QueuedFrame, WriterPipeline};
use crate::reason::CloseReason;
use parking_lot::Mutex;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Dial targets and limits for one direct connection attempt
#[derive(Debug, Clone)]
pub(crate) struct DirectSettings {
    pub(crate) primary: Endpoint,
    pub(crate) fallback: Option<Endpoint>,
    pub(crate) connect_timeout: Duration,
    pub(crate) max_packet_allocation: usize,
}

/// Length-prefixed frames over a plain TCP socket
pub(crate) struct DirectTransport {
    inner: Arc<DirectInner>,
}

struct DirectInner {
    settings: DirectSettings,
    events: Arc<dyn TransportEvents>,
    latch: CloseLatch,
    started: AtomicBool,
    using_fallback: AtomicBool,
    connected: Arc<AtomicBool>,
    /// Flipped to `true` on close; an in-flight dial gives up
    stop: watch::Sender<bool>,
    socket: Mutex<Option<TcpStream>>,
    writer: Mutex<Option<WriterPipeline>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl DirectTransport {
    pub(crate) fn new(settings: DirectSettings, events: Arc<dyn TransportEvents>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(DirectInner {
                settings,
                events,
                latch: CloseLatch::default(),
                started: AtomicBool::new(false),
                using_fallback: AtomicBool::new(false),
                connected: Arc::new(AtomicBool::new(false)),
                stop,
                socket: Mutex::new(None),
                writer: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        }
    }

    /// Spawn the reader thread; it dials, then reads until closed
    pub(crate) fn start(&self) {
        if self.inner.latch.is_tripped() || self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        // Held across the spawn so a racing close always finds the handle
        let mut reader = self.inner.reader.lock();
        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("bridgelink-direct-reader".to_string())
            .spawn(move || run_reader(inner));

        match spawned {
            Ok(handle) => {
                *reader = Some(handle);
            }
            Err(e) => {
                drop(reader);
                error!("Failed to spawn reader thread: {}", e);
                self.inner.close(CloseReason::InternalError);
            }
        }
    }

    /// Stop both threads and report `reason`
    ///
    /// Returns once the reader and writer have exited, unless called from
    /// one of them.
    pub(crate) fn close(&self, reason: CloseReason) {
        self.inner.close(reason);
    }

    /// Queue a packet for the writer; `false` if there is no live writer
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

        let frame = QueuedFrame::new(codec::encode_direct(message_type, &payload), notifier);
        match self.inner.writer.lock().as_ref() {
            Some(writer) => writer.enqueue(frame),
            None => false,
        }
    }

    pub(crate) fn is_using_fallback(&self) -> bool {
        self.inner.using_fallback.load(Ordering::Acquire)
    }
}

impl DirectInner {
    fn close(&self, reason: CloseReason) {
        if !self.latch.trip() {
            return;
        }
        debug!("Closing direct connection: {}", reason);
        self.connected.store(false, Ordering::Release);
        self.stop.send_replace(true);

        // Writer is told to stop before the socket goes away; the join
        // waits until the shutdown has unblocked any write in progress
        let writer = self.writer.lock().take();
        if let Some(writer) = &writer {
            writer.request_cancel();
        }

        let socket = self.socket.lock().take();
        if let Some(socket) = &socket {
            let _ = socket.shutdown(Shutdown::Both);
        }

        if let Some(writer) = writer {
            writer.cancel();
        }

        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            if handle.thread().id() != std::thread::current().id() {
                join_thread(handle);
            }
        }

        self.events.on_close(reason);
    }

    /// Dial primary then fallback; `None` on failure or when closed mid-dial
    fn dial(&self) -> Option<TcpStream> {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to build dial runtime: {}", e);
                return None;
            }
        };

        let mut stop = self.stop.subscribe();
        let stream = runtime.block_on(async {
            tokio::select! {
                stream = self.dial_endpoints() => stream,
                _ = stop.wait_for(|stopped| *stopped) => {
                    debug!("Dial abandoned, connection closed");
                    None
                }
            }
        });
        // A resolver lookup may still be running on the blocking pool
        runtime.shutdown_background();
        stream
    }

    async fn dial_endpoints(&self) -> Option<TcpStream> {
        let timeout = self.settings.connect_timeout;

        match connect_endpoint(&self.settings.primary, timeout).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.settings.primary, e);
            }
        }

        let fallback = self.settings.fallback.as_ref()?;
        if self.latch.is_tripped() {
            return None;
        }

        match connect_endpoint(fallback, timeout).await {
            Ok(stream) => {
                info!("Connected using fallback address {}", fallback);
                self.using_fallback.store(true, Ordering::Release);
                Some(stream)
            }
            Err(e) => {
                warn!("Failed to connect to fallback {}: {}", fallback, e);
                None
            }
        }
    }

    /// Publish the socket and writer; `false` if a close raced the dial
    fn install(self: &Arc<Self>, stream: &TcpStream) -> io::Result<bool> {
        let _ = stream.set_nodelay(true);
        let control = stream.try_clone()?;
        let sink = DirectSink {
            stream: BufWriter::new(stream.try_clone()?),
            connected: Arc::clone(&self.connected),
        };

        self.connected.store(true, Ordering::Release);
        let weak: Weak<DirectInner> = Arc::downgrade(self);
        let writer = WriterPipeline::spawn("bridgelink-direct-writer", sink, move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.close(reason);
            }
        })?;

        *self.socket.lock() = Some(control);
        *self.writer.lock() = Some(writer);

        if self.latch.is_tripped() {
            if let Some(socket) = self.socket.lock().take() {
                let _ = socket.shutdown(Shutdown::Both);
            }
            let writer = self.writer.lock().take();
            if let Some(writer) = writer {
                writer.cancel();
            }
            return Ok(false);
        }

        Ok(true)
    }
}

/// Try each resolved address in turn, each bounded by `timeout`
///
/// The stream comes back in blocking mode for the reader and writer threads.
async fn connect_endpoint(endpoint: &Endpoint, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for address in tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port)).await? {
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                let stream = stream.into_std()?;
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => {
                last_error = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timed out connecting to {}", address),
                ))
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", endpoint))
    }))
}

/// Reader thread: dial, announce the connection, then read frames until
/// the socket fails or the transport is closed
fn run_reader(inner: Arc<DirectInner>) {
    let stream = match inner.dial() {
        Some(stream) => stream,
        None => {
            inner.close(CloseReason::ConnectivityFailure);
            return;
        }
    };

    if inner.latch.is_tripped() {
        debug!("Connection closed during dial, dropping socket");
        let _ = stream.shutdown(Shutdown::Both);
        return;
    }

    match inner.install(&stream) {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            error!("Failed to set up connection: {}", e);
            inner.close(CloseReason::ConnectivityFailure);
            return;
        }
    }

    info!("Connected to {}", stream.peer_addr().map(|a| a.to_string()).unwrap_or_default());
    inner.events.on_open();

    let max = inner.settings.max_packet_allocation;
    let mut reader = BufReader::new(stream);
    loop {
        match codec::read_frame(&mut reader, max) {
            Ok(frame) => {
                if inner.latch.is_tripped() {
                    break;
                }
                inner.events.on_message(frame.message_type, frame.payload);
            }
            Err(FrameError::OversizedPacket { declared, max }) => {
                error!("Rejecting packet of {} bytes (max {})", declared, max);
                inner.close(CloseReason::ProtocolError);
                break;
            }
            Err(FrameError::ConnectionClosed) => {
                debug!("Peer closed the connection");
                inner.close(CloseReason::ConnectivityFailure);
                break;
            }
            Err(e) => {
                if !inner.latch.is_tripped() {
                    warn!("Read failed: {}", e);
                }
                inner.close(CloseReason::ConnectivityFailure);
                break;
            }
        }
    }

    debug!("Reader thread exiting");
}

/// Buffered write half handed to the writer pipeline
struct DirectSink {
    stream: BufWriter<TcpStream>,
    connected: Arc<AtomicBool>,
}

impl PacketSink for DirectSink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_all(frame)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
