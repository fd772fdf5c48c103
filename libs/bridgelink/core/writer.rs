//! Outbound writer pipeline
//!
//! # Architecture
//!
//! Every transport owns one writer running on a dedicated OS thread:
//!
//! ```text
//! send() ──> encode ──> Unbounded Channel ──> Writer Thread ──> PacketSink
//!                                              │
//!                                              │ 1. Block for the first frame
//!                                              │ 2. Write it, notify
//!                                              │ 3. Drain whatever is queued
//!                                              │ 4. Flush once
//!                                              └─ repeat until cancelled
//! ```
//!
//! Frames are written in enqueue order, so sent notifications fire in
//! enqueue order too. Cancelling discards the remaining frames; their
//! notifications still fire when the frames are dropped.

use crate::core::packet::SentNotifier;
use crate::reason::CloseReason;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tokio::runtime::RuntimeFlavor;
use tracing::{debug, warn};

/// Destination of encoded frames
pub(crate) trait PacketSink: Send + 'static {
    /// Write one encoded frame, possibly buffered
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Push buffered frames to the peer
    fn flush(&mut self) -> io::Result<()>;

    /// Whether the underlying connection is still believed open
    ///
    /// Write faults on a connection that is already gone are logged and
    /// left for the reader to report.
    fn is_connected(&self) -> bool;

    /// Called once when the writer thread exits
    fn close(&mut self) {}
}

/// An encoded frame waiting for the writer
pub(crate) struct QueuedFrame {
    pub(crate) bytes: Vec<u8>,
    pub(crate) notifier: Option<SentNotifier>,
}

impl QueuedFrame {
    pub(crate) fn new(bytes: Vec<u8>, notifier: Option<SentNotifier>) -> Self {
        Self { bytes, notifier }
    }
}

type FaultHandler = Box<dyn Fn(CloseReason) + Send + 'static>;

/// Handle to a running writer thread
pub(crate) struct WriterPipeline {
    queue_tx: Sender<QueuedFrame>,
    queue_rx: Receiver<QueuedFrame>,
    cancel_tx: Sender<()>,
    cancelled: Arc<AtomicBool>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WriterPipeline {
    /// Start a writer over `sink`
    ///
    /// `on_fault` is called from the writer thread when a write fails on a
    /// connection that still reports itself as connected.
    pub(crate) fn spawn<S, F>(name: &str, sink: S, on_fault: F) -> io::Result<Self>
    where
        S: PacketSink,
        F: Fn(CloseReason) + Send + 'static,
    {
        let (queue_tx, queue_rx) = unbounded();
        let (cancel_tx, cancel_rx) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        let handle = {
            let queue_rx = queue_rx.clone();
            let cancelled = Arc::clone(&cancelled);
            let on_fault: FaultHandler = Box::new(on_fault);
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || writer_loop(sink, queue_rx, cancel_rx, cancelled, on_fault))?
        };

        Ok(Self {
            queue_tx,
            queue_rx,
            cancel_tx,
            cancelled,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a frame; returns `false` once the pipeline is cancelled
    ///
    /// A refused frame is dropped immediately, which fires its notification.
    pub(crate) fn enqueue(&self, frame: QueuedFrame) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        self.queue_tx.send(frame).is_ok()
    }

    /// Ask the writer to stop without waiting for it
    pub(crate) fn request_cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            let _ = self.cancel_tx.try_send(());
        }
    }

    /// Stop the writer and discard queued frames
    ///
    /// Joins the writer thread unless called from it.
    pub(crate) fn cancel(&self) {
        self.request_cancel();

        if std::thread::current().id() == self.thread_id {
            return;
        }

        if let Some(handle) = self.handle.lock().take() {
            join_thread(handle);
        }
        // Anything that raced in after the writer drained its queue
        while self.queue_rx.try_recv().is_ok() {}
    }

    #[cfg(test)]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for WriterPipeline {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Join an OS thread, stepping off the async worker when inside a runtime
pub(crate) fn join_thread(handle: JoinHandle<()>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| {
                let _ = handle.join();
            });
        }
        _ => {
            let _ = handle.join();
        }
    }
}

/// Write one frame and fire its notification
///
/// Returns `false` when the write failed.
fn write_one<S: PacketSink>(sink: &mut S, frame: QueuedFrame, on_fault: &FaultHandler) -> bool {
    let QueuedFrame { bytes, notifier } = frame;
    let result = sink.write_frame(&bytes);
    if let Some(notifier) = notifier {
        notifier.notify();
    }

    match result {
        Ok(()) => true,
        Err(e) => {
            report_fault(sink, e, on_fault);
            false
        }
    }
}

fn report_fault<S: PacketSink>(sink: &S, error: io::Error, on_fault: &FaultHandler) {
    if sink.is_connected() {
        warn!("Write failed, closing connection: {}", error);
        on_fault(CloseReason::ConnectivityFailure);
    } else {
        warn!("Write failed on a closed connection: {}", error);
    }
}

fn writer_loop<S: PacketSink>(
    mut sink: S,
    queue_rx: Receiver<QueuedFrame>,
    cancel_rx: Receiver<()>,
    cancelled: Arc<AtomicBool>,
    on_fault: FaultHandler,
) {
    debug!("Writer thread started");

    'outer: loop {
        let first = select! {
            recv(cancel_rx) -> _ => break,
            recv(queue_rx) -> frame => match frame {
                Ok(frame) => frame,
                Err(_) => break,
            },
        };

        if cancelled.load(Ordering::Acquire) {
            break;
        }

        let mut healthy = write_one(&mut sink, first, &on_fault);

        while healthy {
            if cancelled.load(Ordering::Acquire) {
                break 'outer;
            }
            match queue_rx.try_recv() {
                Ok(frame) => healthy = write_one(&mut sink, frame, &on_fault),
                Err(_) => break,
            }
        }

        if cancelled.load(Ordering::Acquire) {
            break;
        }

        if healthy {
            if let Err(e) = sink.flush() {
                report_fault(&sink, e, &on_fault);
            }
        }
    }

    // Queued frames are dropped unsent; dropping fires their notifications
    let mut discarded = 0usize;
    while queue_rx.try_recv().is_ok() {
        discarded += 1;
    }
    sink.close();
    debug!("Writer thread exiting ({} frames discarded)", discarded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec;
    use crate::core::packet::Packet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct MemorySink {
        written: Arc<Mutex<Vec<u8>>>,
        flushes: Arc<AtomicUsize>,
        fail_writes: Arc<AtomicBool>,
        connected: Arc<AtomicBool>,
    }

    impl PacketSink for MemorySink {
        fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken"));
            }
            self.written.lock().extend_from_slice(frame);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn frame(message_type: i32, payload: &[u8], order: &Arc<Mutex<Vec<i32>>>) -> QueuedFrame {
        let order = Arc::clone(order);
        let packet = Packet::new(message_type, payload.to_vec()).on_sent(move || {
            order.lock().push(message_type);
        });
        let (message_type, payload, notifier) = packet.into_parts();
        QueuedFrame::new(codec::encode_direct(message_type, &payload), notifier)
    }

    fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not met in time");
    }

    #[test]
    fn test_frames_written_in_order() {
        let sink = MemorySink::default();
        sink.connected.store(true, Ordering::SeqCst);
        let writer = WriterPipeline::spawn("test-writer", sink.clone(), |_| {}).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            assert!(writer.enqueue(frame(i, &[i as u8; 3], &order)));
        }

        wait_for(|| order.lock().len() == 20);
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());

        let mut expected = Vec::new();
        for i in 0..20 {
            expected.extend(codec::encode_direct(i, &[i as u8; 3]));
        }
        wait_for(|| sink.flushes.load(Ordering::SeqCst) > 0);
        assert_eq!(*sink.written.lock(), expected);
    }

    #[test]
    fn test_cancel_discards_and_notifies() {
        let sink = MemorySink::default();
        let writer = WriterPipeline::spawn("test-writer", sink, |_| {}).unwrap();
        writer.cancel();
        assert!(writer.is_cancelled());

        let order = Arc::new(Mutex::new(Vec::new()));
        assert!(!writer.enqueue(frame(7, b"late", &order)));
        assert_eq!(*order.lock(), vec![7]);
    }

    #[test]
    fn test_write_fault_on_live_connection_reports() {
        let sink = MemorySink::default();
        sink.connected.store(true, Ordering::SeqCst);
        sink.fail_writes.store(true, Ordering::SeqCst);

        let faults = Arc::new(Mutex::new(Vec::new()));
        let writer = {
            let faults = Arc::clone(&faults);
            WriterPipeline::spawn("test-writer", sink, move |reason| faults.lock().push(reason))
                .unwrap()
        };

        let order = Arc::new(Mutex::new(Vec::new()));
        writer.enqueue(frame(1, b"x", &order));

        wait_for(|| !faults.lock().is_empty());
        assert_eq!(faults.lock()[0], CloseReason::ConnectivityFailure);
        // Notification fires even though the write failed
        assert_eq!(*order.lock(), vec![1]);
    }

    #[test]
    fn test_write_fault_on_dead_connection_is_suppressed() {
        let sink = MemorySink::default();
        sink.fail_writes.store(true, Ordering::SeqCst);

        let faults = Arc::new(AtomicUsize::new(0));
        let writer = {
            let faults = Arc::clone(&faults);
            WriterPipeline::spawn("test-writer", sink, move |_| {
                faults.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };

        let order = Arc::new(Mutex::new(Vec::new()));
        writer.enqueue(frame(1, b"x", &order));
        wait_for(|| order.lock().len() == 1);
        writer.cancel();
        assert_eq!(faults.load(Ordering::SeqCst), 0);
    }
}
