//! Outbound packets and their sent notifications

use std::fmt;

type SentCallback = Box<dyn FnOnce() + Send + 'static>;

/// One outbound frame with an optional sent notification
///
/// The notification fires exactly once: after the frame is handed to the
/// socket, or when the packet is discarded unsent (queue drained on close,
/// send refused because no transport is active).
pub struct Packet {
    message_type: i32,
    payload: Vec<u8>,
    on_sent: Option<SentNotifier>,
}

impl Packet {
    pub fn new(message_type: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
            on_sent: None,
        }
    }

    /// Attach a notification fired once the packet leaves the queue
    pub fn on_sent<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_sent = Some(SentNotifier::new(callback));
        self
    }

    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn into_parts(self) -> (i32, Vec<u8>, Option<SentNotifier>) {
        (self.message_type, self.payload, self.on_sent)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("message_type", &self.message_type)
            .field("len", &self.payload.len())
            .field("has_callback", &self.on_sent.is_some())
            .finish()
    }
}

/// Fires its callback exactly once, on `notify()` or on drop
pub(crate) struct SentNotifier {
    callback: Option<SentCallback>,
}

impl SentNotifier {
    fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub(crate) fn notify(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl Drop for SentNotifier {
    fn drop(&mut self) {
        self.fire();
    }
}
