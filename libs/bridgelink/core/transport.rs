use crate::core::direct::DirectTransport;
use crate::core::packet::Packet;
use crate::core::relay::RelayTransport;
use crate::reason::CloseReason;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle events raised by a transport
///
/// `on_close` fires exactly once per started transport; `on_open` and
/// `on_message` never fire after it.
pub(crate) trait TransportEvents: Send + Sync + 'static {
    fn on_open(&self);

    fn on_message(&self, message_type: i32, payload: Vec<u8>);

    fn on_close(&self, reason: CloseReason);
}

/// One-shot latch guarding the close path
#[derive(Debug, Default)]
pub(crate) struct CloseLatch {
    tripped: AtomicBool,
}

impl CloseLatch {
    /// Returns `true` for the first caller only
    #[inline]
    pub(crate) fn trip(&self) -> bool {
        !self.tripped.swap(true, Ordering::AcqRel)
    }

    #[inline]
    pub(crate) fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }
}

/// The active connection, whichever way it is carried
pub(crate) enum Transport {
    Direct(DirectTransport),
    Relay(RelayTransport),
}

impl Transport {
    pub(crate) fn start(&self) {
        match self {
            Transport::Direct(transport) => transport.start(),
            Transport::Relay(transport) => transport.start(),
        }
    }

    /// Close the connection; the close event reports `reason`
    pub(crate) fn stop(&self, reason: CloseReason) {
        match self {
            Transport::Direct(transport) => transport.close(reason),
            Transport::Relay(transport) => transport.close(reason),
        }
    }

    pub(crate) fn send(&self, packet: Packet) -> bool {
        match self {
            Transport::Direct(transport) => transport.send(packet),
            Transport::Relay(transport) => transport.send(packet),
        }
    }

    pub(crate) fn is_using_fallback(&self) -> bool {
        match self {
            Transport::Direct(transport) => transport.is_using_fallback(),
            Transport::Relay(_) => false,
        }
    }

    pub(crate) fn register_push_token(&self, token: &str) -> bool {
        match self {
            Transport::Direct(_) => false,
            Transport::Relay(transport) => transport.register_push_token(token),
        }
    }

    pub(crate) fn unregister_push_token(&self, token: &str) -> bool {
        match self {
            Transport::Direct(_) => false,
            Transport::Relay(transport) => transport.unregister_push_token(token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_trips_once() {
        let latch = CloseLatch::default();
        assert!(!latch.is_tripped());
        assert!(latch.trip());
        assert!(!latch.trip());
        assert!(latch.is_tripped());
    }
}
