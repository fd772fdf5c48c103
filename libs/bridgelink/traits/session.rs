use crate::core::connection_state::ConnectionState;
use crate::reason::CloseReason;

/// Trait for the session layer sitting above the transport
///
/// Inbound frames and state changes are delivered here.
///
/// **Important**: callbacks run on the transport's reader thread (direct
/// mode) or on a runtime worker (relay mode). They should hand work off
/// quickly and must not call `disconnect()` expecting it to return before
/// the callback does.
///
/// # Example
/// ```ignore
/// struct Session {
///     inbox: crossbeam_channel::Sender<(i32, Vec<u8>)>,
/// }
///
/// impl SessionListener for Session {
///     fn on_message(&self, message_type: i32, payload: Vec<u8>) {
///         let _ = self.inbox.send((message_type, payload));
///     }
///
///     fn on_state_change(&self, state: ConnectionState, reason: Option<CloseReason>) {
///         println!("{:?} ({:?})", state, reason);
///     }
/// }
/// ```
pub trait SessionListener: Send + Sync + 'static {
    /// Handle a decoded inbound frame
    fn on_message(&self, message_type: i32, payload: Vec<u8>);

    /// Handle a connection state change
    ///
    /// `reason` is set when the new state is `Disconnected`.
    fn on_state_change(&self, state: ConnectionState, reason: Option<CloseReason>);
}

/// A session listener that discards everything
pub struct NoOpSession;

impl SessionListener for NoOpSession {
    fn on_message(&self, _message_type: i32, _payload: Vec<u8>) {}

    fn on_state_change(&self, _state: ConnectionState, _reason: Option<CloseReason>) {}
}
