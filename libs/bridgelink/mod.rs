//! # Bridgelink
//!
//! Client connection core for a personal messaging bridge: a length-prefixed
//! frame protocol carried either over a direct TCP socket (with a fallback
//! address) or through a WebSocket relay, plus the state machine and timers
//! that keep the connection alive.
//!
//! ## Features
//!
//! - **Two transports**: Direct TCP with primary/fallback dialing, or relay WebSocket
//! - **Ordered writer**: One writer thread per connection, sent callbacks in order
//! - **Exactly-once close**: Every connection ends in a single close reason
//! - **Type-state builder**: Mode and session listener required at compile time
//! - **Reconnection**: Drop-retry delay table plus a jittered passive timer

pub mod traits;
pub mod core;
pub mod manager;

// Re-export all traits
pub use traits::*;

// Re-export core functionality
pub use self::core::{
    builder, codec, config, connection_state, packet,
    builder::{states, ConnectionManagerBuilder},
    codec::{Frame, FrameError},
    config::{BridgeConfig, ConfigError, Endpoint, TransportMode},
    connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState},
    packet::Packet,
};

// Re-export manager
pub use manager::{ConnectionManager, LaunchToken, Metrics, StatusHandle};

/// Create a new connection manager builder
///
/// # Example
/// ```ignore
/// let manager = bridgelink::builder()
///     .relay(installation_id, AccountCredentials::new())
///     .session(MySession::new())
///     .scheduler(AlarmScheduler::new())
///     .build()
///     .await?;
/// ```
pub fn builder() -> ConnectionManagerBuilder<builder::states::NoMode, builder::states::NoSession> {
    ConnectionManagerBuilder::new()
}
