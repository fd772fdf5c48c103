//! # Bridgelink Core
//!
//! Wire framing, transports and configuration for a messaging bridge client.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bridgelink::{ConnectionState, Packet};
//!
//! #[tokio::main]
//! async fn main() -> bridgelink::Result<()> {
//!     let manager = bridgelink::builder()
//!         .direct("192.168.1.20:1359")
//!         .fallback("bridge.example.com")
//!         .session(MySession::new())
//!         .build()
//!         .await?;
//!
//!     manager.connect();
//!
//!     // Once the session sees `ConnectionState::Connected`
//!     manager.send(Packet::new(MESSAGE_TYPE, payload).on_sent(|| tracing::debug!("flushed")));
//!
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod codec;
pub mod config;
pub mod connection_state;
pub(crate) mod direct;
pub mod packet;
pub(crate) mod relay;
pub(crate) mod transport;
pub(crate) mod writer;

// Re-export main types
pub use builder::{states, ConnectionManagerBuilder};
pub use codec::{Frame, FrameError};
pub use config::{BridgeConfig, ConfigError, Endpoint, TransportMode};
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
pub use packet::Packet;

// Re-export traits for convenience
pub use crate::traits::*;
