//! Bridgelink tools
//!
//! Binaries and shared binary helpers built on the `bridgelink` connection
//! library.
//!
//! ## Architecture
//!
//! - **bin_common**: Config path resolution, logging setup, host-side trait
//!   implementations and shutdown handling for binaries
//! - **bridgelink**: Connection library (re-exported from workspace)

// Re-export workspace libraries for convenience
pub use bridgelink;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod session;
    pub mod shutdown;

    pub use cli::{init_tracing, load_bridge_config, load_config_from_env, parse_args, ConfigType};
    pub use session::{EnvCredentials, LoggingSession};
    pub use shutdown::ShutdownManager;
}
