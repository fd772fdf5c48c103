pub mod states;

use crate::core::config::{BridgeConfig, TransportMode};
use crate::core::direct::DirectSettings;
use crate::core::relay::RelaySettings;
use crate::manager::manager::{ConnectionManager, ManagerParts, TransportPlan};
use crate::traits::*;
use states::*;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::info;

/// Type-state builder for [`ConnectionManager`]
///
/// A transport mode (`direct`, `relay` or `config`) and a session listener
/// must be chosen before `build()` becomes available.
pub struct ConnectionManagerBuilder<M, S>
where
    M: ModeState,
    S: SessionState,
{
    _state: TypeState<M, S>,
    config: BridgeConfig,
    session: Option<Arc<dyn SessionListener>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    scheduler: Option<Arc<dyn HostScheduler>>,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    runtime: Option<Handle>,
}

impl ConnectionManagerBuilder<NoMode, NoSession> {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            _state: TypeState::new(),
            config: BridgeConfig::default(),
            session: None,
            credentials: None,
            scheduler: None,
            reconnect_strategy: None,
            runtime: None,
        }
    }
}

impl Default for ConnectionManagerBuilder<NoMode, NoSession> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, S> ConnectionManagerBuilder<M, S>
where
    M: ModeState,
    S: SessionState,
{
    fn transition<M2, S2>(self) -> ConnectionManagerBuilder<M2, S2>
    where
        M2: ModeState,
        S2: SessionState,
    {
        ConnectionManagerBuilder {
            _state: TypeState::new(),
            config: self.config,
            session: self.session,
            credentials: self.credentials,
            scheduler: self.scheduler,
            reconnect_strategy: self.reconnect_strategy,
            runtime: self.runtime,
        }
    }

    /// Host timer hooks; defaults to [`NoOpScheduler`]
    pub fn scheduler(mut self, scheduler: impl HostScheduler + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Identity and push token source for relay mode
    pub fn credentials(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.credentials = Some(Arc::new(provider));
        self
    }

    /// Replace the drop-retry delays taken from the configuration
    pub fn reconnect_strategy(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnect_strategy = Some(Box::new(strategy));
        self
    }

    /// Runtime that hosts relay tasks and reconnection timers
    ///
    /// Defaults to the runtime `build()` is awaited on.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

// Mode selection
impl<S> ConnectionManagerBuilder<NoMode, S>
where
    S: SessionState,
{
    /// Connect directly to `address` (`host` or `host:port`)
    pub fn direct(mut self, address: impl Into<String>) -> ConnectionManagerBuilder<HasMode, S> {
        self.config = BridgeConfig::direct(address);
        self.transition()
    }

    /// Connect through the relay as `installation_id`
    pub fn relay(
        mut self,
        installation_id: impl Into<String>,
        credentials: impl CredentialProvider + 'static,
    ) -> ConnectionManagerBuilder<HasMode, S> {
        self.config = BridgeConfig::relay(installation_id);
        self.credentials = Some(Arc::new(credentials));
        self.transition()
    }

    /// Take mode, endpoints and limits from a loaded configuration
    pub fn config(mut self, config: BridgeConfig) -> ConnectionManagerBuilder<HasMode, S> {
        self.config = config;
        self.transition()
    }
}

// Session setting
impl<M> ConnectionManagerBuilder<M, NoSession>
where
    M: ModeState,
{
    pub fn session(
        mut self,
        listener: impl SessionListener,
    ) -> ConnectionManagerBuilder<M, HasSession> {
        self.session = Some(Arc::new(listener));
        self.transition()
    }
}

// Settings that refine the chosen mode
impl<S> ConnectionManagerBuilder<HasMode, S>
where
    S: SessionState,
{
    /// Secondary address tried when the primary cannot be reached
    pub fn fallback(mut self, address: impl Into<String>) -> Self {
        self.config.direct.fallback = Some(address.into());
        self
    }

    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.config.relay.url = url.into();
        self
    }

    pub fn max_packet_allocation(mut self, bytes: usize) -> Self {
        self.config.max_packet_allocation = bytes;
        self
    }

    pub fn keepalive_message_type(mut self, message_type: i32) -> Self {
        self.config.keepalive_message_type = message_type;
        self
    }

    /// Reconnection delays and passive window, in milliseconds
    pub fn reconnect_delays(mut self, drop_delays_ms: &[u64]) -> Self {
        self.config.reconnect.drop_delays_ms = drop_delays_ms.to_vec();
        self
    }

    pub fn passive_reconnection(mut self, interval_ms: u64, window_ms: u64) -> Self {
        self.config.reconnect.passive_interval_ms = interval_ms;
        self.config.reconnect.passive_window_ms = window_ms;
        self
    }

    pub fn connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.direct.connect_timeout_ms = timeout_ms;
        self.config.relay.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn handshake_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.relay.handshake_timeout_ms = timeout_ms;
        self
    }
}

// Build method - only available when all required fields are set
impl ConnectionManagerBuilder<HasMode, HasSession> {
    pub async fn build(self) -> Result<ConnectionManager> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| {
                BridgeError::Configuration(format!("no tokio runtime available: {}", e))
            })?,
        };

        let config = self.config;
        let plan = match config.mode {
            TransportMode::Direct => {
                let settings = DirectSettings {
                    primary: config.direct.primary_endpoint()?,
                    fallback: config.direct.fallback_endpoint()?,
                    connect_timeout: config.direct.connect_timeout(),
                    max_packet_allocation: config.max_packet_allocation,
                };
                info!(
                    "Direct mode: primary {}, fallback {}",
                    settings.primary,
                    settings
                        .fallback
                        .as_ref()
                        .map(|endpoint| endpoint.to_string())
                        .unwrap_or_else(|| "none".to_string())
                );
                TransportPlan::Direct(settings)
            }
            TransportMode::Relay => {
                if runtime.runtime_flavor() == RuntimeFlavor::CurrentThread {
                    return Err(BridgeError::Configuration(
                        "relay mode requires a multi-threaded tokio runtime".to_string(),
                    ));
                }
                let settings = RelaySettings {
                    url: config.relay.url.clone(),
                    installation_id: config.relay.installation_id.clone(),
                    communications_version: config.relay.communications_version,
                    handshake_timeout: config.relay.handshake_timeout(),
                    connect_timeout: config.relay.connect_timeout(),
                    max_packet_allocation: config.max_packet_allocation,
                };
                info!("Relay mode: {}", settings.url);
                TransportPlan::Relay {
                    settings,
                    credentials: self
                        .credentials
                        .unwrap_or_else(|| Arc::new(NoCredentials)),
                }
            }
        };

        let session = self
            .session
            .ok_or_else(|| BridgeError::Configuration("session listener must be set".to_string()))?;

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| Box::new(config.reconnect.delay_table()));

        Ok(ConnectionManager::new(ManagerParts {
            plan,
            session,
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(NoOpScheduler)),
            strategy,
            runtime,
            keepalive_message_type: config.keepalive_message_type,
            passive_interval: config.reconnect.passive_interval(),
            passive_window: config.reconnect.passive_window(),
        }))
    }
}
