use crate::core::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
use crate::core::direct::{DirectSettings, DirectTransport};
use crate::core::packet::Packet;
use crate::core::relay::{RelaySettings, RelayTransport};
use crate::core::transport::{Transport, TransportEvents};
use crate::credentials::CredentialProvider;
use crate::manager::policy::{ReconnectionPolicy, RetryKind};
use crate::reason::CloseReason;
use crate::reconnect::ReconnectionStrategy;
use crate::scheduler::HostScheduler;
use crate::session::SessionListener;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Identifier of one connection attempt
///
/// Tokens only ever advance. Events and async results carrying an older
/// token than the current attempt's are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LaunchToken(u64);

impl LaunchToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Point-in-time snapshot of connection counters
#[derive(Debug, Clone)]
pub struct Metrics {
    pub packets_sent: u64,
    pub frames_received: u64,
    pub reconnect_attempts: u64,
    pub connection_state: ConnectionState,
}

/// How new transports are built
pub(crate) enum TransportPlan {
    Direct(DirectSettings),
    Relay {
        settings: RelaySettings,
        credentials: Arc<dyn CredentialProvider>,
    },
}

/// Everything the builder hands over
pub(crate) struct ManagerParts {
    pub(crate) plan: TransportPlan,
    pub(crate) session: Arc<dyn SessionListener>,
    pub(crate) scheduler: Arc<dyn HostScheduler>,
    pub(crate) strategy: Box<dyn ReconnectionStrategy>,
    pub(crate) runtime: Handle,
    pub(crate) keepalive_message_type: i32,
    pub(crate) passive_interval: Duration,
    pub(crate) passive_window: Duration,
}

struct ActiveTransport {
    token: u64,
    transport: Arc<Transport>,
}

struct Shared {
    plan: TransportPlan,
    session: Arc<dyn SessionListener>,
    scheduler: Arc<dyn HostScheduler>,
    runtime: Handle,
    keepalive_message_type: i32,
    state: AtomicConnectionState,
    metrics: AtomicMetrics,
    /// Token of the newest attempt
    current_token: AtomicU64,
    /// Next token handed out by `mint_launch_token`
    next_token: AtomicU64,
    /// The live transport and the token it was started with
    active: Mutex<Option<ActiveTransport>>,
    /// Serializes connect decisions so at most one transport is started
    connect_lock: Mutex<()>,
    shutdown_requested: AtomicBool,
    configuration_mode: AtomicBool,
    using_fallback: AtomicBool,
    last_reason: Mutex<Option<CloseReason>>,
    policy: ReconnectionPolicy,
}

/// Owner of the connection lifecycle
///
/// Exactly one transport is live while the state is not `Disconnected`.
/// All methods may be called from any thread; none of them blocks on
/// network I/O, although stopping a transport waits for its threads.
///
/// # Example
/// ```ignore
/// let manager = bridgelink::builder()
///     .direct("mac.local:1359")
///     .session(MySession::new())
///     .build()
///     .await?;
///
/// manager.connect();
/// manager.send(Packet::new(MESSAGE_TYPE, payload).on_sent(|| println!("sent")));
/// ```
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub(crate) fn new(parts: ManagerParts) -> Self {
        let ManagerParts {
            plan,
            session,
            scheduler,
            strategy,
            runtime,
            keepalive_message_type,
            passive_interval,
            passive_window,
        } = parts;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            let policy = ReconnectionPolicy::new(
                strategy,
                passive_interval,
                passive_window,
                runtime.clone(),
                Arc::clone(&scheduler),
                move |kind| {
                    if let Some(shared) = weak.upgrade() {
                        shared.reconnect_from_timer(kind);
                    }
                },
            );

            Shared {
                plan,
                session,
                scheduler,
                runtime,
                keepalive_message_type,
                state: AtomicConnectionState::new(ConnectionState::Disconnected),
                metrics: AtomicMetrics::new(),
                current_token: AtomicU64::new(0),
                next_token: AtomicU64::new(1),
                active: Mutex::new(None),
                connect_lock: Mutex::new(()),
                shutdown_requested: AtomicBool::new(false),
                configuration_mode: AtomicBool::new(false),
                using_fallback: AtomicBool::new(false),
                last_reason: Mutex::new(None),
                policy,
            }
        });

        Self { shared }
    }

    /// Start a connection attempt if disconnected
    ///
    /// No-op while connecting or connected. Clears a previous shutdown request.
    pub fn connect(&self) {
        self.shared.shutdown_requested.store(false, Ordering::Release);
        self.shared.connect(None);
    }

    /// Start a connection attempt for `token`
    ///
    /// No-op if the current attempt's token is the same or newer. An older
    /// in-flight attempt is stopped and its late results are discarded.
    pub fn connect_with_launch(&self, token: LaunchToken) {
        self.shared.shutdown_requested.store(false, Ordering::Release);
        self.shared.connect(Some(token));
    }

    /// Mint a token newer than every token seen so far
    pub fn mint_launch_token(&self) -> LaunchToken {
        LaunchToken(self.shared.next_token.fetch_add(1, Ordering::AcqRel))
    }

    /// Stop the active transport and cancel any pending drop retry
    ///
    /// The passive timer keeps running.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Disconnect and stop every reconnection timer until the next `connect()`
    pub fn shutdown(&self) {
        info!("Shutting down connection manager");
        self.shared.shutdown_requested.store(true, Ordering::Release);
        self.shared.disconnect();
        self.shared.policy.cancel_all();
        self.shared.scheduler.cancel_schedule_ping();
    }

    /// Queue a packet on the active transport
    ///
    /// Returns `false` when not connected; the packet's sent notification
    /// still fires.
    pub fn send(&self, packet: Packet) -> bool {
        self.shared.send(packet)
    }

    /// Queue an empty keepalive frame
    pub fn ping(&self) -> bool {
        self.shared
            .send(Packet::new(self.shared.keepalive_message_type, Vec::new()))
    }

    /// React to a connectivity change reported by the host
    ///
    /// Network up resets the drop-retry index and connects; network down
    /// disconnects. Ignored in configuration mode.
    pub fn network_changed(&self, available: bool) {
        if self.shared.configuration_mode.load(Ordering::Acquire) {
            debug!("Ignoring network change in configuration mode");
            return;
        }

        if available {
            info!("Network available, reconnecting");
            self.shared.policy.reset_attempts();
            if self.shared.shutdown_requested.load(Ordering::Acquire) {
                debug!("Shutdown requested, not reconnecting");
                return;
            }
            self.shared.connect(None);
        } else {
            info!("Network lost, disconnecting");
            self.shared.disconnect();
        }
    }

    /// Suppress automatic reconnection while the host is reconfiguring
    pub fn set_configuration_mode(&self, enabled: bool) {
        self.shared.configuration_mode.store(enabled, Ordering::Release);
        if enabled {
            self.shared.policy.cancel_drop_retry();
        }
    }

    /// Register a push token with the relay
    ///
    /// Returns `false` in direct mode or when not connected.
    pub fn register_push_token(&self, token: &str) -> bool {
        match self.shared.connected_transport() {
            Some(transport) => transport.register_push_token(token),
            None => false,
        }
    }

    /// Deregister a push token from the relay
    pub fn unregister_push_token(&self, token: &str) -> bool {
        match self.shared.connected_transport() {
            Some(transport) => transport.unregister_push_token(token),
            None => false,
        }
    }

    /// Read-only view of the connection
    pub fn status(&self) -> StatusHandle {
        StatusHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    #[inline]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable read-only status view
#[derive(Clone)]
pub struct StatusHandle {
    shared: Arc<Shared>,
}

impl StatusHandle {
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// Whether the current direct connection went through the fallback address
    pub fn is_using_fallback(&self) -> bool {
        self.shared.using_fallback.load(Ordering::Acquire)
    }

    /// Reason for the most recent close
    pub fn last_close_reason(&self) -> Option<CloseReason> {
        *self.shared.last_reason.lock()
    }

    /// Token of the newest connection attempt
    pub fn launch_token(&self) -> LaunchToken {
        LaunchToken(self.shared.current_token.load(Ordering::Acquire))
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.shutdown_requested.load(Ordering::Acquire)
    }

    pub fn is_configuration_mode(&self) -> bool {
        self.shared.configuration_mode.load(Ordering::Acquire)
    }

    /// Drop-retry index; zero after a successful connection
    pub fn reconnect_attempt(&self) -> usize {
        self.shared.policy.attempt()
    }

    pub fn has_pending_retry(&self) -> bool {
        self.shared.policy.has_pending_drop_retry()
    }

    pub fn is_passive_reconnection_armed(&self) -> bool {
        self.shared.policy.is_passive_armed()
    }

    pub fn metrics(&self) -> Metrics {
        let metrics = &self.shared.metrics;
        Metrics {
            packets_sent: metrics.messages_sent(),
            frames_received: metrics.messages_received(),
            reconnect_attempts: metrics.reconnect_count(),
            connection_state: self.shared.state.get(),
        }
    }
}

/// Routes one attempt's transport events back to the manager
struct AttemptEvents {
    shared: Weak<Shared>,
    token: u64,
}

impl TransportEvents for AttemptEvents {
    fn on_open(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_open(self.token);
        }
    }

    fn on_message(&self, message_type: i32, payload: Vec<u8>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_message(self.token, message_type, payload);
        }
    }

    fn on_close(&self, reason: CloseReason) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_close(self.token, reason);
        }
    }
}

impl Shared {
    fn connect(self: &Arc<Self>, requested: Option<LaunchToken>) {
        let guard = self.connect_lock.lock();
        let state = self.state.get();

        let token = match requested {
            None => {
                if state != ConnectionState::Disconnected {
                    debug!("Ignoring connect request while {:?}", state);
                    return;
                }
                self.next_token.fetch_add(1, Ordering::AcqRel)
            }
            Some(LaunchToken(token)) => {
                let current = self.current_token.load(Ordering::Acquire);
                if state != ConnectionState::Disconnected && current >= token {
                    debug!(
                        "Ignoring launch token {} while {:?} with token {}",
                        token, state, current
                    );
                    return;
                }
                self.next_token.fetch_max(token.saturating_add(1), Ordering::AcqRel);
                token
            }
        };

        // Advancing the token first makes every event from the old attempt stale
        let previous = {
            let mut active = self.active.lock();
            self.current_token.store(token, Ordering::Release);
            active.take()
        };
        if let Some(previous) = previous {
            info!(
                "Superseding attempt {} with attempt {}",
                previous.token, token
            );
            previous.transport.stop(CloseReason::Superseded);
        }

        let transport = Arc::new(self.create_transport(token));
        let previous_state = {
            let mut active = self.active.lock();
            *active = Some(ActiveTransport {
                token,
                transport: Arc::clone(&transport),
            });
            let previous_state = self.state.get();
            self.state.set(ConnectionState::Connecting);
            previous_state
        };
        self.using_fallback.store(false, Ordering::Release);
        drop(guard);

        // A newer attempt may supersede this one before it starts; the
        // transport then refuses to start
        debug!("Starting connection attempt {}", token);
        if previous_state != ConnectionState::Connecting {
            self.session.on_state_change(ConnectionState::Connecting, None);
        }
        transport.start();
    }

    fn create_transport(self: &Arc<Self>, token: u64) -> Transport {
        let events: Arc<dyn TransportEvents> = Arc::new(AttemptEvents {
            shared: Arc::downgrade(self),
            token,
        });

        match &self.plan {
            TransportPlan::Direct(settings) => {
                Transport::Direct(DirectTransport::new(settings.clone(), events))
            }
            TransportPlan::Relay {
                settings,
                credentials,
            } => Transport::Relay(RelayTransport::new(
                settings.clone(),
                Arc::clone(credentials),
                events,
                self.runtime.clone(),
            )),
        }
    }

    fn disconnect(&self) {
        let transport = self
            .active
            .lock()
            .as_ref()
            .map(|active| Arc::clone(&active.transport));

        if let Some(transport) = transport {
            info!("Disconnect requested");
            transport.stop(CloseReason::Requested);
        }

        // A close that raced ahead of the stop may have scheduled a retry
        self.policy.cancel_drop_retry();
    }

    fn send(&self, packet: Packet) -> bool {
        let transport = match self.connected_transport() {
            Some(transport) => transport,
            None => return false,
        };

        let sent = transport.send(packet);
        if sent {
            self.metrics.increment_sent();
        }
        sent
    }

    fn connected_transport(&self) -> Option<Arc<Transport>> {
        let active = self.active.lock();
        if self.state.get() != ConnectionState::Connected {
            return None;
        }
        active.as_ref().map(|active| Arc::clone(&active.transport))
    }

    fn handle_open(&self, token: u64) {
        let fallback = {
            let active = self.active.lock();
            let transport = match active.as_ref() {
                Some(active) if active.token == token => &active.transport,
                _ => {
                    debug!("Ignoring open from superseded attempt {}", token);
                    return;
                }
            };
            if self
                .state
                .compare_exchange(ConnectionState::Connecting, ConnectionState::Connected)
                .is_err()
            {
                return;
            }
            transport.is_using_fallback()
        };

        self.using_fallback.store(fallback, Ordering::Release);
        if fallback {
            info!("Connected (attempt {}, fallback address)", token);
        } else {
            info!("Connected (attempt {})", token);
        }

        self.policy.on_connected();
        self.scheduler.schedule_ping();
        self.session.on_state_change(ConnectionState::Connected, None);
    }

    fn handle_message(&self, token: u64, message_type: i32, payload: Vec<u8>) {
        if self.current_token.load(Ordering::Acquire) != token || !self.state.is_connected() {
            debug!("Dropping frame type {} from inactive attempt {}", message_type, token);
            return;
        }
        self.metrics.increment_received();
        self.session.on_message(message_type, payload);
    }

    fn handle_close(&self, token: u64, reason: CloseReason) {
        let closed = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(current) if current.token == token => {}
                _ => {
                    debug!("Ignoring close ({}) from superseded attempt {}", reason, token);
                    return;
                }
            }
            self.state.set(ConnectionState::Disconnected);
            active.take()
        };
        drop(closed);

        *self.last_reason.lock() = Some(reason);
        self.scheduler.cancel_schedule_ping();

        if reason.is_silent() {
            info!("Disconnected: {}", reason);
        } else {
            warn!("Disconnected: {}", reason);
        }
        self.session
            .on_state_change(ConnectionState::Disconnected, Some(reason));

        self.schedule_recovery(reason);
    }

    fn schedule_recovery(&self, reason: CloseReason) {
        if self.shutdown_requested.load(Ordering::Acquire) {
            debug!("Shutdown requested, no reconnection scheduled");
            return;
        }

        self.policy.arm_passive();

        if matches!(reason, CloseReason::Requested | CloseReason::Superseded) {
            return;
        }
        if self.configuration_mode.load(Ordering::Acquire) {
            debug!("Configuration mode, skipping drop retry");
            return;
        }
        self.policy.on_drop();
    }

    fn reconnect_from_timer(self: &Arc<Self>, kind: RetryKind) {
        if self.shutdown_requested.load(Ordering::Acquire)
            || self.configuration_mode.load(Ordering::Acquire)
        {
            debug!("Skipping {:?} reconnection", kind);
            return;
        }
        if !self.state.is_disconnected() {
            debug!("Skipping {:?} reconnection while {:?}", kind, self.state.get());
            return;
        }

        debug!("{:?} reconnection firing", kind);
        self.metrics.increment_reconnects();
        self.connect(None);
    }
}
