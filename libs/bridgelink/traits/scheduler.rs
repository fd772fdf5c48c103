/// Trait for the host's wake-up scheduler
///
/// The connection manager calls these hooks at lifecycle points; the host
/// backs them with whatever alarm facility the platform offers. The
/// in-process reconnection timers run regardless, so a host that can rely
/// on the process staying alive may use [`NoOpScheduler`].
///
/// # Lifecycle
/// ```text
/// connected ──> schedule_ping()              + cancel_schedule_passive_reconnection()
/// closed    ──> cancel_schedule_ping()       + schedule_passive_reconnection()
/// shutdown  ──> cancel_schedule_ping()       + cancel_schedule_passive_reconnection()
/// ```
///
/// Implementations must cancel any previously armed alarm before arming a
/// new one, so repeated calls never produce duplicate firings.
pub trait HostScheduler: Send + Sync {
    /// Arm the keepalive alarm; when it fires the host calls `ping()`
    fn schedule_ping(&self);

    /// Disarm the keepalive alarm
    fn cancel_schedule_ping(&self);

    /// Arm the passive reconnection alarm
    fn schedule_passive_reconnection(&self);

    /// Disarm the passive reconnection alarm
    fn cancel_schedule_passive_reconnection(&self);
}

/// A scheduler that ignores every hook
pub struct NoOpScheduler;

impl HostScheduler for NoOpScheduler {
    fn schedule_ping(&self) {}

    fn cancel_schedule_ping(&self) {}

    fn schedule_passive_reconnection(&self) {}

    fn cancel_schedule_passive_reconnection(&self) {}
}
