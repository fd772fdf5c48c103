use std::time::Duration;

/// Trait for defining drop-retry strategies
///
/// Implement this trait to control how quickly the client retries after
/// an unexpected disconnection. Exhausting the strategy does not stop
/// reconnection entirely: the passive timer keeps running as a safety net.
pub trait ReconnectionStrategy: Send + Sync {
    /// Get the delay before the next immediate retry
    ///
    /// # Arguments
    /// * `attempt` - The retry index (0-indexed, reset on every successful connection)
    ///
    /// # Returns
    /// * `Some(duration)` - Retry after this long
    /// * `None` - No more immediate retries
    fn next_delay(&self, attempt: usize) -> Option<Duration>;

    /// Reset the strategy state (called after successful connection)
    fn reset(&mut self);

    /// Check if another immediate retry is allowed
    fn should_reconnect(&self, attempt: usize) -> bool;
}

/// Fixed table of drop-retry delays
///
/// Attempt `n` waits `delays[n]`; once the table is exhausted no further
/// immediate retries are scheduled.
#[derive(Debug, Clone)]
pub struct DelayTable {
    delays: Vec<Duration>,
}

impl DelayTable {
    /// Create a strategy from an explicit delay table
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Create a strategy from millisecond values
    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// Number of immediate retries before only the passive timer remains
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

impl Default for DelayTable {
    /// 1 second, 10 seconds, 30 seconds
    fn default() -> Self {
        Self::from_millis(&[1_000, 10_000, 30_000])
    }
}

impl ReconnectionStrategy for DelayTable {
    fn next_delay(&self, attempt: usize) -> Option<Duration> {
        if !self.should_reconnect(attempt) {
            return None;
        }
        let index = attempt.min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied()
    }

    fn reset(&mut self) {
        // Stateless: the attempt index is owned by the reconnection policy
    }

    fn should_reconnect(&self, attempt: usize) -> bool {
        attempt < self.delays.len()
    }
}

/// Never reconnect strategy
///
/// Disables drop-triggered retries; passive and network-triggered
/// reconnection still apply.
#[derive(Debug, Clone)]
pub struct NeverReconnect;

impl ReconnectionStrategy for NeverReconnect {
    fn next_delay(&self, _attempt: usize) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {
        // No state to reset
    }

    fn should_reconnect(&self, _attempt: usize) -> bool {
        false
    }
}
