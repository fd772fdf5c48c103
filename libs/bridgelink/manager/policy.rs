//! Reconnection timers
//!
//! Two timers feed the manager's `connect()` path:
//!
//! - **Drop retry**: one pending retry at a time, delay taken from the
//!   reconnection strategy at the current attempt index. The index advances
//!   on every scheduled retry and resets on a successful connection or a
//!   network-up signal.
//! - **Passive retry**: armed after every close, fires every
//!   `interval ± window` until a connection succeeds or shutdown.
//!
//! Both run as tasks on the manager's runtime and are aborted before being
//! rearmed.

use crate::reconnect::ReconnectionStrategy;
use crate::scheduler::HostScheduler;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Which timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryKind {
    Drop,
    Passive,
}

type Trigger = Box<dyn Fn(RetryKind) + Send + Sync + 'static>;

pub(crate) struct ReconnectionPolicy {
    inner: Arc<PolicyInner>,
}

struct PolicyInner {
    strategy: Mutex<Box<dyn ReconnectionStrategy>>,
    attempt: AtomicUsize,
    drop_retry: Mutex<Option<JoinHandle<()>>>,
    passive: Mutex<Option<JoinHandle<()>>>,
    passive_interval: Duration,
    passive_window: Duration,
    runtime: Handle,
    scheduler: Arc<dyn HostScheduler>,
    trigger: Trigger,
}

impl ReconnectionPolicy {
    pub(crate) fn new<F>(
        strategy: Box<dyn ReconnectionStrategy>,
        passive_interval: Duration,
        passive_window: Duration,
        runtime: Handle,
        scheduler: Arc<dyn HostScheduler>,
        trigger: F,
    ) -> Self
    where
        F: Fn(RetryKind) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PolicyInner {
                strategy: Mutex::new(strategy),
                attempt: AtomicUsize::new(0),
                drop_retry: Mutex::new(None),
                passive: Mutex::new(None),
                passive_interval,
                passive_window: passive_window.min(passive_interval),
                runtime,
                scheduler,
                trigger: Box::new(trigger),
            }),
        }
    }

    /// Current drop-retry index
    pub(crate) fn attempt(&self) -> usize {
        self.inner.attempt.load(Ordering::Acquire)
    }

    /// Schedule the next drop retry unless one is already pending
    ///
    /// Returns the delay when a retry was scheduled.
    pub(crate) fn on_drop(&self) -> Option<Duration> {
        let mut pending = self.inner.drop_retry.lock();
        if pending.is_some() {
            debug!("Drop retry already pending");
            return None;
        }

        let attempt = self.inner.attempt.load(Ordering::Acquire);
        let delay = match self.inner.strategy.lock().next_delay(attempt) {
            Some(delay) => delay,
            None => {
                debug!("Drop retries exhausted after {} attempts, passive timer only", attempt);
                return None;
            }
        };
        self.inner.attempt.fetch_add(1, Ordering::AcqRel);

        debug!("Scheduling drop retry {} in {:?}", attempt + 1, delay);
        let weak = Arc::downgrade(&self.inner);
        *pending = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                // Clear our own slot so the retry can schedule its successor
                inner.drop_retry.lock().take();
                (inner.trigger)(RetryKind::Drop);
            }
        }));
        Some(delay)
    }

    /// Arm (or rearm) the passive timer and mirror it onto the host
    pub(crate) fn arm_passive(&self) {
        let mut slot = self.inner.passive.lock();
        if let Some(task) = slot.take() {
            task.abort();
        }

        let weak = Arc::downgrade(&self.inner);
        *slot = Some(self.inner.runtime.spawn(passive_loop(weak)));
        drop(slot);

        self.inner.scheduler.schedule_passive_reconnection();
    }

    /// A connection succeeded: reset the index and stand down both timers
    pub(crate) fn on_connected(&self) {
        self.reset_attempts();
        self.cancel_drop_retry();
        self.cancel_passive();
    }

    /// Network came back: the next drop retry starts from the first delay
    pub(crate) fn reset_attempts(&self) {
        self.inner.attempt.store(0, Ordering::Release);
        self.inner.strategy.lock().reset();
    }

    pub(crate) fn cancel_drop_retry(&self) {
        if let Some(task) = self.inner.drop_retry.lock().take() {
            task.abort();
        }
    }

    pub(crate) fn cancel_passive(&self) {
        let task = self.inner.passive.lock().take();
        if let Some(task) = task {
            task.abort();
        }
        self.inner.scheduler.cancel_schedule_passive_reconnection();
    }

    pub(crate) fn cancel_all(&self) {
        self.cancel_drop_retry();
        self.cancel_passive();
    }

    pub(crate) fn has_pending_drop_retry(&self) -> bool {
        self.inner.drop_retry.lock().is_some()
    }

    pub(crate) fn is_passive_armed(&self) -> bool {
        self.inner.passive.lock().is_some()
    }
}

impl Drop for ReconnectionPolicy {
    fn drop(&mut self) {
        if let Some(task) = self.inner.drop_retry.lock().take() {
            task.abort();
        }
        if let Some(task) = self.inner.passive.lock().take() {
            task.abort();
        }
    }
}

impl PolicyInner {
    fn next_passive_delay(&self) -> Duration {
        jittered(self.passive_interval, self.passive_window)
    }
}

/// A delay uniformly drawn from `interval ± window`
pub(crate) fn jittered(interval: Duration, window: Duration) -> Duration {
    let interval_ms = interval.as_millis() as u64;
    let window_ms = (window.as_millis() as u64).min(interval_ms);
    if window_ms == 0 {
        return interval;
    }
    let millis = rand::thread_rng().gen_range(interval_ms - window_ms..=interval_ms + window_ms);
    Duration::from_millis(millis)
}

async fn passive_loop(weak: Weak<PolicyInner>) {
    loop {
        let delay = match weak.upgrade() {
            Some(inner) => inner.next_passive_delay(),
            None => return,
        };
        debug!("Passive reconnection in {:?}", delay);
        tokio::time::sleep(delay).await;

        match weak.upgrade() {
            Some(inner) => (inner.trigger)(RetryKind::Passive),
            None => return,
        }
    }
}
