//! Background eviction of idle client buckets.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::registry::ClientRegistry;
use crate::error::{Result, TurnstileError};

/// Default period between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A periodic task that evicts idle entries from one registry.
///
/// The task holds only a weak reference to the registry and exits on
/// [`Sweeper::stop`], when the `Sweeper` is dropped, or once the registry
/// itself is gone.
#[derive(Debug)]
pub struct Sweeper {
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    /// Spawn a sweeper on the current Tokio runtime.
    ///
    /// Every `period` it removes entries unseen for longer than `idle_ttl`.
    pub fn spawn(
        registry: &Arc<ClientRegistry>,
        period: Duration,
        idle_ttl: Duration,
    ) -> Result<Self> {
        if period.is_zero() {
            return Err(TurnstileError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TurnstileError::Runtime(e.to_string()))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = runtime.spawn(run(Arc::downgrade(registry), period, idle_ttl, stop_rx));

        Ok(Self {
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Whether the background task is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the task to stop and wait for it to finish.
    ///
    /// Calling `stop` more than once is harmless.
    pub async fn stop(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run(
    registry: Weak<ClientRegistry>,
    period: Duration,
    idle_ttl: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing can be idle yet.
    ticker.tick().await;

    debug!(period = ?period, idle_ttl = ?idle_ttl, "Sweeper started");

    loop {
        tokio::select! {
            // Resolves on an explicit stop and when the sender is dropped.
            _ = &mut stop_rx => {
                debug!("Sweeper stopped");
                break;
            }
            _ = ticker.tick() => {
                let Some(registry) = registry.upgrade() else {
                    info!("Registry dropped, sweeper exiting");
                    break;
                };
                let now = registry.clock().now();
                registry.sweep(idle_ttl, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::key::ClientKey;
    use crate::ratelimit::rules::LimiterConfig;

    fn registry(clock: Arc<ManualClock>) -> Arc<ClientRegistry> {
        let config = LimiterConfig::new(Duration::from_secs(1), 1, Duration::from_secs(60));
        Arc::new(ClientRegistry::new(config, clock))
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let clock = Arc::new(ManualClock::new());
        let result = Sweeper::spawn(&registry(clock), Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(result, Err(TurnstileError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_spawn_rejects_zero_period() {
        let clock = Arc::new(ManualClock::new());
        let result = Sweeper::spawn(&registry(clock), Duration::ZERO, Duration::from_secs(1));
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[tokio::test]
    async fn test_sweeper_evicts_idle_entries() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry(clock.clone());
        let key = ClientKey::new("10.0.0.1", "GET", "/a");
        registry.admit(&key);

        let sweeper =
            Sweeper::spawn(&registry, Duration::from_millis(20), Duration::from_secs(60)).unwrap();
        assert!(sweeper.is_running());

        clock.advance(Duration::from_secs(61));
        assert!(wait_until(|| registry.is_empty()).await);

        sweeper.stop().await;
    }

    #[tokio::test]
    async fn test_sweeper_keeps_active_entries() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry(clock.clone());
        let key = ClientKey::new("10.0.0.1", "GET", "/a");
        registry.admit(&key);

        let sweeper =
            Sweeper::spawn(&registry, Duration::from_millis(10), Duration::from_secs(60)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(registry.contains(&key));
        sweeper.stop().await;
    }

    #[tokio::test]
    async fn test_stop_terminates_task() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry(clock);

        let sweeper =
            Sweeper::spawn(&registry, Duration::from_millis(10), Duration::from_secs(1)).unwrap();
        sweeper.stop().await;
        assert!(!sweeper.is_running());

        // Second stop is a no-op
        sweeper.stop().await;
    }

    #[tokio::test]
    async fn test_task_exits_when_registry_dropped() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry(clock);

        let sweeper =
            Sweeper::spawn(&registry, Duration::from_millis(10), Duration::from_secs(1)).unwrap();
        drop(registry);

        assert!(wait_until(|| !sweeper.is_running()).await);
    }
}
