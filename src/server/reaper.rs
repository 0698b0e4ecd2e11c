use std::time::Duration;

use tokio::task::JoinHandle;

use crate::session::{ReapPolicy, SessionRegistry};
use crate::shutdown::ShutdownManager;

/// Sweep the registry every `interval` until shutdown.
pub fn spawn_reaper(
    registry: SessionRegistry,
    policy: ReapPolicy,
    interval: Duration,
    shutdown: ShutdownManager,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    registry.reap(&policy);
                }
            }
        }
        tracing::debug!("Reaper stopped");
    })
}
