//! Background liveness monitor.
//!
//! Every interval, each open connection that still owes a response to the
//! previous probe is terminated; every other connection is marked as
//! awaiting and sent a fresh WebSocket ping. A connection therefore survives
//! as long as it answers at least one probe per interval.

use crate::config::LivenessConfig;
use crate::server::Hub;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Result of one liveness sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Connections sent a new probe.
    pub probed: usize,
    /// Connections terminated for not answering the previous probe.
    pub terminated: usize,
}

/// Spawn the background liveness task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_liveness_task(hub: Arc<Hub>, config: LivenessConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Liveness monitor disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        tracing::info!("Liveness monitor started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        timer.tick().await;

        loop {
            timer.tick().await;

            let stats = sweep(&hub);
            if stats.terminated > 0 {
                tracing::info!(
                    "Liveness: terminated {} unresponsive connections, probed {}",
                    stats.terminated,
                    stats.probed
                );
            } else {
                tracing::debug!("Liveness: probed {} connections", stats.probed);
            }
        }
    })
}

/// Run one liveness pass over every open connection.
pub fn sweep(hub: &Hub) -> SweepStats {
    let mut stats = SweepStats::default();

    for handle in hub.open_connections() {
        // Already terminated or closed; its session is shutting down.
        if !handle.is_open() {
            continue;
        }
        if handle.is_awaiting_probe() {
            tracing::debug!("{:?} missed its liveness probe", handle.id());
            handle.terminate();
            hub.metrics()
                .liveness_terminations
                .fetch_add(1, Ordering::Relaxed);
            stats.terminated += 1;
            continue;
        }

        if !handle.probe() {
            // Still counts as awaiting; the next sweep decides.
            tracing::debug!("{:?} probe not queued", handle.id());
        }
        stats.probed += 1;
    }

    hub.rate_limits().shrink();
    stats
}
