use crate::engine::TransferEngine;
use crate::models::event::OutboundEvent;
use crate::status::bus::EventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Spawn the engine-wide stats poller.
///
/// Emits aggregate progress and rates every `period`, starting one period
/// after the call, until `cancel` fires.
pub fn spawn_stats_poller<E: TransferEngine>(
    engine: Arc<E>,
    bus: EventBus,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Stats poller stopped");
                    return;
                }
                _ = interval.tick() => {
                    let stats = engine.stats();
                    trace!(progress = stats.progress, down = stats.down, up = stats.up, "Polled engine stats");
                    bus.emit(OutboundEvent::Stats(stats));
                }
            }
        }
    })
}
