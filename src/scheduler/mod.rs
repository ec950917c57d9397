//! Scheduled delivery.
//!
//! The [`Scheduler`] wakes on each period boundary of its clock (every minute
//! by default) and asks the [`DeliveryRunner`] for one scan.

pub mod clock;
pub mod refresher;
pub mod runner;

pub use clock::{Clock, ManualClock, SystemClock};
pub use refresher::TokenRefresher;
pub use runner::{CycleReport, Delivered, DeliveryRunner};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub struct Scheduler {
    runner: Arc<DeliveryRunner>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl Scheduler {
    pub fn new(runner: Arc<DeliveryRunner>, clock: Arc<dyn Clock>, period: Duration) -> Self {
        Self {
            runner,
            clock,
            period,
        }
    }

    /// Run scan cycles forever, one per period boundary.
    pub async fn run(self) {
        info!("Delivery scheduler started (interval: {}s)", self.period.as_secs());

        loop {
            let delay = next_tick_delay(self.clock.now(), self.period);
            tokio::time::sleep(delay).await;

            match self.runner.run_cycle().await {
                CycleReport::Skipped => warn!("Delivery cycle skipped"),
                CycleReport::ScanFailed => warn!("Delivery cycle aborted, will rescan next tick"),
                CycleReport::Completed { .. } => {}
            }
        }
    }
}

/// Time from `now` until the next multiple of `period` since the Unix epoch.
///
/// A `now` exactly on a boundary waits a full period.
pub fn next_tick_delay(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1) as i64;
    let into_period = now.timestamp_millis().rem_euclid(period_ms);
    Duration::from_millis((period_ms - into_period) as u64)
}
