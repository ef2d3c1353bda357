//! Periodic advance of the display pointer.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::CarouselService;

/// Result of one rotation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The pointer moved
    Advanced { from: usize, to: usize },

    /// The carousel was empty, nothing to rotate
    Skipped,
}

/// Background task that rotates the carousel on a fixed interval.
pub struct RotationScheduler {
    service: CarouselService,
    interval: Duration,
}

impl RotationScheduler {
    pub fn new(service: CarouselService, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Start the scheduler on the current runtime.
    ///
    /// Returns `None` if the interval is zero, which disables rotation. The
    /// first rotation happens one full interval after start.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if self.interval.is_zero() {
            info!("Automatic rotation disabled");
            return None;
        }

        info!(interval_secs = self.interval.as_secs(), "Starting rotation scheduler");
        Some(tokio::spawn(self.run()))
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match self.service.rotate().await {
                Ok(RotationOutcome::Advanced { from, to }) => {
                    info!(from, to, "Rotated carousel");
                }
                Ok(RotationOutcome::Skipped) => {
                    debug!("Carousel empty, nothing to rotate");
                }
                Err(e) => {
                    error!("Rotation failed: {}", e);
                }
            }
        }
    }
}
