//! The two fixed-interval loops driving the controller.
//!
//! ```text
//! capacity loop    every scale_up_interval:   desired size → scale set capacity
//! scale-down loop  every scale_down_interval: fetch → scale_down → terminate
//! ```
//!
//! Both loops log and continue on a failed tick and stop when the shutdown
//! channel flips. A tick in flight when shutdown arrives is abandoned.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span};

use crate::capacity::CapacityChange;
use crate::controller::Controller;

impl Controller {
    async fn capacity_tick(&self) {
        match self.propagate_capacity().await {
            Ok(CapacityChange::NotClusterized) => debug!("not clusterized yet, capacity untouched"),
            Ok(CapacityChange::Unchanged { capacity }) => debug!(capacity, "capacity up to date"),
            Ok(CapacityChange::Raised { .. }) => {}
            Err(e) => error!(error = %e, "capacity propagation failed"),
        }
    }

    async fn scale_down_tick(&self) {
        match self.run_scale_down_workflow().await {
            Ok(terminated) if terminated.transient_errors.is_empty() => {
                debug!(terminated = terminated.instances.len(), "scale-down cycle finished");
            }
            Ok(terminated) => error!(
                terminated = terminated.instances.len(),
                errors = ?terminated.transient_errors,
                "scale-down cycle finished with transient errors"
            ),
            Err(e) => error!(error = %e, "scale-down cycle failed"),
        }
    }

    /// Propagate the desired size to the scale set until shutdown.
    pub async fn run_capacity_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "capacity loop started");
        let mut cycle: u64 = 0;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    cycle += 1;
                    tokio::select! {
                        _ = self.capacity_tick().instrument(info_span!("capacity", cycle)) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("capacity loop shutting down");
    }

    /// Run the scale-down workflow until shutdown.
    pub async fn run_scale_down_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "scale-down loop started");
        let mut cycle: u64 = 0;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    cycle += 1;
                    tokio::select! {
                        _ = self.scale_down_tick().instrument(info_span!("scale_down", cycle)) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("scale-down loop shutting down");
    }
}
