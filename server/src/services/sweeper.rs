//! Periodic status sweep.
//!
//! Catches transitions no user action triggers, such as an event silently
//! crossing its scheduled time. A failed cycle is logged and retried on the
//! next tick; admission keeps working regardless.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::services::reconciler::StatusReconciler;
use crate::store::RegistrationStore;

/// Default interval between sweep cycles.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub struct StatusSweeper<S: RegistrationStore> {
    reconciler: Arc<StatusReconciler<S>>,
    interval: Duration,
}

impl<S: RegistrationStore> StatusSweeper<S> {
    pub fn new(reconciler: Arc<StatusReconciler<S>>) -> Self {
        Self {
            reconciler,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one sweep, swallowing the error after logging it.
    pub async fn run_cycle(&self) -> bool {
        match self.reconciler.sweep().await {
            Ok(passes) => {
                debug!(passes, "Status sweep cycle finished");
                true
            }
            Err(e) => {
                warn!(error = %e, "Status sweep failed, retrying next tick");
                false
            }
        }
    }

    /// Starts the background task. Abort the returned handle to stop it.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        })
    }
}
