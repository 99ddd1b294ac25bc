//! Inactivity watchdog.
//!
//! Measured from the start of the call: every `nudge_after` the gateway is
//! asked to prompt the caller, and once `disconnect_after` has elapsed the
//! watchdog reports [`WatchdogExit::Expired`] so the owner can end the call.
//! Caller activity does not reset either timer.

use crate::gateway::GenerationGateway;
use std::{sync::Arc, time::Duration};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub nudge_after: Duration,
    pub disconnect_after: Duration,
    pub nudge_prompt: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            nudge_after: Duration::from_secs(20),
            disconnect_after: Duration::from_secs(80),
            nudge_prompt: "Are you still there?".to_string(),
        }
    }
}

/// Why the watchdog stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogExit {
    Cancelled,
    Expired,
}

pub struct Watchdog {
    config: WatchdogConfig,
    gateway: Arc<GenerationGateway>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, gateway: Arc<GenerationGateway>) -> Self {
        Self { config, gateway }
    }

    /// Runs until `cancel` fires or the disconnect deadline passes. When both
    /// deadlines fall on the same instant the disconnect wins.
    pub async fn run(self, cancel: CancellationToken) -> WatchdogExit {
        let start = Instant::now();
        let mut nudges = interval_at(start + self.config.nudge_after, self.config.nudge_after);
        nudges.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = sleep_until(start + self.config.disconnect_after);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return WatchdogExit::Cancelled,
                _ = &mut deadline => {
                    info!(
                        after_secs = self.config.disconnect_after.as_secs(),
                        "Inactivity limit reached; ending call."
                    );
                    return WatchdogExit::Expired;
                }
                _ = nudges.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return WatchdogExit::Cancelled,
                        result = self.gateway.send_message(&self.config.nudge_prompt) => {
                            if let Err(e) = result {
                                warn!(error = %e, "Failed to nudge caller.");
                            }
                        }
                    }
                }
            }
        }
    }
}
