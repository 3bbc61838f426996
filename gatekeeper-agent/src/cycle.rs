//! Sync cycle scheduling.

use std::future::Future;
use std::time::Duration;

use gatekeeper::gatekeeper::DEFAULT_EVENT_LOG_COUNT;
use gatekeeper::{CheckIn, Gatekeeper, Result};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// What a cycle does beyond the fixed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOptions {
    /// Gate the code pull on `check_in` and acknowledge it with `mark_success`
    pub check_in: bool,
    /// Events pulled from each door for the push
    pub event_log_count: usize,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            check_in: false,
            event_log_count: DEFAULT_EVENT_LOG_COUNT,
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub doors: usize,
    /// False when check-in reported nothing new
    pub codes_pulled: bool,
    /// Total changes applied across all doors
    pub changes: usize,
}

/// Runs sync cycles against one gatekeeper.
pub struct SyncAgent {
    gatekeeper: Gatekeeper,
    options: CycleOptions,
    interval: Duration,
}

impl SyncAgent {
    pub fn new(gatekeeper: Gatekeeper, options: CycleOptions, interval: Duration) -> Self {
        Self {
            gatekeeper,
            options,
            interval,
        }
    }

    pub fn gatekeeper(&self) -> &Gatekeeper {
        &self.gatekeeper
    }

    /// Run one full cycle: configure, sync clocks, pull codes, push events.
    ///
    /// The first failing step ends the cycle.
    pub async fn run_once(&mut self) -> Result<CycleReport> {
        let gatekeeper = &mut self.gatekeeper;

        gatekeeper.configure_doors().await?;
        gatekeeper.sync_clocks().await?;

        let pull = if self.options.check_in {
            gatekeeper.check_in().await? == CheckIn::NewData
        } else {
            true
        };

        let mut report = CycleReport {
            doors: gatekeeper.get_doors()?.len(),
            codes_pulled: pull,
            changes: 0,
        };
        if pull {
            let applied = gatekeeper.pull_door_codes().await?;
            report.changes = applied.values().map(Vec::len).sum();
            if self.options.check_in {
                gatekeeper.mark_success().await?;
            }
        }

        gatekeeper.push_event_logs(self.options.event_log_count).await?;
        Ok(report)
    }

    /// Run cycles every interval until `shutdown` resolves.
    ///
    /// A failed cycle is logged and the next one starts from scratch. Shutdown
    /// is only observed between cycles.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        info!(interval_secs = self.interval.as_secs(), check_in = self.options.check_in, "Sync agent started");

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.run_once().await {
                        Ok(report) => info!(
                            doors = report.doors,
                            codes_pulled = report.codes_pulled,
                            changes = report.changes,
                            "Sync cycle complete"
                        ),
                        Err(e) => error!(kind = %e.kind(), error = %e, "Sync cycle failed"),
                    }
                }
                _ = &mut shutdown => {
                    info!("Sync agent shutting down");
                    break;
                }
            }
        }
    }
}
