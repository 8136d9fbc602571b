use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::metadata::{MetadataClient, Network};
use crate::reconcile::{AppliedState, ConfigReconciler};

/// Floor for the version check spacing; a zero period would spin
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What one reconciliation cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub forced: bool,
    /// Networks written successfully
    pub applied: Vec<String>,
    /// Networks whose apply failed
    pub failed: Vec<String>,
    /// Networks equal to their applied snapshot
    pub unchanged: Vec<String>,
    /// Networks from other environments
    pub foreign: usize,
    /// Networks without a `cniConfig` mapping
    pub unconfigured: usize,
}

/// Keeps the CNI root in line with the networks published by a metadata source
pub struct Watcher<C> {
    client: Arc<C>,
    reconciler: ConfigReconciler,
    state: AppliedState,
    reapply_interval: Duration,
}

impl<C: MetadataClient + 'static> Watcher<C> {
    pub fn new(client: Arc<C>, config: &SyncConfig) -> Self {
        Self::with_state(client, config, AppliedState::new())
    }

    pub fn with_state(client: Arc<C>, config: &SyncConfig, state: AppliedState) -> Self {
        Self {
            client,
            reconciler: ConfigReconciler::new(config),
            state,
            reapply_interval: config.reapply_interval(),
        }
    }

    pub fn state(&self) -> &AppliedState {
        &self.state
    }

    /// Start watching in the background and return immediately
    ///
    /// The metadata version is checked at most once per `poll_interval`; a
    /// cycle runs when it changed since the last check. Cycles never overlap.
    pub fn watch(client: Arc<C>, config: &SyncConfig) -> JoinHandle<()> {
        let watcher = Self::new(client, config);
        let mut poll_interval = config.poll_interval();
        if poll_interval < MIN_POLL_INTERVAL {
            warn!(
                "Poll interval {:?} too short, using {:?}",
                poll_interval, MIN_POLL_INTERVAL
            );
            poll_interval = MIN_POLL_INTERVAL;
        }
        tokio::spawn(watcher.run(poll_interval))
    }

    async fn run(mut self, poll_interval: Duration) {
        let mut ticker = time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seen: Option<String> = None;

        loop {
            ticker.tick().await;

            let version = match self.client.version().await {
                Ok(version) => version,
                Err(err) => {
                    warn!("Failed to check metadata version: {}", err);
                    continue;
                }
            };
            if seen.as_deref() == Some(version.as_str()) {
                debug!("Metadata version {} unchanged", version);
                continue;
            }

            info!("Metadata changed to version {}", version);
            seen = Some(version);
            if let Err(err) = self.on_change().await {
                error!("Failed to apply cni conf: {}", err);
            }
        }
    }

    /// Run one reconciliation cycle
    ///
    /// Fetch errors abort the cycle. A failing network is logged and the
    /// remaining networks are still processed.
    pub async fn on_change(&mut self) -> Result<CycleReport> {
        let networks = self.client.networks().await?;
        let host = self.client.self_host().await?;

        let forced = self.state.reapply_due(Instant::now(), self.reapply_interval);
        let mut report = CycleReport {
            forced,
            ..Default::default()
        };

        for network in networks {
            if network.environment_uuid != host.environment_uuid {
                debug!("network: {} is not local to this environment", network.uuid);
                report.foreign += 1;
                continue;
            }
            if network.cni_config().is_none() {
                report.unconfigured += 1;
                continue;
            }
            if !forced && !self.state.has_changed(&network) {
                report.unchanged.push(network.name);
                continue;
            }

            let name = network.name.clone();
            match self.apply(network) {
                Ok(()) => report.applied.push(name),
                Err(err) => {
                    error!("Failed to apply cni conf: {}", err);
                    report.failed.push(name);
                }
            }
        }

        if !report.applied.is_empty() || !report.failed.is_empty() {
            info!(
                "Applied {} network(s), {} failed{}",
                report.applied.len(),
                report.failed.len(),
                if forced { " (forced)" } else { "" }
            );
        }
        Ok(report)
    }

    /// Write `network` and record it only if nothing failed
    fn apply(&mut self, network: Network) -> Result<()> {
        self.reconciler.apply(&network)?;
        self.state.commit(network, Instant::now());
        Ok(())
    }
}
