//! Discovery task runner.
//!
//! ```text
//! start_scan(range) ──> TaskStore (CREATED)
//!        │
//!        └─> worker: RUNNING
//!              ├─ expand range ─────────────(error)──> FAILED
//!              ├─ prober.preflight ─────────(error)──> FAILED
//!              ├─ per host, at most `fan_out` at once:
//!              │     reachable? ──> probe ports ──> fingerprint
//!              └─ drain in-flight ──> COMPLETED | CANCELLED
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use devgate_core::constants::{
    DEFAULT_HOST_TIMEOUT_MS, DEFAULT_MAX_SCAN_HOSTS, DEFAULT_PING_TIMEOUT_MS,
    DEFAULT_PORT_TIMEOUT_MS, DEFAULT_PROBE_PORTS, DEFAULT_SCAN_FAN_OUT,
    DEFAULT_TASK_RETENTION_SECS,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DiscoveryError, Result};
use crate::fingerprint;
use crate::model::{DiscoveredDevice, DiscoveryTask, TaskId, TaskStatus};
use crate::prober::Prober;
use crate::range;
use crate::store::TaskStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Hosts probed at the same time.
    pub fan_out: usize,
    pub ping_timeout_ms: u64,
    pub port_timeout_ms: u64,
    /// Budget for everything done to one host.
    pub host_timeout_ms: u64,
    pub ports: Vec<u16>,
    pub max_hosts: usize,
    pub retention_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            fan_out: DEFAULT_SCAN_FAN_OUT,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            port_timeout_ms: DEFAULT_PORT_TIMEOUT_MS,
            host_timeout_ms: DEFAULT_HOST_TIMEOUT_MS,
            ports: DEFAULT_PROBE_PORTS.to_vec(),
            max_hosts: DEFAULT_MAX_SCAN_HOSTS,
            retention_secs: DEFAULT_TASK_RETENTION_SECS,
        }
    }
}

impl DiscoveryConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn port_timeout(&self) -> Duration {
        Duration::from_millis(self.port_timeout_ms)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_millis(self.host_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Runs discovery tasks in the background and keeps their results.
pub struct DiscoveryService<P> {
    config: Arc<DiscoveryConfig>,
    prober: Arc<P>,
    store: Arc<TaskStore>,
}

impl<P> Clone for DiscoveryService<P> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            prober: Arc::clone(&self.prober),
            store: Arc::clone(&self.store),
        }
    }
}

impl<P: Prober> DiscoveryService<P> {
    pub fn new(config: DiscoveryConfig, prober: P) -> Self {
        Self {
            config: Arc::new(config),
            prober: Arc::new(prober),
            store: Arc::new(TaskStore::new()),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// Create a task for `range` and start scanning it in the background.
    ///
    /// Must be called from within a tokio runtime. An invalid range is not an
    /// error here: the task itself ends FAILED with the reason.
    pub fn start_scan(&self, range: &str) -> TaskId {
        let task = DiscoveryTask::new(range.trim());
        let id = task.id;
        let cancel = self.store.insert(task);
        info!(task = %id, range = %range.trim(), "Discovery task created");

        let worker = Worker {
            id,
            range: range.trim().to_string(),
            config: Arc::clone(&self.config),
            prober: Arc::clone(&self.prober),
            store: Arc::clone(&self.store),
            cancel,
        };
        tokio::spawn(worker.run());
        id
    }

    /// Start a scan and wait for it to finish.
    pub async fn run_scan(&self, range: &str) -> Result<DiscoveryTask> {
        let id = self.start_scan(range);
        self.wait(id).await
    }

    /// Wait until the task is terminal and return its final snapshot.
    pub async fn wait(&self, id: TaskId) -> Result<DiscoveryTask> {
        let mut status = self.store.subscribe(id)?;
        status
            .wait_for(TaskStatus::is_terminal)
            .await
            .map_err(|_| DiscoveryError::TaskNotFound(id.to_string()))?;
        self.task(id)
    }

    /// Ask a running task to stop; in-flight probes still complete.
    pub fn cancel(&self, id: TaskId) -> Result<TaskStatus> {
        let status = self.store.cancel(id)?;
        info!(task = %id, status = %status, "Discovery cancellation requested");
        Ok(status)
    }

    pub fn task(&self, id: TaskId) -> Result<DiscoveryTask> {
        self.store
            .snapshot(id)
            .ok_or_else(|| DiscoveryError::TaskNotFound(id.to_string()))
    }

    pub fn tasks(&self) -> Vec<DiscoveryTask> {
        self.store.snapshots()
    }

    /// Remove terminal tasks older than `retention`. Returns how many went.
    pub fn cleanup(&self, retention: Duration) -> usize {
        self.store.cleanup(retention)
    }
}

struct Worker<P> {
    id: TaskId,
    range: String,
    config: Arc<DiscoveryConfig>,
    prober: Arc<P>,
    store: Arc<TaskStore>,
    cancel: CancellationToken,
}

impl<P: Prober> Worker<P> {
    fn finish(&self, status: TaskStatus) {
        let summary = self.store.update(self.id, |task| {
            if let Err(e) = task.transition(status) {
                warn!(task = %self.id, error = %e, "Discovery task already finished");
            }
            task.summary.clone()
        });
        if let Some(Some(summary)) = summary {
            info!(
                task = %self.id,
                status = %status,
                scanned = summary.scanned,
                reachable = summary.reachable,
                identified = summary.identified,
                "Discovery task finished"
            );
        }
    }

    fn fail(&self, error: &DiscoveryError) {
        warn!(task = %self.id, range = %self.range, error = %error, "Discovery task failed");
        self.store.update(self.id, |task| {
            if let Err(e) = task.fail(error.to_string()) {
                warn!(task = %self.id, error = %e, "Discovery task already finished");
            }
        });
    }

    async fn run(self) {
        if self.cancel.is_cancelled() {
            self.finish(TaskStatus::Cancelled);
            return;
        }
        match self.store.update(self.id, |task| task.transition(TaskStatus::Running)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(task = %self.id, error = %e, "Discovery task cannot start");
                return;
            }
            None => {
                warn!(task = %self.id, "Discovery task removed before start");
                return;
            }
        }

        let hosts = match range::expand(&self.range, self.config.max_hosts) {
            Ok(hosts) => hosts,
            Err(e) => return self.fail(&e),
        };
        let targets: Vec<IpAddr> = hosts.into_iter().map(IpAddr::V4).collect();
        self.store.update(self.id, |task| task.progress.total = targets.len());

        if let Err(e) = self.prober.preflight(&targets).await {
            return self.fail(&e);
        }
        debug!(task = %self.id, hosts = targets.len(), fan_out = self.config.fan_out, "Scanning");

        let semaphore = Arc::new(Semaphore::new(self.config.fan_out.max(1)));
        let mut in_flight = JoinSet::new();
        let mut hosts_by_task = HashMap::new();

        for ip in targets {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            while let Some(joined) = in_flight.try_join_next_with_id() {
                self.record(joined, &mut hosts_by_task);
            }

            let prober = Arc::clone(&self.prober);
            let config = Arc::clone(&self.config);
            let handle = in_flight.spawn(async move {
                let _permit = permit;
                probe_host(prober.as_ref(), &config, ip).await
            });
            hosts_by_task.insert(handle.id(), ip);
        }

        while let Some(joined) = in_flight.join_next_with_id().await {
            self.record(joined, &mut hosts_by_task);
        }

        if self.cancel.is_cancelled() {
            self.finish(TaskStatus::Cancelled);
        } else {
            self.finish(TaskStatus::Completed);
        }
    }

    fn record(
        &self,
        joined: std::result::Result<(tokio::task::Id, DiscoveredDevice), tokio::task::JoinError>,
        hosts_by_task: &mut HashMap<tokio::task::Id, IpAddr>,
    ) {
        let device = match joined {
            Ok((task_id, device)) => {
                hosts_by_task.remove(&task_id);
                device
            }
            Err(e) => {
                let Some(ip) = hosts_by_task.remove(&e.id()) else {
                    return;
                };
                warn!(task = %self.id, ip = %ip, error = %e, "Host probe aborted");
                DiscoveredDevice::unreachable(ip)
            }
        };
        self.store.update(self.id, |task| task.record(device));
    }
}

/// Probe one host within the per-host budget. Never fails: a timeout or a
/// silent host yields an unreachable record.
pub async fn probe_host<P: Prober>(prober: &P, config: &DiscoveryConfig, ip: IpAddr) -> DiscoveredDevice {
    match tokio::time::timeout(config.host_timeout(), identify(prober, config, ip)).await {
        Ok(device) => device,
        Err(_) => {
            debug!(ip = %ip, timeout_ms = config.host_timeout_ms, "Host probe timed out");
            DiscoveredDevice::unreachable(ip)
        }
    }
}

async fn identify<P: Prober>(prober: &P, config: &DiscoveryConfig, ip: IpAddr) -> DiscoveredDevice {
    let Some(latency) = prober.reachable(ip).await else {
        return DiscoveredDevice::unreachable(ip);
    };

    let probes: Vec<_> = config
        .ports
        .iter()
        .map(|&port| async move { prober.probe_port(ip, port).await.map(|info| (port, info)) })
        .collect();
    let open_ports: BTreeMap<_, _> = join_all(probes).await.into_iter().flatten().collect();

    let mut device = DiscoveredDevice::reachable(ip, latency, open_ports);
    device.mac = prober.mac_address(ip).await;
    if let Some(found) = fingerprint::best_match(&device.open_ports) {
        debug!(
            ip = %ip,
            vendor = found.vendor,
            protocol = %found.protocol_type,
            confidence = found.confidence,
            "Device identified"
        );
        device.vendor = Some(found.vendor.to_string());
        device.protocol_type = Some(found.protocol_type);
        device.device_type = Some(found.device_type);
        device.confidence = found.confidence;
    }
    device
}
