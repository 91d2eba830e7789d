use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use devgate_core::{DeviceType, ProtocolType};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{DiscoveryError, Result};

/// Discovery task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| DiscoveryError::TaskNotFound(s.to_string()))
    }
}

/// Task lifecycle.
///
/// ```text
/// CREATED ──> RUNNING ──┬──> COMPLETED
///    │                  ├──> FAILED
///    │                  └──> CANCELLED
///    ├──> FAILED
///    └──> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Created, Running | Failed | Cancelled) | (Running, Completed | Failed | Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What answered on an open port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub service: String,
    pub banner: Option<String>,
    /// Manufacturer and model reported by an ONVIF device service on this
    /// port; empty when the service answered without them.
    pub onvif: Option<String>,
}

impl PortInfo {
    pub fn new(service: impl Into<String>, banner: Option<String>) -> Self {
        Self {
            service: service.into(),
            banner,
            onvif: None,
        }
    }

    pub fn with_onvif(mut self, device_information: impl Into<String>) -> Self {
        self.onvif = Some(device_information.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub protocol_type: Option<ProtocolType>,
    pub device_type: Option<DeviceType>,
    pub open_ports: BTreeMap<u16, PortInfo>,
    pub latency_ms: Option<u64>,
    pub reachable: bool,
    /// 0-100.
    pub confidence: u8,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredDevice {
    pub fn unreachable(ip: IpAddr) -> Self {
        Self {
            ip,
            mac: None,
            hostname: None,
            vendor: None,
            protocol_type: None,
            device_type: None,
            open_ports: BTreeMap::new(),
            latency_ms: None,
            reachable: false,
            confidence: 0,
            discovered_at: Utc::now(),
        }
    }

    pub fn reachable(ip: IpAddr, latency: Duration, open_ports: BTreeMap<u16, PortInfo>) -> Self {
        Self {
            latency_ms: Some(latency.as_millis() as u64),
            reachable: true,
            open_ports,
            ..Self::unreachable(ip)
        }
    }

    pub fn is_identified(&self) -> bool {
        self.confidence > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskSummary {
    pub total_hosts: usize,
    pub scanned: usize,
    pub reachable: usize,
    pub identified: usize,
    /// Reachable hosts over scanned hosts, 0.0-1.0.
    pub success_rate: f64,
    pub average_latency_ms: Option<f64>,
    pub by_protocol: BTreeMap<String, usize>,
}

impl TaskSummary {
    pub fn from_devices(total_hosts: usize, devices: &[DiscoveredDevice]) -> Self {
        let reachable: Vec<_> = devices.iter().filter(|d| d.reachable).collect();
        let latencies: Vec<u64> = reachable.iter().filter_map(|d| d.latency_ms).collect();
        let mut by_protocol = BTreeMap::new();
        for protocol in devices.iter().filter_map(|d| d.protocol_type.as_ref()) {
            *by_protocol.entry(protocol.to_string()).or_insert(0) += 1;
        }

        Self {
            total_hosts,
            scanned: devices.len(),
            reachable: reachable.len(),
            identified: devices.iter().filter(|d| d.is_identified()).count(),
            success_rate: if devices.is_empty() {
                0.0
            } else {
                reachable.len() as f64 / devices.len() as f64
            },
            average_latency_ms: (!latencies.is_empty())
                .then(|| latencies.iter().sum::<u64>() as f64 / latencies.len() as f64),
            by_protocol,
        }
    }
}

/// One scan of one network range. Immutable once terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryTask {
    pub id: TaskId,
    pub range: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub devices: Vec<DiscoveredDevice>,
    pub progress: Progress,
    pub summary: Option<TaskSummary>,
    pub error: Option<String>,
}

impl DiscoveryTask {
    pub fn new(range: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            range: range.into(),
            status: TaskStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            devices: Vec::new(),
            progress: Progress::default(),
            summary: None,
            error: None,
        }
    }

    /// Move to `next`, stamping times. Reaching a terminal state computes the summary.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DiscoveryError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
            self.summary = Some(TaskSummary::from_devices(self.progress.total, &self.devices));
        }
        self.status = next;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.error = Some(message.into());
        self.transition(TaskStatus::Failed)
    }

    /// Ignored once the task is terminal.
    pub fn record(&mut self, device: DiscoveredDevice) {
        if self.status.is_terminal() {
            return;
        }
        self.progress.completed += 1;
        self.devices.push(device);
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.finished_at.unwrap_or(self.created_at)
    }
}
