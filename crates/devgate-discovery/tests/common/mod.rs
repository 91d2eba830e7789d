#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use devgate_discovery::{DiscoveryConfig, DiscoveryError, PortInfo, Prober};

#[derive(Debug, Clone)]
pub struct FakeHost {
    pub latency: Duration,
    pub ports: BTreeMap<u16, PortInfo>,
    pub mac: Option<String>,
}

/// Scripted network: only listed hosts answer.
#[derive(Debug, Default)]
pub struct FakeProber {
    pub hosts: HashMap<IpAddr, FakeHost>,
    /// Time every reachability probe takes.
    pub delay: Duration,
    pub fail_preflight: bool,
    pub probed: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, ip: &str, ports: &[(u16, Option<&str>)]) -> Self {
        let ports = ports
            .iter()
            .map(|(port, banner)| (*port, PortInfo::new("tcp", banner.map(str::to_string))))
            .collect();
        self.hosts.insert(
            ip.parse().unwrap(),
            FakeHost {
                latency: Duration::from_millis(4),
                ports,
                mac: Some("00:17:61:10:aa:05".to_string()),
            },
        );
        self
    }

    /// Let `port` of an already listed host answer ONVIF device information.
    pub fn onvif(mut self, ip: &str, port: u16, device_information: &str) -> Self {
        let ip: IpAddr = ip.parse().unwrap();
        let host = self.hosts.get_mut(&ip).unwrap();
        let info = host.ports.remove(&port).unwrap().with_onvif(device_information);
        host.ports.insert(port, info);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_preflight(mut self) -> Self {
        self.fail_preflight = true;
        self
    }
}

impl Prober for FakeProber {
    async fn preflight(&self, _targets: &[IpAddr]) -> devgate_discovery::Result<()> {
        if self.fail_preflight {
            return Err(DiscoveryError::Preflight("no usable interface".into()));
        }
        Ok(())
    }

    async fn reachable(&self, ip: IpAddr) -> Option<Duration> {
        self.probed.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.hosts.get(&ip).map(|h| h.latency)
    }

    async fn probe_port(&self, ip: IpAddr, port: u16) -> Option<PortInfo> {
        self.hosts.get(&ip)?.ports.get(&port).cloned()
    }

    async fn mac_address(&self, ip: IpAddr) -> Option<String> {
        self.hosts.get(&ip)?.mac.clone()
    }
}

pub fn config(fan_out: usize) -> DiscoveryConfig {
    DiscoveryConfig {
        fan_out,
        ports: vec![22, 80, 502, 4370, 8000],
        ..Default::default()
    }
}

/// /29 with an access controller, a camera and an unidentified box.
pub fn small_office() -> FakeProber {
    FakeProber::new()
        .host("10.0.0.1", &[(4370, None), (22, None)])
        .host("10.0.0.2", &[(80, Some("HTTP/1.0 200 OK\r\nServer: Hikvision-Webs"))])
        .host("10.0.0.3", &[(22, Some("SSH-2.0-OpenSSH_9.6"))])
}
