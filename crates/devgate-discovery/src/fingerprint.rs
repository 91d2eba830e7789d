//! Port and banner fingerprints.
//!
//! Each matching port adds its weight, each banner pattern found in any
//! banner or ONVIF device information adds its weight once, an answering
//! ONVIF device service adds the `onvif` weight, and the total is capped at
//! [`MAX_CONFIDENCE`]. The highest score wins; equal scores go to the entry
//! listed first.

use std::collections::BTreeMap;

use devgate_core::constants::MAX_CONFIDENCE;
use devgate_core::{DeviceType, ProtocolType};

use crate::model::PortInfo;

#[derive(Debug, Clone, Copy)]
pub struct Fingerprint {
    pub vendor: &'static str,
    pub protocol_type: &'static str,
    pub device_type: DeviceType,
    pub ports: &'static [(u16, u8)],
    /// Lowercase substrings.
    pub banners: &'static [(&'static str, u8)],
    pub onvif: u8,
}

pub const FINGERPRINTS: &[Fingerprint] = &[
    Fingerprint {
        vendor: "Hikvision",
        protocol_type: "VIDEO_HIKVISION_ISAPI",
        device_type: DeviceType::Camera,
        ports: &[(8000, 40), (80, 10)],
        banners: &[("hikvision", 40), ("ds-2cd", 30), ("app-webs", 30)],
        onvif: 10,
    },
    Fingerprint {
        vendor: "Dahua",
        protocol_type: "VIDEO_DAHUA_V1",
        device_type: DeviceType::Camera,
        ports: &[(37777, 60)],
        banners: &[("dahua", 40), ("ipc-hfw", 30)],
        onvif: 10,
    },
    Fingerprint {
        vendor: "Entropy",
        protocol_type: "ACCESS_ENTROPY_V4.8",
        device_type: DeviceType::AccessController,
        ports: &[(4370, 60), (8088, 20)],
        banners: &[("zkteco", 40), ("iclock", 30), ("zk web server", 30)],
        onvif: 0,
    },
    Fingerprint {
        vendor: "ONVIF",
        protocol_type: "VIDEO_ONVIF",
        device_type: DeviceType::Camera,
        ports: &[(554, 20), (80, 5), (8080, 5)],
        banners: &[("onvif", 40)],
        onvif: 40,
    },
    Fingerprint {
        vendor: "Generic",
        protocol_type: "RS485_MODBUS_V1.0",
        device_type: DeviceType::Rs485Terminal,
        ports: &[(502, 60)],
        banners: &[],
        onvif: 0,
    },
];

impl Fingerprint {
    pub fn score(&self, open_ports: &BTreeMap<u16, PortInfo>) -> u8 {
        let port_score: u32 = self
            .ports
            .iter()
            .filter(|(port, _)| open_ports.contains_key(port))
            .map(|(_, weight)| u32::from(*weight))
            .sum();

        let banners: Vec<String> = open_ports
            .values()
            .flat_map(|info| [info.banner.as_deref(), info.onvif.as_deref()])
            .flatten()
            .map(str::to_ascii_lowercase)
            .collect();
        let banner_score: u32 = self
            .banners
            .iter()
            .filter(|(pattern, _)| banners.iter().any(|b| b.contains(pattern)))
            .map(|(_, weight)| u32::from(*weight))
            .sum();

        let onvif_score = if open_ports.values().any(|info| info.onvif.is_some()) {
            u32::from(self.onvif)
        } else {
            0
        };

        (port_score + banner_score + onvif_score).min(u32::from(MAX_CONFIDENCE)) as u8
    }

    pub fn protocol_type(&self) -> ProtocolType {
        ProtocolType::from_static(self.protocol_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub vendor: &'static str,
    pub protocol_type: ProtocolType,
    pub device_type: DeviceType,
    pub confidence: u8,
}

/// Best fingerprint for the open ports, or `None` when nothing scores.
pub fn best_match(open_ports: &BTreeMap<u16, PortInfo>) -> Option<Match> {
    let mut best: Option<(&Fingerprint, u8)> = None;
    for fp in FINGERPRINTS {
        let score = fp.score(open_ports);
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((fp, score));
        }
    }
    best.map(|(fp, confidence)| Match {
        vendor: fp.vendor,
        protocol_type: fp.protocol_type(),
        device_type: fp.device_type,
        confidence,
    })
}
