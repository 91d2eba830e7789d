//! Network discovery for devgate.
//!
//! A [`DiscoveryService`] expands a target range, probes every host through a
//! [`Prober`], fingerprints open ports and banners, and keeps each scan as a
//! [`DiscoveryTask`] that callers read as snapshots.
//!
//! ```no_run
//! use devgate_discovery::{DiscoveryConfig, DiscoveryService, TcpProber};
//!
//! # async fn demo() -> devgate_discovery::Result<()> {
//! let config = DiscoveryConfig::default();
//! let service = DiscoveryService::new(config.clone(), TcpProber::new(&config));
//! let task = service.run_scan("192.168.1.0/24").await?;
//! for device in task.devices.iter().filter(|d| d.is_identified()) {
//!     println!("{} {:?} {}", device.ip, device.protocol_type, device.confidence);
//! }
//! # Ok(())
//! # }
//! ```

pub mod arp;
pub mod error;
pub mod fingerprint;
pub mod model;
pub mod prober;
pub mod range;
pub mod scanner;
pub mod store;

pub use error::{DiscoveryError, Result};
pub use fingerprint::{FINGERPRINTS, Fingerprint, best_match};
pub use model::{DiscoveredDevice, DiscoveryTask, PortInfo, Progress, TaskId, TaskStatus, TaskSummary};
pub use prober::{Prober, TcpProber};
pub use scanner::{DiscoveryConfig, DiscoveryService};
