//! Workspace-wide defaults.
//!
//! Transports, discovery and the dispatch loop read their fallback values from
//! here so that configuration defaults and code defaults never drift apart.
//!
//! # Timeouts
//!
//! | Constant | Value | Used by |
//! |----------|-------|---------|
//! | [`DEFAULT_TCP_TIMEOUT_MS`] | 3000 | TCP connect/read/write |
//! | [`DEFAULT_HTTP_TIMEOUT_MS`] | 5000 | HTTP request round-trip |
//! | [`DEFAULT_SERIAL_TIMEOUT_MS`] | 3000 | RS485 request/response exchange |
//! | [`DEFAULT_PING_TIMEOUT_MS`] | 500 | discovery reachability probe |
//! | [`DEFAULT_PORT_TIMEOUT_MS`] | 800 | discovery port probe |
//! | [`DEFAULT_HOST_TIMEOUT_MS`] | 5000 | whole-host discovery budget |

/// Default timeout for TCP connect, read and write operations.
pub const DEFAULT_TCP_TIMEOUT_MS: u64 = 3000;

/// Default timeout for one HTTP request.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5000;

/// Default timeout for one RS485 request/response exchange.
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 3000;

/// Default RS485 line settings (9600 8N1).
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_DATA_BITS: u8 = 8;
pub const DEFAULT_STOP_BITS: u8 = 1;

/// Idle timeout after which a silent device connection is closed.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Maximum simultaneous connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Largest frame any codec will buffer before giving up on it (64 KB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Allowed clock skew between a device timestamp and the gateway clock.
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: i64 = 300;

// Discovery

pub const DEFAULT_PING_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_PORT_TIMEOUT_MS: u64 = 800;
pub const DEFAULT_HOST_TIMEOUT_MS: u64 = 5000;

/// Concurrent host probes per scan.
pub const DEFAULT_SCAN_FAN_OUT: usize = 32;

/// Upper bound on hosts a single range may expand to.
pub const DEFAULT_MAX_SCAN_HOSTS: usize = 4096;

/// How long terminal discovery tasks are kept before cleanup may drop them.
pub const DEFAULT_TASK_RETENTION_SECS: u64 = 30 * 60;

/// Bytes read from a port when grabbing a banner.
pub const MAX_BANNER_BYTES: usize = 512;

/// Ports probed on reachable hosts when no explicit list is configured.
pub const DEFAULT_PROBE_PORTS: &[u16] = &[80, 443, 502, 554, 4370, 8000, 8080, 8088, 37777];

/// Highest confidence score a fingerprint match can reach.
pub const MAX_CONFIDENCE: u8 = 100;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "DEVGATE_";
