//! RS485 transport speaking Modbus-RTU framing.
//!
//! A physical bus is half-duplex and shared by every unit wired to it, so all
//! access goes through one [`Rs485Bus`] per port. The bus lock is held for the
//! whole request/response exchange: a second caller waits until the first
//! reply has been read (or has timed out).
//!
//! ```text
//! caller A ──┐                   ┌── write A ── read reply A ──┐
//!            ├──> Mutex<port> ───┤                             ├── unlock
//! caller B ──┘    (B waits)      └─────────────────────────────┘
//! ```
//!
//! RTU has no length field. A reply ends when the line stays silent for
//! 3.5 character times. Input left over from an earlier exchange is discarded
//! before each request, and after a timeout or a corrupt reply the bus waits
//! for the line to go quiet before releasing the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use devgate_core::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_DATA_BITS, DEFAULT_SERIAL_TIMEOUT_MS, DEFAULT_STOP_BITS,
};
use devgate_protocol::checksum::verify_crc16;
use devgate_protocol::handlers::rs485_modbus::{MAX_FRAME_LEN, MIN_FRAME_LEN, encode_rtu};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::adapter::{RS485_PRIORITY, TransportAdapter, TransportKind};
use crate::error::{Result, TransportError};
use crate::types::{CommandResult, DataResult, DeviceCommand, DeviceEndpoint, Endpoint, TransportResult};

/// Unit address 0 is a broadcast; no unit replies.
pub const BROADCAST_ADDRESS: u8 = 0;

const EXCEPTION_FLAG: u8 = 0x80;

/// Lower bound on the inter-frame silence, fixed by Modbus above 19200 baud.
const MIN_FRAME_GAP: Duration = Duration::from_micros(1750);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Line settings of one RS485 bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: DEFAULT_STOP_BITS,
            parity: Parity::None,
            timeout_ms: DEFAULT_SERIAL_TIMEOUT_MS,
        }
    }
}

impl SerialSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Silence that ends a frame: 3.5 characters of 11 bits.
    pub fn frame_gap(&self) -> Duration {
        let char_time_us = 11_000_000 / u64::from(self.baud_rate.max(1));
        Duration::from_micros(char_time_us * 35 / 10).max(MIN_FRAME_GAP)
    }

    fn open(&self) -> Result<tokio_serial::SerialStream> {
        use tokio_serial::SerialPortBuilderExt;

        let data_bits = match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                return Err(TransportError::Serial(format!("unsupported data bits {other}")));
            }
        };
        let stop_bits = match self.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => {
                return Err(TransportError::Serial(format!("unsupported stop bits {other}")));
            }
        };
        let parity = match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        };

        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(self.timeout())
            .open_native_async()?;
        Ok(stream)
    }
}

/// Byte stream a bus talks through: a serial port, or an in-memory pipe in tests.
pub trait BusStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BusStream for T {}

/// One physical RS485 line. Exchanges on it never interleave.
pub struct Rs485Bus {
    name: String,
    settings: SerialSettings,
    port: Mutex<Option<Box<dyn BusStream>>>,
}

impl std::fmt::Debug for Rs485Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rs485Bus")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Rs485Bus {
    /// A bus whose serial port is opened on first use.
    pub fn new(name: impl Into<String>, settings: SerialSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            port: Mutex::new(None),
        }
    }

    /// A bus over an already open stream.
    pub fn with_stream(
        name: impl Into<String>,
        settings: SerialSettings,
        stream: impl BusStream + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            port: Mutex::new(Some(Box::new(stream))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Send `pdu` to `unit` and read its reply while holding the bus.
    ///
    /// Returns the complete validated reply frame, or `None` for broadcasts
    /// and fire-and-forget writes.
    pub async fn exchange(&self, unit: u8, pdu: &[u8], expect_reply: bool) -> Result<Option<Bytes>> {
        let Some((&function, data)) = pdu.split_first() else {
            return Err(TransportError::frame("empty PDU"));
        };
        let request = encode_rtu(unit, function, data);
        if request.len() > MAX_FRAME_LEN {
            return Err(TransportError::frame(format!(
                "request of {} bytes exceeds RTU maximum",
                request.len()
            )));
        }

        let mut guard = self.port.lock().await;
        if guard.is_none() {
            debug!(bus = %self.name, port = %self.settings.port, "Opening serial port");
            *guard = Some(Box::new(self.settings.open()?));
        }
        let Some(port) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let outcome = self
            .transact(port, &request, unit, expect_reply && unit != BROADCAST_ADDRESS)
            .await;
        match &outcome {
            Err(e @ (TransportError::Io(_) | TransportError::ConnectionLost(_))) => {
                warn!(bus = %self.name, error = %e, "Dropping serial port after I/O failure");
                *guard = None;
            }
            Err(e) if leaves_line_dirty(e) => {
                debug!(bus = %self.name, unit, error = %e, "Resynchronizing bus");
                let timeout = self.settings.timeout();
                match drain(port, timeout, timeout * 2).await {
                    Ok(discarded) if discarded > 0 => {
                        debug!(bus = %self.name, discarded, "Discarded late bytes");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(bus = %self.name, error = %e, "Dropping serial port after failed resync");
                        *guard = None;
                    }
                }
            }
            _ => tokio::time::sleep(self.settings.frame_gap()).await,
        }
        outcome
    }

    async fn transact(
        &self,
        port: &mut Box<dyn BusStream>,
        request: &[u8],
        unit: u8,
        expect_reply: bool,
    ) -> Result<Option<Bytes>> {
        let timeout = self.settings.timeout();
        let timeout_ms = self.settings.timeout_ms;
        let gap = self.settings.frame_gap();

        let stale = drain(port, gap, timeout).await?;
        if stale > 0 {
            debug!(bus = %self.name, discarded = stale, "Discarded unsolicited bytes before request");
        }

        trace!(bus = %self.name, unit, frame = %hex::encode(request), "RS485 request");
        match tokio::time::timeout(timeout, async {
            port.write_all(request).await?;
            port.flush().await
        })
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransportError::WriteTimeout(timeout_ms)),
        }

        if !expect_reply {
            return Ok(None);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let reply = read_frame(port, deadline, gap, timeout_ms).await?;
        trace!(bus = %self.name, unit, frame = %hex::encode(&reply), "RS485 reply");
        check_reply(&reply, unit)?;
        Ok(Some(Bytes::from(reply)))
    }
}

/// Failures after which a late or partial reply may still be on the line.
fn leaves_line_dirty(e: &TransportError) -> bool {
    matches!(
        e,
        TransportError::ReadTimeout(_)
            | TransportError::Crc { .. }
            | TransportError::AddressMismatch { .. }
            | TransportError::FrameFormat(_)
    )
}

/// Discard input until the line has been silent for `quiet`, giving up after `limit`.
async fn drain(port: &mut Box<dyn BusStream>, quiet: Duration, limit: Duration) -> Result<usize> {
    let deadline = tokio::time::Instant::now() + limit;
    let mut buf = [0u8; MAX_FRAME_LEN];
    let mut discarded = 0;
    loop {
        let wait_until = deadline.min(tokio::time::Instant::now() + quiet);
        match tokio::time::timeout_at(wait_until, port.read(&mut buf)).await {
            Ok(Ok(0)) => {
                return Err(TransportError::ConnectionLost("serial port closed".to_string()));
            }
            Ok(Ok(n)) => discarded += n,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Ok(discarded),
        }
    }
}

async fn read_frame(
    port: &mut Box<dyn BusStream>,
    deadline: tokio::time::Instant,
    gap: Duration,
    timeout_ms: u64,
) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(64);
    let mut buf = [0u8; MAX_FRAME_LEN];
    loop {
        let wait_until = if frame.is_empty() {
            deadline
        } else {
            deadline.min(tokio::time::Instant::now() + gap)
        };
        match tokio::time::timeout_at(wait_until, port.read(&mut buf)).await {
            Ok(Ok(0)) if frame.is_empty() => {
                return Err(TransportError::ConnectionLost("serial port closed".to_string()));
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                frame.extend_from_slice(&buf[..n]);
                if frame.len() > MAX_FRAME_LEN {
                    return Err(TransportError::frame(format!(
                        "reply exceeds {MAX_FRAME_LEN} bytes"
                    )));
                }
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) if frame.is_empty() => return Err(TransportError::ReadTimeout(timeout_ms)),
            Err(_) => break,
        }
    }
    Ok(frame)
}

/// Validate a reply frame from `unit`: size, CRC, address, exception flag.
pub fn check_reply(frame: &[u8], unit: u8) -> Result<()> {
    check_frame(frame, unit)?;
    let function = frame[1];
    if function & EXCEPTION_FLAG != 0 {
        return Err(TransportError::Exception {
            function: function & !EXCEPTION_FLAG,
            code: frame.get(2).copied().unwrap_or(0),
        });
    }
    Ok(())
}

fn check_frame(frame: &[u8], unit: u8) -> Result<()> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(TransportError::frame(format!(
            "frame of {} bytes is shorter than {MIN_FRAME_LEN}",
            frame.len()
        )));
    }
    if let Err((expected, actual)) = verify_crc16(frame) {
        return Err(TransportError::Crc { expected, actual });
    }
    if frame[0] != unit {
        return Err(TransportError::AddressMismatch {
            expected: unit,
            actual: frame[0],
        });
    }
    Ok(())
}

/// RS485 adapter over a fixed set of named buses.
#[derive(Debug, Default)]
pub struct Rs485Transport {
    buses: HashMap<String, Arc<Rs485Bus>>,
}

impl Rs485Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(mut self, bus: Rs485Bus) -> Self {
        self.buses.insert(bus.name().to_string(), Arc::new(bus));
        self
    }

    pub fn bus(&self, name: &str) -> Option<Arc<Rs485Bus>> {
        self.buses.get(name).cloned()
    }

    pub fn bus_names(&self) -> Vec<&str> {
        self.buses.keys().map(String::as_str).collect()
    }
}

impl TransportAdapter for Rs485Transport {
    fn protocol_type(&self) -> TransportKind {
        TransportKind::Rs485
    }

    fn priority(&self) -> u8 {
        RS485_PRIORITY
    }

    fn supports(&self, endpoint: &Endpoint) -> bool {
        matches!(endpoint, Endpoint::Serial { bus, .. } if self.buses.contains_key(bus))
    }

    async fn send_command(
        &self,
        device: &DeviceEndpoint,
        command: &DeviceCommand,
    ) -> CommandResult {
        let started = Instant::now();
        let Endpoint::Serial { bus, unit } = &device.endpoint else {
            let err = TransportError::UnsupportedEndpoint(device.endpoint.to_string());
            return TransportResult::failed(&err, started.elapsed());
        };
        let Some(line) = self.buses.get(bus) else {
            return TransportResult::failed(&TransportError::UnknownBus(bus.clone()), started.elapsed());
        };

        let outcome = line
            .exchange(*unit, &command.payload, command.expect_reply)
            .await;
        if let Err(e) = &outcome {
            warn!(
                device = %device.device_id,
                bus = %bus,
                unit = *unit,
                command = %command.name,
                error = %e,
                "RS485 command failed"
            );
        }
        TransportResult::from_outcome(outcome, started.elapsed())
    }

    async fn receive_data(&self, device: &DeviceEndpoint, raw: &[u8]) -> DataResult {
        let started = Instant::now();
        let Endpoint::Serial { unit, .. } = &device.endpoint else {
            let err = TransportError::UnsupportedEndpoint(device.endpoint.to_string());
            return TransportResult::failed(&err, started.elapsed());
        };
        match check_frame(raw, *unit) {
            Ok(()) => TransportResult::ok(
                format!("{} bytes received", raw.len()),
                Some(Bytes::copy_from_slice(raw)),
                started.elapsed(),
            ),
            Err(e) => TransportResult::failed(&e, started.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use devgate_core::DeviceId;
    use devgate_protocol::handlers::rs485_modbus::{read_holding_registers, write_single_register};
    use rstest::rstest;

    fn settings() -> SerialSettings {
        SerialSettings {
            port: "test".into(),
            baud_rate: 115_200,
            timeout_ms: 200,
            ..SerialSettings::default()
        }
    }

    #[test]
    fn defaults_match_common_wiring() {
        let s = SerialSettings::default();
        assert_eq!((s.baud_rate, s.data_bits, s.stop_bits), (9600, 8, 1));
        assert_eq!(s.parity, Parity::None);
        assert_eq!(s.timeout_ms, 3000);
        // 3.5 chars at 9600 baud
        assert_eq!(s.frame_gap(), Duration::from_micros(4007));
        assert_eq!(settings().frame_gap(), MIN_FRAME_GAP);
    }

    #[rstest]
    #[case::ok(read_holding_registers(5, 0, 1).to_vec(), 5, None)]
    #[case::short(vec![5, 3, 0], 5, Some(FailureKind::FrameFormat))]
    #[case::bad_crc(vec![5, 3, 0, 0, 0, 1, 0, 0], 5, Some(FailureKind::Checksum))]
    #[case::other_unit(read_holding_registers(6, 0, 1).to_vec(), 5, Some(FailureKind::AddressMismatch))]
    #[case::exception(encode_rtu(5, 0x83, &[0x02]).to_vec(), 5, Some(FailureKind::DeviceException))]
    fn reply_checks(#[case] frame: Vec<u8>, #[case] unit: u8, #[case] failure: Option<FailureKind>) {
        assert_eq!(check_reply(&frame, unit).err().map(|e| e.kind()), failure);
    }

    #[tokio::test]
    async fn exchange_returns_validated_reply() {
        let (gateway_side, mut device_side) = tokio::io::duplex(256);
        let bus = Rs485Bus::with_stream("bus0", settings(), gateway_side);

        let device = tokio::spawn(async move {
            let mut req = [0u8; 8];
            device_side.read_exact(&mut req).await.unwrap();
            assert_eq!(&req[..], &write_single_register(3, 0x10, 7)[..]);
            device_side.write_all(&req).await.unwrap();
        });

        let reply = bus
            .exchange(3, &[0x06, 0x00, 0x10, 0x00, 0x07], true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, write_single_register(3, 0x10, 7));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn silent_unit_times_out() {
        let (gateway_side, _device_side) = tokio::io::duplex(256);
        let bus = Rs485Bus::with_stream("bus0", settings(), gateway_side);
        let err = bus.exchange(9, &[0x03, 0, 0, 0, 1], true).await.unwrap_err();
        assert!(matches!(err, TransportError::ReadTimeout(200)));
    }

    #[tokio::test]
    async fn broadcast_does_not_wait_for_reply() {
        let (gateway_side, _device_side) = tokio::io::duplex(256);
        let bus = Rs485Bus::with_stream("bus0", settings(), gateway_side);
        let reply = bus
            .exchange(BROADCAST_ADDRESS, &[0x06, 0, 1, 0, 1], true)
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn unknown_bus_is_configuration_failure() {
        let transport = Rs485Transport::new();
        let device = DeviceEndpoint::new(
            DeviceId::new("RS_1").unwrap(),
            Endpoint::Serial {
                bus: "missing".into(),
                unit: 1,
            },
        );
        assert!(!transport.supports(&device.endpoint));
        let result = transport
            .send_command(&device, &DeviceCommand::new("read", Bytes::from_static(&[0x03, 0, 0, 0, 1])))
            .await;
        assert_eq!(result.failure, Some(FailureKind::Configuration));
    }

    #[tokio::test]
    async fn receive_data_checks_crc_and_unit() {
        let transport = Rs485Transport::new();
        let device = DeviceEndpoint::new(
            DeviceId::new("RS_4").unwrap(),
            Endpoint::Serial {
                bus: "bus0".into(),
                unit: 4,
            },
        );
        assert!(transport.receive_data(&device, &read_holding_registers(4, 0, 2)).await.success);
        let wrong = transport.receive_data(&device, &read_holding_registers(2, 0, 2)).await;
        assert_eq!(wrong.failure, Some(FailureKind::AddressMismatch));
    }
}
