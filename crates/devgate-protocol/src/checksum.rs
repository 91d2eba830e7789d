//! Frame checksums.
//!
//! Binary TCP protocols trail their frames with a CRC-32 (ISO-HDLC, the
//! zlib/Ethernet polynomial). RS485 frames use CRC-16/MODBUS, transmitted
//! low byte first.

use crc::{CRC_16_MODBUS, CRC_32_ISO_HDLC, Crc};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc16_modbus(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Append the CRC-16/MODBUS of `frame` in wire order (low byte first).
pub fn append_crc16(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing CRC-16 of an RS485 frame.
///
/// Returns `(expected, actual)` on mismatch. Frames shorter than the CRC
/// itself report an actual value of zero.
pub fn verify_crc16(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < 2 {
        return Err((0, 0));
    }
    let (body, trailer) = frame.split_at(frame.len() - 2);
    let actual = u16::from_le_bytes([trailer[0], trailer[1]]);
    let expected = crc16_modbus(body);
    if expected == actual {
        Ok(())
    } else {
        Err((expected, actual))
    }
}
