use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a protocol type code.
const MAX_PROTOCOL_TYPE_LEN: usize = 64;

/// Maximum length of a device identifier.
const MAX_DEVICE_ID_LEN: usize = 64;

/// Stable identity key of a protocol handler, e.g. `ACCESS_ENTROPY_V4.8`.
///
/// Codes are uppercase ASCII letters, digits, `_` and `.`; input is trimmed and
/// uppercased before validation so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolType(String);

impl ProtocolType {
    /// Create a new protocol type code with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidProtocolType` if the code is empty, too long or
    /// contains characters outside `[A-Z0-9_.]`.
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() || code.len() > MAX_PROTOCOL_TYPE_LEN {
            return Err(Error::InvalidProtocolType(format!(
                "length must be 1-{MAX_PROTOCOL_TYPE_LEN}, got {}",
                code.len()
            )));
        }
        if !code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
        {
            return Err(Error::InvalidProtocolType(code));
        }
        Ok(Self(code))
    }

    /// Build a code from a compile-time constant.
    ///
    /// The constant must already satisfy the rules enforced by [`Self::new`].
    #[must_use]
    pub fn from_static(code: &'static str) -> Self {
        debug_assert!(Self::new(code).is_ok(), "invalid protocol type constant {code}");
        Self(code.to_ascii_uppercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProtocolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProtocolType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<ProtocolType> for String {
    fn from(value: ProtocolType) -> Self {
        value.0
    }
}

/// Category of terminal a handler speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    AccessController,
    AttendanceClock,
    ConsumePos,
    Rs485Terminal,
    Camera,
}

impl DeviceType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessController => "access_controller",
            Self::AttendanceClock => "attendance_clock",
            Self::ConsumePos => "consume_pos",
            Self::Rs485Terminal => "rs485_terminal",
            Self::Camera => "camera",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "access_controller" | "access" => Ok(Self::AccessController),
            "attendance_clock" | "attendance" => Ok(Self::AttendanceClock),
            "consume_pos" | "consume" => Ok(Self::ConsumePos),
            "rs485_terminal" | "rs485" => Ok(Self::Rs485Terminal),
            "camera" | "video" => Ok(Self::Camera),
            _ => Err(Error::UnknownDeviceType(s.to_string())),
        }
    }
}

/// Device vendor name, normalized to lowercase for lookups.
///
/// Keeps the display form as given so logs show `ZKTeco` rather than `zkteco`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Manufacturer {
    display: String,
    key: String,
}

impl Manufacturer {
    pub fn new(name: &str) -> Self {
        let display = name.trim().to_string();
        let key = display.to_ascii_lowercase();
        Self { display, key }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Case-folded key used for equality and hashing.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for Manufacturer {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Manufacturer {}

impl std::hash::Hash for Manufacturer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl From<String> for Manufacturer {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for Manufacturer {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Manufacturer> for String {
    fn from(value: Manufacturer) -> Self {
        value.display
    }
}

/// Identifier of a physical terminal, e.g. a serial number like `ACCESS_001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device id with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the id is empty after trimming,
    /// longer than 64 bytes or contains control characters.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() || id.len() > MAX_DEVICE_ID_LEN {
            return Err(Error::InvalidDeviceId(format!(
                "length must be 1-{MAX_DEVICE_ID_LEN}, got {}",
                id.len()
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(Error::InvalidDeviceId(id.escape_debug().to_string()));
        }
        Ok(Self(id.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}
