//! Stable device identifiers

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Identifier of a physical device.
///
/// A `DeviceId` is always derived from what the network tells us about a
/// device (its agent device name, the agent port and the MAC address of the
/// host), so the same machine maps to the same identifier across rescans and
/// process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

/// Returned when a string is not a well-formed device identifier
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid device id: {0:?}")]
pub struct InvalidDeviceId(pub String);

impl DeviceId {
    /// Derive the identifier for a device.
    ///
    /// The key `"{name}|{port}|{mac}"` is hashed with SHA-256, the digest is
    /// reversed and base64 encoded, and everything except ASCII letters and
    /// digits is dropped before upper-casing. A missing MAC address hashes as
    /// the empty string.
    pub fn derive(device_name: &str, port: u16, mac_address: Option<&str>) -> Self {
        let key = format!("{}|{}|{}", device_name, port, mac_address.unwrap_or(""));
        let mut digest = Sha256::digest(key.as_bytes()).to_vec();
        digest.reverse();

        let encoded = STANDARD.encode(&digest);
        Self(
            encoded
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .map(|c| c.to_ascii_uppercase())
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = InvalidDeviceId;

    /// Parse a previously derived identifier (stored rows, request paths)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase());
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidDeviceId(s.to_string()))
        }
    }
}

impl TryFrom<String> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}
