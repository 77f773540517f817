//! Address and port ranges

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// Largest number of addresses a single range may expand to
pub const MAX_RANGE_ADDRESSES: usize = 65_536;

/// Ports scanned when no port range is configured
pub const DEFAULT_PORT_START: u16 = 5000;
pub const DEFAULT_PORT_COUNT: u16 = 20;

/// Addresses to scan: `allow ∪ minimum..=maximum`, minus `deny`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    #[serde(default)]
    pub minimum: Option<String>,
    #[serde(default)]
    pub maximum: Option<String>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl AddressRange {
    pub fn between(minimum: &str, maximum: &str) -> Self {
        Self {
            minimum: Some(minimum.into()),
            maximum: Some(maximum.into()),
            ..Default::default()
        }
    }

    pub fn single(address: &str) -> Self {
        Self {
            allow: vec![address.into()],
            ..Default::default()
        }
    }

    /// Expand the range into a de-duplicated address list, allow-list first
    pub fn resolve(&self) -> Result<Vec<IpAddr>, DiscoveryError> {
        let deny: HashSet<IpAddr> = self
            .deny
            .iter()
            .map(|s| parse_ip(s))
            .collect::<Result<_, _>>()?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |ip: IpAddr| {
            if !deny.contains(&ip) && seen.insert(ip) {
                out.push(ip);
            }
        };

        for s in &self.allow {
            push(parse_ip(s)?);
        }

        match (&self.minimum, &self.maximum) {
            (Some(min), Some(max)) => {
                let min = parse_v4(min)?;
                let max = parse_v4(max)?;
                let (lo, hi) = (u32::from(min), u32::from(max));
                if lo > hi {
                    return Err(DiscoveryError::InvalidRange(format!(
                        "minimum {} is above maximum {}",
                        min, max
                    )));
                }
                if (hi - lo) as usize >= MAX_RANGE_ADDRESSES {
                    return Err(DiscoveryError::InvalidRange(format!(
                        "{} - {} spans more than {} addresses",
                        min, max, MAX_RANGE_ADDRESSES
                    )));
                }
                for raw in lo..=hi {
                    push(IpAddr::V4(Ipv4Addr::from(raw)));
                }
            }
            (None, None) => {}
            _ => {
                return Err(DiscoveryError::InvalidRange(
                    "address range needs both minimum and maximum".into(),
                ))
            }
        }

        Ok(out)
    }
}

/// Ports to probe: `allow ∪ minimum..=maximum`, minus `deny`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    #[serde(default)]
    pub minimum: Option<u16>,
    #[serde(default)]
    pub maximum: Option<u16>,
    #[serde(default)]
    pub allow: Vec<u16>,
    #[serde(default)]
    pub deny: Vec<u16>,
}

impl PortRange {
    pub fn between(minimum: u16, maximum: u16) -> Self {
        Self {
            minimum: Some(minimum),
            maximum: Some(maximum),
            ..Default::default()
        }
    }

    pub fn single(port: u16) -> Self {
        Self {
            allow: vec![port],
            ..Default::default()
        }
    }

    /// The range used when nothing is configured: 5000 through 5019
    pub fn default_agent_ports() -> Self {
        Self::between(DEFAULT_PORT_START, DEFAULT_PORT_START + DEFAULT_PORT_COUNT - 1)
    }

    pub fn resolve(&self) -> Result<Vec<u16>, DiscoveryError> {
        let deny: HashSet<u16> = self.deny.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        let bounded = match (self.minimum, self.maximum) {
            (Some(min), Some(max)) if min > max => {
                return Err(DiscoveryError::InvalidRange(format!(
                    "minimum port {} is above maximum {}",
                    min, max
                )))
            }
            (Some(min), Some(max)) => min..=max,
            (None, None) => 1..=0,
            _ => {
                return Err(DiscoveryError::InvalidRange(
                    "port range needs both minimum and maximum".into(),
                ))
            }
        };

        for port in self.allow.iter().copied().chain(bounded) {
            if port == 0 {
                return Err(DiscoveryError::InvalidRange("port 0 is not valid".into()));
            }
            if !deny.contains(&port) && seen.insert(port) {
                out.push(port);
            }
        }

        Ok(out)
    }
}

fn parse_ip(s: &str) -> Result<IpAddr, DiscoveryError> {
    s.trim()
        .parse()
        .map_err(|_| DiscoveryError::InvalidRange(format!("'{}' is not an IP address", s)))
}

fn parse_v4(s: &str) -> Result<Ipv4Addr, DiscoveryError> {
    s.trim()
        .parse()
        .map_err(|_| DiscoveryError::InvalidRange(format!("'{}' is not an IPv4 address", s)))
}
