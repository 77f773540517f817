//! mtc-discovery - Finds MTConnect agents on the local network
//!
//! A scan runs in three stages per network interface:
//!
//! ```text
//!  addresses ──► PingSweeper ──► responsive ──► PortProber ──► open ports
//!                                                                  │
//!            DeviceFound ◄── DeviceProbe (GET /probe) ◄────────────┘
//! ```
//!
//! [`DeviceFinder`] drives the stages, de-duplicates what the probes report
//! and repeats the scan on the configured interval.

pub mod arp;
pub mod error;
pub mod finder;
pub mod network;
pub mod ping;
pub mod port;
pub mod probe;
pub mod range;
pub mod scope;

pub use error::DiscoveryError;
pub use finder::{DeviceFinder, FinderEvent};
pub use network::{NetworkProbe, SystemNetwork};
pub use range::{AddressRange, PortRange};
pub use scope::{NetworkInterfaceScope, ResolvedScope};
