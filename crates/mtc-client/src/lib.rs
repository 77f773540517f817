//! mtc-client - MTConnect agent client
//!
//! Issues the MTConnect request verbs (`probe`, `current`, `sample`,
//! `assets`) against an agent and parses the XML response documents into
//! plain Rust types.
//!
//! # Example
//!
//! ```ignore
//! use mtc_client::AgentClient;
//!
//! let client = AgentClient::new("http://10.0.0.5:5000", Some("VMC-3Axis"))?;
//! let devices = client.probe().await?;
//! let current = client.current().await?;
//! let next = client.sample(current.header.next_sequence.unwrap_or(0), 500).await?;
//! ```

pub mod client;
pub mod document;
pub mod error;
pub mod testing;

pub use client::AgentClient;
pub use document::{
    AssetElement, AssetsDocument, ComponentElement, DataItemElement, DeviceElement, DeviceStream,
    DevicesDocument, Header, Observation, StreamsDocument,
};
pub use error::{AgentClientError, Result};
