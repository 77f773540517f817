//! Shared data models for the collector

mod agent;
mod asset;
mod connection;
mod definitions;
mod discovered;
mod sample;
mod status;

pub use agent::*;
pub use asset::*;
pub use connection::*;
pub use definitions::*;
pub use discovered::*;
pub use sample::*;
pub use status::*;
