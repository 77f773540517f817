//! HTTP request handlers for the query facade

pub mod connections;
pub mod devices;
