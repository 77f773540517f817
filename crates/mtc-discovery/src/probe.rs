//! MTConnect probe of a candidate endpoint

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use mtc_client::AgentClient;
use tracing::{debug, trace};

/// Issue a `probe` request and return the device names in the response.
///
/// Anything other than a well-formed devices document means there is no
/// agent on this endpoint and yields `None`.
pub async fn probe_device_names(address: IpAddr, port: u16, timeout: Duration) -> Option<Vec<String>> {
    let url = format!("http://{}", SocketAddr::new(address, port));
    let client = AgentClient::with_timeout(&url, None, timeout).ok()?;

    match client.probe().await {
        Ok(document) => {
            debug!(%url, devices = document.devices.len(), "Probe successful");
            Some(document.device_names())
        }
        Err(e) => {
            trace!(%url, error = %e, "Probe failed");
            None
        }
    }
}
