//! TCP port check

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::trace;

/// Whether a TCP connection to `address:port` succeeds within `timeout`
pub async fn port_open(address: IpAddr, port: u16, timeout: Duration) -> bool {
    let target = SocketAddr::new(address, port);
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_)) => {
            trace!(%target, "Port open");
            true
        }
        Ok(Err(e)) => {
            trace!(%target, error = %e, "Port closed");
            false
        }
        Err(_) => {
            trace!(%target, "Port timed out");
            false
        }
    }
}
