//! Reachability polling

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Interval between boot-wait connection attempts
pub const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll until a TCP connection to `addr` succeeds.
///
/// There is no overall deadline: a host that never opens the port keeps the
/// caller waiting. Each individual attempt is bounded by `interval`.
pub async fn wait_for_port(addr: SocketAddr, interval: Duration) {
    let mut attempts: u64 = 0;
    loop {
        attempts += 1;
        match tokio::time::timeout(interval, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => {
                debug!(addr = %addr, attempts, "Port is open");
                return;
            }
            Ok(Err(e)) => {
                trace!(addr = %addr, attempts, "Port not open yet: {}", e);
            }
            Err(_) => {
                trace!(addr = %addr, attempts, "Connection attempt timed out");
            }
        }
        if attempts % 6 == 0 {
            debug!(addr = %addr, "Still waiting for port...");
        }
        tokio::time::sleep(interval).await;
    }
}
