use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Default address probed for reachability (public DNS over TCP)
pub const DEFAULT_PROBE_ADDRESS: &str = "8.8.8.8:53";

/// Connect timeout for the TCP probe.
/// 3s is long enough for a slow mobile link but keeps polls cheap.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 3;

/// A single yes/no reachability check.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Considers the network up if a TCP connection to `address` succeeds.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_ADDRESS)
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(address = %self.address, error = %e, "Probe connection failed");
                false
            }
            Err(_) => {
                debug!(address = %self.address, "Probe timed out");
                false
            }
        }
    }
}
