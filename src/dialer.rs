use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::url::ConnectionUrl;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a single connection attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("connection to {address} timed out after {after:?}")]
    Timeout { address: String, after: Duration },

    #[error("connection to {address} failed: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {address} rejected: {reason}")]
    Rejected { address: String, reason: String },

    #[error("overall connection deadline elapsed")]
    DeadlineElapsed,
}

/// Opens a connection to one candidate.
///
/// Per-attempt timeouts belong to the implementation.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Connection: Send;

    async fn dial(&self, url: &ConnectionUrl) -> Result<Self::Connection, DialError>;
}

/// Treats a server as reachable when its port accepts a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    timeout: Duration,
}

impl TcpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(DEFAULT_DIAL_TIMEOUT)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Connection = TcpStream;

    async fn dial(&self, url: &ConnectionUrl) -> Result<TcpStream, DialError> {
        let address = url.socket_address();
        // IPv6 literals come out of the url bracketed
        let host = url.host.trim_start_matches('[').trim_end_matches(']');

        match tokio::time::timeout(self.timeout, TcpStream::connect((host, url.port))).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(DialError::Io { address, source }),
            Err(_) => Err(DialError::Timeout { address, after: self.timeout }),
        }
    }
}
