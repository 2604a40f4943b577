use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::error::Error;

/// Default limit on concurrently open yamux streams per connection.
pub const DEFAULT_MAX_STREAMS: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    /// Largest frame payload accepted or produced.
    pub max_payload_size: usize,
    /// Open logical streams allowed on one connection.
    pub max_streams: usize,
    /// Pause after each emitted prime factor, to show incremental delivery.
    pub factor_delay: Duration,
}

impl Config {
    pub fn new() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_streams: DEFAULT_MAX_STREAMS,
            factor_delay: Duration::ZERO,
        }
    }

    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_max_streams(mut self, streams: usize) -> Self {
        self.max_streams = streams;
        self
    }

    pub fn with_factor_delay(mut self, delay: Duration) -> Self {
        self.factor_delay = delay;
        self
    }

    pub(crate) fn yamux(&self) -> yamux::Config {
        let mut config = yamux::Config::default();
        config.set_max_num_streams(self.max_streams);
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a server listens or a client connects.
///
/// Parses from `unix:<path>`, `tcp:<host:port>` or `vsock:<cid>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidArgument(format!("invalid endpoint '{s}'"));
        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;
        match scheme {
            "unix" if !rest.is_empty() => Ok(Endpoint::Unix(PathBuf::from(rest))),
            "tcp" => rest.parse().map(Endpoint::Tcp).map_err(|_| invalid()),
            "vsock" => {
                let (cid, port) = rest.split_once(':').ok_or_else(invalid)?;
                Ok(Endpoint::Vsock {
                    cid: cid.parse().map_err(|_| invalid())?,
                    port: port.parse().map_err(|_| invalid())?,
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
            Endpoint::Vsock { cid, port } => write!(f, "vsock:{}:{}", cid, port),
        }
    }
}
