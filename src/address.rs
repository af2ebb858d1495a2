//! Node addresses and seed lists.
//!
//! Addresses are written as `host[:port]`; a seed list is a comma
//! separated sequence of them, e.g. `host1:27017,host2,host3:27019`.
//! Entries without a port use the cluster's standard port.

use std::fmt;
use std::str::FromStr;

use crate::errors::ClusterError;

/// The standard port a cluster node listens on.
pub const DEFAULT_PORT: u16 = 27017;

/// A single `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host[:port]`, falling back to `default_port` when the port
    /// is omitted.
    pub fn parse(address: &str, default_port: u16) -> Result<Self, ClusterError> {
        let address = address.trim();
        let invalid = |reason: &str| ClusterError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = match address.split_once(':') {
            Some((host, port)) => {
                if port.contains(':') {
                    return Err(invalid("more than one ':' separator"));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid("port is not a number between 0 and 65535"))?;
                (host, port)
            }
            None => (address, default_port),
        };

        if host.is_empty() {
            return Err(invalid("host is empty"));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(invalid("host contains whitespace"));
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s, DEFAULT_PORT)
    }
}

/// Ordered list of already-known members used to reach an existing set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedList(Vec<Endpoint>);

impl SeedList {
    /// Parse a comma separated list.  Blank entries are skipped; a list
    /// with no entries at all is rejected.
    pub fn parse(list: &str, default_port: u16) -> Result<Self, ClusterError> {
        let endpoints = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| Endpoint::parse(entry, default_port))
            .collect::<Result<Vec<_>, _>>()?;

        if endpoints.is_empty() {
            return Err(ClusterError::InvalidAddress {
                address: list.to_string(),
                reason: "seed list is empty".to_string(),
            });
        }
        Ok(Self(endpoints))
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Endpoint>> for SeedList {
    fn from(endpoints: Vec<Endpoint>) -> Self {
        Self(endpoints)
    }
}

impl fmt::Display for SeedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, endpoint) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{endpoint}")?;
        }
        Ok(())
    }
}
