use log::{debug, warn};
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net;

use crate::{Error, Result};

/// A type which can map a service name such as "nbd" to a port number for a
/// given protocol such as "tcp".
pub trait ServiceLookup {
    fn lookup(&self, name: &str, protocol: &str) -> Option<u16>;
}

impl<F> ServiceLookup for F
where
    F: Fn(&str, &str) -> Option<u16>,
{
    fn lookup(&self, name: &str, protocol: &str) -> Option<u16> {
        self(name, protocol)
    }
}

/// A [`ServiceLookup`] backed by a services(5) database, `/etc/services` by
/// default. The file is read on every lookup.
#[derive(Clone, Debug)]
pub struct EtcServices {
    path: PathBuf,
}

impl Default for EtcServices {
    fn default() -> Self {
        Self::new("/etc/services")
    }
}

impl EtcServices {
    /// Uses the services database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ServiceLookup for EtcServices {
    fn lookup(&self, name: &str, protocol: &str) -> Option<u16> {
        // A missing or unreadable database is the same as an unknown service.
        let contents = fs::read_to_string(&self.path).ok()?;
        find_service(&contents, name, protocol)
    }
}

/// Finds the port for `name` (or one of its aliases) and `protocol` within
/// services(5) formatted `contents`.
fn find_service(contents: &str, name: &str, protocol: &str) -> Option<u16> {
    contents.lines().find_map(|line| {
        // Strip comments, then expect: name port/protocol [aliases...]
        let line = line.split('#').next()?;
        let mut fields = line.split_whitespace();

        let service = fields.next()?;
        let (port, proto) = fields.next()?.split_once('/')?;
        if proto != protocol {
            return None;
        }
        if service != name && !fields.any(|alias| alias == name) {
            return None;
        }

        port.parse().ok()
    })
}

/// Denotes how a [`Port`] number was determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortSource {
    /// The port was a decimal number.
    Numeric,
    /// The port was a service name found by a [`ServiceLookup`].
    Service,
    /// The port could not be resolved and the caller's default was used.
    Default,
}

/// A port number and how it was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Port {
    pub number: u16,
    pub source: PortSource,
}

/// Resolves `port` as a decimal number, then as a service name for
/// `protocol`, and finally falls back to `default`. Callers which must not
/// silently use `default` should check for [`PortSource::Default`].
///
/// Decimal values outside of the range of a port number are not truncated,
/// they are looked up as service names instead.
pub fn lookup_port(
    port: &str,
    protocol: &str,
    default: u16,
    services: &dyn ServiceLookup,
) -> Port {
    if let Ok(number) = port.parse() {
        return Port {
            number,
            source: PortSource::Numeric,
        };
    }

    if let Some(number) = services.lookup(port, protocol) {
        debug!("resolved service {port:?}/{protocol} to port {number}");
        return Port {
            number,
            source: PortSource::Service,
        };
    }

    warn!("unknown port {port:?}/{protocol}, using default port {default}");
    Port {
        number: default,
        source: PortSource::Default,
    }
}

/// The address family of an [`EndpointAddress`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// The transport of an [`EndpointAddress`]. NBD only runs over streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Stream,
}

/// A single resolved, connectable NBD server address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointAddress {
    addr: SocketAddr,
}

impl EndpointAddress {
    /// Resolves `host` (a name or literal address) and `port` using the
    /// system resolver. Only the first address returned is used.
    pub async fn resolve(host: &str, port: u16) -> Result<Self> {
        let fail = |reason: String| Error::Resolve {
            host: host.to_string(),
            port: port.to_string(),
            reason,
        };

        if host.is_empty() {
            return Err(fail("host must not be empty".to_string()));
        }

        let addr = net::lookup_host((host, port))
            .await
            .map_err(|err| fail(err.to_string()))?
            .next()
            .ok_or_else(|| fail("no addresses found".to_string()))?;

        debug!("resolved {host} port {port} to {addr}");
        Ok(Self { addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn family(&self) -> Family {
        match self.addr {
            SocketAddr::V4(_) => Family::V4,
            SocketAddr::V6(_) => Family::V6,
        }
    }

    pub fn transport(&self) -> Transport {
        Transport::Stream
    }
}

impl From<SocketAddr> for EndpointAddress {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{} {}", self.addr.ip(), self.addr.port())
    }
}
