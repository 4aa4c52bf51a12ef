use log::info;
use std::fmt;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;

use crate::connection::Connection;
use crate::consts::*;
use crate::geometry::{Geometry, Limits};
use crate::handshake::{RawConnection, State};
use crate::resolve::{self, EndpointAddress, EtcServices, Port, PortSource, ServiceLookup};
use crate::{Error, Result};

/// An NBD client which resolves, connects to and performs the oldstyle
/// handshake with an NBD server, producing a [`Session`] ready to be handed
/// to a block device.
///
/// A `Client` only holds configuration and may be reused for any number of
/// connections; each one is negotiated independently.
pub struct Client {
    block_size: u32,
    limits: Limits,
    default_port: u16,
    protocol: String,
    services: Box<dyn ServiceLookup + Send + Sync>,
    strict_port: bool,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Client")
            .field("block_size", &self.block_size)
            .field("limits", &self.limits)
            .field("default_port", &self.default_port)
            .field("protocol", &self.protocol)
            .field("strict_port", &self.strict_port)
            .finish()
    }
}

impl Client {
    /// Creates a `Client` which requests 1024 byte blocks, falls back to port
    /// 10809 and looks up service names in `/etc/services`.
    pub fn new() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            limits: Limits::default(),
            default_port: NBD_DEFAULT_PORT,
            protocol: DEFAULT_PROTOCOL.to_string(),
            services: Box::new(EtcServices::default()),
            strict_port: false,
        }
    }

    /// Sets the block size used to divide the export into blocks.
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the size limits an export must satisfy.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the port used when a port cannot be resolved.
    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Sets the protocol used to look up service names, "tcp" by default.
    pub fn protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }

    /// Sets the [`ServiceLookup`] used to resolve service names.
    pub fn services(mut self, services: impl ServiceLookup + Send + Sync + 'static) -> Self {
        self.services = Box::new(services);
        self
    }

    /// When enabled, a port which is neither numeric nor a known service is an
    /// error rather than falling back to the default port.
    pub fn strict_port(mut self, strict: bool) -> Self {
        self.strict_port = strict;
        self
    }

    /// Resolves `port` to a number according to the `Client`'s configuration.
    pub fn lookup_port(&self, port: &str) -> Port {
        resolve::lookup_port(
            port,
            &self.protocol,
            self.default_port,
            self.services.as_ref(),
        )
    }

    /// Resolves `host` and `port` to a single connectable address.
    pub async fn resolve(&self, host: &str, port: &str) -> Result<EndpointAddress> {
        let resolved = self.lookup_port(port);
        if self.strict_port && resolved.source == PortSource::Default {
            return Err(Error::Resolve {
                host: host.to_string(),
                port: port.to_string(),
                reason: format!("unknown {} service", self.protocol),
            });
        }

        EndpointAddress::resolve(host, resolved.number).await
    }

    /// Resolves and connects to the NBD server at `host` and `port`, then
    /// performs the handshake.
    pub async fn connect(&self, host: &str, port: &str) -> Result<Session<TcpStream>> {
        let endpoint = self.resolve(host, port).await?;
        let conn = Connection::open(&endpoint).await?;

        self.negotiate(conn).await
    }

    /// Performs the handshake over an established [`Connection`].
    pub async fn negotiate(&self, conn: Connection) -> Result<Session<TcpStream>> {
        let (stream, endpoint) = conn.into_parts();

        let mut session = self.handshake(stream).await?;
        session.endpoint = Some(endpoint);
        Ok(session)
    }

    /// Performs the oldstyle NBD handshake using `stream` (typically a TCP
    /// connection, but this is not required) to produce a [`Session`].
    ///
    /// On error, `stream` is dropped.
    pub async fn handshake<S: AsyncRead + Unpin>(&self, stream: S) -> Result<Session<S>> {
        let mut conn = RawConnection::new(stream);

        let mut state = State::AwaitPassword;
        let size = loop {
            state = match state {
                State::Negotiated { size } => break size,
                state => conn.read_frame(state, &self.limits).await?,
            };
        };

        info!("negotiated export size = {} KiB", size >> 10);

        let geometry = Geometry::negotiate(size, self.block_size, &self.limits)?;

        Ok(Session {
            stream: conn.into_inner(),
            endpoint: None,
            geometry,
        })
    }
}

/// A stream which completed the NBD handshake and the [`Geometry`] negotiated
/// for it. Once handed off, I/O on the stream belongs to the data transmission
/// phase.
#[derive(Debug)]
pub struct Session<S> {
    stream: S,
    endpoint: Option<EndpointAddress>,
    geometry: Geometry,
}

impl<S> Session<S> {
    /// The negotiated export geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// The server endpoint, if the session was established by a [`Client`]
    /// connection rather than a caller-provided stream.
    pub fn endpoint(&self) -> Option<&EndpointAddress> {
        self.endpoint.as_ref()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Consumes the session, returning the stream and its geometry.
    pub fn into_parts(self) -> (S, Geometry) {
        (self.stream, self.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_bytes(size: u64) -> Vec<u8> {
        [
            &INIT_PASSWD[..],
            &CLISERV_MAGIC.to_be_bytes(),
            &size.to_be_bytes(),
            &[0u8; RESERVED_LEN],
        ]
        .concat()
    }

    macro_rules! handshake_ok_tests {
        ($($name:ident: $value:expr,)*) => {
        $(
            #[tokio::test]
            async fn $name() {
                let (client, size, want_blocks): (Client, u64, u64) = $value;
                let buf = handshake_bytes(size);

                let session = client.handshake(&buf[..]).await.expect("failed to perform handshake");

                let geometry = session.geometry();
                assert_eq!(geometry.size(), size, "unexpected export size");
                assert_eq!(geometry.blocks(), want_blocks, "unexpected block count");
                assert!(session.endpoint().is_none());
                assert!(session.stream().is_empty(), "handshake bytes were left unread");
            }
        )*
        }
    }

    handshake_ok_tests! {
        default_block_size: (Client::new(), MiB, 1024),
        zero_size: (Client::new(), 0, 0),
        block_size_4k: (Client::new().block_size(4096), 256 * MiB, 65536),
        block_size_odd: (Client::new().block_size(1000), MiB, 1048),
        limits_32_bit: (Client::new().limits(Limits::bits(32)), 1 << 40, 1 << 30),
    }

    macro_rules! handshake_err_tests {
        ($($name:ident: $value:expr,)*) => {
        $(
            #[tokio::test]
            async fn $name() {
                let (client, buf, check): (Client, Vec<u8>, fn(&Error) -> bool) = $value;

                let err = client.handshake(&buf[..]).await.expect_err("handshake succeeded");

                assert!(check(&err), "unexpected handshake error: {:?}", err);
            }
        )*
        }
    }

    handshake_err_tests! {
        bad_password: (
            Client::new(),
            [&b"NBDMAGIK"[..], &handshake_bytes(MiB)[8..]].concat(),
            |err| matches!(err, Error::BadPassword(p) if p == b"NBDMAGIK"),
        ),
        bad_magic: (
            Client::new(),
            [&INIT_PASSWD[..], &[0; 8], &MiB.to_be_bytes(), &[0; RESERVED_LEN]].concat(),
            |err| matches!(err, Error::BadMagic(0)),
        ),
        export_too_large: (
            Client::new().limits(Limits::bits(32)),
            handshake_bytes(1 << 41),
            |err| matches!(err, Error::ExportTooLarge { .. }),
        ),
        device_too_large: (
            Client::new().limits(Limits::bits(32)).block_size(1),
            handshake_bytes(1 << 31),
            |err| matches!(err, Error::DeviceTooLarge { blocks, .. } if *blocks == 1 << 31),
        ),
        invalid_block_size: (
            Client::new().block_size(0),
            handshake_bytes(MiB),
            |err| matches!(err, Error::InvalidBlockSize),
        ),
        peer_closed: (Client::new(), Vec::new(), |err| matches!(err, Error::PeerClosed)),
        truncated: (
            Client::new(),
            INIT_PASSWD[..4].to_vec(),
            |err| matches!(err, Error::TruncatedHandshake(crate::FrameType::Password)),
        ),
    }

    #[test]
    fn lookup_port() {
        let client = Client::new()
            .default_port(1)
            .protocol("udp")
            .services(|name: &str, protocol: &str| match (name, protocol) {
                ("nbd", "udp") => Some(10809),
                _ => None,
            });

        assert_eq!(client.lookup_port("22").source, PortSource::Numeric);
        assert_eq!(
            client.lookup_port("nbd"),
            Port {
                number: 10809,
                source: PortSource::Service
            }
        );
        assert_eq!(
            client.lookup_port("ssh"),
            Port {
                number: 1,
                source: PortSource::Default
            }
        );
    }

    #[tokio::test]
    async fn resolve_strict_port() {
        let client = Client::new()
            .services(|_: &str, _: &str| None)
            .strict_port(true);

        let err = client
            .resolve("127.0.0.1", "nbd")
            .await
            .expect_err("resolved unknown service");

        assert!(
            matches!(&err, Error::Resolve { port, .. } if port == "nbd"),
            "expected Error::Resolve, but got: {err:?}"
        );

        let endpoint = client
            .resolve("127.0.0.1", "10809")
            .await
            .expect("failed to resolve numeric port");
        assert_eq!(endpoint.port(), 10809);
    }

    #[tokio::test]
    async fn resolve_default_port() {
        let client = Client::new()
            .services(|_: &str, _: &str| None)
            .default_port(12345);

        let endpoint = client
            .resolve("127.0.0.1", "nbd")
            .await
            .expect("failed to resolve with default port");

        assert_eq!(endpoint.port(), 12345);
    }
}
