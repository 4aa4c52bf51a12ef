use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::handshake::FrameType;

/// Contains error information produced while connecting to and negotiating
/// with an NBD server. Every error is terminal for the connection attempt it
/// occurred in.
#[derive(Debug)]
pub enum Error {
    /// The host or port could not be resolved to a socket address.
    Resolve {
        host: String,
        port: String,
        reason: String,
    },

    /// A socket could not be created or connected to `addr`.
    Connect { addr: SocketAddr, source: io::Error },

    /// The server closed the connection before sending any handshake data.
    PeerClosed,

    /// The server sent an initial password other than `NBDMAGIC`.
    BadPassword([u8; 8]),

    /// The server sent an unexpected protocol magic value.
    BadMagic(u64),

    /// The server closed the connection partway through a handshake field.
    TruncatedHandshake(FrameType),

    /// The export size in KiB exceeds `limit`.
    ExportTooLarge { size: u64, limit: u64 },

    /// The number of blocks for the export exceeds `limit`.
    DeviceTooLarge { blocks: u64, limit: u64 },

    /// A block size of zero was requested.
    InvalidBlockSize,

    /// A kernel NBD device operation failed.
    Device { op: &'static str, source: io::Error },

    Io(io::Error),
}

/// A Result specialized for use in this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Error {
        Error::Io(src)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connect { source, .. } | Error::Device { source, .. } => Some(source),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Resolve { host, port, reason } => {
                write!(fmt, "failed to resolve {host} port {port}: {reason}")
            }
            Error::Connect { addr, source } => {
                write!(fmt, "unable to connect to remote host ({addr}): {source}")
            }
            Error::PeerClosed => "server closed connection".fmt(fmt),
            Error::BadPassword(passwd) => {
                write!(
                    fmt,
                    "bad init password from server: {:?}",
                    String::from_utf8_lossy(passwd)
                )
            }
            Error::BadMagic(magic) => write!(fmt, "bad cliserv magic from server: {magic:#x}"),
            Error::TruncatedHandshake(frame_type) => {
                write!(fmt, "server ended handshake early while sending {frame_type:?}")
            }
            Error::ExportTooLarge { size, limit } => write!(
                fmt,
                "exported device is too big: {} MiB exceeds {limit} KiB limit",
                size >> 20
            ),
            Error::DeviceTooLarge { blocks, limit } => {
                write!(fmt, "device too large: {blocks} blocks exceeds {limit} limit")
            }
            Error::InvalidBlockSize => "block size must be greater than zero".fmt(fmt),
            Error::Device { op, source } => write!(fmt, "{op} failed: {source}"),
            Error::Io(err) => err.fmt(fmt),
        }
    }
}
