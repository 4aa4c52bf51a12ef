//! An asynchronous Rust client for the oldstyle [Network Block
//! Device (NBD)](https://en.wikipedia.org/wiki/Network_block_device) handshake.
//!
//! A [`Client`] resolves a server address, opens a tuned TCP connection,
//! validates the fixed 152 byte server handshake and divides the export into
//! blocks, producing a [`Session`]. On Linux, a [`Device`] can then bind the
//! session to a kernel NBD device such as `/dev/nbd0`.

extern crate log;

mod client;
mod connection;
mod consts;
#[cfg(target_os = "linux")]
mod device;
mod error;
mod frame;
mod geometry;
mod handshake;
mod resolve;

pub use client::{Client, Session};
pub use connection::Connection;
#[cfg(target_os = "linux")]
pub use device::Device;
pub use error::{Error, Result};
pub use geometry::{Geometry, Limits};
pub use handshake::FrameType;
pub use resolve::{
    lookup_port, EndpointAddress, EtcServices, Family, Port, PortSource, ServiceLookup, Transport,
};
