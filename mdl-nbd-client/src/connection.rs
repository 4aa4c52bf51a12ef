use log::debug;
use std::io;
use tokio::net::{TcpSocket, TcpStream};

use crate::consts::SEND_BUFFER_SIZE;
use crate::resolve::{EndpointAddress, Family};
use crate::{Error, Result};

/// An open TCP connection to an NBD server which has not yet performed the
/// handshake, along with the [`EndpointAddress`] it was established with.
///
/// Dropping a `Connection` closes the socket.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    endpoint: EndpointAddress,
}

impl Connection {
    /// Opens a TCP connection to `endpoint` and tunes the socket for the small
    /// request/response messages exchanged with an NBD server.
    pub async fn open(endpoint: &EndpointAddress) -> Result<Self> {
        let addr = endpoint.addr();
        let fail = |source: io::Error| Error::Connect { addr, source };

        // On any error the socket is dropped and therefore closed. Set
        // TCP_NODELAY, per:
        // https://github.com/NetworkBlockDevice/nbd/blob/master/doc/proto.md#protocol-phases.
        let socket = Self::socket(endpoint.family()).map_err(fail)?;
        let stream = socket.connect(addr).await.map_err(fail)?;
        stream.set_nodelay(true).map_err(fail)?;

        debug!("connected to {endpoint}");

        Ok(Self {
            stream,
            endpoint: *endpoint,
        })
    }

    /// Creates an unconnected socket for `family` with the send buffer kept as
    /// small as the kernel allows, so writes are not held back.
    fn socket(family: Family) -> io::Result<TcpSocket> {
        let socket = match family {
            Family::V4 => TcpSocket::new_v4()?,
            Family::V6 => TcpSocket::new_v6()?,
        };

        socket.set_send_buffer_size(SEND_BUFFER_SIZE)?;
        Ok(socket)
    }

    /// The endpoint this connection was established with.
    pub fn endpoint(&self) -> &EndpointAddress {
        &self.endpoint
    }

    /// Consumes the connection, returning the stream and its endpoint.
    pub fn into_parts(self) -> (TcpStream, EndpointAddress) {
        (self.stream, self.endpoint)
    }
}
