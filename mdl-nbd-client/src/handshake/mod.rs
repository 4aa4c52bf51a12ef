//! Modules related to the oldstyle handshake phase of the Network Block
//! Device (NBD) protocol.

mod connection;
pub(crate) use connection::RawConnection;

mod state;
pub(crate) use state::State;
pub use state::FrameType;
