use std::io::Cursor;

use crate::consts::*;
use crate::frame::*;
use crate::Limits;

/// A field of the oldstyle handshake, in the order a server sends them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameType {
    Password,
    Magic,
    Size,
    Reserved,
}

impl FrameType {
    /// The fixed length of this field on the wire.
    pub fn wire_len(&self) -> usize {
        match self {
            FrameType::Password => PASSWD_LEN,
            FrameType::Magic => MAGIC_LEN,
            FrameType::Size => SIZE_LEN,
            FrameType::Reserved => RESERVED_LEN,
        }
    }
}

/// The progress of a client through the oldstyle handshake. Each state
/// awaits exactly one `FrameType` and a handshake only ever moves forward.
/// Failure is not a state: any protocol violation ends the handshake with an
/// error instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    AwaitPassword,
    AwaitMagic,
    AwaitSize,
    AwaitReserved { size: u64 },
    Negotiated { size: u64 },
}

impl State {
    /// Returns the `FrameType` which must be read to leave this state, or
    /// `None` once negotiation is complete.
    pub(crate) fn frame_type(&self) -> Option<FrameType> {
        match self {
            State::AwaitPassword => Some(FrameType::Password),
            State::AwaitMagic => Some(FrameType::Magic),
            State::AwaitSize => Some(FrameType::Size),
            State::AwaitReserved { .. } => Some(FrameType::Reserved),
            State::Negotiated { .. } => None,
        }
    }

    /// Determines if enough data is available in `src` to leave this state.
    pub(crate) fn check(&self, src: &mut Cursor<&[u8]>) -> Result<()> {
        match self.frame_type() {
            Some(frame_type) => skip(src, frame_type.wire_len()),
            None => Ok(()),
        }
    }

    /// Parses and validates the frame awaited by this state from `src`,
    /// producing the next state.
    pub(crate) fn parse(self, src: &mut Cursor<&[u8]>, limits: &Limits) -> Result<State> {
        match self {
            State::AwaitPassword => {
                let mut passwd = [0u8; PASSWD_LEN];
                get_exact(src, &mut passwd)?;

                if &passwd != INIT_PASSWD {
                    return Err(crate::Error::BadPassword(passwd).into());
                }

                Ok(State::AwaitMagic)
            }
            State::AwaitMagic => {
                let magic = get_u64(src)?;
                if magic != CLISERV_MAGIC {
                    return Err(crate::Error::BadMagic(magic).into());
                }

                Ok(State::AwaitSize)
            }
            State::AwaitSize => {
                // Reject oversized exports before consuming anything else.
                let size = get_u64(src)?;
                limits.check_export(size)?;

                Ok(State::AwaitReserved { size })
            }
            State::AwaitReserved { size } => {
                skip(src, RESERVED_LEN)?;
                Ok(State::Negotiated { size })
            }
            State::Negotiated { .. } => Ok(self),
        }
    }
}
