use bytes::Buf;
use std::fmt;
use std::io::Cursor;
use std::result;

/// Contains error information encountered while dealing with Frames.
#[derive(Debug)]
pub enum Error {
    /// A sentinel which indicates more data must be read from a stream to parse
    /// an entire Frame.
    Incomplete,

    /// A Frame was complete but its contents violate the protocol.
    Protocol(crate::Error),
}

/// A specialized result for returning Errors.
pub type Result<T> = result::Result<T, Error>;

// Functions for consuming fixed amounts of data from `src` or returning
// `Error::Incomplete` when necessary.

pub fn get_u64(src: &mut Cursor<&[u8]>) -> Result<u64> {
    if src.remaining() < 8 {
        return Err(Error::Incomplete);
    }

    Ok(src.get_u64())
}

pub fn get_exact(src: &mut Cursor<&[u8]>, dst: &mut [u8]) -> Result<()> {
    if src.remaining() < dst.len() {
        return Err(Error::Incomplete);
    }

    src.copy_to_slice(dst);
    Ok(())
}

pub fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<()> {
    if src.remaining() < n {
        return Err(Error::Incomplete);
    }

    src.advance(n);
    Ok(())
}

impl From<crate::Error> for Error {
    fn from(src: crate::Error) -> Error {
        Error::Protocol(src)
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Incomplete => "stream ended early".fmt(fmt),
            Error::Protocol(err) => err.fmt(fmt),
        }
    }
}
