use bytes::{Buf, BytesMut};
use log::debug;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::state::{FrameType, State};
use crate::consts::HANDSHAKE_LEN;
use crate::{frame, Error, Limits};

/// A low level NBD connection type which drives a stream through the
/// handshake `State`s rather than performing high-level operations.
pub(crate) struct RawConnection<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S: AsyncRead + Unpin> RawConnection<S> {
    /// Creates an NBD client handshake connection from `stream`.
    pub(crate) fn new(stream: S) -> Self {
        RawConnection {
            stream,
            buffer: BytesMut::with_capacity(HANDSHAKE_LEN),
        }
    }

    /// Reads and validates the single frame awaited by `state` from the
    /// underlying stream, returning the next `State`.
    pub(crate) async fn read_frame(
        &mut self,
        state: State,
        limits: &Limits,
    ) -> crate::Result<State> {
        let frame_type = match state.frame_type() {
            Some(frame_type) => frame_type,
            None => return Ok(state),
        };

        loop {
            if let Some(next) = self.parse_frame(state, frame_type, limits)? {
                // We read enough data to parse an entire frame, return it now.
                debug!("handshake: read {frame_type:?} frame, now {next:?}");
                return Ok(next);
            }

            // There is not enough buffered data to read a frame. Read at most
            // the rest of this frame so nothing past it is consumed before it
            // is validated. 0 indicates "end of stream".
            let want = (frame_type.wire_len() - self.buffer.len()) as u64;
            if (&mut self.stream)
                .take(want)
                .read_buf(&mut self.buffer)
                .await?
                == 0
            {
                // The remote closed the connection.
                return if self.buffer.is_empty() && state == State::AwaitPassword {
                    Err(Error::PeerClosed)
                } else {
                    Err(Error::TruncatedHandshake(frame_type))
                };
            }
        }
    }

    /// Consumes the connection, returning the underlying stream.
    pub(crate) fn into_inner(self) -> S {
        self.stream
    }

    /// Try to parse the frame awaited by `state` but also terminate early if
    /// we need to read more data from the stream.
    fn parse_frame(
        &mut self,
        state: State,
        frame_type: FrameType,
        limits: &Limits,
    ) -> crate::Result<Option<State>> {
        use frame::Error::{Incomplete, Protocol};

        let mut buf = Cursor::new(&self.buffer[..]);
        match state.check(&mut buf) {
            Ok(_) => {
                // Found a frame, reset the cursor, parse the entire frame, then
                // advance the buffer beyond it.
                let len = buf.position() as usize;

                buf.set_position(0);
                let next = match state.parse(&mut buf, limits) {
                    Ok(next) => next,
                    Err(Protocol(err)) => return Err(err),
                    Err(Incomplete) => return Err(Error::TruncatedHandshake(frame_type)),
                };

                self.buffer.advance(len);
                Ok(Some(next))
            }
            // Not enough data for an entire frame.
            Err(Incomplete) => Ok(None),
            Err(Protocol(err)) => Err(err),
        }
    }
}
