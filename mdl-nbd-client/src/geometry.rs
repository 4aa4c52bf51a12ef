use std::os::raw::c_ulong;

use crate::{Error, Result};

/// The largest magnitude an export may reach, measured both in KiB of export
/// size and in number of blocks.
///
/// The default reproduces a compatibility constant of the classic Linux NBD
/// client: half of the host's `unsigned long` range. On 64-bit hosts it is
/// effectively unreachable for the export size check, while on 32-bit hosts it
/// caps exports at 2 TiB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    max: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self::new((c_ulong::MAX >> 1) as u64)
    }
}

impl Limits {
    /// Creates `Limits` with an explicit maximum magnitude.
    pub fn new(max: u64) -> Self {
        Self { max }
    }

    /// Creates `Limits` matching the positive range of a signed integer which
    /// is `bits` wide, such as `Limits::bits(32)` to behave like a 32-bit host.
    ///
    /// # Panics
    ///
    /// Panics if `bits` is not in the range `2..=64`.
    pub fn bits(bits: u32) -> Self {
        assert!(
            (2..=64).contains(&bits),
            "limit width must be between 2 and 64 bits"
        );

        Self::new(u64::MAX >> (65 - bits))
    }

    /// Returns the maximum magnitude.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Verifies that an export of `size` bytes is representable in KiB.
    pub fn check_export(&self, size: u64) -> Result<()> {
        if size >> 10 > self.max {
            return Err(Error::ExportTooLarge {
                size,
                limit: self.max,
            });
        }

        Ok(())
    }

    /// Computes the number of whole blocks of `block_size` in `size`.
    fn blocks(&self, size: u64, block_size: u32) -> Result<u64> {
        if block_size == 0 {
            return Err(Error::InvalidBlockSize);
        }

        let blocks = size / block_size as u64;
        if blocks > self.max {
            return Err(Error::DeviceTooLarge {
                blocks,
                limit: self.max,
            });
        }

        Ok(blocks)
    }
}

/// The negotiated layout of an export, ready to be applied to a block device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    size: u64,
    block_size: u32,
    blocks: u64,
}

impl Geometry {
    /// Validates the export `size` reported by a server against `limits` and
    /// divides it into blocks of `block_size` bytes. Any trailing partial
    /// block is not addressable.
    pub fn negotiate(size: u64, block_size: u32, limits: &Limits) -> Result<Self> {
        limits.check_export(size)?;
        let blocks = limits.blocks(size, block_size)?;

        Ok(Self {
            size,
            block_size,
            blocks,
        })
    }

    /// The export size in bytes, as reported by the server.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }
}
