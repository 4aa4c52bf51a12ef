//! Oldstyle NBD protocol constants.
//! Reference: <https://github.com/NetworkBlockDevice/nbd/blob/master/doc/proto.md#oldstyle-negotiation>.

#![allow(dead_code)]

/// A symbolic constant for 1 MiB.
#[allow(non_upper_case_globals)]
pub const MiB: u64 = 1 << 20;

// Handshake magic.
pub const INIT_PASSWD: &[u8; 8] = b"NBDMAGIC";
pub const CLISERV_MAGIC: u64 = 0x00420281861253;

// Handshake field lengths.
pub const PASSWD_LEN: usize = 8;
pub const MAGIC_LEN: usize = 8;
pub const SIZE_LEN: usize = 8;
pub const RESERVED_LEN: usize = 128;
pub const HANDSHAKE_LEN: usize = PASSWD_LEN + MAGIC_LEN + SIZE_LEN + RESERVED_LEN;

// Client defaults.
pub const NBD_DEFAULT_PORT: u16 = 10809;
pub const DEFAULT_BLOCK_SIZE: u32 = 1024;
pub const DEFAULT_PROTOCOL: &str = "tcp";

// The kernel clamps this up to its minimum send buffer size.
pub const SEND_BUFFER_SIZE: u32 = 1;

// Linux NBD ioctls, all of the _IO(0xab, nr) form.
#[cfg(target_os = "linux")]
pub mod ioctl {
    pub const NBD_IOCTL_TYPE: u8 = 0xab;

    pub const NBD_SET_SOCK: u8 = 0;
    pub const NBD_SET_BLKSIZE: u8 = 1;
    pub const NBD_DO_IT: u8 = 3;
    pub const NBD_CLEAR_SOCK: u8 = 4;
    pub const NBD_CLEAR_QUE: u8 = 5;
    pub const NBD_SET_SIZE_BLOCKS: u8 = 7;
    pub const NBD_DISCONNECT: u8 = 8;
}
