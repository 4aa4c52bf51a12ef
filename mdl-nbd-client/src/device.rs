use log::{debug, info, warn};
use nix::errno::Errno;
use nix::libc::{self, c_ulong};
use nix::sys::ioctl::ioctl_num_type;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tokio::net::TcpStream;
use tokio::task;

use crate::consts::ioctl::*;
use crate::{Error, Geometry, Result, Session};

/// The Linux NBD driver requests used to attach and detach a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Request {
    SetSock,
    SetBlkSize,
    DoIt,
    ClearSock,
    ClearQue,
    SetSizeBlocks,
    Disconnect,
}

impl Request {
    fn nr(self) -> u8 {
        match self {
            Request::SetSock => NBD_SET_SOCK,
            Request::SetBlkSize => NBD_SET_BLKSIZE,
            Request::DoIt => NBD_DO_IT,
            Request::ClearSock => NBD_CLEAR_SOCK,
            Request::ClearQue => NBD_CLEAR_QUE,
            Request::SetSizeBlocks => NBD_SET_SIZE_BLOCKS,
            Request::Disconnect => NBD_DISCONNECT,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Request::SetSock => "NBD_SET_SOCK",
            Request::SetBlkSize => "NBD_SET_BLKSIZE",
            Request::DoIt => "NBD_DO_IT",
            Request::ClearSock => "NBD_CLEAR_SOCK",
            Request::ClearQue => "NBD_CLEAR_QUE",
            Request::SetSizeBlocks => "NBD_SET_SIZE_BLOCKS",
            Request::Disconnect => "NBD_DISCONNECT",
        }
    }

    /// Issues this request against the NBD device `fd`.
    fn issue(self, fd: RawFd, arg: c_ulong) -> Result<()> {
        // All NBD requests are _IO(0xab, nr) with an optional integer argument.
        let request = nix::request_code_none!(NBD_IOCTL_TYPE, self.nr()) as ioctl_num_type;

        // Safety: NBD requests take either no argument or an integer by value,
        // never a pointer.
        let res = unsafe { libc::ioctl(fd, request, arg) };

        Errno::result(res).map(drop).map_err(|errno| Error::Device {
            op: self.name(),
            source: io::Error::from_raw_os_error(errno as i32),
        })
    }
}

/// A Linux kernel NBD device such as `/dev/nbd0`, which can be bound to a
/// negotiated [`Session`] so that block I/O on the device is served by the
/// remote export.
#[derive(Debug)]
pub struct Device {
    file: File,
    path: PathBuf,
}

impl Device {
    /// Opens the NBD device at `path` for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::Device { op: "open", source })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies the block size and block count of `geometry` to the device.
    pub fn configure(&self, geometry: &Geometry) -> Result<()> {
        let blocks = c_ulong::try_from(geometry.blocks()).map_err(|_| Error::DeviceTooLarge {
            blocks: geometry.blocks(),
            limit: c_ulong::MAX as u64,
        })?;

        self.request(Request::SetBlkSize, geometry.block_size() as c_ulong)?;
        self.request(Request::SetSizeBlocks, blocks)?;

        info!(
            "{}: bs={}, sz={}",
            self.path.display(),
            geometry.block_size(),
            blocks
        );
        Ok(())
    }

    /// Configures the device for `session` and hands its socket to the kernel,
    /// then waits until the kernel stops serving the device, either because
    /// of a [`Device::disconnect`] or a connection failure.
    pub async fn attach(&self, session: Session<TcpStream>) -> Result<()> {
        let (stream, geometry) = session.into_parts();
        self.configure(&geometry)?;

        // The kernel performs blocking I/O on the socket.
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;

        // A socket from an earlier session may still be attached.
        if let Err(err) = self.request(Request::ClearSock, 0) {
            debug!("{}: {err}", self.path.display());
        }
        self.request(Request::SetSock, stream.as_raw_fd() as c_ulong)?;

        info!("{}: attached, serving I/O", self.path.display());

        // NBD_DO_IT blocks for the lifetime of the session, so run it on a
        // thread where blocking is allowed. The stream must stay open until
        // it returns.
        let file = self.file.try_clone()?;
        let res = task::spawn_blocking(move || {
            let res = Request::DoIt.issue(file.as_raw_fd(), 0);
            drop(stream);
            res
        })
        .await
        .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::Other, err)))?;

        match &res {
            Ok(()) => info!("{}: kernel call returned", self.path.display()),
            Err(err) => warn!("{}: kernel call returned: {err}", self.path.display()),
        }

        self.release();
        res
    }

    /// Clears the device queue and socket after the kernel stops serving it.
    /// Failures are only logged so they cannot hide why serving stopped.
    fn release(&self) {
        for request in [Request::ClearQue, Request::ClearSock] {
            if let Err(err) = self.request(request, 0) {
                warn!("{}: {err}", self.path.display());
            }
        }
    }

    /// Disconnects the device from whichever server it is attached to.
    pub fn disconnect(&self) -> Result<()> {
        self.request(Request::ClearQue, 0)?;
        self.request(Request::Disconnect, 0)?;
        self.request(Request::ClearSock, 0)?;

        info!("{}: disconnected", self.path.display());
        Ok(())
    }

    fn request(&self, request: Request, arg: c_ulong) -> Result<()> {
        debug!("{}: {} {arg}", self.path.display(), request.name());
        request.issue(self.file.as_raw_fd(), arg)
    }
}
