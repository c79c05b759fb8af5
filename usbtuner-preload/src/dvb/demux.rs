//! Demultiplexer device wrapper.
//!
//! The data-plane thread opens one demux per attached slot, taps the
//! full transport stream from the frontend into a single output, and
//! reads the payload from it; the control-plane thread narrows the
//! tap with per-PID add/remove commands on the same descriptor.

use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use libc::{O_NONBLOCK, O_RDONLY};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::hooks::passthrough::FileOps;
use crate::path;
use crate::slot::DEMUX_BUFFER_SIZE;

// From linux/dvb/dmx.h.
const DMX_IN_FRONTEND: u32 = 0;
const DMX_OUT_TSDEMUX_TAP: u32 = 3;
const DMX_PES_OTHER: u32 = 20;

#[repr(C)]
struct DmxPesFilterParams {
    pid: u16,
    input: u32,
    output: u32,
    pes_type: u32,
    flags: u32,
}

nix::ioctl_none!(dmx_start, b'o', 41);
nix::ioctl_write_ptr!(dmx_set_pes_filter, b'o', 44, DmxPesFilterParams);
// DMX_SET_BUFFER_SIZE passes its argument by value with an _IO request.
nix::ioctl_write_int_bad!(dmx_set_buffer_size, nix::request_code_none!(b'o', 45));
nix::ioctl_write_ptr!(dmx_add_pid, b'o', 51, u16);
nix::ioctl_write_ptr!(dmx_remove_pid, b'o', 52, u16);

/// An open demux device for one adapter.
pub struct Demux {
    fd: OwnedFd,
}

impl Demux {
    /// Open the adapter's demux read-only and non-blocking through the
    /// authentic provider.
    pub fn open(fops: &dyn FileOps, adapter: u32) -> nix::Result<Self> {
        let path = CString::new(path::demux_path(adapter)).map_err(|_| Errno::EINVAL)?;
        let fd = fops.open(&path, O_RDONLY | O_NONBLOCK, 0);
        if fd < 0 {
            return Err(Errno::last());
        }
        Ok(Demux {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Configure the full-stream tap and start capture.
    ///
    /// The filter pid is 0 with TSDEMUX_TAP output, which makes the
    /// demux deliver every PID subsequently added with
    /// [`Demux::add_pid`] through this one descriptor.
    pub fn start_full_stream(&self) -> nix::Result<()> {
        let filter = DmxPesFilterParams {
            pid: 0,
            input: DMX_IN_FRONTEND,
            output: DMX_OUT_TSDEMUX_TAP,
            pes_type: DMX_PES_OTHER,
            flags: 0,
        };
        unsafe { dmx_set_buffer_size(self.fd.as_raw_fd(), DEMUX_BUFFER_SIZE as libc::c_int) }?;
        unsafe { dmx_set_pes_filter(self.fd.as_raw_fd(), &filter) }?;
        unsafe { dmx_start(self.fd.as_raw_fd()) }?;
        Ok(())
    }

    pub fn add_pid(&self, pid: u16) -> nix::Result<()> {
        unsafe { dmx_add_pid(self.fd.as_raw_fd(), &pid) }?;
        Ok(())
    }

    pub fn remove_pid(&self, pid: u16) -> nix::Result<()> {
        unsafe { dmx_remove_pid(self.fd.as_raw_fd(), &pid) }?;
        Ok(())
    }

    /// Wait for payload with a bounded timeout.
    pub fn wait_readable(&self, timeout_ms: u16) -> nix::Result<bool> {
        let mut fds = [PollFd::new(self.fd(), PollFlags::POLLIN)];
        let ready = poll(&mut fds, PollTimeout::from(timeout_ms))?;
        Ok(ready > 0)
    }

    /// Read demultiplexed payload.
    pub fn read(&self, buf: &mut [u8]) -> nix::Result<usize> {
        nix::unistd::read(self.fd.as_raw_fd(), buf)
    }
}
