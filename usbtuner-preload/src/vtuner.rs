//! vtuner device wrapper.
//!
//! One open vtuner device per bound slot, `/dev/misc/vtuner<N>`. The
//! same descriptor carries three flows: the setter ioctls used during
//! negotiation, the high-priority control messages fetched by the
//! control-plane thread, and the transport-stream payload written by
//! the data-plane thread.

use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use libc::{c_char, O_RDWR};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use vtuner_protocol::capability::{self, DeliverySystem, MAX_MODES, MODE_NAME_LEN};
use vtuner_protocol::message::{
    VtunerMessage, VTUNER_GET_MESSAGE, VTUNER_SET_HAS_OUTPUTS, VTUNER_SET_MODES, VTUNER_SET_NAME,
    VTUNER_SET_NUM_MODES, VTUNER_SET_RESPONSE, VTUNER_SET_TYPE,
};

use crate::hooks::passthrough::FileOps;

/// Number of vtuner device nodes probed during discovery.
pub const MAX_VTUNERS: u32 = 8;

/// The driver truncates names; keep ours within the historical limit.
const NAME_MAX: usize = 63;

// The vtuner requests are plain sequential numbers in the driver
// header, so they go through the raw-request ioctl path.
nix::ioctl_read_bad!(vtuner_get_message, VTUNER_GET_MESSAGE, VtunerMessage);
nix::ioctl_write_ptr_bad!(vtuner_set_response, VTUNER_SET_RESPONSE, VtunerMessage);
nix::ioctl_write_ptr_bad!(vtuner_set_name, VTUNER_SET_NAME, c_char);
nix::ioctl_write_ptr_bad!(vtuner_set_type, VTUNER_SET_TYPE, c_char);
nix::ioctl_write_ptr_bad!(vtuner_set_has_outputs, VTUNER_SET_HAS_OUTPUTS, c_char);
nix::ioctl_write_int_bad!(vtuner_set_num_modes, VTUNER_SET_NUM_MODES as libc::c_ulong);
nix::ioctl_write_ptr_bad!(
    vtuner_set_modes,
    VTUNER_SET_MODES,
    [[u8; MODE_NAME_LEN]; MAX_MODES]
);

/// An open vtuner device.
pub struct VtunerDevice {
    fd: OwnedFd,
}

impl VtunerDevice {
    /// Open `/dev/misc/vtuner<index>` through the authentic provider.
    pub fn open(fops: &dyn FileOps, index: u32) -> nix::Result<Self> {
        let path = CString::new(format!("/dev/misc/vtuner{index}")).map_err(|_| Errno::EINVAL)?;
        let fd = fops.open(&path, O_RDWR, 0);
        if fd < 0 {
            return Err(Errno::last());
        }
        Ok(VtunerDevice {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn as_raw_fd(&self) -> i32 {
        self.fd.as_raw_fd()
    }

    fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Register the tuner's display name.
    pub fn set_name(&self, name: &str) -> nix::Result<()> {
        let mut truncated = name.as_bytes().to_vec();
        truncated.truncate(NAME_MAX);
        let cname = CString::new(truncated).map_err(|_| Errno::EINVAL)?;
        unsafe { vtuner_set_name(self.as_raw_fd(), cname.as_ptr()) }?;
        Ok(())
    }

    /// Advertise a single fixed tuner type.
    pub fn set_type(&self, mode: DeliverySystem) -> nix::Result<()> {
        let cname = CString::new(mode.mode_name()).map_err(|_| Errno::EINVAL)?;
        unsafe { vtuner_set_type(self.as_raw_fd(), cname.as_ptr()) }?;
        Ok(())
    }

    /// Advertise a switchable mode list.
    pub fn set_modes(&self, modes: &[DeliverySystem]) -> nix::Result<()> {
        let wire = capability::encode_mode_names(modes);
        unsafe { vtuner_set_num_modes(self.as_raw_fd(), modes.len() as libc::c_int) }?;
        unsafe { vtuner_set_modes(self.as_raw_fd(), &wire) }?;
        Ok(())
    }

    /// Declare whether the tuner has auxiliary outputs (ours never do).
    pub fn set_has_outputs(&self, has_outputs: bool) -> nix::Result<()> {
        let value: &[u8] = if has_outputs { b"yes" } else { b"no" };
        let cvalue = CString::new(value).map_err(|_| Errno::EINVAL)?;
        unsafe { vtuner_set_has_outputs(self.as_raw_fd(), cvalue.as_ptr()) }?;
        Ok(())
    }

    /// Wait for a pending high-priority control message.
    pub fn wait_message(&self, timeout_ms: u16) -> nix::Result<bool> {
        let mut fds = [PollFd::new(self.fd(), PollFlags::POLLPRI)];
        let ready = poll(&mut fds, PollTimeout::from(timeout_ms))?;
        Ok(ready > 0)
    }

    /// Fetch the pending control message.
    pub fn fetch_message(&self) -> nix::Result<VtunerMessage> {
        let mut msg = VtunerMessage::zeroed();
        unsafe { vtuner_get_message(self.as_raw_fd(), &mut msg) }?;
        Ok(msg)
    }

    /// Post a response so the facility is not left waiting.
    pub fn respond(&self, msg: &VtunerMessage) -> nix::Result<()> {
        unsafe { vtuner_set_response(self.as_raw_fd(), msg) }?;
        Ok(())
    }

    /// Write a payload chunk; short writes are the caller's problem.
    pub fn write(&self, buf: &[u8]) -> nix::Result<usize> {
        nix::unistd::write(&self.fd, buf)
    }

    /// A device handle backed by `/dev/null`, for tests that only need
    /// a valid descriptor to construct slots around.
    #[cfg(test)]
    pub fn null_for_tests() -> Self {
        let file = std::fs::File::open("/dev/null").expect("open /dev/null");
        VtunerDevice { fd: file.into() }
    }
}
