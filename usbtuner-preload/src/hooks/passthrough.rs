//! Pass-through file-operation provider.
//!
//! The authentic libc implementations of the hooked operations are
//! resolved once through `dlsym(RTLD_NEXT, ...)`, the next object in
//! the lookup chain after this library. Everything inside the bridge
//! that touches device files goes through this provider so it can
//! never re-enter the interception layer.

use std::ffi::CStr;

use libc::{c_char, c_int, c_void, mode_t};
use nix::errno::Errno;
use once_cell::sync::OnceCell;

type OpenFn = unsafe extern "C" fn(*const c_char, c_int, mode_t) -> c_int;
type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
type StatFn = unsafe extern "C" fn(*const c_char, *mut libc::stat) -> c_int;
type Stat64Fn = unsafe extern "C" fn(*const c_char, *mut libc::stat64) -> c_int;
type XstatFn = unsafe extern "C" fn(c_int, *const c_char, *mut libc::stat) -> c_int;
type Xstat64Fn = unsafe extern "C" fn(c_int, *const c_char, *mut libc::stat64) -> c_int;

/// File-operation provider seam.
///
/// Two implementations exist: the pass-through one below, and the
/// virtualized one the gateway composes on top of it for bound
/// adapter paths. Internal consumers (discovery, negotiation, the
/// bridge threads) only ever see this trait.
pub trait FileOps: Send + Sync {
    /// Open a path, returning a raw fd or `-1` with errno set.
    fn open(&self, path: &CStr, flags: c_int, mode: mode_t) -> c_int;
    /// Close a raw fd.
    fn close(&self, fd: c_int) -> c_int;
}

/// The authentic libc file operations.
pub struct RealFileOps {
    open: Option<OpenFn>,
    open64: Option<OpenFn>,
    close: Option<CloseFn>,
    stat: Option<StatFn>,
    stat64: Option<Stat64Fn>,
    xstat: Option<XstatFn>,
    xstat64: Option<Xstat64Fn>,
}

static REAL: OnceCell<RealFileOps> = OnceCell::new();

/// The process-wide authentic provider, resolved on first use.
pub fn real() -> &'static RealFileOps {
    REAL.get_or_init(RealFileOps::resolve)
}

fn lookup<T: Copy>(name: &CStr) -> Option<T> {
    debug_assert_eq!(std::mem::size_of::<T>(), std::mem::size_of::<*mut c_void>());
    let sym = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
    if sym.is_null() {
        None
    } else {
        Some(unsafe { std::mem::transmute_copy::<*mut c_void, T>(&sym) })
    }
}

fn not_resolved() -> c_int {
    Errno::ENOSYS.set();
    -1
}

impl RealFileOps {
    /// Resolve every hooked symbol from the next object in the chain.
    ///
    /// `stat`/`stat64` exist as real symbols on modern glibc while
    /// older versions only export the `__xstat` pair; both are
    /// resolved and the hooks forward to whichever their caller used.
    fn resolve() -> Self {
        RealFileOps {
            open: lookup(c"open"),
            open64: lookup(c"open64"),
            close: lookup(c"close"),
            stat: lookup(c"stat"),
            stat64: lookup(c"stat64"),
            xstat: lookup(c"__xstat"),
            xstat64: lookup(c"__xstat64"),
        }
    }

    pub fn open_raw(&self, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        match self.open {
            Some(f) => unsafe { f(path, flags, mode) },
            None => not_resolved(),
        }
    }

    pub fn open64_raw(&self, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        match self.open64 {
            Some(f) => unsafe { f(path, flags, mode) },
            None => not_resolved(),
        }
    }

    pub fn close_raw(&self, fd: c_int) -> c_int {
        match self.close {
            Some(f) => unsafe { f(fd) },
            None => not_resolved(),
        }
    }

    /// # Safety
    /// `buf` must be valid for a `struct stat` write.
    pub unsafe fn stat_raw(&self, path: *const c_char, buf: *mut libc::stat) -> c_int {
        match self.stat {
            Some(f) => f(path, buf),
            None => not_resolved(),
        }
    }

    /// # Safety
    /// `buf` must be valid for a `struct stat64` write.
    pub unsafe fn stat64_raw(&self, path: *const c_char, buf: *mut libc::stat64) -> c_int {
        match self.stat64 {
            Some(f) => f(path, buf),
            None => not_resolved(),
        }
    }

    /// # Safety
    /// `buf` must be valid for a `struct stat` write.
    pub unsafe fn xstat_raw(&self, ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int {
        match self.xstat {
            Some(f) => f(ver, path, buf),
            None => not_resolved(),
        }
    }

    /// # Safety
    /// `buf` must be valid for a `struct stat64` write.
    pub unsafe fn xstat64_raw(
        &self,
        ver: c_int,
        path: *const c_char,
        buf: *mut libc::stat64,
    ) -> c_int {
        match self.xstat64 {
            Some(f) => f(ver, path, buf),
            None => not_resolved(),
        }
    }
}

impl FileOps for RealFileOps {
    fn open(&self, path: &CStr, flags: c_int, mode: mode_t) -> c_int {
        self.open_raw(path.as_ptr(), flags, mode)
    }

    fn close(&self, fd: c_int) -> c_int {
        self.close_raw(fd)
    }
}
