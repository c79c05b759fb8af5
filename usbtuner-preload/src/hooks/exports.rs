//! `extern "C"` hook symbols.
//!
//! These replace the process's effective open/open64/close/stat
//! operations when the library is preloaded. They are thin shims: all
//! decisions are made by the gateway planning methods on [`Bridge`],
//! and every path that is not a bound adapter device ends at the
//! authentic libc implementation.
//!
//! The open hooks take an explicit `mode` in place of the C varargs;
//! the kernel only reads it under `O_CREAT`, which never applies to
//! the device nodes this library cares about, and the extra register
//! is harmless for every other caller.

use std::ffi::{CStr, CString};

use libc::{c_char, c_int, mode_t};
use nix::errno::Errno;

use crate::bridge::lifecycle::{OpenPlan, StatPlan};
use crate::hooks::{self, passthrough};

unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr))
    }
}

fn deny(errno: Errno) -> c_int {
    errno.set();
    -1
}

unsafe fn hooked_open(path: *const c_char, flags: c_int, mode: mode_t, large: bool) -> c_int {
    hooks::ensure_ready();
    let real = passthrough::real();
    let forward_raw = |p: *const c_char| {
        if large {
            real.open64_raw(p, flags, mode)
        } else {
            real.open_raw(p, flags, mode)
        }
    };

    let plan = match (cstr(path), hooks::bridge()) {
        (Some(p), Some(bridge)) => match p.to_str() {
            Ok(s) => Some((bridge, bridge.plan_open(s))),
            Err(_) => None,
        },
        _ => None,
    };

    match plan {
        None | Some((_, OpenPlan::Passthrough(None))) => forward_raw(path),
        Some((_, OpenPlan::Passthrough(Some(canonical)))) => match CString::new(canonical) {
            Ok(c) => forward_raw(c.as_ptr()),
            Err(_) => forward_raw(path),
        },
        Some((_, OpenPlan::Deny(errno))) => deny(errno),
        Some((bridge, OpenPlan::Attach(idx))) => match bridge.attach(idx, flags, mode) {
            Ok(fd) => fd,
            Err(errno) => deny(errno),
        },
    }
}

/// Hooked `open(2)`.
///
/// # Safety
/// Called by arbitrary host code; `path` may be any pointer the host
/// would hand to libc.
#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    hooked_open(path, flags, mode, false)
}

/// Hooked `open64`.
///
/// # Safety
/// See [`open`].
#[no_mangle]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    hooked_open(path, flags, mode, true)
}

/// Hooked `close(2)`.
///
/// A handle matching a streaming slot's control device triggers
/// coordinated teardown before the real descriptor is released.
///
/// # Safety
/// Called by arbitrary host code.
#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    hooks::ensure_ready();
    if fd >= 0 {
        if let Some(bridge) = hooks::bridge() {
            bridge.detach(fd);
        }
    }
    passthrough::real().close_raw(fd)
}

enum StatTarget {
    Stat(*mut libc::stat),
    Stat64(*mut libc::stat64),
    Xstat(c_int, *mut libc::stat),
    Xstat64(c_int, *mut libc::stat64),
}

unsafe fn forward_stat(target: &StatTarget, path: *const c_char) -> c_int {
    let real = passthrough::real();
    match *target {
        StatTarget::Stat(buf) => real.stat_raw(path, buf),
        StatTarget::Stat64(buf) => real.stat64_raw(path, buf),
        StatTarget::Xstat(ver, buf) => real.xstat_raw(ver, path, buf),
        StatTarget::Xstat64(ver, buf) => real.xstat64_raw(ver, path, buf),
    }
}

unsafe fn hooked_stat(path: *const c_char, target: StatTarget) -> c_int {
    hooks::ensure_ready();
    if let (Some(p), Some(bridge)) = (cstr(path), hooks::bridge()) {
        if let Ok(s) = p.to_str() {
            match bridge.plan_stat(s) {
                StatPlan::Deny(errno) => return deny(errno),
                StatPlan::Passthrough(Some(canonical)) => {
                    if let Ok(c) = CString::new(canonical) {
                        return forward_stat(&target, c.as_ptr());
                    }
                }
                StatPlan::Passthrough(None) => {}
            }
        }
    }
    forward_stat(&target, path)
}

/// Hooked `stat(2)` (modern glibc exports the symbol directly).
///
/// # Safety
/// Called by arbitrary host code.
#[no_mangle]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    hooked_stat(path, StatTarget::Stat(buf))
}

/// Hooked `stat64`.
///
/// # Safety
/// Called by arbitrary host code.
#[no_mangle]
pub unsafe extern "C" fn stat64(path: *const c_char, buf: *mut libc::stat64) -> c_int {
    hooked_stat(path, StatTarget::Stat64(buf))
}

/// Hooked `__xstat` (the pre-2.33 glibc spelling of `stat`).
///
/// # Safety
/// Called by arbitrary host code.
#[no_mangle]
pub unsafe extern "C" fn __xstat(ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int {
    hooked_stat(path, StatTarget::Xstat(ver, buf))
}

/// Hooked `__xstat64`.
///
/// # Safety
/// Called by arbitrary host code.
#[no_mangle]
pub unsafe extern "C" fn __xstat64(
    ver: c_int,
    path: *const c_char,
    buf: *mut libc::stat64,
) -> c_int {
    hooked_stat(path, StatTarget::Xstat64(ver, buf))
}
