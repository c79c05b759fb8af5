//! Interception gateway: hook entry points and the process-wide
//! bridge state they consult.
//!
//! The authentic libc operations resolve lazily through
//! [`passthrough`]; the heavier one-shot work (logger, activation
//! check, adapter discovery) is guarded by a three-state flag so a
//! hook fired re-entrantly or concurrently while discovery is running
//! falls through to the authentic operation instead of deadlocking on
//! an initialize-once primitive.

#[cfg(not(test))]
pub mod exports;
pub mod passthrough;

use std::env;
use std::sync::atomic::{AtomicU8, Ordering};

use log::debug;
use once_cell::sync::OnceCell;

use crate::bridge::lifecycle::Bridge;
use crate::{discovery, logging};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(UNINIT);
static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Default name of the application the bridge activates for.
const DEFAULT_PROCESS: &str = "enigma2";

/// Run one-time initialization if this is the first hooked call.
///
/// At most one caller performs the work; everyone else returns
/// immediately and behaves as a pure pass-through until the state
/// flips to ready. Interception of adapter paths only matters once
/// slots exist, so the window is harmless.
pub fn ensure_ready() {
    if STATE.load(Ordering::Acquire) == READY {
        return;
    }
    if STATE
        .compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    logging::init();
    if expected_process_active() {
        if let Some(bridge) = discovery::discover(passthrough::real()) {
            let _ = BRIDGE.set(bridge);
        }
    } else {
        debug!("not the expected application, staying passive");
    }
    STATE.store(READY, Ordering::Release);
}

/// The active bridge, if discovery ran and bound at least one slot.
pub fn bridge() -> Option<&'static Bridge> {
    if STATE.load(Ordering::Acquire) == READY {
        BRIDGE.get()
    } else {
        None
    }
}

/// Check whether `argv[0]` of a cmdline buffer names the expected
/// application, either bare or as the final path component.
pub(crate) fn process_matches(cmdline: &[u8], expected: &str) -> bool {
    let argv0 = cmdline.split(|&b| b == 0).next().unwrap_or(&[]);
    let base = argv0
        .rsplit(|&b| b == b'/')
        .next()
        .unwrap_or(&[]);
    base == expected.as_bytes()
}

fn expected_process_active() -> bool {
    let expected = env::var("USBTUNER_PROCESS").unwrap_or_else(|_| DEFAULT_PROCESS.to_string());
    match std::fs::read("/proc/self/cmdline") {
        Ok(cmdline) => process_matches(&cmdline, &expected),
        Err(_) => false,
    }
}
