//! Adapter slot records.
//!
//! A slot is the binding unit between one physical USB adapter and one
//! vtuner instance. Slots are created during discovery and live for
//! the rest of the process; the vtuner handle inside is never
//! reassigned to another adapter.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::vtuner::VtunerDevice;

/// Maximum number of adapters (and vtuner slots) the bridge manages.
pub const MAX_ADAPTERS: usize = 8;

/// Transport stream packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// Payload buffer size: a common multiple of the TS packet size and
/// the page size.
pub const BUFFER_SIZE: usize = (TS_PACKET_SIZE / 4) * 4096;

/// Demux internal buffer size (1.5 MB).
pub const DEMUX_BUFFER_SIZE: usize = 8 * BUFFER_SIZE;

/// Poll timeout for every blocking call inside the bridge threads.
/// This is the sole cancellation mechanism: each thread rechecks its
/// running flag whenever a blocking call returns.
pub const POLL_INTERVAL_MS: u16 = 1000;

/// Sentinel for "no control fd attached".
const NO_FD: i32 = -1;

/// Per-slot state shared with the bridge threads.
///
/// Only atomics cross thread boundaries: the running flag cancels the
/// thread pair, and the attached control fd doubles as the access
/// guard predicate for the gateway. Everything else in here is
/// immutable after discovery.
pub struct SlotShared {
    /// Physical DVB adapter index of the USB tuner.
    pub adapter_index: u32,
    /// Human-readable tuner name from sysfs.
    pub name: String,
    /// The bound vtuner device, open for the slot's entire lifetime.
    pub vtuner: VtunerDevice,
    /// Set by attach, cleared by detach or by a failing bridge thread.
    pub running: AtomicBool,
    /// The application's control fd while attached, [`NO_FD`] otherwise.
    frontend_fd: AtomicI32,
}

impl SlotShared {
    pub fn new(adapter_index: u32, name: String, vtuner: VtunerDevice) -> Self {
        SlotShared {
            adapter_index,
            name,
            vtuner,
            running: AtomicBool::new(false),
            frontend_fd: AtomicI32::new(NO_FD),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Release);
    }

    /// Whether an application currently holds this slot's control fd.
    pub fn is_attached(&self) -> bool {
        self.frontend_fd.load(Ordering::Acquire) != NO_FD
    }

    pub fn record_attach(&self, fd: i32) {
        self.frontend_fd.store(fd, Ordering::Release);
    }

    /// Claim the attached fd for teardown. Returns false when `fd` is
    /// not this slot's control fd or another closer already claimed it.
    pub fn claim_detach(&self, fd: i32) -> bool {
        fd != NO_FD
            && self
                .frontend_fd
                .compare_exchange(fd, NO_FD, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }
}

/// Explicit lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Discovered, negotiated, idle.
    Bound,
    /// Attached by the application; the bridge thread pair exists.
    Streaming,
}

/// Mutable per-slot runtime owned by the lifecycle coordinator.
///
/// Held under a per-slot mutex; attach and detach keep it locked
/// across thread start and join, which is what guarantees a new
/// attach can never race a still-running prior pair.
pub struct SlotRuntime {
    pub state: SlotState,
    pub pump: Option<JoinHandle<()>>,
}

/// One bound adapter slot.
pub struct Slot {
    /// Index of the vtuner device this slot acquired.
    pub vtuner_index: u32,
    /// Frontend index the vtuner facility exposes to the application.
    pub frontend_index: u32,
    pub shared: Arc<SlotShared>,
    pub runtime: Mutex<SlotRuntime>,
}

impl Slot {
    pub fn new(vtuner_index: u32, frontend_index: u32, shared: SlotShared) -> Self {
        Slot {
            vtuner_index,
            frontend_index,
            shared: Arc::new(shared),
            runtime: Mutex::new(SlotRuntime {
                state: SlotState::Bound,
                pump: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sizes() {
        assert_eq!(BUFFER_SIZE % (TS_PACKET_SIZE / 4), 0);
        assert_eq!(BUFFER_SIZE % 4096, 0);
        assert_eq!(DEMUX_BUFFER_SIZE, 8 * BUFFER_SIZE);
    }

    #[test]
    fn test_attach_claim() {
        let shared = SlotShared::new(3, "t".into(), VtunerDevice::null_for_tests());
        assert!(!shared.is_attached());

        shared.record_attach(42);
        assert!(shared.is_attached());

        // Wrong fd cannot claim, right fd claims exactly once.
        assert!(!shared.claim_detach(41));
        assert!(shared.claim_detach(42));
        assert!(!shared.claim_detach(42));
        assert!(!shared.is_attached());
    }

    #[test]
    fn test_claim_ignores_sentinel() {
        let shared = SlotShared::new(0, "t".into(), VtunerDevice::null_for_tests());
        assert!(!shared.claim_detach(-1));
    }
}
