//! Lifecycle coordinator.
//!
//! Owns the slot table and binds gateway events to the bridge thread
//! pair: planning decides what a hooked call means, attach starts the
//! pump for a slot and hands the application the real control fd,
//! detach tears the pair down. Attach and detach hold the slot's
//! runtime lock across thread start and join, so a new attach can
//! never race a still-running prior pair.

use std::ffi::CString;
use std::sync::mpsc;
use std::sync::Arc;

use libc::{c_int, mode_t};
use log::{error, info, warn};
use nix::errno::Errno;

use crate::bridge::{pump, StreamFactory};
use crate::hooks::passthrough::FileOps;
use crate::path;
use crate::slot::{Slot, SlotState};

/// Gateway decision for a hooked open.
#[derive(Debug, PartialEq, Eq)]
pub enum OpenPlan {
    /// Forward to the authentic operation, optionally on the rewritten
    /// canonical path.
    Passthrough(Option<String>),
    /// Refuse: the path names a device a bound slot owns.
    Deny(Errno),
    /// The virtual frontend of the slot at this index; attach it.
    Attach(usize),
}

/// Gateway decision for a hooked stat.
#[derive(Debug, PartialEq, Eq)]
pub enum StatPlan {
    Passthrough(Option<String>),
    Deny(Errno),
}

/// The process-wide bridge: slot table plus the coordinator methods.
pub struct Bridge {
    main_adapter: u32,
    fops: &'static dyn FileOps,
    streams: Arc<dyn StreamFactory>,
    slots: Vec<Slot>,
}

impl Bridge {
    pub fn new(
        main_adapter: u32,
        fops: &'static dyn FileOps,
        streams: Arc<dyn StreamFactory>,
        slots: Vec<Slot>,
    ) -> Self {
        Bridge {
            main_adapter,
            fops,
            streams,
            slots,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Decide what a hooked open of `requested` means.
    pub fn plan_open(&self, requested: &str) -> OpenPlan {
        let canonical = path::rewrite(requested, self.main_adapter);
        let effective = canonical.as_deref().unwrap_or(requested);

        if let Some(parsed) = path::parse(effective) {
            if let Some(idx) = self.virtual_slot(parsed.adapter, parsed.node) {
                return OpenPlan::Attach(idx);
            }
            if self.is_guarded(parsed.adapter) {
                return OpenPlan::Deny(Errno::EBUSY);
            }
        }
        OpenPlan::Passthrough(canonical)
    }

    /// Decide what a hooked stat of `requested` means.
    pub fn plan_stat(&self, requested: &str) -> StatPlan {
        let canonical = path::rewrite(requested, self.main_adapter);
        let effective = canonical.as_deref().unwrap_or(requested);

        if let Some(parsed) = path::parse(effective) {
            if self.virtual_slot(parsed.adapter, parsed.node).is_some() {
                // The virtual frontend node lives under the main
                // adapter; forward that spelling, and leave a request
                // that already used it untouched.
                return if parsed.adapter == self.main_adapter {
                    StatPlan::Passthrough(canonical)
                } else {
                    StatPlan::Passthrough(None)
                };
            }
            if self.is_guarded(parsed.adapter) {
                return StatPlan::Deny(Errno::EACCES);
            }
        }
        StatPlan::Passthrough(canonical)
    }

    /// Match a path against the virtual frontends. Adapter 0 and the
    /// main adapter are equivalent spellings of the main bank, so a
    /// frontend reference through either one addresses the same slot.
    fn virtual_slot(&self, adapter: u32, node: &str) -> Option<usize> {
        if adapter != 0 && adapter != self.main_adapter {
            return None;
        }
        self.slots
            .iter()
            .position(|slot| node == format!("frontend{}", slot.frontend_index))
    }

    /// Whether a bound slot owns this physical adapter. The real
    /// devices of a bound tuner must appear inaccessible so the
    /// application only ever reaches them through the virtual frontend.
    fn is_guarded(&self, adapter: u32) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.shared.adapter_index == adapter)
    }

    /// Attach a slot: open its real control device, start the bridge
    /// thread pair, and return the control fd to the application.
    ///
    /// Blocks until the pump thread has reported startup, so the
    /// caller never receives a handle to a half-started slot.
    pub fn attach(&self, idx: usize, flags: c_int, mode: mode_t) -> Result<c_int, Errno> {
        let slot = self.slots.get(idx).ok_or(Errno::ENXIO)?;
        let shared = &slot.shared;
        let mut runtime = slot.runtime.lock();

        if runtime.state == SlotState::Streaming {
            return Err(Errno::EBUSY);
        }

        info!("tuner '{}' open", shared.name);

        let frontend = path::frontend_path(shared.adapter_index, 0);
        let cpath = CString::new(frontend).map_err(|_| Errno::EINVAL)?;
        let fd = self.fops.open(&cpath, flags, mode);
        if fd < 0 {
            let e = Errno::last();
            error!("tuner '{}' control device open failed: {e}", shared.name);
            return Err(e);
        }

        if let Err(e) = shared.vtuner.set_name(&shared.name) {
            warn!("tuner '{}' name registration failed: {e}", shared.name);
        }

        shared.set_running(true);
        let (tx, rx) = mpsc::sync_channel(1);
        let pump = match pump::spawn(Arc::clone(shared), Arc::clone(&self.streams), tx) {
            Ok(handle) => handle,
            Err(e) => {
                error!("tuner '{}' pump thread start failed: {e}", shared.name);
                shared.set_running(false);
                self.fops.close(fd);
                return Err(Errno::ENOMEM);
            }
        };

        // The pump reports exactly once: tap capturing and control
        // thread up, or the startup error.
        match rx.recv() {
            Ok(Ok(())) => {
                shared.record_attach(fd);
                runtime.state = SlotState::Streaming;
                runtime.pump = Some(pump);
                info!("tuner '{}' ready now", shared.name);
                Ok(fd)
            }
            Ok(Err(e)) => {
                error!("tuner '{}' bridge startup failed: {e}", shared.name);
                let _ = pump.join();
                self.fops.close(fd);
                Err(Errno::ENOMEM)
            }
            Err(_) => {
                // Pump thread died without reporting.
                error!("tuner '{}' bridge startup aborted", shared.name);
                let _ = pump.join();
                self.fops.close(fd);
                Err(Errno::ENOMEM)
            }
        }
    }

    /// Tear down the slot whose attached control fd is `fd`, if any.
    ///
    /// The fd match is a lock-free claim, so closes of unrelated
    /// descriptors (including the bridge's own, routed here through
    /// the hook) pass straight through. Joins the pump thread, which
    /// itself joins the control thread, before returning.
    pub fn detach(&self, fd: c_int) -> bool {
        for slot in &self.slots {
            if !slot.shared.claim_detach(fd) {
                continue;
            }
            let shared = &slot.shared;
            info!("tuner '{}' close request", shared.name);

            shared.set_running(false);
            let mut runtime = slot.runtime.lock();
            if let Some(pump) = runtime.pump.take() {
                if pump.join().is_err() {
                    error!("tuner '{}' pump thread panicked", shared.name);
                }
            }
            runtime.state = SlotState::Bound;

            info!("tuner '{}' closed", shared.name);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use std::os::fd::IntoRawFd;

    use crate::bridge::{PidFilter, StreamEndpoints, StreamSource};
    use crate::error::BridgeError;
    use crate::slot::SlotShared;
    use crate::vtuner::VtunerDevice;

    struct NullFileOps;

    impl FileOps for NullFileOps {
        fn open(&self, _path: &CStr, _flags: c_int, _mode: mode_t) -> c_int {
            -1
        }

        fn close(&self, _fd: c_int) -> c_int {
            0
        }
    }

    /// Hands out real descriptors backed by `/dev/null` so attach and
    /// detach can exercise fd bookkeeping.
    struct NullDeviceOps;

    impl FileOps for NullDeviceOps {
        fn open(&self, _path: &CStr, _flags: c_int, _mode: mode_t) -> c_int {
            match std::fs::File::open("/dev/null") {
                Ok(file) => file.into_raw_fd(),
                Err(_) => -1,
            }
        }

        fn close(&self, fd: c_int) -> c_int {
            unsafe { libc::close(fd) }
        }
    }

    /// A stream device that never has payload and accepts every
    /// filter command.
    struct IdleStream;

    impl StreamSource for IdleStream {
        fn wait_readable(&self, _timeout_ms: u16) -> nix::Result<bool> {
            Ok(false)
        }

        fn read(&self, _buf: &mut [u8]) -> nix::Result<usize> {
            Err(Errno::EAGAIN)
        }
    }

    impl PidFilter for IdleStream {
        fn add_pid(&self, _pid: u16) -> nix::Result<()> {
            Ok(())
        }

        fn remove_pid(&self, _pid: u16) -> nix::Result<()> {
            Ok(())
        }
    }

    struct IdleStreamFactory;

    impl StreamFactory for IdleStreamFactory {
        fn open_stream(&self, _adapter: u32) -> Result<StreamEndpoints, BridgeError> {
            let device = Arc::new(IdleStream);
            let source: Arc<dyn StreamSource + Send + Sync> = device.clone();
            let filter: Arc<dyn PidFilter + Send + Sync> = device;
            Ok(StreamEndpoints { source, filter })
        }
    }

    fn test_slots() -> Vec<Slot> {
        vec![
            Slot::new(
                0,
                1,
                SlotShared::new(3, "TunerX".into(), VtunerDevice::null_for_tests()),
            ),
            Slot::new(
                1,
                2,
                SlotShared::new(5, "TunerY".into(), VtunerDevice::null_for_tests()),
            ),
        ]
    }

    fn test_bridge() -> Bridge {
        let fops: &'static dyn FileOps = Box::leak(Box::new(NullFileOps));
        Bridge::new(2, fops, Arc::new(IdleStreamFactory), test_slots())
    }

    #[test]
    fn test_plan_open_matches_virtual_frontends() {
        let bridge = test_bridge();
        // Both spellings of the main bank address the same slot.
        assert_eq!(
            bridge.plan_open("/dev/dvb/adapter2/frontend1"),
            OpenPlan::Attach(0)
        );
        assert_eq!(
            bridge.plan_open("/dev/dvb/adapter0/frontend1"),
            OpenPlan::Attach(0)
        );
        assert_eq!(
            bridge.plan_open("/dev/dvb/adapter0/frontend2"),
            OpenPlan::Attach(1)
        );
        assert_eq!(
            bridge.plan_open("/dev/dvb/adapter2/frontend2"),
            OpenPlan::Attach(1)
        );
    }

    #[test]
    fn test_plan_open_with_main_at_zero() {
        let fops: &'static dyn FileOps = Box::leak(Box::new(NullFileOps));
        let bridge = Bridge::new(0, fops, Arc::new(IdleStreamFactory), test_slots());
        assert_eq!(
            bridge.plan_open("/dev/dvb/adapter0/frontend1"),
            OpenPlan::Attach(0)
        );
        assert_eq!(bridge.plan_open("/etc/passwd"), OpenPlan::Passthrough(None));
    }

    #[test]
    fn test_plan_open_guards_bound_adapters() {
        let bridge = test_bridge();
        assert_eq!(
            bridge.plan_open("/dev/dvb/adapter3/frontend0"),
            OpenPlan::Deny(Errno::EBUSY)
        );
        assert_eq!(
            bridge.plan_open("/dev/dvb/adapter5/demux0"),
            OpenPlan::Deny(Errno::EBUSY)
        );
    }

    #[test]
    fn test_plan_open_passes_other_paths_through() {
        let bridge = test_bridge();
        assert_eq!(bridge.plan_open("/etc/passwd"), OpenPlan::Passthrough(None));
        assert_eq!(
            bridge.plan_open("/dev/dvb/adapter4/frontend0"),
            OpenPlan::Passthrough(None)
        );
        // Rewritten but otherwise unremarkable paths carry the
        // canonical spelling.
        assert_eq!(
            bridge.plan_open("/dev/dvb/adapter0/demux0"),
            OpenPlan::Passthrough(Some("/dev/dvb/adapter2/demux0".into()))
        );
    }

    #[test]
    fn test_plan_stat_guards_bound_adapters() {
        let bridge = test_bridge();
        assert_eq!(
            bridge.plan_stat("/dev/dvb/adapter3/frontend0"),
            StatPlan::Deny(Errno::EACCES)
        );
        assert_eq!(
            bridge.plan_stat("/dev/dvb/adapter2/frontend1"),
            StatPlan::Passthrough(None)
        );
        assert_eq!(
            bridge.plan_stat("/dev/video0"),
            StatPlan::Passthrough(None)
        );
    }

    #[test]
    fn test_plan_stat_forwards_virtual_frontends_on_main_spelling() {
        let bridge = test_bridge();
        // The virtual frontend node exists under the main adapter, so a
        // stat through the adapter-0 spelling is forwarded there and a
        // main-spelled stat stays as it came in.
        assert_eq!(
            bridge.plan_stat("/dev/dvb/adapter0/frontend1"),
            StatPlan::Passthrough(Some("/dev/dvb/adapter2/frontend1".into()))
        );
        assert_eq!(
            bridge.plan_stat("/dev/dvb/adapter2/frontend2"),
            StatPlan::Passthrough(None)
        );
    }

    #[test]
    fn test_attach_reports_control_open_failure() {
        let bridge = test_bridge();
        // NullFileOps fails every open, so attach must surface an
        // error and leave the slot idle.
        assert!(bridge.attach(0, libc::O_RDWR, 0).is_err());
        let runtime = bridge.slots[0].runtime.lock();
        assert_eq!(runtime.state, SlotState::Bound);
        assert!(runtime.pump.is_none());
        assert!(!bridge.slots[0].shared.is_running());
    }

    #[test]
    fn test_detach_ignores_unknown_fds() {
        let bridge = test_bridge();
        assert!(!bridge.detach(42));
        assert!(!bridge.detach(-1));
    }

    #[test]
    fn test_attach_out_of_range_slot() {
        let bridge = test_bridge();
        assert_eq!(bridge.attach(9, libc::O_RDWR, 0), Err(Errno::ENXIO));
    }

    #[test]
    fn test_attach_detach_round_trip() {
        let fops: &'static dyn FileOps = Box::leak(Box::new(NullDeviceOps));
        let bridge = Bridge::new(2, fops, Arc::new(IdleStreamFactory), test_slots());
        assert_eq!(bridge.slot_count(), 2);

        let fd = bridge.attach(0, libc::O_RDWR, 0).unwrap();
        let slot = &bridge.slots[0];
        assert!(slot.shared.is_running());
        assert!(slot.shared.is_attached());
        {
            let runtime = slot.runtime.lock();
            assert_eq!(runtime.state, SlotState::Streaming);
            assert!(runtime.pump.is_some());
        }

        // A second attach while streaming is refused; the other slot
        // is unaffected.
        assert_eq!(bridge.attach(0, libc::O_RDWR, 0), Err(Errno::EBUSY));
        assert!(!bridge.slots[1].shared.is_running());

        assert!(bridge.detach(fd));
        assert!(!slot.shared.is_running());
        assert!(!slot.shared.is_attached());
        {
            let runtime = slot.runtime.lock();
            assert_eq!(runtime.state, SlotState::Bound);
            assert!(runtime.pump.is_none());
        }
        fops.close(fd);

        // The joined slot attaches again.
        let fd = bridge.attach(0, libc::O_RDWR, 0).unwrap();
        assert!(slot.shared.is_running());
        assert!(bridge.detach(fd));
        fops.close(fd);
    }
}
