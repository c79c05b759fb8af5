//! Adapter discovery and capability negotiation.
//!
//! Runs once per process. Enumerates the host's DVB adapters through
//! sysfs, decides which one is the built-in main bank (highest
//! frontend count), binds every other labeled adapter to a free
//! vtuner slot, and negotiates each bound tuner's capabilities with
//! the vtuner facility.

use std::ffi::CString;
use std::fs;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;

use libc::O_RDWR;
use log::{debug, info, warn};
use nix::errno::Errno;

use vtuner_protocol::capability;

use crate::bridge::lifecycle::Bridge;
use crate::bridge::DemuxFactory;
use crate::dvb::frontend;
use crate::error::BridgeError;
use crate::hooks::passthrough::FileOps;
use crate::path;
use crate::slot::{Slot, SlotShared, MAX_ADAPTERS};
use crate::vtuner::{VtunerDevice, MAX_VTUNERS};

const SYS_DVB_ROOT: &str = "/sys/class/dvb";

/// A labeled USB adapter awaiting a vtuner slot.
struct Candidate {
    adapter: u32,
    name: String,
}

/// Run discovery and return the bridge, or `None` when no USB tuner
/// could be bound. Never fatal to the process.
pub fn discover(fops: &'static dyn FileOps) -> Option<Bridge> {
    let main_adapter = main_adapter_index(SYS_DVB_ROOT);
    info!("detected DVB adapter{main_adapter} as main adapter");

    let main_frontends = frontend_count(SYS_DVB_ROOT, main_adapter);
    info!("scanning for USB tuners");

    let mut slots = Vec::new();
    for (position, candidate) in usb_adapters(SYS_DVB_ROOT, main_adapter).iter().enumerate() {
        // Every labeled adapter occupies a frontend position, bound or
        // not, so the facility-visible numbering is stable across
        // binding failures.
        let frontend_index = main_frontends + position as u32;
        match bind_adapter(fops, candidate, frontend_index) {
            Ok(slot) => {
                info!(
                    "tuner '{}' adapter{} assigned to vtuner{} frontend{}",
                    candidate.name, candidate.adapter, slot.vtuner_index, slot.frontend_index
                );
                slots.push(slot);
            }
            Err(e) => {
                warn!(
                    "tuner '{}' adapter{} not bound: {e}",
                    candidate.name, candidate.adapter
                );
            }
        }
    }

    if slots.is_empty() {
        info!("no USB tuners bound");
        None
    } else {
        info!("{} USB tuner(s) bound", slots.len());
        Some(Bridge::new(
            main_adapter,
            fops,
            Arc::new(DemuxFactory::new(fops)),
            slots,
        ))
    }
}

/// The adapter with the most sysfs device entries is the built-in
/// bank; ties go to the lowest index.
fn main_adapter_index(root: &str) -> u32 {
    let mut tally = [0u32; MAX_ADAPTERS];
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                tally_entry(&mut tally, name);
            }
        }
    }
    argmax(&tally)
}

fn tally_entry(tally: &mut [u32; MAX_ADAPTERS], name: &str) {
    // Entries are dvb<N>.<node>.
    let Some(rest) = name.strip_prefix("dvb") else {
        return;
    };
    let Some(adapter) = rest.chars().next().and_then(|c| c.to_digit(10)) else {
        return;
    };
    match tally.get_mut(adapter as usize) {
        Some(count) => *count += 1,
        None => warn!("skipped '{name}' on main adapter lookup"),
    }
}

fn argmax(tally: &[u32; MAX_ADAPTERS]) -> u32 {
    let mut main = 0;
    let mut best = 0;
    for (adapter, &count) in tally.iter().enumerate() {
        if count > best {
            best = count;
            main = adapter as u32;
        }
    }
    main
}

/// Count the physical frontends an adapter reports.
fn frontend_count(root: &str, adapter: u32) -> u32 {
    let mut count = 0;
    while fs::metadata(format!("{root}/dvb{adapter}.frontend{count}/dev")).is_ok() {
        count += 1;
    }
    count
}

/// Read an adapter's descriptive label: product name, falling back to
/// manufacturer. `None` ends enumeration at the caller.
fn adapter_label(root: &str, adapter: u32) -> Option<String> {
    for attr in ["product", "manufacturer"] {
        let file = format!("{root}/dvb{adapter}.frontend0/device/{attr}");
        if let Ok(raw) = fs::read_to_string(&file) {
            return Some(trim_label(&raw));
        }
    }
    None
}

fn trim_label(raw: &str) -> String {
    raw.trim_end_matches(['\n', ' ']).to_string()
}

/// Enumerate labeled non-main adapters in ascending index order. An
/// adapter whose label cannot be read ends enumeration (assumed to be
/// a sysfs race or leftover entry).
fn usb_adapters(root: &str, main_adapter: u32) -> Vec<Candidate> {
    let mut found = Vec::new();
    let mut nr = 0;
    while found.len() < MAX_ADAPTERS {
        if nr != main_adapter {
            match adapter_label(root, nr) {
                Some(name) => found.push(Candidate { adapter: nr, name }),
                None => break,
            }
        }
        nr += 1;
    }
    found
}

/// Acquire the first free vtuner slot.
fn bind_vtuner(fops: &dyn FileOps) -> Result<(VtunerDevice, u32), BridgeError> {
    for index in 0..MAX_VTUNERS {
        match VtunerDevice::open(fops, index) {
            Ok(device) => return Ok((device, index)),
            Err(Errno::EBUSY) => continue,
            Err(e) => {
                debug!("vtuner{index} probe ended: {e}");
                break;
            }
        }
    }
    Err(BridgeError::NoFreeSlot)
}

/// Bind one adapter: acquire a vtuner slot and negotiate capabilities.
/// On failure the acquired slot (if any) is released again.
fn bind_adapter(
    fops: &dyn FileOps,
    candidate: &Candidate,
    frontend_index: u32,
) -> Result<Slot, BridgeError> {
    let (vtuner, vtuner_index) = bind_vtuner(fops)?;
    negotiate(fops, &vtuner, candidate)?;
    Ok(Slot::new(
        vtuner_index,
        frontend_index,
        SlotShared::new(candidate.adapter, candidate.name.clone(), vtuner),
    ))
}

/// Query the real tuner's delivery systems and register the reduced
/// mode list with the vtuner facility.
///
/// The control device is only held open for the query; streaming
/// reopens it on attach.
fn negotiate(
    fops: &dyn FileOps,
    vtuner: &VtunerDevice,
    candidate: &Candidate,
) -> Result<(), BridgeError> {
    let cpath = CString::new(path::frontend_path(candidate.adapter, 0))
        .map_err(|_| BridgeError::Device(Errno::EINVAL))?;
    let fd = fops.open(&cpath, O_RDWR, 0);
    if fd < 0 {
        return Err(BridgeError::Device(Errno::last()));
    }
    let control = unsafe { OwnedFd::from_raw_fd(fd) };

    if let Err(e) = vtuner.set_name(&candidate.name) {
        warn!("tuner '{}' name registration failed: {e}", candidate.name);
    }

    let systems = frontend::query_delivery_systems(control.as_raw_fd())?;
    let modes = capability::reduce_modes(&systems)?;
    debug!("tuner '{}' modes: {modes:?}", candidate.name);

    if let [only] = modes[..] {
        vtuner.set_type(only)?;
    } else {
        vtuner.set_modes(&modes)?;
    }

    if let Err(e) = vtuner.set_has_outputs(false) {
        warn!("tuner '{}' output flag failed: {e}", candidate.name);
    }
    Ok(())
}
