//! vtuner message layout and the PID set model.
//!
//! The message struct mirrors the driver's header byte for byte: a
//! 32-bit type tag followed by a union of request bodies. The only
//! variant the bridge interprets is the PID list; everything else is
//! answered with a neutral response and left to the driver.

/// ioctl request numbers understood by the vtuner device.
///
/// These are plain sequential numbers in the driver header, not
/// `_IO`-encoded, so callers must issue them through the raw-request
/// ioctl path.
pub const VTUNER_FLUSH: u64 = 0;
pub const VTUNER_GET_MESSAGE: u64 = 1;
pub const VTUNER_SET_RESPONSE: u64 = 2;
pub const VTUNER_SET_NAME: u64 = 3;
pub const VTUNER_SET_TYPE: u64 = 4;
pub const VTUNER_SET_HAS_OUTPUTS: u64 = 5;
pub const VTUNER_SET_FE_INFO: u64 = 6;
pub const VTUNER_SET_NUM_MODES: u64 = 7;
pub const VTUNER_SET_MODES: u64 = 8;

/// Message tag for a PID-filter list update.
pub const MSG_PIDLIST: i32 = 14;

/// Capacity of the PID list carried in one message.
pub const MAX_PIDS: usize = 36;

/// Sentinel marking an unused entry in the PID list.
pub const PID_NONE: u16 = 0xffff;

/// Message body union.
///
/// The driver copies `sizeof(struct vtuner_message)` on every
/// GET_MESSAGE / SET_RESPONSE, so the union must be at least as large
/// as the biggest variant it knows. That is the packed frontend
/// property variant at 76 bytes; `_pad` reserves it and the `u32`
/// member fixes the 4-byte alignment of the C layout.
#[repr(C)]
#[derive(Clone, Copy)]
pub union VtunerMessageBody {
    pub pid_list: [u16; MAX_PIDS],
    pub mode_changed: u32,
    _pad: [u8; 76],
}

/// One vtuner control message: a type tag plus a tagged-union body.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VtunerMessage {
    kind: i32,
    body: VtunerMessageBody,
}

impl VtunerMessage {
    /// An all-zero message, used as the neutral response body.
    pub fn zeroed() -> Self {
        VtunerMessage {
            kind: 0,
            body: VtunerMessageBody { _pad: [0; 76] },
        }
    }

    /// An all-zero message with the given type tag.
    pub fn with_kind(kind: i32) -> Self {
        let mut msg = Self::zeroed();
        msg.kind = kind;
        msg
    }

    /// Build a PID-list message (used by tests and mock endpoints).
    pub fn pid_list(pids: &[u16]) -> Self {
        let mut msg = Self::with_kind(MSG_PIDLIST);
        msg.body.pid_list = PidSet::from_slice(pids).into_raw();
        msg
    }

    /// The message type tag.
    pub fn kind(&self) -> i32 {
        self.kind
    }

    /// Interpret the body as a PID list.
    ///
    /// Only meaningful when `kind() == MSG_PIDLIST`; every bit pattern
    /// is a valid `[u16; MAX_PIDS]`, so the union read itself is safe.
    pub fn pids(&self) -> PidSet {
        PidSet::from_raw(unsafe { self.body.pid_list })
    }

    /// Turn this message into the neutral "handled, nothing to report"
    /// response expected by the driver for unrecognized requests.
    pub fn clear_for_response(&mut self) {
        self.kind = 0;
    }
}

impl std::fmt::Debug for VtunerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VtunerMessage")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Fixed-capacity, unordered set of active PIDs.
///
/// Backed by the sentinel-filled array the wire format uses. The set
/// view deduplicates: a PID repeated in a message counts once, so the
/// filter-command count always equals the symmetric difference between
/// the old and new sets.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PidSet {
    pids: [u16; MAX_PIDS],
}

impl PidSet {
    /// The empty set (all entries unused).
    pub const fn empty() -> Self {
        PidSet {
            pids: [PID_NONE; MAX_PIDS],
        }
    }

    /// Wrap a raw wire array.
    pub fn from_raw(pids: [u16; MAX_PIDS]) -> Self {
        PidSet { pids }
    }

    /// Build a set from up to [`MAX_PIDS`] PIDs; extras are dropped.
    pub fn from_slice(pids: &[u16]) -> Self {
        let mut set = Self::empty();
        for (dst, src) in set.pids.iter_mut().zip(pids) {
            *dst = *src;
        }
        set
    }

    /// The underlying wire array.
    pub fn into_raw(self) -> [u16; MAX_PIDS] {
        self.pids
    }

    /// Iterate the active PIDs, skipping sentinels and duplicates.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.pids
            .iter()
            .enumerate()
            .filter(|(_, &p)| p != PID_NONE)
            .filter(|(i, &p)| !self.pids[..*i].contains(&p))
            .map(|(_, &p)| p)
    }

    pub fn contains(&self, pid: u16) -> bool {
        pid != PID_NONE && self.pids.contains(&pid)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Set difference against an incoming set.
    ///
    /// Returns `(removed, added)`: PIDs active here but absent from
    /// `new`, and PIDs active in `new` but absent here. Together they
    /// are exactly the symmetric difference of the two sets.
    pub fn diff(&self, new: &PidSet) -> (Vec<u16>, Vec<u16>) {
        let removed = self.iter().filter(|&p| !new.contains(p)).collect();
        let added = new.iter().filter(|&p| !self.contains(p)).collect();
        (removed, added)
    }
}

impl std::fmt::Debug for PidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<u16> for PidSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut set = Self::empty();
        for (dst, src) in set.pids.iter_mut().zip(iter) {
            *dst = src;
        }
        set
    }
}
