//! Delivery-system capability model.
//!
//! A physical frontend reports the delivery systems it supports as an
//! enumerated list. The vtuner facility advertises at most three mode
//! names, so the list is reduced through a fixed precedence table:
//! second-generation standards suppress the standard they supersede,
//! and the survivors are ordered by a fixed priority.

use thiserror::Error;

/// Maximum number of modes the vtuner facility can advertise.
pub const MAX_MODES: usize = 3;

/// Wire width of one mode name in the SET_MODES ioctl.
pub const MODE_NAME_LEN: usize = 32;

/// Errors from capability reduction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The frontend reported no delivery system the bridge understands.
    #[error("tuner reports no usable delivery system")]
    NoUsableModes,
}

/// Delivery systems understood by the bridge, in reduction priority
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliverySystem {
    DvbS,
    DvbS2,
    DvbC,
    DvbT,
    DvbT2,
}

impl DeliverySystem {
    /// Map a kernel `fe_delivery_system` value. Systems the bridge
    /// cannot expose (ATSC, ISDB, ...) map to `None` and are ignored.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(DeliverySystem::DvbC), // SYS_DVBC_ANNEX_A
            3 => Some(DeliverySystem::DvbT),
            5 => Some(DeliverySystem::DvbS),
            6 => Some(DeliverySystem::DvbS2),
            16 => Some(DeliverySystem::DvbT2),
            _ => None,
        }
    }

    /// The mode name advertised to the vtuner facility.
    pub fn mode_name(self) -> &'static str {
        match self {
            DeliverySystem::DvbS => "DVB-S",
            DeliverySystem::DvbS2 => "DVB-S2",
            DeliverySystem::DvbC => "DVB-C",
            DeliverySystem::DvbT => "DVB-T",
            DeliverySystem::DvbT2 => "DVB-T2",
        }
    }

    /// The first-generation standard this one supersedes, if any.
    fn supersedes(self) -> Option<DeliverySystem> {
        match self {
            DeliverySystem::DvbS2 => Some(DeliverySystem::DvbS),
            DeliverySystem::DvbT2 => Some(DeliverySystem::DvbT),
            _ => None,
        }
    }
}

/// Reduce a reported delivery-system list to the advertised mode list.
///
/// Deduplicates, drops standards superseded by a present
/// second-generation variant, orders by priority and caps the result
/// at [`MAX_MODES`]. Fails only when nothing usable remains.
pub fn reduce_modes(systems: &[DeliverySystem]) -> Result<Vec<DeliverySystem>, CapabilityError> {
    let mut present = [false; 5];
    for sys in systems {
        present[*sys as usize] = true;
    }

    for sys in [DeliverySystem::DvbS2, DeliverySystem::DvbT2] {
        if present[sys as usize] {
            if let Some(old) = sys.supersedes() {
                present[old as usize] = false;
            }
        }
    }

    let modes: Vec<DeliverySystem> = [
        DeliverySystem::DvbS,
        DeliverySystem::DvbS2,
        DeliverySystem::DvbC,
        DeliverySystem::DvbT,
        DeliverySystem::DvbT2,
    ]
    .into_iter()
    .filter(|sys| present[*sys as usize])
    .take(MAX_MODES)
    .collect();

    if modes.is_empty() {
        Err(CapabilityError::NoUsableModes)
    } else {
        Ok(modes)
    }
}

/// Encode mode names into the fixed `[[u8; 32]; 3]` wire shape of the
/// SET_MODES ioctl (NUL-padded).
pub fn encode_mode_names(modes: &[DeliverySystem]) -> [[u8; MODE_NAME_LEN]; MAX_MODES] {
    let mut wire = [[0u8; MODE_NAME_LEN]; MAX_MODES];
    for (slot, mode) in wire.iter_mut().zip(modes) {
        let name = mode.mode_name().as_bytes();
        slot[..name.len()].copy_from_slice(name);
    }
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliverySystem::*;

    #[test]
    fn test_second_generation_suppresses_first() {
        let modes = reduce_modes(&[DvbS, DvbS2, DvbC]).unwrap();
        assert_eq!(modes, vec![DvbS2, DvbC]);
    }

    #[test]
    fn test_priority_order() {
        let modes = reduce_modes(&[DvbT, DvbC, DvbS]).unwrap();
        assert_eq!(modes, vec![DvbS, DvbC, DvbT]);
    }

    #[test]
    fn test_cap_at_three() {
        let modes = reduce_modes(&[DvbS, DvbC, DvbT, DvbT2]).unwrap();
        // DVB-T suppressed by DVB-T2, the rest fit the cap.
        assert_eq!(modes, vec![DvbS, DvbC, DvbT2]);

        let modes = reduce_modes(&[DvbS, DvbS2, DvbC, DvbT, DvbT2]).unwrap();
        assert_eq!(modes.len(), MAX_MODES);
        assert_eq!(modes, vec![DvbS2, DvbC, DvbT2]);
    }

    #[test]
    fn test_single_mode() {
        let modes = reduce_modes(&[DvbT2]).unwrap();
        assert_eq!(modes, vec![DvbT2]);
    }

    #[test]
    fn test_empty_is_an_error() {
        assert_eq!(reduce_modes(&[]), Err(CapabilityError::NoUsableModes));
    }

    #[test]
    fn test_duplicates_collapse() {
        let modes = reduce_modes(&[DvbC, DvbC, DvbC]).unwrap();
        assert_eq!(modes, vec![DvbC]);
    }

    #[test]
    fn test_from_raw_mapping() {
        assert_eq!(DeliverySystem::from_raw(5), Some(DvbS));
        assert_eq!(DeliverySystem::from_raw(6), Some(DvbS2));
        assert_eq!(DeliverySystem::from_raw(1), Some(DvbC));
        assert_eq!(DeliverySystem::from_raw(3), Some(DvbT));
        assert_eq!(DeliverySystem::from_raw(16), Some(DvbT2));
        // ISDB-T is real but not something the bridge can advertise.
        assert_eq!(DeliverySystem::from_raw(8), None);
    }

    #[test]
    fn test_encode_mode_names() {
        let wire = encode_mode_names(&[DvbS2, DvbC]);
        assert_eq!(&wire[0][..6], b"DVB-S2");
        assert_eq!(wire[0][6], 0);
        assert_eq!(&wire[1][..5], b"DVB-C");
        assert_eq!(wire[2], [0u8; MODE_NAME_LEN]);
    }
}
