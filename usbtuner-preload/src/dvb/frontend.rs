//! Frontend capability query.
//!
//! The only thing the bridge asks a real frontend is which delivery
//! systems it supports (`DTV_ENUM_DELSYS` via `FE_GET_PROPERTY`);
//! tuning itself is driven by the application straight against the
//! real control fd it receives from the gateway.

use std::os::fd::RawFd;

use libc::c_void;

use vtuner_protocol::capability::DeliverySystem;

const DTV_ENUM_DELSYS: u32 = 44;

// Layout per linux/dvb/frontend.h; dtv_property is packed there, and
// the buffer variant is the one ENUM_DELSYS fills.
#[repr(C, packed)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct DtvPropertyBuffer {
    data: [u8; 32],
    len: u32,
    reserved1: [u32; 3],
    reserved2: *mut c_void,
}

#[repr(C, packed)]
union DtvPropertyData {
    data: u32,
    buffer: DtvPropertyBuffer,
}

#[repr(C, packed)]
#[allow(dead_code)]
struct DtvProperty {
    cmd: u32,
    reserved: [u32; 3],
    u: DtvPropertyData,
    result: i32,
}

#[repr(C)]
struct DtvProperties {
    num: u32,
    props: *mut DtvProperty,
}

nix::ioctl_read!(fe_get_property, b'o', 83, DtvProperties);

/// Query the delivery systems a frontend supports.
///
/// Standards the bridge cannot advertise are silently dropped; an
/// empty result is valid here and turns into a negotiation failure at
/// the caller.
pub fn query_delivery_systems(fd: RawFd) -> nix::Result<Vec<DeliverySystem>> {
    let mut prop = DtvProperty {
        cmd: DTV_ENUM_DELSYS,
        reserved: [0; 3],
        u: DtvPropertyData { data: 0 },
        result: 0,
    };
    let mut props = DtvProperties {
        num: 1,
        props: &mut prop,
    };
    unsafe { fe_get_property(fd, &mut props) }?;

    let buffer = unsafe { prop.u.buffer };
    let len = (buffer.len as usize).min(buffer.data.len());
    Ok(buffer.data[..len]
        .iter()
        .filter_map(|&raw| DeliverySystem::from_raw(raw as u32))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_layout() {
        // Packed per the kernel header: 4 + 12 + 56 + 4.
        assert_eq!(std::mem::size_of::<DtvProperty>(), 76);
        assert_eq!(std::mem::size_of::<DtvProperties>(), 16);
    }
}
