//! Control protocol definitions for the vtuner virtual tuner facility.
//!
//! The vtuner kernel device presents a synthetic DVB frontend to
//! applications and relays their commands to a user-space bridge
//! through a small ioctl-driven message protocol. This crate holds the
//! wire-level message layout, the payload-identifier (PID) set model,
//! and the delivery-system capability model shared by anything that
//! speaks to a vtuner device. It is deliberately free of OS
//! dependencies so the protocol logic can be tested anywhere.

pub mod capability;
pub mod message;

pub use capability::{DeliverySystem, MAX_MODES, MODE_NAME_LEN};
pub use message::{PidSet, VtunerMessage, MAX_PIDS, MSG_PIDLIST, PID_NONE};
