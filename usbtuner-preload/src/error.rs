//! Bridge-level error types.

use thiserror::Error;

use vtuner_protocol::capability::CapabilityError;

/// Errors surfaced by slot binding, negotiation and the bridge
/// lifecycle. Failures inside a running slot never cross a thread
/// boundary as errors; they clear the slot's running flag and are
/// logged where they happen.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Every vtuner slot was busy or unopenable.
    #[error("no free vtuner slot")]
    NoFreeSlot,

    /// A bridge thread could not be spawned or never reported ready.
    #[error("bridge thread failed to start")]
    ThreadStart,

    /// An ioctl or read/write on a device failed.
    #[error("device I/O failed: {0}")]
    Device(#[from] nix::Error),

    /// Capability negotiation yielded nothing the vtuner facility can
    /// advertise.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}
