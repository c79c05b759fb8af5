//! The per-slot bridge: a data-plane pump thread and a control-plane
//! event thread, coordinated by the lifecycle module.
//!
//! Both loops are written against small device seams so the relay and
//! diffing logic can be exercised without real hardware; the vtuner
//! and demux wrappers are the production implementations.

pub mod control;
pub mod lifecycle;
pub mod pump;

use std::sync::Arc;

use vtuner_protocol::message::VtunerMessage;

use crate::dvb::Demux;
use crate::error::BridgeError;
use crate::hooks::passthrough::FileOps;
use crate::vtuner::VtunerDevice;

/// Control-message side of the vtuner device.
pub trait ControlEndpoint {
    fn wait_message(&self, timeout_ms: u16) -> nix::Result<bool>;
    fn fetch_message(&self) -> nix::Result<VtunerMessage>;
    fn respond(&self, msg: &VtunerMessage) -> nix::Result<()>;
}

/// PID filter commands on the demultiplexer.
pub trait PidFilter {
    fn add_pid(&self, pid: u16) -> nix::Result<()>;
    fn remove_pid(&self, pid: u16) -> nix::Result<()>;
}

/// Payload source (the demultiplexer tap).
pub trait StreamSource {
    fn wait_readable(&self, timeout_ms: u16) -> nix::Result<bool>;
    fn read(&self, buf: &mut [u8]) -> nix::Result<usize>;
}

/// Payload sink (the vtuner device).
pub trait StreamSink {
    fn write(&self, buf: &[u8]) -> nix::Result<usize>;
}

/// The demux side of one streaming session, split along the two loops
/// that consume it: the pump reads payload, the control loop drives
/// the PID filter. Both halves usually share one device.
pub struct StreamEndpoints {
    pub source: Arc<dyn StreamSource + Send + Sync>,
    pub filter: Arc<dyn PidFilter + Send + Sync>,
}

/// Opens a slot's demux-side device when streaming starts. Called on
/// the pump thread, so setup failures surface through its startup
/// report.
pub trait StreamFactory: Send + Sync {
    fn open_stream(&self, adapter: u32) -> Result<StreamEndpoints, BridgeError>;
}

/// Production factory: the adapter's demux with the full-stream tap
/// already capturing.
pub struct DemuxFactory {
    fops: &'static dyn FileOps,
}

impl DemuxFactory {
    pub fn new(fops: &'static dyn FileOps) -> Self {
        DemuxFactory { fops }
    }
}

impl StreamFactory for DemuxFactory {
    fn open_stream(&self, adapter: u32) -> Result<StreamEndpoints, BridgeError> {
        let demux = Demux::open(self.fops, adapter)?;
        demux.start_full_stream()?;
        let demux = Arc::new(demux);
        let source: Arc<dyn StreamSource + Send + Sync> = demux.clone();
        let filter: Arc<dyn PidFilter + Send + Sync> = demux;
        Ok(StreamEndpoints { source, filter })
    }
}

impl ControlEndpoint for VtunerDevice {
    fn wait_message(&self, timeout_ms: u16) -> nix::Result<bool> {
        VtunerDevice::wait_message(self, timeout_ms)
    }

    fn fetch_message(&self) -> nix::Result<VtunerMessage> {
        VtunerDevice::fetch_message(self)
    }

    fn respond(&self, msg: &VtunerMessage) -> nix::Result<()> {
        VtunerDevice::respond(self, msg)
    }
}

impl StreamSink for VtunerDevice {
    fn write(&self, buf: &[u8]) -> nix::Result<usize> {
        VtunerDevice::write(self, buf)
    }
}

impl PidFilter for Demux {
    fn add_pid(&self, pid: u16) -> nix::Result<()> {
        Demux::add_pid(self, pid)
    }

    fn remove_pid(&self, pid: u16) -> nix::Result<()> {
        Demux::remove_pid(self, pid)
    }
}

impl StreamSource for Demux {
    fn wait_readable(&self, timeout_ms: u16) -> nix::Result<bool> {
        Demux::wait_readable(self, timeout_ms)
    }

    fn read(&self, buf: &mut [u8]) -> nix::Result<usize> {
        Demux::read(self, buf)
    }
}
