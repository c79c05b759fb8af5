//! Wrappers for the real DVB character devices consumed by the bridge:
//! the frontend (capability queries) and the demultiplexer (payload
//! tap and PID filtering).

pub mod demux;
pub mod frontend;

pub use demux::Demux;
