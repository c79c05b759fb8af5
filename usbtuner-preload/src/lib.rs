//! usbtuner - LD_PRELOAD bridge between USB DVB tuners and vtuner devices.
//!
//! Loaded into a set-top application that only drives built-in tuners,
//! this library makes USB tuners appear as additional frontends of the
//! built-in adapter. It interposes `open`/`open64`/`close`/`stat` on
//! the DVB device paths, binds each discovered USB adapter to a free
//! vtuner slot, negotiates the tuner's delivery-system capabilities
//! with the vtuner facility, and runs a thread pair per adapter that
//! relays transport-stream payload and PID-filter commands between the
//! real hardware and the virtual device.
//!
//! Any process other than the expected application, and any path not
//! matching a bound adapter, passes through to the authentic libc
//! operations untouched.

pub mod bridge;
pub mod discovery;
pub mod dvb;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod path;
pub mod slot;
pub mod vtuner;

pub use error::BridgeError;
