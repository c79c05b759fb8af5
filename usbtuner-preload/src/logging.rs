//! Logger setup for a library living inside a foreign host process.
//!
//! Diagnostics go to stderr; the filter comes from `USBTUNER_LOG`
//! (default `info`). Initialization is idempotent because any of the
//! hook entry points may be the first one called.

use std::sync::Once;

use env_logger::{Builder, Env, Target};

static INIT: Once = Once::new();

/// Initialize the process-wide logger once.
///
/// `try_init` tolerates a host process that already installed its own
/// `log` backend; in that case its logger wins.
pub fn init() {
    INIT.call_once(|| {
        let env = Env::new().filter_or("USBTUNER_LOG", "info");
        let _ = Builder::from_env(env).target(Target::Stderr).try_init();
    });
}
