//! Data-plane pump thread.
//!
//! One pump per attached slot: it opens the adapter's demux through
//! the stream factory, spawns the control-plane thread, and then
//! relays payload from the demux into the vtuner device until the
//! running flag clears or a device call fails for good.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error};
use nix::errno::Errno;

use crate::bridge::{control, StreamFactory, StreamSink, StreamSource};
use crate::error::BridgeError;
use crate::slot::{SlotShared, BUFFER_SIZE, POLL_INTERVAL_MS};

/// Start the pump thread for a slot.
///
/// The thread reports startup through `ready` exactly once: `Ok(())`
/// after the demux tap is capturing and the control thread is up, or
/// the startup error otherwise. On any failure it clears the slot's
/// running flag before reporting, so the caller can treat the flag as
/// authoritative.
pub fn spawn(
    shared: Arc<SlotShared>,
    streams: Arc<dyn StreamFactory>,
    ready: SyncSender<Result<(), BridgeError>>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("usbtuner-pump{}", shared.adapter_index))
        .spawn(move || pump_main(shared, streams, ready))
}

fn pump_main(
    shared: Arc<SlotShared>,
    streams: Arc<dyn StreamFactory>,
    ready: SyncSender<Result<(), BridgeError>>,
) {
    let stream = match streams.open_stream(shared.adapter_index) {
        Ok(stream) => stream,
        Err(e) => {
            error!("tuner '{}' demux setup failed: {e}", shared.name);
            shared.set_running(false);
            let _ = ready.send(Err(e));
            return;
        }
    };

    let control = {
        let shared = Arc::clone(&shared);
        let filter = Arc::clone(&stream.filter);
        thread::Builder::new()
            .name(format!("usbtuner-ctl{}", shared.adapter_index))
            .spawn(move || control::run(&shared.name, &shared.running, &shared.vtuner, &*filter))
    };
    let control = match control {
        Ok(handle) => handle,
        Err(e) => {
            error!("tuner '{}' control thread start failed: {e}", shared.name);
            shared.set_running(false);
            let _ = ready.send(Err(BridgeError::ThreadStart));
            return;
        }
    };

    let _ = ready.send(Ok(()));
    debug!("tuner '{}' pump running", shared.name);

    pump_loop(&shared.name, &shared.running, &*stream.source, &shared.vtuner);

    // Stop the control thread too before the demux fd goes away.
    shared.set_running(false);
    if control.join().is_err() {
        error!("tuner '{}' control thread panicked", shared.name);
    }
    debug!("tuner '{}' pump stopped", shared.name);
}

/// Relay payload until the running flag clears or a device call fails.
fn pump_loop<S, K>(name: &str, running: &AtomicBool, source: &S, sink: &K)
where
    S: StreamSource + ?Sized,
    K: StreamSink + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];

    while running.load(Ordering::Acquire) {
        match source.wait_readable(POLL_INTERVAL_MS) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                error!("tuner '{name}' demux poll failed: {e}");
                break;
            }
        }

        let len = match source.read(&mut buf) {
            Ok(0) => continue,
            Ok(len) => len,
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(e) => {
                error!("tuner '{name}' demux read failed: {e}");
                break;
            }
        };

        if let Err(e) = write_all(sink, &buf[..len]) {
            error!("tuner '{name}' vtuner write failed: {e}");
            break;
        }
    }
}

/// Write the whole buffer, retrying interrupts and partial writes.
fn write_all<K: StreamSink + ?Sized>(sink: &K, mut buf: &[u8]) -> nix::Result<()> {
    while !buf.is_empty() {
        match sink.write(buf) {
            Ok(0) => return Err(Errno::EIO),
            Ok(n) => buf = &buf[n..],
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
