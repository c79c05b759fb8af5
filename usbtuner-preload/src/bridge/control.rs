//! Control-plane event loop.
//!
//! Waits on the vtuner device for high-priority control messages and
//! applies PID-filter updates to the real demultiplexer. This thread
//! is the only writer of the slot's active PID set, which therefore
//! lives on its stack.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, warn};
use nix::errno::Errno;

use vtuner_protocol::message::{PidSet, MSG_PIDLIST};

use crate::bridge::{ControlEndpoint, PidFilter};
use crate::slot::POLL_INTERVAL_MS;

/// Run the event loop until the running flag clears or the endpoint
/// fails with a non-interrupt error (which also clears the flag).
pub fn run<E, F>(name: &str, running: &AtomicBool, endpoint: &E, filter: &F)
where
    E: ControlEndpoint + ?Sized,
    F: PidFilter + ?Sized,
{
    let mut active = PidSet::empty();

    while running.load(Ordering::Acquire) {
        match endpoint.wait_message(POLL_INTERVAL_MS) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                error!("tuner '{name}' vtuner poll failed: {e}");
                running.store(false, Ordering::Release);
                break;
            }
        }

        let mut msg = match endpoint.fetch_message() {
            Ok(msg) => msg,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                error!("tuner '{name}' message fetch failed: {e}");
                running.store(false, Ordering::Release);
                break;
            }
        };

        match msg.kind() {
            MSG_PIDLIST => {
                // A PID list update expects no reply.
                apply_pid_update(name, &mut active, &msg.pids(), filter);
            }
            other => {
                warn!("tuner '{name}' unhandled vtuner message type {other}");
                msg.clear_for_response();
                if let Err(e) = endpoint.respond(&msg) {
                    error!("tuner '{name}' response failed: {e}");
                }
            }
        }
    }
}

/// Apply an incoming PID list to the filter.
///
/// Issues one remove per PID leaving the active set and one add per
/// PID entering it, then replaces the set wholesale; identical lists
/// are a no-op. Returns the command counts.
pub fn apply_pid_update<F: PidFilter + ?Sized>(
    name: &str,
    active: &mut PidSet,
    incoming: &PidSet,
    filter: &F,
) -> (usize, usize) {
    let (removed, added) = active.diff(incoming);

    for &pid in &removed {
        debug!("tuner '{name}' remove pid {pid:#x}");
        if let Err(e) = filter.remove_pid(pid) {
            warn!("tuner '{name}' remove pid {pid:#x} failed: {e}");
        }
    }
    for &pid in &added {
        debug!("tuner '{name}' add pid {pid:#x}");
        if let Err(e) = filter.add_pid(pid) {
            warn!("tuner '{name}' add pid {pid:#x} failed: {e}");
        }
    }

    *active = *incoming;
    if active.is_empty() {
        // The facility may clear the whole list between channel
        // switches; the tap stays running and the next list repopulates
        // the filters.
        debug!("tuner '{name}' active pid list now empty");
    }

    (removed.len(), added.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use vtuner_protocol::message::VtunerMessage;

    /// Records filter commands in order.
    #[derive(Default)]
    struct RecordingFilter {
        ops: Mutex<Vec<(char, u16)>>,
    }

    impl RecordingFilter {
        fn ops(&self) -> Vec<(char, u16)> {
            self.ops.lock().unwrap().clone()
        }
    }

    impl PidFilter for RecordingFilter {
        fn add_pid(&self, pid: u16) -> nix::Result<()> {
            self.ops.lock().unwrap().push(('+', pid));
            Ok(())
        }

        fn remove_pid(&self, pid: u16) -> nix::Result<()> {
            self.ops.lock().unwrap().push(('-', pid));
            Ok(())
        }
    }

    /// Serves a scripted message sequence, then reports an error so the
    /// loop terminates.
    struct ScriptedEndpoint {
        messages: Mutex<VecDeque<VtunerMessage>>,
        responses: Mutex<Vec<i32>>,
    }

    impl ScriptedEndpoint {
        fn new(messages: Vec<VtunerMessage>) -> Self {
            ScriptedEndpoint {
                messages: Mutex::new(messages.into()),
                responses: Mutex::new(Vec::new()),
            }
        }
    }

    impl ControlEndpoint for ScriptedEndpoint {
        fn wait_message(&self, _timeout_ms: u16) -> nix::Result<bool> {
            // Always ready; a drained script turns into a fetch error,
            // which is how the loop is made to terminate.
            Ok(true)
        }

        fn fetch_message(&self) -> nix::Result<VtunerMessage> {
            self.messages.lock().unwrap().pop_front().ok_or(Errno::EIO)
        }

        fn respond(&self, msg: &VtunerMessage) -> nix::Result<()> {
            self.responses.lock().unwrap().push(msg.kind());
            Ok(())
        }
    }

    #[test]
    fn test_update_applies_exact_set() {
        let filter = RecordingFilter::default();
        let mut active = PidSet::empty();

        let incoming = PidSet::from_slice(&[0x100, 0x101, 0x102, 0x103]);
        let (removed, added) = apply_pid_update("t", &mut active, &incoming, &filter);
        assert_eq!((removed, added), (0, 4));
        assert_eq!(active, incoming);
        assert_eq!(filter.ops().len(), 4);
        assert!(filter.ops().iter().all(|(op, _)| *op == '+'));
    }

    #[test]
    fn test_update_is_idempotent() {
        let filter = RecordingFilter::default();
        let mut active = PidSet::empty();
        let incoming = PidSet::from_slice(&[0x20, 0x21]);

        apply_pid_update("t", &mut active, &incoming, &filter);
        let before = filter.ops().len();
        let (removed, added) = apply_pid_update("t", &mut active, &incoming, &filter);
        assert_eq!((removed, added), (0, 0));
        assert_eq!(filter.ops().len(), before);
    }

    #[test]
    fn test_update_command_count_is_symmetric_difference() {
        let filter = RecordingFilter::default();
        let mut active = PidSet::from_slice(&[1, 2, 3]);

        let incoming = PidSet::from_slice(&[2, 3, 4, 5]);
        let (removed, added) = apply_pid_update("t", &mut active, &incoming, &filter);
        assert_eq!((removed, added), (1, 2));
        assert_eq!(filter.ops(), vec![('-', 1), ('+', 4), ('+', 5)]);
    }

    #[test]
    fn test_update_to_empty_removes_everything() {
        let filter = RecordingFilter::default();
        let mut active = PidSet::from_slice(&[7, 8]);

        let (removed, added) = apply_pid_update("t", &mut active, &PidSet::empty(), &filter);
        assert_eq!((removed, added), (2, 0));
        assert!(active.is_empty());
    }

    #[test]
    fn test_loop_answers_unknown_messages() {
        let unknown = VtunerMessage::with_kind(99);
        let endpoint = ScriptedEndpoint::new(vec![unknown, VtunerMessage::pid_list(&[0x10])]);
        let filter = RecordingFilter::default();
        let running = AtomicBool::new(true);

        run("t", &running, &endpoint, &filter);

        // Unknown tag got a neutral (zeroed) response; the pid list got
        // applied; the final EIO cleared the running flag.
        assert_eq!(*endpoint.responses.lock().unwrap(), vec![0]);
        assert_eq!(filter.ops(), vec![('+', 0x10)]);
        assert!(!running.load(Ordering::Acquire));
    }

    #[test]
    fn test_loop_clears_running_on_fetch_error() {
        let endpoint = ScriptedEndpoint::new(vec![]);
        let filter = RecordingFilter::default();
        let running = AtomicBool::new(true);

        run("t", &running, &endpoint, &filter);

        assert!(!running.load(Ordering::Acquire));
        assert!(filter.ops().is_empty());
    }

    #[test]
    fn test_loop_exits_when_not_running() {
        let endpoint = ScriptedEndpoint::new(vec![VtunerMessage::pid_list(&[0x10])]);
        let filter = RecordingFilter::default();
        let running = AtomicBool::new(false);

        run("t", &running, &endpoint, &filter);

        // Never even looked at the queued message.
        assert_eq!(endpoint.messages.lock().unwrap().len(), 1);
        assert!(filter.ops().is_empty());
    }
}
