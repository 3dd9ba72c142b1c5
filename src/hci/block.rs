//! Blocking HCI commands
//!
//! [`tx`] sends a HCI command and waits for the controller to acknowledge it with either a
//! *Command Complete* or *Command Status* event. Only one blocking command is outstanding at a
//! time, callers are served one after the other.
//!
//! The command is sent and the acknowledgement is received by the host task. `tx` must never be
//! called from the host task, it would wait for an acknowledgement that the host task can no
//! longer process.

use crate::errors::{Error, TransportError};
use crate::host::{HciTransport, Host, HostEvent};
use core::fmt;
use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Error of a blocking HCI command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HciBlockError {
    /// The controller did not acknowledge the command in time
    Timeout,
    /// The host task is not running
    NotRunning,
    /// The command could not be sent
    Transport(TransportError),
    /// The controller acknowledged the command with a non-zero status
    Controller(Error),
}

impl fmt::Display for HciBlockError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HciBlockError::Timeout => f.write_str("timed out waiting for the command acknowledgement"),
            HciBlockError::NotRunning => f.write_str("the host task is not running"),
            HciBlockError::Transport(e) => write!(f, "failed to send command, {}", e),
            HciBlockError::Controller(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for HciBlockError {}

/// Lengths of the event parameter of an acknowledgement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HciBlockResult {
    /// The number of bytes copied into the event buffer
    pub evt_buf_len: usize,
    /// The number of bytes the controller returned, this can be larger than `evt_buf_len`
    pub evt_total_len: usize,
}

struct Ack {
    status: u8,
    parameter: Vec<u8>,
    total_len: usize,
}

/// The outstanding blocking command
struct Pending {
    seq: u64,
    opcode: u16,
    evt_buf_len: usize,
    sender: oneshot::Sender<Result<Ack, TransportError>>,
}

/// State of the blocking command transport
pub(crate) struct HciBlock {
    serial: tokio::sync::Mutex<()>,
    pending: Mutex<Option<Pending>>,
    next_seq: AtomicU64,
    timeout: Duration,
}

impl HciBlock {
    pub(crate) fn new(timeout: Duration) -> Self {
        HciBlock {
            serial: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            timeout,
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the pending command if `matches` is true for it
    fn take_if<F>(&self, matches: F) -> Option<Pending>
    where
        F: FnOnce(&Pending) -> bool,
    {
        let mut pending = self.pending();

        if pending.as_ref().map_or(false, matches) {
            pending.take()
        } else {
            None
        }
    }

    /// Acknowledge the outstanding command
    ///
    /// The `parameter` is the event parameter after the status. False is returned if `opcode`
    /// is not the opcode of the outstanding command.
    pub(crate) fn ack(&self, opcode: u16, status: u8, parameter: &[u8]) -> bool {
        let Some(pending) = self.take_if(|p| p.opcode == opcode) else {
            return false;
        };

        let copied = core::cmp::min(pending.evt_buf_len, parameter.len());

        let ack = Ack {
            status,
            parameter: parameter[..copied].to_vec(),
            total_len: parameter.len(),
        };

        log::trace!("(HCI) blocking command 0x{:04x} acknowledged, status 0x{:02x}", opcode, status);

        // the caller may have timed out
        pending.sender.send(Ok(ack)).is_ok()
    }

    /// Send the outstanding command to the controller
    ///
    /// Nothing is sent if the caller with sequence number `seq` is no longer waiting for the
    /// acknowledgement.
    pub(crate) fn transmit(&self, transport: &dyn HciTransport, seq: u64, packet: &[u8]) {
        if !self.pending().as_ref().map_or(false, |p| p.seq == seq) {
            log::debug!(
                "(HCI) not sending blocking command 0x{:04x}, the caller stopped waiting",
                crate::hci::command_opcode(packet).unwrap_or_default()
            );

            return;
        }

        if let Err(e) = transport.send_command(packet) {
            log::error!("(HCI) failed to send blocking command, {}", e);

            if let Some(pending) = self.take_if(|p| p.seq == seq) {
                pending.sender.send(Err(e)).ok();
            }
        }
    }

    /// Drop the outstanding command
    ///
    /// The caller is woken up and sees that the host is not running.
    pub(crate) fn cancel(&self) {
        self.pending().take();
    }
}

/// Send a command and wait for its acknowledgement
///
/// `cmd` is a complete command packet. The event parameter of the acknowledgement, without the
/// status, is copied into `evt_buf`. If the parameter is larger than `evt_buf` it is truncated.
///
/// # Panic
/// `cmd` must be at least as large as the command header and this must not be called from the
/// host task.
pub async fn tx(host: &Host, cmd: &[u8], evt_buf: &mut [u8]) -> Result<HciBlockResult, HciBlockError> {
    debug_assert!(
        !crate::host::on_host_task(),
        "blocking HCI commands cannot be sent from the host task"
    );

    assert!(cmd.len() >= 3, "command packet is too small");

    let block = host.block();

    let _serial = block.serial.lock().await;

    if !host.is_running() {
        return Err(HciBlockError::NotRunning);
    }

    let opcode = crate::hci::command_opcode(cmd).unwrap_or_default();

    let (sender, receiver) = oneshot::channel();

    let seq = block.next_seq.fetch_add(1, Ordering::Relaxed);

    *block.pending() = Some(Pending {
        seq,
        opcode,
        evt_buf_len: evt_buf.len(),
        sender,
    });

    if host.enqueue(HostEvent::BlockingCommand(seq, cmd.to_vec())).is_err() {
        block.pending().take();

        return Err(HciBlockError::NotRunning);
    }

    let outcome = tokio::time::timeout(block.timeout, receiver).await;

    block.pending().take();

    match outcome {
        Err(_) => {
            log::warn!("(HCI) blocking command 0x{:04x} timed out", opcode);

            Err(HciBlockError::Timeout)
        }
        Ok(Err(_)) => Err(HciBlockError::NotRunning),
        Ok(Ok(Err(e))) => Err(HciBlockError::Transport(e)),
        Ok(Ok(Ok(ack))) => {
            evt_buf[..ack.parameter.len()].copy_from_slice(&ack.parameter);

            Error::from(ack.status)
                .ok_or_else(HciBlockError::Controller)
                .map(|()| HciBlockResult {
                    evt_buf_len: ack.parameter.len(),
                    evt_total_len: ack.total_len,
                })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ack_only_matching_opcode() {
        let block = HciBlock::new(Duration::from_secs(1));

        let (sender, mut receiver) = oneshot::channel();

        *block.pending() = Some(Pending {
            seq: 0,
            opcode: 0x1009,
            evt_buf_len: 2,
            sender,
        });

        assert!(!block.ack(0x0c03, 0, &[]));

        assert!(block.ack(0x1009, 0, &[1, 2, 3, 4, 5, 6]));

        let ack = receiver.try_recv().unwrap().unwrap();

        assert_eq!(vec![1, 2], ack.parameter);
        assert_eq!(6, ack.total_len);

        assert!(block.pending().is_none());
    }

    #[derive(Default)]
    struct Commands(Mutex<Vec<Vec<u8>>>);

    impl HciTransport for Commands {
        fn send_command(&self, packet: &[u8]) -> Result<(), TransportError> {
            self.0.lock().unwrap().push(packet.to_vec());

            Ok(())
        }

        fn send_acl_data(&self, _: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn abandoned_command_not_sent() {
        const RESET: [u8; 3] = [0x03, 0x0c, 0];

        let block = HciBlock::new(Duration::from_secs(1));

        let transport = Commands::default();

        block.transmit(&transport, 0, &RESET);

        assert!(transport.0.lock().unwrap().is_empty());

        let (sender, _receiver) = oneshot::channel();

        *block.pending() = Some(Pending {
            seq: 1,
            opcode: 0x0c03,
            evt_buf_len: 0,
            sender,
        });

        // an earlier caller with the same opcode timed out
        block.transmit(&transport, 0, &RESET);

        assert!(transport.0.lock().unwrap().is_empty());

        block.transmit(&transport, 1, &RESET);

        assert_eq!(vec![RESET.to_vec()], *transport.0.lock().unwrap());
    }
}
