//! The attribute protocol channel
//!
//! The attribute database itself is kept by the application behind the [`AttServer`] trait. This
//! module answers the MTU exchange and carries the writes, including prepared writes and write
//! commands, to the server. Every other request is answered with *request not supported*.

pub mod cmd;

use crate::errors::HostError;
use crate::host::Host;
use crate::l2cap::{self, cid, L2capChan};
use crate::pool::{Block, Pool};
use cmd::{op, AttErrorCode, ErrorRsp, ExecWriteReq, MtuCmd, PrepWrite, WriteReq, MIN_MTU};

/// The attribute server
///
/// This is called from the host task without the host lock held.
pub trait AttServer: Send + Sync {
    /// Write the value of an attribute
    fn write(&self, conn_handle: u16, attr_handle: u16, value: &[u8]) -> Result<(), AttErrorCode>;
}

/// An `AttServer` without any attributes
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAttributes;

impl AttServer for NoAttributes {
    fn write(&self, _: u16, _: u16, _: &[u8]) -> Result<(), AttErrorCode> {
        Err(AttErrorCode::InvalidHandle)
    }
}

#[derive(Debug)]
struct PrepEntry {
    handle: u16,
    offset: u16,
    value: Vec<u8>,
    block: Block,
}

/// The queue of prepared writes of a connection
#[derive(Debug, Default)]
pub struct PrepWriteQueue {
    entries: Vec<PrepEntry>,
}

impl PrepWriteQueue {
    fn push(&mut self, pool: &mut Pool, handle: u16, offset: u16, value: &[u8]) -> Result<(), AttErrorCode> {
        let block = pool.alloc().ok_or(AttErrorCode::PrepareQueueFull)?;

        self.entries.push(PrepEntry {
            handle,
            offset,
            value: value.to_vec(),
            block,
        });

        Ok(())
    }

    /// Remove every entry
    ///
    /// The entries are returned ordered by attribute handle and offset.
    fn take(&mut self, pool: &mut Pool) -> Vec<(u16, u16, Vec<u8>)> {
        let mut entries = core::mem::take(&mut self.entries);

        entries.sort_by_key(|entry| (entry.handle, entry.offset));

        entries
            .into_iter()
            .map(|entry| {
                pool.free(entry.block);

                (entry.handle, entry.offset, entry.value)
            })
            .collect()
    }

    /// Return every entry to the pool
    pub fn clear(&mut self, pool: &mut Pool) {
        self.take(pool);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Combine the prepared writes of each attribute
///
/// The parts of an attribute must start at offset zero and follow each other without a gap.
fn combine(entries: Vec<(u16, u16, Vec<u8>)>) -> Result<Vec<(u16, Vec<u8>)>, (u16, AttErrorCode)> {
    let mut values: Vec<(u16, Vec<u8>)> = Vec::new();

    for (handle, offset, part) in entries {
        match values.last_mut() {
            Some((last, value)) if *last == handle => {
                if usize::from(offset) != value.len() {
                    return Err((handle, AttErrorCode::InvalidOffset));
                }

                value.extend_from_slice(&part);
            }
            _ => {
                if offset != 0 {
                    return Err((handle, AttErrorCode::InvalidOffset));
                }

                values.push((handle, part));
            }
        }
    }

    Ok(values)
}

pub(crate) fn create_chan(my_mtu: u16, block: Block) -> L2capChan {
    L2capChan::new(cid::ATT, core::cmp::max(my_mtu, MIN_MTU), MIN_MTU, rx, block)
}

/// Check if the opcode is one that is never answered by a server
fn is_unanswered(opcode: u8) -> bool {
    const NOTIFY: u8 = 0x1B;
    const INDICATE: u8 = 0x1D;
    const CONFIRM: u8 = 0x1E;

    let is_response = opcode & 1 == 1 && opcode <= 0x21;

    opcode & op::COMMAND_FLAG != 0 || is_response || matches!(opcode, NOTIFY | INDICATE | CONFIRM)
}

type AttResult = Result<Vec<u8>, (u16, AttErrorCode)>;

fn rx(host: &Host, conn_handle: u16, pdu: Vec<u8>) -> Result<(), HostError> {
    let opcode = pdu.first().copied().ok_or(HostError::BadData)?;

    log::trace!("(ATT) rx conn {}: {:x?}", conn_handle, pdu);

    let result = match opcode {
        op::MTU_REQ => mtu_req_rx(host, conn_handle, &pdu),
        op::WRITE_REQ => write_req_rx(host, conn_handle, &pdu),
        op::PREP_WRITE_REQ => prep_write_req_rx(host, conn_handle, &pdu),
        op::EXEC_WRITE_REQ => exec_write_req_rx(host, conn_handle, &pdu),
        op::WRITE_CMD => {
            write_cmd_rx(host, conn_handle, &pdu);

            return Ok(());
        }
        _ if is_unanswered(opcode) => {
            log::debug!("(ATT) ignoring opcode 0x{:02x}", opcode);

            return Ok(());
        }
        _ => Err((0, AttErrorCode::RequestNotSupported)),
    };

    let rsp = match result {
        Ok(rsp) => rsp,
        Err((handle, error_code)) => {
            log::debug!("(ATT) request 0x{:02x} failed, {}", opcode, error_code);

            let mut rsp = vec![0u8; ErrorRsp::SIZE];

            ErrorRsp {
                req_op: opcode,
                handle,
                error_code,
            }
            .write(&mut rsp);

            rsp
        }
    };

    let state = host.lock();

    let conn = state.conns.find(conn_handle).ok_or(HostError::NotConnected)?;

    l2cap::tx(host.config(), host.transport(), conn, cid::ATT, &rsp)
}

fn mtu_req_rx(host: &Host, conn_handle: u16, pdu: &[u8]) -> AttResult {
    if pdu.len() < MtuCmd::SIZE {
        return Err((0, AttErrorCode::InvalidPdu));
    }

    let peer_mtu = core::cmp::max(MtuCmd::parse(pdu).mtu, MIN_MTU);

    let my_mtu = {
        let mut state = host.lock();

        let chan = state
            .conns
            .find_mut(conn_handle)
            .and_then(|conn| conn.chan_find_mut(cid::ATT))
            .ok_or((0, AttErrorCode::UnlikelyError))?;

        chan.set_peer_mtu(peer_mtu);

        log::debug!("(ATT) MTU of connection {} is {}", conn_handle, chan.mtu());

        chan.my_mtu()
    };

    let mut rsp = vec![0u8; MtuCmd::SIZE];

    MtuCmd { mtu: my_mtu }.write(op::MTU_RSP, &mut rsp);

    Ok(rsp)
}

fn write_req_rx(host: &Host, conn_handle: u16, pdu: &[u8]) -> AttResult {
    if pdu.len() < WriteReq::SIZE {
        return Err((0, AttErrorCode::InvalidPdu));
    }

    let req = WriteReq::parse(pdu);

    host.att_server()
        .write(conn_handle, req.handle, &pdu[WriteReq::SIZE..])
        .map_err(|e| (req.handle, e))?;

    Ok(vec![op::WRITE_RSP])
}

/// A write command is never answered, not even when it fails
fn write_cmd_rx(host: &Host, conn_handle: u16, pdu: &[u8]) {
    if pdu.len() < WriteReq::SIZE {
        return;
    }

    let cmd = WriteReq::parse(pdu);

    if let Err(e) = host.att_server().write(conn_handle, cmd.handle, &pdu[WriteReq::SIZE..]) {
        log::debug!("(ATT) write command to handle {} failed, {}", cmd.handle, e);
    }
}

fn prep_write_req_rx(host: &Host, conn_handle: u16, pdu: &[u8]) -> AttResult {
    if pdu.len() < PrepWrite::SIZE {
        return Err((0, AttErrorCode::InvalidPdu));
    }

    let req = PrepWrite::parse(pdu);

    let value = &pdu[PrepWrite::SIZE..];

    if req.handle == 0 {
        return Err((0, AttErrorCode::InvalidHandle));
    }

    {
        let mut state = host.lock();

        let (conn, pool) = state
            .conns
            .find_with_prep_pool(conn_handle)
            .ok_or((req.handle, AttErrorCode::UnlikelyError))?;

        conn.prep_queue
            .push(pool, req.handle, req.offset, value)
            .map_err(|e| (req.handle, e))?;
    }

    let mut rsp = vec![0u8; PrepWrite::SIZE + value.len()];

    req.write(op::PREP_WRITE_RSP, &mut rsp);

    rsp[PrepWrite::SIZE..].copy_from_slice(value);

    Ok(rsp)
}

fn exec_write_req_rx(host: &Host, conn_handle: u16, pdu: &[u8]) -> AttResult {
    if pdu.len() < ExecWriteReq::SIZE {
        return Err((0, AttErrorCode::InvalidPdu));
    }

    let req = ExecWriteReq::parse(pdu);

    let entries = {
        let mut state = host.lock();

        let (conn, pool) = state
            .conns
            .find_with_prep_pool(conn_handle)
            .ok_or((0, AttErrorCode::UnlikelyError))?;

        conn.prep_queue.take(pool)
    };

    match req.flags {
        ExecWriteReq::CANCEL => (),
        ExecWriteReq::WRITE => {
            for (handle, value) in combine(entries)? {
                host.att_server()
                    .write(conn_handle, handle, &value)
                    .map_err(|e| (handle, e))?;
            }
        }
        _ => return Err((0, AttErrorCode::InvalidPdu)),
    }

    let mut rsp = [0u8; 1];

    cmd::exec_write_rsp_write(&mut rsp);

    Ok(rsp.to_vec())
}
