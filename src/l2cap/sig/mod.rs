//! The L2CAP signaling channel
//!
//! The only procedure this host initiates over the signaling channel is the connection parameter
//! update. A slave requests new parameters with [`update`] and the result is delivered to the
//! callback once the master responds. If the master does not respond within the unresponsive
//! timeout the connection is terminated by the [`heartbeat`].
//!
//! Every request received that is not a connection parameter update is answered with a command
//! reject.

pub mod cmd;

use crate::config::HostConfig;
use crate::conn::Connection;
use crate::errors::{Error, HostError};
use crate::hci::events::Role;
use crate::hci::{CommandParameter, LeConnectionUpdate};
use crate::host::{HciTransport, Host, HostState};
use crate::l2cap::{self, cid, L2capChan};
use crate::pool::{Block, Pool};
use cmd::{reject_reason, update_result, Reject, SigHdr, SigOp, UpdateReq, UpdateRsp};
use core::fmt;
use core::num::NonZeroU8;
use core::time::Duration;
use tokio::time::Instant;

/// The MTU of the signaling channel of a LE-U link
pub const MTU: u16 = 23;

/// Parameters requested in a connection parameter update
pub type UpdateParams = UpdateReq;

/// Failure of a connection parameter update procedure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateError {
    /// The master rejected the parameters
    Rejected,
    /// The response from the master was malformed
    BadData,
    /// The connection was closed before the master responded
    ConnectionBroken(Error),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpdateError::Rejected => f.write_str("connection parameters rejected"),
            UpdateError::BadData => f.write_str("malformed connection parameter update response"),
            UpdateError::ConnectionBroken(reason) => write!(f, "connection broken, {}", reason),
        }
    }
}

impl std::error::Error for UpdateError {}

/// Callback of a connection parameter update
///
/// This is called with the connection handle and the result of the procedure.
pub type UpdateCallback = Box<dyn FnOnce(u16, Result<(), UpdateError>) + Send>;

/// The kind of a signaling procedure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigProcKind {
    Update,
}

enum SigProcOp {
    Update { cb: UpdateCallback },
}

impl SigProcOp {
    fn kind(&self) -> SigProcKind {
        match self {
            SigProcOp::Update { .. } => SigProcKind::Update,
        }
    }
}

/// A procedure waiting for a response
struct SigProc {
    conn_handle: u16,
    id: NonZeroU8,
    expires: Instant,
    op: SigProcOp,
    block: Block,
}

/// State of the signaling procedures
///
/// A procedure is either tracked within this state or owned by the code path that extracted it,
/// it is only ever modified by the owner.
pub struct SigState {
    procs: Vec<SigProc>,
    pool: Pool,
    cur_id: u8,
}

impl SigState {
    pub fn new(config: &HostConfig) -> Self {
        SigState {
            procs: Vec::with_capacity(config.max_l2cap_sig_procs),
            pool: Pool::new("signaling procedure", config.max_l2cap_sig_procs),
            cur_id: 0,
        }
    }

    /// Get the next identifier
    ///
    /// Identifiers are shared by every kind of procedure and zero is skipped.
    fn next_id(&mut self) -> NonZeroU8 {
        let id = NonZeroU8::new(self.cur_id.wrapping_add(1)).unwrap_or(NonZeroU8::MIN);

        self.cur_id = id.get();

        id
    }

    fn insert(&mut self, proc: SigProc) {
        self.procs.push(proc)
    }

    fn extract(&mut self, conn_handle: u16, kind: SigProcKind, id: u8) -> Option<SigProc> {
        let index = self
            .procs
            .iter()
            .position(|p| p.conn_handle == conn_handle && p.op.kind() == kind && p.id.get() == id)?;

        Some(self.procs.remove(index))
    }

    fn extract_if<F>(&mut self, mut f: F) -> Vec<SigProc>
    where
        F: FnMut(&SigProc) -> bool,
    {
        let mut extracted = Vec::new();

        let mut index = 0;

        while index < self.procs.len() {
            if f(&self.procs[index]) {
                extracted.push(self.procs.remove(index));
            } else {
                index += 1;
            }
        }

        extracted
    }

    fn extract_expired(&mut self, now: Instant) -> Vec<SigProc> {
        self.extract_if(|p| p.expires <= now)
    }

    /// Return the block of an extracted procedure to the pool
    fn free(&mut self, proc: SigProc) -> SigProcOp {
        self.pool.free(proc.block);

        proc.op
    }

    /// Get the number of tracked procedures
    pub fn num_tracked(&self) -> usize {
        self.procs.len()
    }

    /// Get the number of procedures that can still be allocated
    pub fn num_free(&self) -> usize {
        self.pool.num_free()
    }

    /// Iterate over the connection handle, kind, and identifier of every tracked procedure
    pub fn tracked(&self) -> impl Iterator<Item = (u16, SigProcKind, NonZeroU8)> + '_ {
        self.procs.iter().map(|p| (p.conn_handle, p.op.kind(), p.id))
    }
}

impl HostState {
    /// Extract every procedure of a connection
    ///
    /// This is used when the connection is gone. The callbacks of the procedures are returned so
    /// they can be called once the host lock is released.
    pub fn sig_conn_broken(&mut self, conn_handle: u16) -> Vec<UpdateCallback> {
        let procs = self.sig.extract_if(|p| p.conn_handle == conn_handle);

        procs
            .into_iter()
            .map(|proc| match self.sig.free(proc) {
                SigProcOp::Update { cb } => cb,
            })
            .collect()
    }
}

pub(crate) fn create_chan(block: Block) -> L2capChan {
    L2capChan::new(cid::SIG, MTU, MTU, rx, block)
}

/// Send a command reject
pub fn reject_tx(
    config: &HostConfig,
    transport: &dyn HciTransport,
    conn: &Connection,
    identifier: u8,
    reason: u16,
    data: &[u8],
) -> Result<(), HostError> {
    let reject = Reject {
        reason,
        data: data.to_vec(),
    };

    let mut pdu = cmd::init_cmd(SigOp::Reject, identifier, reject.size());

    reject.write(&mut pdu[SigHdr::SIZE..]);

    l2cap::tx(config, transport, conn, cid::SIG, &pdu)
}

/// Send a command reject for an invalid channel identifier
pub fn reject_invalid_cid_tx(
    config: &HostConfig,
    transport: &dyn HciTransport,
    conn: &Connection,
    identifier: u8,
    local_cid: u16,
    remote_cid: u16,
) -> Result<(), HostError> {
    let reject = Reject::invalid_cid(local_cid, remote_cid);

    reject_tx(config, transport, conn, identifier, reject.reason, &reject.data)
}

/// Send a command reject with reason "command not understood"
fn reject_not_understood_tx(host: &Host, conn_handle: u16, identifier: u8) -> Result<(), HostError> {
    let state = host.lock();

    let conn = state.conns.find(conn_handle).ok_or(HostError::NotConnected)?;

    reject_tx(
        host.config(),
        host.transport(),
        conn,
        identifier,
        reject_reason::NOT_UNDERSTOOD,
        &[],
    )
}

/// Request new connection parameters
///
/// This can only be called by the slave of the connection. The request is sent to the master and
/// this returns without waiting for the response, `cb` is called once the master responds.
///
/// # Error
/// * `InvalidArgument` if this device is the master of the connection
/// * `NotConnected` if there is no connection with `conn_handle`
/// * `NoMemory` if the procedure pool is exhausted
/// * the error of sending the request
///
/// `cb` is not called when an error is returned.
pub fn update<F>(host: &Host, conn_handle: u16, params: &UpdateParams, cb: F) -> Result<(), HostError>
where
    F: FnOnce(u16, Result<(), UpdateError>) + Send + 'static,
{
    let mut guard = host.lock();

    let state = &mut *guard;

    let conn = state.conns.find(conn_handle).ok_or(HostError::NotConnected)?;

    if conn.role() == Role::Master {
        return Err(HostError::InvalidArgument);
    }

    let block = state.sig.pool.alloc().ok_or_else(|| {
        log::debug!("(SIG) no free procedure for a connection parameter update");

        HostError::NoMemory
    })?;

    let id = state.sig.next_id();

    let mut pdu = cmd::init_cmd(SigOp::UpdateReq, id.get(), UpdateReq::SIZE);

    params.write(&mut pdu[SigHdr::SIZE..]);

    match l2cap::tx(host.config(), host.transport(), conn, cid::SIG, &pdu) {
        Ok(()) => {
            log::debug!("(SIG) update procedure {} started on connection {}", id, conn_handle);

            state.sig.insert(SigProc {
                conn_handle,
                id,
                expires: Instant::now() + host.config().sig_unresponsive_timeout(),
                op: SigProcOp::Update { cb: Box::new(cb) },
                block,
            });

            Ok(())
        }
        Err(e) => {
            state.sig.pool.free(block);

            Err(e)
        }
    }
}

type SigRxFn = fn(&Host, u16, &SigHdr, &[u8]) -> Result<(), HostError>;

fn dispatch_get(op: u8) -> Option<SigRxFn> {
    match SigOp::try_from_code(op).ok()? {
        SigOp::UpdateReq => Some(update_req_rx),
        SigOp::UpdateRsp => Some(update_rsp_rx),
        SigOp::Reject
        | SigOp::ConnectRsp
        | SigOp::ConfigRsp
        | SigOp::DisconnRsp
        | SigOp::EchoRsp
        | SigOp::InfoRsp
        | SigOp::CreateChanRsp
        | SigOp::MoveChanRsp
        | SigOp::MoveChanConfRsp
        | SigOp::CreditConnectRsp => Some(noop_rx),
        _ => None,
    }
}

/// The receive function of the signaling channel
fn rx(host: &Host, conn_handle: u16, pdu: Vec<u8>) -> Result<(), HostError> {
    if pdu.len() < SigHdr::SIZE {
        log::warn!("(SIG) PDU too short for the signaling header");

        return Err(HostError::BadData);
    }

    let hdr = SigHdr::parse(&pdu);

    let data = &pdu[SigHdr::SIZE..];

    log::trace!("(SIG) rx conn {}: {:?} {:x?}", conn_handle, hdr, data);

    if usize::from(hdr.length) != data.len() {
        log::warn!(
            "(SIG) header length {} does not match the {} bytes received",
            hdr.length,
            data.len()
        );

        reject_not_understood_tx(host, conn_handle, hdr.identifier)?;

        return Err(HostError::BadData);
    }

    match dispatch_get(hdr.op) {
        Some(handler) => handler(host, conn_handle, &hdr, data),
        None => {
            log::warn!("(SIG) unsupported opcode 0x{:02x}", hdr.op);

            reject_not_understood_tx(host, conn_handle, hdr.identifier)?;

            Err(HostError::NotSupported)
        }
    }
}

fn noop_rx(host: &Host, conn_handle: u16, hdr: &SigHdr, _: &[u8]) -> Result<(), HostError> {
    log::warn!("(SIG) not processing opcode 0x{:02x}", hdr.op);

    reject_not_understood_tx(host, conn_handle, hdr.identifier)?;

    Err(HostError::NotSupported)
}

fn update_rsp_tx(host: &Host, conn_handle: u16, identifier: u8, result: u16) -> Result<(), HostError> {
    let state = host.lock();

    let conn = state.conns.find(conn_handle).ok_or(HostError::NotConnected)?;

    let mut pdu = cmd::init_cmd(SigOp::UpdateRsp, identifier, UpdateRsp::SIZE);

    UpdateRsp { result }.write(&mut pdu[SigHdr::SIZE..]);

    l2cap::tx(host.config(), host.transport(), conn, cid::SIG, &pdu)
}

/// Have the controller change the parameters of the connection
fn conn_update_tx(host: &Host, conn_handle: u16, params: &UpdateParams) -> Result<(), HostError> {
    let command = LeConnectionUpdate {
        connection_handle: conn_handle,
        interval_min: params.itvl_min,
        interval_max: params.itvl_max,
        latency: params.slave_latency,
        supervision_timeout: params.timeout_multiplier,
        min_ce_len: host.config().conn_update_min_ce_len,
        max_ce_len: host.config().conn_update_max_ce_len,
    };

    host.transport()
        .send_command(&command.as_command_packet())
        .map_err(HostError::Transport)
}

fn update_req_rx(host: &Host, conn_handle: u16, hdr: &SigHdr, data: &[u8]) -> Result<(), HostError> {
    {
        let state = host.lock();

        let conn = state.conns.find(conn_handle).ok_or(HostError::NotConnected)?;

        if conn.role() != Role::Master {
            log::warn!("(SIG) connection parameter update request received by the slave");

            reject_tx(
                host.config(),
                host.transport(),
                conn,
                hdr.identifier,
                reject_reason::NOT_UNDERSTOOD,
                &[],
            )?;

            return Err(HostError::Rejected);
        }
    }

    if data.len() < UpdateReq::SIZE {
        reject_not_understood_tx(host, conn_handle, hdr.identifier)?;

        return Err(HostError::BadData);
    }

    let params = UpdateReq::parse(data);

    let result = match host.gap().accept_update(conn_handle, &params) {
        Ok(()) => match conn_update_tx(host, conn_handle, &params) {
            Ok(()) => update_result::ACCEPT,
            Err(e) => {
                log::error!("(SIG) failed to update the connection parameters, {}", e);

                update_result::REJECT
            }
        },
        Err(_) => update_result::REJECT,
    };

    log::debug!(
        "(SIG) answering update request {} of connection {} with result {}",
        hdr.identifier,
        conn_handle,
        result
    );

    update_rsp_tx(host, conn_handle, hdr.identifier, result)
}

fn update_rsp_rx(host: &Host, conn_handle: u16, hdr: &SigHdr, data: &[u8]) -> Result<(), HostError> {
    let op = {
        let mut state = host.lock();

        let proc = state
            .sig
            .extract(conn_handle, SigProcKind::Update, hdr.identifier)
            .ok_or(HostError::NoEntry)?;

        state.sig.free(proc)
    };

    let status = if data.len() < UpdateRsp::SIZE {
        Err(UpdateError::BadData)
    } else {
        match UpdateRsp::parse(data).result {
            update_result::ACCEPT => Ok(()),
            update_result::REJECT => Err(UpdateError::Rejected),
            _ => Err(UpdateError::BadData),
        }
    };

    log::debug!(
        "(SIG) update procedure {} of connection {} completed, {:?}",
        hdr.identifier,
        conn_handle,
        status
    );

    match op {
        SigProcOp::Update { cb } => cb(conn_handle, status),
    }

    Ok(())
}

/// Terminate the connections of procedures that timed out
///
/// This needs to be called periodically, the host task calls it at the heartbeat period. The
/// callback of a procedure that timed out is never called. There is no deadline for the next call
/// so `None` is always returned.
pub fn heartbeat(host: &Host) -> Option<Duration> {
    let expired: Vec<(u16, SigProcOp)> = {
        let mut state = host.lock();

        let now = Instant::now();

        let procs = state.sig.extract_expired(now);

        procs
            .into_iter()
            .map(|proc| (proc.conn_handle, state.sig.free(proc)))
            .collect()
    };

    for (conn_handle, _) in expired.iter() {
        log::warn!("(SIG) procedure timed out, terminating connection {}", conn_handle);

        if let Err(e) = host.terminate(*conn_handle, Error::RemoteUserTerminatedConnection) {
            log::debug!("(SIG) cannot terminate connection {}, {}", conn_handle, e);
        }
    }

    None
}
