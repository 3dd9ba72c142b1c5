//! Security manager channel
//!
//! Pairing is not supported by this host. The channel exists so that a peer trying to pair is
//! told so instead of having its data rejected as sent to an unknown channel.

use crate::errors::HostError;
use crate::host::Host;
use crate::l2cap::{self, cid, L2capChan};
use crate::pool::Block;

/// The MTU of the security manager channel
pub const MTU: u16 = 65;

const PAIRING_FAILED: u8 = 0x05;

const PAIRING_NOT_SUPPORTED: u8 = 0x05;

pub(crate) fn create_chan(block: Block) -> L2capChan {
    L2capChan::new(cid::SM, MTU, MTU, rx, block)
}

fn rx(host: &Host, conn_handle: u16, pdu: Vec<u8>) -> Result<(), HostError> {
    let code = pdu.first().copied().ok_or(HostError::BadData)?;

    log::debug!("(SM) answering code 0x{:02x} with pairing not supported", code);

    // a pairing failed is never answered
    if code == PAIRING_FAILED {
        return Ok(());
    }

    let state = host.lock();

    let conn = state.conns.find(conn_handle).ok_or(HostError::NotConnected)?;

    l2cap::tx(
        host.config(),
        host.transport(),
        conn,
        cid::SM,
        &[PAIRING_FAILED, PAIRING_NOT_SUPPORTED],
    )
}
