//! Logical Link Control and Adaptation Protocol
//!
//! Every connection multiplexes a set of channels over its ACL link. Each PDU sent over the link
//! starts with a [`BasicHeader`] naming the channel and is fragmented into ACL data packets no
//! larger than what the controller accepts.
//!
//! Only the fixed channels of a LE-U link are supported, see [`cid`].

pub mod sig;

use crate::config::HostConfig;
use crate::conn::Connection;
use crate::errors::HostError;
use crate::hci::{AclPacketBoundary, HciAclData};
use crate::host::{HciTransport, Host};
use crate::pool::Block;

/// Fixed channel identifiers of a LE-U link
pub mod cid {
    pub const ATT: u16 = 0x0004;
    pub const SIG: u16 = 0x0005;
    pub const SM: u16 = 0x0006;
}

/// The receive function of a channel
///
/// This is called with the connection handle and a complete PDU, without the basic header.
pub type RxFn = fn(&Host, u16, Vec<u8>) -> Result<(), HostError>;

/// Basic frame header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BasicHeader {
    /// Length of the payload
    pub length: u16,
    pub cid: u16,
}

impl BasicHeader {
    pub const SIZE: usize = 4;

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        BasicHeader {
            length: <u16>::from_le_bytes([buf[0], buf[1]]),
            cid: <u16>::from_le_bytes([buf[2], buf[3]]),
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);

        buf[0..2].copy_from_slice(&self.length.to_le_bytes());
        buf[2..4].copy_from_slice(&self.cid.to_le_bytes());
    }
}

/// A PDU being reassembled
#[derive(Debug)]
struct RxBuf {
    expected: usize,
    data: Vec<u8>,
}

/// A L2CAP channel
pub struct L2capChan {
    cid: u16,
    my_mtu: u16,
    peer_mtu: u16,
    default_mtu: u16,
    rx_fn: RxFn,
    rx_buf: Option<RxBuf>,
    pub(crate) block: Block,
}

impl L2capChan {
    pub(crate) fn new(cid: u16, my_mtu: u16, default_mtu: u16, rx_fn: RxFn, block: Block) -> Self {
        L2capChan {
            cid,
            my_mtu,
            peer_mtu: 0,
            default_mtu,
            rx_fn,
            rx_buf: None,
            block,
        }
    }

    pub fn cid(&self) -> u16 {
        self.cid
    }

    pub fn my_mtu(&self) -> u16 {
        self.my_mtu
    }

    pub fn peer_mtu(&self) -> u16 {
        self.peer_mtu
    }

    pub(crate) fn set_peer_mtu(&mut self, mtu: u16) {
        self.peer_mtu = mtu
    }

    /// Get the MTU of the channel
    ///
    /// Until the peer's MTU is known this is the default MTU of the channel.
    pub fn mtu(&self) -> u16 {
        if self.peer_mtu != 0 && self.my_mtu != 0 {
            core::cmp::min(self.my_mtu, self.peer_mtu)
        } else {
            self.default_mtu
        }
    }

    /// Check if a PDU is partially received on this channel
    pub fn is_receiving(&self) -> bool {
        self.rx_buf.is_some()
    }
}

impl core::fmt::Debug for L2capChan {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("L2capChan")
            .field("cid", &self.cid)
            .field("my_mtu", &self.my_mtu)
            .field("peer_mtu", &self.peer_mtu)
            .field("default_mtu", &self.default_mtu)
            .field("rx_buf", &self.rx_buf)
            .finish()
    }
}

/// Send a PDU over a channel of a connection
///
/// The basic header is added to `payload` and the frame is sent as one or more ACL data packets.
pub fn tx(
    config: &HostConfig,
    transport: &dyn HciTransport,
    conn: &Connection,
    cid: u16,
    payload: &[u8],
) -> Result<(), HostError> {
    if conn.chan_find(cid).is_none() {
        return Err(HostError::NoEntry);
    }

    let length = u16::try_from(payload.len()).map_err(|_| HostError::InvalidArgument)?;

    let mut frame = vec![0u8; BasicHeader::SIZE + payload.len()];

    BasicHeader { length, cid }.write(&mut frame);

    frame[BasicHeader::SIZE..].copy_from_slice(payload);

    log::trace!("(L2CAP) tx conn {} cid 0x{:04x}: {:x?}", conn.handle(), cid, payload);

    for (index, fragment) in frame.chunks(config.acl_buf_size).enumerate() {
        let flag = if index == 0 {
            AclPacketBoundary::FirstNonFlushable
        } else {
            AclPacketBoundary::ContinuingFragment
        };

        let packet = HciAclData::new(conn.handle(), flag, fragment.to_vec()).to_packet();

        transport.send_acl_data(&packet).map_err(|e| {
            log::error!("(L2CAP) failed to send ACL data to the controller, {}", e);

            HostError::Transport(e)
        })?;
    }

    Ok(())
}

/// Outcome of adding a fragment to a PDU
enum Reassembly {
    Incomplete,
    Complete(RxFn, Vec<u8>),
    UnknownCid(u16),
    /// A signaling PDU larger than the signaling MTU, with the identifier of its command
    MtuExceeded(u8),
}

/// Add a fragment to the PDU received on `conn`
fn reassemble(conn: &mut Connection, start: bool, fragment: Vec<u8>) -> Result<Reassembly, HostError> {
    let cid = if start {
        if let Some(chan) = conn.rx_cid.take().and_then(|cid| conn.chan_find_mut(cid)) {
            if chan.rx_buf.take().is_some() {
                log::warn!("(L2CAP) discarding incomplete PDU on channel 0x{:04x}", chan.cid);
            }
        }

        if fragment.len() < BasicHeader::SIZE {
            return Err(HostError::BadData);
        }

        let header = BasicHeader::parse(&fragment);

        let chan = match conn.chan_find_mut(header.cid) {
            Some(chan) => chan,
            None => return Ok(Reassembly::UnknownCid(header.cid)),
        };

        if header.length > chan.my_mtu {
            log::warn!(
                "(L2CAP) PDU of {} bytes exceeds the MTU of channel 0x{:04x}",
                header.length,
                header.cid
            );

            if header.cid == cid::SIG {
                let identifier = fragment
                    .get(BasicHeader::SIZE..BasicHeader::SIZE + sig::cmd::SigHdr::SIZE)
                    .map_or(0, |hdr| sig::cmd::SigHdr::parse(hdr).identifier);

                return Ok(Reassembly::MtuExceeded(identifier));
            }

            return Err(HostError::BadData);
        }

        chan.rx_buf = Some(RxBuf {
            expected: header.length.into(),
            data: fragment[BasicHeader::SIZE..].to_vec(),
        });

        conn.rx_cid = Some(header.cid);

        header.cid
    } else {
        let cid = conn.rx_cid.ok_or(HostError::BadData)?;

        let rx_buf = conn
            .chan_find_mut(cid)
            .and_then(|chan| chan.rx_buf.as_mut())
            .ok_or(HostError::BadData)?;

        rx_buf.data.extend_from_slice(&fragment);

        cid
    };

    let chan = conn.chan_find_mut(cid).ok_or(HostError::BadData)?;

    let received = chan.rx_buf.as_ref().map(|buf| buf.data.len().cmp(&buf.expected));

    match received {
        Some(core::cmp::Ordering::Less) => Ok(Reassembly::Incomplete),
        Some(core::cmp::Ordering::Equal) => {
            let rx_fn = chan.rx_fn;

            let data = chan.rx_buf.take().map(|buf| buf.data).unwrap_or_default();

            conn.rx_cid = None;

            Ok(Reassembly::Complete(rx_fn, data))
        }
        Some(core::cmp::Ordering::Greater) | None => {
            chan.rx_buf = None;

            conn.rx_cid = None;

            Err(HostError::BadData)
        }
    }
}

/// Process an ACL data packet received from the controller
///
/// A complete PDU is passed to the receive function of its channel after the host lock is
/// released.
pub fn rx(host: &Host, packet: Vec<u8>) -> Result<(), HostError> {
    let acl = HciAclData::try_from_packet(packet).map_err(|e| {
        log::warn!("(L2CAP) dropping ACL data, {}", e);

        HostError::BadData
    })?;

    let conn_handle = acl.get_handle();

    let start = acl.get_packet_boundary_flag().is_start();

    let (rx_fn, pdu) = {
        let mut state = host.lock();

        let conn = state.conns.find_mut(conn_handle).ok_or(HostError::NotConnected)?;

        match reassemble(conn, start, acl.into_payload())? {
            Reassembly::Incomplete => return Ok(()),
            Reassembly::Complete(rx_fn, pdu) => (rx_fn, pdu),
            Reassembly::UnknownCid(cid) => {
                log::warn!("(L2CAP) received data for unknown channel 0x{:04x}", cid);

                sig::reject_invalid_cid_tx(host.config(), host.transport(), conn, 0, 0, cid)?;

                return Err(HostError::NoEntry);
            }
            Reassembly::MtuExceeded(identifier) => {
                sig::reject_tx(
                    host.config(),
                    host.transport(),
                    conn,
                    identifier,
                    sig::cmd::reject_reason::MTU_EXCEEDED,
                    &sig::MTU.to_le_bytes(),
                )?;

                return Err(HostError::BadData);
            }
        }
    };

    rx_fn(host, conn_handle, pdu)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic_header() {
        let mut buf = [0u8; BasicHeader::SIZE];

        BasicHeader { length: 0x102, cid: cid::SIG }.write(&mut buf);

        assert_eq!([0x02, 0x01, 0x05, 0x00], buf);

        assert_eq!(BasicHeader { length: 0x102, cid: cid::SIG }, BasicHeader::parse(&buf));
    }

    fn no_rx(_: &Host, _: u16, _: Vec<u8>) -> Result<(), HostError> {
        Ok(())
    }

    #[test]
    fn mtu() {
        let mut pool = crate::pool::Pool::new("test", 1);

        let mut chan = L2capChan::new(cid::ATT, 240, 23, no_rx, pool.alloc().unwrap());

        assert_eq!(23, chan.mtu());

        chan.set_peer_mtu(100);

        assert_eq!(100, chan.mtu());

        chan.set_peer_mtu(500);

        assert_eq!(240, chan.mtu());
    }
}
