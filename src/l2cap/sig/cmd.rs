//! Signaling channel packets
//!
//! Every signaling packet starts with the four byte [`SigHdr`] followed by the data of the
//! command. The `parse` and `write` methods of the types within this module operate on buffers
//! that were already validated to be large enough, a buffer that is too small is a bug of the
//! caller and causes a panic.

use core::fmt::{self, Display, Formatter};

/// Opcodes of the signaling commands
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SigOp {
    Reject,
    ConnectReq,
    ConnectRsp,
    ConfigReq,
    ConfigRsp,
    DisconnReq,
    DisconnRsp,
    EchoReq,
    EchoRsp,
    InfoReq,
    InfoRsp,
    CreateChanReq,
    CreateChanRsp,
    MoveChanReq,
    MoveChanRsp,
    MoveChanConfReq,
    MoveChanConfRsp,
    UpdateReq,
    UpdateRsp,
    CreditConnectReq,
    CreditConnectRsp,
    FlowControlCredit,
}

impl SigOp {
    /// Get the raw opcode
    pub fn into_code(self) -> u8 {
        match self {
            SigOp::Reject => 0x01,
            SigOp::ConnectReq => 0x02,
            SigOp::ConnectRsp => 0x03,
            SigOp::ConfigReq => 0x04,
            SigOp::ConfigRsp => 0x05,
            SigOp::DisconnReq => 0x06,
            SigOp::DisconnRsp => 0x07,
            SigOp::EchoReq => 0x08,
            SigOp::EchoRsp => 0x09,
            SigOp::InfoReq => 0x0a,
            SigOp::InfoRsp => 0x0b,
            SigOp::CreateChanReq => 0x0c,
            SigOp::CreateChanRsp => 0x0d,
            SigOp::MoveChanReq => 0x0e,
            SigOp::MoveChanRsp => 0x0f,
            SigOp::MoveChanConfReq => 0x10,
            SigOp::MoveChanConfRsp => 0x11,
            SigOp::UpdateReq => 0x12,
            SigOp::UpdateRsp => 0x13,
            SigOp::CreditConnectReq => 0x14,
            SigOp::CreditConnectRsp => 0x15,
            SigOp::FlowControlCredit => 0x16,
        }
    }

    /// Create a `SigOp` from the raw opcode
    pub fn try_from_code(val: u8) -> Result<Self, InvalidSigOp> {
        match val {
            0x01 => Ok(SigOp::Reject),
            0x02 => Ok(SigOp::ConnectReq),
            0x03 => Ok(SigOp::ConnectRsp),
            0x04 => Ok(SigOp::ConfigReq),
            0x05 => Ok(SigOp::ConfigRsp),
            0x06 => Ok(SigOp::DisconnReq),
            0x07 => Ok(SigOp::DisconnRsp),
            0x08 => Ok(SigOp::EchoReq),
            0x09 => Ok(SigOp::EchoRsp),
            0x0a => Ok(SigOp::InfoReq),
            0x0b => Ok(SigOp::InfoRsp),
            0x0c => Ok(SigOp::CreateChanReq),
            0x0d => Ok(SigOp::CreateChanRsp),
            0x0e => Ok(SigOp::MoveChanReq),
            0x0f => Ok(SigOp::MoveChanRsp),
            0x10 => Ok(SigOp::MoveChanConfReq),
            0x11 => Ok(SigOp::MoveChanConfRsp),
            0x12 => Ok(SigOp::UpdateReq),
            0x13 => Ok(SigOp::UpdateRsp),
            0x14 => Ok(SigOp::CreditConnectReq),
            0x15 => Ok(SigOp::CreditConnectRsp),
            0x16 => Ok(SigOp::FlowControlCredit),
            _ => Err(InvalidSigOp(val)),
        }
    }
}

impl Display for SigOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("L2CAP ")?;

        match self {
            SigOp::Reject => f.write_str("command reject"),
            SigOp::ConnectReq => f.write_str("connection request"),
            SigOp::ConnectRsp => f.write_str("connection response"),
            SigOp::ConfigReq => f.write_str("configuration request"),
            SigOp::ConfigRsp => f.write_str("configuration response"),
            SigOp::DisconnReq => f.write_str("disconnection request"),
            SigOp::DisconnRsp => f.write_str("disconnection response"),
            SigOp::EchoReq => f.write_str("echo request"),
            SigOp::EchoRsp => f.write_str("echo response"),
            SigOp::InfoReq => f.write_str("information request"),
            SigOp::InfoRsp => f.write_str("information response"),
            SigOp::CreateChanReq => f.write_str("create channel request"),
            SigOp::CreateChanRsp => f.write_str("create channel response"),
            SigOp::MoveChanReq => f.write_str("move channel request"),
            SigOp::MoveChanRsp => f.write_str("move channel response"),
            SigOp::MoveChanConfReq => f.write_str("move channel confirmation request"),
            SigOp::MoveChanConfRsp => f.write_str("move channel confirmation response"),
            SigOp::UpdateReq => f.write_str("connection parameter update request"),
            SigOp::UpdateRsp => f.write_str("connection parameter update response"),
            SigOp::CreditConnectReq => f.write_str("LE credit based connection request"),
            SigOp::CreditConnectRsp => f.write_str("LE credit based connection response"),
            SigOp::FlowControlCredit => f.write_str("flow control credit indication"),
        }
    }
}

/// Error for an opcode that is not a signaling command
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidSigOp(pub u8);

impl Display for InvalidSigOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "opcode 0x{:x} is not a valid L2CAP signaling command", self.0)
    }
}

impl std::error::Error for InvalidSigOp {}

/// Reasons of a command reject
pub mod reject_reason {
    pub const NOT_UNDERSTOOD: u16 = 0x0000;
    pub const MTU_EXCEEDED: u16 = 0x0001;
    pub const INVALID_CID: u16 = 0x0002;
}

/// Result of a connection parameter update response
pub mod update_result {
    pub const ACCEPT: u16 = 0x0000;
    pub const REJECT: u16 = 0x0001;
}

/// Header of a signaling command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SigHdr {
    pub op: u8,
    pub identifier: u8,
    /// Length of the data after the header
    pub length: u16,
}

impl SigHdr {
    pub const SIZE: usize = 4;

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        SigHdr {
            op: buf[0],
            identifier: buf[1],
            length: <u16>::from_le_bytes([buf[2], buf[3]]),
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);

        buf[0] = self.op;
        buf[1] = self.identifier;
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
    }
}

/// Connection parameter update request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateReq {
    pub itvl_min: u16,
    pub itvl_max: u16,
    pub slave_latency: u16,
    pub timeout_multiplier: u16,
}

impl UpdateReq {
    pub const SIZE: usize = 8;

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        let field = |i: usize| <u16>::from_le_bytes([buf[i], buf[i + 1]]);

        UpdateReq {
            itvl_min: field(0),
            itvl_max: field(2),
            slave_latency: field(4),
            timeout_multiplier: field(6),
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);

        buf[0..2].copy_from_slice(&self.itvl_min.to_le_bytes());
        buf[2..4].copy_from_slice(&self.itvl_max.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slave_latency.to_le_bytes());
        buf[6..8].copy_from_slice(&self.timeout_multiplier.to_le_bytes());
    }
}

/// Connection parameter update response
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateRsp {
    pub result: u16,
}

impl UpdateRsp {
    pub const SIZE: usize = 2;

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        UpdateRsp {
            result: <u16>::from_le_bytes([buf[0], buf[1]]),
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);

        buf[0..2].copy_from_slice(&self.result.to_le_bytes());
    }
}

/// Command reject
///
/// The `data` depends on the `reason`, for an invalid CID it is the local and remote CIDs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reject {
    pub reason: u16,
    pub data: Vec<u8>,
}

impl Reject {
    /// The minimum size of a command reject
    pub const SIZE: usize = 2;

    pub fn invalid_cid(local_cid: u16, remote_cid: u16) -> Self {
        let mut data = Vec::with_capacity(4);

        data.extend_from_slice(&local_cid.to_le_bytes());
        data.extend_from_slice(&remote_cid.to_le_bytes());

        Reject {
            reason: reject_reason::INVALID_CID,
            data,
        }
    }

    /// The size of this reject on the wire
    pub fn size(&self) -> usize {
        Self::SIZE + self.data.len()
    }

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        Reject {
            reason: <u16>::from_le_bytes([buf[0], buf[1]]),
            data: buf[Self::SIZE..].to_vec(),
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= self.size());

        buf[0..2].copy_from_slice(&self.reason.to_le_bytes());
        buf[Self::SIZE..self.size()].copy_from_slice(&self.data);
    }
}

/// Create a signaling command
///
/// The returned buffer has the header written and `payload_len` zeroed bytes after it for the
/// command data.
pub fn init_cmd(op: SigOp, identifier: u8, payload_len: usize) -> Vec<u8> {
    let mut cmd = vec![0u8; SigHdr::SIZE + payload_len];

    SigHdr {
        op: op.into_code(),
        identifier,
        length: payload_len as u16,
    }
    .write(&mut cmd);

    cmd
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn op_codes() {
        for raw in 0..=u8::MAX {
            if let Ok(op) = SigOp::try_from_code(raw) {
                assert_eq!(raw, op.into_code())
            }
        }

        assert_eq!(Err(InvalidSigOp(0x99)), SigOp::try_from_code(0x99));
    }

    #[test]
    fn update_req_is_little_endian() {
        let req = UpdateReq {
            itvl_min: 6,
            itvl_max: 12,
            slave_latency: 0,
            timeout_multiplier: 200,
        };

        let mut cmd = init_cmd(SigOp::UpdateReq, 1, UpdateReq::SIZE);

        req.write(&mut cmd[SigHdr::SIZE..]);

        assert_eq!(vec![0x12, 1, 8, 0, 6, 0, 12, 0, 0, 0, 200, 0], cmd);
    }

    #[test]
    #[should_panic]
    fn parse_short_buffer() {
        UpdateReq::parse(&[0; 7]);
    }

    #[quickcheck]
    fn update_req_round_trip(itvl_min: u16, itvl_max: u16, slave_latency: u16, timeout_multiplier: u16) -> bool {
        let req = UpdateReq {
            itvl_min,
            itvl_max,
            slave_latency,
            timeout_multiplier,
        };

        let mut buf = [0u8; UpdateReq::SIZE];

        req.write(&mut buf);

        UpdateReq::parse(&buf) == req
    }

    #[quickcheck]
    fn header_and_reject_round_trip(op: u8, identifier: u8, reason: u16, data: Vec<u8>) -> bool {
        let reject = Reject { reason, data };

        let mut buf = vec![0u8; SigHdr::SIZE + reject.size()];

        let hdr = SigHdr {
            op,
            identifier,
            length: reject.size() as u16,
        };

        hdr.write(&mut buf);

        reject.write(&mut buf[SigHdr::SIZE..]);

        SigHdr::parse(&buf) == hdr && Reject::parse(&buf[SigHdr::SIZE..]) == reject
    }

    #[quickcheck]
    fn update_rsp_round_trip(result: u16) -> bool {
        let mut buf = [0xFFu8; UpdateRsp::SIZE + 1];

        UpdateRsp { result }.write(&mut buf);

        UpdateRsp::parse(&buf).result == result && buf[UpdateRsp::SIZE] == 0xFF
    }
}
