//! Attribute protocol packets
//!
//! The sizes of these packets include the leading opcode byte. Like the signaling packets, a
//! buffer passed to `parse` or `write` must be large enough or this panics.

use core::fmt;

/// ATT opcodes used by this host
pub mod op {
    pub const ERROR_RSP: u8 = 0x01;
    pub const MTU_REQ: u8 = 0x02;
    pub const MTU_RSP: u8 = 0x03;
    pub const WRITE_REQ: u8 = 0x12;
    pub const WRITE_RSP: u8 = 0x13;
    pub const PREP_WRITE_REQ: u8 = 0x16;
    pub const PREP_WRITE_RSP: u8 = 0x17;
    pub const EXEC_WRITE_REQ: u8 = 0x18;
    pub const EXEC_WRITE_RSP: u8 = 0x19;
    pub const WRITE_CMD: u8 = 0x52;

    /// The command flag of an opcode
    pub const COMMAND_FLAG: u8 = 0x40;
}

/// The minimum ATT MTU of a LE link
pub const MIN_MTU: u16 = 23;

/// Error codes of an error response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    /// Any code defined by a higher layer
    Other(u8),
}

impl AttErrorCode {
    pub fn into_raw(self) -> u8 {
        match self {
            AttErrorCode::InvalidHandle => 0x01,
            AttErrorCode::ReadNotPermitted => 0x02,
            AttErrorCode::WriteNotPermitted => 0x03,
            AttErrorCode::InvalidPdu => 0x04,
            AttErrorCode::InsufficientAuthentication => 0x05,
            AttErrorCode::RequestNotSupported => 0x06,
            AttErrorCode::InvalidOffset => 0x07,
            AttErrorCode::InsufficientAuthorization => 0x08,
            AttErrorCode::PrepareQueueFull => 0x09,
            AttErrorCode::AttributeNotFound => 0x0A,
            AttErrorCode::AttributeNotLong => 0x0B,
            AttErrorCode::InsufficientEncryptionKeySize => 0x0C,
            AttErrorCode::InvalidAttributeValueLength => 0x0D,
            AttErrorCode::UnlikelyError => 0x0E,
            AttErrorCode::InsufficientEncryption => 0x0F,
            AttErrorCode::UnsupportedGroupType => 0x10,
            AttErrorCode::InsufficientResources => 0x11,
            AttErrorCode::Other(raw) => raw,
        }
    }

    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => AttErrorCode::InvalidHandle,
            0x02 => AttErrorCode::ReadNotPermitted,
            0x03 => AttErrorCode::WriteNotPermitted,
            0x04 => AttErrorCode::InvalidPdu,
            0x05 => AttErrorCode::InsufficientAuthentication,
            0x06 => AttErrorCode::RequestNotSupported,
            0x07 => AttErrorCode::InvalidOffset,
            0x08 => AttErrorCode::InsufficientAuthorization,
            0x09 => AttErrorCode::PrepareQueueFull,
            0x0A => AttErrorCode::AttributeNotFound,
            0x0B => AttErrorCode::AttributeNotLong,
            0x0C => AttErrorCode::InsufficientEncryptionKeySize,
            0x0D => AttErrorCode::InvalidAttributeValueLength,
            0x0E => AttErrorCode::UnlikelyError,
            0x0F => AttErrorCode::InsufficientEncryption,
            0x10 => AttErrorCode::UnsupportedGroupType,
            0x11 => AttErrorCode::InsufficientResources,
            _ => AttErrorCode::Other(raw),
        }
    }
}

impl fmt::Display for AttErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttErrorCode::InvalidHandle => f.write_str("invalid handle"),
            AttErrorCode::ReadNotPermitted => f.write_str("read not permitted"),
            AttErrorCode::WriteNotPermitted => f.write_str("write not permitted"),
            AttErrorCode::InvalidPdu => f.write_str("invalid PDU"),
            AttErrorCode::InsufficientAuthentication => f.write_str("insufficient authentication"),
            AttErrorCode::RequestNotSupported => f.write_str("request not supported"),
            AttErrorCode::InvalidOffset => f.write_str("invalid offset"),
            AttErrorCode::InsufficientAuthorization => f.write_str("insufficient authorization"),
            AttErrorCode::PrepareQueueFull => f.write_str("prepare queue full"),
            AttErrorCode::AttributeNotFound => f.write_str("attribute not found"),
            AttErrorCode::AttributeNotLong => f.write_str("attribute not long"),
            AttErrorCode::InsufficientEncryptionKeySize => f.write_str("insufficient encryption key size"),
            AttErrorCode::InvalidAttributeValueLength => f.write_str("invalid attribute value length"),
            AttErrorCode::UnlikelyError => f.write_str("unlikely error"),
            AttErrorCode::InsufficientEncryption => f.write_str("insufficient encryption"),
            AttErrorCode::UnsupportedGroupType => f.write_str("unsupported group type"),
            AttErrorCode::InsufficientResources => f.write_str("insufficient resources"),
            AttErrorCode::Other(raw) => write!(f, "error code 0x{:X}", raw),
        }
    }
}

impl std::error::Error for AttErrorCode {}

/// Error response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorRsp {
    pub req_op: u8,
    pub handle: u16,
    pub error_code: AttErrorCode,
}

impl ErrorRsp {
    pub const SIZE: usize = 5;

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        ErrorRsp {
            req_op: buf[1],
            handle: <u16>::from_le_bytes([buf[2], buf[3]]),
            error_code: AttErrorCode::from_raw(buf[4]),
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);

        buf[0] = op::ERROR_RSP;
        buf[1] = self.req_op;
        buf[2..4].copy_from_slice(&self.handle.to_le_bytes());
        buf[4] = self.error_code.into_raw();
    }
}

/// Exchange MTU request or response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MtuCmd {
    pub mtu: u16,
}

impl MtuCmd {
    pub const SIZE: usize = 3;

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        MtuCmd {
            mtu: <u16>::from_le_bytes([buf[1], buf[2]]),
        }
    }

    /// Write the request (`op::MTU_REQ`) or response (`op::MTU_RSP`)
    pub fn write(&self, opcode: u8, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);

        buf[0] = opcode;
        buf[1..3].copy_from_slice(&self.mtu.to_le_bytes());
    }
}

/// Header of a write request
///
/// The attribute value follows the header. The write command has the same format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteReq {
    pub handle: u16,
}

impl WriteReq {
    pub const SIZE: usize = 3;

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        WriteReq {
            handle: <u16>::from_le_bytes([buf[1], buf[2]]),
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);

        buf[0] = op::WRITE_REQ;
        buf[1..3].copy_from_slice(&self.handle.to_le_bytes());
    }
}

/// Header of a prepare write request or response
///
/// The part of the attribute value follows the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrepWrite {
    pub handle: u16,
    pub offset: u16,
}

impl PrepWrite {
    pub const SIZE: usize = 5;

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        PrepWrite {
            handle: <u16>::from_le_bytes([buf[1], buf[2]]),
            offset: <u16>::from_le_bytes([buf[3], buf[4]]),
        }
    }

    /// Write the request (`op::PREP_WRITE_REQ`) or response (`op::PREP_WRITE_RSP`)
    pub fn write(&self, opcode: u8, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);

        buf[0] = opcode;
        buf[1..3].copy_from_slice(&self.handle.to_le_bytes());
        buf[3..5].copy_from_slice(&self.offset.to_le_bytes());
    }
}

/// Execute write request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecWriteReq {
    pub flags: u8,
}

impl ExecWriteReq {
    pub const SIZE: usize = 2;

    /// Cancel all prepared writes
    pub const CANCEL: u8 = 0x00;
    /// Write all prepared values
    pub const WRITE: u8 = 0x01;

    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);

        ExecWriteReq { flags: buf[1] }
    }

    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);

        buf[0] = op::EXEC_WRITE_REQ;
        buf[1] = self.flags;
    }
}

/// Write the execute write response
pub fn exec_write_rsp_write(buf: &mut [u8]) {
    assert!(!buf.is_empty());

    buf[0] = op::EXEC_WRITE_RSP;
}
