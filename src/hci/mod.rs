//! Host Controller Interface packets
//!
//! The host only sends a handful of commands on its own, these are the ones implemented here. Any
//! other command can be sent by the application as a raw packet with the [blocking transport].
//!
//! [blocking transport]: block

pub mod block;
pub mod events;

use crate::errors::Error;
use core::fmt;

/// The maximum value of a connection handle
pub const MAX_CONNECTION_HANDLE: u16 = 0x0EFF;

/// HCI commands sent by the host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HciCommand {
    Disconnect,
    LeConnectionUpdate,
}

impl HciCommand {
    const LINK_CONTROL: u16 = 0x1;
    const LE_CONTROLLER: u16 = 0x8;

    fn ogf_ocf(&self) -> (u16, u16) {
        match self {
            HciCommand::Disconnect => (Self::LINK_CONTROL, 0x0006),
            HciCommand::LeConnectionUpdate => (Self::LE_CONTROLLER, 0x0013),
        }
    }

    /// Get the opcode
    ///
    /// The opcode is the OGF in the upper 6 bits and the OCF in the lower 10 bits.
    pub fn into_opcode(self) -> u16 {
        let (ogf, ocf) = self.ogf_ocf();

        ogf << 10 | ocf
    }
}

/// Parameters of a HCI command
pub trait CommandParameter<const PARAMETER_SIZE: usize> {
    const COMMAND: HciCommand;

    /// Convert Self into the parameter form
    fn get_parameter(&self) -> [u8; PARAMETER_SIZE];

    /// Get the command packet to be sent to the controller
    ///
    /// The format of the command packet is the opcode, the length of the parameter, and then the
    /// parameter.
    fn as_command_packet(&self) -> Vec<u8> {
        let parameter = self.get_parameter();

        let mut packet = Vec::with_capacity(3 + PARAMETER_SIZE);

        packet.extend_from_slice(&Self::COMMAND.into_opcode().to_le_bytes());

        packet.push(PARAMETER_SIZE as u8);

        packet.extend_from_slice(&parameter);

        packet
    }
}

/// Get the opcode of a command packet
pub fn command_opcode(packet: &[u8]) -> Option<u16> {
    Some(<u16>::from_le_bytes([*packet.get(0)?, *packet.get(1)?]))
}

/// Disconnect command parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Disconnect {
    pub connection_handle: u16,
    pub reason: Error,
}

impl CommandParameter<3> for Disconnect {
    const COMMAND: HciCommand = HciCommand::Disconnect;

    fn get_parameter(&self) -> [u8; 3] {
        let [h0, h1] = self.connection_handle.to_le_bytes();

        [h0, h1, self.reason.get_code()]
    }
}

/// LE Connection Update command parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeConnectionUpdate {
    pub connection_handle: u16,
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
    pub min_ce_len: u16,
    pub max_ce_len: u16,
}

impl CommandParameter<14> for LeConnectionUpdate {
    const COMMAND: HciCommand = HciCommand::LeConnectionUpdate;

    fn get_parameter(&self) -> [u8; 14] {
        let mut parameter = [0u8; 14];

        let fields = [
            self.connection_handle,
            self.interval_min,
            self.interval_max,
            self.latency,
            self.supervision_timeout,
            self.min_ce_len,
            self.max_ce_len,
        ];

        for (chunk, field) in parameter.chunks_exact_mut(2).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }

        parameter
    }
}

/// The packet boundary flag
///
/// On a LE-U logical link only `FirstNonFlushable` and `ContinuingFragment` are sent by the host,
/// but a controller may mark a complete or automatically flushable first fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AclPacketBoundary {
    FirstNonFlushable,
    ContinuingFragment,
    FirstAutoFlushable,
    CompleteL2capPdu,
}

impl AclPacketBoundary {
    fn get_shifted_val(&self) -> u16 {
        (match self {
            AclPacketBoundary::FirstNonFlushable => 0x0,
            AclPacketBoundary::ContinuingFragment => 0x1,
            AclPacketBoundary::FirstAutoFlushable => 0x2,
            AclPacketBoundary::CompleteL2capPdu => 0x3,
        }) << 12
    }

    fn from_shifted_val(val: u16) -> Self {
        match (val >> 12) & 0x3 {
            0x0 => AclPacketBoundary::FirstNonFlushable,
            0x1 => AclPacketBoundary::ContinuingFragment,
            0x2 => AclPacketBoundary::FirstAutoFlushable,
            _ => AclPacketBoundary::CompleteL2capPdu,
        }
    }

    /// Check if this is the first fragment of a L2CAP PDU
    pub fn is_start(&self) -> bool {
        !matches!(self, AclPacketBoundary::ContinuingFragment)
    }
}

/// Error from a HCI ACL packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HciAclPacketError {
    PacketTooSmall,
    InvalidBroadcastFlag,
    InvalidConnectionHandle,
    InvalidDataTotalLength,
}

impl fmt::Display for HciAclPacketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HciAclPacketError::PacketTooSmall => f.write_str("packet is too small to be a valid HCI ACL data packet"),
            HciAclPacketError::InvalidBroadcastFlag => f.write_str("broadcast flag is not valid for a LE-U link"),
            HciAclPacketError::InvalidConnectionHandle => f.write_str("connection handle larger than 0x0EFF"),
            HciAclPacketError::InvalidDataTotalLength => {
                f.write_str("the data total length field does not match the received data")
            }
        }
    }
}

impl std::error::Error for HciAclPacketError {}

/// A HCI ACL data packet of a LE-U logical link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HciAclData {
    connection_handle: u16,
    packet_boundary_flag: AclPacketBoundary,
    payload: Vec<u8>,
}

impl HciAclData {
    pub const HEADER_SIZE: usize = 4;

    pub fn new(connection_handle: u16, packet_boundary_flag: AclPacketBoundary, payload: Vec<u8>) -> Self {
        debug_assert!(connection_handle <= MAX_CONNECTION_HANDLE);

        HciAclData {
            connection_handle,
            packet_boundary_flag,
            payload,
        }
    }

    pub fn get_handle(&self) -> u16 {
        self.connection_handle
    }

    pub fn get_packet_boundary_flag(&self) -> AclPacketBoundary {
        self.packet_boundary_flag
    }

    pub fn get_payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Attempt to create a `HciAclData` from a complete HCI ACL data packet
    pub fn try_from_packet(mut packet: Vec<u8>) -> Result<Self, HciAclPacketError> {
        let first_2_bytes = <u16>::from_le_bytes([
            packet.get(0).copied().ok_or(HciAclPacketError::PacketTooSmall)?,
            packet.get(1).copied().ok_or(HciAclPacketError::PacketTooSmall)?,
        ]);

        let connection_handle = first_2_bytes & 0xFFF;

        if connection_handle > MAX_CONNECTION_HANDLE {
            return Err(HciAclPacketError::InvalidConnectionHandle);
        }

        // LE-U links are never broadcast
        if first_2_bytes >> 14 != 0 {
            return Err(HciAclPacketError::InvalidBroadcastFlag);
        }

        let packet_boundary_flag = AclPacketBoundary::from_shifted_val(first_2_bytes);

        let data_length = <u16>::from_le_bytes([
            packet.get(2).copied().ok_or(HciAclPacketError::PacketTooSmall)?,
            packet.get(3).copied().ok_or(HciAclPacketError::PacketTooSmall)?,
        ]) as usize;

        if packet.len() - Self::HEADER_SIZE != data_length {
            return Err(HciAclPacketError::InvalidDataTotalLength);
        }

        packet.drain(..Self::HEADER_SIZE);

        Ok(HciAclData {
            connection_handle,
            packet_boundary_flag,
            payload: packet,
        })
    }

    /// Convert into a raw packet
    pub fn to_packet(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.payload.len() + Self::HEADER_SIZE);

        let first_2_bytes = self.connection_handle | self.packet_boundary_flag.get_shifted_val();

        v.extend_from_slice(&first_2_bytes.to_le_bytes());

        v.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());

        v.extend_from_slice(&self.payload);

        v
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opcodes() {
        assert_eq!(0x0406, HciCommand::Disconnect.into_opcode());
        assert_eq!(0x2013, HciCommand::LeConnectionUpdate.into_opcode());
    }

    #[test]
    fn disconnect_packet() {
        let disconnect = Disconnect {
            connection_handle: 0x0102,
            reason: Error::RemoteUserTerminatedConnection,
        };

        assert_eq!(
            vec![0x06, 0x04, 3, 0x02, 0x01, 0x13],
            disconnect.as_command_packet()
        );

        assert_eq!(Some(0x0406), command_opcode(&disconnect.as_command_packet()));
    }

    #[test]
    fn acl_packet() {
        let raw = vec![0x05, 0x10, 3, 0, 1, 2, 3];

        let data = HciAclData::try_from_packet(raw.clone()).unwrap();

        assert_eq!(5, data.get_handle());
        assert_eq!(AclPacketBoundary::ContinuingFragment, data.get_packet_boundary_flag());
        assert_eq!(&[1, 2, 3], data.get_payload());
        assert_eq!(raw, data.to_packet());
    }

    #[test]
    fn invalid_acl_packets() {
        assert_eq!(
            Err(HciAclPacketError::PacketTooSmall),
            HciAclData::try_from_packet(vec![0x05, 0x00, 1])
        );

        assert_eq!(
            Err(HciAclPacketError::InvalidDataTotalLength),
            HciAclData::try_from_packet(vec![0x05, 0x00, 3, 0, 1])
        );

        assert_eq!(
            Err(HciAclPacketError::InvalidBroadcastFlag),
            HciAclData::try_from_packet(vec![0x05, 0x40, 0, 0])
        );

        assert_eq!(
            Err(HciAclPacketError::InvalidConnectionHandle),
            HciAclData::try_from_packet(vec![0xFF, 0x0F, 0, 0])
        );
    }
}
