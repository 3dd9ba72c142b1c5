//! HCI events processed by the host

use crate::errors::Error;
use crate::privacy::BluetoothDeviceAddress;
use core::fmt;

/// Event codes
pub mod codes {
    pub const DISCONNECTION_COMPLETE: u8 = 0x05;
    pub const COMMAND_COMPLETE: u8 = 0x0E;
    pub const COMMAND_STATUS: u8 = 0x0F;
    pub const LE_META: u8 = 0x3E;

    pub const LE_CONNECTION_COMPLETE: u8 = 0x01;
    pub const LE_CONNECTION_UPDATE_COMPLETE: u8 = 0x03;
    pub const LE_ENHANCED_CONNECTION_COMPLETE: u8 = 0x0A;
}

/// The role of the local device in a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

/// Address type of a LE device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeAddressType {
    Public,
    Random,
    /// A public identity address resolved by the controller
    PublicIdentity,
    /// A static random identity address resolved by the controller
    RandomIdentity,
}

impl LeAddressType {
    fn try_from_raw(raw: u8) -> Result<Self, EventError> {
        match raw {
            0x00 => Ok(LeAddressType::Public),
            0x01 => Ok(LeAddressType::Random),
            0x02 => Ok(LeAddressType::PublicIdentity),
            0x03 => Ok(LeAddressType::RandomIdentity),
            _ => Err(EventError::InvalidValue("address type")),
        }
    }

    /// Get the type of the identity address
    ///
    /// Identity types resolved by the controller are reported as their plain counterpart.
    pub fn identity(&self) -> Self {
        match self {
            LeAddressType::Public | LeAddressType::PublicIdentity => LeAddressType::Public,
            LeAddressType::Random | LeAddressType::RandomIdentity => LeAddressType::Random,
        }
    }
}

/// Error when parsing an event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventError {
    /// The event is smaller than its parameter
    TooSmall,
    /// The parameter length field does not match the event
    InvalidLength,
    InvalidValue(&'static str),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventError::TooSmall => f.write_str("event is too small"),
            EventError::InvalidLength => f.write_str("invalid event parameter length"),
            EventError::InvalidValue(field) => write!(f, "invalid value for field '{}'", field),
        }
    }
}

impl std::error::Error for EventError {}

/// Data of a LE Connection Complete or LE Enhanced Connection Complete event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeConnectionCompleteData {
    pub status: Error,
    pub connection_handle: u16,
    pub role: Role,
    pub peer_address_type: LeAddressType,
    pub peer_address: BluetoothDeviceAddress,
    /// Only set by the enhanced event when the local address is a resolvable private address
    pub local_rpa: Option<BluetoothDeviceAddress>,
    /// Only set by the enhanced event when the peer address is a resolvable private address
    pub peer_rpa: Option<BluetoothDeviceAddress>,
    pub interval: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

/// Data of a LE Connection Update Complete event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeConnectionUpdateCompleteData {
    pub status: Error,
    pub connection_handle: u16,
    pub interval: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

/// An event sent from the controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HciEvent {
    DisconnectionComplete {
        status: Error,
        connection_handle: u16,
        reason: Error,
    },
    /// Command complete
    ///
    /// The `return_parameter` is everything after the opcode, for the commands this host cares
    /// about the first byte is the status.
    CommandComplete {
        opcode: u16,
        return_parameter: Vec<u8>,
    },
    CommandStatus {
        status: Error,
        opcode: u16,
    },
    LeConnectionComplete(LeConnectionCompleteData),
    LeConnectionUpdateComplete(LeConnectionUpdateCompleteData),
    /// Any other event, by its event code (and LE subevent code)
    Unsupported(u8, Option<u8>),
}

/// Cursor over the parameter of an event
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, EventError> {
        let (first, rest) = self.data.split_first().ok_or(EventError::TooSmall)?;

        self.data = rest;

        Ok(*first)
    }

    fn u16(&mut self) -> Result<u16, EventError> {
        Ok(<u16>::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn address(&mut self) -> Result<BluetoothDeviceAddress, EventError> {
        let mut address = BluetoothDeviceAddress::default();

        for byte in address.iter_mut() {
            *byte = self.u8()?;
        }

        Ok(address)
    }

    fn handle(&mut self) -> Result<u16, EventError> {
        Ok(self.u16()? & 0xFFF)
    }

    fn role(&mut self) -> Result<Role, EventError> {
        match self.u8()? {
            0 => Ok(Role::Master),
            1 => Ok(Role::Slave),
            _ => Err(EventError::InvalidValue("role")),
        }
    }

    fn rest(self) -> &'a [u8] {
        self.data
    }
}

impl HciEvent {
    /// Parse an event packet
    ///
    /// The packet is the event code, the parameter length, and then the parameter.
    pub fn try_from_packet(packet: &[u8]) -> Result<Self, EventError> {
        let (code, len, parameter) = match packet {
            [code, len, parameter @ ..] => (*code, *len as usize, parameter),
            _ => return Err(EventError::TooSmall),
        };

        if parameter.len() != len {
            return Err(EventError::InvalidLength);
        }

        let mut reader = Reader { data: parameter };

        match code {
            codes::DISCONNECTION_COMPLETE => Ok(HciEvent::DisconnectionComplete {
                status: reader.u8()?.into(),
                connection_handle: reader.handle()?,
                reason: reader.u8()?.into(),
            }),
            codes::COMMAND_COMPLETE => {
                let _num_hci_command_packets = reader.u8()?;

                let opcode = reader.u16()?;

                Ok(HciEvent::CommandComplete {
                    opcode,
                    return_parameter: reader.rest().to_vec(),
                })
            }
            codes::COMMAND_STATUS => {
                let status = reader.u8()?.into();

                let _num_hci_command_packets = reader.u8()?;

                Ok(HciEvent::CommandStatus {
                    status,
                    opcode: reader.u16()?,
                })
            }
            codes::LE_META => Self::try_from_le_meta(reader),
            _ => Ok(HciEvent::Unsupported(code, None)),
        }
    }

    fn try_from_le_meta(mut reader: Reader) -> Result<Self, EventError> {
        let sub_event = reader.u8()?;

        match sub_event {
            codes::LE_CONNECTION_COMPLETE | codes::LE_ENHANCED_CONNECTION_COMPLETE => {
                let status = reader.u8()?.into();
                let connection_handle = reader.handle()?;
                let role = reader.role()?;
                let peer_address_type = LeAddressType::try_from_raw(reader.u8()?)?;
                let peer_address = reader.address()?;

                let (local_rpa, peer_rpa) = if sub_event == codes::LE_ENHANCED_CONNECTION_COMPLETE {
                    let non_zero = |address: BluetoothDeviceAddress| Some(address).filter(|a| a != &[0; 6]);

                    (non_zero(reader.address()?), non_zero(reader.address()?))
                } else {
                    (None, None)
                };

                Ok(HciEvent::LeConnectionComplete(LeConnectionCompleteData {
                    status,
                    connection_handle,
                    role,
                    peer_address_type,
                    peer_address,
                    local_rpa,
                    peer_rpa,
                    interval: reader.u16()?,
                    latency: reader.u16()?,
                    supervision_timeout: reader.u16()?,
                }))
            }
            codes::LE_CONNECTION_UPDATE_COMPLETE => {
                Ok(HciEvent::LeConnectionUpdateComplete(LeConnectionUpdateCompleteData {
                    status: reader.u8()?.into(),
                    connection_handle: reader.handle()?,
                    interval: reader.u16()?,
                    latency: reader.u16()?,
                    supervision_timeout: reader.u16()?,
                }))
            }
            _ => Ok(HciEvent::Unsupported(codes::LE_META, Some(sub_event))),
        }
    }
}
