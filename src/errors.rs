//! Host errors
//!
//! There are two kinds of errors within this library. The controller error codes, [`Error`], are
//! the status values a Bluetooth controller puts into its events and the reason codes carried by
//! a disconnection. [`HostError`] is the error returned by the operations of the host itself.

use core::fmt::{self, Display, Formatter};

macro_rules! controller_errors {
    ( $( ($code:literal, $name:ident, $msg:literal) ),* $(,)? ) => {
        /// A Controller Error
        ///
        /// `Error` is an enum of the controller error codes listed in volume one part F of the
        /// Bluetooth core specification that this host either produces or reacts to. Codes not
        /// listed are kept verbatim within `Unknown`.
        ///
        /// ### `NoError`
        /// The error code zero. There is no official error for zero, but it is used by the status
        /// parameter of events to signify there was no error.
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum Error {
            NoError,
            Unknown(u8),
            $( $name, )*
        }

        impl Error {
            /// Get the raw error code
            pub fn get_code(&self) -> u8 {
                match self {
                    Error::NoError => 0,
                    Error::Unknown(code) => *code,
                    $( Error::$name => $code, )*
                }
            }
        }

        impl From<u8> for Error {
            fn from(raw: u8) -> Self {
                match raw {
                    0 => Error::NoError,
                    $( $code => Error::$name, )*
                    _ => Error::Unknown(raw),
                }
            }
        }

        impl Display for Error {
            fn fmt(&self, f: &mut Formatter) -> fmt::Result {
                match self {
                    Error::NoError => f.write_str("no error"),
                    Error::Unknown(code) => write!(f, "unknown error code (0x{:X})", code),
                    $( Error::$name => write!(f, "controller error: {} (0x{:X})", $msg, $code), )*
                }
            }
        }
    };
}

controller_errors! {
    (0x01, UnknownHciCommand, "unknown HCI command"),
    (0x02, UnknownConnectionIdentifier, "unknown connection identifier"),
    (0x03, HardwareFailure, "hardware failure"),
    (0x05, AuthenticationFailure, "authentication failure"),
    (0x07, MemoryCapacityExceeded, "memory capacity exceeded"),
    (0x08, ConnectionTimeout, "connection timeout"),
    (0x09, ConnectionLimitExceeded, "connection limit exceeded"),
    (0x0b, ConnectionAlreadyExists, "connection already exists"),
    (0x0c, CommandDisallowed, "command disallowed"),
    (0x0d, ConnectionRejectedDueToLimitedResources, "connection rejected due to limited resources"),
    (0x0e, ConnectionRejectedDueToSecurityReasons, "connection rejected due to security reasons"),
    (0x11, UnsupportedFeatureOrParameterValue, "unsupported feature or parameter value"),
    (0x12, InvalidHciCommandParameters, "invalid HCI command parameters"),
    (0x13, RemoteUserTerminatedConnection, "remote user terminated connection"),
    (0x14, RemoteDeviceTerminatedConnectionDueToLowResources, "remote device terminated connection due to low resources"),
    (0x15, RemoteDeviceTerminatedConnectionDueToPowerOff, "remote device terminated connection due to power off"),
    (0x16, ConnectionTerminatedByLocalHost, "connection terminated by local host"),
    (0x1a, UnsupportedRemoteFeature, "unsupported remote feature"),
    (0x1e, InvalidLlParameters, "invalid LL parameters"),
    (0x1f, UnspecifiedError, "unspecified error"),
    (0x22, LlResponseTimeout, "LL response timeout"),
    (0x23, LlProcedureCollision, "LL procedure collision"),
    (0x28, InstantPassed, "instant passed"),
    (0x3a, ControllerBusy, "controller busy"),
    (0x3b, UnacceptableConnectionParameters, "unacceptable connection parameters"),
    (0x3d, ConnectionTerminatedDueToMicFailure, "connection terminated due to MIC failure"),
    (0x3e, ConnectionFailedToBeEstablished, "connection failed to be established"),
}

impl Error {
    /// Convert into a `Result`
    ///
    /// `NoError` becomes `Ok(())`, everything else is mapped with `err`.
    pub fn ok_or_else<F, E>(self, err: F) -> Result<(), E>
    where
        F: FnOnce(Self) -> E,
    {
        if let Error::NoError = self {
            Ok(())
        } else {
            Err(err(self))
        }
    }
}

impl std::error::Error for Error {}

/// A failure of the HCI transport
///
/// This is returned by an implementation of [`HciTransport`] when a packet could not be handed to
/// the controller.
///
/// [`HciTransport`]: crate::host::HciTransport
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The link to the controller is closed
    Closed,
    /// The controller cannot accept the packet right now
    Full,
    Other(&'static str),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TransportError::Closed => f.write_str("the link to the controller is closed"),
            TransportError::Full => f.write_str("the controller cannot accept any more packets"),
            TransportError::Other(reason) => f.write_str(reason),
        }
    }
}

impl std::error::Error for TransportError {}

/// Error returned by the host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostError {
    /// A memory pool is exhausted
    NoMemory,
    /// The operation is not valid for the inputs or the current state
    InvalidArgument,
    /// The item already exists
    AlreadyExists,
    /// There is no matching connection, channel, or procedure
    NoEntry,
    /// The connection does not exist
    NotConnected,
    /// Data received from the peer is malformed
    BadData,
    /// The operation is not supported
    NotSupported,
    /// The request was rejected
    Rejected,
    /// The HCI transport failed
    Transport(TransportError),
    /// The controller reported an error
    Controller(Error),
}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            HostError::NoMemory => f.write_str("out of memory"),
            HostError::InvalidArgument => f.write_str("invalid argument"),
            HostError::AlreadyExists => f.write_str("already exists"),
            HostError::NoEntry => f.write_str("no such entry"),
            HostError::NotConnected => f.write_str("not connected"),
            HostError::BadData => f.write_str("malformed data"),
            HostError::NotSupported => f.write_str("not supported"),
            HostError::Rejected => f.write_str("rejected"),
            HostError::Transport(e) => write!(f, "transport error, {}", e),
            HostError::Controller(e) => Display::fmt(e, f),
        }
    }
}

impl std::error::Error for HostError {}

impl From<TransportError> for HostError {
    fn from(e: TransportError) -> Self {
        HostError::Transport(e)
    }
}

impl From<Error> for HostError {
    fn from(e: Error) -> Self {
        HostError::Controller(e)
    }
}
