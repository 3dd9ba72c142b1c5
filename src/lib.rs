//! A Bluetooth Low Energy host core
//!
//! This is the part of a BLE host sitting between the controller and the profiles. It keeps the
//! [`conn`]ections with their L2CAP channels, runs the L2CAP [`signaling`](l2cap::sig) procedures
//! and sends [`blocking`](hci::block) HCI commands on behalf of the application.
//!
//! Everything is owned by a [`Host`](host::Host). Packets from the controller are given to the
//! host and processed by its [`HostTask`](host::HostTask), packets to the controller go through
//! the [`HciTransport`](host::HciTransport) the host was created with.

pub mod att;
pub mod config;
pub mod conn;
pub mod errors;
pub mod gatts;
pub mod hci;
pub mod host;
pub mod l2cap;
pub mod pool;
pub mod privacy;
pub mod sm;
