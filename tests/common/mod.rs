//! Host integration test framework
#![allow(dead_code)]

use ble_hs::att::cmd::AttErrorCode;
use ble_hs::att::AttServer;
use ble_hs::config::HostConfig;
use ble_hs::errors::{Error, TransportError};
use ble_hs::hci::events::codes;
use ble_hs::hci::{command_opcode, AclPacketBoundary, HciAclData};
use ble_hs::host::{GapHandler, HciTransport, Host, Rejected};
use ble_hs::l2cap::sig::UpdateParams;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A transport recording every packet sent to the controller
#[derive(Default)]
pub struct MockTransport {
    commands: Mutex<Vec<Vec<u8>>>,
    acl: Mutex<Vec<Vec<u8>>>,
    fail_commands: AtomicBool,
}

impl MockTransport {
    pub fn take_commands(&self) -> Vec<Vec<u8>> {
        core::mem::take(&mut *self.commands.lock().unwrap())
    }

    pub fn take_acl(&self) -> Vec<Vec<u8>> {
        core::mem::take(&mut *self.acl.lock().unwrap())
    }

    /// Get the commands sent with `opcode`
    pub fn commands_with(&self, opcode: u16) -> Vec<Vec<u8>> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|packet| command_opcode(packet) == Some(opcode))
            .cloned()
            .collect()
    }

    pub fn set_fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::Relaxed)
    }
}

impl HciTransport for MockTransport {
    fn send_command(&self, packet: &[u8]) -> Result<(), TransportError> {
        if self.fail_commands.load(Ordering::Relaxed) {
            return Err(TransportError::Full);
        }

        self.commands.lock().unwrap().push(packet.to_vec());

        Ok(())
    }

    fn send_acl_data(&self, packet: &[u8]) -> Result<(), TransportError> {
        self.acl.lock().unwrap().push(packet.to_vec());

        Ok(())
    }
}

/// A GAP recording the connections and answering update requests
#[derive(Default)]
pub struct MockGap {
    pub reject_updates: AtomicBool,
    pub updates: Mutex<Vec<(u16, UpdateParams)>>,
    pub connected: Mutex<Vec<u16>>,
    pub disconnected: Mutex<Vec<(u16, Error)>>,
}

impl GapHandler for MockGap {
    fn accept_update(&self, conn_handle: u16, params: &UpdateParams) -> Result<(), Rejected> {
        self.updates.lock().unwrap().push((conn_handle, *params));

        if self.reject_updates.load(Ordering::Relaxed) {
            Err(Rejected)
        } else {
            Ok(())
        }
    }

    fn connected(&self, conn_handle: u16) {
        self.connected.lock().unwrap().push(conn_handle)
    }

    fn disconnected(&self, conn_handle: u16, reason: Error) {
        self.disconnected.lock().unwrap().push((conn_handle, reason))
    }
}

/// An attribute server with writable attributes at handles 1 through `count`
pub struct MockAttServer {
    count: u16,
    pub writes: Mutex<Vec<(u16, u16, Vec<u8>)>>,
}

impl MockAttServer {
    pub fn new(count: u16) -> Self {
        MockAttServer {
            count,
            writes: Mutex::default(),
        }
    }
}

impl AttServer for MockAttServer {
    fn write(&self, conn_handle: u16, attr_handle: u16, value: &[u8]) -> Result<(), AttErrorCode> {
        if attr_handle == 0 || attr_handle > self.count {
            return Err(AttErrorCode::InvalidHandle);
        }

        self.writes
            .lock()
            .unwrap()
            .push((conn_handle, attr_handle, value.to_vec()));

        Ok(())
    }
}

pub fn init_logger() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default()).ok();
    })
}

pub struct TestHost {
    pub host: Arc<Host>,
    pub transport: Arc<MockTransport>,
    pub gap: Arc<MockGap>,
    pub att_server: Arc<MockAttServer>,
    pub task: JoinHandle<()>,
}

/// Create a host and run its task
pub async fn start(config: HostConfig) -> TestHost {
    init_logger();

    let transport = Arc::new(MockTransport::default());

    let gap = Arc::new(MockGap::default());

    let att_server = Arc::new(MockAttServer::new(8));

    let (host, host_task) = Host::new(config, transport.clone(), gap.clone(), att_server.clone()).unwrap();

    let task = tokio::spawn(host_task.run());

    while !host.is_running() {
        tokio::task::yield_now().await;
    }

    TestHost {
        host,
        transport,
        gap,
        att_server,
        task,
    }
}

/// Let the host task process everything in its queue
///
/// The tests run with a paused clock, the sleep only completes once every other task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await
}

/// A LE Connection Complete event packet
///
/// `master` is the role of the local device.
pub fn le_connection_complete(handle: u16, master: bool, peer_address: [u8; 6]) -> Vec<u8> {
    let mut packet = vec![codes::LE_META, 19, codes::LE_CONNECTION_COMPLETE, 0];

    packet.extend_from_slice(&handle.to_le_bytes());
    packet.push(if master { 0 } else { 1 });
    packet.push(0);
    packet.extend_from_slice(&peer_address);
    packet.extend_from_slice(&0x0018u16.to_le_bytes());
    packet.extend_from_slice(&0u16.to_le_bytes());
    packet.extend_from_slice(&0x0048u16.to_le_bytes());
    packet.push(0);

    packet
}

pub fn disconnection_complete(handle: u16, reason: Error) -> Vec<u8> {
    let [h0, h1] = handle.to_le_bytes();

    vec![codes::DISCONNECTION_COMPLETE, 4, 0, h0, h1, reason.get_code()]
}

pub fn command_complete(opcode: u16, return_parameter: &[u8]) -> Vec<u8> {
    let [o0, o1] = opcode.to_le_bytes();

    let mut packet = vec![codes::COMMAND_COMPLETE, 3 + return_parameter.len() as u8, 1, o0, o1];

    packet.extend_from_slice(return_parameter);

    packet
}

pub fn command_status(opcode: u16, status: u8) -> Vec<u8> {
    let [o0, o1] = opcode.to_le_bytes();

    vec![codes::COMMAND_STATUS, 4, status, 1, o0, o1]
}

/// An ACL data packet containing a complete basic frame
pub fn basic_frame(handle: u16, cid: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();

    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(&cid.to_le_bytes());
    frame.extend_from_slice(payload);

    HciAclData::new(handle, AclPacketBoundary::FirstAutoFlushable, frame).to_packet()
}

/// The payload of a basic frame sent by the host
///
/// # Panic
/// The packet must hold a complete basic frame for `cid`.
pub fn sent_frame_payload(packet: &[u8], cid: u16) -> Vec<u8> {
    let acl = HciAclData::try_from_packet(packet.to_vec()).unwrap();

    let payload = acl.get_payload();

    assert_eq!(cid, u16::from_le_bytes([payload[2], payload[3]]), "wrong channel");

    assert_eq!(
        usize::from(u16::from_le_bytes([payload[0], payload[1]])),
        payload.len() - 4,
        "not a complete basic frame"
    );

    payload[4..].to_vec()
}

/// Connect with `handle` and wait for the host to process it
pub async fn connect(test: &TestHost, handle: u16, master: bool) {
    test.host
        .rx_hci_event(le_connection_complete(handle, master, [1, 2, 3, 4, 5, 6]))
        .unwrap();

    settle().await;

    assert!(test.host.lock().conns.find(handle).is_some());
}
