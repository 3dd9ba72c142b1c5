//! The host
//!
//! A [`Host`] is the context of one BLE host. It contains the host lock protecting the
//! connections and signaling procedures, the interfaces to the controller and upper layers, and
//! the sending side of the queue processed by the [`HostTask`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ble_hs::host::{Host, HciTransport, AcceptAll};
//! # use ble_hs::att::NoAttributes;
//! # use ble_hs::config::HostConfig;
//! # async fn example(transport: Arc<dyn HciTransport>) {
//! let (host, task) = Host::new(HostConfig::default(), transport, Arc::new(AcceptAll), Arc::new(NoAttributes))
//!     .unwrap();
//!
//! tokio::spawn(task.run());
//!
//! // packets from the controller are given to the host
//! host.rx_hci_event(vec![0x0E, 4, 1, 0x03, 0x0C, 0]).unwrap();
//! # }
//! ```

use crate::att::AttServer;
use crate::config::HostConfig;
use crate::conn::{ConnParams, ConnRegistry};
use crate::errors::{Error, HostError, TransportError};
use crate::hci::block::HciBlock;
use crate::hci::events::{HciEvent, LeConnectionCompleteData, LeConnectionUpdateCompleteData};
use crate::hci::{CommandParameter, Disconnect};
use crate::l2cap;
use crate::l2cap::sig::{self, SigState, UpdateError, UpdateParams};
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use tokio::sync::mpsc;

/// The interface to the controller
///
/// Packets are sent without a packet indicator. Neither method may block, a packet that cannot be
/// sent returns an error.
pub trait HciTransport: Send + Sync {
    fn send_command(&self, packet: &[u8]) -> Result<(), TransportError>;

    fn send_acl_data(&self, packet: &[u8]) -> Result<(), TransportError>;
}

/// The upper layer rejected a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rejected;

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("rejected")
    }
}

impl std::error::Error for Rejected {}

/// The interface to the generic access profile
///
/// These methods are called from the host task without the host lock held.
pub trait GapHandler: Send + Sync {
    /// Accept or reject new connection parameters requested by the peer
    fn accept_update(&self, conn_handle: u16, params: &UpdateParams) -> Result<(), Rejected>;

    fn connected(&self, _conn_handle: u16) {}

    fn disconnected(&self, _conn_handle: u16, _reason: Error) {}
}

/// A `GapHandler` accepting every connection parameter update
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl GapHandler for AcceptAll {
    fn accept_update(&self, _: u16, _: &UpdateParams) -> Result<(), Rejected> {
        Ok(())
    }
}

/// Events processed by the host task
#[derive(Debug)]
pub(crate) enum HostEvent {
    HciEvent(Vec<u8>),
    AclData(Vec<u8>),
    /// A blocking command and the sequence number of its caller
    BlockingCommand(u64, Vec<u8>),
    Heartbeat,
    Stop,
}

/// The state protected by the host lock
pub struct HostState {
    pub conns: ConnRegistry,
    pub sig: SigState,
}

tokio::task_local! {
    static HOST_TASK: ();
}

/// Check if this is called from within the host task
pub(crate) fn on_host_task() -> bool {
    HOST_TASK.try_with(|_| ()).is_ok()
}

/// The host
pub struct Host {
    config: HostConfig,
    state: Mutex<HostState>,
    transport: Arc<dyn HciTransport>,
    gap: Arc<dyn GapHandler>,
    att_server: Arc<dyn AttServer>,
    queue: mpsc::UnboundedSender<HostEvent>,
    block: HciBlock,
    running: AtomicBool,
}

impl Host {
    /// Create a new host
    ///
    /// Every pool is sized from `config`. The returned task must be run for the host to process
    /// anything.
    pub fn new(
        config: HostConfig,
        transport: Arc<dyn HciTransport>,
        gap: Arc<dyn GapHandler>,
        att_server: Arc<dyn AttServer>,
    ) -> Result<(Arc<Host>, HostTask), HostError> {
        config.validate()?;

        let (sender, receiver) = mpsc::unbounded_channel();

        let state = HostState {
            conns: ConnRegistry::new(&config),
            sig: SigState::new(&config),
        };

        let block = HciBlock::new(config.hci_block_timeout());

        let host = Arc::new(Host {
            config,
            state: Mutex::new(state),
            transport,
            gap,
            att_server,
            queue: sender,
            block,
            running: AtomicBool::new(false),
        });

        let task = HostTask {
            host: host.clone(),
            queue: receiver,
        };

        Ok((host, task))
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn transport(&self) -> &dyn HciTransport {
        &*self.transport
    }

    pub fn gap(&self) -> &dyn GapHandler {
        &*self.gap
    }

    pub fn att_server(&self) -> &dyn AttServer {
        &*self.att_server
    }

    pub(crate) fn block(&self) -> &HciBlock {
        &self.block
    }

    /// Acquire the host lock
    pub fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if the host lock is held
    pub fn is_locked(&self) -> bool {
        matches!(self.state.try_lock(), Err(TryLockError::WouldBlock))
    }

    /// Check if the host task is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn enqueue(&self, event: HostEvent) -> Result<(), HostError> {
        self.queue
            .send(event)
            .map_err(|_| HostError::Transport(TransportError::Closed))
    }

    /// Give an event packet from the controller to the host
    pub fn rx_hci_event(&self, packet: Vec<u8>) -> Result<(), HostError> {
        self.enqueue(HostEvent::HciEvent(packet))
    }

    /// Give an ACL data packet from the controller to the host
    pub fn rx_acl_data(&self, packet: Vec<u8>) -> Result<(), HostError> {
        self.enqueue(HostEvent::AclData(packet))
    }

    /// Stop the host task
    pub fn stop(&self) {
        self.enqueue(HostEvent::Stop).ok();
    }

    /// Check if another connection can be accepted
    pub fn can_connect(&self) -> bool {
        self.lock().conns.can_alloc()
    }

    /// Terminate a connection
    ///
    /// The connection is removed once the controller reports the disconnection.
    pub fn terminate(&self, conn_handle: u16, reason: Error) -> Result<(), HostError> {
        if self.lock().conns.find(conn_handle).is_none() {
            return Err(HostError::NotConnected);
        }

        self.send_disconnect(conn_handle, reason)
    }

    fn send_disconnect(&self, conn_handle: u16, reason: Error) -> Result<(), HostError> {
        let command = Disconnect {
            connection_handle: conn_handle,
            reason,
        };

        log::debug!("disconnecting connection {}, {}", conn_handle, reason);

        self.transport
            .send_command(&command.as_command_packet())
            .map_err(HostError::Transport)
    }

    fn process(&self, event: HostEvent) {
        let result = match event {
            HostEvent::HciEvent(packet) => self.process_hci_event(&packet),
            HostEvent::AclData(packet) => l2cap::rx(self, packet),
            HostEvent::BlockingCommand(seq, packet) => {
                self.block.transmit(self.transport(), seq, &packet);

                Ok(())
            }
            HostEvent::Heartbeat => {
                sig::heartbeat(self);

                Ok(())
            }
            HostEvent::Stop => Ok(()),
        };

        if let Err(e) = result {
            log::debug!("host event not processed, {}", e);
        }
    }

    fn process_hci_event(&self, packet: &[u8]) -> Result<(), HostError> {
        let event = HciEvent::try_from_packet(packet).map_err(|e| {
            log::warn!("invalid HCI event, {}", e);

            HostError::BadData
        })?;

        log::trace!("HCI event {:?}", event);

        match event {
            HciEvent::DisconnectionComplete {
                status,
                connection_handle,
                reason,
            } => self.disconnection_complete(status, connection_handle, reason),
            HciEvent::CommandComplete {
                opcode,
                return_parameter,
            } => {
                let (status, parameter) = match return_parameter.split_first() {
                    Some((status, parameter)) => (*status, parameter),
                    None => (0, &[][..]),
                };

                self.block.ack(opcode, status, parameter);

                Ok(())
            }
            HciEvent::CommandStatus { status, opcode } => {
                self.block.ack(opcode, status.get_code(), &[]);

                Ok(())
            }
            HciEvent::LeConnectionComplete(data) => self.connection_complete(data),
            HciEvent::LeConnectionUpdateComplete(data) => self.connection_update_complete(data),
            HciEvent::Unsupported(code, sub_code) => {
                log::trace!("ignoring event 0x{:02x} ({:?})", code, sub_code);

                Ok(())
            }
        }
    }

    fn connection_complete(&self, data: LeConnectionCompleteData) -> Result<(), HostError> {
        if data.status != Error::NoError {
            log::debug!("connection failed, {}", data.status);

            return Ok(());
        }

        let handle = data.connection_handle;

        let allocated = {
            let mut state = self.lock();

            match state.conns.alloc() {
                Some(mut conn) => {
                    conn.set_handle(handle);
                    conn.set_role(data.role);
                    conn.set_peer(data.peer_address_type, data.peer_address, data.local_rpa, data.peer_rpa);
                    conn.set_params(ConnParams {
                        interval: data.interval,
                        latency: data.latency,
                        supervision_timeout: data.supervision_timeout,
                    });

                    state.conns.insert(conn);

                    true
                }
                None => false,
            }
        };

        if allocated {
            log::info!("connection {} established as {:?}", handle, data.role);

            self.gap.connected(handle);

            Ok(())
        } else {
            log::error!("no resources for connection {}, disconnecting", handle);

            self.send_disconnect(handle, Error::ConnectionRejectedDueToLimitedResources)?;

            Err(HostError::NoMemory)
        }
    }

    fn connection_update_complete(&self, data: LeConnectionUpdateCompleteData) -> Result<(), HostError> {
        if data.status != Error::NoError {
            log::debug!("connection update failed, {}", data.status);

            return Ok(());
        }

        let mut state = self.lock();

        let conn = state
            .conns
            .find_mut(data.connection_handle)
            .ok_or(HostError::NotConnected)?;

        conn.set_params(ConnParams {
            interval: data.interval,
            latency: data.latency,
            supervision_timeout: data.supervision_timeout,
        });

        Ok(())
    }

    fn disconnection_complete(&self, status: Error, conn_handle: u16, reason: Error) -> Result<(), HostError> {
        if status != Error::NoError {
            log::debug!("disconnection of {} failed, {}", conn_handle, status);

            return Ok(());
        }

        let (found, callbacks) = {
            let mut state = self.lock();

            let conn = state.conns.remove(conn_handle);

            let found = conn.is_some();

            state.conns.free(conn);

            (found, state.sig_conn_broken(conn_handle))
        };

        for cb in callbacks {
            cb(conn_handle, Err(UpdateError::ConnectionBroken(reason)));
        }

        if found {
            log::info!("connection {} closed, {}", conn_handle, reason);

            self.gap.disconnected(conn_handle, reason);

            Ok(())
        } else {
            Err(HostError::NotConnected)
        }
    }
}

/// The task of the host
///
/// This is the single consumer of the host's event queue.
pub struct HostTask {
    host: Arc<Host>,
    queue: mpsc::UnboundedReceiver<HostEvent>,
}

impl HostTask {
    /// Run the host until [`Host::stop`] is called
    pub async fn run(self) {
        HOST_TASK.scope((), self.run_loop()).await
    }

    async fn run_loop(mut self) {
        let host = self.host;

        host.running.store(true, Ordering::Release);

        log::debug!("host task started");

        let mut heartbeat = tokio::time::interval(host.config.heartbeat_period());

        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                event = self.queue.recv() => event,
                _ = heartbeat.tick() => Some(HostEvent::Heartbeat),
            };

            match event {
                None | Some(HostEvent::Stop) => break,
                Some(event) => host.process(event),
            }
        }

        host.running.store(false, Ordering::Release);

        host.block.cancel();

        log::debug!("host task stopped");
    }
}
