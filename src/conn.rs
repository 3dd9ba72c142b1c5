//! Connections
//!
//! A [`Connection`] is one LE link with its L2CAP channels. Connections are built by the
//! [`ConnRegistry`] from its pools, a connection is either fully built with every mandatory
//! channel or not built at all.
//!
//! The registry is part of the [`HostState`] so it can only be accessed while the host lock is
//! held.
//!
//! [`HostState`]: crate::host::HostState

use crate::att::{self, PrepWriteQueue};
use crate::config::HostConfig;
use crate::errors::HostError;
use crate::gatts::{GattsConn, GattsConns};
use crate::hci::events::{LeAddressType, Role};
use crate::l2cap::{cid, sig, L2capChan};
use crate::pool::{Block, Pool};
use crate::privacy::{BluetoothDeviceAddress, Rpa};

/// The addresses of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnAddrs {
    pub peer_id_addr_type: LeAddressType,
    pub peer_id_addr: BluetoothDeviceAddress,
    /// The address used by the peer over the air
    pub peer_ota_addr_type: LeAddressType,
    pub peer_ota_addr: BluetoothDeviceAddress,
    /// The resolvable private address used by this device, if any
    pub our_rpa: Option<BluetoothDeviceAddress>,
}

/// Connection parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnParams {
    pub interval: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

/// A connection
#[derive(Debug)]
pub struct Connection {
    handle: u16,
    role: Role,
    peer_addr_type: LeAddressType,
    peer_addr: BluetoothDeviceAddress,
    our_rpa: Option<BluetoothDeviceAddress>,
    peer_rpa: Option<BluetoothDeviceAddress>,
    params: ConnParams,
    /// Sorted by channel identifier
    chans: Vec<L2capChan>,
    /// The channel receiving the current PDU
    pub(crate) rx_cid: Option<u16>,
    pub(crate) gatts: Option<GattsConn>,
    pub(crate) prep_queue: PrepWriteQueue,
    block: Block,
}

impl Connection {
    fn new(block: Block) -> Self {
        Connection {
            handle: 0,
            role: Role::Slave,
            peer_addr_type: LeAddressType::Public,
            peer_addr: BluetoothDeviceAddress::default(),
            our_rpa: None,
            peer_rpa: None,
            params: ConnParams::default(),
            chans: Vec::new(),
            rx_cid: None,
            gatts: None,
            prep_queue: PrepWriteQueue::default(),
            block,
        }
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn params(&self) -> ConnParams {
        self.params
    }

    pub(crate) fn set_handle(&mut self, handle: u16) {
        self.handle = handle
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role
    }

    pub(crate) fn set_peer(
        &mut self,
        addr_type: LeAddressType,
        addr: BluetoothDeviceAddress,
        our_rpa: Option<BluetoothDeviceAddress>,
        peer_rpa: Option<BluetoothDeviceAddress>,
    ) {
        self.peer_addr_type = addr_type;
        self.peer_addr = addr;
        self.our_rpa = our_rpa;
        self.peer_rpa = peer_rpa;
    }

    pub(crate) fn set_params(&mut self, params: ConnParams) {
        self.params = params
    }

    pub fn gatts(&self) -> Option<&GattsConn> {
        self.gatts.as_ref()
    }

    pub fn gatts_mut(&mut self) -> Option<&mut GattsConn> {
        self.gatts.as_mut()
    }

    /// Compute the addresses of the connection
    ///
    /// When the controller resolved the peer's address the over the air address is the peer's
    /// resolvable private address, otherwise it is the same as the identity address.
    pub fn addrs(&self) -> ConnAddrs {
        let (peer_ota_addr_type, peer_ota_addr) = match self.peer_rpa {
            Some(rpa) => (LeAddressType::Random, rpa),
            None => (self.peer_addr_type.identity(), self.peer_addr),
        };

        ConnAddrs {
            peer_id_addr_type: self.peer_addr_type.identity(),
            peer_id_addr: self.peer_addr,
            peer_ota_addr_type,
            peer_ota_addr,
            our_rpa: self.our_rpa,
        }
    }

    /// Find a channel
    pub fn chan_find(&self, cid: u16) -> Option<&L2capChan> {
        for chan in self.chans.iter() {
            if chan.cid() == cid {
                return Some(chan);
            }

            if chan.cid() > cid {
                break;
            }
        }

        None
    }

    pub fn chan_find_mut(&mut self, cid: u16) -> Option<&mut L2capChan> {
        for chan in self.chans.iter_mut() {
            if chan.cid() == cid {
                return Some(chan);
            }

            if chan.cid() > cid {
                break;
            }
        }

        None
    }

    /// Get the channel identifiers in order
    pub fn cids(&self) -> impl Iterator<Item = u16> + '_ {
        self.chans.iter().map(|chan| chan.cid())
    }

    /// Insert a channel
    ///
    /// The channel is returned if a channel with the same identifier already exists.
    fn chan_insert(&mut self, chan: L2capChan) -> Result<(), L2capChan> {
        match self.chans.binary_search_by_key(&chan.cid(), |c| c.cid()) {
            Ok(_) => Err(chan),
            Err(index) => {
                self.chans.insert(index, chan);

                Ok(())
            }
        }
    }
}

/// The registry of connections
///
/// This owns the pools used for the connections and every connection that is active.
#[derive(Debug)]
pub struct ConnRegistry {
    conns: Vec<Connection>,
    conn_pool: Pool,
    chan_pool: Pool,
    prep_pool: Pool,
    gatts: GattsConns,
    sm_enabled: bool,
    chans_per_conn: usize,
    att_mtu: u16,
}

impl ConnRegistry {
    pub fn new(config: &HostConfig) -> Self {
        ConnRegistry {
            conns: Vec::with_capacity(config.max_connections),
            conn_pool: Pool::new("connection", config.max_connections),
            chan_pool: Pool::new("l2cap channel", config.max_l2cap_chans()),
            prep_pool: Pool::new("prepared write", config.max_prep_entries),
            gatts: GattsConns::new(config.gatts_max_conns()),
            sm_enabled: config.sm_enabled,
            chans_per_conn: config.channels_per_connection(),
            att_mtu: config.att_preferred_mtu,
        }
    }

    /// Check if a connection can be allocated
    pub fn can_alloc(&self) -> bool {
        self.conn_pool.can_alloc(1)
            && self.chan_pool.can_alloc(self.chans_per_conn)
            && self.gatts.can_alloc()
    }

    /// Insert a channel into a connection
    ///
    /// A channel with the same identifier as another channel of the connection is freed and
    /// `AlreadyExists` is returned.
    pub fn chan_insert(&mut self, conn: &mut Connection, chan: L2capChan) -> Result<(), HostError> {
        conn.chan_insert(chan).map_err(|chan| {
            self.chan_pool.free(chan.block);

            HostError::AlreadyExists
        })
    }

    fn chan_alloc(&mut self, conn: &mut Connection, cid: u16) -> Result<(), HostError> {
        let block = self.chan_pool.alloc().ok_or(HostError::NoMemory)?;

        let chan = match cid {
            cid::ATT => att::create_chan(self.att_mtu, block),
            cid::SIG => sig::create_chan(block),
            _ => crate::sm::create_chan(block),
        };

        self.chan_insert(conn, chan)
    }

    /// Allocate a connection
    ///
    /// The connection is created with its mandatory channels and GATT server state. `None` is
    /// returned if any of them cannot be allocated, nothing stays allocated in that case.
    pub fn alloc(&mut self) -> Option<Connection> {
        let Some(block) = self.conn_pool.alloc() else {
            log::error!("no memory for another connection");

            return None;
        };

        let mut conn = Connection::new(block);

        let cids: &[u16] = if self.sm_enabled {
            &[cid::ATT, cid::SIG, cid::SM]
        } else {
            &[cid::ATT, cid::SIG]
        };

        for &cid in cids {
            if let Err(e) = self.chan_alloc(&mut conn, cid) {
                log::error!("cannot create channel 0x{:04x} for a new connection, {}", cid, e);

                self.free(conn);

                return None;
            }
        }

        match self.gatts.conn_init() {
            Ok(gatts) => conn.gatts = Some(gatts),
            Err(e) => {
                log::error!("cannot initialize the GATT server for a new connection, {}", e);

                self.free(conn);

                return None;
            }
        }

        Some(conn)
    }

    /// Free a connection
    ///
    /// Freeing `None` does nothing.
    pub fn free(&mut self, conn: impl Into<Option<Connection>>) {
        let Some(mut conn) = conn.into() else { return };

        if let Some(gatts) = conn.gatts.take() {
            self.gatts.conn_deinit(gatts);
        }

        conn.prep_queue.clear(&mut self.prep_pool);

        conn.rx_cid = None;

        for chan in conn.chans.drain(..) {
            self.chan_pool.free(chan.block);
        }

        self.conn_pool.free(conn.block);
    }

    /// Insert a connection
    ///
    /// # Panic
    /// In debug builds this panics if a connection with the same handle is already within the
    /// registry.
    pub fn insert(&mut self, conn: Connection) {
        debug_assert!(
            self.find(conn.handle()).is_none(),
            "connection handle {} is already in use",
            conn.handle()
        );

        self.conns.insert(0, conn);
    }

    /// Remove a connection
    pub fn remove(&mut self, handle: u16) -> Option<Connection> {
        let index = self.conns.iter().position(|conn| conn.handle() == handle)?;

        Some(self.conns.remove(index))
    }

    pub fn find(&self, handle: u16) -> Option<&Connection> {
        self.conns.iter().find(|conn| conn.handle() == handle)
    }

    pub fn find_mut(&mut self, handle: u16) -> Option<&mut Connection> {
        self.conns.iter_mut().find(|conn| conn.handle() == handle)
    }

    /// Find a connection along with the pool of prepared write entries
    pub(crate) fn find_with_prep_pool(&mut self, handle: u16) -> Option<(&mut Connection, &mut Pool)> {
        let pool = &mut self.prep_pool;

        let conn = self.conns.iter_mut().find(|conn| conn.handle() == handle)?;

        Some((conn, pool))
    }

    /// Find a connection by the peer's identity address
    pub fn find_by_addr(&self, addr_type: LeAddressType, addr: &BluetoothDeviceAddress) -> Option<&Connection> {
        self.conns
            .iter()
            .find(|conn| conn.peer_addr_type.identity() == addr_type.identity() && &conn.peer_addr == addr)
    }

    /// Find a connection by its position
    ///
    /// The most recently inserted connection has index zero.
    pub fn find_by_idx(&self, idx: usize) -> Option<&Connection> {
        self.conns.get(idx)
    }

    pub fn first(&self) -> Option<&Connection> {
        self.conns.first()
    }

    /// Find the first connection whose peer uses an address resolvable with `irk`
    pub fn find_by_irk(&self, irk: u128) -> Option<&Connection> {
        self.conns
            .iter()
            .find(|conn| Rpa::resolves(&conn.addrs().peer_ota_addr, irk))
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Get the number of free blocks of the connection and channel pools
    pub fn pool_usage(&self) -> PoolUsage {
        PoolUsage {
            free_conns: self.conn_pool.num_free(),
            free_chans: self.chan_pool.num_free(),
            free_prep_entries: self.prep_pool.num_free(),
            gatts_conns: self.gatts.active(),
        }
    }
}

/// Usage of the pools of a [`ConnRegistry`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolUsage {
    pub free_conns: usize,
    pub free_chans: usize,
    pub free_prep_entries: usize,
    pub gatts_conns: usize,
}
