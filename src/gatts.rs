//! GATT server connection tracking
//!
//! The attribute database is outside of this host. What is tracked here is the per connection
//! state the server keeps for every client, and how many clients the server can serve.

use crate::errors::HostError;

/// Per connection state of the GATT server
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GattsConn {
    /// Client characteristic configurations written by the client
    ///
    /// These are pairs of the characteristic value handle and the configuration flags.
    clt_cfgs: Vec<(u16, u16)>,
}

impl GattsConn {
    /// Set the client characteristic configuration of a characteristic
    pub fn set_clt_cfg(&mut self, handle: u16, flags: u16) {
        match self.clt_cfgs.binary_search_by_key(&handle, |(h, _)| *h) {
            Ok(index) => self.clt_cfgs[index].1 = flags,
            Err(index) => self.clt_cfgs.insert(index, (handle, flags)),
        }
    }

    pub fn get_clt_cfg(&self, handle: u16) -> Option<u16> {
        self.clt_cfgs
            .binary_search_by_key(&handle, |(h, _)| *h)
            .ok()
            .map(|index| self.clt_cfgs[index].1)
    }
}

/// Capacity of the GATT server
#[derive(Debug)]
pub struct GattsConns {
    max: usize,
    active: usize,
}

impl GattsConns {
    pub fn new(max: usize) -> Self {
        GattsConns { max, active: 0 }
    }

    /// Check if the server has room for another connection
    pub fn can_alloc(&self) -> bool {
        self.active < self.max
    }

    /// Initialize the server state of a new connection
    pub fn conn_init(&mut self) -> Result<GattsConn, HostError> {
        if self.can_alloc() {
            self.active += 1;

            Ok(GattsConn::default())
        } else {
            log::debug!("GATT server cannot serve more than {} connections", self.max);

            Err(HostError::NoMemory)
        }
    }

    /// Release the server state of a connection
    pub fn conn_deinit(&mut self, gatts_conn: GattsConn) {
        debug_assert!(self.active > 0);

        drop(gatts_conn);

        self.active = self.active.saturating_sub(1);
    }

    pub fn active(&self) -> usize {
        self.active
    }
}
