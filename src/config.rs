//! Host configuration

use crate::errors::HostError;
use core::time::Duration;
use serde::{Deserialize, Serialize};

/// The number of channels every connection is created with
///
/// This is the ATT, signaling, and security manager channels.
pub const MANDATORY_CHANNEL_COUNT: usize = 3;

/// Configuration of the host
///
/// Every pool of the host is sized from this configuration when the host is created. Any field
/// missing when deserializing takes its default value, the pool sizes that are derived from
/// `max_connections` are derived from the deserialized value of `max_connections`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub max_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_l2cap_chans: Option<usize>,
    pub max_l2cap_sig_procs: usize,
    /// Create the security manager channel for every connection
    pub sm_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    gatts_max_conns: Option<usize>,
    pub max_prep_entries: usize,
    pub att_preferred_mtu: u16,
    /// The maximum payload of an ACL data packet accepted by the controller
    pub acl_buf_size: usize,
    pub sig_unresponsive_timeout_ms: u64,
    pub heartbeat_period_ms: u64,
    pub hci_block_timeout_ms: u64,
    pub conn_update_min_ce_len: u16,
    pub conn_update_max_ce_len: u16,
}

impl HostConfig {
    /// Set the size of the channel pool
    pub fn set_max_l2cap_chans(&mut self, max: usize) {
        self.max_l2cap_chans = Some(max)
    }

    /// Get the size of the channel pool
    ///
    /// Unless set, this is the number of mandatory channels for every connection.
    pub fn max_l2cap_chans(&self) -> usize {
        self.max_l2cap_chans
            .unwrap_or(MANDATORY_CHANNEL_COUNT * self.max_connections)
    }

    /// Set the number of connections the GATT server can track
    pub fn set_gatts_max_conns(&mut self, max: usize) {
        self.gatts_max_conns = Some(max)
    }

    /// Get the number of connections the GATT server can track
    pub fn gatts_max_conns(&self) -> usize {
        self.gatts_max_conns.unwrap_or(self.max_connections)
    }

    pub fn sig_unresponsive_timeout(&self) -> Duration {
        Duration::from_millis(self.sig_unresponsive_timeout_ms)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn hci_block_timeout(&self) -> Duration {
        Duration::from_millis(self.hci_block_timeout_ms)
    }

    /// The number of channels allocated for one connection
    pub fn channels_per_connection(&self) -> usize {
        if self.sm_enabled {
            MANDATORY_CHANNEL_COUNT
        } else {
            MANDATORY_CHANNEL_COUNT - 1
        }
    }

    /// Validate the configuration
    ///
    /// A pool with no entries, an ACL buffer that is too small to carry the basic frame header,
    /// or a channel pool that cannot hold the channels of a single connection is rejected.
    pub fn validate(&self) -> Result<(), HostError> {
        if self.max_connections == 0
            || self.max_l2cap_sig_procs == 0
            || self.max_l2cap_chans() < self.channels_per_connection()
            || self.acl_buf_size < crate::l2cap::BasicHeader::SIZE
            || self.heartbeat_period_ms == 0
            || self.conn_update_min_ce_len > self.conn_update_max_ce_len
        {
            log::error!("invalid host configuration: {:?}", self);

            Err(HostError::InvalidArgument)
        } else {
            Ok(())
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            max_connections: 1,
            max_l2cap_chans: None,
            max_l2cap_sig_procs: 1,
            sm_enabled: true,
            gatts_max_conns: None,
            max_prep_entries: 6,
            att_preferred_mtu: 240,
            acl_buf_size: 27,
            sig_unresponsive_timeout_ms: 30_000,
            heartbeat_period_ms: 1_000,
            hci_block_timeout_ms: 1_000,
            conn_update_min_ce_len: 0x0010,
            conn_update_max_ce_len: 0x0300,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derived_defaults() {
        let mut config = HostConfig::default();

        config.max_connections = 4;

        assert_eq!(12, config.max_l2cap_chans());
        assert_eq!(4, config.gatts_max_conns());
        assert_eq!(Duration::from_secs(30), config.sig_unresponsive_timeout());

        config.set_max_l2cap_chans(5);

        assert_eq!(5, config.max_l2cap_chans());
    }

    #[test]
    fn validate() {
        assert_eq!(Ok(()), HostConfig::default().validate());

        let mut config = HostConfig::default();

        config.set_max_l2cap_chans(2);

        assert_eq!(Err(HostError::InvalidArgument), config.validate());

        config.sm_enabled = false;

        assert_eq!(Ok(()), config.validate());

        let mut config = HostConfig::default();

        config.max_l2cap_sig_procs = 0;

        assert_eq!(Err(HostError::InvalidArgument), config.validate());
    }
}
