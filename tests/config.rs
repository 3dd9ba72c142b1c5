//! Tests of loading the host configuration

mod common;

use ble_hs::config::HostConfig;
use ble_hs::errors::HostError;
use ble_hs::host::{AcceptAll, Host};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn omitted_fields_take_defaults() {
    let config: HostConfig = serde_yaml::from_str("max_connections: 4\nsm_enabled: false\n").unwrap();

    assert_eq!(4, config.max_connections);
    assert!(!config.sm_enabled);

    assert_eq!(12, config.max_l2cap_chans());
    assert_eq!(4, config.gatts_max_conns());
    assert_eq!(240, config.att_preferred_mtu);
    assert_eq!(Duration::from_secs(30), config.sig_unresponsive_timeout());
    assert_eq!(Duration::from_secs(1), config.heartbeat_period());

    assert_eq!(2, config.channels_per_connection());
}

#[test]
fn empty_document() {
    let config: HostConfig = serde_yaml::from_str("{}").unwrap();

    assert_eq!(HostConfig::default(), config);
}

#[test]
fn pool_sizes() {
    let yaml = "\
max_connections: 2
max_l2cap_chans: 8
gatts_max_conns: 1
sig_unresponsive_timeout_ms: 500
";

    let config: HostConfig = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(8, config.max_l2cap_chans());
    assert_eq!(1, config.gatts_max_conns());
    assert_eq!(Duration::from_millis(500), config.sig_unresponsive_timeout());
}

#[test]
fn serialized_config_loads() {
    let mut config = HostConfig::default();

    config.max_connections = 3;
    config.acl_buf_size = 251;
    config.set_gatts_max_conns(2);

    let yaml = serde_yaml::to_string(&config).unwrap();

    assert_eq!(config, serde_yaml::from_str::<HostConfig>(&yaml).unwrap());
}

#[tokio::test]
async fn invalid_config_rejected() {
    common::init_logger();

    let config: HostConfig = serde_yaml::from_str("max_connections: 0").unwrap();

    let result = Host::new(
        config,
        Arc::new(common::MockTransport::default()),
        Arc::new(AcceptAll),
        Arc::new(ble_hs::att::NoAttributes),
    );

    assert_eq!(Some(HostError::InvalidArgument), result.err());
}
