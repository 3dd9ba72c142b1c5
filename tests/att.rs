//! Tests of the attribute protocol and security manager channels

mod common;

use ble_hs::config::HostConfig;
use ble_hs::errors::Error;
use ble_hs::l2cap::cid;
use common::*;

/// Send an ATT PDU to the host and get the ATT PDUs it answered with
async fn exchange(test: &TestHost, pdu: &[u8]) -> Vec<Vec<u8>> {
    test.host.rx_acl_data(basic_frame(5, cid::ATT, pdu)).unwrap();

    settle().await;

    test.transport
        .take_acl()
        .iter()
        .map(|packet| sent_frame_payload(packet, cid::ATT))
        .collect()
}

async fn connected(config: HostConfig) -> TestHost {
    let test = start(config).await;

    connect(&test, 5, false).await;

    test
}

#[tokio::test(start_paused = true)]
async fn mtu_exchange() {
    let test = connected(HostConfig::default()).await;

    assert_eq!(vec![vec![0x03, 240, 0]], exchange(&test, &[0x02, 0x00, 0x01]).await);

    let state = test.host.lock();

    let chan = state.conns.find(5).unwrap().chan_find(cid::ATT).unwrap();

    assert_eq!(256, chan.peer_mtu());
    assert_eq!(240, chan.mtu());
}

#[tokio::test(start_paused = true)]
async fn mtu_below_minimum() {
    let test = connected(HostConfig::default()).await;

    exchange(&test, &[0x02, 10, 0]).await;

    let state = test.host.lock();

    assert_eq!(23, state.conns.find(5).unwrap().chan_find(cid::ATT).unwrap().mtu());
}

#[tokio::test(start_paused = true)]
async fn write() {
    let test = connected(HostConfig::default()).await;

    assert_eq!(vec![vec![0x13]], exchange(&test, &[0x12, 3, 0, 0xAB, 0xCD]).await);

    assert_eq!(vec![(5, 3, vec![0xAB, 0xCD])], *test.att_server.writes.lock().unwrap());
}

#[tokio::test(start_paused = true)]
async fn write_invalid_handle() {
    let test = connected(HostConfig::default()).await;

    assert_eq!(
        vec![vec![0x01, 0x12, 0x20, 0, 0x01]],
        exchange(&test, &[0x12, 0x20, 0, 1]).await
    );
}

#[tokio::test(start_paused = true)]
async fn queued_write() {
    let test = connected(HostConfig::default()).await;

    assert_eq!(
        vec![vec![0x17, 2, 0, 0, 0, 1, 2]],
        exchange(&test, &[0x16, 2, 0, 0, 0, 1, 2]).await
    );

    assert_eq!(
        vec![vec![0x17, 2, 0, 2, 0, 3]],
        exchange(&test, &[0x16, 2, 0, 2, 0, 3]).await
    );

    assert_eq!(4, test.host.lock().conns.pool_usage().free_prep_entries);

    assert!(test.att_server.writes.lock().unwrap().is_empty());

    assert_eq!(vec![vec![0x19]], exchange(&test, &[0x18, 1]).await);

    assert_eq!(vec![(5, 2, vec![1, 2, 3])], *test.att_server.writes.lock().unwrap());

    assert_eq!(6, test.host.lock().conns.pool_usage().free_prep_entries);
}

#[tokio::test(start_paused = true)]
async fn queued_write_cancelled() {
    let test = connected(HostConfig::default()).await;

    exchange(&test, &[0x16, 2, 0, 0, 0, 1, 2]).await;

    assert_eq!(vec![vec![0x19]], exchange(&test, &[0x18, 0]).await);

    assert!(test.att_server.writes.lock().unwrap().is_empty());

    assert_eq!(6, test.host.lock().conns.pool_usage().free_prep_entries);
}

#[tokio::test(start_paused = true)]
async fn queued_write_with_gap() {
    let test = connected(HostConfig::default()).await;

    exchange(&test, &[0x16, 2, 0, 0, 0, 1, 2]).await;
    exchange(&test, &[0x16, 2, 0, 5, 0, 3]).await;

    assert_eq!(vec![vec![0x01, 0x18, 2, 0, 0x07]], exchange(&test, &[0x18, 1]).await);

    assert!(test.att_server.writes.lock().unwrap().is_empty());

    assert_eq!(6, test.host.lock().conns.pool_usage().free_prep_entries);
}

#[tokio::test(start_paused = true)]
async fn prepare_queue_full() {
    let mut config = HostConfig::default();

    config.max_prep_entries = 1;

    let test = connected(config).await;

    exchange(&test, &[0x16, 2, 0, 0, 0, 1]).await;

    assert_eq!(
        vec![vec![0x01, 0x16, 2, 0, 0x09]],
        exchange(&test, &[0x16, 2, 0, 1, 0, 2]).await
    );
}

#[tokio::test(start_paused = true)]
async fn disconnection_clears_queue() {
    let test = connected(HostConfig::default()).await;

    exchange(&test, &[0x16, 2, 0, 0, 0, 1, 2]).await;

    test.host
        .rx_hci_event(disconnection_complete(5, Error::RemoteUserTerminatedConnection))
        .unwrap();

    settle().await;

    assert_eq!(6, test.host.lock().conns.pool_usage().free_prep_entries);
}

#[tokio::test(start_paused = true)]
async fn request_not_supported() {
    let test = connected(HostConfig::default()).await;

    assert_eq!(
        vec![vec![0x01, 0x0A, 0, 0, 0x06]],
        exchange(&test, &[0x0A, 1, 0]).await
    );
}

#[tokio::test(start_paused = true)]
async fn commands_not_answered() {
    let test = connected(HostConfig::default()).await;

    assert!(exchange(&test, &[0x52, 1, 0, 9]).await.is_empty());

    assert_eq!(vec![(5, 1, vec![9])], *test.att_server.writes.lock().unwrap());
}

#[tokio::test(start_paused = true)]
async fn pairing_not_supported() {
    let test = connected(HostConfig::default()).await;

    test.host
        .rx_acl_data(basic_frame(5, cid::SM, &[0x01, 0x03, 0x00, 0x01, 0x10, 0x07, 0x07]))
        .unwrap();

    settle().await;

    let sent = test.transport.take_acl();

    assert_eq!(vec![0x05, 0x05], sent_frame_payload(&sent[0], cid::SM));
}
