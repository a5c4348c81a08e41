//! Releasing a connection handle while a PCB is still attached (§4.7
//! "con_abandoned"): unsent data in flight means an immediate abort with
//! RST; a fully flushed send buffer instead closes gracefully in the
//! background and is torn down by the `AbandonedTimeoutTicks` deadline if
//! the peer never finishes its side.

mod common;

use std::net::Ipv4Addr;

use embedded_tcp::time::{Duration, Instant};

use common::establish_client;

const LOCAL: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 1);
const REMOTE: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 2);

#[test]
fn abandoning_with_unsent_data_in_flight_aborts_with_rst() {
    let (mut engine, sender, handle, _log, _our_seq, _peer_seq) =
        establish_client::<4>(LOCAL, REMOTE, 6000, 16384);

    // Queue far more than the initial congestion window can flush in one
    // burst, so real unsent bytes remain behind `flight_size()`.
    let payload = vec![0x42u8; 64 * 1024];
    engine.extend_send_buf(handle, &payload, Instant::from_millis(0));
    while sender.pop().is_some() {}

    engine.release_connection(handle, Instant::from_millis(1));

    let rst = sender.pop().expect("abandon with unsent data must RST");
    assert!(rst.repr().flags.is_rst());
}

#[test]
fn abandoning_with_empty_send_buffer_closes_quietly_then_times_out() {
    let (mut engine, sender, handle, _log, _our_seq, _peer_seq) =
        establish_client::<4>(LOCAL, REMOTE, 6001, 16384);

    // Nothing was ever queued: the send buffer is already fully "flushed".
    engine.release_connection(handle, Instant::from_millis(0));

    let fin = sender.pop().expect("abandon with nothing in flight sends a FIN");
    assert!(fin.repr().flags.is_fin());
    assert!(sender.is_empty());

    // The peer never responds; the AbandonedTimeoutTicks deadline (30s)
    // tears the PCB down with a RST since it never reached a closed state
    // through the normal handshake.
    engine.poll(Instant::from_millis(0) + Duration::from_secs(31));
    let rst = sender.pop().expect("abandoned-timeout deadline must RST");
    assert!(rst.repr().flags.is_rst());
}
