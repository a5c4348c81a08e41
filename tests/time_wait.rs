//! Graceful simultaneous close through to `TIME_WAIT`, and its eventual
//! expiry back to `CLOSED` with no RST.

mod common;

use std::net::Ipv4Addr;

use embedded_tcp::time::{Duration, Instant};
use embedded_tcp::wire::TcpFlags;

use common::{build_segment, establish_client, Event};

const LOCAL: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
const REMOTE: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 2);

#[test]
fn active_close_reaches_time_wait_then_expires_without_rst() {
    let (mut engine, sender, handle, log, our_seq, peer_seq) =
        establish_client::<4>(LOCAL, REMOTE, 5555, 16384);

    engine.close_sending(handle, Instant::from_millis(0)).unwrap();
    let fin = sender.pop().expect("FIN not sent");
    let fin_repr = fin.repr();
    assert!(fin_repr.flags.is_fin());
    let local_port = fin_repr.src_port;

    // Peer acks our FIN: FIN_WAIT_1 -> FIN_WAIT_2.
    let ack_fin = build_segment(
        REMOTE, LOCAL, 5555, local_port, peer_seq, Some(our_seq + 1), TcpFlags::ack(), 256, None, None, &[],
    );
    engine.receive(REMOTE, LOCAL, &ack_fin, Instant::from_millis(10));
    assert!(sender.is_empty());

    // Peer's own FIN arrives: FIN_WAIT_2 -> TIME_WAIT, answered with a bare ACK.
    let peer_fin = build_segment(
        REMOTE, LOCAL, 5555, local_port, peer_seq, Some(our_seq + 1), TcpFlags::fin().with_ack(true), 256, None, None, &[],
    );
    engine.receive(REMOTE, LOCAL, &peer_fin, Instant::from_millis(20));

    let final_ack = sender.pop().expect("ACK of peer's FIN not sent");
    let final_ack_repr = final_ack.repr();
    assert!(final_ack_repr.flags.is_ack() && !final_ack_repr.flags.is_fin());
    assert_eq!(final_ack_repr.ack_number, Some(peer_seq + 1));
    assert!(sender.is_empty());

    assert!(log.events().contains(&Event::Received(0)), "amount==0 signals the peer's FIN");
    assert!(!engine.is_connected(handle));

    // A stray retransmitted FIN while in TIME_WAIT just restarts the 2MSL
    // timer and gets another bare ACK (§S5), it is not a protocol error.
    engine.receive(REMOTE, LOCAL, &peer_fin, Instant::from_millis(30));
    let repeat_ack = sender.pop().expect("TIME_WAIT re-ACK not sent");
    assert!(repeat_ack.repr().flags.is_ack());
    assert!(sender.is_empty());

    // 2MSL (120s) after the last time the abort timer was restarted: the PCB
    // closes quietly, no RST.
    engine.poll(Instant::from_millis(30) + Duration::from_secs(121));
    assert!(sender.is_empty(), "TIME_WAIT expiry sends no RST");
}

#[test]
fn passive_close_skips_time_wait() {
    let (mut engine, sender, handle, log, our_seq, peer_seq) =
        establish_client::<4>(LOCAL, REMOTE, 5556, 16384);

    let local_port = {
        engine.extend_send_buf(handle, b"x", Instant::from_millis(0));
        sender.pop().unwrap().repr().src_port
    };
    // Acknowledge our outstanding byte so sequence math below stays simple.
    let ack = build_segment(
        REMOTE, LOCAL, 5556, local_port, peer_seq, Some(our_seq + 1), TcpFlags::ack(), 256, None, None, &[],
    );
    engine.receive(REMOTE, LOCAL, &ack, Instant::from_millis(1));
    let our_seq = our_seq + 1;

    // Peer closes first: ESTABLISHED -> CLOSE_WAIT.
    let peer_fin = build_segment(
        REMOTE, LOCAL, 5556, local_port, peer_seq, Some(our_seq), TcpFlags::fin().with_ack(true), 256, None, None, &[],
    );
    engine.receive(REMOTE, LOCAL, &peer_fin, Instant::from_millis(5));
    sender.pop().expect("ACK of peer's FIN not sent");
    assert!(log.events().contains(&Event::Received(0)));

    // We close in response: CLOSE_WAIT -> LAST_ACK.
    engine.close_sending(handle, Instant::from_millis(6)).unwrap();
    let our_fin = sender.pop().expect("our FIN not sent");
    assert!(our_fin.repr().flags.is_fin());

    // Peer acks our FIN: LAST_ACK -> CLOSED directly, no TIME_WAIT.
    let final_ack = build_segment(
        REMOTE, LOCAL, 5556, local_port, peer_seq + 1, Some(our_seq + 1), TcpFlags::ack(), 256, None, None, &[],
    );
    engine.receive(REMOTE, LOCAL, &final_ack, Instant::from_millis(7));
    assert!(sender.is_empty());
    assert!(!engine.is_connected(handle));
}
