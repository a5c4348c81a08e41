//! Fast retransmit / fast recovery on the third duplicate ACK (RFC 5681).

mod common;

use std::net::Ipv4Addr;

use embedded_tcp::time::Instant;
use embedded_tcp::wire::{TcpFlags, TcpSeqNumber};
use embedded_tcp::TcpEngine;

use common::{build_segment, establish_client};

const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const REMOTE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

fn peer_ack(
    engine: &mut TcpEngine<4, common::RecordingSender>,
    local_port: u16,
    remote_port: u16,
    peer_seq: TcpSeqNumber,
    ack: TcpSeqNumber,
    window: u16,
    now: Instant,
) {
    let seg = build_segment(
        REMOTE, LOCAL, remote_port, local_port, peer_seq, Some(ack), TcpFlags::ack(), window, None, None, &[],
    );
    engine.receive(REMOTE, LOCAL, &seg, now);
}

#[test]
fn third_duplicate_ack_triggers_fast_retransmit() {
    let (mut engine, sender, handle, _log, our_seq, peer_seq) =
        establish_client::<4>(LOCAL, REMOTE, 443, 16384);

    let local_port = sender.pop().map(|s| s.repr().dst_port);
    assert!(local_port.is_none(), "handshake should have left nothing queued");

    // Queue more than one segment worth of data so a retransmit has a first
    // unacked segment to resend.
    let payload = vec![0xABu8; 3000];
    let n = engine.extend_send_buf(handle, &payload, Instant::from_millis(20));
    assert_eq!(n, payload.len());

    let first = sender.pop().expect("first data segment not sent");
    assert_eq!(first.repr().seq_number, our_seq);
    let snd_mss = first.payload().len();
    assert!(snd_mss > 0 && snd_mss < payload.len());

    // Drain whatever else went out in the initial burst.
    while sender.pop().is_some() {}

    let local_port = first.repr().src_port;

    // Three duplicate ACKs for the same (old) ack number, same window,
    // no data, no FIN: §4.6 dup-ack accounting. The wire window field must
    // match the one the handshake left `snd_wnd` at once shifted by the
    // negotiated `snd_wnd_shift` (6), i.e. 16384 >> 6 = 256, or the
    // unchanged-window half of the duplicate-ACK test fails to hold.
    for i in 0..3 {
        peer_ack(
            &mut engine,
            local_port,
            443,
            peer_seq,
            our_seq,
            256,
            Instant::from_millis(30 + i),
        );
    }

    let retransmit = sender.pop().expect("fast retransmit not sent on 3rd dup ACK");
    let repr = retransmit.repr();
    assert!(repr.flags.is_ack());
    assert_eq!(repr.seq_number, our_seq, "retransmit must resend the first unacked byte");
}

#[test]
fn new_ack_advances_send_window_and_clears_dup_count() {
    let (mut engine, sender, handle, _log, our_seq, peer_seq) =
        establish_client::<4>(LOCAL, REMOTE, 443, 16384);

    let payload = vec![0x11u8; 512];
    engine.extend_send_buf(handle, &payload, Instant::from_millis(5));
    let seg = sender.pop().expect("data segment not sent");
    let local_port = seg.repr().src_port;
    assert_eq!(seg.payload().len(), 512);

    peer_ack(
        &mut engine,
        local_port,
        443,
        peer_seq,
        our_seq + 512,
        16384,
        Instant::from_millis(15),
    );

    // A clean new ACK with no outstanding data leaves nothing further to send.
    assert!(sender.is_empty());
}
