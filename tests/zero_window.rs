//! Zero-window probing (§4.5): once the peer advertises a zero window, the
//! retransmission timer drives a one-byte probe instead of a real
//! retransmission, until the peer reopens the window.

mod common;

use std::net::Ipv4Addr;

use embedded_tcp::time::Instant;
use embedded_tcp::wire::TcpFlags;

use common::{build_segment, establish_client};

const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
const REMOTE: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 2);

#[test]
fn peer_zero_window_triggers_one_byte_probe_on_rtx_timeout() {
    let (mut engine, sender, handle, _log, our_seq, peer_seq) =
        establish_client::<4>(LOCAL, REMOTE, 7000, 16384);

    let n = engine.extend_send_buf(handle, b"payload-bytes", Instant::from_millis(0));
    assert_eq!(n, 13);
    let data_seg = sender.pop().expect("data segment not sent");
    let local_port = data_seg.repr().src_port;
    assert_eq!(data_seg.payload(), b"payload-bytes");

    // The peer acks nothing yet but shrinks the window to zero.
    let zero_win = build_segment(
        REMOTE, LOCAL, 7000, local_port, peer_seq, Some(our_seq), TcpFlags::ack(), 0, None, None, &[],
    );
    engine.receive(REMOTE, LOCAL, &zero_win, Instant::from_millis(50));
    assert!(sender.is_empty(), "a pure window update carries no new data to send");

    // Advance well past the initial RTO (1s) so the armed Rtx timer fires.
    engine.poll(Instant::from_millis(50) + embedded_tcp::time::Duration::from_secs(2));

    let probe = sender.pop().expect("zero-window probe not sent");
    let repr = probe.repr();
    assert_eq!(repr.seq_number, our_seq, "probe must carry the first unacked byte");
    assert_eq!(probe.payload().len(), 1);
    assert_eq!(probe.payload()[0], b'p');
    assert!(sender.is_empty(), "only one probe byte is sent per timeout");
}

#[test]
fn window_reopening_resumes_normal_output() {
    let (mut engine, sender, handle, _log, our_seq, peer_seq) =
        establish_client::<4>(LOCAL, REMOTE, 7000, 16384);

    engine.extend_send_buf(handle, b"0123456789", Instant::from_millis(0));
    let data_seg = sender.pop().expect("data segment not sent");
    let local_port = data_seg.repr().src_port;

    let zero_win = build_segment(
        REMOTE, LOCAL, 7000, local_port, peer_seq, Some(our_seq), TcpFlags::ack(), 0, None, None, &[],
    );
    engine.receive(REMOTE, LOCAL, &zero_win, Instant::from_millis(10));
    assert!(sender.is_empty());

    // Peer reopens the window without acknowledging new data: still no new
    // bytes were ACKed so there is nothing further queued to resend here,
    // but the stored send window must reflect the reopened value.
    let reopened = build_segment(
        REMOTE, LOCAL, 7000, local_port, peer_seq, Some(our_seq + 10), TcpFlags::ack(), 256, None, None, &[],
    );
    engine.receive(REMOTE, LOCAL, &reopened, Instant::from_millis(20));
    assert!(
        sender.is_empty(),
        "the whole 10-byte write was already acked, nothing left to (re)send"
    );
}
