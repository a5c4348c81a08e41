//! End-to-end three-way handshake scenarios, client and server side.

mod common;

use std::net::Ipv4Addr;

use embedded_tcp::time::Instant;
use embedded_tcp::wire::{TcpFlags, TcpSeqNumber};
use embedded_tcp::{EngineConfig, TcpEngine};

use common::{build_segment, AcceptAllListener, Event, EventLog, RecordingSender};

const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
const REMOTE: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);

#[test]
fn client_side_handshake_completes_and_acks() {
    let sender = RecordingSender::new();
    let mut engine: TcpEngine<4, RecordingSender> =
        TcpEngine::new(LOCAL, 4, 2, 4, sender.clone(), EngineConfig::default());

    let log = EventLog::new();
    let handle = engine
        .new_connection(4096, 4096, Box::new(log.handler()))
        .unwrap();

    engine
        .start_connection(handle, REMOTE, 80, 16384, Instant::ZERO)
        .unwrap();

    let syn = sender.pop().expect("SYN not sent");
    let syn_repr = syn.repr();
    assert!(syn_repr.flags.is_syn());
    assert!(!syn_repr.flags.is_ack());
    assert_eq!(syn_repr.dst_port, 80);
    assert!(sender.is_empty());

    let iss = syn_repr.seq_number;
    let peer_iss = TcpSeqNumber(500_000);

    let syn_ack = build_segment(
        REMOTE,
        LOCAL,
        80,
        syn_repr.src_port,
        peer_iss,
        Some(iss + 1),
        TcpFlags::syn().with_ack(true),
        8192,
        Some(1460),
        Some(6),
        &[],
    );
    engine.receive(REMOTE, LOCAL, &syn_ack, Instant::from_millis(10));

    assert_eq!(log.events(), vec![Event::Established]);
    assert!(engine.is_connected(handle));

    let ack = sender.pop().expect("final ACK not sent");
    let ack_repr = ack.repr();
    assert!(ack_repr.flags.is_ack());
    assert!(!ack_repr.flags.is_syn());
    assert_eq!(ack_repr.seq_number, iss + 1);
    assert_eq!(ack_repr.ack_number, Some(peer_iss + 1));
    assert!(sender.is_empty());
}

#[test]
fn server_side_handshake_accepts_after_final_ack() {
    let sender = RecordingSender::new();
    let mut engine: TcpEngine<4, RecordingSender> =
        TcpEngine::new(LOCAL, 4, 2, 4, sender.clone(), EngineConfig::default());

    let log = EventLog::new();
    engine
        .register_listener(
            None,
            80,
            4,
            16384,
            Box::new(AcceptAllListener {
                recv_capacity: 4096,
                send_capacity: 4096,
                events: log.events.clone(),
            }),
        )
        .unwrap();

    let peer_iss = TcpSeqNumber(1_000_000);
    let syn = build_segment(
        REMOTE,
        LOCAL,
        4000,
        80,
        peer_iss,
        None,
        TcpFlags::syn(),
        4096,
        Some(1460),
        Some(6),
        &[],
    );
    engine.receive(REMOTE, LOCAL, &syn, Instant::ZERO);

    let syn_ack = sender.pop().expect("SYN-ACK not sent");
    let syn_ack_repr = syn_ack.repr();
    assert!(syn_ack_repr.flags.is_syn() && syn_ack_repr.flags.is_ack());
    assert_eq!(syn_ack_repr.ack_number, Some(peer_iss + 1));
    let our_iss = syn_ack_repr.seq_number;

    assert!(log.events().is_empty(), "accept fires only after the final ACK");

    let final_ack = build_segment(
        REMOTE,
        LOCAL,
        4000,
        80,
        peer_iss + 1,
        Some(our_iss + 1),
        TcpFlags::ack(),
        4096,
        None,
        None,
        &[],
    );
    engine.receive(REMOTE, LOCAL, &final_ack, Instant::from_millis(5));

    assert_eq!(log.events(), vec![Event::Established]);
    let accepted = engine
        .connection_handles()
        .find(|h| engine.is_connected(*h))
        .expect("no connection accepted");
    assert!(engine.is_connected(accepted));
}

#[test]
fn unmatched_segment_gets_rst_reply() {
    let sender = RecordingSender::new();
    let engine: TcpEngine<4, RecordingSender> =
        TcpEngine::new(LOCAL, 4, 2, 4, sender.clone(), EngineConfig::default());
    let mut engine = engine;

    let stray = build_segment(
        REMOTE,
        LOCAL,
        4000,
        9999,
        TcpSeqNumber(42),
        None,
        TcpFlags::ack(),
        4096,
        None,
        None,
        b"hi",
    );
    engine.receive(REMOTE, LOCAL, &stray, Instant::ZERO);

    let rst = sender.pop().expect("RST not sent for unmatched segment");
    assert!(rst.repr().flags.is_rst());
}
