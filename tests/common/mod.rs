//! Shared test harness: a deterministic, in-memory `IpSender` that records
//! every segment an engine emits (S1-S6, §13 "deterministic loopback
//! `IpSender`"), plus recording `ConnectionHandler`/`ListenerHandler`
//! implementations so scenario tests can assert on callback ordering
//! without a real socket or wall clock.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;

use embedded_tcp::phy::{IpSender, SendError};
use embedded_tcp::time::Instant;
use embedded_tcp::wire::{IpAddress, TcpFlags, TcpPacket, TcpRepr, TcpSeqNumber};
use embedded_tcp::{AcceptDecision, ConnectionHandle, ConnectionHandler, EngineConfig, ListenerHandler, TcpEngine};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentSegment {
    pub local: IpAddress,
    pub remote: IpAddress,
    pub bytes: Vec<u8>,
}

impl SentSegment {
    /// Parse this segment's header, verifying the checksum against the same
    /// `(local, remote)` pair the engine emitted it with.
    pub fn repr(&self) -> TcpRepr {
        let packet = TcpPacket::new_checked(&self.bytes[..]).expect("malformed test segment");
        TcpRepr::parse(&packet, &self.local, &self.remote).expect("bad checksum in test segment")
    }

    pub fn payload(&self) -> &[u8] {
        let packet = TcpPacket::new_checked(&self.bytes[..]).unwrap();
        let header_len = packet.header_len();
        &self.bytes[header_len..]
    }
}

/// Records every segment handed to `send`, never drops or reorders. Never
/// reports `SendError` unless `fail_next` was armed, so tests can exercise
/// the transient-failure/output-retry path deliberately.
#[derive(Clone, Default)]
pub struct RecordingSender {
    pub sent: Rc<RefCell<VecDeque<SentSegment>>>,
    pub fail_next: Rc<RefCell<Option<SendError>>>,
}

impl RecordingSender {
    pub fn new() -> RecordingSender {
        RecordingSender::default()
    }

    pub fn pop(&self) -> Option<SentSegment> {
        self.sent.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.sent.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn arm_failure(&self, err: SendError) {
        *self.fail_next.borrow_mut() = Some(err);
    }
}

impl IpSender for RecordingSender {
    fn send<F>(&mut self, local: IpAddress, remote: IpAddress, tcp_len: usize, emit: F) -> Result<(), SendError>
    where
        F: FnOnce(&mut [u8]),
    {
        if let Some(err) = self.fail_next.borrow_mut().take() {
            return Err(err);
        }
        let mut bytes = vec![0u8; tcp_len];
        emit(&mut bytes);
        self.sent.borrow_mut().push_back(SentSegment { local, remote, bytes });
        Ok(())
    }
}

/// Build a raw TCP-over-IPv4 segment for feeding into `TcpEngine::receive`,
/// the same way `output.rs::emit_segment` builds the engine's own outbound
/// segments (options + checksum filled in by `Repr::emit`).
#[allow(clippy::too_many_arguments)]
pub fn build_segment(
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    seq: TcpSeqNumber,
    ack: Option<TcpSeqNumber>,
    flags: TcpFlags,
    window_len: u16,
    max_seg_size: Option<u16>,
    window_scale: Option<u8>,
    payload: &[u8],
) -> Vec<u8> {
    let repr = TcpRepr {
        src_port,
        dst_port,
        seq_number: seq,
        ack_number: ack,
        flags,
        window_len,
        max_seg_size,
        window_scale,
    };
    let header_len = repr.header_len();
    let mut buf = vec![0u8; header_len + payload.len()];
    buf[header_len..].copy_from_slice(payload);
    let mut packet = TcpPacket::new_unchecked(&mut buf[..]);
    repr.emit(&mut packet, &src_addr, &dst_addr);
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Established,
    Aborted,
    Received(usize),
    Sent(usize),
}

#[derive(Default)]
pub struct EventLog {
    pub events: Rc<RefCell<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> EventLog {
        EventLog::default()
    }

    pub fn handler(&self) -> RecordingHandler {
        RecordingHandler {
            events: self.events.clone(),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }
}

pub struct RecordingHandler {
    events: Rc<RefCell<Vec<Event>>>,
}

impl ConnectionHandler for RecordingHandler {
    fn connection_established(&mut self) {
        self.events.borrow_mut().push(Event::Established);
    }
    fn connection_aborted(&mut self) {
        self.events.borrow_mut().push(Event::Aborted);
    }
    fn data_received(&mut self, amount: usize) {
        self.events.borrow_mut().push(Event::Received(amount));
    }
    fn data_sent(&mut self, amount: usize) {
        self.events.borrow_mut().push(Event::Sent(amount));
    }
}

/// A listener that accepts every incoming connection, handing each a fresh
/// `RecordingHandler` that reports into the same shared [`EventLog`].
pub struct AcceptAllListener {
    pub recv_capacity: usize,
    pub send_capacity: usize,
    pub events: Rc<RefCell<Vec<Event>>>,
}

impl ListenerHandler for AcceptAllListener {
    fn connection_established(&mut self) -> AcceptDecision {
        AcceptDecision::Accept(
            Box::new(RecordingHandler {
                events: self.events.clone(),
            }),
            self.recv_capacity,
            self.send_capacity,
        )
    }
}

pub struct RejectAllListener;

impl ListenerHandler for RejectAllListener {
    fn connection_established(&mut self) -> AcceptDecision {
        AcceptDecision::Reject
    }
}

/// Drive a fresh engine through an active-open three-way handshake and
/// return it already `ESTABLISHED`, with both sequence numbers known, so
/// scenario tests can start from steady state instead of repeating the
/// handshake dance inline.
pub fn establish_client<const OOS: usize>(
    local: Ipv4Addr,
    remote: Ipv4Addr,
    remote_port: u16,
    rcv_wnd: u32,
) -> (
    TcpEngine<OOS, RecordingSender>,
    RecordingSender,
    ConnectionHandle,
    EventLog,
    TcpSeqNumber,
    TcpSeqNumber,
) {
    // Scenario tests run with `RUST_LOG=embedded_tcp=trace cargo test -- --nocapture`
    // to see the same net_trace!/net_debug! output a host binary would get;
    // harmless to call more than once across the test binary's #[test] fns.
    let _ = env_logger::builder().is_test(true).try_init();

    let sender = RecordingSender::new();
    let mut engine: TcpEngine<OOS, RecordingSender> =
        TcpEngine::new(local, 4, 2, 4, sender.clone(), EngineConfig::default());

    let log = EventLog::new();
    let handle = engine
        .new_connection(16384, 16384, Box::new(log.handler()))
        .unwrap();
    engine
        .start_connection(handle, remote, remote_port, rcv_wnd, Instant::ZERO)
        .unwrap();

    let syn = sender.pop().expect("SYN not sent");
    let syn_repr = syn.repr();
    let iss = syn_repr.seq_number;
    let peer_iss = TcpSeqNumber(777_000);

    let syn_ack = build_segment(
        remote,
        local,
        remote_port,
        syn_repr.src_port,
        peer_iss,
        Some(iss + 1),
        TcpFlags::syn().with_ack(true),
        16384,
        Some(1460),
        Some(6),
        &[],
    );
    engine.receive(remote, local, &syn_ack, Instant::from_millis(10));
    sender.pop().expect("final ACK of handshake not sent");

    assert_eq!(log.events(), vec![Event::Established]);
    (engine, sender, handle, log, iss + 1, peer_iss + 1)
}
