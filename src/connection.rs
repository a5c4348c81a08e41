//! The Connection handle of §3/§6: the application-facing side of an
//! established or in-progress TCP endpoint.
//!
//! §9 flags the source's pointer-heavy Connection/PCB coupling for
//! re-architecture ("externalized structures keyed by... index into a flat
//! array"). This rewrite applies that same principle one level up: rather
//! than the application owning a self-referential object that points into
//! the engine's PCB pool, the engine owns the connection's buffers and
//! cached variables in its own fixed-capacity pool, and the application
//! holds a lightweight, `Copy` [`ConnectionHandle`] into it — the same
//! handle-into-a-pool shape §4.3 already mandates for PCBs themselves.

use crate::storage::RingBuffer;
use crate::wire::TcpSeqNumber as SeqNumber;

/// Application-supplied callbacks for one connection (§6 "Connection
/// (pure virtual)"). `connection_aborted` has no useful default — every
/// connection must decide what "the peer is gone" means to it — while the
/// others are no-ops unless overridden, matching the source's defaults.
pub trait ConnectionHandler {
    /// Fired once on the active-open side when the handshake completes.
    /// The passive-open side learns of establishment through
    /// [`crate::listener::ListenerHandler::connection_established`] instead.
    fn connection_established(&mut self) {}

    /// Mandatory: the PCB backing this connection reached `Closed`, whether
    /// from a peer RST, a local abort, or the `AbandonedTimeoutTicks`
    /// deadline expiring.
    fn connection_aborted(&mut self);

    /// `amount == 0` signals the peer's FIN: no more bytes will ever follow.
    fn data_received(&mut self, amount: usize);

    /// `amount == 0` signals that a previously queued FIN was acknowledged.
    fn data_sent(&mut self, amount: usize);
}

/// Lifecycle of a connection handle (§3 "May be INIT... CONNECTED...
/// CLOSED").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Init,
    Connected,
    Closed,
}

/// A lightweight, `Copy` reference to a connection living in the engine's
/// connection pool. Analogous to a `PcbIndex`, but for the Connection side
/// of the attachment described in §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle(pub(crate) usize);

/// The engine-owned data behind a [`ConnectionHandle`]: buffers, flags and
/// the cached sender/RTT variables §9 notes are "shadowed on both PCB and
/// Connection" so they survive PCB abandonment.
pub(crate) struct ConnectionSlot {
    pub state: ConnState,
    pub pcb: Option<usize>,
    pub handler: Box<dyn ConnectionHandler>,

    pub recv_buf: RingBuffer,
    pub send_buf: RingBuffer,
    /// Byte offset into `send_buf` at/after which a `PSH` must be emitted
    /// (set by `sendPush`, §6).
    pub push_index: usize,
    pub sending_closed: bool,
    pub end_received: bool,
    pub end_sent: bool,
    pub wnd_update_threshold: u32,
    /// Set once the application has released this handle while a PCB is
    /// still attached; the slot itself is freed by `con_abandoned`/
    /// `abort_pcb`/`go_to_time_wait` once that PCB no longer needs the
    /// buffers (§4.7 "con_abandoned").
    pub abandoned: bool,

    // Cached copies that outlive PCB abandonment (§9).
    pub snd_wnd: u32,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub rttvar: u32,
    pub srtt: u32,
    pub recover: SeqNumber,
    pub cwnd_acked: u32,
    pub rtt_test_seq: Option<SeqNumber>,
}

impl ConnectionSlot {
    pub fn new(
        recv_capacity: usize,
        send_capacity: usize,
        handler: Box<dyn ConnectionHandler>,
        wnd_update_threshold: u32,
    ) -> ConnectionSlot {
        ConnectionSlot {
            state: ConnState::Init,
            pcb: None,
            handler,
            recv_buf: RingBuffer::new(recv_capacity),
            send_buf: RingBuffer::new(send_capacity),
            push_index: 0,
            sending_closed: false,
            end_received: false,
            end_sent: false,
            wnd_update_threshold,
            abandoned: false,
            snd_wnd: 0,
            cwnd: 0,
            ssthresh: crate::config::MAX_WINDOW,
            rttvar: 0,
            srtt: 0,
            recover: SeqNumber(0),
            cwnd_acked: 0,
            rtt_test_seq: None,
        }
    }
}
