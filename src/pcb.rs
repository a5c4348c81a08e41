//! The Protocol Control Block (§3): per-endpoint state, and the small typed
//! pieces (`State`, `Flags`, `Timers`, `Attachment`) the rest of the engine
//! builds on.
//!
//! Kept as one dense struct with a bitset of flags and a small state enum,
//! per §9's "Bit-packed flag field and states" guidance — named predicates
//! are exposed instead of raw bit tests, and the three per-PCB timers live
//! in a typed array indexed by [`TimerKind`] instead of three independent
//! fields.

use crate::storage::{OosBuffer, RingBuffer};
use crate::time::{Duration, Instant};
use crate::wire::{IpAddress, TcpSeqNumber as SeqNumber};

/// A PCB's lifecycle state (§3). `Closed` is never observable on a PCB that
/// still has an index entry (invariant: "a PCB never observably sits in
/// CLOSED with an index entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    LastAck,
    CloseWait,
    TimeWait,
}

impl State {
    /// Whether a PCB in this state may still accept inbound data into the
    /// receive buffer.
    pub fn accepts_data(self) -> bool {
        matches!(
            self,
            State::Established | State::FinWait1 | State::FinWait2
        )
    }

    /// Whether output (segmentation/retransmission) is legal in this state.
    pub fn permits_output(self) -> bool {
        matches!(
            self,
            State::Established
                | State::FinWait1
                | State::FinWait2
                | State::Closing
                | State::LastAck
                | State::CloseWait
        )
    }
}

/// The 4-tuple identifying a TCP endpoint pair (§3, §4.3). Stored in
/// `(remote_port, remote_addr, local_port, local_addr)` order in the index
/// per §4.3 — the `Ord`/`Hash` derive order follows the field declaration
/// order below, which matches that lookup-key shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourTuple {
    pub remote_port: u16,
    pub remote_addr: IpAddress,
    pub local_port: u16,
    pub local_addr: IpAddress,
}

/// What a PCB is currently attached to, per §9's "Union of Listener/
/// Connection pointer": a tagged sum instead of a C-union switched on state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    None,
    Listener(usize),
    Connection(usize),
}

impl Attachment {
    pub fn is_none(self) -> bool {
        matches!(self, Attachment::None)
    }

    pub fn connection_index(self) -> Option<usize> {
        match self {
            Attachment::Connection(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn listener_index(self) -> Option<usize> {
        match self {
            Attachment::Listener(idx) => Some(idx),
            _ => None,
        }
    }
}

/// The three named, cancelable, one-shot timers of §3/§5/§9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Abrt,
    Output,
    Rtx,
}

pub const TIMER_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSlot {
    pub expires_at: Option<Instant>,
}

impl TimerSlot {
    const fn idle() -> TimerSlot {
        TimerSlot { expires_at: None }
    }
}

/// A small typed array of the three per-PCB timers (§9 "Timer identity").
#[derive(Debug, Clone, Copy)]
pub struct Timers {
    slots: [TimerSlot; TIMER_COUNT],
}

impl Timers {
    pub const fn new() -> Timers {
        Timers {
            slots: [TimerSlot::idle(); TIMER_COUNT],
        }
    }

    pub fn arm(&mut self, kind: TimerKind, now: Instant, after: Duration) {
        self.slots[kind as usize].expires_at = Some(now + after);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.slots[kind as usize].expires_at = None;
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind as usize].expires_at.is_some()
    }

    pub fn expires_at(&self, kind: TimerKind) -> Option<Instant> {
        self.slots[kind as usize].expires_at
    }

    /// Returns every timer kind whose deadline is at or before `now`, firing
    /// (and clearing) each such slot. A caller re-checks preconditions in
    /// its handler per §5 ("a timer that has already fired but whose
    /// handler has not run is indistinguishable from an armed timer").
    pub fn poll_expired(&mut self, now: Instant) -> impl Iterator<Item = TimerKind> {
        let mut fired = heapless::Vec::<TimerKind, TIMER_COUNT>::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if let Some(at) = slot.expires_at {
                if at <= now {
                    slot.expires_at = None;
                    let kind = match idx {
                        0 => TimerKind::Abrt,
                        1 => TimerKind::Output,
                        _ => TimerKind::Rtx,
                    };
                    let _ = fired.push(kind);
                }
            }
        }
        fired.into_iter()
    }

    /// Earliest pending deadline across all three timers, if any is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().filter_map(|s| s.expires_at).min()
    }
}

impl Default for Timers {
    fn default() -> Timers {
        Timers::new()
    }
}

/// The bitset of §3. Named predicates (`is_xxx`/`set_xxx`) are the public
/// surface; the raw bits never leak past this module, per §9's "Bit-packed
/// flag field" guidance (the same shape as [`crate::wire::TcpFlags`]).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags(u16);

macro_rules! flag_bit {
    ($is:ident, $set:ident, $bit:expr) => {
        pub const fn $is(self) -> bool {
            self.0 & $bit != 0
        }
        pub fn $set(&mut self, v: bool) {
            if v {
                self.0 |= $bit;
            } else {
                self.0 &= !$bit;
            }
        }
    };
}

impl Flags {
    const ACK_PENDING: u16 = 1 << 0;
    const OUT_PENDING: u16 = 1 << 1;
    const FIN_SENT: u16 = 1 << 2;
    const FIN_PENDING: u16 = 1 << 3;
    const RTT_PENDING: u16 = 1 << 4;
    const RTT_VALID: u16 = 1 << 5;
    const CWND_INCRD: u16 = 1 << 6;
    const RTX_ACTIVE: u16 = 1 << 7;
    const RECOVER: u16 = 1 << 8;
    const IDLE_TIMER: u16 = 1 << 9;
    const WND_SCALE: u16 = 1 << 10;
    const CWND_INIT: u16 = 1 << 11;
    const OUT_RETRY: u16 = 1 << 12;
    const RCV_WND_UPD: u16 = 1 << 13;

    pub const fn empty() -> Flags {
        Flags(0)
    }

    flag_bit!(is_ack_pending, set_ack_pending, Self::ACK_PENDING);
    flag_bit!(is_out_pending, set_out_pending, Self::OUT_PENDING);
    flag_bit!(is_fin_sent, set_fin_sent, Self::FIN_SENT);
    flag_bit!(is_fin_pending, set_fin_pending, Self::FIN_PENDING);
    flag_bit!(is_rtt_pending, set_rtt_pending, Self::RTT_PENDING);
    flag_bit!(is_rtt_valid, set_rtt_valid, Self::RTT_VALID);
    flag_bit!(is_cwnd_incrd, set_cwnd_incrd, Self::CWND_INCRD);
    flag_bit!(is_rtx_active, set_rtx_active, Self::RTX_ACTIVE);
    flag_bit!(is_recover, set_recover, Self::RECOVER);
    flag_bit!(is_idle_timer, set_idle_timer, Self::IDLE_TIMER);
    flag_bit!(is_wnd_scale, set_wnd_scale, Self::WND_SCALE);
    flag_bit!(is_cwnd_init, set_cwnd_init, Self::CWND_INIT);
    flag_bit!(is_out_retry, set_out_retry, Self::OUT_RETRY);
    flag_bit!(is_rcv_wnd_upd, set_rcv_wnd_upd, Self::RCV_WND_UPD);
}

/// A Protocol Control Block: all mutable state for one TCP endpoint (§3).
/// `OOS` is the fixed out-of-sequence hole capacity shared by every PCB in
/// the pool (§4.3 "fixed-capacity array... pre-allocated at engine init").
#[derive(Debug)]
pub struct Pcb<const OOS: usize> {
    pub state: State,
    pub tuple: Option<FourTuple>,
    pub attachment: Attachment,
    pub flags: Flags,
    pub timers: Timers,

    // Sender variables.
    pub snd_una: SeqNumber,
    pub snd_nxt: SeqNumber,
    pub snd_wnd: u32,
    pub snd_wl1: SeqNumber,
    pub snd_wl2: SeqNumber,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub cwnd_acked: u32,
    pub recover: SeqNumber,
    pub snd_mss: u16,
    pub base_snd_mss: u16,
    pub snd_wnd_shift: u8,

    // Receiver variables.
    pub rcv_nxt: SeqNumber,
    pub rcv_ann_wnd: u32,
    pub rcv_ann_thres: u32,
    pub rcv_wnd_shift: u8,
    pub ooseq: OosBuffer<OOS>,

    // RTT / retransmit.
    pub srtt: u32,
    pub rttvar: u32,
    pub rto: Duration,
    pub rtt_test_seq: Option<SeqNumber>,
    pub rtt_test_time: Instant,
    pub num_dupack: u8,

    /// Current PMTU reference for this PCB's destination, if one has been
    /// established (§4.7 "set up the PMTU reference").
    pub pmtu: Option<u16>,

    /// Set for the lifetime of an application callback invocation this PCB
    /// is the subject of; cleared by every abort path so later code in the
    /// same call stack can detect that the callback tore the PCB down
    /// (§5 "Suspension points: none", §9 "Callback re-entrancy").
    pub being_processed: bool,
}

impl<const OOS: usize> Pcb<OOS> {
    pub fn new() -> Pcb<OOS> {
        Pcb {
            state: State::Closed,
            tuple: None,
            attachment: Attachment::None,
            flags: Flags::empty(),
            timers: Timers::new(),
            snd_una: SeqNumber(0),
            snd_nxt: SeqNumber(0),
            snd_wnd: 0,
            snd_wl1: SeqNumber(0),
            snd_wl2: SeqNumber(0),
            cwnd: 0,
            ssthresh: crate::config::MAX_WINDOW,
            cwnd_acked: 0,
            recover: SeqNumber(0),
            snd_mss: crate::config::MIN_ALLOWED_MSS,
            base_snd_mss: crate::config::MIN_ALLOWED_MSS,
            snd_wnd_shift: 0,
            rcv_nxt: SeqNumber(0),
            rcv_ann_wnd: 0,
            rcv_ann_thres: crate::config::DEFAULT_WND_ANN_THRESHOLD,
            rcv_wnd_shift: 0,
            ooseq: OosBuffer::new(),
            srtt: 0,
            rttvar: 0,
            rto: crate::config::INITIAL_RTX_TIME,
            rtt_test_seq: None,
            rtt_test_time: Instant::ZERO,
            num_dupack: 0,
            pmtu: None,
            being_processed: false,
        }
    }

    /// Reset a pool slot back to its just-constructed, fully idle form
    /// before handing it to a new allocation (§4.3 "Return the now-closed
    /// PCB to the caller to initialize").
    pub fn reset(&mut self) {
        *self = Pcb::new();
    }

    pub fn flight_size(&self) -> u32 {
        (self.snd_nxt - self.snd_una).max(0) as u32
    }

    /// Bytes of the peer's window still unused, relative to `snd_una`.
    pub fn remaining_peer_window(&self) -> u32 {
        self.snd_wnd.saturating_sub(self.flight_size())
    }
}

impl<const OOS: usize> Default for Pcb<OOS> {
    fn default() -> Self {
        Pcb::new()
    }
}
