//! Timer-expiry dispatch (§5): the single entry point the host's event loop
//! calls once per tick to let armed `Abrt`/`Output`/`Rtx` timers fire.

use crate::engine::TcpEngine;
use crate::pcb::{State, TimerKind};
use crate::phy::IpSender;
use crate::time::Instant;

impl<const OOS: usize, S: IpSender> TcpEngine<OOS, S> {
    /// Poll every PCB's timers against `now`, firing whatever has expired.
    /// Cheap to call more often than necessary (§5 "a timer that has already
    /// fired but whose handler has not run is indistinguishable from an
    /// armed timer") — a tick that finds nothing expired is a no-op per PCB.
    pub fn poll(&mut self, now: Instant) {
        for idx in 0..self.pcbs.len() {
            if self.pcbs[idx].state == State::Closed {
                continue;
            }
            let fired: heapless::Vec<TimerKind, 3> = self.pcbs[idx].timers.poll_expired(now).collect();
            for kind in fired {
                self.dispatch_timer(idx, kind, now);
                if self.pcbs[idx].state == State::Closed {
                    break;
                }
            }
        }
    }

    /// Earliest deadline across every live PCB, for a host that wants to
    /// sleep until the next timer is due rather than poll on a fixed tick.
    pub fn next_poll_deadline(&self) -> Option<Instant> {
        self.pcbs
            .iter()
            .filter(|pcb| pcb.state != State::Closed)
            .filter_map(|pcb| pcb.timers.next_deadline())
            .min()
    }

    fn dispatch_timer(&mut self, pcb_idx: usize, kind: TimerKind, now: Instant) {
        match kind {
            TimerKind::Rtx => self.rtx_timeout(pcb_idx, now),
            TimerKind::Output => self.output_retry(pcb_idx, now),
            TimerKind::Abrt => self.abrt_timeout(pcb_idx, now),
        }
    }

    /// `OutputTimer` expiry (§4.5 "Transient send failure" retry): resend
    /// whatever a previous `emit_segment` failure left unsent.
    fn output_retry(&mut self, pcb_idx: usize, now: Instant) {
        self.pcbs[pcb_idx].flags.set_out_retry(false);
        match self.pcbs[pcb_idx].state {
            State::SynSent => self.send_syn(pcb_idx, now),
            State::SynRcvd => self.send_syn_ack(pcb_idx, now),
            _ => self.output_queued(pcb_idx, true, now),
        }
    }

    /// `AbrtTimer` expiry: `SYN_SENT`/`SYN_RCVD`/`AbandonedTimeoutTicks`/
    /// `TIME_WAIT` deadlines all funnel through `abort_pcb` (§4.7). No RST is
    /// sent when the peer never had an established connection to begin with,
    /// or already believes this side is gone (`TIME_WAIT`).
    fn abrt_timeout(&mut self, pcb_idx: usize, now: Instant) {
        let state = self.pcbs[pcb_idx].state;
        let send_rst = !matches!(state, State::SynSent | State::SynRcvd | State::TimeWait);
        self.abort_pcb(pcb_idx, send_rst, now);
    }
}
