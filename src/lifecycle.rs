//! The PCB lifecycle façade (§4.7): the handful of operations that create,
//! tear down, or hand off a PCB between its owning collaborators
//! (`Engine::new_connection`, `alloc_pcb`, a peer RST, an application
//! releasing a handle, or the three-way-handshake / close-sequence code in
//! `input.rs`).

use crate::config::{self, ABANDONED_TIMEOUT, SYN_SENT_TIMEOUT, TIME_WAIT_TIME};
use crate::connection::{ConnState, ConnectionHandle};
use crate::engine::TcpEngine;
use crate::error::{Result, TcpError};
use crate::pcb::{Attachment, FourTuple, State, TimerKind};
use crate::phy::IpSender;
use crate::time::Instant;
use crate::wire::{IpAddress, TcpSeqNumber as SeqNumber};

impl<const OOS: usize, S: IpSender> TcpEngine<OOS, S> {
    /// Active open (§4.7 "create_connection"): allocate a PCB, pick an
    /// ephemeral port, move the connection to `SYN_SENT`, and send the SYN.
    pub fn start_connection(
        &mut self,
        handle: ConnectionHandle,
        remote_addr: IpAddress,
        remote_port: u16,
        rcv_wnd: u32,
        now: Instant,
    ) -> Result<()> {
        if self.connection_slot(handle).state != ConnState::Init {
            return Err(TcpError::InvalidState);
        }

        let local_addr = self.local_addr;
        let local_port = self
            .alloc_ephemeral_port(local_addr, remote_addr, remote_port)
            .ok_or(TcpError::NoPortAvail)?;

        let idx = self.alloc_pcb(now)?;
        let tuple = FourTuple {
            remote_port,
            remote_addr,
            local_port,
            local_addr,
        };

        {
            let iss = SeqNumber(self.rand.rand_u32());
            let pcb = &mut self.pcbs[idx];
            pcb.state = State::SynSent;
            pcb.tuple = Some(tuple);
            pcb.attachment = Attachment::Connection(handle.0);
            pcb.snd_una = iss;
            pcb.snd_nxt = iss;
            pcb.rcv_nxt = SeqNumber(0);
            // §4.7 "initial receive window is 1 + min(UINT16_MAX - 1, rcv_wnd)".
            pcb.rcv_ann_wnd = 1 + rcv_wnd.min(0xFFFE);
            pcb.rcv_ann_thres = self.config.default_wnd_ann_threshold;
            pcb.rcv_wnd_shift = config::DEFAULT_RCV_WND_SHIFT;
            pcb.base_snd_mss = self
                .config
                .interface_mtu
                .saturating_sub(config::HEADER_SIZE as u16);
            pcb.snd_mss = pcb.base_snd_mss.max(config::MIN_ALLOWED_MSS);
            pcb.pmtu = Some(self.config.interface_mtu);
            pcb.timers.arm(TimerKind::Abrt, now, SYN_SENT_TIMEOUT);
            pcb.timers.arm(TimerKind::Rtx, now, pcb.rto);
        }

        self.index_insert_active(tuple, idx);
        self.mark_referenced(idx);

        let slot = self.connection_slot_mut(handle);
        slot.pcb = Some(idx);
        slot.state = ConnState::Connected;

        self.send_syn(idx, now);
        Ok(())
    }

    /// Release a connection handle (§4.7 "con_abandoned", invoked from the
    /// application side). If no PCB is attached (still `Init`, or the PCB
    /// already detached on its own) the slot is freed immediately;
    /// otherwise `con_abandoned` decides the PCB's fate and the slot is
    /// freed once that PCB no longer needs its buffers.
    pub fn release_connection(&mut self, handle: ConnectionHandle, now: Instant) {
        if self.connection_slot(handle).abandoned {
            return;
        }
        match self.connection_slot(handle).pcb {
            Some(pcb_idx) => {
                self.connection_slot_mut(handle).abandoned = true;
                self.con_abandoned(pcb_idx, now);
            }
            None => {
                self.connections[handle.0] = None;
            }
        }
    }

    /// §4.7 "con_abandoned(pcb, snd_buf_nonempty)": the application let go
    /// of its handle while a PCB was still attached.
    pub(crate) fn con_abandoned(&mut self, pcb_idx: usize, now: Instant) {
        let ci = match self.pcbs[pcb_idx].attachment.connection_index() {
            Some(ci) => ci,
            None => return,
        };
        let state = self.pcbs[pcb_idx].state;
        let unsent_remains = self.send_buf_len(pcb_idx) > self.pcbs[pcb_idx].flight_size() as usize;

        if state == State::SynSent || unsent_remains {
            let send_rst = state != State::SynSent;
            self.abort_pcb(pcb_idx, send_rst, now);
            return;
        }

        self.connections[ci].as_mut().unwrap().sending_closed = true;
        self.pcbs[pcb_idx]
            .timers
            .arm(TimerKind::Abrt, now, ABANDONED_TIMEOUT);
        self.output_queued(pcb_idx, true, now);
    }

    /// §4.7 "abort(pcb, send_rst)".
    pub(crate) fn abort_pcb(&mut self, pcb_idx: usize, send_rst: bool, now: Instant) {
        if send_rst {
            self.send_rst_for_pcb(pcb_idx, now);
        }

        match self.pcbs[pcb_idx].attachment {
            Attachment::Connection(ci) => {
                self.sync_cached_vars(pcb_idx, ci);
                let abandoned = self.connections[ci].as_ref().unwrap().abandoned;
                if abandoned {
                    self.connections[ci] = None;
                } else {
                    let slot = self.connections[ci].as_mut().unwrap();
                    slot.pcb = None;
                    slot.state = ConnState::Closed;
                    slot.handler.connection_aborted();
                }
            }
            Attachment::Listener(li) => {
                if let Some(listener) = self.listeners[li].as_mut() {
                    if listener.accept_pcb == Some(pcb_idx) {
                        listener.accept_pcb = None;
                    }
                    listener.num_pcbs = listener.num_pcbs.saturating_sub(1);
                }
            }
            Attachment::None => {}
        }

        if let Some(tuple) = self.pcbs[pcb_idx].tuple {
            self.index_remove_active(&tuple);
            self.index_remove_time_wait(&tuple);
        }

        let pcb = &mut self.pcbs[pcb_idx];
        pcb.timers.cancel(TimerKind::Abrt);
        pcb.timers.cancel(TimerKind::Output);
        pcb.timers.cancel(TimerKind::Rtx);
        pcb.pmtu = None;
        pcb.attachment = Attachment::None;
        pcb.tuple = None;
        pcb.state = State::Closed;
        // §9 "Callback re-entrancy": any code still running further up this
        // call stack for this PCB must see that it was torn down.
        pcb.being_processed = false;

        self.mark_closed(pcb_idx);
    }

    /// Normal completion of the close sequence (`LAST_ACK` -> `CLOSED` on our
    /// own FIN being acked): the same bookkeeping as `abort_pcb`, but no RST
    /// and no `connection_aborted` callback — this is not an error (§4.7
    /// state-machine summary).
    pub(crate) fn finish_graceful_close(&mut self, pcb_idx: usize) {
        if let Attachment::Connection(ci) = self.pcbs[pcb_idx].attachment {
            self.sync_cached_vars(pcb_idx, ci);
            let abandoned = self.connections[ci].as_ref().unwrap().abandoned;
            if abandoned {
                self.connections[ci] = None;
            } else {
                let slot = self.connections[ci].as_mut().unwrap();
                slot.pcb = None;
                slot.state = ConnState::Closed;
            }
        }

        if let Some(tuple) = self.pcbs[pcb_idx].tuple {
            self.index_remove_active(&tuple);
        }

        let pcb = &mut self.pcbs[pcb_idx];
        pcb.timers.cancel(TimerKind::Abrt);
        pcb.timers.cancel(TimerKind::Output);
        pcb.timers.cancel(TimerKind::Rtx);
        pcb.pmtu = None;
        pcb.attachment = Attachment::None;
        pcb.tuple = None;
        pcb.state = State::Closed;
        pcb.being_processed = false;

        self.mark_closed(pcb_idx);
    }

    /// §4.7 "go_to_time_wait(pcb)".
    pub(crate) fn go_to_time_wait(&mut self, pcb_idx: usize, now: Instant) {
        if let Attachment::Connection(ci) = self.pcbs[pcb_idx].attachment {
            self.sync_cached_vars(pcb_idx, ci);
            let abandoned = self.connections[ci].as_ref().unwrap().abandoned;
            if abandoned {
                self.connections[ci] = None;
            } else {
                let slot = self.connections[ci].as_mut().unwrap();
                slot.pcb = None;
                slot.state = ConnState::Closed;
            }
        }

        let tuple = self.pcbs[pcb_idx]
            .tuple
            .expect("go_to_time_wait on PCB without tuple");

        let pcb = &mut self.pcbs[pcb_idx];
        pcb.attachment = Attachment::None;
        pcb.snd_nxt = pcb.snd_una;
        pcb.timers.cancel(TimerKind::Output);
        pcb.timers.cancel(TimerKind::Rtx);
        pcb.pmtu = None;
        pcb.state = State::TimeWait;
        pcb.timers.arm(TimerKind::Abrt, now, TIME_WAIT_TIME);

        self.index_remove_active(&tuple);
        self.index_insert_time_wait(tuple, pcb_idx);
    }

    /// Copy the live PCB's sender/RTT variables into its attached
    /// Connection slot before detaching (§9 "Retransmission variables
    /// shadowed on both PCB and Connection... survive PCB abandonment").
    fn sync_cached_vars(&mut self, pcb_idx: usize, ci: usize) {
        let pcb = &self.pcbs[pcb_idx];
        let (snd_wnd, cwnd, ssthresh, rttvar, srtt, recover, cwnd_acked, rtt_test_seq) = (
            pcb.snd_wnd,
            pcb.cwnd,
            pcb.ssthresh,
            pcb.rttvar,
            pcb.srtt,
            pcb.recover,
            pcb.cwnd_acked,
            pcb.rtt_test_seq,
        );
        if let Some(slot) = self.connections[ci].as_mut() {
            slot.snd_wnd = snd_wnd;
            slot.cwnd = cwnd;
            slot.ssthresh = ssthresh;
            slot.rttvar = rttvar;
            slot.srtt = srtt;
            slot.recover = recover;
            slot.cwnd_acked = cwnd_acked;
            slot.rtt_test_seq = rtt_test_seq;
        }
    }
}
