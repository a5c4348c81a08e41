//! The input engine (§4.6): demultiplexing, the handshake/close state
//! machine, window admission, ACK accounting and data delivery for every
//! inbound segment.
//!
//! Each entry point follows the same shape: mutate what the segment dictates,
//! then call [`TcpEngine::run_deferred_effects`] once at the end so a single
//! segment never emits more than the one coalesced reply it would under a
//! real socket (an ACK piggybacked on output, or a standalone one).

use crate::config::{self, FAST_RTX_DUP_ACKS};
use crate::connection::ConnState;
use crate::engine::TcpEngine;
use crate::macros::{net_debug, net_trace, net_warn};
use crate::pcb::{Attachment, FourTuple, State, TimerKind};
use crate::phy::IpSender;
use crate::time::Instant;
use crate::wire::{IpAddress, TcpPacket, TcpRepr, TcpSeqNumber as SeqNumber};

impl<const OOS: usize, S: IpSender> TcpEngine<OOS, S> {
    /// Entry point for one inbound TCP segment addressed to `local_addr`
    /// (§2 "inbound segment", §4.6 step 1 "Demultiplex"). Malformed segments
    /// and checksum failures are dropped silently (§6).
    pub fn receive(&mut self, remote_addr: IpAddress, local_addr: IpAddress, data: &[u8], now: Instant) {
        let packet = match TcpPacket::new_checked(data) {
            Ok(p) => p,
            Err(_) => return,
        };
        let repr = match TcpRepr::parse(&packet, &remote_addr, &local_addr) {
            Ok(r) => r,
            Err(_) => return,
        };
        let payload = packet.payload();

        let tuple = FourTuple {
            remote_port: repr.src_port,
            remote_addr,
            local_port: repr.dst_port,
            local_addr,
        };

        if let Some(idx) = self.find_pcb(&tuple) {
            self.process_for_pcb(idx, &repr, payload, now);
            return;
        }

        match self.find_listener(local_addr, repr.dst_port) {
            Some(listener_idx) => self.listener_accept_syn(listener_idx, tuple, &repr, now),
            None => {
                if !repr.flags.is_rst() {
                    net_trace!("no PCB or listener for {}, sending RST", repr);
                    self.send_rst_reply(local_addr, remote_addr, &repr);
                }
            }
        }
    }

    fn find_listener(&self, local_addr: IpAddress, local_port: u16) -> Option<usize> {
        self.listeners
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.as_ref().map(|l| (i, l)))
            .filter(|(_, l)| l.matches(local_addr, local_port))
            .max_by_key(|(_, l)| l.specificity())
            .map(|(i, _)| i)
    }

    /// §4.6 step 2 "RST/SYN triage" through step 6, for a segment matching an
    /// existing PCB (active or TIME_WAIT).
    fn process_for_pcb(&mut self, pcb_idx: usize, repr: &TcpRepr, payload: &[u8], now: Instant) {
        if repr.flags.is_rst() {
            self.handle_rst(pcb_idx, repr, now);
            return;
        }

        if repr.flags.is_syn() {
            let state = self.pcbs[pcb_idx].state;
            let confirms_handshake = matches!(state, State::SynSent | State::SynRcvd) && repr.ack_number.is_some();
            if !confirms_handshake {
                if state == State::SynRcvd && repr.seq_number + 1 == self.pcbs[pcb_idx].rcv_nxt {
                    // The peer's SYN-ACK never arrived; it resent the SYN.
                    self.pcbs[pcb_idx]
                        .timers
                        .arm(TimerKind::Abrt, now, config::SYN_RCVD_TIMEOUT);
                    self.send_syn_ack(pcb_idx, now);
                } else {
                    self.send_challenge_ack(pcb_idx, now);
                }
                return;
            }
        } else if !repr.flags.is_ack() {
            return;
        }

        let state = self.pcbs[pcb_idx].state;
        if matches!(state, State::SynSent | State::SynRcvd) {
            self.handle_syn_transition(pcb_idx, repr, now);
            return;
        }

        self.process_general(pcb_idx, repr, payload, now);
    }

    /// §4.6 "RST handling": differs by state because `SYN_SENT` has no
    /// sequence space established yet to test the RST against.
    fn handle_rst(&mut self, pcb_idx: usize, repr: &TcpRepr, now: Instant) {
        if self.pcbs[pcb_idx].state == State::SynSent {
            if let Some(ack) = repr.ack_number {
                let snd_una = self.pcbs[pcb_idx].snd_una;
                let snd_nxt = self.pcbs[pcb_idx].snd_nxt;
                if ack > snd_una && ack <= snd_nxt {
                    self.abort_pcb(pcb_idx, false, now);
                }
            }
            return;
        }

        let rcv_nxt = self.pcbs[pcb_idx].rcv_nxt;
        if repr.seq_number == rcv_nxt {
            self.abort_pcb(pcb_idx, false, now);
            return;
        }

        // RFC 5961 blind-reset mitigation: only a RST that falls in-window
        // but off the exact expected sequence gets a challenge ACK rather
        // than silent acceptance or silent drop.
        let eff_wnd = self.effective_rcv_wnd(pcb_idx) + 1;
        if repr.seq_number.in_window(rcv_nxt, eff_wnd) {
            self.send_challenge_ack(pcb_idx, now);
        }
    }

    /// The larger of the announced window and the buffer's real free space,
    /// so a peer that has not yet heard our latest window update is not
    /// unnecessarily penalized (§4.6 "effective receive window").
    fn effective_rcv_wnd(&self, pcb_idx: usize) -> u32 {
        let pcb = &self.pcbs[pcb_idx];
        let free = (self.recv_free(pcb_idx) as u32).min(config::MAX_WINDOW);
        pcb.rcv_ann_wnd.max(free)
    }

    fn recv_free(&self, pcb_idx: usize) -> usize {
        match self.pcbs[pcb_idx].attachment.connection_index() {
            Some(ci) => self.connections[ci].as_ref().unwrap().recv_buf.window(),
            None => 0,
        }
    }

    /// §4.4 "Listener & acceptor": a SYN with no matching PCB, addressed to a
    /// registered listener.
    fn listener_accept_syn(&mut self, listener_idx: usize, tuple: FourTuple, repr: &TcpRepr, now: Instant) {
        if !repr.flags.is_syn() || repr.flags.is_rst() || repr.flags.is_ack() || repr.flags.is_fin() {
            if !repr.flags.is_rst() {
                self.send_rst_reply(tuple.local_addr, tuple.remote_addr, repr);
            }
            return;
        }

        let listener = self.listeners[listener_idx].as_ref().unwrap();
        if listener.num_pcbs >= listener.max_pcbs {
            net_warn!("listener {} backlog full, refusing SYN", listener_idx);
            self.send_rst_reply(tuple.local_addr, tuple.remote_addr, repr);
            return;
        }
        let initial_rcv_wnd = listener.initial_rcv_wnd;

        let idx = match self.alloc_pcb(now) {
            Ok(idx) => idx,
            Err(_) => {
                net_warn!("no PCB available to accept SYN on listener {}", listener_idx);
                self.send_rst_reply(tuple.local_addr, tuple.remote_addr, repr);
                return;
            }
        };

        let iss = SeqNumber(self.rand.rand_u32());
        let interface_mtu = self.config.interface_mtu;
        let from_mtu = interface_mtu.saturating_sub(config::HEADER_SIZE as u16);
        let base_mss = match repr.max_seg_size {
            Some(peer_mss) => from_mtu.min(peer_mss),
            None => from_mtu,
        }
        .max(config::MIN_ALLOWED_MSS);

        {
            let pcb = &mut self.pcbs[idx];
            pcb.state = State::SynRcvd;
            pcb.tuple = Some(tuple);
            pcb.attachment = Attachment::Listener(listener_idx);
            pcb.snd_una = iss;
            pcb.snd_nxt = iss;
            pcb.rcv_nxt = repr.seq_number + 1;
            // §4.7 "initial receive window is 1 + min(UINT16_MAX - 1, rcv_wnd)".
            pcb.rcv_ann_wnd = 1 + initial_rcv_wnd.min(0xFFFE);
            pcb.rcv_ann_thres = self.config.default_wnd_ann_threshold;
            pcb.rcv_wnd_shift = config::DEFAULT_RCV_WND_SHIFT;
            if let Some(shift) = repr.window_scale {
                pcb.flags.set_wnd_scale(true);
                pcb.snd_wnd_shift = shift;
            }
            pcb.base_snd_mss = base_mss;
            pcb.snd_mss = base_mss;
            pcb.timers.arm(TimerKind::Abrt, now, config::SYN_RCVD_TIMEOUT);
            pcb.timers.arm(TimerKind::Rtx, now, pcb.rto);
        }

        self.index_insert_active(tuple, idx);
        // Not yet owned by anything; eligible for eviction until the peer's
        // ACK completes the handshake and `complete_listener_accept` claims
        // it via `mark_referenced`.
        self.mark_unreferenced(idx);
        if let Some(listener) = self.listeners[listener_idx].as_mut() {
            listener.num_pcbs += 1;
        }

        self.send_syn_ack(idx, now);
    }

    /// §4.6 "SYN_SENT/SYN_RCVD transition": the segment that completes the
    /// three-way handshake on either side.
    fn handle_syn_transition(&mut self, pcb_idx: usize, repr: &TcpRepr, now: Instant) {
        let state = self.pcbs[pcb_idx].state;
        let snd_una = self.pcbs[pcb_idx].snd_una;
        let snd_nxt = self.pcbs[pcb_idx].snd_nxt;
        let ack = match repr.ack_number {
            Some(a) => a,
            None => return,
        };
        if !(ack == snd_nxt && snd_nxt == snd_una + 1) {
            return;
        }

        {
            let pcb = &mut self.pcbs[pcb_idx];
            pcb.timers.cancel(TimerKind::Abrt);
            pcb.timers.cancel(TimerKind::Rtx);
            pcb.snd_una = ack;
            pcb.snd_wnd = repr.window_len as u32;
            pcb.snd_wl1 = repr.seq_number;
            pcb.snd_wl2 = ack;
        }

        if state == State::SynSent {
            net_debug!("pcb {} SYN_SENT -> ESTABLISHED", pcb_idx);
            let pcb = &mut self.pcbs[pcb_idx];
            pcb.rcv_nxt = repr.seq_number + 1;
            pcb.rcv_ann_wnd = pcb.rcv_ann_wnd.saturating_sub(1);
            pcb.state = State::Established;
            if let Some(peer_mss) = repr.max_seg_size {
                pcb.base_snd_mss = pcb.base_snd_mss.min(peer_mss).max(config::MIN_ALLOWED_MSS);
            }
            match repr.window_scale {
                Some(shift) => {
                    pcb.flags.set_wnd_scale(true);
                    pcb.snd_wnd_shift = shift;
                }
                None => pcb.rcv_wnd_shift = 0,
            }
        } else {
            self.pcbs[pcb_idx].pmtu = Some(self.config.interface_mtu);
        }

        let pmtu = self.pcbs[pcb_idx].pmtu.unwrap_or(self.config.interface_mtu);
        {
            let pcb = &mut self.pcbs[pcb_idx];
            let from_pmtu = pmtu.saturating_sub(config::HEADER_SIZE as u16);
            pcb.snd_mss = pcb.base_snd_mss.min(from_pmtu).max(config::MIN_ALLOWED_MSS);
            pcb.rtt_test_seq = None;
            pcb.flags.set_rtt_pending(false);
            pcb.rto = config::INITIAL_RTX_TIME;
            pcb.cwnd = config::calc_initial_cwnd(pcb.snd_mss);
            pcb.ssthresh = config::MAX_WINDOW;
            pcb.flags.set_cwnd_init(true);
            pcb.cwnd_acked = 0;
            pcb.flags.set_ack_pending(true);
        }

        // The application may have called `close_sending` on an active-open
        // Connection while it was still SYN_SENT.
        if state == State::SynSent && self.fin_requested_before_established(pcb_idx) {
            let pcb = &mut self.pcbs[pcb_idx];
            pcb.state = State::FinWait1;
            pcb.flags.set_fin_pending(true);
        }

        if self.send_buf_len(pcb_idx) > 0 {
            self.pcbs[pcb_idx].flags.set_out_pending(true);
        }

        self.pcbs[pcb_idx].being_processed = true;
        match state {
            State::SynSent => self.fire_connection_established(pcb_idx),
            State::SynRcvd => self.complete_listener_accept(pcb_idx, now),
            _ => unreachable!("handle_syn_transition only runs for SYN_SENT/SYN_RCVD"),
        }
        if !self.pcbs[pcb_idx].being_processed {
            // The PCB was aborted (or rejected) from inside the callback.
            return;
        }
        self.pcbs[pcb_idx].being_processed = false;

        self.run_deferred_effects(pcb_idx, now);
    }

    fn fin_requested_before_established(&self, pcb_idx: usize) -> bool {
        match self.pcbs[pcb_idx].attachment.connection_index() {
            Some(ci) => self.connections[ci].as_ref().unwrap().sending_closed,
            None => false,
        }
    }

    fn fire_connection_established(&mut self, pcb_idx: usize) {
        if let Some(ci) = self.pcbs[pcb_idx].attachment.connection_index() {
            self.connections[ci].as_mut().unwrap().handler.connection_established();
        }
    }

    /// §4.4 "On acceptance completion": the listener's synchronous accept
    /// decision, then either claiming the PCB into a fresh Connection slot or
    /// aborting it.
    fn complete_listener_accept(&mut self, pcb_idx: usize, now: Instant) {
        let listener_idx = match self.pcbs[pcb_idx].attachment.listener_index() {
            Some(li) => li,
            None => return,
        };

        self.mark_referenced(pcb_idx);
        if let Some(listener) = self.listeners[listener_idx].as_mut() {
            listener.accept_pcb = Some(pcb_idx);
        }

        let decision = self.listeners[listener_idx]
            .as_mut()
            .unwrap()
            .handler
            .connection_established();

        if let Some(listener) = self.listeners[listener_idx].as_mut() {
            if listener.accept_pcb == Some(pcb_idx) {
                listener.accept_pcb = None;
            }
            listener.num_pcbs = listener.num_pcbs.saturating_sub(1);
        }

        match decision {
            crate::listener::AcceptDecision::Accept(handler, recv_capacity, send_capacity) => {
                let ci = match self.next_connection_slot() {
                    Some(ci) => ci,
                    None => {
                        self.abort_pcb(pcb_idx, true, now);
                        return;
                    }
                };
                self.connections[ci] = Some(crate::connection::ConnectionSlot::new(
                    recv_capacity,
                    send_capacity,
                    handler,
                    self.config.default_wnd_ann_threshold,
                ));
                {
                    let pcb = &mut self.pcbs[pcb_idx];
                    pcb.attachment = Attachment::Connection(ci);
                    pcb.state = State::Established;
                }
                let slot = self.connections[ci].as_mut().unwrap();
                slot.pcb = Some(pcb_idx);
                slot.state = ConnState::Connected;
            }
            crate::listener::AcceptDecision::Reject => {
                self.abort_pcb(pcb_idx, true, now);
            }
        }
    }

    /// §4.6 "General segment processing": window admission/trim, ACK
    /// validity, duplicate-ACK accounting and data acceptance for a PCB past
    /// the handshake.
    fn process_general(&mut self, pcb_idx: usize, repr: &TcpRepr, payload: &[u8], now: Instant) {
        if self.pcbs[pcb_idx].state == State::TimeWait {
            // §S5: any segment in TIME_WAIT just restarts the 2MSL timer and
            // gets a bare ACK; it does not touch sequence-space bookkeeping.
            self.pcbs[pcb_idx]
                .timers
                .arm(TimerKind::Abrt, now, config::TIME_WAIT_TIME);
            self.send_ack_empty(pcb_idx, now);
            return;
        }

        let rcv_nxt = self.pcbs[pcb_idx].rcv_nxt;
        let eff_wnd = self.effective_rcv_wnd(pcb_idx);

        let mut seg_seq = repr.seq_number;
        let mut data = payload;
        let mut fin = repr.flags.is_fin();

        let seg_total = data.len() as u32 + fin as u32;
        let acceptable = if seg_total == 0 {
            seg_seq.in_window(rcv_nxt, eff_wnd + 1)
        } else {
            let last = seg_seq + (seg_total as usize - 1);
            seg_seq.in_window(rcv_nxt, eff_wnd) || last.in_window(rcv_nxt, eff_wnd)
        };
        if !acceptable {
            self.send_ack_empty(pcb_idx, now);
            return;
        }

        // Trim the part of the segment, if any, that lies at or before
        // `rcv_nxt` (a retransmission we've already delivered).
        let delta = rcv_nxt - seg_seq;
        if delta > 0 {
            let delta = delta as usize;
            let orig_len = data.len();
            let trim = delta.min(orig_len);
            data = &data[trim..];
            seg_seq = rcv_nxt;
            if delta > orig_len {
                // The trim also consumed the FIN's sequence position.
                fin = false;
            }
        }
        // Trim the part, if any, that lies beyond the receive window.
        let distance = (seg_seq - rcv_nxt).max(0) as u32;
        let allowed = eff_wnd.saturating_sub(distance) as usize;
        if data.len() > allowed {
            data = &data[..allowed];
            fin = false;
        }

        let ack_num = match repr.ack_number {
            Some(a) => a,
            None => return,
        };
        let snd_una = self.pcbs[pcb_idx].snd_una;
        let snd_nxt = self.pcbs[pcb_idx].snd_nxt;
        if !(ack_num >= snd_una - config::MAX_ACK_BEFORE as usize && ack_num <= snd_nxt) {
            self.send_challenge_ack(pcb_idx, now);
            return;
        }

        let peer_wnd = (repr.window_len as u32) << self.pcbs[pcb_idx].snd_wnd_shift;

        // §4.6 step 4 accepts the wider range `[snd_una - MaxAckBefore, snd_nxt]`
        // only so old/reordered duplicate ACKs are tolerated rather than dropped;
        // `snd_una` itself must never move backward (invariant 1, P1). Only an
        // `ack_num` strictly after `snd_una` (modular "is after") is a new ACK.
        if ack_num > snd_una {
            let acked = (ack_num - snd_una) as u32;
            self.pcbs[pcb_idx].snd_una = ack_num;
            self.output_handle_acked(pcb_idx, ack_num, acked, now);
            self.apply_new_ack_side_effects(pcb_idx, ack_num, acked, now);
            if self.pcbs[pcb_idx].state == State::Closed {
                return;
            }
        } else if ack_num == snd_una {
            let is_dup = data.is_empty()
                && !fin
                && self.pcbs[pcb_idx].state.permits_output()
                && peer_wnd == self.pcbs[pcb_idx].snd_wnd;
            if is_dup {
                let pcb = &mut self.pcbs[pcb_idx];
                pcb.num_dupack = pcb.num_dupack.saturating_add(1);
                if pcb.num_dupack == FAST_RTX_DUP_ACKS {
                    self.enter_fast_retransmit(pcb_idx, now);
                }
            }
        }

        self.maybe_update_window(pcb_idx, repr.seq_number, ack_num, peer_wnd, now);

        if data.is_empty() && !fin {
            self.run_deferred_effects(pcb_idx, now);
            return;
        }

        if self.pcbs[pcb_idx].state.accepts_data() {
            self.accept_data(pcb_idx, seg_seq, data, fin, now);
            if self.pcbs[pcb_idx].state == State::Closed {
                return;
            }
        }

        self.run_deferred_effects(pcb_idx, now);
    }

    /// RFC 793's window-update rule, using [`SeqNumber`]'s modular `Ord` in
    /// place of the original's explicit-modulus comparison.
    fn maybe_update_window(&mut self, pcb_idx: usize, seq: SeqNumber, ack: SeqNumber, peer_wnd: u32, now: Instant) {
        let pcb = &self.pcbs[pcb_idx];
        let wl1 = pcb.snd_wl1;
        let wl2 = pcb.snd_wl2;
        let is_newer = seq > wl1 || (seq == wl1 && wl2 <= ack);
        if !is_newer {
            return;
        }
        let old_wnd = pcb.snd_wnd;
        {
            let pcb = &mut self.pcbs[pcb_idx];
            pcb.snd_wnd = peer_wnd;
            pcb.snd_wl1 = seq;
            pcb.snd_wl2 = ack;
        }
        if peer_wnd > old_wnd {
            self.pcbs[pcb_idx].flags.set_out_pending(true);
        }
        if old_wnd == 0 && peer_wnd > 0 {
            // The zero-window back-off no longer applies once the peer
            // reopens the window.
            self.pcbs[pcb_idx].rto = config::INITIAL_RTX_TIME;
        }
    }

    /// ACKed-bytes side effects beyond congestion control (§6 "dataSent
    /// callback", §4.7 state-machine "FIN acked" transitions): advance the
    /// send buffer's visible prefix, fire `data_sent`, and retire a fully
    /// acked FIN.
    fn apply_new_ack_side_effects(&mut self, pcb_idx: usize, ack_num: SeqNumber, acked: u32, now: Instant) {
        let ci = match self.pcbs[pcb_idx].attachment.connection_index() {
            Some(ci) => ci,
            None => return,
        };

        let fin_sent = self.pcbs[pcb_idx].flags.is_fin_sent();
        let snd_nxt = self.pcbs[pcb_idx].snd_nxt;
        let end_sent_already = self.connections[ci].as_ref().unwrap().end_sent;
        let fin_now_acked = fin_sent && ack_num == snd_nxt && !end_sent_already;

        let data_acked = if fin_now_acked { acked.saturating_sub(1) } else { acked };
        let advanced = {
            let slot = self.connections[ci].as_mut().unwrap();
            let n = (data_acked as usize).min(slot.send_buf.len());
            slot.send_buf.advance(n);
            slot.push_index = slot.push_index.saturating_sub(n);
            n
        };

        if advanced > 0 {
            self.pcbs[pcb_idx].being_processed = true;
            self.connections[ci].as_mut().unwrap().handler.data_sent(advanced);
            if !self.pcbs[pcb_idx].being_processed {
                return;
            }
            self.pcbs[pcb_idx].being_processed = false;
        }

        if !fin_now_acked {
            return;
        }

        self.connections[ci].as_mut().unwrap().end_sent = true;
        self.pcbs[pcb_idx].being_processed = true;
        self.connections[ci].as_mut().unwrap().handler.data_sent(0);
        if !self.pcbs[pcb_idx].being_processed {
            return;
        }
        self.pcbs[pcb_idx].being_processed = false;

        match self.pcbs[pcb_idx].state {
            State::FinWait1 => self.pcbs[pcb_idx].state = State::FinWait2,
            State::Closing => self.go_to_time_wait(pcb_idx, now),
            State::LastAck => self.finish_graceful_close(pcb_idx),
            _ => {}
        }
    }

    /// §4.6 "Data acceptance": the fast path (in-order, no buffered holes)
    /// copies straight into the receive ring; anything else goes through the
    /// out-of-sequence hole set.
    fn accept_data(&mut self, pcb_idx: usize, seg_seq: SeqNumber, data: &[u8], fin: bool, now: Instant) {
        let rcv_nxt = self.pcbs[pcb_idx].rcv_nxt;
        let data_offset = (seg_seq - rcv_nxt).max(0) as usize;

        let free = self.recv_free(pcb_idx);
        if data_offset + data.len() > free {
            // The peer sent past what we ever advertised we'd accept.
            net_debug!("receive window overrun, aborting pcb {}", pcb_idx);
            self.abort_pcb(pcb_idx, true, now);
            return;
        }

        let fast_path = data_offset == 0 && self.pcbs[pcb_idx].ooseq.is_nothing_buffered();
        if fast_path {
            let ci = self.pcbs[pcb_idx]
                .attachment
                .connection_index()
                .expect("accept_data on a PCB without a connection");
            let n = self.connections[ci].as_mut().unwrap().recv_buf.enqueue_slice(data);
            self.finish_accept(pcb_idx, n as u32, fin, now);
            return;
        }

        let (needs_ack, ok) =
            self.pcbs[pcb_idx]
                .ooseq
                .update_for_segment_received(rcv_nxt, seg_seq, data.len() as u32, fin);
        if !ok {
            // §7: an out-of-sequence FIN inconsistent with one already
            // buffered is fatal for this PCB.
            self.abort_pcb(pcb_idx, true, now);
            return;
        }
        if needs_ack {
            self.pcbs[pcb_idx].flags.set_ack_pending(true);
        }

        let ci = self.pcbs[pcb_idx]
            .attachment
            .connection_index()
            .expect("accept_data on a PCB without a connection");
        self.connections[ci].as_mut().unwrap().recv_buf.write_at(data_offset, data);

        let (avail, got_fin) = self.pcbs[pcb_idx].ooseq.shift_available(rcv_nxt);
        if avail > 0 {
            self.connections[ci].as_mut().unwrap().recv_buf.commit(avail as usize);
        }
        self.finish_accept(pcb_idx, avail, got_fin, now);
    }

    /// Advance `rcv_nxt` past newly-contiguous data and/or FIN, deliver it to
    /// the application, and drive the receive-side half of the close
    /// sequence.
    fn finish_accept(&mut self, pcb_idx: usize, delivered: u32, got_fin: bool, now: Instant) {
        if delivered == 0 && !got_fin {
            return;
        }
        let consumed = delivered + got_fin as u32;
        {
            let pcb = &mut self.pcbs[pcb_idx];
            pcb.rcv_nxt = pcb.rcv_nxt + consumed as usize;
            pcb.rcv_ann_wnd = pcb.rcv_ann_wnd.saturating_sub(consumed);
            pcb.flags.set_ack_pending(true);
        }

        let ci = match self.pcbs[pcb_idx].attachment.connection_index() {
            Some(ci) => ci,
            None => return,
        };

        if delivered > 0 {
            self.pcbs[pcb_idx].being_processed = true;
            self.connections[ci].as_mut().unwrap().handler.data_received(delivered as usize);
            if !self.pcbs[pcb_idx].being_processed {
                return;
            }
            self.pcbs[pcb_idx].being_processed = false;
        }

        if !got_fin {
            return;
        }

        self.connections[ci].as_mut().unwrap().end_received = true;
        self.pcbs[pcb_idx].being_processed = true;
        self.connections[ci].as_mut().unwrap().handler.data_received(0);
        if !self.pcbs[pcb_idx].being_processed {
            return;
        }
        self.pcbs[pcb_idx].being_processed = false;

        match self.pcbs[pcb_idx].state {
            State::Established => self.pcbs[pcb_idx].state = State::CloseWait,
            State::FinWait1 => self.pcbs[pcb_idx].state = State::Closing,
            State::FinWait2 => self.go_to_time_wait(pcb_idx, now),
            _ => {}
        }
    }

    /// §4.6 step 6: whatever the segment's processing left pending — queued
    /// data to send, or a standalone ACK.
    pub(crate) fn run_deferred_effects(&mut self, pcb_idx: usize, now: Instant) {
        if self.pcbs[pcb_idx].state == State::Closed {
            return;
        }
        if self.pcbs[pcb_idx].flags.is_out_pending() {
            self.pcbs[pcb_idx].flags.set_out_pending(false);
            self.output_queued(pcb_idx, false, now);
        }
        if self.pcbs[pcb_idx].state != State::Closed && self.pcbs[pcb_idx].flags.is_ack_pending() {
            self.send_ack_empty(pcb_idx, now);
        }
    }
}
