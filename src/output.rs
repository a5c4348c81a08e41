//! The output engine (§4.5): segmentation, retransmission, congestion
//! control, and window probing.

use crate::config::{self, FAST_RTX_DUP_ACKS, MAX_RTX_TIME, MIN_RTX_TIME, OUTPUT_RETRY_FULL, OUTPUT_RETRY_OTHER};
use crate::engine::TcpEngine;
use crate::pcb::{State, TimerKind};
use crate::phy::{IpSender, SendError};
use crate::time::{Duration, Instant};
use crate::wire::{IpAddress, TcpFlags, TcpPacket, TcpRepr, TcpSeqNumber as SeqNumber};

impl<const OOS: usize, S: IpSender> TcpEngine<OOS, S> {
    /// Bytes still logically held in the send buffer from `snd_una` (acked
    /// bytes have already been advanced out of it). `0` for a PCB abandoned
    /// without unsent data (only a queued FIN remains).
    pub(crate) fn send_buf_len(&self, pcb_idx: usize) -> usize {
        match self.pcbs[pcb_idx].attachment.connection_index() {
            Some(ci) => self.connections[ci].as_ref().unwrap().send_buf.len(),
            None => 0,
        }
    }

    fn copy_send_payload(&self, pcb_idx: usize, offset: usize, buf: &mut [u8]) -> usize {
        match self.pcbs[pcb_idx].attachment.connection_index() {
            Some(ci) => self.connections[ci]
                .as_ref()
                .unwrap()
                .send_buf
                .copy_out(offset, buf),
            None => 0,
        }
    }

    fn fin_queued(&self, pcb_idx: usize) -> bool {
        let pcb = &self.pcbs[pcb_idx];
        if pcb.flags.is_fin_sent() {
            return false;
        }
        match pcb.attachment.connection_index() {
            Some(ci) => self.connections[ci].as_ref().unwrap().sending_closed,
            None => pcb.flags.is_fin_pending(),
        }
    }

    fn sending_closed(&self, pcb_idx: usize) -> bool {
        match self.pcbs[pcb_idx].attachment.connection_index() {
            Some(ci) => self.connections[ci].as_ref().unwrap().sending_closed,
            None => self.pcbs[pcb_idx].flags.is_fin_pending(),
        }
    }

    fn push_reached(&self, pcb_idx: usize, segment_start: usize, segment_end: usize) -> bool {
        match self.pcbs[pcb_idx].attachment.connection_index() {
            Some(ci) => {
                let push = self.connections[ci].as_ref().unwrap().push_index;
                push > segment_start && push <= segment_end
            }
            None => false,
        }
    }

    pub(crate) fn scaled_announced_window(&self, pcb_idx: usize) -> u16 {
        let pcb = &self.pcbs[pcb_idx];
        (pcb.rcv_ann_wnd >> pcb.rcv_wnd_shift).min(0xFFFF) as u16
    }

    /// Build the wire bytes for `repr` plus `payload` and hand them to the
    /// egress collaborator. `payload` is rendered by the caller *before*
    /// this call so the `IpSender::send` closure never needs to borrow
    /// `self` (it only copies out of an already-built local buffer).
    fn emit_segment(
        &mut self,
        pcb_idx: usize,
        repr: TcpRepr,
        payload: &[u8],
    ) -> core::result::Result<(), SendError> {
        let tuple = self.pcbs[pcb_idx]
            .tuple
            .expect("emit_segment on a PCB without a 4-tuple");
        let local = tuple.local_addr;
        let remote = tuple.remote_addr;
        let header_len = repr.header_len();
        let tcp_len = header_len + payload.len();

        let mut scratch = vec![0u8; tcp_len];
        scratch[header_len..].copy_from_slice(payload);
        {
            let mut packet = TcpPacket::new_unchecked(&mut scratch[..]);
            repr.emit(&mut packet, &local, &remote);
        }
        self.sender
            .send(local, remote, tcp_len, |buf| buf.copy_from_slice(&scratch))
    }

    fn arm_output_retry(&mut self, pcb_idx: usize, full: bool, now: Instant) {
        let pcb = &mut self.pcbs[pcb_idx];
        pcb.flags.set_out_retry(true);
        let delay = if full { OUTPUT_RETRY_FULL } else { OUTPUT_RETRY_OTHER };
        pcb.timers.arm(TimerKind::Output, now, delay);
    }

    /// SYN (active open) or SYN-ACK (passive open) emission/retransmission.
    pub(crate) fn send_syn(&mut self, pcb_idx: usize, now: Instant) {
        let pcb = &self.pcbs[pcb_idx];
        let tuple = pcb.tuple.expect("send_syn on PCB without tuple");
        let repr = TcpRepr {
            src_port: tuple.local_port,
            dst_port: tuple.remote_port,
            seq_number: pcb.snd_una,
            ack_number: None,
            flags: TcpFlags::syn(),
            window_len: pcb.rcv_ann_wnd.min(0xFFFF) as u16,
            max_seg_size: Some(pcb.base_snd_mss),
            window_scale: Some(pcb.rcv_wnd_shift),
        };
        if self.emit_segment(pcb_idx, repr, &[]).is_err() {
            self.arm_output_retry(pcb_idx, false, now);
        }
    }

    pub(crate) fn send_syn_ack(&mut self, pcb_idx: usize, now: Instant) {
        let pcb = &self.pcbs[pcb_idx];
        let tuple = pcb.tuple.expect("send_syn_ack on PCB without tuple");
        let repr = TcpRepr {
            src_port: tuple.local_port,
            dst_port: tuple.remote_port,
            seq_number: pcb.snd_una,
            ack_number: Some(pcb.rcv_nxt),
            flags: TcpFlags::syn(),
            window_len: pcb.rcv_ann_wnd.min(0xFFFF) as u16,
            max_seg_size: Some(pcb.base_snd_mss),
            window_scale: Some(pcb.rcv_wnd_shift),
        };
        if self.emit_segment(pcb_idx, repr, &[]).is_err() {
            self.arm_output_retry(pcb_idx, false, now);
        }
    }

    /// A bare ACK (or RST+ACK) carrying no payload: challenge ACKs, pure
    /// window updates, RST emission from `abort`.
    pub(crate) fn send_flags_only(&mut self, pcb_idx: usize, flags: TcpFlags, now: Instant) {
        let pcb = &self.pcbs[pcb_idx];
        let tuple = pcb.tuple.expect("send_flags_only on PCB without tuple");
        let repr = TcpRepr {
            src_port: tuple.local_port,
            dst_port: tuple.remote_port,
            seq_number: pcb.snd_nxt,
            ack_number: Some(pcb.rcv_nxt),
            flags,
            window_len: self.scaled_announced_window(pcb_idx),
            max_seg_size: None,
            window_scale: None,
        };
        if self.emit_segment(pcb_idx, repr, &[]).is_err() {
            self.arm_output_retry(pcb_idx, false, now);
        }
    }

    pub(crate) fn send_ack_empty(&mut self, pcb_idx: usize, now: Instant) {
        self.send_flags_only(pcb_idx, TcpFlags::ack(), now);
        self.pcbs[pcb_idx].flags.set_ack_pending(false);
    }

    pub(crate) fn send_challenge_ack(&mut self, pcb_idx: usize, now: Instant) {
        self.send_flags_only(pcb_idx, TcpFlags::ack(), now);
    }

    /// RST reply to a segment that matched no PCB at all (§4.6 step 1).
    pub(crate) fn send_rst_reply(&mut self, local: IpAddress, remote: IpAddress, incoming: &TcpRepr) {
        let (seq, ack) = match incoming.ack_number {
            Some(ack) => (ack, None),
            None => {
                let consumed = incoming.flags.is_syn() as usize + incoming.flags.is_fin() as usize;
                (SeqNumber(0), Some(incoming.seq_number + consumed))
            }
        };
        let repr = TcpRepr {
            src_port: incoming.dst_port,
            dst_port: incoming.src_port,
            seq_number: seq,
            ack_number: ack,
            flags: TcpFlags::rst(),
            window_len: 0,
            max_seg_size: None,
            window_scale: None,
        };
        let tcp_len = repr.header_len();
        let _ = self.sender.send(local, remote, tcp_len, |buf| {
            let mut packet = TcpPacket::new_unchecked(buf);
            repr.emit(&mut packet, &local, &remote);
        });
    }

    pub(crate) fn send_rst_for_pcb(&mut self, pcb_idx: usize, now: Instant) {
        let pcb = &self.pcbs[pcb_idx];
        let tuple = pcb.tuple.expect("send_rst_for_pcb on PCB without tuple");
        let repr = TcpRepr {
            src_port: tuple.local_port,
            dst_port: tuple.remote_port,
            seq_number: pcb.snd_nxt,
            ack_number: Some(pcb.rcv_nxt),
            flags: TcpFlags::rst(),
            window_len: 0,
            max_seg_size: None,
            window_scale: None,
        };
        if self.emit_segment(pcb_idx, repr, &[]).is_err() {
            self.arm_output_retry(pcb_idx, false, now);
        }
    }

    /// Primary output operation (§4.5): emit as many segments as the window
    /// admits while there is queued data or a pending FIN.
    pub(crate) fn output_queued(&mut self, pcb_idx: usize, no_delay: bool, now: Instant) {
        loop {
            if !self.pcbs[pcb_idx].state.permits_output() {
                break;
            }

            let flight = self.pcbs[pcb_idx].flight_size();
            let peer_remaining = self.pcbs[pcb_idx].snd_wnd.saturating_sub(flight);
            let cwnd_remaining = self.pcbs[pcb_idx].cwnd.saturating_sub(flight);
            let allowed = peer_remaining.min(cwnd_remaining);

            let unsent = self.send_buf_len(pcb_idx).saturating_sub(flight as usize);
            let fin_pending = self.fin_queued(pcb_idx);

            if unsent == 0 && !fin_pending {
                break;
            }

            let snd_mss = self.pcbs[pcb_idx].snd_mss as usize;
            let seg_len = unsent.min(allowed as usize).min(snd_mss);
            let seg_has_fin = fin_pending && seg_len == unsent && (allowed as usize) > unsent;

            if seg_len == 0 && !seg_has_fin {
                break;
            }

            let offset = flight as usize;
            let psh = self.push_reached(pcb_idx, offset, offset + seg_len) || seg_has_fin;

            // Nagle-style delay (§4.5): hold back a small, non-final,
            // non-pushed segment unless the caller asked not to delay.
            if !no_delay && unsent < snd_mss && !psh && !self.sending_closed(pcb_idx) {
                break;
            }

            let pcb = &self.pcbs[pcb_idx];
            let tuple = pcb.tuple.expect("output_queued on PCB without tuple");
            let seq = pcb.snd_nxt;
            let mut flags = TcpFlags::ack();
            if psh {
                flags = flags.with_psh(true);
            }
            if seg_has_fin {
                flags = flags.with_fin(true);
            }
            let repr = TcpRepr {
                src_port: tuple.local_port,
                dst_port: tuple.remote_port,
                seq_number: seq,
                ack_number: Some(pcb.rcv_nxt),
                flags,
                window_len: self.scaled_announced_window(pcb_idx),
                max_seg_size: None,
                window_scale: None,
            };

            let mut payload = vec![0u8; seg_len];
            self.copy_send_payload(pcb_idx, offset, &mut payload);

            match self.emit_segment(pcb_idx, repr, &payload) {
                Ok(()) => {
                    let pcb = &mut self.pcbs[pcb_idx];
                    let was_rtx_active = pcb.flags.is_rtx_active();
                    if !pcb.flags.is_rtt_pending() {
                        pcb.rtt_test_seq = Some(pcb.snd_nxt);
                        pcb.rtt_test_time = now;
                        pcb.flags.set_rtt_pending(true);
                    }
                    let new_end = seq + seg_len + if seg_has_fin { 1 } else { 0 };
                    if pcb.snd_nxt < new_end {
                        pcb.snd_nxt = new_end;
                        if seg_has_fin {
                            pcb.flags.set_fin_sent(true);
                        }
                    }
                    if was_rtx_active {
                        // Karn's algorithm: a retransmission never yields a
                        // usable RTT sample.
                        pcb.rtt_test_seq = None;
                        pcb.flags.set_rtt_pending(false);
                    }
                    pcb.flags.set_ack_pending(false);
                }
                Err(e) => {
                    self.arm_output_retry(pcb_idx, e == SendError::BufferFull, now);
                    break;
                }
            }
        }
        self.reconcile_rtx_timer(pcb_idx, now);
    }

    /// Zero-window probe (§4.5): one byte (or a bare FIN) at `snd_una`.
    pub(crate) fn output_front(&mut self, pcb_idx: usize, now: Instant) {
        let buf_len = self.send_buf_len(pcb_idx);
        let data_len = buf_len.min(1);
        let fin_only = data_len == 0 && self.pcbs[pcb_idx].flags.is_fin_sent();
        if data_len == 0 && !fin_only {
            return;
        }

        let pcb = &self.pcbs[pcb_idx];
        let tuple = pcb.tuple.expect("output_front on PCB without tuple");
        let mut flags = TcpFlags::ack();
        if fin_only {
            flags = flags.with_fin(true);
        }
        let repr = TcpRepr {
            src_port: tuple.local_port,
            dst_port: tuple.remote_port,
            seq_number: pcb.snd_una,
            ack_number: Some(pcb.rcv_nxt),
            flags,
            window_len: self.scaled_announced_window(pcb_idx),
            max_seg_size: None,
            window_scale: None,
        };
        let mut payload = vec![0u8; data_len];
        self.copy_send_payload(pcb_idx, 0, &mut payload);
        if self.emit_segment(pcb_idx, repr, &payload).is_err() {
            self.arm_output_retry(pcb_idx, false, now);
        }
    }

    /// Re-arm or cancel `RtxTimer` depending on whether anything is still
    /// outstanding (§4.5, invariant 6, property P6).
    pub(crate) fn reconcile_rtx_timer(&mut self, pcb_idx: usize, now: Instant) {
        let pcb = &mut self.pcbs[pcb_idx];
        if pcb.flags.is_idle_timer() {
            return;
        }
        let outstanding = pcb.flight_size() > 0 || pcb.flags.is_fin_sent();
        if outstanding {
            if !pcb.timers.is_armed(TimerKind::Rtx) {
                let rto = pcb.rto;
                pcb.timers.arm(TimerKind::Rtx, now, rto);
            }
        } else {
            pcb.timers.cancel(TimerKind::Rtx);
        }
    }

    /// `RtxTimer` expiry (§4.5).
    pub(crate) fn rtx_timeout(&mut self, pcb_idx: usize, now: Instant) {
        if self.pcbs[pcb_idx].flags.is_idle_timer() {
            let pcb = &mut self.pcbs[pcb_idx];
            pcb.flags.set_idle_timer(false);
            let initial = config::calc_initial_cwnd(pcb.snd_mss);
            if pcb.cwnd > initial {
                pcb.cwnd = initial;
            }
            pcb.cwnd_acked = 0;
            return;
        }

        {
            let pcb = &mut self.pcbs[pcb_idx];
            pcb.rto = double_rto(pcb.rto).clamp_between(MIN_RTX_TIME, MAX_RTX_TIME);
            let rto = pcb.rto;
            pcb.timers.arm(TimerKind::Rtx, now, rto);
        }

        let state = self.pcbs[pcb_idx].state;
        match state {
            State::SynSent => {
                self.send_syn(pcb_idx, now);
                return;
            }
            State::SynRcvd => {
                self.send_syn_ack(pcb_idx, now);
                return;
            }
            _ => {}
        }

        let abandoned = self.pcbs[pcb_idx].attachment.connection_index().is_none();
        if self.pcbs[pcb_idx].snd_wnd == 0 || abandoned {
            self.output_front(pcb_idx, now);
            return;
        }

        // A first retransmission: a loss event.
        {
            let pcb = &mut self.pcbs[pcb_idx];
            pcb.flags.set_rtx_active(true);
            let flight = pcb.flight_size();
            pcb.ssthresh = (flight / 2).max(2 * pcb.snd_mss as u32);
            pcb.cwnd = pcb.snd_mss as u32;
            pcb.recover = pcb.snd_nxt;
            pcb.flags.set_recover(true);
            pcb.num_dupack = 0;
            // Requeue everything: output resumes from snd_una.
            pcb.snd_nxt = pcb.snd_una;
            pcb.flags.set_fin_sent(false);
        }
        self.output_queued(pcb_idx, true, now);
    }

    /// ACK accounting that must run before any state mutation the new ACK
    /// triggers (§4.5 "Handling new ACK"). `ack_num` is the peer's ack
    /// field; `acked` is `ack_num - (old) snd_una`.
    pub(crate) fn output_handle_acked(&mut self, pcb_idx: usize, ack_num: SeqNumber, acked: u32, now: Instant) {
        let pcb = &mut self.pcbs[pcb_idx];
        pcb.timers.cancel(TimerKind::Rtx);
        pcb.flags.set_rtx_active(false);

        if pcb.flags.is_rtt_pending() {
            if let Some(test_seq) = pcb.rtt_test_seq {
                if ack_num >= test_seq {
                    let m = (now - pcb.rtt_test_time).total_millis().max(1) as u32;
                    if !pcb.flags.is_rtt_valid() {
                        pcb.rttvar = m / 2;
                        pcb.srtt = m;
                        pcb.flags.set_rtt_valid(true);
                    } else {
                        let diff = (pcb.srtt as i64 - m as i64).unsigned_abs() as u32;
                        pcb.rttvar = (3 * pcb.rttvar + diff) / 4;
                        pcb.srtt = (7 * pcb.srtt + m) / 8;
                    }
                    let rto_ticks = pcb.srtt + (4 * pcb.rttvar).max(1);
                    pcb.rto = Duration::from_millis(rto_ticks as u64).clamp_between(MIN_RTX_TIME, MAX_RTX_TIME);
                    pcb.flags.set_rtt_pending(false);
                    pcb.rtt_test_seq = None;
                    // A fresh RTT sample lifts the once-per-RTT AI gate (§4.5).
                    pcb.flags.set_cwnd_incrd(false);
                }
            }
        }

        if pcb.num_dupack < FAST_RTX_DUP_ACKS {
            pcb.num_dupack = 0;
            if pcb.cwnd <= pcb.ssthresh {
                pcb.cwnd += acked.min(pcb.snd_mss as u32);
            } else if !pcb.flags.is_cwnd_incrd() {
                pcb.cwnd_acked += acked;
                if pcb.cwnd_acked >= pcb.cwnd {
                    pcb.cwnd += pcb.snd_mss as u32;
                    pcb.cwnd_acked = 0;
                    pcb.flags.set_cwnd_incrd(true);
                }
            }
        } else {
            let exit_recovery = !pcb.flags.is_recover() || ack_num >= pcb.recover;
            if exit_recovery {
                let flight_after = (pcb.snd_nxt - ack_num).max(0) as u32;
                pcb.cwnd = pcb
                    .ssthresh
                    .min(flight_after.max(pcb.snd_mss as u32) + pcb.snd_mss as u32);
                pcb.num_dupack = 0;
                pcb.flags.set_recover(false);
            } else {
                let deflate = acked.min(pcb.cwnd.saturating_sub(pcb.snd_mss as u32));
                pcb.cwnd = (pcb.cwnd - deflate).max(pcb.snd_mss as u32);
                if acked >= pcb.snd_mss as u32 {
                    pcb.cwnd += pcb.snd_mss as u32;
                }
                self.retransmit_first_unacked(pcb_idx, now);
            }
        }
    }

    /// Fast retransmit entry (§4.5, S2): the `FastRtxDupAcks`-th duplicate
    /// ACK for unchanged `snd_una`.
    pub(crate) fn enter_fast_retransmit(&mut self, pcb_idx: usize, now: Instant) {
        if self.pcbs[pcb_idx].flags.is_recover() {
            return;
        }
        self.retransmit_first_unacked(pcb_idx, now);
        let pcb = &mut self.pcbs[pcb_idx];
        pcb.recover = pcb.snd_nxt;
        pcb.flags.set_recover(true);
        let flight = pcb.flight_size();
        pcb.ssthresh = (flight / 2).max(2 * pcb.snd_mss as u32);
        pcb.cwnd = pcb.ssthresh + 3 * pcb.snd_mss as u32;
    }

    pub(crate) fn retransmit_first_unacked(&mut self, pcb_idx: usize, now: Instant) {
        let buf_len = self.send_buf_len(pcb_idx);
        let cap = self.pcbs[pcb_idx].snd_mss as usize;
        let data_len = buf_len.min(cap);
        let fin_unacked = self.pcbs[pcb_idx].flags.is_fin_sent() && data_len == buf_len;
        if data_len == 0 && !fin_unacked {
            return;
        }

        let pcb = &self.pcbs[pcb_idx];
        let tuple = pcb.tuple.expect("retransmit_first_unacked on PCB without tuple");
        let mut flags = TcpFlags::ack();
        if fin_unacked {
            flags = flags.with_fin(true);
        }
        let repr = TcpRepr {
            src_port: tuple.local_port,
            dst_port: tuple.remote_port,
            seq_number: pcb.snd_una,
            ack_number: Some(pcb.rcv_nxt),
            flags,
            window_len: self.scaled_announced_window(pcb_idx),
            max_seg_size: None,
            window_scale: None,
        };
        let mut payload = vec![0u8; data_len];
        self.copy_send_payload(pcb_idx, 0, &mut payload);
        if self.emit_segment(pcb_idx, repr, &payload).is_err() {
            self.arm_output_retry(pcb_idx, false, now);
        }
    }

    /// PMTU-changed notification (§4.5, §6): tighten `snd_mss` for every PCB
    /// addressing `remote`.
    pub(crate) fn handle_pmtu_changed(&mut self, remote: IpAddress, new_mtu: u16, now: Instant) {
        for idx in 0..self.pcbs.len() {
            let matches = self.pcbs[idx]
                .tuple
                .map(|t| t.remote_addr == remote)
                .unwrap_or(false);
            if !matches || self.pcbs[idx].state == State::Closed {
                continue;
            }
            let pcb = &mut self.pcbs[idx];
            pcb.pmtu = Some(new_mtu);
            let from_mtu = new_mtu.saturating_sub(config::HEADER_SIZE as u16);
            let new_mss = pcb.base_snd_mss.min(from_mtu).max(config::MIN_ALLOWED_MSS);
            pcb.snd_mss = new_mss;
            if pcb.ssthresh < pcb.snd_mss as u32 {
                pcb.ssthresh = pcb.snd_mss as u32;
            }
            if pcb.cwnd < pcb.snd_mss as u32 {
                pcb.cwnd = pcb.snd_mss as u32;
            }
            self.reconcile_rtx_timer(idx, now);
        }
    }

    /// §6 `handleIp4DestUnreach`: a fragmentation-needed ICMP notice tied to
    /// one specific PCB via the 4-tuple and sequence number of the segment
    /// that triggered it. Narrower than [`Self::handle_pmtu_changed`] (which
    /// updates every PCB to a remote) — this verifies the embedded sequence
    /// number still falls within the PCB's unacked range before acting, so a
    /// stale or spoofed notice referencing an already-retired segment is
    /// ignored.
    pub fn handle_icmp_frag_needed(
        &mut self,
        local_addr: IpAddress,
        remote_addr: IpAddress,
        local_port: u16,
        remote_port: u16,
        orig_seq: SeqNumber,
        next_hop_mtu: u16,
        now: Instant,
    ) {
        let tuple = crate::pcb::FourTuple {
            remote_port,
            remote_addr,
            local_port,
            local_addr,
        };
        let idx = match self.find_active_pcb(&tuple) {
            Some(idx) => idx,
            None => return,
        };
        if !self.pcbs[idx].state.permits_output() {
            return;
        }
        let snd_una = self.pcbs[idx].snd_una;
        let snd_nxt = self.pcbs[idx].snd_nxt;
        if !(orig_seq >= snd_una && orig_seq <= snd_nxt) {
            return;
        }

        self.handle_pmtu_changed(remote_addr, next_hop_mtu, now);
        self.retransmit_first_unacked(idx, now);
    }
}

fn double_rto(d: Duration) -> Duration {
    Duration::from_millis(d.total_millis().saturating_mul(2))
}
