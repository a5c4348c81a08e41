//! The application-facing surface (§6 "Connection"/"Listener" public
//! methods): everything the host calls into the engine for, as opposed to
//! the four event sources `input.rs`/`output.rs`/`scheduler.rs` drive.
//!
//! The source exposes `setSendBuf`/`setRecvBuf`/`getSendBuf`/`getRecvBuf`,
//! letting the application hand the PCB a pointer to an externally-owned
//! buffer object. That shape doesn't fit this rewrite: the engine already
//! owns fixed-capacity ring buffers per [`crate::connection::ConnectionSlot`]
//! (§4.1), so there is no external buffer to install a reference to.
//! [`TcpEngine::extend_recv_buf`]/[`TcpEngine::extend_send_buf`]/
//! [`TcpEngine::recv_buf_front`] below cover the same need — moving bytes in
//! and out of the engine's own buffers — without the pointer indirection.

use crate::config;
use crate::connection::{ConnState, ConnectionHandle};
use crate::error::{Result, TcpError};
use crate::engine::TcpEngine;
use crate::listener::ListenerHandle;
use crate::pcb::State;
use crate::phy::IpSender;
use crate::storage::RingBuffer;
use crate::time::Instant;

impl<const OOS: usize, S: IpSender> TcpEngine<OOS, S> {
    pub fn is_init(&self, handle: ConnectionHandle) -> bool {
        self.connection_slot(handle).state == ConnState::Init
    }

    pub fn is_connected(&self, handle: ConnectionHandle) -> bool {
        self.connection_slot(handle).state == ConnState::Connected
    }

    pub fn was_end_received(&self, handle: ConnectionHandle) -> bool {
        self.connection_slot(handle).end_received
    }

    pub fn was_end_sent(&self, handle: ConnectionHandle) -> bool {
        self.connection_slot(handle).end_sent
    }

    pub fn was_sending_closed(&self, handle: ConnectionHandle) -> bool {
        self.connection_slot(handle).sending_closed
    }

    /// The window this PCB currently announces to its peer, or `0` for a
    /// connection with no PCB attached (`Init`, or detached into `TIME_WAIT`
    /// on the peer's behalf after the application let go).
    pub fn announced_rcv_wnd(&self, handle: ConnectionHandle) -> u32 {
        match self.connection_slot(handle).pcb {
            Some(idx) => self.pcbs[idx].rcv_ann_wnd,
            None => 0,
        }
    }

    /// Bytes of MSS overhead a caller should leave unfilled past a full
    /// segment when sizing application-level writes (`base_snd_mss - 1`,
    /// matching the source's `sndBufOverhead`).
    pub fn snd_buf_overhead(&self, handle: ConnectionHandle) -> usize {
        match self.connection_slot(handle).pcb {
            Some(idx) => (self.pcbs[idx].base_snd_mss as usize).saturating_sub(1),
            None => 0,
        }
    }

    /// Override the freed-window threshold (§4.6 "effective receive window")
    /// past which a standalone window-update ACK is sent rather than waiting
    /// to piggyback, for this connection specifically.
    pub fn set_window_update_threshold(&mut self, handle: ConnectionHandle, threshold: u32) {
        let pcb_idx = {
            let slot = self.connection_slot_mut(handle);
            slot.wnd_update_threshold = threshold;
            slot.pcb
        };
        if let Some(idx) = pcb_idx {
            self.pcbs[idx].rcv_ann_thres = threshold;
        }
    }

    /// The front of the receive buffer's visible prefix (§4.1 "first
    /// chunk"), for the application to copy out of without yet releasing it.
    pub fn recv_buf_front(&self, handle: ConnectionHandle) -> &[u8] {
        self.connection_slot(handle).recv_buf.front_chunk()
    }

    /// Release `n` consumed bytes from the front of the receive buffer and
    /// open the announced window back up by the same amount, emitting a
    /// standalone window-update ACK once the freed amount crosses the
    /// configured threshold (§4.6 "effective receive window").
    pub fn extend_recv_buf(&mut self, handle: ConnectionHandle, n: usize, now: Instant) {
        let pcb_idx = {
            let slot = self.connection_slot_mut(handle);
            slot.recv_buf.advance(n);
            slot.pcb
        };
        let idx = match pcb_idx {
            Some(idx) => idx,
            None => return,
        };
        if n == 0 {
            return;
        }
        let free = self.connections[handle.0].as_ref().unwrap().recv_buf.window() as u32;
        let opened = {
            let pcb = &mut self.pcbs[idx];
            let old_ann = pcb.rcv_ann_wnd;
            pcb.rcv_ann_wnd = free.min(config::MAX_WINDOW);
            pcb.rcv_ann_wnd.saturating_sub(old_ann)
        };
        if opened >= self.pcbs[idx].rcv_ann_thres && self.pcbs[idx].state.permits_output() {
            self.send_ack_empty(idx, now);
        }
    }

    /// Queue `data` for sending; returns the number of bytes actually
    /// accepted (bounded by free space in the send buffer).
    pub fn extend_send_buf(&mut self, handle: ConnectionHandle, data: &[u8], now: Instant) -> usize {
        let (n, pcb_idx) = {
            let slot = self.connection_slot_mut(handle);
            (slot.send_buf.enqueue_slice(data), slot.pcb)
        };
        if n > 0 {
            if let Some(idx) = pcb_idx {
                self.output_queued(idx, false, now);
            }
        }
        n
    }

    /// Mark everything currently queued as requiring an immediate,
    /// non-Nagle-delayed `PSH` segment (§6 `sendPush`).
    pub fn send_push(&mut self, handle: ConnectionHandle, now: Instant) {
        let pcb_idx = {
            let slot = self.connection_slot_mut(handle);
            slot.push_index = slot.send_buf.len();
            slot.pcb
        };
        if let Some(idx) = pcb_idx {
            self.output_queued(idx, true, now);
        }
    }

    /// Half-close the sending side (§4.7 "close_sending"): no further data
    /// will ever be queued. Idempotent; a connection with no PCB attached
    /// yet (`SYN_SENT`) just records the intent for
    /// [`crate::input::TcpEngine::receive`]'s handshake completion to act on.
    pub fn close_sending(&mut self, handle: ConnectionHandle, now: Instant) -> Result<()> {
        if self.connection_slot(handle).state == ConnState::Init {
            return Err(TcpError::InvalidState);
        }
        let pcb_idx = {
            let slot = self.connection_slot_mut(handle);
            if slot.sending_closed {
                return Ok(());
            }
            slot.sending_closed = true;
            slot.pcb
        };
        let idx = match pcb_idx {
            Some(idx) => idx,
            None => return Ok(()),
        };
        match self.pcbs[idx].state {
            State::Established => self.pcbs[idx].state = State::FinWait1,
            State::CloseWait => self.pcbs[idx].state = State::LastAck,
            _ => {}
        }
        self.pcbs[idx].flags.set_fin_pending(true);
        self.output_queued(idx, true, now);
        Ok(())
    }

    /// Abandon whatever this handle is doing and return it to `Init`,
    /// reusing the same buffer capacities (§4.7 "reset").
    pub fn reset(&mut self, handle: ConnectionHandle, now: Instant) {
        let pcb_idx = self.connection_slot(handle).pcb;
        if let Some(idx) = pcb_idx {
            self.connection_slot_mut(handle).abandoned = false;
            self.abort_pcb(idx, true, now);
        }
        let (recv_cap, send_cap, threshold) = {
            let slot = self.connection_slot(handle);
            (slot.recv_buf.capacity(), slot.send_buf.capacity(), slot.wnd_update_threshold)
        };
        let slot = self.connection_slot_mut(handle);
        slot.state = ConnState::Init;
        slot.pcb = None;
        slot.recv_buf = RingBuffer::new(recv_cap);
        slot.send_buf = RingBuffer::new(send_cap);
        slot.push_index = 0;
        slot.sending_closed = false;
        slot.end_received = false;
        slot.end_sent = false;
        slot.abandoned = false;
        slot.wnd_update_threshold = threshold;
        slot.snd_wnd = 0;
        slot.cwnd = 0;
        slot.ssthresh = config::MAX_WINDOW;
        slot.rttvar = 0;
        slot.srtt = 0;
        slot.recover = crate::wire::TcpSeqNumber(0);
        slot.cwnd_acked = 0;
        slot.rtt_test_seq = None;
    }

    /// Move `src`'s connection state into `dst` (which must be `Init`) and
    /// leave `src` reset to `Init` (§9 "move constructor"). Retargets the
    /// attached PCB's `Attachment::Connection` index rather than moving the
    /// PCB itself, since PCBs are addressed by pool index, not by the
    /// Connection that owns them.
    ///
    /// `src`'s handler is dropped along with the rest of its old slot
    /// contents; a caller that wants to keep using a handler across the move
    /// must have stored it elsewhere first. This mirrors the source's move
    /// constructor, which likewise leaves the moved-from object a blank
    /// shell with no way back to its old callback object.
    pub fn move_connection(&mut self, dst: ConnectionHandle, src: ConnectionHandle) -> Result<()> {
        if dst.0 == src.0 {
            return Err(TcpError::InvalidState);
        }
        if self.connection_slot(dst).state != ConnState::Init {
            return Err(TcpError::InvalidState);
        }
        let moved = self.connections[src.0].take().expect("stale ConnectionHandle");
        if let Some(pcb_idx) = moved.pcb {
            self.pcbs[pcb_idx].attachment = crate::pcb::Attachment::Connection(dst.0);
        }
        self.connections[dst.0] = Some(moved);
        self.connections[src.0] = Some(crate::connection::ConnectionSlot::new(
            0,
            0,
            Box::new(NullHandler),
            self.config.default_wnd_ann_threshold,
        ));
        Ok(())
    }

    /// Override the initial receive window this listener hands out to newly
    /// accepted PCBs (§4.4).
    pub fn set_listener_rcv_wnd(&mut self, handle: ListenerHandle, rcv_wnd: u32) {
        if let Some(listener) = self.listeners[handle.0].as_mut() {
            listener.initial_rcv_wnd = rcv_wnd;
        }
    }
}

/// Placeholder handler installed into a slot vacated by
/// [`TcpEngine::move_connection`]. Never attached to a PCB (the slot it
/// occupies is always `Init` with no PCB), so its callbacks are unreachable.
struct NullHandler;

impl crate::connection::ConnectionHandler for NullHandler {
    fn connection_aborted(&mut self) {
        unreachable!("NullHandler is never attached to a PCB");
    }
    fn data_received(&mut self, _amount: usize) {
        unreachable!("NullHandler is never attached to a PCB");
    }
    fn data_sent(&mut self, _amount: usize) {
        unreachable!("NullHandler is never attached to a PCB");
    }
}
