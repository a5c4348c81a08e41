//! PCB pool allocation, 4-tuple indexing and ephemeral-port selection
//! (§4.3).
//!
//! The pool is a fixed-capacity array handed out at construction; every
//! mutator below works in terms of `usize` indices into it rather than
//! pointers, and the unreferenced list is a plain index queue instead of an
//! intrusive linked list (§9).

use std::collections::{HashMap, VecDeque};

use crate::engine::TcpEngine;
use crate::error::{Result, TcpError};
use crate::pcb::{Attachment, FourTuple, Pcb, State};
use crate::phy::IpSender;
use crate::time::Instant;
use crate::wire::IpAddress;

impl<const OOS: usize, S: IpSender> TcpEngine<OOS, S> {
    /// Look up a PCB by its full 4-tuple, active index first then
    /// TIME_WAIT, per §4.3 "Lookup order: active, then TIME_WAIT".
    pub(crate) fn find_pcb(&self, tuple: &FourTuple) -> Option<usize> {
        self.active_index
            .get(tuple)
            .or_else(|| self.time_wait_index.get(tuple))
            .copied()
    }

    pub(crate) fn find_active_pcb(&self, tuple: &FourTuple) -> Option<usize> {
        self.active_index.get(tuple).copied()
    }

    pub(crate) fn find_time_wait_pcb(&self, tuple: &FourTuple) -> Option<usize> {
        self.time_wait_index.get(tuple).copied()
    }

    pub(crate) fn index_insert_active(&mut self, tuple: FourTuple, idx: usize) {
        self.active_index.insert(tuple, idx);
    }

    pub(crate) fn index_remove_active(&mut self, tuple: &FourTuple) {
        self.active_index.remove(tuple);
    }

    pub(crate) fn index_insert_time_wait(&mut self, tuple: FourTuple, idx: usize) {
        self.time_wait_index.insert(tuple, idx);
    }

    pub(crate) fn index_remove_time_wait(&mut self, tuple: &FourTuple) {
        self.time_wait_index.remove(tuple);
    }

    /// Mark `idx` as abandoned: append it to the tail of the unreferenced
    /// list's most-recently-relevant end (front), per invariant 8.
    pub(crate) fn mark_unreferenced(&mut self, idx: usize) {
        self.unreferenced.retain(|&i| i != idx);
        self.unreferenced.push_front(idx);
    }

    /// Mark `idx` as `Closed` and immediately eligible for reuse: append it
    /// to the tail (the next eviction victim), per `abort_pcb` (§4.7).
    pub(crate) fn mark_closed(&mut self, idx: usize) {
        self.unreferenced.retain(|&i| i != idx);
        self.unreferenced.push_back(idx);
    }

    /// Remove `idx` from the unreferenced list (it has just gained an owner:
    /// a `Connection` attached, or it is protected as a listener's pending
    /// `accept_pcb`).
    pub(crate) fn mark_referenced(&mut self, idx: usize) {
        self.unreferenced.retain(|&i| i != idx);
    }

    /// §4.3 allocation: take the unreferenced list's tail (the eviction
    /// victim), abort it if it is not already `Closed`, and return it ready
    /// for the caller to initialize.
    pub(crate) fn alloc_pcb(&mut self, now: Instant) -> Result<usize> {
        let idx = self.unreferenced.pop_back().ok_or(TcpError::NoPcbAvail)?;
        let state = self.pcbs[idx].state;
        if state != State::Closed {
            // §4.3: abort emits RST unless the evicted PCB is in SYN_SENT,
            // SYN_RCVD or TIME_WAIT (no established peer expects one there).
            let send_rst = !matches!(state, State::SynSent | State::SynRcvd | State::TimeWait);
            self.abort_pcb(idx, send_rst, now);
        }
        self.pcbs[idx].reset();
        Ok(idx)
    }

    /// Ephemeral-port scan of §4.3: start from a rotating cursor and return
    /// the first port in range for which no PCB already matches the
    /// prospective 4-tuple.
    pub(crate) fn alloc_ephemeral_port(
        &mut self,
        local_addr: IpAddress,
        remote_addr: IpAddress,
        remote_port: u16,
    ) -> Option<u16> {
        use crate::config::{EPHEMERAL_PORT_FIRST, EPHEMERAL_PORT_LAST};

        let span = (EPHEMERAL_PORT_LAST - EPHEMERAL_PORT_FIRST) as u32 + 1;
        let start = self.ephemeral_cursor;
        for step in 0..span {
            let port = EPHEMERAL_PORT_FIRST + (((start - EPHEMERAL_PORT_FIRST) as u32 + step) % span) as u16;
            let tuple = FourTuple {
                remote_port,
                remote_addr,
                local_port: port,
                local_addr,
            };
            if self.find_pcb(&tuple).is_none() {
                self.ephemeral_cursor = if port == EPHEMERAL_PORT_LAST {
                    EPHEMERAL_PORT_FIRST
                } else {
                    port + 1
                };
                return Some(port);
            }
        }
        None
    }

    pub(crate) fn next_listener_slot(&self) -> Option<usize> {
        self.listeners.iter().position(|l| l.is_none())
    }

    pub(crate) fn next_connection_slot(&self) -> Option<usize> {
        self.connections.iter().position(|c| c.is_none())
    }
}

/// Construction helper shared by `TcpEngine::new`: a full pool of `Closed`
/// PCBs with every index initially unreferenced, least-recently-relevant at
/// the back (arbitrary but deterministic: ascending index order).
pub(crate) fn fresh_pool<const OOS: usize>(capacity: usize) -> (Vec<Pcb<OOS>>, VecDeque<usize>) {
    let pcbs = (0..capacity).map(|_| Pcb::new()).collect::<Vec<_>>();
    let unreferenced = (0..capacity).collect::<VecDeque<_>>();
    (pcbs, unreferenced)
}

pub(crate) fn fresh_index_maps() -> (
    HashMap<FourTuple, usize>,
    HashMap<FourTuple, usize>,
) {
    (HashMap::new(), HashMap::new())
}
