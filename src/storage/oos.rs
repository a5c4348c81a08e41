//! The out-of-sequence hole set of §4.2.
//!
//! Tracks up to `N` disjoint sequence-number ranges that lie beyond
//! `rcv_nxt`, plus a single "FIN seen at sequence S" marker, using fixed
//! arrays rather than linked pointers (§4.2, §9 "Intrusive linked lists").
//! The bytes themselves are written straight into the receive
//! [`RingBuffer`](super::RingBuffer) ahead of its visible prefix; this type
//! only remembers which ranges are valid.

use heapless::Vec;

use crate::wire::TcpSeqNumber as SeqNumber;

/// Largest hole-table this stack will build; concrete PCBs use a smaller
/// `N < 16` per §4.2's invariant, but merges need headroom for one
/// over-capacity insertion before trimming.
const SCRATCH_CAP: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hole {
    /// Start of the range, strictly after `rcv_nxt` at the time it was recorded.
    start: SeqNumber,
    len: u32,
}

impl Hole {
    fn end(&self) -> SeqNumber {
        self.start + self.len as usize
    }
}

/// Up to `N` disjoint out-of-sequence byte ranges plus a buffered-FIN marker.
#[derive(Debug)]
pub struct OosBuffer<const N: usize> {
    holes: Vec<Hole, N>,
    fin_seq: Option<SeqNumber>,
}

impl<const N: usize> OosBuffer<N> {
    pub const fn new() -> OosBuffer<N> {
        OosBuffer {
            holes: Vec::new(),
            fin_seq: None,
        }
    }

    pub fn is_nothing_buffered(&self) -> bool {
        self.holes.is_empty() && self.fin_seq.is_none()
    }

    pub fn reset(&mut self) {
        self.holes.clear();
        self.fin_seq = None;
    }

    /// Merge a just-received segment's range into the hole set and update
    /// the FIN marker. Returns `(needs_ack, ok)`: `needs_ack` is set when the
    /// segment changed buffered state (so the caller should ACK even though
    /// nothing became deliverable yet); `ok` is false when the segment's FIN
    /// contradicts a previously recorded FIN position, which per §7 is fatal
    /// for the PCB.
    pub fn update_for_segment_received(
        &mut self,
        rcv_nxt: SeqNumber,
        seg_seq: SeqNumber,
        seg_len: u32,
        seg_fin: bool,
    ) -> (bool, bool) {
        let mut needs_ack = false;

        // Clip to the portion strictly above rcv_nxt; per invariant 10 the
        // hole set never stores anything at or before the receive cursor.
        let (start, len) = {
            let mut start = seg_seq;
            let mut len = seg_len;
            if start <= rcv_nxt {
                let skip = (rcv_nxt - start) as u32;
                if skip >= len {
                    len = 0;
                    start = rcv_nxt;
                } else {
                    len -= skip;
                    start = rcv_nxt;
                }
            }
            (start, len)
        };

        if seg_fin {
            let fin_at = seg_seq + seg_len as usize;
            match self.fin_seq {
                Some(existing) if existing != fin_at => return (needs_ack, false),
                Some(_) => {}
                None => {
                    self.fin_seq = Some(fin_at);
                    needs_ack = true;
                }
            }
        }

        if len > 0 {
            needs_ack |= self.insert_range(rcv_nxt, start, len);
        }

        (needs_ack, true)
    }

    /// Merge `[start, start+len)` into the hole set, coalescing with
    /// existing ranges and, if that leaves more than `N` disjoint ranges,
    /// dropping the ones farthest from `rcv_nxt`. Returns whether the
    /// visible hole set actually changed.
    fn insert_range(&mut self, rcv_nxt: SeqNumber, start: SeqNumber, len: u32) -> bool {
        let new_hole = Hole { start, len };

        // Scratch list: existing holes plus the new one, enough headroom to
        // hold one extra before trimming back down to N.
        let mut scratch: Vec<Hole, SCRATCH_CAP> = Vec::new();
        for &h in self.holes.iter() {
            let _ = scratch.push(h);
        }
        let _ = scratch.push(new_hole);

        // Sort by distance from rcv_nxt so ranges closer to the receive
        // cursor sort first (kept in preference over farther ones).
        let key = |h: &Hole| (h.start - rcv_nxt) as u32;
        scratch.sort_unstable_by_key(key);

        // Coalesce overlapping/adjacent ranges in one left-to-right pass.
        let mut merged: Vec<Hole, SCRATCH_CAP> = Vec::new();
        for h in scratch {
            if let Some(last) = merged.last_mut() {
                if h.start <= last.end() {
                    let new_end = last.end().max(h.end());
                    last.len = (new_end - last.start) as u32;
                    continue;
                }
            }
            let _ = merged.push(h);
        }

        // Drop ranges farthest from rcv_nxt if we overflow the real capacity.
        merged.truncate(N);

        let changed = merged.as_slice() != self.holes.as_slice();
        self.holes.clear();
        for h in merged {
            let _ = self.holes.push(h);
        }
        changed
    }

    /// Remove and return the prefix of buffered data now contiguous with
    /// `rcv_nxt`: `(bytes, got_fin)`. `got_fin` is set when the FIN marker
    /// sits exactly at `rcv_nxt + bytes`.
    pub fn shift_available(&mut self, rcv_nxt: SeqNumber) -> (u32, bool) {
        let bytes = match self.holes.first() {
            Some(h) if h.start == rcv_nxt => {
                let h = self.holes.remove(0);
                h.len
            }
            _ => 0,
        };
        let new_rcv_nxt = rcv_nxt + bytes as usize;
        let got_fin = self.fin_seq == Some(new_rcv_nxt);
        if got_fin {
            self.fin_seq = None;
        }
        (bytes, got_fin)
    }
}

impl<const N: usize> Default for OosBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(n: u32) -> SeqNumber {
        SeqNumber(n)
    }

    #[test]
    fn scenario_s3_two_segments_merge_and_drain() {
        let mut oos: OosBuffer<4> = OosBuffer::new();
        let rcv_nxt = seq(1000);

        let (needs_ack, ok) = oos.update_for_segment_received(rcv_nxt, seq(1500), 200, false);
        assert!(ok);
        assert!(needs_ack);
        assert!(!oos.is_nothing_buffered());
        // Nothing contiguous with rcv_nxt yet.
        assert_eq!(oos.shift_available(rcv_nxt), (0, false));

        let (needs_ack, ok) = oos.update_for_segment_received(rcv_nxt, seq(1000), 500, false);
        assert!(ok);
        assert!(needs_ack);

        // First the 500 in-order bytes become available...
        let (bytes, fin) = oos.shift_available(rcv_nxt);
        assert_eq!(bytes, 500);
        assert!(!fin);
        // ...then, advancing rcv_nxt, the 1500..1700 range is now contiguous.
        let (bytes, fin) = oos.shift_available(seq(1500));
        assert_eq!(bytes, 200);
        assert!(!fin);
        assert!(oos.is_nothing_buffered());
    }

    #[test]
    fn fin_marker_requires_consistency() {
        let mut oos: OosBuffer<4> = OosBuffer::new();
        let rcv_nxt = seq(0);
        let (_, ok) = oos.update_for_segment_received(rcv_nxt, seq(100), 50, true);
        assert!(ok);
        // A second FIN claim at a different sequence is inconsistent.
        let (_, ok) = oos.update_for_segment_received(rcv_nxt, seq(100), 60, true);
        assert!(!ok);
    }

    #[test]
    fn overflow_drops_ranges_farthest_from_rcv_nxt() {
        let mut oos: OosBuffer<2> = OosBuffer::new();
        let rcv_nxt = seq(0);
        oos.update_for_segment_received(rcv_nxt, seq(10), 5, false);
        oos.update_for_segment_received(rcv_nxt, seq(100), 5, false);
        oos.update_for_segment_received(rcv_nxt, seq(200), 5, false);
        // Capacity 2: the range closest to rcv_nxt (10) and the next (100)
        // are kept; the farthest (200) is dropped.
        assert_eq!(oos.holes.len(), 2);
        assert_eq!(oos.holes[0].start, seq(10));
        assert_eq!(oos.holes[1].start, seq(100));
    }
}
