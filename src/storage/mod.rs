//! Fixed-capacity data structures shared by the send/receive path: a
//! segmented byte buffer (§4.1) used for both the application ring buffers
//! and payload views, and the out-of-sequence hole set (§4.2). Neither
//! allocates; both are sized at construction, in the spirit of this stack's
//! `heapless`-backed storage elsewhere.

mod oos;
mod ring;

pub use oos::OosBuffer;
pub use ring::RingBuffer;
