//! The engine's egress contract.
//!
//! IP forwarding, routing, ARP and the link-layer driver are external
//! collaborators (see PURPOSE & SCOPE); the core only needs a way to hand a
//! completed TCP segment to whatever builds the surrounding IPv4 datagram and
//! puts it on the wire. `IpSender` is that seam, shaped like the rest of this
//! stack's token-based transmit path: the caller reserves `tcp_len` bytes and
//! fills them in a closure, instead of the engine building and returning an
//! owned buffer.

use crate::wire::ip::Address as Ipv4Address;

/// Why a segment could not be sent right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The underlying transmit path has no space right now. Per §4.5 this is
    /// transient: the output engine arms a short retry timer and does not
    /// propagate the failure to the application.
    BufferFull,
    /// Any other transient failure (e.g. no route cached yet for `remote`).
    Other,
}

/// Hands TCP-over-IPv4 segments to the rest of the stack for delivery.
///
/// Implementations own routing, address selection and the IPv4 header; the
/// TCP core only ever calls `send` with the two endpoint addresses (needed
/// for the pseudo-header checksum) and the exact TCP segment length.
pub trait IpSender {
    /// Construct and send one TCP segment from `local` to `remote`.
    ///
    /// `emit` is called with a buffer of exactly `tcp_len` bytes, which the
    /// caller must fill with a complete TCP header (and payload, if any)
    /// before returning.
    fn send<F>(
        &mut self,
        local: Ipv4Address,
        remote: Ipv4Address,
        tcp_len: usize,
        emit: F,
    ) -> Result<(), SendError>
    where
        F: FnOnce(&mut [u8]);
}
