//! The Listener handle and passive-open (acceptor) model of §4.4.
//!
//! Same pool-of-slots shape as [`crate::connection`]: the application holds
//! a `Copy` [`ListenerHandle`] into an engine-owned slot, instead of owning
//! a self-referential object that points back into the PCB pool.

use crate::wire::IpAddress;

/// Decision returned from [`ListenerHandler::connection_established`].
///
/// In the source, the callback either calls `TcpConnection::acceptConnection`
/// synchronously or the PCB is aborted once the callback returns. Modeled
/// here as a return value instead of a nested synchronous call back into the
/// engine, since the engine cannot safely hand out a second `&mut` into
/// itself while already inside a callback it is driving (§5 "Suspension
/// points: none", §9 "Callback re-entrancy"). Returning
/// `Accept(handler)` is exactly the synchronous-accept path; returning
/// `Reject` is exactly "let the PCB be aborted".
pub enum AcceptDecision {
    /// Claim the pending PCB with a freshly constructed Connection handler,
    /// sized by `recv_capacity`/`send_capacity` (§12). The engine allocates
    /// the backing `ConnectionSlot` itself; the callback never sees a
    /// `ConnectionHandle` to do it with (there is no re-entrant
    /// `acceptConnection` call to make, see above).
    Accept(Box<dyn crate::connection::ConnectionHandler>, usize, usize),
    Reject,
}

/// Application-supplied callback for one listener (§6 "Listener (pure
/// virtual)").
pub trait ListenerHandler {
    /// A peer's SYN was accepted and answered with SYN-ACK, and the peer's
    /// ACK of it has now arrived. Must decide synchronously whether to keep
    /// the connection (see [`AcceptDecision`]).
    fn connection_established(&mut self) -> AcceptDecision;
}

/// A lightweight, `Copy` reference to a listener living in the engine's
/// listener table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(pub(crate) usize);

pub(crate) struct ListenerSlot {
    pub addr: Option<IpAddress>,
    pub port: u16,
    pub max_pcbs: usize,
    pub num_pcbs: usize,
    pub initial_rcv_wnd: u32,
    /// A `SYN_RCVD` PCB whose SYN has been ACKed and is awaiting the
    /// application's accept/reject decision (§3 "Listener handle... at most
    /// one pending `accept_pcb`"). Protected from eviction while occupied.
    pub accept_pcb: Option<usize>,
    pub handler: Box<dyn ListenerHandler>,
}

impl ListenerSlot {
    /// Priority used to pick between an exact-address listener and a
    /// wildcard (`0.0.0.0`) one matching the same port (§4.4: wildcard
    /// matches "with lowest priority").
    pub fn matches(&self, local_addr: IpAddress, local_port: u16) -> bool {
        self.port == local_port && (self.addr.is_none() || self.addr == Some(local_addr))
    }

    pub fn specificity(&self) -> u8 {
        if self.addr.is_some() {
            1
        } else {
            0
        }
    }
}
