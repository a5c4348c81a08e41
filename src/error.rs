//! Typed errors surfaced across the engine's fallible boundaries (§7,
//! "Propagation policy: All errors visible to the application are discrete
//! enum values or dedicated callbacks").

use core::fmt;

/// Resource exhaustion or routing failure at connection/listen construction
/// time (§6 "Error kinds surfaced from constructors").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpError {
    /// No route to the requested remote address.
    NoIpRoute,
    /// The ephemeral port range is fully in use.
    NoPortAvail,
    /// The PCB pool has no unreferenced entry to evict.
    NoPcbAvail,
    /// No PMTU reference is available for the destination.
    NoIpmtuAvail,
    /// Another listener already holds this local address and port.
    AddrInUse,
    /// The connection handle is not in the state this operation requires.
    InvalidState,
}

impl fmt::Display for TcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TcpError::NoIpRoute => "no IP route to remote address",
            TcpError::NoPortAvail => "no ephemeral port available",
            TcpError::NoPcbAvail => "no PCB available",
            TcpError::NoIpmtuAvail => "no PMTU reference available",
            TcpError::AddrInUse => "local address and port already in use",
            TcpError::InvalidState => "connection handle is not in the required state",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for TcpError {}

pub type Result<T> = core::result::Result<T, TcpError>;
