/*! Low-level packet access and construction.

The `wire` module deals with the TCP-over-IPv4 segment *representation*. As
elsewhere in this stack it is split into two layers:

 * A `Packet<T>` family gives zero-copy field access over a raw octet buffer
   (`new_unchecked`, `new_checked`, `check_len`, plus field getters/setters
   guarded by a private `field` submodule of byte ranges).
 * A `Repr` family gives a validated, owned high-level view, produced by
   `Repr::parse` and consumed by `Repr::emit`.

The `Packet::new_checked` method is a shorthand for `new_unchecked` followed by
`check_len`. When parsing untrusted input, `new_checked` is *necessary*: so long
as the buffer is not modified, no accessor will then fail. When emitting output
it is *incorrect* to call `new_checked`, since the length check may spuriously
succeed against stale bytes left over from a previous packet in a reused
buffer; the buffer length for emission is the caller's responsibility.
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

use core::fmt;

pub(crate) mod ip;
pub use self::ip::{Address as IpAddress, Endpoint as IpEndpoint, ListenEndpoint as IpListenEndpoint};

pub(crate) mod tcp;
pub use self::tcp::{
    Flags as TcpFlags, Packet as TcpPacket, Repr as TcpRepr, SeqNumber as TcpSeqNumber,
    TcpOption, HEADER_LEN as TCP_HEADER_LEN,
};

/// Parsing a packet failed.
///
/// Either it is malformed, or a field value is outside the range this stack
/// chooses to support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
