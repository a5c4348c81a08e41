//! Thin wrappers around the `log` crate, kept separate so the engine's call
//! sites read `net_trace!`/`net_debug!`/`net_warn!` regardless of which
//! logging backend is wired up by the host binary.

macro_rules! net_trace {
    ($($arg:expr),*) => { log::trace!($($arg),*) }
}
pub(crate) use net_trace;

macro_rules! net_debug {
    ($($arg:expr),*) => { log::debug!($($arg),*) }
}
pub(crate) use net_debug;

macro_rules! net_warn {
    ($($arg:expr),*) => { log::warn!($($arg),*) }
}
pub(crate) use net_warn;
