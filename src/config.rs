//! Fixed protocol constants and the engine's bounded-capacity configuration
//! surface (§4.3, §12). Nothing here is loaded from disk or changes after
//! construction, consistent with §6 "Persistent state: None."

use crate::time::Duration;

/// Largest receive window this stack will ever advertise or accept,
/// `0x3FFFFFFF` per invariant 2 (and aipstack's `MaxRcvWnd`).
pub const MAX_WINDOW: u32 = 0x3FFF_FFFF;

/// Don't let the peer's MSS option push `snd_mss` below this.
pub const MIN_ALLOWED_MSS: u16 = 128;

/// Default threshold (in bytes of freed receive window) past which a
/// standalone window-update ACK is sent instead of waiting to piggyback.
pub const DEFAULT_WND_ANN_THRESHOLD: u32 = 2700;

/// How far before `snd_una` an ACK may still be considered valid (old,
/// harmless duplicate ACKs), per RFC 5961's MAX.SND.WND guidance.
pub const MAX_ACK_BEFORE: u32 = 0xFFFF;

/// Number of duplicate ACKs that trigger fast retransmit.
pub const FAST_RTX_DUP_ACKS: u8 = 3;

/// Combined IPv4 + TCP fixed header size used when deriving `snd_mss` from
/// PMTU (`snd_mss = pmtu - HEADER_SIZE`).
pub const HEADER_SIZE: usize = 40;

pub const SYN_SENT_TIMEOUT: Duration = Duration::from_secs(30);
pub const SYN_RCVD_TIMEOUT: Duration = Duration::from_secs(20);
pub const TIME_WAIT_TIME: Duration = Duration::from_secs(120);
pub const ABANDONED_TIMEOUT: Duration = Duration::from_secs(30);
pub const INITIAL_RTX_TIME: Duration = Duration::from_secs(1);
pub const MIN_RTX_TIME: Duration = Duration::from_millis(250);
pub const MAX_RTX_TIME: Duration = Duration::from_secs(60);

/// Retry delay armed on `OutputTimer` after a transient send failure caused
/// by a full transmit path (§4.5, §7 "Transient send failure").
pub const OUTPUT_RETRY_FULL: Duration = Duration::from_millis(100);
/// Retry delay for any other transient send failure.
pub const OUTPUT_RETRY_OTHER: Duration = Duration::from_millis(10);

pub const EPHEMERAL_PORT_FIRST: u16 = 49152;
pub const EPHEMERAL_PORT_LAST: u16 = 65535;

/// Window scale this stack offers on every SYN it sends, absent a reason to
/// pick otherwise (aipstack's `TcpUtils::RcvWndShift` default).
pub const DEFAULT_RCV_WND_SHIFT: u8 = 6;

/// Bounded resources fixed for the lifetime of the engine (§12). Sized via
/// const generics on [`crate::engine::TcpEngine`] rather than grown at
/// runtime, mirroring §4.3's "fixed-capacity array... pre-allocated at
/// init".
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Window-update threshold applied to freshly-created PCBs unless the
    /// application overrides it via `setWindowUpdateThreshold`.
    pub default_wnd_ann_threshold: u32,
    /// Local interface MTU used to derive `base_snd_mss` for new PCBs.
    pub interface_mtu: u16,
    /// PRNG seed for initial sequence numbers and the ephemeral-port cursor.
    pub rand_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            default_wnd_ann_threshold: DEFAULT_WND_ANN_THRESHOLD,
            interface_mtu: 1500,
            rand_seed: 0x2545_f491_4f6c_dd1d,
        }
    }
}

/// `calc_initial_cwnd` per RFC 5681 page 5: approximately 4380 bytes,
/// clamped to `[2, 4] * mss`.
pub fn calc_initial_cwnd(mss: u16) -> u32 {
    let mss = mss as u32;
    if mss <= 1095 {
        4 * mss
    } else if mss <= 2190 {
        3 * mss
    } else {
        2 * mss
    }
}
