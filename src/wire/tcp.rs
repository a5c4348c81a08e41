use byteorder::{ByteOrder, NetworkEndian};
use core::cmp::Ordering;
use core::fmt;
use core::ops::{Add, Sub};

use super::ip::{checksum, Address as Ipv4Address};
use super::{Error, Result};

/// A TCP sequence number.
///
/// Sequence numbers form a cyclic 32-bit space; comparisons between two
/// sequence numbers are only meaningful relative to a reference point (they
/// are never more than `1<<31` apart in the cases this stack cares about).
/// `PartialOrd` here implements that modular "is strictly after" relation,
/// per RFC 793 §3.3.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct SeqNumber(pub u32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<usize> for SeqNumber {
    type Output = SeqNumber;
    fn add(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs as u32))
    }
}

impl Sub<usize> for SeqNumber {
    type Output = SeqNumber;
    fn sub(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs as u32))
    }
}

impl Sub<SeqNumber> for SeqNumber {
    /// The signed distance `self - rhs`, assuming the two are within `1<<31` of
    /// each other. Negative when `self` precedes `rhs`.
    type Output = i32;
    fn sub(self, rhs: SeqNumber) -> i32 {
        self.0.wrapping_sub(rhs.0) as i32
    }
}

impl PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeqNumber {
    /// Modular "is after" comparison. Only meaningful for sequence numbers
    /// known to lie within `1<<31` of each other, which holds for every
    /// comparison this stack performs (window and OOS-hole bounds are always
    /// far smaller than that span).
    fn cmp(&self, other: &Self) -> Ordering {
        (*self - *other).cmp(&0)
    }
}

impl SeqNumber {
    /// `self` strictly between `start` (exclusive) and `end` (exclusive), modulo wraparound.
    pub fn in_range_exclusive(self, start: SeqNumber, end: SeqNumber) -> bool {
        (self - start) > 0 && (end - self) > 0
    }

    /// `self` in `[start, end)`, modulo wraparound.
    pub fn in_window(self, start: SeqNumber, len: u32) -> bool {
        let off = (self - start) as i64;
        off >= 0 && (off as u32) < len
    }
}

/// The 5 TCP control flags this stack interprets. Bits outside this set (URG,
/// ECE, CWR, NS, the three reserved bits) are ignored on input and always
/// zero on output, per §6.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    const FIN: u8 = 1 << 0;
    const SYN: u8 = 1 << 1;
    const RST: u8 = 1 << 2;
    const PSH: u8 = 1 << 3;
    const ACK: u8 = 1 << 4;

    pub const fn fin() -> Flags {
        Flags(Self::FIN)
    }
    pub const fn syn() -> Flags {
        Flags(Self::SYN)
    }
    pub const fn rst() -> Flags {
        Flags(Self::RST)
    }
    pub const fn ack() -> Flags {
        Flags(Self::ACK)
    }
    pub const fn psh() -> Flags {
        Flags(Self::PSH)
    }

    pub const fn is_fin(self) -> bool {
        self.0 & Self::FIN != 0
    }
    pub const fn is_syn(self) -> bool {
        self.0 & Self::SYN != 0
    }
    pub const fn is_rst(self) -> bool {
        self.0 & Self::RST != 0
    }
    pub const fn is_psh(self) -> bool {
        self.0 & Self::PSH != 0
    }
    pub const fn is_ack(self) -> bool {
        self.0 & Self::ACK != 0
    }

    pub const fn with_fin(self, v: bool) -> Flags {
        self.with(Self::FIN, v)
    }
    pub const fn with_syn(self, v: bool) -> Flags {
        self.with(Self::SYN, v)
    }
    pub const fn with_rst(self, v: bool) -> Flags {
        self.with(Self::RST, v)
    }
    pub const fn with_psh(self, v: bool) -> Flags {
        self.with(Self::PSH, v)
    }
    pub const fn with_ack(self, v: bool) -> Flags {
        self.with(Self::ACK, v)
    }

    const fn with(self, bit: u8, v: bool) -> Flags {
        if v {
            Flags(self.0 | bit)
        } else {
            Flags(self.0 & !bit)
        }
    }

    fn from_raw12(raw: u16) -> Flags {
        // Bits 7..=0 of the low byte of the 12-bit flags field carry
        // CWR ECE URG ACK PSH RST SYN FIN, MSB first - i.e. this stack's
        // five recognized flags sit at the bottom of `raw`.
        Flags((raw & 0x3f) as u8 & (Self::FIN | Self::SYN | Self::RST | Self::PSH | Self::ACK))
    }

    fn to_raw12(self) -> u16 {
        self.0 as u16 & 0x3f
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_syn() {
            write!(f, " SYN")?;
        }
        if self.is_fin() {
            write!(f, " FIN")?;
        }
        if self.is_rst() {
            write!(f, " RST")?;
        }
        if self.is_psh() {
            write!(f, " PSH")?;
        }
        if self.is_ack() {
            write!(f, " ACK")?;
        }
        Ok(())
    }
}

/// A parsed TCP option, recognized per §6: END, NOP, MSS, WND_SCALE.
/// Unrecognized option kinds are skipped by their length byte while scanning;
/// they are never surfaced as a variant.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TcpOption {
    MaxSegmentSize(u16),
    WindowScale(u8),
}

mod opt_kind {
    pub const END: u8 = 0;
    pub const NOP: u8 = 1;
    pub const MSS: u8 = 2;
    pub const WND_SCALE: u8 = 3;
}

impl TcpOption {
    /// Scan `data` (the options area following the fixed header) for
    /// recognized options, calling `f` for each one found. Returns `Err` if an
    /// option length is malformed (too short for its header or overruns the
    /// buffer); per §6 this terminates parsing but does not invalidate fields
    /// already parsed from the fixed header.
    pub fn scan(mut data: &[u8], mut f: impl FnMut(TcpOption)) -> Result<()> {
        while !data.is_empty() {
            let kind = data[0];
            if kind == opt_kind::END {
                break;
            }
            if kind == opt_kind::NOP {
                data = &data[1..];
                continue;
            }
            if data.len() < 2 {
                return Err(Error);
            }
            let len = data[1] as usize;
            if len < 2 || len > data.len() {
                return Err(Error);
            }
            let body = &data[2..len];
            match kind {
                opt_kind::MSS if len == 4 => {
                    f(TcpOption::MaxSegmentSize(NetworkEndian::read_u16(body)));
                }
                opt_kind::WND_SCALE if len == 3 => {
                    f(TcpOption::WindowScale(body[0]));
                }
                _ => {}
            }
            data = &data[len..];
        }
        Ok(())
    }

    const fn encoded_len(&self) -> usize {
        match self {
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
        }
    }

    fn emit(&self, buffer: &mut [u8]) -> usize {
        match *self {
            TcpOption::MaxSegmentSize(mss) => {
                buffer[0] = opt_kind::MSS;
                buffer[1] = 4;
                NetworkEndian::write_u16(&mut buffer[2..4], mss);
                4
            }
            TcpOption::WindowScale(shift) => {
                buffer[0] = opt_kind::WND_SCALE;
                buffer[1] = 3;
                buffer[2] = shift;
                3
            }
        }
    }
}

mod hdr_field {
    use crate::wire::field::*;

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ: Field = 4..8;
    pub const ACK: Field = 8..12;
    pub const FLAGS: Field = 12..14;
    pub const WINDOW: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT: Field = 18..20;

    pub const fn OPTIONS(data_offset_words: u8) -> Field {
        CHECKSUM.end + 2..(data_offset_words as usize) * 4
    }
    pub const fn PAYLOAD(data_offset_words: u8) -> Rest {
        ((data_offset_words as usize) * 4)..
    }
}

pub const HEADER_LEN: usize = hdr_field::URGENT.end;

/// A read/write wrapper around a TCP segment header buffer.
#[derive(Debug, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with TCP segment structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for [new_unchecked] followed by [check_len].
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure no accessor will panic, and that the data offset is self-consistent.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error);
        }
        let data_offset = self.data_offset();
        if data_offset < 5 || (data_offset as usize) * 4 > len {
            return Err(Error);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    #[inline]
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[hdr_field::SRC_PORT])
    }

    #[inline]
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[hdr_field::DST_PORT])
    }

    #[inline]
    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_u32(&self.buffer.as_ref()[hdr_field::SEQ]))
    }

    #[inline]
    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_u32(&self.buffer.as_ref()[hdr_field::ACK]))
    }

    #[inline]
    pub fn data_offset(&self) -> u8 {
        self.buffer.as_ref()[hdr_field::FLAGS.start] >> 4
    }

    #[inline]
    pub fn flags(&self) -> Flags {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[hdr_field::FLAGS]);
        Flags::from_raw12(raw)
    }

    #[inline]
    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[hdr_field::WINDOW])
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[hdr_field::CHECKSUM])
    }

    #[inline]
    pub fn header_len(&self) -> usize {
        (self.data_offset() as usize) * 4
    }

    pub fn options(&self) -> &[u8] {
        let range = hdr_field::OPTIONS(self.data_offset());
        &self.buffer.as_ref()[range.start..range.end.max(range.start)]
    }

    pub fn verify_checksum(&self, src_addr: &Ipv4Address, dst_addr: &Ipv4Address) -> bool {
        let data = self.buffer.as_ref();
        checksum::combine(&[
            checksum::pseudo_header_tcp(src_addr, dst_addr, data.len() as u32),
            checksum::data(data),
        ]) == 0
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        let data_offset = self.data_offset();
        &self.buffer.as_ref()[hdr_field::PAYLOAD(data_offset)]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    #[inline]
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[hdr_field::SRC_PORT], value)
    }

    #[inline]
    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[hdr_field::DST_PORT], value)
    }

    #[inline]
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[hdr_field::SEQ], value.0)
    }

    #[inline]
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[hdr_field::ACK], value.0)
    }

    #[inline]
    pub fn set_data_offset(&mut self, value: u8) {
        let data = self.buffer.as_mut();
        let low = NetworkEndian::read_u16(&data[hdr_field::FLAGS]) & 0x0fff;
        NetworkEndian::write_u16(&mut data[hdr_field::FLAGS], low | ((value as u16) << 12));
    }

    #[inline]
    pub fn set_flags(&mut self, flags: Flags) {
        let data = self.buffer.as_mut();
        let offset_bits = NetworkEndian::read_u16(&data[hdr_field::FLAGS]) & 0xf000;
        NetworkEndian::write_u16(&mut data[hdr_field::FLAGS], offset_bits | flags.to_raw12());
    }

    #[inline]
    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[hdr_field::WINDOW], value)
    }

    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[hdr_field::CHECKSUM], value)
    }

    #[inline]
    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[hdr_field::URGENT], value)
    }

    pub fn options_mut(&mut self, data_offset: u8) -> &mut [u8] {
        let range = hdr_field::OPTIONS(data_offset);
        &mut self.buffer.as_mut()[range.start..range.end.max(range.start)]
    }

    pub fn fill_checksum(&mut self, src_addr: &Ipv4Address, dst_addr: &Ipv4Address) {
        self.set_checksum(0);
        let checksum = {
            let data = self.buffer.as_ref();
            !checksum::combine(&[
                checksum::pseudo_header_tcp(src_addr, dst_addr, data.len() as u32),
                checksum::data(data),
            ])
        };
        self.set_checksum(checksum);
    }

    #[inline]
    pub fn payload_mut(&mut self, data_offset: u8) -> &mut [u8] {
        let data = self.buffer.as_mut();
        &mut data[hdr_field::PAYLOAD(data_offset)]
    }
}

/// A high-level representation of a TCP segment header, options parsed and
/// validated, checksum verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_number: SeqNumber,
    pub ack_number: Option<SeqNumber>,
    pub flags: Flags,
    pub window_len: u16,
    pub max_seg_size: Option<u16>,
    pub window_scale: Option<u8>,
}

impl Repr {
    /// Parse a TCP segment and return a high-level representation, or `Error`
    /// if the checksum fails to verify or the header is malformed. Checksum
    /// failure is silent per §6 — callers drop the segment rather than
    /// surfacing the error further.
    pub fn parse(
        packet: &Packet<&[u8]>,
        src_addr: &Ipv4Address,
        dst_addr: &Ipv4Address,
    ) -> Result<Repr> {
        packet.check_len()?;
        if !packet.verify_checksum(src_addr, dst_addr) {
            return Err(Error);
        }

        let flags = packet.flags();
        let mut max_seg_size = None;
        let mut window_scale = None;
        // Options are only meaningful on a SYN per §6; scan regardless but
        // callers only use them when `flags.is_syn()`.
        let _ = TcpOption::scan(packet.options(), |opt| match opt {
            TcpOption::MaxSegmentSize(mss) => max_seg_size = Some(mss),
            TcpOption::WindowScale(shift) => window_scale = Some(shift.min(14)),
        });

        Ok(Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            seq_number: packet.seq_number(),
            ack_number: if flags.is_ack() {
                Some(packet.ack_number())
            } else {
                None
            },
            flags,
            window_len: packet.window_len(),
            max_seg_size,
            window_scale: if flags.is_syn() { window_scale } else { None },
        })
    }

    /// Number of header bytes (including options) this representation will emit.
    pub fn header_len(&self) -> usize {
        let mut options_len = 0;
        if self.max_seg_size.is_some() {
            options_len += 4;
        }
        if self.window_scale.is_some() {
            options_len += 3;
        }
        if options_len > 0 {
            // NOPs / END pad to a 4-byte boundary.
            options_len += (4 - options_len % 4) % 4;
        }
        HEADER_LEN + options_len
    }

    /// Emit this representation into `packet`, whose buffer must be exactly
    /// `header_len() + payload.len()` bytes, with the payload already written
    /// past the header. Fills in the checksum last.
    pub fn emit(&self, packet: &mut Packet<&mut [u8]>, src_addr: &Ipv4Address, dst_addr: &Ipv4Address) {
        let header_len = self.header_len();
        let data_offset = (header_len / 4) as u8;

        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or_default());
        packet.set_data_offset(data_offset);
        packet.set_flags(self.flags.with_ack(self.ack_number.is_some()));
        packet.set_window_len(self.window_len);
        packet.set_urgent_at(0);

        let mut options = packet.options_mut(data_offset);
        if let Some(mss) = self.max_seg_size {
            let n = TcpOption::MaxSegmentSize(mss).emit(options);
            options = &mut options[n..];
        }
        if let Some(shift) = self.window_scale {
            let n = TcpOption::WindowScale(shift).emit(options);
            options = &mut options[n..];
        }
        for b in options.iter_mut() {
            *b = 0;
        }

        packet.fill_checksum(src_addr, dst_addr);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TCP src={} dst={} seq={}{} win={}{}",
            self.src_port,
            self.dst_port,
            self.seq_number,
            self.flags,
            self.window_len,
            match self.ack_number {
                Some(ack) => format!(" ack={ack}"),
                None => String::new(),
            }
        )
    }
}
