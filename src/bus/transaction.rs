//! Transaction, beat and response value types.
//!
//! A transaction is one burst: a single address phase followed by
//! `len + 1` data beats. The address phase travels on AW (writes) or AR
//! (reads); write data travels on W, the write response on B, and read
//! data returns on R with the response carried alongside the final beat.
//!
//! Data beats are lane-addressed: a beat's `data` vector always spans the
//! port's full native width, and the byte strobe marks which lanes are
//! meaningful. Byte lane `l` of a beat corresponds to address
//! `(beat_addr & !(width-1)) + l`.

use crate::bus::spec;

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// Read burst (AR -> R).
    Read,
    /// Write burst (AW -> W -> B).
    Write,
}

/// Burst address progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BurstType {
    /// Every beat targets the same address window (FIFO-style targets).
    Fixed,
    /// Address advances by `size` bytes per beat.
    #[default]
    Incr,
    /// Address advances by `size` and wraps at the total-burst-size
    /// boundary. Only defined for 2/4/8/16-beat bursts.
    Wrap,
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RespStatus {
    /// Transfer completed normally.
    #[default]
    Okay = 0,
    /// Exclusive access succeeded.
    ExclusiveOkay = 1,
    /// Target signalled an error.
    SlaveError = 2,
    /// Address decoded to no target.
    DecodeError = 3,
}

impl RespStatus {
    /// Decode from the 2-bit wire encoding.
    pub fn from_u8(val: u8) -> Self {
        match val & 0x3 {
            0 => Self::Okay,
            1 => Self::ExclusiveOkay,
            2 => Self::SlaveError,
            _ => Self::DecodeError,
        }
    }

    /// True for SlaveError and DecodeError.
    pub fn is_error(self) -> bool {
        matches!(self, Self::SlaveError | Self::DecodeError)
    }

    /// Merge two statuses, keeping the more severe one.
    ///
    /// Used when several partial beats fold into one response (width
    /// up-conversion): any error on a slice errors the whole beat.
    pub fn worst(self, other: Self) -> Self {
        if (other as u8) > (self as u8) {
            other
        } else {
            self
        }
    }
}

/// Address-phase beat (AW and AR payload).
///
/// QoS and region fields are unsupported by the fabric and fixed at their
/// default (zero) encoding, so they are not carried here.
#[derive(Debug, Clone, Copy)]
pub struct AddrBeat {
    /// Transaction id. Unique among outstanding transactions from the
    /// same port in the same direction namespace.
    pub id: u8,
    /// Start address of the burst.
    pub addr: u64,
    /// Burst length, 0-based: `len` encodes `len + 1` beats.
    pub len: u8,
    /// Beat size in bytes; a power of two not exceeding the port width.
    pub size: u8,
    /// Address progression across the burst.
    pub burst: BurstType,
    /// Exclusive access flag. Carried through; no monitor is modeled.
    pub lock: bool,
    /// Cacheability hints. Carried through unmodified.
    pub cache: u8,
    /// Protection flags. Carried through unmodified.
    pub prot: u8,
}

impl AddrBeat {
    /// Create an incrementing burst address beat with default flags.
    pub fn incr(id: u8, addr: u64, len: u8, size: u8) -> Self {
        Self {
            id,
            addr,
            len,
            size,
            burst: BurstType::Incr,
            lock: false,
            cache: 0,
            prot: 0,
        }
    }

    /// Number of beats in the burst.
    pub fn beats(&self) -> u16 {
        self.len as u16 + 1
    }

    /// Total payload bytes carried by the burst.
    pub fn total_bytes(&self) -> u64 {
        self.beats() as u64 * self.size as u64
    }
}

/// Write-data beat (W payload).
#[derive(Debug, Clone)]
pub struct WriteBeat {
    /// Lane-addressed data spanning the port's full width.
    pub data: Vec<u8>,
    /// Byte strobe: bit `l` enables byte lane `l`. Bits above the port
    /// width must be zero.
    pub strb: u64,
    /// Marks the final beat of the burst.
    pub last: bool,
}

/// Write-response beat (B payload).
#[derive(Debug, Clone, Copy)]
pub struct RespBeat {
    /// Id of the completed write transaction.
    pub id: u8,
    /// Completion status.
    pub resp: RespStatus,
}

/// Read-data beat (R payload).
///
/// The response status rides with every beat; the one on the `last` beat
/// is the transaction's response. Error beats carry no data (`data` is
/// empty).
#[derive(Debug, Clone)]
pub struct ReadBeat {
    /// Id of the read transaction this beat belongs to.
    pub id: u8,
    /// Lane-addressed data spanning the port's full width.
    pub data: Vec<u8>,
    /// Per-beat status.
    pub resp: RespStatus,
    /// Marks the final beat of the burst.
    pub last: bool,
}

impl ReadBeat {
    /// Single-beat error response carrying no data.
    pub fn error(id: u8, resp: RespStatus) -> Self {
        Self {
            id,
            data: Vec::new(),
            resp,
            last: true,
        }
    }
}

/// An in-flight transaction, as tracked by a port's outstanding table.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// The address phase that opened the transaction.
    pub addr: AddrBeat,
    /// Read or write.
    pub kind: TxKind,
    /// Beats observed so far (W issued, or R received).
    pub beats_seen: u16,
    /// Worst response status observed so far.
    pub resp: RespStatus,
}

impl Transaction {
    /// Open a new in-flight transaction.
    pub fn new(addr: AddrBeat, kind: TxKind) -> Self {
        Self {
            addr,
            kind,
            beats_seen: 0,
            resp: RespStatus::Okay,
        }
    }
}

/// Walks the per-beat addresses of a burst.
///
/// Fixed bursts stay put, incrementing bursts advance by `size`, and
/// wrapping bursts advance by `size` and wrap at the total-burst-size
/// boundary.
#[derive(Debug, Clone, Copy)]
pub struct BurstCursor {
    addr: u64,
    size: u64,
    burst: BurstType,
    wrap_lo: u64,
    wrap_hi: u64,
}

impl BurstCursor {
    /// Create a cursor at the first beat of `beat`'s burst.
    pub fn new(beat: &AddrBeat) -> Self {
        let size = beat.size as u64;
        let total = beat.total_bytes();
        // Wrap boundary: the container of `total` bytes holding the start
        // address, aligned to its own size.
        let wrap_lo = if total > 0 {
            (beat.addr / total) * total
        } else {
            beat.addr
        };
        Self {
            addr: beat.addr,
            size,
            burst: beat.burst,
            wrap_lo,
            wrap_hi: wrap_lo + total,
        }
    }

    /// Address of the current beat.
    pub fn current(&self) -> u64 {
        self.addr
    }

    /// Lane offset of the current beat within a bus of `width` bytes.
    pub fn lane(&self, width: usize) -> usize {
        (self.addr % width as u64) as usize
    }

    /// Advance to the next beat.
    pub fn advance(&mut self) {
        match self.burst {
            BurstType::Fixed => {}
            BurstType::Incr => self.addr += self.size,
            BurstType::Wrap => {
                self.addr += self.size;
                if self.addr >= self.wrap_hi {
                    self.addr = self.wrap_lo;
                }
            }
        }
    }
}

/// True if `beats` is a legal wrapping burst length.
pub fn valid_wrap_beats(beats: u16) -> bool {
    spec::WRAP_BURST_BEATS.contains(&beats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resp_status_encoding() {
        assert_eq!(RespStatus::Okay as u8, 0);
        assert_eq!(RespStatus::ExclusiveOkay as u8, 1);
        assert_eq!(RespStatus::SlaveError as u8, 2);
        assert_eq!(RespStatus::DecodeError as u8, 3);
        for v in 0..4u8 {
            assert_eq!(RespStatus::from_u8(v) as u8, v);
        }
    }

    #[test]
    fn test_resp_status_worst() {
        assert_eq!(RespStatus::Okay.worst(RespStatus::SlaveError), RespStatus::SlaveError);
        assert_eq!(RespStatus::DecodeError.worst(RespStatus::Okay), RespStatus::DecodeError);
        assert_eq!(RespStatus::Okay.worst(RespStatus::Okay), RespStatus::Okay);
    }

    #[test]
    fn test_addr_beat_counts() {
        let beat = AddrBeat::incr(1, 0x1000, 3, 8);
        assert_eq!(beat.beats(), 4);
        assert_eq!(beat.total_bytes(), 32);
    }

    #[test]
    fn test_cursor_incr() {
        let beat = AddrBeat::incr(0, 0x100, 3, 4);
        let mut cur = BurstCursor::new(&beat);
        let mut addrs = Vec::new();
        for _ in 0..4 {
            addrs.push(cur.current());
            cur.advance();
        }
        assert_eq!(addrs, vec![0x100, 0x104, 0x108, 0x10C]);
    }

    #[test]
    fn test_cursor_fixed() {
        let mut beat = AddrBeat::incr(0, 0x200, 7, 4);
        beat.burst = BurstType::Fixed;
        let mut cur = BurstCursor::new(&beat);
        cur.advance();
        cur.advance();
        assert_eq!(cur.current(), 0x200);
    }

    #[test]
    fn test_cursor_wrap() {
        // 4-beat wrapping burst of 4-byte beats starting mid-container:
        // 0x108 -> 0x10C -> wraps to 0x100 -> 0x104.
        let mut beat = AddrBeat::incr(0, 0x108, 3, 4);
        beat.burst = BurstType::Wrap;
        let mut cur = BurstCursor::new(&beat);
        let mut addrs = Vec::new();
        for _ in 0..4 {
            addrs.push(cur.current());
            cur.advance();
        }
        assert_eq!(addrs, vec![0x108, 0x10C, 0x100, 0x104]);
    }

    #[test]
    fn test_cursor_lane() {
        let beat = AddrBeat::incr(0, 0x104, 1, 4);
        let cur = BurstCursor::new(&beat);
        assert_eq!(cur.lane(8), 4);
        assert_eq!(cur.lane(4), 0);
    }

    #[test]
    fn test_valid_wrap_beats() {
        assert!(valid_wrap_beats(2));
        assert!(valid_wrap_beats(16));
        assert!(!valid_wrap_beats(3));
        assert!(!valid_wrap_beats(32));
    }

    #[test]
    fn test_read_beat_error_has_no_data() {
        let beat = ReadBeat::error(5, RespStatus::DecodeError);
        assert!(beat.data.is_empty());
        assert!(beat.last);
        assert_eq!(beat.resp, RespStatus::DecodeError);
    }
}
