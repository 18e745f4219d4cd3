//! Bus protocol constants.
//!
//! These values pin down the boundary contract every port in the fabric is
//! built against: an AXI4-style split-transaction bus with five
//! sub-channels (AW, W, B, AR, R), an 8-bit 0-based burst length field and
//! power-of-two beat sizes.

// ============================================================================
// Burst encoding
// ============================================================================

/// Maximum beats in a single burst: 256.
/// The length field is 8 bits and 0-based, so value `n` encodes `n+1` beats.
pub const MAX_BURST_BEATS: u16 = 256;

/// Maximum raw value of the burst length field (encodes 256 beats).
pub const MAX_BURST_LEN: u8 = 255;

/// Legal beat counts for wrapping bursts.
/// Wrapping is only defined for 2, 4, 8 or 16 beats.
pub const WRAP_BURST_BEATS: [u16; 4] = [2, 4, 8, 16];

// ============================================================================
// Transaction id space
// ============================================================================

/// Bits of id space available to each initiator port.
///
/// Initiator-visible ids are 0..16. The crossbar augments forwarded ids
/// with a routing tag in the bits above this, so responses can be steered
/// back to the owning initiator without a side-band table.
pub const INITIATOR_ID_BITS: u32 = 4;

/// Shift applied to the initiator index to form the routing tag.
pub const ROUTE_TAG_SHIFT: u32 = INITIATOR_ID_BITS;

/// Largest id an initiator may issue.
pub const MAX_INITIATOR_ID: u8 = (1 << INITIATOR_ID_BITS) - 1;

/// Mask recovering the initiator-visible id from a tagged id.
pub const ID_MASK: u8 = MAX_INITIATOR_ID;

/// Maximum number of initiator ports the routing tag can disambiguate
/// within the 8-bit tagged id space.
pub const MAX_INITIATORS: usize = 1 << (8 - INITIATOR_ID_BITS);

// ============================================================================
// Channel depths
// ============================================================================

/// Default depth of the address (AW/AR) and response (B) sub-channels.
pub const DEFAULT_ADDR_DEPTH: usize = 4;

/// Default depth of the data (W/R) sub-channels.
pub const DEFAULT_DATA_DEPTH: usize = 16;

// ============================================================================
// Clock domain crossing
// ============================================================================

/// Default synchronizer latency of the clock-domain bridge, in sink-domain
/// cycles. Two flops of synchronization before a crossed item is visible.
pub const CDC_SYNC_LATENCY: u64 = 2;

/// Extra sink cycles a crossing may take depending on clock phase
/// alignment. Callers must not assume fixed latency; the window is
/// [CDC_SYNC_LATENCY, CDC_SYNC_LATENCY + CDC_PHASE_JITTER].
pub const CDC_PHASE_JITTER: u64 = 1;

/// Default elastic buffer depth per crossed sub-channel. Sized so a
/// correctly draining sink never backpressures the source.
pub const CDC_DEFAULT_DEPTH: usize = 8;

// ============================================================================
// Default timing
// ============================================================================

/// Default memory-target service latency, in memory-domain cycles.
pub const DEFAULT_MEM_LATENCY: u64 = 4;

/// Default peripheral-target service latency, in bus-domain cycles.
pub const DEFAULT_PERIPH_LATENCY: u64 = 1;

/// Default core-domain cycles per memory-domain cycle.
pub const DEFAULT_MEM_CLOCK_RATIO: u32 = 2;

// ============================================================================
// Default topology
// ============================================================================

/// Default wide (initiator/memory leg) data width in bytes: 64-bit.
pub const DEFAULT_WIDE_WIDTH: usize = 8;

/// Default narrow (storage peripheral) data width in bytes: 32-bit.
pub const DEFAULT_NARROW_WIDTH: usize = 4;

/// Default maximum burst length initiators are elaborated for, in beats.
/// Must survive width down-conversion within [`MAX_BURST_BEATS`].
pub const DEFAULT_MAX_BURST: u16 = 16;

/// Default DRAM region base.
pub const DEFAULT_DRAM_BASE: u64 = 0x0000_0000;

/// Default DRAM region size: 2 GiB.
pub const DEFAULT_DRAM_SIZE: u64 = 0x8000_0000;

/// Default storage peripheral window base.
pub const DEFAULT_STORAGE_BASE: u64 = 0xA000_0000;

/// Default storage peripheral window size: 64 KiB.
pub const DEFAULT_STORAGE_SIZE: u64 = 0x1_0000;

/// Bound on the reset sequencer's recorded state trace.
pub const RESET_TRACE_DEPTH: usize = 64;
