//! Bus layer: transaction value types, channels and ports.
//!
//! This module provides the building blocks every fabric component is
//! made of:
//! - Transaction/beat/response value types ([`transaction`])
//! - The five-sub-channel [`TransactionChannel`] and the bounded
//!   ready/valid [`BeatFifo`] it is built from ([`channel`])
//! - Protocol constants ([`spec`])

pub mod spec;
pub mod transaction;
pub mod channel;

pub use transaction::{
    AddrBeat, BurstCursor, BurstType, ReadBeat, RespBeat, RespStatus, Transaction, TxKind,
    WriteBeat,
};
pub use channel::{BeatFifo, ChannelDepths, Completion, Port, PortStats, TransactionChannel};

/// Runtime bus protocol errors.
///
/// These indicate a protocol violation by a port or an upstream component.
/// Alignment and burst-overrun errors are fatal: they mean the fabric was
/// handed a malformed burst and cannot continue without guessing.
/// Elaboration-time misconfiguration is a separate type
/// ([`crate::fabric::ConfigError`]) and never occurs at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FabricError {
    /// Transaction id exceeds the initiator id space.
    IdOutOfRange(u8),
    /// Transaction id is already outstanding in the same namespace.
    IdInUse(u8),
    /// Beat size is not a power of two or exceeds the port width.
    InvalidBeatSize { size: u8, width: usize },
    /// Start address is not aligned to the beat size.
    Misaligned { addr: u64, size: u8 },
    /// Payload length does not divide into whole beats.
    PayloadMismatch { bytes: usize, size: u8 },
    /// Burst length exceeds what the fabric was elaborated for.
    BurstOverrun { id: u8, beats: u16 },
    /// Wrapping burst with an illegal beat count.
    InvalidWrapLength { beats: u16 },
    /// A narrow burst terminated mid-aggregate at a width up-converter.
    Alignment { id: u8, got: u16, expected: u16 },
}

impl std::fmt::Display for FabricError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdOutOfRange(id) => write!(f, "Transaction id {} out of range", id),
            Self::IdInUse(id) => write!(f, "Transaction id {} already outstanding", id),
            Self::InvalidBeatSize { size, width } => {
                write!(f, "Beat size {} invalid for {}-byte port", size, width)
            }
            Self::Misaligned { addr, size } => {
                write!(f, "Address 0x{:08x} not aligned to beat size {}", addr, size)
            }
            Self::PayloadMismatch { bytes, size } => {
                write!(f, "Payload of {} bytes not divisible into {}-byte beats", bytes, size)
            }
            Self::BurstOverrun { id, beats } => {
                write!(f, "Burst id {} of {} beats exceeds elaborated maximum", id, beats)
            }
            Self::InvalidWrapLength { beats } => {
                write!(f, "Wrapping burst of {} beats is not 2/4/8/16", beats)
            }
            Self::Alignment { id, got, expected } => {
                write!(
                    f,
                    "Burst id {} ended after {} narrow beats, expected {} (short/unaligned transfer)",
                    id, got, expected
                )
            }
        }
    }
}

impl std::error::Error for FabricError {}
