//! Fabric components: address decode, arbitration, width adaptation,
//! clock-domain crossing, reset sequencing, targets and the assembled
//! system.

pub mod region;
pub mod arbiter;
pub mod width;
pub mod cdc;
pub mod reset;
pub mod memory;
pub mod system;

pub use region::{Region, RegionMap};
pub use arbiter::{Crossbar, CrossbarStats, RoundRobin};
pub use width::{AdapterStats, WidthAdapter};
pub use cdc::{BridgeStats, ClockDomainBridge, ElasticBuffer};
pub use reset::{ResetOutputs, ResetSequencer, ResetState};
pub use memory::{SparseMemory, TargetModel, TargetStats};
pub use system::FabricSystem;

use thiserror::Error;

/// Elaboration-time configuration errors.
///
/// These are fatal and prevent the fabric from being constructed at all:
/// a fabric that elaborates never hits them at runtime.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Port width is zero or not a power of two.
    #[error("port width {0} is not a power of two")]
    InvalidWidth(usize),

    /// Narrow width does not divide the wide width.
    #[error("narrow width {narrow} does not divide wide width {wide}")]
    WidthNotDivisible {
        /// Wide-side width in bytes.
        wide: usize,
        /// Narrow-side width in bytes.
        narrow: usize,
    },

    /// A down-converted burst would exceed the target's burst limit.
    #[error("{beats}-beat burst x{ratio} width ratio exceeds the {limit}-beat target limit")]
    BurstExceedsTarget {
        /// Maximum elaborated burst length on the wide side, in beats.
        beats: u16,
        /// Width down-conversion ratio.
        ratio: usize,
        /// Target burst limit in beats.
        limit: u16,
    },

    /// Two regions of the address map overlap.
    #[error("region '{name}' overlaps region '{other}'")]
    RegionOverlap {
        /// Region being added.
        name: String,
        /// Existing region it collides with.
        other: String,
    },

    /// A region names a target port that does not exist.
    #[error("region '{name}' maps to unknown target {target}")]
    UnknownTarget {
        /// Offending region.
        name: String,
        /// Target index it names.
        target: usize,
    },

    /// More initiators than the id routing tag can disambiguate.
    #[error("{initiators} initiators exceed the {limit} the id routing tag supports")]
    TooManyInitiators {
        /// Requested initiator count.
        initiators: usize,
        /// Supported maximum.
        limit: usize,
    },
}
