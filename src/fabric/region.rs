//! Address decode.
//!
//! The [`RegionMap`] is the fabric's static routing table: an ordered set
//! of non-overlapping address ranges, each naming the target port that
//! services it. It is built once at elaboration and never mutated, so
//! every component that consults it sees the same immutable map.
//!
//! An address inside exactly one region decodes to that region's target;
//! an address inside none decodes to `None`, which the crossbar turns
//! into a DecodeError response. Overlap is rejected at elaboration, so
//! no address is ever ambiguous.

use crate::fabric::ConfigError;

/// One address range mapped to a target port.
#[derive(Debug, Clone)]
pub struct Region {
    /// Region name, for diagnostics.
    pub name: String,
    /// First address of the range.
    pub base: u64,
    /// Size of the range in bytes.
    pub size: u64,
    /// Index of the target port servicing this range.
    pub target: usize,
}

impl Region {
    /// Create a region.
    pub fn new(name: impl Into<String>, base: u64, size: u64, target: usize) -> Self {
        Self {
            name: name.into(),
            base,
            size,
            target,
        }
    }

    /// One past the last address of the range.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// True if `addr` falls inside this region.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// True if this region and `[base, base+size)` share any address.
    pub fn overlaps(&self, base: u64, size: u64) -> bool {
        let end = base.saturating_add(size);
        base < self.end() && end > self.base
    }
}

/// Static address map: ordered regions, elaboration-checked.
#[derive(Debug, Clone)]
pub struct RegionMap {
    regions: Vec<Region>,
}

impl RegionMap {
    /// Build a map from the given regions.
    ///
    /// Fails if any two regions overlap or a region names a target index
    /// outside `num_targets`.
    pub fn new(regions: Vec<Region>, num_targets: usize) -> Result<Self, ConfigError> {
        for (i, region) in regions.iter().enumerate() {
            if region.target >= num_targets {
                return Err(ConfigError::UnknownTarget {
                    name: region.name.clone(),
                    target: region.target,
                });
            }
            for other in &regions[..i] {
                if other.overlaps(region.base, region.size) {
                    return Err(ConfigError::RegionOverlap {
                        name: region.name.clone(),
                        other: other.name.clone(),
                    });
                }
            }
        }
        Ok(Self { regions })
    }

    /// Decode an address to its target port index.
    ///
    /// Returns `None` for an address outside every region; the caller
    /// surfaces that as a DecodeError response.
    pub fn decode(&self, addr: u64) -> Option<usize> {
        self.regions
            .iter()
            .find(|r| r.contains(addr))
            .map(|r| r.target)
    }

    /// The region containing `addr`, if any.
    pub fn region_at(&self, addr: u64) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// All regions, in elaboration order.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> RegionMap {
        RegionMap::new(
            vec![
                Region::new("dram", 0x0000_0000, 0x8000_0000, 1),
                Region::new("storage", 0xA000_0000, 0x1_0000, 0),
            ],
            2,
        )
        .expect("valid map")
    }

    #[test]
    fn test_decode_inside_regions() {
        let m = map();
        assert_eq!(m.decode(0x0), Some(1));
        assert_eq!(m.decode(0x7FFF_FFFF), Some(1));
        assert_eq!(m.decode(0xA000_0000), Some(0));
        assert_eq!(m.decode(0xA000_FFFF), Some(0));
    }

    #[test]
    fn test_decode_outside_all_regions() {
        let m = map();
        assert_eq!(m.decode(0x8000_0000), None);
        assert_eq!(m.decode(0xA001_0000), None);
        assert_eq!(m.decode(u64::MAX), None);
    }

    #[test]
    fn test_every_address_unambiguous() {
        // Probe region edges: each address decodes to at most one target,
        // and boundaries are exact.
        let m = map();
        for addr in [0x0, 0x7FFF_FFFF, 0x8000_0000, 0x9FFF_FFFF, 0xA000_0000, 0xA001_0000] {
            let hits = m
                .regions()
                .iter()
                .filter(|r| r.contains(addr))
                .count();
            assert!(hits <= 1, "address 0x{:x} decodes to {} regions", addr, hits);
            assert_eq!(m.decode(addr).is_some(), hits == 1);
        }
    }

    #[test]
    fn test_overlap_rejected() {
        let err = RegionMap::new(
            vec![
                Region::new("a", 0x0, 0x1000, 0),
                Region::new("b", 0x800, 0x1000, 1),
            ],
            2,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::RegionOverlap { .. }));
    }

    #[test]
    fn test_adjacent_regions_allowed() {
        let m = RegionMap::new(
            vec![
                Region::new("a", 0x0, 0x1000, 0),
                Region::new("b", 0x1000, 0x1000, 1),
            ],
            2,
        )
        .expect("adjacent regions do not overlap");
        assert_eq!(m.decode(0xFFF), Some(0));
        assert_eq!(m.decode(0x1000), Some(1));
    }

    #[test]
    fn test_unknown_target_rejected() {
        let err = RegionMap::new(vec![Region::new("a", 0x0, 0x1000, 5)], 2).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownTarget {
                name: "a".into(),
                target: 5
            }
        );
    }
}
