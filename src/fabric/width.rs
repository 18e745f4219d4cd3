//! Data-width adaptation.
//!
//! The [`WidthAdapter`] joins a wide bus leg to a narrow one (e.g. 64-bit
//! fabric to a 32-bit peripheral), reshaping each transaction's beat
//! sequence without ever reordering transactions:
//!
//! - Requests down-convert: a full-width wide beat becomes
//!   `size / narrow_width` consecutive narrow beats with sliced strobes,
//!   and the burst length scales to match. `last` is asserted only on the
//!   final slice of the final wide beat.
//! - Read returns up-convert: `split` narrow beats fold back into one
//!   wide beat, statuses merged worst-first. A narrow burst that
//!   terminates mid-aggregate is a protocol violation and raises a fatal
//!   alignment error rather than guessing.
//! - Beats no wider than the narrow bus pass through re-laned, one beat
//!   per beat.
//!
//! Burst-length inflation is bounded at elaboration: a configuration
//! whose maximum burst cannot survive the width ratio fails to construct,
//! so the limit is never hit at runtime.

use std::collections::{HashMap, VecDeque};

use crate::bus::spec;
use crate::bus::transaction::valid_wrap_beats;
use crate::bus::{
    AddrBeat, BurstCursor, BurstType, FabricError, ReadBeat, RespStatus, TransactionChannel,
    WriteBeat,
};
use crate::fabric::ConfigError;

/// Width adapter statistics.
#[derive(Debug, Clone, Default)]
pub struct AdapterStats {
    /// Address beats converted (AW + AR).
    pub addrs_converted: u64,
    /// Wide write beats consumed.
    pub w_wide_in: u64,
    /// Narrow write beats produced.
    pub w_narrow_out: u64,
    /// Narrow read beats consumed.
    pub r_narrow_in: u64,
    /// Wide read beats produced.
    pub r_wide_out: u64,
    /// Write responses passed through.
    pub b_passed: u64,
}

/// Per-write-burst conversion state.
#[derive(Debug)]
struct WriteJob {
    /// Narrow beats per wide beat (1 = passthrough).
    split: u16,
    /// Beat size on the wide side, bytes.
    size: u8,
    /// Wide beats still to consume.
    beats_left: u16,
    /// Next slice index within the current wide beat.
    slice: u16,
    /// Wide beat currently being sliced.
    cur: Option<WriteBeat>,
    /// Per-beat address walk on the wide side.
    cursor: BurstCursor,
}

/// Per-read-transaction aggregation state, keyed by (tagged) id.
#[derive(Debug)]
struct ReadJob {
    split: u16,
    size: u8,
    /// Wide beats still expected.
    beats_left: u16,
    /// Next slice index within the wide beat being assembled.
    slice: u16,
    /// Wide beat under assembly.
    accum: Vec<u8>,
    resp: RespStatus,
    cursor: BurstCursor,
}

/// Wide-to-narrow (and back) width adapter for one bus leg.
#[derive(Debug)]
pub struct WidthAdapter {
    wide: usize,
    narrow: usize,
    w_jobs: VecDeque<WriteJob>,
    r_jobs: HashMap<u8, ReadJob>,
    stats: AdapterStats,
}

impl WidthAdapter {
    /// Elaborate an adapter between `wide`- and `narrow`-byte ports.
    ///
    /// `max_burst` is the longest wide-side burst the fabric may present;
    /// its down-converted length must fit the 256-beat limit or the
    /// configuration is rejected here, at elaboration.
    pub fn new(wide: usize, narrow: usize, max_burst: u16) -> Result<Self, ConfigError> {
        if wide == 0 || !wide.is_power_of_two() {
            return Err(ConfigError::InvalidWidth(wide));
        }
        if narrow == 0 || !narrow.is_power_of_two() || narrow > wide {
            return Err(ConfigError::InvalidWidth(narrow));
        }
        let ratio = wide / narrow;
        if max_burst as u32 * ratio as u32 > spec::MAX_BURST_BEATS as u32 {
            return Err(ConfigError::BurstExceedsTarget {
                beats: max_burst,
                ratio,
                limit: spec::MAX_BURST_BEATS,
            });
        }
        Ok(Self {
            wide,
            narrow,
            w_jobs: VecDeque::new(),
            r_jobs: HashMap::new(),
            stats: AdapterStats::default(),
        })
    }

    /// Width ratio (narrow beats per full-width wide beat).
    pub fn ratio(&self) -> usize {
        self.wide / self.narrow
    }

    /// Adapter statistics.
    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }

    /// Down-convert an address beat. Returns the converted beat and the
    /// per-beat split factor.
    fn convert_addr(&self, beat: &AddrBeat) -> Result<(AddrBeat, u16), FabricError> {
        let size = beat.size as usize;
        if size <= self.narrow {
            return Ok((*beat, 1));
        }
        if beat.addr % size as u64 != 0 {
            return Err(FabricError::Misaligned {
                addr: beat.addr,
                size: beat.size,
            });
        }
        let split = (size / self.narrow) as u16;
        let new_beats = beat.beats() * split;
        if new_beats > spec::MAX_BURST_BEATS {
            return Err(FabricError::BurstOverrun {
                id: beat.id,
                beats: new_beats,
            });
        }
        if beat.burst == BurstType::Wrap && !valid_wrap_beats(new_beats) {
            return Err(FabricError::InvalidWrapLength { beats: new_beats });
        }
        let mut narrow_beat = *beat;
        narrow_beat.len = (new_beats - 1) as u8;
        narrow_beat.size = self.narrow as u8;
        Ok((narrow_beat, split))
    }

    /// Advance the adapter by one cycle.
    ///
    /// Moves at most one beat per sub-channel. An `Err` is fatal: an
    /// upstream protocol violation the adapter cannot recover from.
    pub fn step(
        &mut self,
        wide: &mut TransactionChannel,
        narrow: &mut TransactionChannel,
    ) -> Result<(), FabricError> {
        self.step_aw(wide, narrow)?;
        self.step_ar(wide, narrow)?;
        self.step_w(wide, narrow);
        self.step_r(wide, narrow)?;
        self.step_b(wide, narrow);
        Ok(())
    }

    fn step_aw(
        &mut self,
        wide: &mut TransactionChannel,
        narrow: &mut TransactionChannel,
    ) -> Result<(), FabricError> {
        if narrow.aw.is_full() {
            return Ok(());
        }
        let beat = match wide.aw.peek() {
            Some(beat) => *beat,
            None => return Ok(()),
        };
        let (converted, split) = self.convert_addr(&beat)?;
        wide.aw.pop();
        log::trace!(
            "width: AW id={} split={} -> {} narrow beats",
            beat.id, split, converted.beats()
        );
        self.w_jobs.push_back(WriteJob {
            split,
            size: beat.size,
            beats_left: beat.beats(),
            slice: 0,
            cur: None,
            cursor: BurstCursor::new(&beat),
        });
        let _ = narrow.aw.push(converted);
        self.stats.addrs_converted += 1;
        Ok(())
    }

    fn step_ar(
        &mut self,
        wide: &mut TransactionChannel,
        narrow: &mut TransactionChannel,
    ) -> Result<(), FabricError> {
        if narrow.ar.is_full() {
            return Ok(());
        }
        let beat = match wide.ar.peek() {
            Some(beat) => *beat,
            None => return Ok(()),
        };
        let (converted, split) = self.convert_addr(&beat)?;
        wide.ar.pop();
        self.r_jobs.insert(
            beat.id,
            ReadJob {
                split,
                size: beat.size,
                beats_left: beat.beats(),
                slice: 0,
                accum: vec![0u8; self.wide],
                resp: RespStatus::Okay,
                cursor: BurstCursor::new(&beat),
            },
        );
        let _ = narrow.ar.push(converted);
        self.stats.addrs_converted += 1;
        Ok(())
    }

    /// Emit one narrow write beat from the front write job.
    fn step_w(&mut self, wide: &mut TransactionChannel, narrow: &mut TransactionChannel) {
        let job = match self.w_jobs.front_mut() {
            Some(job) => job,
            None => return,
        };
        if narrow.w.is_full() {
            return;
        }
        if job.cur.is_none() {
            job.cur = wide.w.pop();
            if job.cur.is_some() {
                self.stats.w_wide_in += 1;
            }
        }
        let beat = match &job.cur {
            Some(beat) => beat,
            None => return,
        };

        let size = job.size as usize;
        let narrow_width = self.narrow;
        let out = if job.split == 1 {
            // Passthrough: re-lane the addressed bytes onto the narrow bus.
            let wide_lane = job.cursor.lane(self.wide);
            let narrow_lane = wide_lane % narrow_width;
            let mut data = vec![0u8; narrow_width];
            data[narrow_lane..narrow_lane + size]
                .copy_from_slice(&beat.data[wide_lane..wide_lane + size]);
            let strb = ((beat.strb >> wide_lane) & ((1u64 << size) - 1)) << narrow_lane;
            WriteBeat { data, strb, last: beat.last }
        } else {
            // Slice `job.slice` of the wide beat's addressed sub-window.
            let base = job.cursor.lane(self.wide) + job.slice as usize * narrow_width;
            let data = beat.data[base..base + narrow_width].to_vec();
            let strb = (beat.strb >> base) & ((1u64 << narrow_width) - 1);
            let last = beat.last && job.slice + 1 == job.split;
            WriteBeat { data, strb, last }
        };
        let _ = narrow.w.push(out);
        self.stats.w_narrow_out += 1;

        job.slice += 1;
        if job.slice == job.split {
            job.slice = 0;
            job.cur = None;
            job.cursor.advance();
            job.beats_left -= 1;
            if job.beats_left == 0 {
                self.w_jobs.pop_front();
            }
        }
    }

    /// Fold one narrow read beat into its wide transaction.
    fn step_r(
        &mut self,
        wide: &mut TransactionChannel,
        narrow: &mut TransactionChannel,
    ) -> Result<(), FabricError> {
        if wide.r.is_full() {
            return Ok(());
        }
        let beat = match narrow.r.pop() {
            Some(beat) => beat,
            None => return Ok(()),
        };
        self.stats.r_narrow_in += 1;

        let job = match self.r_jobs.get_mut(&beat.id) {
            Some(job) => job,
            None => {
                log::warn!("width: read beat for unknown id {}", beat.id);
                return Ok(());
            }
        };

        let size = job.size as usize;
        if job.split == 1 {
            // Passthrough: re-lane back onto the wide bus.
            let mut data = vec![0u8; self.wide];
            if !beat.data.is_empty() {
                let wide_lane = job.cursor.lane(self.wide);
                let narrow_lane = wide_lane % self.narrow;
                data[wide_lane..wide_lane + size]
                    .copy_from_slice(&beat.data[narrow_lane..narrow_lane + size]);
            }
            job.cursor.advance();
            job.beats_left -= 1;
            if beat.last != (job.beats_left == 0) {
                let expected = job.beats_left;
                let id = beat.id;
                self.r_jobs.remove(&id);
                return Err(FabricError::Alignment { id, got: 0, expected });
            }
            let out = ReadBeat {
                id: beat.id,
                data,
                resp: beat.resp,
                last: beat.last,
            };
            if beat.last {
                self.r_jobs.remove(&beat.id);
            }
            let _ = wide.r.push(out);
            self.stats.r_wide_out += 1;
            return Ok(());
        }

        // Aggregating path: place this slice into the wide beat.
        if !beat.data.is_empty() {
            let base = job.cursor.lane(self.wide) + job.slice as usize * self.narrow;
            job.accum[base..base + self.narrow].copy_from_slice(&beat.data[..self.narrow]);
        }
        job.resp = job.resp.worst(beat.resp);
        job.slice += 1;

        if beat.last && job.slice != job.split {
            // Short burst: the narrow side ended mid-aggregate.
            let got = job.slice;
            let expected = job.split;
            let id = beat.id;
            self.r_jobs.remove(&id);
            return Err(FabricError::Alignment { id, got, expected });
        }

        if job.slice == job.split {
            let data = std::mem::replace(&mut job.accum, vec![0u8; self.wide]);
            let resp = job.resp;
            job.resp = RespStatus::Okay;
            job.slice = 0;
            job.cursor.advance();
            job.beats_left -= 1;
            let done = job.beats_left == 0;
            if beat.last != done {
                let expected = job.beats_left;
                let id = beat.id;
                self.r_jobs.remove(&id);
                return Err(FabricError::Alignment { id, got: 0, expected });
            }
            let out = ReadBeat {
                id: beat.id,
                data,
                resp,
                last: beat.last,
            };
            if done {
                self.r_jobs.remove(&beat.id);
            }
            let _ = wide.r.push(out);
            self.stats.r_wide_out += 1;
        }
        Ok(())
    }

    /// Pass one write response through unchanged.
    fn step_b(&mut self, wide: &mut TransactionChannel, narrow: &mut TransactionChannel) {
        if !wide.b.is_full() {
            if let Some(resp) = narrow.b.pop() {
                let _ = wide.b.push(resp);
                self.stats.b_passed += 1;
            }
        }
    }

    /// Abandon all in-progress conversions (reset).
    pub fn flush(&mut self) {
        self.w_jobs.clear();
        self.r_jobs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelDepths;

    fn channels() -> (TransactionChannel, TransactionChannel) {
        let depths = ChannelDepths { addr: 8, data: 64, resp: 8 };
        (
            TransactionChannel::new(8, depths),
            TransactionChannel::new(4, depths),
        )
    }

    fn adapter() -> WidthAdapter {
        WidthAdapter::new(8, 4, 16).expect("elaborates")
    }

    #[test]
    fn test_elaboration_rejects_bad_widths() {
        assert!(matches!(
            WidthAdapter::new(8, 3, 16),
            Err(ConfigError::InvalidWidth(3))
        ));
        assert!(matches!(
            WidthAdapter::new(4, 8, 16),
            Err(ConfigError::InvalidWidth(8))
        ));
    }

    #[test]
    fn test_elaboration_rejects_unsplittable_burst() {
        // 256-beat bursts cannot double through a 2:1 adapter.
        let err = WidthAdapter::new(8, 4, 256).unwrap_err();
        assert_eq!(
            err,
            ConfigError::BurstExceedsTarget { beats: 256, ratio: 2, limit: 256 }
        );
    }

    #[test]
    fn test_write_burst_splits_with_sliced_strobes() {
        let (mut wide, mut narrow) = channels();
        let mut adapter = adapter();

        wide.aw.push(AddrBeat::incr(3, 0x1000, 1, 8)).unwrap();
        wide.w
            .push(WriteBeat {
                data: vec![1, 2, 3, 4, 5, 6, 7, 8],
                strb: 0xFF,
                last: false,
            })
            .unwrap();
        wide.w
            .push(WriteBeat {
                data: vec![9, 10, 11, 12, 13, 14, 15, 16],
                strb: 0x0F, // only low half written
                last: true,
            })
            .unwrap();

        for _ in 0..8 {
            adapter.step(&mut wide, &mut narrow).unwrap();
        }

        let aw = narrow.aw.pop().expect("converted AW");
        assert_eq!(aw.len, 3, "burst length doubles");
        assert_eq!(aw.size, 4);
        assert_eq!(aw.id, 3);

        let beats: Vec<WriteBeat> = std::iter::from_fn(|| narrow.w.pop()).collect();
        assert_eq!(beats.len(), 4);
        assert_eq!(beats[0].data, vec![1, 2, 3, 4]);
        assert_eq!(beats[0].strb, 0xF);
        assert_eq!(beats[1].data, vec![5, 6, 7, 8]);
        assert_eq!(beats[1].strb, 0xF);
        assert_eq!(beats[2].data, vec![9, 10, 11, 12]);
        assert_eq!(beats[2].strb, 0xF);
        assert_eq!(beats[3].data, vec![13, 14, 15, 16]);
        assert_eq!(beats[3].strb, 0x0, "upper-half strobes sliced away");
        let lasts: Vec<bool> = beats.iter().map(|b| b.last).collect();
        assert_eq!(lasts, vec![false, false, false, true], "last only on final slice");
    }

    #[test]
    fn test_narrow_beat_passthrough_relanes() {
        let (mut wide, mut narrow) = channels();
        let mut adapter = adapter();

        // One 4-byte beat at 0x104: lanes 4-7 on the wide bus, 0-3 narrow.
        wide.aw.push(AddrBeat::incr(1, 0x104, 0, 4)).unwrap();
        let mut data = vec![0u8; 8];
        data[4..8].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        wide.w.push(WriteBeat { data, strb: 0xF0, last: true }).unwrap();

        for _ in 0..3 {
            adapter.step(&mut wide, &mut narrow).unwrap();
        }

        let aw = narrow.aw.pop().expect("AW passes");
        assert_eq!(aw.len, 0);
        assert_eq!(aw.size, 4);
        let beat = narrow.w.pop().expect("one narrow beat");
        assert_eq!(beat.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(beat.strb, 0xF);
        assert!(beat.last);
    }

    #[test]
    fn test_read_round_trip_is_identity() {
        // Down-convert a read, answer it on the narrow side, and check
        // the up-converted beats reproduce the wide view exactly.
        let (mut wide, mut narrow) = channels();
        let mut adapter = adapter();

        wide.ar.push(AddrBeat::incr(7, 0x2000, 1, 8)).unwrap();
        adapter.step(&mut wide, &mut narrow).unwrap();
        let ar = narrow.ar.pop().expect("converted AR");
        assert_eq!(ar.beats(), 4);

        let slices: [[u8; 4]; 4] = [[1, 2, 3, 4], [5, 6, 7, 8], [9, 10, 11, 12], [13, 14, 15, 16]];
        for (k, slice) in slices.iter().enumerate() {
            narrow
                .r
                .push(ReadBeat {
                    id: ar.id,
                    data: slice.to_vec(),
                    resp: RespStatus::Okay,
                    last: k == 3,
                })
                .unwrap();
        }
        for _ in 0..6 {
            adapter.step(&mut wide, &mut narrow).unwrap();
        }

        let b0 = wide.r.pop().expect("first wide beat");
        assert_eq!(b0.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(!b0.last);
        let b1 = wide.r.pop().expect("second wide beat");
        assert_eq!(b1.data, vec![9, 10, 11, 12, 13, 14, 15, 16]);
        assert!(b1.last);
        assert_eq!(b1.resp, RespStatus::Okay);
    }

    #[test]
    fn test_error_slice_poisons_wide_beat() {
        let (mut wide, mut narrow) = channels();
        let mut adapter = adapter();

        wide.ar.push(AddrBeat::incr(2, 0x0, 0, 8)).unwrap();
        adapter.step(&mut wide, &mut narrow).unwrap();
        let id = narrow.ar.pop().unwrap().id;

        narrow
            .r
            .push(ReadBeat { id, data: vec![0; 4], resp: RespStatus::SlaveError, last: false })
            .unwrap();
        narrow
            .r
            .push(ReadBeat { id, data: vec![0; 4], resp: RespStatus::Okay, last: true })
            .unwrap();
        for _ in 0..3 {
            adapter.step(&mut wide, &mut narrow).unwrap();
        }
        let beat = wide.r.pop().expect("wide beat");
        assert_eq!(beat.resp, RespStatus::SlaveError);
    }

    #[test]
    fn test_short_burst_raises_alignment_error() {
        let (mut wide, mut narrow) = channels();
        let mut adapter = adapter();

        // 2 wide beats -> 4 narrow beats expected; terminate after 3.
        wide.ar.push(AddrBeat::incr(9, 0x0, 1, 8)).unwrap();
        adapter.step(&mut wide, &mut narrow).unwrap();
        let id = narrow.ar.pop().unwrap().id;

        for k in 0..3 {
            narrow
                .r
                .push(ReadBeat { id, data: vec![0; 4], resp: RespStatus::Okay, last: k == 2 })
                .unwrap();
        }
        let mut result = Ok(());
        for _ in 0..4 {
            result = adapter.step(&mut wide, &mut narrow);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(
            result,
            Err(FabricError::Alignment { id: 9, got: 1, expected: 2 })
        );
    }

    #[test]
    fn test_b_response_passes_through() {
        let (mut wide, mut narrow) = channels();
        let mut adapter = adapter();
        narrow
            .b
            .push(crate::bus::RespBeat { id: 4, resp: RespStatus::Okay })
            .unwrap();
        adapter.step(&mut wide, &mut narrow).unwrap();
        let resp = wide.b.pop().expect("B passed");
        assert_eq!(resp.id, 4);
    }

    #[test]
    fn test_adapter_preserves_transaction_order() {
        let (mut wide, mut narrow) = channels();
        let mut adapter = adapter();
        for id in 0..3u8 {
            wide.aw.push(AddrBeat::incr(id, 0x100 * id as u64, 0, 8)).unwrap();
            wide.w
                .push(WriteBeat { data: vec![id; 8], strb: 0xFF, last: true })
                .unwrap();
        }
        for _ in 0..12 {
            adapter.step(&mut wide, &mut narrow).unwrap();
        }
        let ids: Vec<u8> = std::iter::from_fn(|| narrow.aw.pop()).map(|a| a.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let marks: Vec<u8> = std::iter::from_fn(|| narrow.w.pop()).map(|b| b.data[0]).collect();
        assert_eq!(marks, vec![0, 0, 1, 1, 2, 2]);
    }
}
