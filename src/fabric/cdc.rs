//! Clock-domain crossing.
//!
//! The [`ClockDomainBridge`] carries one transaction channel between two
//! independently advancing clock domains. Each of the five sub-channels
//! crosses through its own [`ElasticBuffer`], so backpressure on one
//! sub-channel can never block another, which is the cross-channel
//! deadlock a shared crossing would invite.
//!
//! Every item is stamped with its earliest visible cycle in the
//! destination domain: `dest_now + sync_latency + phase`, where `phase`
//! is 0 or 1 depending on how the two clocks happen to line up. Latency
//! is therefore bounded but not fixed; callers must not assume a
//! constant. Order within a sub-channel is preserved, and nothing is
//! lost or duplicated: an item either waits in its buffer or is
//! delivered exactly once.

use std::collections::VecDeque;

use crate::bus::spec;
use crate::bus::{AddrBeat, ReadBeat, RespBeat, TransactionChannel, WriteBeat};

/// Bounded FIFO whose items become visible at a stamped cycle.
#[derive(Debug, Clone)]
pub struct ElasticBuffer<T> {
    q: VecDeque<(u64, T)>,
    capacity: usize,
}

impl<T> ElasticBuffer<T> {
    /// Create a buffer with the given depth.
    pub fn new(capacity: usize) -> Self {
        Self {
            q: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queue an item that becomes visible at `arrival`.
    pub fn push(&mut self, arrival: u64, item: T) -> Result<(), T> {
        if self.q.len() < self.capacity {
            self.q.push_back((arrival, item));
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Take the oldest item if its arrival cycle has been reached.
    /// Items behind a not-yet-visible front wait: order is preserved.
    pub fn pop_ready(&mut self, now: u64) -> Option<T> {
        match self.q.front() {
            Some((arrival, _)) if *arrival <= now => self.q.pop_front().map(|(_, item)| item),
            _ => None,
        }
    }

    /// Queued items, visible or not.
    pub fn len(&self) -> usize {
        self.q.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// True when a push would fail.
    pub fn is_full(&self) -> bool {
        self.q.len() >= self.capacity
    }

    /// Drop everything queued. Returns the number of items discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.q.len();
        self.q.clear();
        n
    }
}

/// Bridge statistics.
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    /// Beats crossed source -> sink (requests).
    pub to_sink: u64,
    /// Beats crossed sink -> source (responses).
    pub to_source: u64,
    /// Beats discarded by reset flushes.
    pub flushed: u64,
}

/// Five-channel clock-domain bridge for one bus leg.
///
/// The "source" side is the bus-fabric domain issuing requests; the
/// "sink" side is the target's domain answering them.
pub struct ClockDomainBridge {
    to_sink_aw: ElasticBuffer<AddrBeat>,
    to_sink_w: ElasticBuffer<WriteBeat>,
    to_sink_ar: ElasticBuffer<AddrBeat>,
    to_src_b: ElasticBuffer<RespBeat>,
    to_src_r: ElasticBuffer<ReadBeat>,
    sync_latency: u64,
    stats: BridgeStats,
}

impl ClockDomainBridge {
    /// Create a bridge with per-channel buffers of `depth` entries and
    /// the given synchronizer latency (destination-domain cycles).
    pub fn new(depth: usize, sync_latency: u64) -> Self {
        Self {
            to_sink_aw: ElasticBuffer::new(depth),
            to_sink_w: ElasticBuffer::new(depth),
            to_sink_ar: ElasticBuffer::new(depth),
            to_src_b: ElasticBuffer::new(depth),
            to_src_r: ElasticBuffer::new(depth),
            sync_latency,
            stats: BridgeStats::default(),
        }
    }

    /// Bridge with default depth and latency.
    pub fn with_defaults() -> Self {
        Self::new(spec::CDC_DEFAULT_DEPTH, spec::CDC_SYNC_LATENCY)
    }

    /// Bridge statistics.
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Arrival stamp for an item entering the destination domain now at
    /// `dest_now`. The extra cycle models clock phase alignment.
    fn arrival(&self, dest_now: u64, src_now: u64) -> u64 {
        let phase = (src_now ^ dest_now) & spec::CDC_PHASE_JITTER;
        dest_now + self.sync_latency + phase
    }

    /// Advance the source (bus-fabric) side by one of its cycles:
    /// capture outgoing requests, deliver arrived responses.
    pub fn step_source(
        &mut self,
        chan: &mut TransactionChannel,
        src_now: u64,
        sink_now: u64,
    ) {
        if !self.to_sink_aw.is_full() {
            if let Some(beat) = chan.aw.pop() {
                let at = self.arrival(sink_now, src_now);
                log::trace!("cdc: AW id={} crossing, visible at sink cycle {}", beat.id, at);
                let _ = self.to_sink_aw.push(at, beat);
                self.stats.to_sink += 1;
            }
        }
        if !self.to_sink_w.is_full() {
            if let Some(beat) = chan.w.pop() {
                let _ = self.to_sink_w.push(self.arrival(sink_now, src_now), beat);
                self.stats.to_sink += 1;
            }
        }
        if !self.to_sink_ar.is_full() {
            if let Some(beat) = chan.ar.pop() {
                let _ = self.to_sink_ar.push(self.arrival(sink_now, src_now), beat);
                self.stats.to_sink += 1;
            }
        }
        if !chan.b.is_full() {
            if let Some(resp) = self.to_src_b.pop_ready(src_now) {
                let _ = chan.b.push(resp);
            }
        }
        if !chan.r.is_full() {
            if let Some(beat) = self.to_src_r.pop_ready(src_now) {
                let _ = chan.r.push(beat);
            }
        }
    }

    /// Advance the sink (target) side by one of its cycles: deliver
    /// arrived requests, capture outgoing responses.
    pub fn step_sink(
        &mut self,
        chan: &mut TransactionChannel,
        sink_now: u64,
        src_now: u64,
    ) {
        if !chan.aw.is_full() {
            if let Some(beat) = self.to_sink_aw.pop_ready(sink_now) {
                let _ = chan.aw.push(beat);
            }
        }
        if !chan.w.is_full() {
            if let Some(beat) = self.to_sink_w.pop_ready(sink_now) {
                let _ = chan.w.push(beat);
            }
        }
        if !chan.ar.is_full() {
            if let Some(beat) = self.to_sink_ar.pop_ready(sink_now) {
                let _ = chan.ar.push(beat);
            }
        }
        if !self.to_src_b.is_full() {
            if let Some(resp) = chan.b.pop() {
                let _ = self.to_src_b.push(self.arrival(src_now, sink_now), resp);
                self.stats.to_source += 1;
            }
        }
        if !self.to_src_r.is_full() {
            if let Some(beat) = chan.r.pop() {
                let _ = self.to_src_r.push(self.arrival(src_now, sink_now), beat);
                self.stats.to_source += 1;
            }
        }
    }

    /// Abandon everything mid-crossing (reset). Returns the count.
    pub fn flush(&mut self) -> usize {
        let n = self.to_sink_aw.clear()
            + self.to_sink_w.clear()
            + self.to_sink_ar.clear()
            + self.to_src_b.clear()
            + self.to_src_r.clear();
        self.stats.flushed += n as u64;
        n
    }
}
