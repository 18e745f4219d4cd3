//! Transaction channels and ports.
//!
//! A [`TransactionChannel`] bundles the five sub-channels of one
//! split-transaction bus port (AW, W, B, AR, R). Each sub-channel is a
//! [`BeatFifo`]: a bounded queue whose `push` fails when full. That
//! failure is the ready/valid backpressure of the modeled handshake, so
//! producers retry on a later cycle instead of losing data.
//!
//! A [`Port`] is an initiator endpoint: it owns the channel plus the
//! outstanding-transaction tables for both id namespaces (reads and
//! writes are independent), stages burst requests, and matches responses
//! back to completions. The tables are exclusively owned by the port and
//! mutated only from its own domain's step functions.

use std::collections::{HashMap, VecDeque};

use crate::bus::spec;
use crate::bus::transaction::{
    AddrBeat, BurstCursor, BurstType, ReadBeat, RespBeat, RespStatus, Transaction, TxKind,
    WriteBeat,
};
use crate::bus::FabricError;

/// Bounded FIFO modeling one ready/valid sub-channel.
#[derive(Debug, Clone)]
pub struct BeatFifo<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T> BeatFifo<T> {
    /// Create a FIFO with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a beat. Hands the beat back to the caller when the FIFO is
    /// full; that is backpressure.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.data.len() < self.capacity {
            self.data.push_back(item);
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Pop the oldest beat.
    pub fn pop(&mut self) -> Option<T> {
        self.data.pop_front()
    }

    /// Peek at the oldest beat without consuming it.
    pub fn peek(&self) -> Option<&T> {
        self.data.front()
    }

    /// Number of queued beats.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when a push would fail.
    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Free slots remaining.
    pub fn space(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Drop everything queued. Returns the number of beats discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.data.len();
        self.data.clear();
        n
    }
}

/// Per-sub-channel FIFO depths.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDepths {
    /// AW/AR depth.
    pub addr: usize,
    /// W/R depth.
    pub data: usize,
    /// B depth.
    pub resp: usize,
}

impl Default for ChannelDepths {
    fn default() -> Self {
        Self {
            addr: spec::DEFAULT_ADDR_DEPTH,
            data: spec::DEFAULT_DATA_DEPTH,
            resp: spec::DEFAULT_ADDR_DEPTH,
        }
    }
}

/// One split-transaction bus port: five independent sub-channels.
///
/// Direction is a matter of which end pushes and which pops: an initiator
/// pushes AW/W/AR and pops B/R; a target does the opposite.
#[derive(Debug)]
pub struct TransactionChannel {
    /// Write address phase.
    pub aw: BeatFifo<AddrBeat>,
    /// Write data beats.
    pub w: BeatFifo<WriteBeat>,
    /// Write responses.
    pub b: BeatFifo<RespBeat>,
    /// Read address phase.
    pub ar: BeatFifo<AddrBeat>,
    /// Read data beats.
    pub r: BeatFifo<ReadBeat>,
    width: usize,
}

impl TransactionChannel {
    /// Create a channel for a port of `width` bytes.
    pub fn new(width: usize, depths: ChannelDepths) -> Self {
        Self {
            aw: BeatFifo::new(depths.addr),
            w: BeatFifo::new(depths.data),
            b: BeatFifo::new(depths.resp),
            ar: BeatFifo::new(depths.addr),
            r: BeatFifo::new(depths.data),
            width,
        }
    }

    /// Native data width of the port, in bytes.
    pub fn width(&self) -> usize {
        self.width
    }

    /// True when no sub-channel holds any beat.
    pub fn is_idle(&self) -> bool {
        self.aw.is_empty()
            && self.w.is_empty()
            && self.b.is_empty()
            && self.ar.is_empty()
            && self.r.is_empty()
    }

    /// Abandon everything in flight on every sub-channel.
    /// Returns the number of beats discarded.
    pub fn flush(&mut self) -> usize {
        self.aw.clear() + self.w.clear() + self.b.clear() + self.ar.clear() + self.r.clear()
    }
}

/// A finished transaction, as observed by the issuing initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Write burst completed.
    Write {
        /// Transaction id.
        id: u8,
        /// Final status.
        resp: RespStatus,
    },
    /// Read burst completed.
    Read {
        /// Transaction id.
        id: u8,
        /// Worst status observed across the burst's beats.
        resp: RespStatus,
        /// Logical payload: the addressed bytes of each beat, in burst
        /// order. Empty for error responses that carried no data.
        data: Vec<u8>,
    },
}

/// Initiator port statistics.
#[derive(Debug, Clone, Default)]
pub struct PortStats {
    /// Write bursts accepted for issue.
    pub writes_issued: u64,
    /// Read bursts accepted for issue.
    pub reads_issued: u64,
    /// Write completions observed.
    pub writes_completed: u64,
    /// Read completions observed.
    pub reads_completed: u64,
    /// Transactions abandoned by a reset flush.
    pub abandoned: u64,
    /// Responses that matched no outstanding transaction.
    pub orphan_responses: u64,
}

/// Per-id read return progress.
#[derive(Debug)]
struct ReadProgress {
    data: Vec<u8>,
    cursor: BurstCursor,
}

/// An initiator endpoint.
pub struct Port {
    name: String,
    channel: TransactionChannel,
    outstanding_writes: HashMap<u8, Transaction>,
    outstanding_reads: HashMap<u8, Transaction>,
    read_progress: HashMap<u8, ReadProgress>,
    staged_aw: VecDeque<AddrBeat>,
    staged_w: VecDeque<WriteBeat>,
    staged_ar: VecDeque<AddrBeat>,
    max_burst: u16,
    stats: PortStats,
}

impl Port {
    /// Create an initiator port of the given width.
    pub fn new(name: impl Into<String>, width: usize, depths: ChannelDepths, max_burst: u16) -> Self {
        Self {
            name: name.into(),
            channel: TransactionChannel::new(width, depths),
            outstanding_writes: HashMap::new(),
            outstanding_reads: HashMap::new(),
            read_progress: HashMap::new(),
            staged_aw: VecDeque::new(),
            staged_w: VecDeque::new(),
            staged_ar: VecDeque::new(),
            max_burst,
            stats: PortStats::default(),
        }
    }

    /// Port name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The port's bus channel.
    pub fn channel(&self) -> &TransactionChannel {
        &self.channel
    }

    /// Mutable access for the fabric side (crossbar) of the channel.
    pub fn channel_mut(&mut self) -> &mut TransactionChannel {
        &mut self.channel
    }

    /// Port statistics.
    pub fn stats(&self) -> &PortStats {
        &self.stats
    }

    /// Outstanding transactions in the write and read namespaces.
    pub fn outstanding(&self) -> (usize, usize) {
        (self.outstanding_writes.len(), self.outstanding_reads.len())
    }

    fn validate_burst(
        &self,
        id: u8,
        addr: u64,
        size: u8,
        burst: BurstType,
        beats: u16,
    ) -> Result<(), FabricError> {
        if id > spec::MAX_INITIATOR_ID {
            return Err(FabricError::IdOutOfRange(id));
        }
        let width = self.channel.width;
        if size == 0 || !size.is_power_of_two() || size as usize > width {
            return Err(FabricError::InvalidBeatSize { size, width });
        }
        if addr % size as u64 != 0 {
            return Err(FabricError::Misaligned { addr, size });
        }
        if beats == 0 || beats > self.max_burst.min(spec::MAX_BURST_BEATS) {
            return Err(FabricError::BurstOverrun { id, beats });
        }
        if burst == BurstType::Wrap && !crate::bus::transaction::valid_wrap_beats(beats) {
            return Err(FabricError::InvalidWrapLength { beats });
        }
        Ok(())
    }

    /// Queue a write burst. `payload` is the logical data, `beats x size`
    /// bytes; the port lanes it onto the bus and computes strobes.
    pub fn queue_write(
        &mut self,
        id: u8,
        addr: u64,
        size: u8,
        burst: BurstType,
        payload: &[u8],
    ) -> Result<(), FabricError> {
        if payload.is_empty() || payload.len() % size as usize != 0 {
            return Err(FabricError::PayloadMismatch {
                bytes: payload.len(),
                size,
            });
        }
        let beats = (payload.len() / size as usize) as u16;
        self.validate_burst(id, addr, size, burst, beats)?;
        if self.outstanding_writes.contains_key(&id) {
            return Err(FabricError::IdInUse(id));
        }

        let beat = AddrBeat {
            id,
            addr,
            len: (beats - 1) as u8,
            size,
            burst,
            lock: false,
            cache: 0,
            prot: 0,
        };
        let width = self.channel.width;
        let mut cursor = BurstCursor::new(&beat);
        for k in 0..beats as usize {
            let lane = cursor.lane(width);
            let mut data = vec![0u8; width];
            let chunk = &payload[k * size as usize..(k + 1) * size as usize];
            data[lane..lane + size as usize].copy_from_slice(chunk);
            let strb = ((1u64 << size) - 1) << lane;
            self.staged_w.push_back(WriteBeat {
                data,
                strb,
                last: k + 1 == beats as usize,
            });
            cursor.advance();
        }
        self.staged_aw.push_back(beat);
        self.outstanding_writes
            .insert(id, Transaction::new(beat, TxKind::Write));
        self.stats.writes_issued += 1;
        log::debug!("{}: queued write id={} addr=0x{:08x} beats={}", self.name, id, addr, beats);
        Ok(())
    }

    /// Queue a read burst of `beats` beats of `size` bytes each.
    pub fn queue_read(
        &mut self,
        id: u8,
        addr: u64,
        size: u8,
        burst: BurstType,
        beats: u16,
    ) -> Result<(), FabricError> {
        self.validate_burst(id, addr, size, burst, beats)?;
        if self.outstanding_reads.contains_key(&id) {
            return Err(FabricError::IdInUse(id));
        }
        let beat = AddrBeat {
            id,
            addr,
            len: (beats - 1) as u8,
            size,
            burst,
            lock: false,
            cache: 0,
            prot: 0,
        };
        self.staged_ar.push_back(beat);
        self.read_progress.insert(
            id,
            ReadProgress {
                data: Vec::with_capacity(beats as usize * size as usize),
                cursor: BurstCursor::new(&beat),
            },
        );
        self.outstanding_reads
            .insert(id, Transaction::new(beat, TxKind::Read));
        self.stats.reads_issued += 1;
        log::debug!("{}: queued read id={} addr=0x{:08x} beats={}", self.name, id, addr, beats);
        Ok(())
    }

    /// Drive the ready/valid handshakes for one cycle: move at most one
    /// staged beat into each request sub-channel.
    pub fn step_issue(&mut self) {
        if let Some(beat) = self.staged_aw.pop_front() {
            if let Err(beat) = self.channel.aw.push(beat) {
                self.staged_aw.push_front(beat);
            }
        }
        if let Some(beat) = self.staged_w.pop_front() {
            if let Err(beat) = self.channel.w.push(beat) {
                self.staged_w.push_front(beat);
            }
        }
        if let Some(beat) = self.staged_ar.pop_front() {
            if let Err(beat) = self.channel.ar.push(beat) {
                self.staged_ar.push_front(beat);
            }
        }
    }

    /// Drain the response sub-channels, matching beats to outstanding
    /// transactions. Returns the transactions completed this cycle.
    pub fn collect(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();

        while let Some(resp) = self.channel.b.pop() {
            match self.outstanding_writes.remove(&resp.id) {
                Some(_) => {
                    self.stats.writes_completed += 1;
                    done.push(Completion::Write {
                        id: resp.id,
                        resp: resp.resp,
                    });
                }
                None => {
                    log::warn!("{}: write response for unknown id {}", self.name, resp.id);
                    self.stats.orphan_responses += 1;
                }
            }
        }

        let width = self.channel.width;
        while let Some(beat) = self.channel.r.pop() {
            let tx = match self.outstanding_reads.get_mut(&beat.id) {
                Some(tx) => tx,
                None => {
                    log::warn!("{}: read beat for unknown id {}", self.name, beat.id);
                    self.stats.orphan_responses += 1;
                    continue;
                }
            };
            tx.resp = tx.resp.worst(beat.resp);
            tx.beats_seen += 1;
            if let Some(progress) = self.read_progress.get_mut(&beat.id) {
                if !beat.data.is_empty() {
                    let size = tx.addr.size as usize;
                    let lane = progress.cursor.lane(width);
                    progress.data.extend_from_slice(&beat.data[lane..lane + size]);
                    progress.cursor.advance();
                }
            }
            if beat.last {
                if let Some(tx) = self.outstanding_reads.remove(&beat.id) {
                    let data = self
                        .read_progress
                        .remove(&beat.id)
                        .map(|p| p.data)
                        .unwrap_or_default();
                    self.stats.reads_completed += 1;
                    done.push(Completion::Read {
                        id: beat.id,
                        resp: tx.resp,
                        data,
                    });
                }
            }
        }

        done
    }

    /// Abandon all in-flight state: staged beats, channel contents and
    /// outstanding tables. No completion is ever produced for abandoned
    /// transactions; callers resynchronize after reset deassertion.
    pub fn flush(&mut self) -> usize {
        let outstanding = self.outstanding_writes.len() + self.outstanding_reads.len();
        self.stats.abandoned += outstanding as u64;
        self.outstanding_writes.clear();
        self.outstanding_reads.clear();
        self.read_progress.clear();
        self.staged_aw.clear();
        self.staged_w.clear();
        self.staged_ar.clear();
        let beats = self.channel.flush();
        if outstanding > 0 || beats > 0 {
            log::info!(
                "{}: reset abandoned {} transactions, {} queued beats",
                self.name, outstanding, beats
            );
        }
        beats + outstanding
    }
}
