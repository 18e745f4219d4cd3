//! The assembled fabric.
//!
//! [`FabricSystem`] elaborates the full topology and advances it cycle by
//! cycle:
//!
//! ```text
//!  ┌────────────┐   ┌──────────────┐
//!  │ CPU bridge │   │ storage ctrl │      initiators (core domain)
//!  └─────┬──────┘   └──────┬───────┘
//!        └───────┬─────────┘
//!         ┌──────┴───────┐
//!         │   Crossbar   │                round-robin, address decode
//!         └──┬────────┬──┘
//!     ┌──────┴───┐  ┌─┴──────────────┐
//!     │  Width   │  │  ClockDomain   │
//!     │ Adapter  │  │    Bridge      │
//!     └──────┬───┘  └─┬──────────────┘
//!     ┌──────┴───┐  ┌─┴──────────────┐
//!     │ storage  │  │ DDR controller │    targets
//!     │ (32-bit) │  │ (own clock)    │
//!     └──────────┘  └────────────────┘
//! ```
//!
//! Two clock domains advance independently: the core/bus domain every
//! `step()`, the memory domain once per `mem_clock_ratio` steps. They
//! touch only through the bridge's elastic buffers. Everything is gated
//! by the [`ResetSequencer`]: initiators run once the core reset
//! releases, the crossbar and adapters once the bus reset releases, the
//! peripheral last. Entry to `AssertAll` abandons every in-flight
//! transaction fabric-wide: DRAM and peripheral contents survive, the
//! traffic does not.
//!
//! All state is exclusively owned: each port's outstanding table is
//! touched only here, in its own domain's step, and the two domains
//! share nothing but the bridge interface.

use crate::bus::{
    BurstType, ChannelDepths, Completion, FabricError, Port, TransactionChannel,
};
use crate::config::FabricConfig;
use crate::fabric::arbiter::Crossbar;
use crate::fabric::cdc::ClockDomainBridge;
use crate::fabric::memory::TargetModel;
use crate::fabric::region::{Region, RegionMap};
use crate::fabric::reset::{ResetOutputs, ResetSequencer, ResetState};
use crate::fabric::width::WidthAdapter;
use crate::fabric::ConfigError;

/// Initiator index of the CPU-side bridge.
pub const CPU: usize = 0;

/// Initiator index of the storage controller.
pub const STORAGE_CTRL: usize = 1;

/// Target index of the storage peripheral leg.
pub const STORAGE_LEG: usize = 0;

/// Target index of the memory-controller leg.
pub const MEMORY_LEG: usize = 1;

/// The complete fabric: initiators, crossbar, both target legs and the
/// reset sequencer, advanced as synchronous parallel processes.
pub struct FabricSystem {
    config: FabricConfig,
    reset: ResetSequencer,
    initiators: Vec<Port>,
    crossbar: Crossbar,
    /// Fabric-side channels of the two target legs.
    legs: Vec<TransactionChannel>,
    width: WidthAdapter,
    periph_chan: TransactionChannel,
    periph: TargetModel,
    cdc: ClockDomainBridge,
    mem_chan: TransactionChannel,
    memory: TargetModel,
    completions: Vec<Vec<Completion>>,
    core_cycle: u64,
    mem_cycle: u64,
    mem_phase: u32,
    calibration: bool,
    ext_reset: bool,
}

impl FabricSystem {
    /// Elaborate the fabric from a validated configuration.
    pub fn new(config: &FabricConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let regions = RegionMap::new(
            vec![
                Region::new("storage", config.storage_base, config.storage_size, STORAGE_LEG),
                Region::new("dram", config.dram_base, config.dram_size, MEMORY_LEG),
            ],
            2,
        )?;
        let crossbar = Crossbar::new(regions, 2, 2)?;
        let width = WidthAdapter::new(config.wide_width, config.narrow_width, config.max_burst)?;

        let depths = ChannelDepths {
            addr: config.addr_depth,
            data: config.data_depth,
            resp: config.addr_depth,
        };
        let initiators = vec![
            Port::new("cpu-bridge", config.wide_width, depths, config.max_burst),
            Port::new("storage-ctrl", config.wide_width, depths, config.max_burst),
        ];
        let legs = vec![
            TransactionChannel::new(config.wide_width, depths),
            TransactionChannel::new(config.wide_width, depths),
        ];

        Ok(Self {
            reset: ResetSequencer::new(),
            initiators,
            crossbar,
            legs,
            width,
            periph_chan: TransactionChannel::new(config.narrow_width, depths),
            periph: TargetModel::new("storage", config.narrow_width, config.periph_latency)
                .with_window(config.storage_base, config.storage_size),
            cdc: ClockDomainBridge::new(config.cdc_depth, config.cdc_sync_latency),
            mem_chan: TransactionChannel::new(config.wide_width, depths),
            memory: TargetModel::new("ddr", config.wide_width, config.mem_latency),
            completions: vec![Vec::new(), Vec::new()],
            core_cycle: 0,
            mem_cycle: 0,
            mem_phase: 0,
            calibration: false,
            ext_reset: false,
            config: config.clone(),
        })
    }

    /// Drive the calibration/lock level from the memory subsystem.
    pub fn set_calibration(&mut self, level: bool) {
        self.calibration = level;
    }

    /// Drive the external reset level.
    pub fn set_external_reset(&mut self, level: bool) {
        self.ext_reset = level;
    }

    /// Current reset-sequencer state.
    pub fn reset_state(&self) -> ResetState {
        self.reset.state()
    }

    /// Recorded reset state transitions, oldest first.
    pub fn reset_trace(&self) -> Vec<ResetState> {
        self.reset.trace().collect()
    }

    /// Derived reset levels as exposed to board-level collaborators:
    /// the single gated system reset and the calibration pass-through.
    pub fn reset_outputs(&self) -> ResetOutputs {
        self.reset.outputs(self.calibration)
    }

    /// Queue a write burst on an initiator.
    pub fn queue_write(
        &mut self,
        initiator: usize,
        id: u8,
        addr: u64,
        size: u8,
        burst: BurstType,
        payload: &[u8],
    ) -> Result<(), FabricError> {
        self.initiators[initiator].queue_write(id, addr, size, burst, payload)
    }

    /// Queue a read burst on an initiator.
    pub fn queue_read(
        &mut self,
        initiator: usize,
        id: u8,
        addr: u64,
        size: u8,
        burst: BurstType,
        beats: u16,
    ) -> Result<(), FabricError> {
        self.initiators[initiator].queue_read(id, addr, size, burst, beats)
    }

    /// Take the completions observed so far for an initiator.
    pub fn take_completions(&mut self, initiator: usize) -> Vec<Completion> {
        std::mem::take(&mut self.completions[initiator])
    }

    /// Outstanding (write, read) transactions on an initiator.
    pub fn outstanding(&self, initiator: usize) -> (usize, usize) {
        self.initiators[initiator].outstanding()
    }

    /// Advance every domain by one core-clock cycle.
    ///
    /// An `Err` is a fatal protocol violation (see [`FabricError`]); the
    /// fabric is not meaningful past it.
    pub fn step(&mut self) -> Result<(), FabricError> {
        let outputs = self.reset.step(self.calibration, self.ext_reset);
        if self.reset.take_flush() {
            self.flush_all();
        }

        if !outputs.core_reset {
            for port in &mut self.initiators {
                port.step_issue();
            }
        }

        if !outputs.bus_reset {
            self.crossbar.step(&mut self.initiators, &mut self.legs);
            self.width.step(&mut self.legs[STORAGE_LEG], &mut self.periph_chan)?;
            self.cdc
                .step_source(&mut self.legs[MEMORY_LEG], self.core_cycle, self.mem_cycle);
        }

        if !outputs.periph_reset {
            self.periph.step(&mut self.periph_chan, self.core_cycle);
        }

        // The memory controller lives in its own clock domain and only
        // operates once it reports calibration.
        self.mem_phase += 1;
        if self.mem_phase >= self.config.mem_clock_ratio {
            self.mem_phase = 0;
            if self.calibration {
                self.cdc
                    .step_sink(&mut self.mem_chan, self.mem_cycle, self.core_cycle);
                self.memory.step(&mut self.mem_chan, self.mem_cycle);
            }
            self.mem_cycle += 1;
        }

        if !outputs.core_reset {
            for (i, port) in self.initiators.iter_mut().enumerate() {
                self.completions[i].extend(port.collect());
            }
        }

        self.core_cycle += 1;
        Ok(())
    }

    /// Run for `cycles` core-clock cycles.
    pub fn run(&mut self, cycles: u64) -> Result<(), FabricError> {
        for _ in 0..cycles {
            self.step()?;
        }
        Ok(())
    }

    /// Run until no initiator has outstanding transactions, or `max`
    /// cycles elapse. Returns true if the fabric went quiet.
    pub fn run_until_quiet(&mut self, max: u64) -> Result<bool, FabricError> {
        for _ in 0..max {
            self.step()?;
            let quiet = self
                .initiators
                .iter()
                .all(|p| p.outstanding() == (0, 0));
            if quiet {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Abandon every in-flight transaction fabric-wide (AssertAll entry).
    fn flush_all(&mut self) {
        let mut dropped = 0;
        for port in &mut self.initiators {
            dropped += port.flush();
        }
        self.crossbar.flush();
        for leg in &mut self.legs {
            dropped += leg.flush();
        }
        self.width.flush();
        dropped += self.periph_chan.flush();
        dropped += self.cdc.flush();
        dropped += self.mem_chan.flush();
        self.periph.flush();
        self.memory.flush();
        log::info!("fabric: reset abandoned {} in-flight beats/transactions", dropped);
    }

    /// Core-domain cycle counter.
    pub fn core_cycle(&self) -> u64 {
        self.core_cycle
    }

    /// Memory-domain cycle counter.
    pub fn mem_cycle(&self) -> u64 {
        self.mem_cycle
    }

    /// The crossbar, for stats inspection.
    pub fn crossbar(&self) -> &Crossbar {
        &self.crossbar
    }

    /// The width adapter, for stats inspection.
    pub fn width_adapter(&self) -> &WidthAdapter {
        &self.width
    }

    /// The clock-domain bridge, for stats inspection.
    pub fn bridge(&self) -> &ClockDomainBridge {
        &self.cdc
    }

    /// The DRAM target model.
    pub fn memory(&self) -> &TargetModel {
        &self.memory
    }

    /// The storage peripheral target model.
    pub fn peripheral(&self) -> &TargetModel {
        &self.periph
    }

    /// Initiator port, for stats inspection.
    pub fn initiator(&self, index: usize) -> &Port {
        &self.initiators[index]
    }

    /// Print a human-readable summary of the fabric's counters.
    pub fn print_summary(&self) {
        println!("Fabric summary");
        println!("==============");
        println!("Core cycles:    {}", self.core_cycle);
        println!("Memory cycles:  {}", self.mem_cycle);
        println!("Reset state:    {:?}", self.reset.state());
        for (i, port) in self.initiators.iter().enumerate() {
            let s = port.stats();
            println!(
                "Initiator {} ({}): {} writes, {} reads issued; {} completed; {} abandoned",
                i,
                port.name(),
                s.writes_issued,
                s.reads_issued,
                s.writes_completed + s.reads_completed,
                s.abandoned,
            );
        }
        let xs = self.crossbar.stats();
        println!(
            "Crossbar: grants AW {:?} / AR {:?}, {} decode errors, {} W beats forwarded",
            xs.aw_grants, xs.ar_grants, xs.decode_errors, xs.w_beats_forwarded
        );
        let ws = self.width.stats();
        println!(
            "Width adapter: {} addrs, {} wide -> {} narrow W beats, {} narrow -> {} wide R beats",
            ws.addrs_converted, ws.w_wide_in, ws.w_narrow_out, ws.r_narrow_in, ws.r_wide_out
        );
        let bs = self.cdc.stats();
        println!(
            "Clock bridge: {} beats to memory domain, {} back, {} flushed",
            bs.to_sink, bs.to_source, bs.flushed
        );
        let ms = self.memory.stats();
        println!(
            "DDR target: {} writes, {} reads, {} beats in, {} beats out",
            ms.writes, ms.reads, ms.write_beats, ms.read_beats
        );
        let ps = self.periph.stats();
        println!(
            "Storage target: {} writes, {} reads, {} slave errors",
            ps.writes, ps.reads, ps.slave_errors
        );
    }
}
