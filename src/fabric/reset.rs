//! Reset sequencing.
//!
//! The [`ResetSequencer`] derives the per-domain resets (core, bus
//! fabric, peripheral) from two external levels: the memory subsystem's
//! calibration/lock signal and an asynchronous external reset. Release
//! order is structural: core first, then the interconnect, then
//! peripherals, one synchronized step apiece. No consumer domain ever
//! sees a ready producer that is itself still in reset.
//!
//! External reset assertion drops the machine into `Fault` from any
//! state; once it clears, sequencing restarts from `AssertAll` and waits
//! for calibration to be re-observed. Losing calibration mid-sequence or
//! while running re-asserts every domain the same way.
//!
//! Entering `AssertAll` or `Fault` is the fabric-wide abandon point:
//! every outstanding transaction is discarded, never completed. The
//! sequencer itself only raises the flag; the system performs the flush.

use std::collections::VecDeque;

use crate::bus::spec;

/// Sequencer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    /// Initial state out of power-on.
    PowerOn,
    /// Waiting to begin sequencing.
    WaitCalibration,
    /// All derived resets asserted; outstanding work abandoned.
    AssertAll,
    /// Core reset released; bus and peripheral still held.
    DeassertCore,
    /// Bus-fabric reset released; peripheral still held.
    DeassertBus,
    /// Peripheral reset released.
    DeassertPeripheral,
    /// Fully sequenced, fabric operational.
    Running,
    /// External reset observed; waiting for it to clear.
    Fault,
}

/// Derived reset levels, true = asserted (domain held in reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOutputs {
    /// Core/CPU domain reset.
    pub core_reset: bool,
    /// Bus-fabric domain reset.
    pub bus_reset: bool,
    /// Peripheral domain reset.
    pub periph_reset: bool,
    /// Single gated system reset exposed to collaborators: asserted
    /// while any domain is held.
    pub sys_reset: bool,
    /// Calibration pass-through for board-level status.
    pub calibration: bool,
}

/// Reset sequencer state machine.
pub struct ResetSequencer {
    state: ResetState,
    trace: VecDeque<ResetState>,
    flush_pending: bool,
}

impl Default for ResetSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetSequencer {
    /// Create a sequencer at power-on.
    pub fn new() -> Self {
        let mut trace = VecDeque::with_capacity(spec::RESET_TRACE_DEPTH);
        trace.push_back(ResetState::PowerOn);
        Self {
            state: ResetState::PowerOn,
            trace,
            flush_pending: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ResetState {
        self.state
    }

    /// Recorded state transitions, oldest first (bounded history).
    pub fn trace(&self) -> impl Iterator<Item = ResetState> + '_ {
        self.trace.iter().copied()
    }

    /// True once after each entry to `AssertAll` or `Fault`; consuming
    /// it is how the system learns it must abandon all in-flight
    /// transactions.
    pub fn take_flush(&mut self) -> bool {
        std::mem::take(&mut self.flush_pending)
    }

    fn enter(&mut self, next: ResetState) {
        if next == self.state {
            return;
        }
        log::info!("reset: {:?} -> {:?}", self.state, next);
        self.state = next;
        if self.trace.len() == spec::RESET_TRACE_DEPTH {
            self.trace.pop_front();
        }
        self.trace.push_back(next);
        // Both entries assert every domain; no transaction may outlive
        // its domain's reset assertion.
        if matches!(next, ResetState::AssertAll | ResetState::Fault) {
            self.flush_pending = true;
        }
    }

    /// Advance one synchronized step and return the derived levels.
    ///
    /// `calibration` and `ext_reset` are level-sensitive inputs sampled
    /// each step.
    pub fn step(&mut self, calibration: bool, ext_reset: bool) -> ResetOutputs {
        use ResetState::*;

        if ext_reset && self.state != Fault {
            self.enter(Fault);
        } else {
            let next = match self.state {
                PowerOn => WaitCalibration,
                WaitCalibration => AssertAll,
                AssertAll => {
                    if calibration {
                        DeassertCore
                    } else {
                        AssertAll
                    }
                }
                // Calibration loss anywhere in the release sequence (or
                // while running) re-asserts every domain.
                DeassertCore => {
                    if calibration {
                        DeassertBus
                    } else {
                        AssertAll
                    }
                }
                DeassertBus => {
                    if calibration {
                        DeassertPeripheral
                    } else {
                        AssertAll
                    }
                }
                DeassertPeripheral => {
                    if calibration {
                        Running
                    } else {
                        AssertAll
                    }
                }
                Running => {
                    if calibration {
                        Running
                    } else {
                        AssertAll
                    }
                }
                Fault => {
                    if ext_reset {
                        Fault
                    } else {
                        AssertAll
                    }
                }
            };
            self.enter(next);
        }

        self.outputs(calibration)
    }

    /// Derived levels for the current state.
    pub fn outputs(&self, calibration: bool) -> ResetOutputs {
        use ResetState::*;
        let core_reset = !matches!(
            self.state,
            DeassertCore | DeassertBus | DeassertPeripheral | Running
        );
        let bus_reset = !matches!(self.state, DeassertBus | DeassertPeripheral | Running);
        let periph_reset = !matches!(self.state, DeassertPeripheral | Running);
        ResetOutputs {
            core_reset,
            bus_reset,
            periph_reset,
            sys_reset: core_reset || bus_reset || periph_reset,
            calibration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Step the sequencer to `Running` with calibration held high.
    fn run_up(seq: &mut ResetSequencer) {
        for _ in 0..8 {
            seq.step(true, false);
        }
        assert_eq!(seq.state(), ResetState::Running);
    }

    #[test]
    fn test_release_order_core_bus_peripheral() {
        let mut seq = ResetSequencer::new();
        let mut states = Vec::new();
        for _ in 0..8 {
            seq.step(true, false);
            states.push(seq.state());
        }
        let pos = |s: ResetState| states.iter().position(|&x| x == s).expect("state visited");
        assert!(pos(ResetState::DeassertCore) < pos(ResetState::DeassertBus));
        assert!(pos(ResetState::DeassertBus) < pos(ResetState::DeassertPeripheral));
        assert!(pos(ResetState::DeassertPeripheral) < pos(ResetState::Running));
    }

    #[test]
    fn test_holds_in_assert_all_until_calibration() {
        let mut seq = ResetSequencer::new();
        for _ in 0..10 {
            let out = seq.step(false, false);
            assert!(out.core_reset && out.bus_reset && out.periph_reset);
            assert!(out.sys_reset);
        }
        assert_eq!(seq.state(), ResetState::AssertAll);
    }

    #[test]
    fn test_levels_track_release_sequence() {
        let mut seq = ResetSequencer::new();
        seq.step(true, false); // WaitCalibration
        seq.step(true, false); // AssertAll
        let core = seq.step(true, false);
        assert_eq!(seq.state(), ResetState::DeassertCore);
        assert!(!core.core_reset && core.bus_reset && core.periph_reset);
        let bus = seq.step(true, false);
        assert!(!bus.core_reset && !bus.bus_reset && bus.periph_reset);
        let periph = seq.step(true, false);
        assert!(!periph.core_reset && !periph.bus_reset && !periph.periph_reset);
        assert!(!periph.sys_reset);
    }

    #[test]
    fn test_external_reset_faults_from_any_state() {
        let mut seq = ResetSequencer::new();
        run_up(&mut seq);
        let out = seq.step(true, true);
        assert_eq!(seq.state(), ResetState::Fault);
        assert!(out.core_reset && out.bus_reset && out.periph_reset);

        // Held reset keeps it in Fault.
        seq.step(true, true);
        assert_eq!(seq.state(), ResetState::Fault);

        // Release restarts sequencing through AssertAll.
        seq.step(true, false);
        assert_eq!(seq.state(), ResetState::AssertAll);
        assert!(seq.take_flush(), "abandon point on AssertAll entry");
        run_up(&mut seq);
    }

    #[test]
    fn test_flush_flag_raised_once_per_assert_all() {
        let mut seq = ResetSequencer::new();
        seq.step(false, false);
        seq.step(false, false); // enters AssertAll
        assert!(seq.take_flush());
        assert!(!seq.take_flush(), "flag consumed");
        seq.step(false, false); // stays in AssertAll
        assert!(!seq.take_flush(), "no re-entry, no new flag");
    }

    #[test]
    fn test_calibration_loss_reasserts_all() {
        let mut seq = ResetSequencer::new();
        run_up(&mut seq);
        seq.take_flush();
        let out = seq.step(false, false);
        assert_eq!(seq.state(), ResetState::AssertAll);
        assert!(out.sys_reset);
        assert!(seq.take_flush());
    }

    #[test]
    fn test_trace_ordering_property() {
        // Every run from AssertAll must show core before bus before
        // peripheral in the recorded trace.
        let mut seq = ResetSequencer::new();
        run_up(&mut seq);
        seq.step(true, true); // fault
        seq.step(true, false); // back to AssertAll
        run_up(&mut seq);

        let trace: Vec<ResetState> = seq.trace().collect();
        let mut expected_next = None;
        for state in trace {
            match state {
                ResetState::DeassertCore => expected_next = Some(ResetState::DeassertBus),
                ResetState::DeassertBus => {
                    assert_eq!(expected_next, Some(ResetState::DeassertBus));
                    expected_next = Some(ResetState::DeassertPeripheral);
                }
                ResetState::DeassertPeripheral => {
                    assert_eq!(expected_next, Some(ResetState::DeassertPeripheral));
                    expected_next = None;
                }
                ResetState::AssertAll | ResetState::Fault => expected_next = None,
                _ => {}
            }
        }
    }

    #[test]
    fn test_calibration_passthrough() {
        let mut seq = ResetSequencer::new();
        assert!(seq.step(true, false).calibration);
        assert!(!seq.step(false, false).calibration);
    }
}
