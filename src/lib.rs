//! fabric-emu library
//!
//! Cycle-level model of a multi-master, multi-slave split-transaction
//! memory bus fabric: two initiators sharing a DRAM-style target and a
//! narrow storage peripheral through a round-robin crossbar, width
//! adapters, a clock-domain bridge, and a reset sequencer.

pub mod config;
pub mod bus;
pub mod fabric;
