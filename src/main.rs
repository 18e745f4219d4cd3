//! fabric-emu: cycle-level model of a multi-master memory bus fabric

use std::env;
use std::path::Path;

use fabric_emu::bus::{BurstType, Completion};
use fabric_emu::config::FabricConfig;
use fabric_emu::fabric::reset::ResetState;
use fabric_emu::fabric::system::{FabricSystem, CPU, STORAGE_CTRL};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--sample-config") {
        print!("{}", FabricConfig::sample_config());
        return Ok(());
    }

    let show_stats = args.iter().any(|a| a == "--stats");
    let mut budget: u64 = 2000;
    let mut config_path: Option<&str> = None;
    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        if arg == "--cycles" {
            if let Some(value) = iter.next() {
                budget = value.parse()?;
            }
        } else if !arg.starts_with('-') {
            config_path = Some(arg.as_str());
        }
    }

    let config = match config_path {
        Some(path) => FabricConfig::load_from_file(Path::new(path))
            .ok_or_else(|| anyhow::anyhow!("could not load config from {}", path))?,
        None => FabricConfig::get().clone(),
    };
    config.validate()?;

    let mut fabric = FabricSystem::new(&config)?;

    println!("fabric-emu");
    println!("==========");
    println!(
        "Topology: 2 initiators, {}-bit fabric, {}-bit storage leg, DDR 1:{} clock",
        config.wide_width * 8,
        config.narrow_width * 8,
        config.mem_clock_ratio
    );
    println!();

    // Power-up: a couple of cycles without calibration, then the memory
    // controller locks and the reset sequencer walks to Running.
    fabric.run(2)?;
    fabric.set_calibration(true);
    fabric.run(6)?;
    println!("Reset sequence: {:?}", fabric.reset_trace());
    anyhow::ensure!(
        fabric.reset_state() == ResetState::Running,
        "fabric failed to reach Running"
    );
    println!();

    // Concurrent traffic from both initiators.
    let dram_payload: Vec<u8> = (0u32..64).map(|v| v as u8).collect();
    fabric.queue_write(CPU, 1, 0x1000, 8, BurstType::Incr, &dram_payload)?;
    fabric.queue_write(
        STORAGE_CTRL,
        1,
        config.storage_base,
        8,
        BurstType::Incr,
        &[0xC3; 32],
    )?;
    fabric.queue_read(CPU, 2, config.storage_base, 8, BurstType::Incr, 4)?;
    // One probe at an unmapped address: answered locally with DecodeError.
    fabric.queue_read(STORAGE_CTRL, 2, 0x9000_0000, 8, BurstType::Incr, 1)?;

    let quiet = fabric.run_until_quiet(budget)?;
    anyhow::ensure!(quiet, "traffic did not drain within {} cycles", budget);

    println!("Completions after {} core cycles:", fabric.core_cycle());
    for initiator in [CPU, STORAGE_CTRL] {
        for completion in fabric.take_completions(initiator) {
            match completion {
                Completion::Write { id, resp } => {
                    println!("  initiator {}: write id={} -> {:?}", initiator, id, resp)
                }
                Completion::Read { id, resp, data } => println!(
                    "  initiator {}: read id={} -> {:?} ({} bytes)",
                    initiator,
                    id,
                    resp,
                    data.len()
                ),
            }
        }
    }
    println!();

    // External reset mid-burst: the in-flight burst is abandoned, the
    // sequencer walks back up, and the same id is fresh afterwards.
    fabric.queue_write(CPU, 3, 0x2000, 8, BurstType::Incr, &[0xEE; 128])?;
    fabric.run(4)?;
    fabric.set_external_reset(true);
    fabric.run(2)?;
    println!("External reset mid-burst: state {:?}", fabric.reset_state());
    fabric.set_external_reset(false);
    fabric.run(8)?;
    println!("Recovered: state {:?}", fabric.reset_state());

    fabric.queue_write(CPU, 3, 0x2000, 8, BurstType::Incr, &[0xEE; 128])?;
    let quiet = fabric.run_until_quiet(budget)?;
    anyhow::ensure!(quiet, "post-reset traffic did not drain");
    for completion in fabric.take_completions(CPU) {
        if let Completion::Write { id, resp } = completion {
            println!("  reissued write id={} -> {:?}", id, resp);
        }
    }
    println!();

    if show_stats {
        fabric.print_summary();
    }

    Ok(())
}
