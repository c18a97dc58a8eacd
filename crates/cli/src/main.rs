// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use espsim_config::{ChipDescriptor, ReadDetails, Scenario, ScenarioStep};
use espsim_core::bus::SystemBus;
use espsim_core::metrics::{PinActivity, PinStats};
use espsim_core::signals::DigitalLevel;
use espsim_core::{EngineConfig, SimulationError};

mod vcd_trace;

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

/// Pins traced when the chip has no GPIO matrix to size the dump from.
const DEFAULT_TRACE_PINS: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about = "ESP32 peripheral timing simulator", long_about = None)]
struct Cli {
    /// Enable debug-level register and scheduling logs
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a register-level scenario against a chip descriptor.
    Run(RunArgs),

    /// Build the chip and print its reset-state snapshot as JSON.
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the chip descriptor (YAML)
    #[arg(short, long)]
    chip: PathBuf,

    /// Path to the scenario script (YAML)
    #[arg(short, long)]
    scenario: PathBuf,

    /// Write pin waveforms as a VCD file
    #[arg(long)]
    vcd: Option<PathBuf>,

    /// Directory to write run artifacts (result.json, snapshot.json)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Override the scenario's event budget per run step
    #[arg(long)]
    max_events: Option<u64>,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Path to the chip descriptor (YAML)
    #[arg(short, long)]
    chip: PathBuf,
}

#[derive(Debug, Serialize)]
struct RunResult {
    result_schema_version: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    steps_executed: usize,
    time_ns: u64,
    events_fired: u64,
    assertions: Vec<ReadResult>,
    pins: BTreeMap<u8, PinStats>,
    config: RunConfig,
}

#[derive(Debug, Serialize, Clone)]
struct ReadResult {
    step: usize,
    address: u64,
    expected: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask: Option<u32>,
    actual: u32,
    passed: bool,
}

#[derive(Debug, Serialize)]
struct RunConfig {
    chip: PathBuf,
    scenario: PathBuf,
    max_events: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over --trace when set.
    let default_level = if cli.trace { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run_scenario(args),
        Commands::Inspect(args) => inspect(args),
    }
}

fn inspect(args: InspectArgs) -> ExitCode {
    let bus = match load_chip(&args.chip, EngineConfig::default()) {
        Ok(bus) => bus,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    match serde_json::to_string_pretty(&bus.snapshot()) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => {
            error!("Failed to serialize snapshot: {}", e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn load_chip(path: &Path, config: EngineConfig) -> anyhow::Result<SystemBus> {
    let chip = ChipDescriptor::from_file(path)?;
    info!("Chip '{}' with {} peripherals", chip.name, chip.peripherals.len());
    SystemBus::from_config(&chip, config)
}

fn run_scenario(args: RunArgs) -> ExitCode {
    let scenario = match Scenario::from_file(&args.scenario) {
        Ok(s) => s,
        Err(e) => return config_error(&args, format!("{:#}", e)),
    };

    let defaults = EngineConfig::default();
    let max_events = args
        .max_events
        .or(scenario.limits.max_events)
        .unwrap_or(defaults.max_events_per_run);
    let config = EngineConfig {
        max_events_per_run: max_events,
        ..defaults
    };

    let mut bus = match load_chip(&args.chip, config) {
        Ok(bus) => bus,
        Err(e) => return config_error(&args, format!("{:#}", e)),
    };

    let activity = Arc::new(PinActivity::new());
    bus.attach_observer(activity.clone());

    if let Some(vcd_path) = &args.vcd {
        let pin_count = bus
            .gpio_matrix()
            .map(|gpio| gpio.pin_count())
            .unwrap_or(DEFAULT_TRACE_PINS);
        match vcd_trace::VcdObserver::new(vcd_path, pin_count) {
            Ok(vcd) => {
                info!("Tracing {} pins to {:?}", pin_count, vcd_path);
                bus.attach_observer(Arc::new(vcd));
            }
            Err(e) => {
                return config_error(&args, format!("Failed to create VCD {:?}: {:#}", vcd_path, e))
            }
        }
    }

    let mut assertions = Vec::new();
    let mut steps_executed = 0;
    let mut failure: Option<SimulationError> = None;

    for (index, step) in scenario.steps.iter().enumerate() {
        if let Err(e) = execute_step(&mut bus, index, step, &mut assertions) {
            error!("Step {} failed: {}", index, e);
            failure = Some(e);
            break;
        }
        steps_executed += 1;
    }

    let all_passed = assertions.iter().all(|a: &ReadResult| a.passed);
    let (status, code, message) = match failure {
        Some(e) => ("error", EXIT_RUNTIME_ERROR, Some(e.to_string())),
        None if !all_passed => ("fail", EXIT_ASSERT_FAIL, None),
        None => ("pass", EXIT_PASS, None),
    };
    info!(
        "Scenario {} after {} steps at t={} ns ({} timer events)",
        status,
        steps_executed,
        bus.now_ns(),
        bus.events_fired()
    );

    let result = RunResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        message,
        steps_executed,
        time_ns: bus.now_ns(),
        events_fired: bus.events_fired(),
        assertions,
        pins: activity.summary(),
        config: RunConfig {
            chip: args.chip.clone(),
            scenario: args.scenario.clone(),
            max_events,
        },
    };
    write_outputs(&args, &result, Some(&bus));

    ExitCode::from(code)
}

fn execute_step(
    bus: &mut SystemBus,
    index: usize,
    step: &ScenarioStep,
    assertions: &mut Vec<ReadResult>,
) -> Result<(), SimulationError> {
    match step {
        ScenarioStep::Write(s) => bus.write_u32(s.write.address, s.write.value)?,
        ScenarioStep::SetPin(s) => {
            let level = DigitalLevel::from(s.set_pin.level != 0);
            bus.set_pin_level(s.set_pin.pin, level);
        }
        ScenarioStep::RunFor(s) => {
            bus.run_for(s.run_for_ns)?;
        }
        ScenarioStep::RunUntil(s) => {
            bus.run_until(s.run_until_ns)?;
        }
        ScenarioStep::ExpectRead(s) => {
            let actual = bus.read_u32(s.expect_read.address)?;
            let result = read_result(index, &s.expect_read, actual);
            if !result.passed {
                error!(
                    "Step {}: read {:#x} = {:#x}, expected {:#x}",
                    index, result.address, actual, result.expected
                );
            }
            assertions.push(result);
        }
    }
    Ok(())
}

fn read_result(step: usize, expect: &ReadDetails, actual: u32) -> ReadResult {
    ReadResult {
        step,
        address: expect.address,
        expected: expect.value,
        mask: expect.mask,
        actual,
        passed: expect.matches(actual),
    }
}

fn config_error(args: &RunArgs, message: String) -> ExitCode {
    error!("{}", message);
    let result = RunResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: "config_error".to_string(),
        message: Some(message),
        steps_executed: 0,
        time_ns: 0,
        events_fired: 0,
        assertions: Vec::new(),
        pins: BTreeMap::new(),
        config: RunConfig {
            chip: args.chip.clone(),
            scenario: args.scenario.clone(),
            max_events: args.max_events.unwrap_or(0),
        },
    };
    write_outputs(args, &result, None);
    ExitCode::from(EXIT_CONFIG_ERROR)
}

fn write_outputs(args: &RunArgs, result: &RunResult, bus: Option<&SystemBus>) {
    let Some(output_dir) = &args.output_dir else {
        return;
    };
    if let Err(e) = std::fs::create_dir_all(output_dir) {
        error!("Failed to create output directory {:?}: {}", output_dir, e);
        return;
    }

    let result_path = output_dir.join("result.json");
    match std::fs::File::create(&result_path) {
        Ok(f) => {
            if let Err(e) = serde_json::to_writer_pretty(f, result) {
                error!("Failed to write result.json: {}", e);
            }
        }
        Err(e) => error!("Failed to create result.json: {}", e),
    }

    if let Some(bus) = bus {
        let snapshot_path = output_dir.join("snapshot.json");
        match std::fs::File::create(&snapshot_path) {
            Ok(f) => {
                if let Err(e) = serde_json::to_writer_pretty(f, &bus.snapshot()) {
                    error!("Failed to write snapshot.json: {}", e);
                }
            }
            Err(e) => error!("Failed to create snapshot.json: {}", e),
        }
    }
}
