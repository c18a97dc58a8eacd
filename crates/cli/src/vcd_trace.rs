// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use espsim_core::signals::{DigitalLevel, PinEvent, PinObserver};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Mutex;
use vcd::{IdCode, TimescaleUnit, Value, Writer};

/// Dumps every pin level change as a one-bit wire, on a 1 ns timescale.
pub struct VcdObserver {
    state: Mutex<VcdState>,
    pins: Vec<IdCode>,
}

struct VcdState {
    writer: Writer<BufWriter<File>>,
    current_time: u64,
    failed: bool,
}

impl VcdObserver {
    pub fn new(path: &Path, pin_count: usize) -> anyhow::Result<Self> {
        let file = File::create(path)?;
        let mut writer = Writer::new(BufWriter::new(file));

        writer.timescale(1, TimescaleUnit::NS)?;
        writer.add_module("gpio")?;
        let mut pins = Vec::with_capacity(pin_count);
        for pin in 0..pin_count {
            pins.push(writer.add_wire(1, &format!("pin{}", pin))?);
        }
        writer.upscope()?;
        writer.enddefinitions()?;

        writer.timestamp(0)?;
        for id in &pins {
            writer.change_scalar(*id, Value::X)?;
        }

        Ok(Self {
            state: Mutex::new(VcdState {
                writer,
                current_time: 0,
                failed: false,
            }),
            pins,
        })
    }
}

impl VcdState {
    fn record(&mut self, time_ns: u64, id: IdCode, value: Value) -> std::io::Result<()> {
        if time_ns > self.current_time {
            self.writer.timestamp(time_ns)?;
            self.current_time = time_ns;
        }
        self.writer.change_scalar(id, value)
    }
}

impl core::fmt::Debug for VcdObserver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "VcdObserver({} pins)", self.pins.len())
    }
}

impl PinObserver for VcdObserver {
    fn on_pin_event(&self, event: &PinEvent) {
        let Some(id) = self.pins.get(usize::from(event.pin)).copied() else {
            return;
        };
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.failed {
            return;
        }
        let value = match event.level {
            DigitalLevel::High => Value::V1,
            DigitalLevel::Low => Value::V0,
        };
        if let Err(e) = state.record(event.time_ns, id, value) {
            tracing::error!("VCD write failed, trace truncated: {}", e);
            state.failed = true;
        }
    }
}
