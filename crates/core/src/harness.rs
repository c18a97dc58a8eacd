// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Drives a single peripheral without a bus in unit tests.

use crate::clock::TimerQueue;
use crate::signals::{PinEvent, SignalEvent};
use crate::{DeviceContext, DeviceId, Peripheral};

#[derive(Debug, Default)]
pub(crate) struct Harness {
    pub clock: TimerQueue,
    pub signals: Vec<SignalEvent>,
    pub pins: Vec<PinEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ctx(&mut self) -> DeviceContext<'_> {
        DeviceContext::new(
            DeviceId(0),
            &mut self.clock,
            &mut self.signals,
            &mut self.pins,
        )
    }

    pub fn write(&mut self, dev: &mut dyn Peripheral, offset: u64, value: u32) {
        dev.write(offset, value, &mut self.ctx()).unwrap();
    }

    pub fn read(&self, dev: &dyn Peripheral, offset: u64) -> u32 {
        dev.read(offset).unwrap()
    }

    /// Fires the next pending timer; returns its deadline.
    pub fn fire_next(&mut self, dev: &mut dyn Peripheral) -> Option<u64> {
        let ev = self.clock.pop_due(u64::MAX)?;
        dev.on_timer(ev.token.timer, &mut self.ctx());
        Some(ev.deadline_ns)
    }

    /// Fires every timer due at or before `t_ns`, then parks the clock there.
    pub fn run_until(&mut self, dev: &mut dyn Peripheral, t_ns: u64) -> usize {
        let mut fired = 0;
        while let Some(ev) = self.clock.pop_due(t_ns) {
            dev.on_timer(ev.token.timer, &mut self.ctx());
            fired += 1;
        }
        self.clock.advance_to(t_ns);
        fired
    }

    pub fn take_signals(&mut self) -> Vec<SignalEvent> {
        std::mem::take(&mut self.signals)
    }
}
