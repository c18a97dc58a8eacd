// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod clock;
pub mod config;
pub mod interrupt;
pub mod metrics;
pub mod peripherals;
pub mod regs;
pub mod signals;
pub mod timing;

#[cfg(test)]
mod harness;

use std::any::Any;

use clock::{TimerToken, VirtualClock};
use signals::{DigitalLevel, PinEvent, SignalEvent};

pub use config::EngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u64),
    #[error("Event budget of {budget} exhausted before reaching {until_ns} ns")]
    EventBudgetExhausted { budget: u64, until_ns: u64 },
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Index of a peripheral instance on the system bus.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize,
)]
pub struct DeviceId(pub usize);

/// Everything a peripheral may touch while handling a register write or a timer
/// callback: the virtual clock (scoped to its own timers) and the outgoing
/// signal and pin event queues.
pub struct DeviceContext<'a> {
    device: DeviceId,
    clock: &'a mut dyn VirtualClock,
    signals: &'a mut Vec<SignalEvent>,
    pins: &'a mut Vec<PinEvent>,
}

impl<'a> DeviceContext<'a> {
    pub fn new(
        device: DeviceId,
        clock: &'a mut dyn VirtualClock,
        signals: &'a mut Vec<SignalEvent>,
        pins: &'a mut Vec<PinEvent>,
    ) -> Self {
        Self {
            device,
            clock,
            signals,
            pins,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn token(&self, timer: usize) -> TimerToken {
        TimerToken {
            device: self.device,
            timer,
        }
    }

    /// Arms `timer` to fire `delay_ns` from now, replacing any pending callback.
    pub fn schedule_in(&mut self, timer: usize, delay_ns: u64) {
        let token = self.token(timer);
        let deadline = self.clock.now().saturating_add(delay_ns);
        tracing::debug!(
            "{:?} timer {} armed for t={} ns",
            self.device,
            timer,
            deadline
        );
        self.clock.schedule_at(deadline, token);
    }

    pub fn cancel(&mut self, timer: usize) -> bool {
        let token = self.token(timer);
        self.clock.cancel(token)
    }

    pub fn deadline(&self, timer: usize) -> Option<u64> {
        self.clock.deadline(self.token(timer))
    }

    pub fn emit_signal(&mut self, event: SignalEvent) {
        self.signals.push(event);
    }

    /// Drives a physical pin directly, bypassing the output crossbar.
    pub fn emit_pin(&mut self, pin: u8, level: DigitalLevel, hold_us: u32) {
        let time_ns = self.clock.now();
        self.pins.push(PinEvent {
            pin,
            level,
            hold_us,
            time_ns,
        });
    }
}

/// Trait representing a memory-mapped peripheral.
///
/// Accesses are 32-bit and word aligned; callers pass the offset relative to
/// the peripheral window.
pub trait Peripheral: std::fmt::Debug + Send {
    fn read(&self, offset: u64) -> SimResult<u32>;
    fn write(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) -> SimResult<()>;

    /// Called when a timer armed through [`DeviceContext::schedule_in`] expires.
    fn on_timer(&mut self, _timer: usize, _ctx: &mut DeviceContext<'_>) {}

    /// Restores hardware defaults. Pending timers are cancelled by the bus.
    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {}

    /// Current level of the peripheral's interrupt output.
    fn irq_level(&self) -> bool {
        false
    }

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}
