// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Two-phase waveform generation shared by the PWM-style peripherals.

use crate::signals::{DigitalLevel, SignalEvent};
use crate::DeviceContext;

pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Shortest phase a channel may produce.
pub const MIN_PHASE_NS: u64 = 1_000;

/// Duration of `ticks` counter cycles, where the counter is clocked at
/// `clock_hz` divided by the fixed-point divider `divider_fx` (with
/// `frac_bits` fractional bits). Returns 0 for a stopped clock.
pub fn ticks_to_ns(clock_hz: u64, divider_fx: u64, frac_bits: u32, ticks: u64) -> u64 {
    if clock_hz == 0 {
        return 0;
    }
    let num = u128::from(divider_fx) * u128::from(ticks) * u128::from(NS_PER_SEC);
    let den = u128::from(clock_hz) << frac_bits;
    u64::try_from(num / den).unwrap_or(u64::MAX)
}

/// High and low phase durations of one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WaveTiming {
    pub on_ns: u64,
    pub off_ns: u64,
}

impl WaveTiming {
    /// Splits `period_ns` so the high phase is `duty / full_scale` of it.
    ///
    /// The high phase is clamped so neither phase is shorter than
    /// [`MIN_PHASE_NS`] (or half the period for sub-2us periods). Returns `None`
    /// when there is nothing to generate.
    pub fn from_duty(period_ns: u64, duty: u64, full_scale: u64) -> Option<Self> {
        if period_ns < 2 || full_scale == 0 {
            return None;
        }
        let raw_on = u128::from(duty) * u128::from(period_ns) / u128::from(full_scale);
        let raw_on = u64::try_from(raw_on).unwrap_or(u64::MAX);
        let edge = MIN_PHASE_NS.min(period_ns / 2).max(1);
        let on_ns = raw_on.clamp(edge, period_ns - edge);
        Some(Self {
            on_ns,
            off_ns: period_ns - on_ns,
        })
    }

    pub fn period_ns(&self) -> u64 {
        self.on_ns + self.off_ns
    }
}

/// A level change announced by a [`PeriodicToggle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub level: DigitalLevel,
    pub hold_ns: u64,
}

impl Edge {
    pub fn hold_us(&self) -> u32 {
        u32::try_from(self.hold_ns / 1_000).unwrap_or(u32::MAX)
    }

    pub fn to_signal(self, signal: u16) -> SignalEvent {
        SignalEvent {
            signal,
            level: self.level,
            hold_us: self.hold_us(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum TogglePhase {
    #[default]
    Inert,
    High,
    Low,
}

/// Self re-arming on/off oscillator bound to one timer index of its device.
///
/// The owner supplies fresh [`WaveTiming`] on every call so reconfiguration
/// takes effect at the next edge.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PeriodicToggle {
    timer: usize,
    phase: TogglePhase,
    timing: Option<WaveTiming>,
    edges: u64,
}

impl PeriodicToggle {
    pub fn new(timer: usize) -> Self {
        Self {
            timer,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> TogglePhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase != TogglePhase::Inert
    }

    pub fn timing(&self) -> Option<WaveTiming> {
        self.timing
    }

    pub fn edges(&self) -> u64 {
        self.edges
    }

    /// Phase the next [`toggle`](Self::toggle) will enter.
    pub fn next_phase(&self) -> TogglePhase {
        match self.phase {
            TogglePhase::Inert => TogglePhase::Inert,
            TogglePhase::High => TogglePhase::Low,
            TogglePhase::Low => TogglePhase::High,
        }
    }

    /// (Re)starts in the high phase. `None` timing leaves the channel inert.
    pub fn start(&mut self, timing: Option<WaveTiming>, ctx: &mut DeviceContext<'_>) -> Option<Edge> {
        let Some(t) = timing else {
            self.stop(ctx);
            return None;
        };
        self.enter(TogglePhase::High, t, ctx)
    }

    /// Advances to the next phase from the timer callback.
    pub fn toggle(&mut self, timing: Option<WaveTiming>, ctx: &mut DeviceContext<'_>) -> Option<Edge> {
        let next = self.next_phase();
        if next == TogglePhase::Inert {
            return None;
        }
        let Some(t) = timing else {
            self.stop(ctx);
            return None;
        };
        self.enter(next, t, ctx)
    }

    pub fn stop(&mut self, ctx: &mut DeviceContext<'_>) {
        if self.is_running() {
            ctx.cancel(self.timer);
        }
        self.phase = TogglePhase::Inert;
        self.timing = None;
    }

    fn enter(&mut self, phase: TogglePhase, t: WaveTiming, ctx: &mut DeviceContext<'_>) -> Option<Edge> {
        let (level, hold_ns) = match phase {
            TogglePhase::High => (DigitalLevel::High, t.on_ns),
            _ => (DigitalLevel::Low, t.off_ns),
        };
        self.phase = phase;
        self.timing = Some(t);
        self.edges += 1;
        ctx.schedule_in(self.timer, hold_ns);
        Some(Edge { level, hold_ns })
    }
}
