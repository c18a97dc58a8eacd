// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! LED PWM controller with hardware fade.

use std::str::FromStr;

use crate::interrupt::{InterruptLatch, LatchLayout};
use crate::regs::{field, word_offset, RegisterArray};
use crate::signals::InterruptLine;
use crate::timing::{ticks_to_ns, PeriodicToggle, TogglePhase, WaveTiming};
use crate::{DeviceContext, Peripheral, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedcVariant {
    #[default]
    Esp32,
    Esp32C3,
}

impl FromStr for LedcVariant {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let v = value.trim().to_ascii_lowercase();
        match v.as_str() {
            "esp32" => Ok(Self::Esp32),
            "esp32c3" | "esp32-c3" | "c3" => Ok(Self::Esp32C3),
            _ => Err(format!(
                "unsupported LEDC variant '{}'; supported: esp32, esp32c3",
                value
            )),
        }
    }
}

const CH_CONF0: u64 = 0x00;
const CH_HPOINT: u64 = 0x04;
const CH_DUTY: u64 = 0x08;
const CH_CONF1: u64 = 0x0C;
const CH_DUTY_R: u64 = 0x10;

const TIMER_CONF: u64 = 0x0;

const SIG_OUT_EN: u32 = 1 << 2;
const TICK_SEL: u32 = 1 << 25;
const DUTY_INC: u32 = 1 << 30;
const DIV_BITS: u32 = 18;

#[derive(Debug, Clone, Copy)]
struct LedcLayout {
    channels: RegisterArray,
    timers: RegisterArray,
    latch: LatchLayout,
    conf: u64,
    int_width: u32,
    div_shift: u32,
    /// Integer bits of the duty field (the register adds 4 fractional bits).
    duty_bits: u32,
    fade_int_base: u32,
    signal_base: u16,
}

impl LedcVariant {
    fn layout(self) -> LedcLayout {
        match self {
            LedcVariant::Esp32 => LedcLayout {
                channels: RegisterArray::new(0x000, 0x14, 16),
                timers: RegisterArray::new(0x140, 0x8, 8),
                latch: LatchLayout {
                    raw: 0x180,
                    status: 0x184,
                    enable: 0x188,
                    clear: 0x18C,
                },
                conf: 0x190,
                int_width: 24,
                div_shift: 5,
                duty_bits: 20,
                fade_int_base: 8,
                signal_base: 71,
            },
            LedcVariant::Esp32C3 => LedcLayout {
                channels: RegisterArray::new(0x000, 0x14, 8),
                timers: RegisterArray::new(0x0A0, 0x8, 4),
                latch: LatchLayout {
                    raw: 0x0C0,
                    status: 0x0C4,
                    enable: 0x0C8,
                    clear: 0x0CC,
                },
                conf: 0x0D0,
                int_width: 12,
                div_shift: 4,
                duty_bits: 15,
                fade_int_base: 4,
                signal_base: 73,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
struct LedcTimer {
    conf: u32,
    /// Last non-zero resolution written.
    duty_res: u32,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
struct LedcChannel {
    conf0: u32,
    hpoint: u32,
    conf1: u32,
    duty_init: u32,
    duty: u32,
    fade_cycle: u32,
    intensity: u8,
    toggle: PeriodicToggle,
}

#[derive(Debug, serde::Serialize)]
pub struct Ledc {
    variant: LedcVariant,
    #[serde(skip)]
    layout: LedcLayout,
    channels: Vec<LedcChannel>,
    timers: Vec<LedcTimer>,
    conf: u32,
    latch: InterruptLatch,
    irq: InterruptLine,
}

impl Default for Ledc {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledc {
    pub fn new() -> Self {
        Self::new_with_variant(LedcVariant::Esp32)
    }

    pub fn new_with_variant(variant: LedcVariant) -> Self {
        let layout = variant.layout();
        let channels = (0..layout.channels.count)
            .map(|i| LedcChannel {
                toggle: PeriodicToggle::new(i),
                ..Default::default()
            })
            .collect();
        Self {
            variant,
            layout,
            channels,
            timers: vec![LedcTimer::default(); layout.timers.count],
            conf: 0,
            latch: InterruptLatch::new(layout.int_width),
            irq: InterruptLine::new(),
        }
    }

    pub fn variant(&self) -> LedcVariant {
        self.variant
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_running(&self, channel: usize) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|c| c.toggle.is_running())
    }

    pub fn phase(&self, channel: usize) -> TogglePhase {
        self.channels
            .get(channel)
            .map(|c| c.toggle.phase())
            .unwrap_or_default()
    }

    /// LED brightness in percent derived from the channel duty.
    pub fn intensity(&self, channel: usize) -> u8 {
        self.channels.get(channel).map(|c| c.intensity).unwrap_or(0)
    }

    pub fn output_signal(&self, channel: usize) -> u16 {
        self.layout.signal_base + channel as u16
    }

    fn channel_timer(&self, channel: usize) -> usize {
        let sel = (self.channels[channel].conf0 & 0x3) as usize;
        match self.variant {
            LedcVariant::Esp32 if channel >= 8 => sel + 4,
            _ => sel,
        }
    }

    fn timer_clock_hz(&self, timer: usize) -> u64 {
        match self.variant {
            LedcVariant::Esp32 => {
                if self.timers[timer].conf & TICK_SEL == 0 {
                    1_000_000
                } else if timer > 4 && self.conf & 1 != 0 {
                    // LSTIMER0 stays on APB even with the slow clock selected.
                    8_000_000
                } else {
                    80_000_000
                }
            }
            LedcVariant::Esp32C3 => match self.conf & 0x3 {
                2 => 17_500_000,
                3 => 40_000_000,
                _ => 80_000_000,
            },
        }
    }

    fn duty_count(&self, channel: usize) -> u32 {
        field(self.channels[channel].duty, 4, self.layout.duty_bits)
    }

    fn timing(&self, channel: usize) -> Option<WaveTiming> {
        let t = self.channel_timer(channel);
        let timer = &self.timers[t];
        if timer.duty_res == 0 {
            return None;
        }
        let divider = field(timer.conf, self.layout.div_shift, DIV_BITS);
        let full_scale = 1u64 << timer.duty_res;
        let period = ticks_to_ns(self.timer_clock_hz(t), u64::from(divider), 8, full_scale);
        WaveTiming::from_duty(period, u64::from(self.duty_count(channel)), full_scale)
    }

    fn percent(&self, channel: usize) -> u8 {
        let res = self.timers[self.channel_timer(channel)].duty_res;
        if res == 0 {
            return 0;
        }
        let max = (1u64 << res) - 1;
        let pct = 100 * u64::from(self.duty_count(channel)) / max;
        pct.min(100) as u8
    }

    fn update_irq(&mut self) {
        let pending = self.latch.pending();
        if self.irq.set(pending) {
            tracing::debug!("LEDC irq -> {}", pending);
        }
    }

    fn start_channel(&mut self, channel: usize, ctx: &mut DeviceContext<'_>) {
        let timing = self.timing(channel);
        let signal = self.output_signal(channel);
        self.channels[channel].fade_cycle = 0;
        self.channels[channel].intensity = self.percent(channel);
        match self.channels[channel].toggle.start(timing, ctx) {
            Some(edge) => ctx.emit_signal(edge.to_signal(signal)),
            None => tracing::debug!("LEDC ch{} not started: timer unconfigured", channel),
        }
    }

    /// One LOW-phase fade tick.
    fn advance_fade(&mut self, channel: usize) {
        let fade_bit = 1u32 << (self.layout.fade_int_base + channel as u32);
        let duty_max = (1u32 << (self.layout.duty_bits + 4)) - 1;
        let ch = &mut self.channels[channel];
        let c1 = ch.conf1;
        let mut duty_num = field(c1, 20, 10);
        if duty_num == 0 {
            return;
        }
        let duty_cycle = field(c1, 10, 10);
        let duty_scale = field(c1, 0, 10) * 16;

        ch.fade_cycle += 1;
        if ch.fade_cycle < duty_cycle {
            return;
        }
        ch.fade_cycle = 0;
        ch.duty = if c1 & DUTY_INC != 0 {
            ch.duty.saturating_add(duty_scale).min(duty_max)
        } else {
            ch.duty.saturating_sub(duty_scale)
        };
        duty_num -= 1;
        ch.conf1 = (c1 & 0xC00F_FFFF) | (duty_num << 20);

        if duty_num == 0 {
            tracing::debug!("LEDC ch{} fade complete", channel);
            if self.latch.is_enabled(fade_bit) {
                self.latch.latch(fade_bit);
                self.update_irq();
            }
        }
        self.channels[channel].intensity = self.percent(channel);
    }

    fn read_reg(&self, offset: u64) -> u32 {
        if let Some(v) = self.latch.read_reg(&self.layout.latch, offset) {
            return v;
        }
        if offset == self.layout.conf {
            return self.conf;
        }
        if let Some((i, reg)) = self.layout.channels.decode(offset) {
            let ch = &self.channels[i];
            return match reg {
                CH_CONF0 => ch.conf0,
                CH_HPOINT => ch.hpoint,
                CH_DUTY => ch.duty_init,
                CH_CONF1 => ch.conf1,
                CH_DUTY_R => ch.duty,
                _ => 0,
            };
        }
        if let Some((t, TIMER_CONF)) = self.layout.timers.decode(offset) {
            return self.timers[t].conf;
        }
        0
    }

    fn write_reg(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) {
        if self.latch.write_reg(&self.layout.latch, offset, value) {
            self.update_irq();
            return;
        }
        if offset == self.layout.conf {
            self.conf = value;
            return;
        }
        if let Some((t, reg)) = self.layout.timers.decode(offset) {
            if reg == TIMER_CONF {
                let res = value & 0xF;
                if res != 0 {
                    self.timers[t].duty_res = res;
                }
                self.timers[t].conf = value;
            }
            return;
        }
        if let Some((i, reg)) = self.layout.channels.decode(offset) {
            self.write_channel(i, reg, value, ctx);
        }
    }

    fn write_channel(&mut self, i: usize, reg: u64, value: u32, ctx: &mut DeviceContext<'_>) {
        match reg {
            CH_CONF0 => {
                self.channels[i].conf0 = value;
                if value & SIG_OUT_EN == 0 {
                    if self.channels[i].toggle.is_running() {
                        tracing::debug!("LEDC ch{} output disabled", i);
                    }
                    self.channels[i].toggle.stop(ctx);
                } else if self.variant == LedcVariant::Esp32C3 {
                    self.start_channel(i, ctx);
                }
            }
            CH_HPOINT => self.channels[i].hpoint = value,
            CH_DUTY => {
                self.channels[i].duty = value;
                self.channels[i].duty_init = value;
                if self.variant == LedcVariant::Esp32 {
                    self.start_channel(i, ctx);
                }
            }
            CH_CONF1 => self.channels[i].conf1 = value,
            _ => {}
        }
    }
}

impl Peripheral for Ledc {
    fn read(&self, offset: u64) -> SimResult<u32> {
        Ok(self.read_reg(word_offset(offset)))
    }

    fn write(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        self.write_reg(word_offset(offset), value, ctx);
        Ok(())
    }

    fn on_timer(&mut self, channel: usize, ctx: &mut DeviceContext<'_>) {
        if !self.is_running(channel) {
            return;
        }
        if self.channels[channel].toggle.next_phase() == TogglePhase::Low {
            self.advance_fade(channel);
        }
        let timing = self.timing(channel);
        let signal = self.output_signal(channel);
        if let Some(edge) = self.channels[channel].toggle.toggle(timing, ctx) {
            ctx.emit_signal(edge.to_signal(signal));
        }
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        for ch in self.channels.iter_mut() {
            ch.toggle.stop(ctx);
        }
        *self = Self::new_with_variant(self.variant);
    }

    fn irq_level(&self) -> bool {
        self.irq.is_raised()
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
