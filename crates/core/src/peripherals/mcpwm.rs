// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Motor control PWM: three timers, three operators, six outputs.

use crate::interrupt::{InterruptLatch, LatchLayout};
use crate::regs::{field, word_offset, RegisterArray};
use crate::signals::{DigitalLevel, InterruptLine};
use crate::timing::{ticks_to_ns, Edge, PeriodicToggle, WaveTiming};
use crate::{DeviceContext, Peripheral, SimResult};

pub const TIMERS: usize = 3;
pub const OPERATORS: usize = 3;
pub const OUTPUTS: usize = OPERATORS * 2;

/// First PWM output signal index on ESP32 (PWM0_OUT0A).
pub const DEFAULT_FUNC_SIG_START: u16 = 32;

const PWM_CLK_HZ: u64 = 160_000_000;

const CLK_CFG: u64 = 0x000;
const SYNCI_CFG: u64 = 0x034;
const OPERATOR_TIMERSEL: u64 = 0x038;
const MISC_BASE: u64 = 0x0E4;
const MISC_REGS: usize = 11;

const TIMER_REGS: RegisterArray = RegisterArray::new(0x004, 0x10, TIMERS);
const OP_REGS: RegisterArray = RegisterArray::new(0x03C, 0x38, OPERATORS);
const OP_WORDS: usize = 14;

// Operator block word indices.
const GEN_TSTMP_A: usize = 1;
const GEN_TSTMP_B: usize = 2;
const GEN_A: usize = 5;
const GEN_B: usize = 6;

const LATCH: LatchLayout = LatchLayout {
    raw: 0x114,
    status: 0x118,
    enable: 0x110,
    clear: 0x11C,
};

const TEZ_INT_BASE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compare {
    A,
    B,
}

#[derive(Debug, serde::Serialize)]
pub struct Mcpwm {
    func_sig_start: u16,
    clk_cfg: u32,
    synci_cfg: u32,
    timersel: u32,
    timers: [[u32; 4]; TIMERS],
    operators: [[u32; OP_WORDS]; OPERATORS],
    misc: [u32; MISC_REGS],
    outputs: [PeriodicToggle; OUTPUTS],
    latch: InterruptLatch,
    irq: InterruptLine,
}

impl Default for Mcpwm {
    fn default() -> Self {
        Self::new(DEFAULT_FUNC_SIG_START)
    }
}

impl Mcpwm {
    pub fn new(func_sig_start: u16) -> Self {
        Self {
            func_sig_start,
            clk_cfg: 0,
            synci_cfg: 0,
            timersel: 0,
            timers: [[0; 4]; TIMERS],
            operators: [[0; OP_WORDS]; OPERATORS],
            misc: [0; MISC_REGS],
            outputs: std::array::from_fn(PeriodicToggle::new),
            latch: InterruptLatch::new(30),
            irq: InterruptLine::new(),
        }
    }

    pub fn output_signal(&self, output: usize) -> u16 {
        self.func_sig_start + output as u16
    }

    pub fn is_running(&self, output: usize) -> bool {
        self.outputs.get(output).is_some_and(|o| o.is_running())
    }

    pub fn output_timing(&self, output: usize) -> Option<WaveTiming> {
        self.outputs.get(output).and_then(|o| o.timing())
    }

    fn operator_timer(&self, op: usize) -> Option<usize> {
        let t = field(self.timersel, 2 * op as u32, 2) as usize;
        (t < TIMERS).then_some(t)
    }

    /// Which compare value drives the rising edge of `output`.
    fn selected_compare(&self, output: usize) -> Option<Compare> {
        let op = output / 2;
        let gen = self.operators[op][if output % 2 == 0 { GEN_A } else { GEN_B }];
        if field(gen, 6, 2) == 1 {
            Some(Compare::B)
        } else if field(gen, 4, 2) == 1 {
            Some(Compare::A)
        } else {
            None
        }
    }

    fn timing(&self, output: usize) -> Option<WaveTiming> {
        let op = output / 2;
        let timer = self.operator_timer(op)?;
        let cfg0 = self.timers[timer][0];
        let divider = u64::from(field(self.clk_cfg, 0, 8) + 1) * u64::from(field(cfg0, 0, 8) + 1);
        let period_ticks = u64::from(field(cfg0, 8, 16));
        if period_ticks == 0 {
            return None;
        }
        let period = ticks_to_ns(PWM_CLK_HZ, divider, 0, period_ticks);
        let compare = match self.selected_compare(output)? {
            Compare::A => self.operators[op][GEN_TSTMP_A],
            Compare::B => self.operators[op][GEN_TSTMP_B],
        };
        WaveTiming::from_duty(period, u64::from(compare), period_ticks)
    }

    fn update_irq(&mut self) {
        let pending = self.latch.pending();
        if self.irq.set(pending) {
            tracing::debug!("MCPWM irq -> {}", pending);
        }
    }

    /// An output entering HIGH marks the start of its timer's period.
    fn mark_period_start(&mut self, output: usize) {
        if let Some(timer) = self.operator_timer(output / 2) {
            self.latch.latch(1 << (TEZ_INT_BASE + timer as u32));
            self.update_irq();
        }
    }

    fn emit(&mut self, output: usize, edge: Option<Edge>, ctx: &mut DeviceContext<'_>) {
        let Some(edge) = edge else {
            return;
        };
        ctx.emit_signal(edge.to_signal(self.output_signal(output)));
        if edge.level == DigitalLevel::High {
            self.mark_period_start(output);
        }
    }

    fn write_compare(&mut self, op: usize, which: Compare, value: u32, ctx: &mut DeviceContext<'_>) {
        let word = match which {
            Compare::A => GEN_TSTMP_A,
            Compare::B => GEN_TSTMP_B,
        };
        let old = self.operators[op][word];
        self.operators[op][word] = value;
        if value == 0 || value == old {
            return;
        }
        for output in [op * 2, op * 2 + 1] {
            if self.selected_compare(output) != Some(which) {
                continue;
            }
            let timing = self.timing(output);
            tracing::debug!("MCPWM out{} restart {:?}", output, timing);
            let edge = self.outputs[output].start(timing, ctx);
            self.emit(output, edge, ctx);
        }
    }

    fn read_reg(&self, offset: u64) -> u32 {
        if let Some(v) = self.latch.read_reg(&LATCH, offset) {
            return v;
        }
        match offset {
            CLK_CFG => return self.clk_cfg,
            SYNCI_CFG => return self.synci_cfg,
            OPERATOR_TIMERSEL => return self.timersel,
            _ => {}
        }
        if let Some((t, reg)) = TIMER_REGS.decode(offset) {
            return self.timers[t][(reg / 4) as usize];
        }
        if let Some((op, reg)) = OP_REGS.decode(offset) {
            return self.operators[op][(reg / 4) as usize];
        }
        if let Some(i) = misc_index(offset) {
            return self.misc[i];
        }
        0
    }

    fn write_reg(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) {
        if self.latch.write_reg(&LATCH, offset, value) {
            self.update_irq();
            return;
        }
        match offset {
            CLK_CFG => self.clk_cfg = value & 0xff,
            SYNCI_CFG => self.synci_cfg = value,
            OPERATOR_TIMERSEL => self.timersel = value & 0x3f,
            _ => {
                if let Some((t, reg)) = TIMER_REGS.decode(offset) {
                    self.timers[t][(reg / 4) as usize] = value;
                } else if let Some((op, reg)) = OP_REGS.decode(offset) {
                    match (reg / 4) as usize {
                        GEN_TSTMP_A => self.write_compare(op, Compare::A, value, ctx),
                        GEN_TSTMP_B => self.write_compare(op, Compare::B, value, ctx),
                        word => self.operators[op][word] = value,
                    }
                } else if let Some(i) = misc_index(offset) {
                    self.misc[i] = value;
                }
            }
        }
    }
}

fn misc_index(offset: u64) -> Option<usize> {
    let i = (offset.checked_sub(MISC_BASE)? / 4) as usize;
    (i < MISC_REGS).then_some(i)
}

impl Peripheral for Mcpwm {
    fn read(&self, offset: u64) -> SimResult<u32> {
        Ok(self.read_reg(word_offset(offset)))
    }

    fn write(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        self.write_reg(word_offset(offset), value, ctx);
        Ok(())
    }

    fn on_timer(&mut self, output: usize, ctx: &mut DeviceContext<'_>) {
        if !self.is_running(output) {
            return;
        }
        let timing = self.timing(output);
        let edge = self.outputs[output].toggle(timing, ctx);
        self.emit(output, edge, ctx);
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        for out in self.outputs.iter_mut() {
            out.stop(ctx);
        }
        *self = Self::new(self.func_sig_start);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::Harness;

    const TIMER0_CFG0: u64 = 0x04;
    const TIMER1_CFG0: u64 = 0x14;
    const OP0: u64 = 0x3C;
    const OP1: u64 = 0x3C + 0x38;
    const UTEA: u32 = 1 << 4;
    const UTEB: u32 = 1 << 6;

    /// 160 MHz / 16 = 10 MHz, 1000-tick period: 100 us.
    fn setup_timer0(h: &mut Harness, pwm: &mut Mcpwm) {
        h.write(pwm, CLK_CFG, 15);
        h.write(pwm, TIMER0_CFG0, 1000 << 8);
    }

    #[test]
    fn test_compare_a_drives_output_a() {
        let mut h = Harness::new();
        let mut pwm = Mcpwm::default();
        setup_timer0(&mut h, &mut pwm);
        h.write(&mut pwm, OP0 + 0x14, UTEA);
        h.write(&mut pwm, OP0 + 0x4, 250);

        assert!(pwm.is_running(0));
        assert!(!pwm.is_running(1));
        let t = pwm.output_timing(0).unwrap();
        assert_eq!((t.on_ns, t.off_ns), (25_000, 75_000));

        let sig = h.take_signals();
        assert_eq!(sig.len(), 1);
        assert_eq!(sig[0].signal, 32);
        assert_eq!(sig[0].level, DigitalLevel::High);
        assert_eq!(sig[0].hold_us, 25);

        h.fire_next(&mut pwm);
        let sig = h.take_signals();
        assert_eq!(sig[0].level, DigitalLevel::Low);
        assert_eq!(sig[0].hold_us, 75);
    }

    #[test]
    fn test_unchanged_or_zero_compare_does_not_restart() {
        let mut h = Harness::new();
        let mut pwm = Mcpwm::default();
        setup_timer0(&mut h, &mut pwm);
        h.write(&mut pwm, OP0 + 0x14, UTEA);
        h.write(&mut pwm, OP0 + 0x4, 250);
        h.take_signals();

        h.write(&mut pwm, OP0 + 0x4, 250);
        h.write(&mut pwm, OP0 + 0x4, 0);
        assert!(h.signals.is_empty());
        assert_eq!(h.read(&pwm, OP0 + 0x4), 0);
    }

    #[test]
    fn test_gen_b_with_compare_b_and_timer_select() {
        let mut h = Harness::new();
        let mut pwm = Mcpwm::new(40);
        h.write(&mut pwm, CLK_CFG, 15);
        h.write(&mut pwm, TIMER1_CFG0, 1 | (500 << 8));
        // Operator 1 on timer 1.
        h.write(&mut pwm, OPERATOR_TIMERSEL, 1 << 2);
        h.write(&mut pwm, OP1 + 0x18, UTEB);
        h.write(&mut pwm, OP1 + 0x8, 100);

        assert!(pwm.is_running(3));
        // 10 MHz / 2 = 5 MHz, 500 ticks: 100 us; compare 100 -> 20 us.
        let t = pwm.output_timing(3).unwrap();
        assert_eq!((t.on_ns, t.off_ns), (20_000, 80_000));
        assert_eq!(h.take_signals()[0].signal, 43);
    }

    #[test]
    fn test_b_wins_when_both_selected() {
        let mut h = Harness::new();
        let mut pwm = Mcpwm::default();
        setup_timer0(&mut h, &mut pwm);
        h.write(&mut pwm, OP0 + 0x14, UTEA | UTEB);
        h.write(&mut pwm, OP0 + 0x4, 100);
        assert!(!pwm.is_running(0));
        h.write(&mut pwm, OP0 + 0x8, 600);
        assert!(pwm.is_running(0));
        assert_eq!(pwm.output_timing(0).unwrap().on_ns, 60_000);
    }

    #[test]
    fn test_period_start_latches_tez() {
        let mut h = Harness::new();
        let mut pwm = Mcpwm::default();
        setup_timer0(&mut h, &mut pwm);
        h.write(&mut pwm, 0x110, 1 << 3);
        h.write(&mut pwm, OP0 + 0x14, UTEA);
        h.write(&mut pwm, OP0 + 0x4, 250);
        assert_eq!(h.read(&pwm, 0x114), 1 << 3);
        assert!(pwm.irq_level());

        h.write(&mut pwm, 0x11C, 1 << 3);
        assert!(!pwm.irq_level());
        h.fire_next(&mut pwm); // LOW
        assert!(!pwm.irq_level());
        h.fire_next(&mut pwm); // HIGH again
        assert_eq!(h.read(&pwm, 0x118), 1 << 3);
    }

    #[test]
    fn test_zero_period_keeps_output_inert() {
        let mut h = Harness::new();
        let mut pwm = Mcpwm::default();
        h.write(&mut pwm, OP0 + 0x14, UTEA);
        h.write(&mut pwm, OP0 + 0x4, 250);
        assert!(!pwm.is_running(0));
        assert!(h.clock.is_empty());
    }

    #[test]
    fn test_register_readback() {
        let mut h = Harness::new();
        let mut pwm = Mcpwm::default();
        h.write(&mut pwm, TIMER0_CFG0 + 4, 0x2);
        h.write(&mut pwm, OP1 + 0x1C, 0xABC);
        h.write(&mut pwm, 0x10C, 0x7);
        assert_eq!(h.read(&pwm, TIMER0_CFG0 + 4), 0x2);
        assert_eq!(h.read(&pwm, OP1 + 0x1C), 0xABC);
        assert_eq!(h.read(&pwm, 0x10C), 0x7);
        assert_eq!(h.read(&pwm, 0x200), 0);
    }
}
