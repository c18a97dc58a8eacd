// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! GPIO matrix: pin levels, interrupt triggering and the signal crossbar.

pub mod routing;
pub mod trigger;

use std::str::FromStr;

use crate::interrupt::InterruptLatch;
use crate::regs::{word_offset, RegisterArray};
use crate::signals::{DigitalLevel, InterruptLine, PinEvent, SignalEvent};
use crate::{DeviceContext, Peripheral, SimResult};

pub use routing::{RoutingTable, GPIO_OUT_SIGNAL, INPUT_SIGNALS};
pub use trigger::TriggerType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioVariant {
    #[default]
    Esp32,
    Esp32S3,
}

impl FromStr for GpioVariant {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let v = value.trim().to_ascii_lowercase();
        match v.as_str() {
            "esp32" => Ok(Self::Esp32),
            "esp32s3" | "esp32-s3" | "s3" => Ok(Self::Esp32S3),
            _ => Err(format!(
                "unsupported GPIO variant '{}'; supported: esp32, esp32s3",
                value
            )),
        }
    }
}

const OUT: u64 = 0x04;
const OUT_W1TS: u64 = 0x08;
const OUT_W1TC: u64 = 0x0C;
const OUT1: u64 = 0x10;
const OUT1_W1TS: u64 = 0x14;
const OUT1_W1TC: u64 = 0x18;
const ENABLE: u64 = 0x20;
const ENABLE_W1TS: u64 = 0x24;
const ENABLE_W1TC: u64 = 0x28;
const ENABLE1: u64 = 0x2C;
const ENABLE1_W1TS: u64 = 0x30;
const ENABLE1_W1TC: u64 = 0x34;
const STRAP: u64 = 0x38;
const IN: u64 = 0x3C;
const IN1: u64 = 0x40;
const STATUS: u64 = 0x44;
const STATUS_W1TS: u64 = 0x48;
const STATUS_W1TC: u64 = 0x4C;
const STATUS1: u64 = 0x50;
const STATUS1_W1TS: u64 = 0x54;
const STATUS1_W1TC: u64 = 0x58;

/// One CPU interrupt context: the PIN register gate bit and the two
/// per-bank status registers it latches into.
#[derive(Debug, Clone, Copy)]
struct ContextLayout {
    name: &'static str,
    gate_bit: u32,
    int_reg: u64,
    int1_reg: u64,
}

#[derive(Debug, Clone, Copy)]
struct VariantLayout {
    pins: usize,
    pin_regs: RegisterArray,
    in_sel_regs: RegisterArray,
    out_sel_regs: RegisterArray,
    contexts: &'static [ContextLayout],
    /// Context status registers accept firmware writes.
    contexts_writable: bool,
    strap_reset: u32,
    in_reset: [u32; 2],
    const_high: u32,
    const_low: u32,
}

// PRO CPU gate is PIN bit 15 (the reference manual lists 16).
static ESP32_CONTEXTS: [ContextLayout; 2] = [
    ContextLayout {
        name: "app",
        gate_bit: 13,
        int_reg: 0x60,
        int1_reg: 0x74,
    },
    ContextLayout {
        name: "pro",
        gate_bit: 15,
        int_reg: 0x68,
        int1_reg: 0x7C,
    },
];

static ESP32S3_CONTEXTS: [ContextLayout; 1] = [ContextLayout {
    name: "cpu",
    gate_bit: 13,
    int_reg: 0x5C,
    int1_reg: 0x68,
}];

impl GpioVariant {
    fn layout(self) -> VariantLayout {
        match self {
            GpioVariant::Esp32 => VariantLayout {
                pins: 40,
                pin_regs: RegisterArray::new(0x88, 4, 40),
                in_sel_regs: RegisterArray::new(0x130, 4, INPUT_SIGNALS),
                out_sel_regs: RegisterArray::new(0x530, 4, 40),
                contexts: &ESP32_CONTEXTS,
                contexts_writable: false,
                strap_reset: 0x12,
                in_reset: [0x1, 0x8],
                const_high: 0x30,
                const_low: 0x38,
            },
            GpioVariant::Esp32S3 => VariantLayout {
                pins: 49,
                pin_regs: RegisterArray::new(0x74, 4, 49),
                // OUT_SEL starts at 0x548, shadowing the last three IN_SEL slots.
                in_sel_regs: RegisterArray::new(0x154, 4, (0x548 - 0x154) / 4),
                out_sel_regs: RegisterArray::new(0x548, 4, 49),
                contexts: &ESP32S3_CONTEXTS,
                contexts_writable: true,
                strap_reset: 0x04,
                in_reset: [0, 0],
                const_high: 0x38,
                const_low: 0x3C,
            },
        }
    }
}

/// ESP32 / ESP32-S3 GPIO matrix.
#[derive(Debug, serde::Serialize)]
pub struct GpioMatrix {
    variant: GpioVariant,
    #[serde(skip)]
    layout: VariantLayout,
    out: [u32; 2],
    enable: [u32; 2],
    strap: u32,
    input: [u32; 2],
    status: [u32; 2],
    /// `contexts[c][bank]`
    contexts: Vec<[InterruptLatch; 2]>,
    pin_cfg: Vec<u32>,
    routing: RoutingTable,
    irq: InterruptLine,
}

impl Default for GpioMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl GpioMatrix {
    pub fn new() -> Self {
        Self::new_with_variant(GpioVariant::Esp32)
    }

    pub fn new_with_variant(variant: GpioVariant) -> Self {
        let layout = variant.layout();
        let bank1_width = (layout.pins - 32) as u32;
        let mut contexts = Vec::with_capacity(layout.contexts.len());
        for _ in layout.contexts {
            let mut bank0 = InterruptLatch::new(32);
            let mut bank1 = InterruptLatch::new(bank1_width);
            bank0.set_enable(u32::MAX);
            bank1.set_enable(u32::MAX);
            contexts.push([bank0, bank1]);
        }
        Self {
            variant,
            layout,
            out: [0; 2],
            enable: [0; 2],
            strap: layout.strap_reset,
            input: layout.in_reset,
            status: [0; 2],
            contexts,
            pin_cfg: vec![0; layout.pins],
            routing: RoutingTable::new(layout.pins, layout.const_high, layout.const_low),
            irq: InterruptLine::new(),
        }
    }

    pub fn variant(&self) -> GpioVariant {
        self.variant
    }

    pub fn pin_count(&self) -> usize {
        self.layout.pins
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    fn bank_mask(&self, bank: usize) -> u32 {
        if bank == 0 {
            u32::MAX
        } else {
            (1u32 << (self.layout.pins - 32)) - 1
        }
    }

    pub fn pin_level(&self, pin: usize) -> DigitalLevel {
        if pin >= self.layout.pins {
            return DigitalLevel::Low;
        }
        DigitalLevel::from_bit(self.input[pin / 32] >> (pin % 32))
    }

    /// Level seen by peripheral input `signal` through the input crossbar.
    pub fn input_level(&self, signal: usize) -> DigitalLevel {
        self.routing.input_level(signal, |pin| self.pin_level(pin))
    }

    pub fn trigger_type(&self, pin: usize) -> TriggerType {
        TriggerType::from_pin_reg(self.pin_cfg.get(pin).copied().unwrap_or(0))
    }

    /// External stimulus on a pin. Returns true if an interrupt fired.
    pub fn set_input(&mut self, pin: usize, level: DigitalLevel) -> bool {
        if pin >= self.layout.pins {
            tracing::warn!("GPIO input on nonexistent pin {}", pin);
            return false;
        }
        let old = self.pin_level(pin);
        if old == level {
            return false;
        }
        let (bank, bit) = (pin / 32, 1u32 << (pin % 32));
        match level {
            DigitalLevel::High => self.input[bank] |= bit,
            DigitalLevel::Low => self.input[bank] &= !bit,
        }

        if !self.trigger_type(pin).fires(old, level) {
            return false;
        }
        let cfg = self.pin_cfg[pin];
        self.status[bank] |= bit;
        for (ctx, layout) in self.contexts.iter_mut().zip(self.layout.contexts) {
            if cfg & (1 << layout.gate_bit) != 0 {
                ctx[bank].latch(bit);
            }
        }
        tracing::debug!("GPIO{} {:?} -> {:?} fired interrupt", pin, old, level);
        self.update_irq();
        true
    }

    /// Peripheral output announced on the crossbar.
    pub fn route_signal(&self, event: &SignalEvent, time_ns: u64) -> Vec<PinEvent> {
        self.routing.route(event, time_ns)
    }

    /// Context status for `context` (0 = APP / CPU, 1 = PRO) and bank.
    pub fn context_status(&self, context: usize, bank: usize) -> u32 {
        self.contexts
            .get(context)
            .map(|c| c[bank.min(1)].status())
            .unwrap_or(0)
    }

    fn update_irq(&mut self) {
        let pending = self.contexts.iter().flatten().any(|l| l.pending());
        if self.irq.set(pending) {
            tracing::debug!("GPIO irq -> {}", pending);
        }
    }

    /// Level-triggered pins whose condition still holds keep their bit.
    fn clear_status(&mut self, bank: usize, value: u32) {
        let input = self.input[bank];
        let pin_cfg = &self.pin_cfg;
        let still_true = |bit: u32| {
            let pin = bank * 32 + bit as usize;
            let Some(cfg) = pin_cfg.get(pin) else {
                return false;
            };
            TriggerType::from_pin_reg(*cfg).condition_holds(DigitalLevel::from_bit(input >> bit))
        };
        let cleared = InterruptLatch::clear_mask(value, still_true);
        for ctx in self.contexts.iter_mut() {
            ctx[bank].release(cleared);
        }
        self.status[bank] &= !cleared;
        self.update_irq();
    }

    fn set_out(&mut self, bank: usize, value: u32, ctx: &mut DeviceContext<'_>) {
        let value = value & self.bank_mask(bank);
        let old = self.out[bank];
        self.out[bank] = value;
        let diff = old ^ value;
        for bit in 0..32 {
            if diff & (1 << bit) == 0 {
                continue;
            }
            let pin = bank * 32 + bit;
            if self.routing.out_signal(pin) != GPIO_OUT_SIGNAL {
                continue;
            }
            let level = DigitalLevel::from_bit(value >> bit).invert_if(self.routing.out_inverted(pin));
            ctx.emit_pin(pin as u8, level, 0);
        }
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            OUT => return self.out[0],
            OUT1 => return self.out[1],
            ENABLE => return self.enable[0],
            ENABLE1 => return self.enable[1],
            STRAP => return self.strap,
            IN => return self.input[0],
            IN1 => return self.input[1],
            STATUS => return self.status[0],
            STATUS1 => return self.status[1],
            _ => {}
        }
        for (layout, ctx) in self.layout.contexts.iter().zip(&self.contexts) {
            if offset == layout.int_reg {
                return ctx[0].raw();
            }
            if offset == layout.int1_reg {
                return ctx[1].raw();
            }
        }
        if let Some((pin, 0)) = self.layout.pin_regs.decode(offset) {
            return self.pin_cfg[pin];
        }
        if let Some((signal, 0)) = self.layout.in_sel_regs.decode(offset) {
            return self.routing.in_sel(signal);
        }
        if let Some((pin, 0)) = self.layout.out_sel_regs.decode(offset) {
            return self.routing.out_sel(pin);
        }
        0
    }

    fn write_reg(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) {
        match offset {
            OUT => self.set_out(0, value, ctx),
            OUT_W1TS => self.set_out(0, self.out[0] | value, ctx),
            OUT_W1TC => self.set_out(0, self.out[0] & !value, ctx),
            OUT1 => self.set_out(1, value, ctx),
            OUT1_W1TS => self.set_out(1, self.out[1] | value, ctx),
            OUT1_W1TC => self.set_out(1, self.out[1] & !value, ctx),
            ENABLE => self.enable[0] = value,
            ENABLE_W1TS => self.enable[0] |= value,
            ENABLE_W1TC => self.enable[0] &= !value,
            ENABLE1 => self.enable[1] = value & self.bank_mask(1),
            ENABLE1_W1TS => self.enable[1] |= value & self.bank_mask(1),
            ENABLE1_W1TC => self.enable[1] &= !value,
            STRAP => self.strap = value,
            STATUS => self.status[0] = value,
            STATUS_W1TS => self.status[0] |= value,
            STATUS_W1TC => self.clear_status(0, value),
            STATUS1 => self.status[1] = value & self.bank_mask(1),
            STATUS1_W1TS => self.status[1] |= value & self.bank_mask(1),
            STATUS1_W1TC => self.clear_status(1, value & self.bank_mask(1)),
            _ => self.write_table(offset, value),
        }
    }

    fn write_table(&mut self, offset: u64, value: u32) {
        if self.layout.contexts_writable {
            for (i, layout) in self.layout.contexts.iter().enumerate() {
                let bank = if offset == layout.int_reg {
                    0
                } else if offset == layout.int1_reg {
                    1
                } else {
                    continue;
                };
                self.contexts[i][bank].force_raw(value);
                self.update_irq();
                return;
            }
        }
        if let Some((pin, 0)) = self.layout.pin_regs.decode(offset) {
            self.pin_cfg[pin] = value;
        } else if let Some((signal, 0)) = self.layout.in_sel_regs.decode(offset) {
            self.routing.set_in_sel(signal, value);
        } else if let Some((pin, 0)) = self.layout.out_sel_regs.decode(offset) {
            self.routing.set_out_sel(pin, value);
        } else {
            tracing::debug!("GPIO write to unmapped offset {:#x} dropped", offset);
        }
    }

    fn context_name(&self, context: usize) -> &'static str {
        self.layout.contexts.get(context).map(|c| c.name).unwrap_or("?")
    }
}

impl Peripheral for GpioMatrix {
    fn read(&self, offset: u64) -> SimResult<u32> {
        Ok(self.read_reg(word_offset(offset)))
    }

    fn write(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        self.write_reg(word_offset(offset), value, ctx);
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {
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
        let mut v = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = v.as_object_mut() {
            let names: Vec<_> = (0..self.contexts.len()).map(|c| self.context_name(c)).collect();
            obj.insert("context_names".into(), serde_json::json!(names));
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::Harness;

    const PIN_BASE: u64 = 0x88;

    fn pin_reg(pin: u64) -> u64 {
        PIN_BASE + 4 * pin
    }

    #[test]
    fn test_variant_parsing() {
        assert_eq!("ESP32".parse::<GpioVariant>().unwrap(), GpioVariant::Esp32);
        assert_eq!("esp32-s3".parse::<GpioVariant>().unwrap(), GpioVariant::Esp32S3);
        assert!("stm32f1".parse::<GpioVariant>().is_err());
    }

    #[test]
    fn test_reset_values() {
        let g = GpioMatrix::new();
        assert_eq!(g.read(STRAP).unwrap(), 0x12);
        assert_eq!(g.read(IN).unwrap(), 0x1);
        assert_eq!(g.read(IN1).unwrap(), 0x8);
        assert_eq!(g.read(0x530).unwrap(), 0x100);

        let s3 = GpioMatrix::new_with_variant(GpioVariant::Esp32S3);
        assert_eq!(s3.read(STRAP).unwrap(), 0x04);
        assert_eq!(s3.read(IN).unwrap(), 0);
        assert_eq!(s3.pin_count(), 49);
    }

    #[test]
    fn test_rising_edge_latches_app_context() {
        // Scenario C: pin 4, rising, APP CPU gate.
        let mut h = Harness::new();
        let mut g = GpioMatrix::new();
        h.write(&mut g, pin_reg(4), (1 << 7) | (1 << 13));

        assert!(g.set_input(4, DigitalLevel::High));
        assert_eq!(g.read(0x60).unwrap(), 1 << 4);
        assert_eq!(g.read(0x68).unwrap(), 0);
        assert_eq!(g.read(STATUS).unwrap(), 1 << 4);
        assert!(g.irq_level());

        // Same level again: no evaluation.
        assert!(!g.set_input(4, DigitalLevel::High));

        h.write(&mut g, STATUS_W1TC, 1 << 4);
        assert_eq!(g.read(0x60).unwrap(), 0);
        assert_eq!(g.read(STATUS).unwrap(), 0);
        assert!(!g.irq_level());
    }

    #[test]
    fn test_pro_cpu_gate_is_bit_15() {
        let mut h = Harness::new();
        let mut g = GpioMatrix::new();
        h.write(&mut g, pin_reg(2), (3 << 7) | (1 << 15));
        g.set_input(2, DigitalLevel::High);
        assert_eq!(g.read(0x68).unwrap(), 1 << 2);
        assert_eq!(g.read(0x60).unwrap(), 0);

        // Bit 16 alone gates nothing.
        h.write(&mut g, pin_reg(3), (3 << 7) | (1 << 16));
        g.set_input(3, DigitalLevel::High);
        assert_eq!(g.read(0x68).unwrap(), 1 << 2);
    }

    #[test]
    fn test_level_interrupt_survives_clear_while_asserted() {
        let mut h = Harness::new();
        let mut g = GpioMatrix::new();
        h.write(&mut g, pin_reg(5), (5 << 7) | (1 << 13));
        g.set_input(5, DigitalLevel::High);
        assert!(g.irq_level());

        h.write(&mut g, STATUS_W1TC, 1 << 5);
        h.write(&mut g, STATUS_W1TC, 1 << 5);
        assert_eq!(g.read(0x60).unwrap(), 1 << 5);
        assert!(g.irq_level());

        g.set_input(5, DigitalLevel::Low);
        h.write(&mut g, STATUS_W1TC, 1 << 5);
        assert_eq!(g.read(0x60).unwrap(), 0);
        assert!(!g.irq_level());
    }

    #[test]
    fn test_clear_is_per_bit() {
        let mut h = Harness::new();
        let mut g = GpioMatrix::new();
        h.write(&mut g, pin_reg(6), (5 << 7) | (1 << 13));
        h.write(&mut g, pin_reg(7), (1 << 7) | (1 << 13));
        g.set_input(6, DigitalLevel::High);
        g.set_input(7, DigitalLevel::High);

        h.write(&mut g, STATUS_W1TC, (1 << 6) | (1 << 7));
        assert_eq!(g.read(0x60).unwrap(), 1 << 6);
    }

    #[test]
    fn test_clear_applies_to_both_contexts() {
        let mut h = Harness::new();
        let mut g = GpioMatrix::new();
        let both = (1 << 13) | (1 << 15);
        h.write(&mut g, pin_reg(6), (5 << 7) | both);
        h.write(&mut g, pin_reg(7), (1 << 7) | both);
        g.set_input(6, DigitalLevel::High);
        g.set_input(7, DigitalLevel::High);
        assert_eq!(g.read(0x68).unwrap(), (1 << 6) | (1 << 7));

        h.write(&mut g, STATUS_W1TC, (1 << 6) | (1 << 7));
        assert_eq!(g.read(0x60).unwrap(), 1 << 6);
        assert_eq!(g.read(0x68).unwrap(), 1 << 6);
        assert_eq!(g.read(STATUS).unwrap(), 1 << 6);
    }

    #[test]
    fn test_bank1_pins() {
        let mut h = Harness::new();
        let mut g = GpioMatrix::new();
        h.write(&mut g, pin_reg(34), (2 << 7) | (1 << 13) | (1 << 15));
        g.set_input(34, DigitalLevel::High);
        assert!(!g.irq_level());
        g.set_input(34, DigitalLevel::Low);
        assert_eq!(g.read(0x74).unwrap(), 1 << 2);
        assert_eq!(g.read(0x7C).unwrap(), 1 << 2);
        assert_eq!(g.read(STATUS1).unwrap(), 1 << 2);

        h.write(&mut g, STATUS1_W1TC, 1 << 2);
        assert!(!g.irq_level());
    }

    #[test]
    fn test_s3_single_context_and_writable_status() {
        let mut h = Harness::new();
        let mut g = GpioMatrix::new_with_variant(GpioVariant::Esp32S3);
        h.write(&mut g, 0x74 + 4 * 45, (3 << 7) | (1 << 13));
        g.set_input(45, DigitalLevel::High);
        assert_eq!(g.read(0x68).unwrap(), 1 << 13);
        assert!(g.irq_level());

        h.write(&mut g, 0x68, 0);
        assert!(!g.irq_level());
    }

    #[test]
    fn test_out_changes_emit_pin_events() {
        let mut h = Harness::new();
        let mut g = GpioMatrix::new();
        h.write(&mut g, OUT_W1TS, (1 << 2) | (1 << 5));
        h.write(&mut g, OUT_W1TS, 1 << 2);
        h.write(&mut g, OUT_W1TC, 1 << 5);
        let pins: Vec<_> = h.pins.iter().map(|e| (e.pin, e.level)).collect();
        assert_eq!(
            pins,
            vec![
                (2, DigitalLevel::High),
                (5, DigitalLevel::High),
                (5, DigitalLevel::Low)
            ]
        );
        assert_eq!(g.read(OUT).unwrap(), 1 << 2);

        // Pins routed to a peripheral ignore GPIO_OUT.
        h.pins.clear();
        h.write(&mut g, 0x530 + 4 * 9, 71);
        h.write(&mut g, OUT, 1 << 9);
        assert!(h.pins.is_empty());
    }

    #[test]
    fn test_crossbar_routing_and_input_select() {
        let mut h = Harness::new();
        let mut g = GpioMatrix::new();
        h.write(&mut g, 0x530 + 4 * 18, 71 | (1 << 9));
        let routed = g.route_signal(
            &SignalEvent {
                signal: 71,
                level: DigitalLevel::High,
                hold_us: 20,
            },
            500,
        );
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].pin, 18);
        assert_eq!(routed[0].level, DigitalLevel::Low);
        assert_eq!(routed[0].time_ns, 500);

        h.write(&mut g, 0x130 + 4 * 14, 0x80 | 21);
        g.set_input(21, DigitalLevel::High);
        assert_eq!(g.input_level(14), DigitalLevel::High);
        assert_eq!(g.read(0x130 + 4 * 14).unwrap(), 0x80 | 21);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut h = Harness::new();
        let mut g = GpioMatrix::new();
        h.write(&mut g, pin_reg(4), (1 << 7) | (1 << 13));
        g.set_input(4, DigitalLevel::High);
        g.reset(&mut h.ctx());
        assert!(!g.irq_level());
        assert_eq!(g.read(pin_reg(4)).unwrap(), 0);
        assert_eq!(g.read(IN).unwrap(), 0x1);
    }
}
