// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::signals::{DigitalLevel, PinEvent, SignalEvent};

pub const INPUT_SIGNALS: usize = 256;

/// Output-select value meaning "pin follows GPIO_OUT".
pub const GPIO_OUT_SIGNAL: u16 = 0x100;

const OUT_SIGNAL_MASK: u32 = 0x1ff;
const OUT_INV: u32 = 1 << 9;
const OUT_CFG_MASK: u32 = 0xfff;
const IN_SOURCE_MASK: u32 = 0x3f;
const IN_INV: u32 = 1 << 6;
const IN_CFG_MASK: u32 = 0xff;

/// FUNCy_IN_SEL_CFG and FUNCn_OUT_SEL_CFG tables.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoutingTable {
    in_sel: Vec<u32>,
    out_sel: Vec<u32>,
    const_high: u32,
    const_low: u32,
}

impl RoutingTable {
    /// `const_high` / `const_low` are the input-select source codes that read as
    /// a constant instead of a pin.
    pub fn new(pins: usize, const_high: u32, const_low: u32) -> Self {
        Self {
            in_sel: vec![0; INPUT_SIGNALS],
            out_sel: vec![u32::from(GPIO_OUT_SIGNAL); pins],
            const_high,
            const_low,
        }
    }

    pub fn reset(&mut self) {
        self.in_sel.fill(0);
        self.out_sel.fill(u32::from(GPIO_OUT_SIGNAL));
    }

    pub fn in_sel(&self, signal: usize) -> u32 {
        self.in_sel.get(signal).copied().unwrap_or(0)
    }

    pub fn set_in_sel(&mut self, signal: usize, value: u32) {
        if let Some(entry) = self.in_sel.get_mut(signal) {
            *entry = value & IN_CFG_MASK;
        }
    }

    pub fn out_sel(&self, pin: usize) -> u32 {
        self.out_sel.get(pin).copied().unwrap_or(0)
    }

    pub fn set_out_sel(&mut self, pin: usize, value: u32) {
        if let Some(entry) = self.out_sel.get_mut(pin) {
            *entry = value & OUT_CFG_MASK;
        }
    }

    pub fn out_signal(&self, pin: usize) -> u16 {
        (self.out_sel(pin) & OUT_SIGNAL_MASK) as u16
    }

    pub fn out_inverted(&self, pin: usize) -> bool {
        self.out_sel(pin) & OUT_INV != 0
    }

    /// Pins currently bound to `signal`, with their invert flag.
    pub fn pins_for(&self, signal: u16) -> impl Iterator<Item = (usize, bool)> + '_ {
        self.out_sel
            .iter()
            .enumerate()
            .filter(move |(_, cfg)| (*cfg & OUT_SIGNAL_MASK) as u16 == signal)
            .map(|(pin, cfg)| (pin, cfg & OUT_INV != 0))
    }

    /// Fans a peripheral output out to its pins.
    pub fn route(&self, event: &SignalEvent, time_ns: u64) -> Vec<PinEvent> {
        self.pins_for(event.signal)
            .map(|(pin, invert)| PinEvent {
                pin: pin as u8,
                level: event.level.invert_if(invert),
                hold_us: event.hold_us,
                time_ns,
            })
            .collect()
    }

    /// Resolves what peripheral input `signal` currently sees.
    pub fn input_level(&self, signal: usize, pin_level: impl Fn(usize) -> DigitalLevel) -> DigitalLevel {
        let cfg = self.in_sel(signal);
        let source = cfg & IN_SOURCE_MASK;
        let level = if source == self.const_high {
            DigitalLevel::High
        } else if source == self.const_low {
            DigitalLevel::Low
        } else if (source as usize) < self.out_sel.len() {
            pin_level(source as usize)
        } else {
            DigitalLevel::Low
        };
        level.invert_if(cfg & IN_INV != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_fans_out_with_per_pin_invert() {
        let mut t = RoutingTable::new(40, 0x30, 0x38);
        t.set_out_sel(5, 71);
        t.set_out_sel(6, 71 | OUT_INV);
        t.set_out_sel(7, 72);

        let ev = SignalEvent {
            signal: 71,
            level: DigitalLevel::High,
            hold_us: 512,
        };
        let routed = t.route(&ev, 1_000);
        assert_eq!(routed.len(), 2);
        assert_eq!((routed[0].pin, routed[0].level), (5, DigitalLevel::High));
        assert_eq!((routed[1].pin, routed[1].level), (6, DigitalLevel::Low));
        assert_eq!(routed[1].hold_us, 512);
    }

    #[test]
    fn test_unrouted_pins_follow_gpio_out() {
        let t = RoutingTable::new(40, 0x30, 0x38);
        assert_eq!(t.out_signal(0), GPIO_OUT_SIGNAL);
        assert_eq!(t.pins_for(GPIO_OUT_SIGNAL).count(), 40);
    }

    #[test]
    fn test_input_select_resolves_pins_and_constants() {
        let mut t = RoutingTable::new(40, 0x30, 0x38);
        let levels = |pin: usize| DigitalLevel::from(pin == 4);

        t.set_in_sel(10, 4 | 0x80);
        assert_eq!(t.input_level(10, levels), DigitalLevel::High);
        t.set_in_sel(10, 4 | IN_INV | 0x80);
        assert_eq!(t.input_level(10, levels), DigitalLevel::Low);
        t.set_in_sel(11, 0x30);
        assert_eq!(t.input_level(11, levels), DigitalLevel::High);
        t.set_in_sel(11, 0x38);
        assert_eq!(t.input_level(11, levels), DigitalLevel::Low);
        assert_eq!(t.in_sel(11), 0x38);
    }
}
