// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;

/// Trait representing the interrupt controller peripheral IRQ lines feed into.
///
/// The CPU side (priority, vectoring, acknowledge) lives outside this crate; the
/// bus only reports line levels.
pub trait InterruptController: Debug + Send + Sync {
    /// Signal the controller that an interrupt line has changed level.
    fn set_interrupt_level(&self, irq: u32, raised: bool);

    /// Check if a specific interrupt line is currently raised.
    fn is_interrupt_active(&self, irq: u32) -> bool;
}

/// Records line levels and assertion counts per IRQ number.
#[derive(Debug, Default)]
pub struct IrqRecorder {
    lines: Mutex<HashMap<u32, (bool, u64)>>,
}

impl IrqRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assertions(&self, irq: u32) -> u64 {
        self.lines
            .lock()
            .ok()
            .and_then(|lines| lines.get(&irq).map(|(_, count)| *count))
            .unwrap_or(0)
    }
}

impl InterruptController for IrqRecorder {
    fn set_interrupt_level(&self, irq: u32, raised: bool) {
        if let Ok(mut lines) = self.lines.lock() {
            let entry = lines.entry(irq).or_insert((false, 0));
            if raised && !entry.0 {
                entry.1 += 1;
            }
            entry.0 = raised;
        }
    }

    fn is_interrupt_active(&self, irq: u32) -> bool {
        self.lines
            .lock()
            .ok()
            .and_then(|lines| lines.get(&irq).map(|(raised, _)| *raised))
            .unwrap_or(false)
    }
}

/// Offsets of a RAW/STATUS/ENABLE/CLEAR register quadruple inside a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchLayout {
    pub raw: u64,
    pub status: u64,
    pub enable: u64,
    pub clear: u64,
}

/// RAW/ENABLE interrupt latch with derived STATUS.
///
/// RAW bits are set by hardware events only; firmware acknowledges them through
/// CLEAR. STATUS is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct InterruptLatch {
    raw: u32,
    enable: u32,
    #[serde(skip)]
    mask: u32,
}

impl Default for InterruptLatch {
    fn default() -> Self {
        Self::new(32)
    }
}

impl InterruptLatch {
    pub fn new(width: u32) -> Self {
        let mask = if width >= 32 {
            u32::MAX
        } else {
            (1u32 << width) - 1
        };
        Self {
            raw: 0,
            enable: 0,
            mask,
        }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn enable(&self) -> u32 {
        self.enable
    }

    pub fn status(&self) -> u32 {
        self.raw & self.enable
    }

    /// Level of the IRQ line this latch drives.
    pub fn pending(&self) -> bool {
        self.status() != 0
    }

    pub fn is_enabled(&self, bits: u32) -> bool {
        self.enable & bits != 0
    }

    /// Hardware event: set RAW bits.
    pub fn latch(&mut self, bits: u32) {
        self.raw |= bits & self.mask;
    }

    /// Hardware deassert: drop RAW bits without a firmware acknowledge.
    pub fn release(&mut self, bits: u32) {
        self.raw &= !bits;
    }

    /// Replaces RAW wholesale, for register variants where RAW is writable.
    pub fn force_raw(&mut self, value: u32) {
        self.raw = value & self.mask;
    }

    pub fn set_enable(&mut self, value: u32) {
        self.enable = value & self.mask;
    }

    /// Firmware acknowledge for edge sources.
    pub fn clear(&mut self, bits: u32) -> u32 {
        self.clear_unless(bits, |_| false)
    }

    /// Firmware acknowledge; bit `b` survives when `still_true(b)` holds.
    /// Returns the requested bits that were not kept.
    pub fn clear_unless(&mut self, bits: u32, still_true: impl Fn(u32) -> bool) -> u32 {
        let cleared = Self::clear_mask(bits, still_true);
        self.raw &= !cleared;
        cleared
    }

    /// The subset of `bits` an acknowledge would drop, for sources whose
    /// condition is shared by several latches.
    pub fn clear_mask(bits: u32, still_true: impl Fn(u32) -> bool) -> u32 {
        (0..32)
            .filter(|bit| bits & (1u32 << bit) != 0 && !still_true(*bit))
            .fold(0, |acc, bit| acc | (1u32 << bit))
    }

    pub fn reset(&mut self) {
        self.raw = 0;
        self.enable = 0;
    }

    pub fn read_reg(&self, layout: &LatchLayout, offset: u64) -> Option<u32> {
        match offset {
            o if o == layout.raw => Some(self.raw),
            o if o == layout.status => Some(self.status()),
            o if o == layout.enable => Some(self.enable),
            o if o == layout.clear => Some(0),
            _ => None,
        }
    }

    /// Handles ENABLE and CLEAR writes. Returns false when `offset` is not part
    /// of the quadruple. RAW and STATUS writes are accepted and ignored.
    pub fn write_reg(&mut self, layout: &LatchLayout, offset: u64, value: u32) -> bool {
        match offset {
            o if o == layout.enable => self.set_enable(value),
            o if o == layout.clear => {
                self.clear(value);
            }
            o if o == layout.raw || o == layout.status => {}
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: LatchLayout = LatchLayout {
        raw: 0x0,
        status: 0x4,
        enable: 0x8,
        clear: 0xC,
    };

    #[test]
    fn test_status_is_raw_and_enable() {
        let mut latch = InterruptLatch::new(16);
        latch.latch(0b1011);
        latch.set_enable(0b0110);
        assert_eq!(latch.status(), 0b0010);
        assert!(latch.pending());

        latch.set_enable(0b0100);
        assert_eq!(latch.read_reg(&LAYOUT, 0x4), Some(0));
        assert!(!latch.pending());
    }

    #[test]
    fn test_width_masks_out_of_range_bits() {
        let mut latch = InterruptLatch::new(4);
        latch.latch(0xff);
        latch.set_enable(0xff);
        assert_eq!(latch.raw(), 0xf);
        assert_eq!(latch.enable(), 0xf);
    }

    #[test]
    fn test_clear_keeps_bits_whose_condition_holds() {
        let mut latch = InterruptLatch::new(32);
        latch.latch(0b111);
        let cleared = latch.clear_unless(0b111, |bit| bit == 1);
        assert_eq!(cleared, 0b101);
        assert_eq!(latch.raw(), 0b010);

        // Same clear again is a no-op while the condition persists.
        assert_eq!(latch.clear_unless(0b111, |bit| bit == 1), 0b101);
        assert_eq!(latch.raw(), 0b010);
    }

    #[test]
    fn test_register_view_routes_enable_and_clear() {
        let mut latch = InterruptLatch::new(32);
        latch.latch(0x30);
        assert!(latch.write_reg(&LAYOUT, 0x8, 0x10));
        assert!(latch.pending());
        assert!(latch.write_reg(&LAYOUT, 0xC, 0x10));
        assert!(!latch.pending());
        assert_eq!(latch.read_reg(&LAYOUT, 0x0), Some(0x20));
        assert!(latch.write_reg(&LAYOUT, 0x0, 0xffff));
        assert_eq!(latch.raw(), 0x20);
        assert!(!latch.write_reg(&LAYOUT, 0x10, 1));
    }

    #[test]
    fn test_recorder_counts_rising_levels() {
        let rec = IrqRecorder::new();
        rec.set_interrupt_level(5, true);
        rec.set_interrupt_level(5, true);
        rec.set_interrupt_level(5, false);
        rec.set_interrupt_level(5, true);
        assert!(rec.is_interrupt_active(5));
        assert_eq!(rec.assertions(5), 2);
        assert!(!rec.is_interrupt_active(6));
    }
}
