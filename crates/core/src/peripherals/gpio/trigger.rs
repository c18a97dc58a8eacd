// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::signals::DigitalLevel;

/// Interrupt trigger type held in PIN register bits 9:7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Disabled,
    Rising,
    Falling,
    AnyEdge,
    LevelLow,
    LevelHigh,
}

impl TriggerType {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x7 {
            1 => Self::Rising,
            2 => Self::Falling,
            3 => Self::AnyEdge,
            4 => Self::LevelLow,
            5 => Self::LevelHigh,
            _ => Self::Disabled,
        }
    }

    pub fn from_pin_reg(pin_reg: u32) -> Self {
        Self::from_bits(pin_reg >> 7)
    }

    /// Whether a transition from `old` to `new` raises the interrupt.
    pub fn fires(self, old: DigitalLevel, new: DigitalLevel) -> bool {
        match self {
            Self::Disabled => false,
            Self::Rising => old == DigitalLevel::Low && new == DigitalLevel::High,
            Self::Falling => old == DigitalLevel::High && new == DigitalLevel::Low,
            Self::AnyEdge => old != new,
            Self::LevelLow | Self::LevelHigh => self.condition_holds(new),
        }
    }

    /// For level types: whether `level` keeps the interrupt asserted.
    pub fn condition_holds(self, level: DigitalLevel) -> bool {
        match self {
            Self::LevelLow => level == DigitalLevel::Low,
            Self::LevelHigh => level == DigitalLevel::High,
            _ => false,
        }
    }
}
