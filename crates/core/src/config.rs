// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Virtual time the RMT needs to shift out one RAM word.
    pub rmt_word_time_ns: u64,
    /// Virtual time the LCD controller needs per streamed byte.
    pub lcd_byte_time_ns: u64,
    /// Upper bound on timer callbacks fired by a single `run_until`.
    pub max_events_per_run: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rmt_word_time_ns: 1_250,
            lcd_byte_time_ns: 150,
            max_events_per_run: 1_000_000,
        }
    }
}
