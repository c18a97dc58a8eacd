// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::signals::{DigitalLevel, PinEvent, PinObserver};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PinStats {
    pub rising: u64,
    pub falling: u64,
    pub level: DigitalLevel,
    pub last_change_ns: u64,
}

/// Counts edges per pin.
#[derive(Debug, Default)]
pub struct PinActivity {
    event_count: AtomicU64,
    pins: Mutex<BTreeMap<u8, PinStats>>,
}

impl PinActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.event_count.store(0, Ordering::SeqCst);
        if let Ok(mut m) = self.pins.lock() {
            m.clear();
        }
    }

    pub fn get_events(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    pub fn get_pin(&self, pin: u8) -> Option<PinStats> {
        self.pins.lock().ok().and_then(|m| m.get(&pin).copied())
    }

    pub fn summary(&self) -> BTreeMap<u8, PinStats> {
        self.pins.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl PinObserver for PinActivity {
    fn on_pin_event(&self, event: &PinEvent) {
        self.event_count.fetch_add(1, Ordering::SeqCst);
        let Ok(mut pins) = self.pins.lock() else {
            return;
        };
        let stats = pins.entry(event.pin).or_default();
        if stats.level != event.level {
            match event.level {
                DigitalLevel::High => stats.rising += 1,
                DigitalLevel::Low => stats.falling += 1,
            }
            stats.last_change_ns = event.time_ns;
        }
        stats.level = event.level;
    }
}

/// Keeps every pin event in arrival order.
#[derive(Debug, Default)]
pub struct PinTrace {
    events: Mutex<Vec<PinEvent>>,
}

impl PinTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PinEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn for_pin(&self, pin: u8) -> Vec<PinEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.pin == pin)
            .collect()
    }
}

impl PinObserver for PinTrace {
    fn on_pin_event(&self, event: &PinEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(*event);
        }
    }
}
