// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Represents a digital signal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum DigitalLevel {
    #[default]
    Low,
    High,
}

impl DigitalLevel {
    pub fn from_bit(bit: u32) -> Self {
        Self::from(bit & 1 != 0)
    }

    pub fn bit(self) -> u32 {
        u32::from(bool::from(self))
    }

    pub fn inverted(self) -> Self {
        match self {
            DigitalLevel::Low => DigitalLevel::High,
            DigitalLevel::High => DigitalLevel::Low,
        }
    }

    pub fn invert_if(self, invert: bool) -> Self {
        if invert {
            self.inverted()
        } else {
            self
        }
    }
}

impl From<bool> for DigitalLevel {
    fn from(b: bool) -> Self {
        if b {
            DigitalLevel::High
        } else {
            DigitalLevel::Low
        }
    }
}

impl From<DigitalLevel> for bool {
    fn from(level: DigitalLevel) -> Self {
        match level {
            DigitalLevel::High => true,
            DigitalLevel::Low => false,
        }
    }
}

/// The single interrupt output of a peripheral instance.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct InterruptLine {
    raised: bool,
    assertions: u64,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drives the line; returns true when the level changed.
    pub fn set(&mut self, raised: bool) -> bool {
        let changed = self.raised != raised;
        if changed && raised {
            self.assertions += 1;
        }
        self.raised = raised;
        changed
    }

    pub fn is_raised(&self) -> bool {
        self.raised
    }

    /// Count of low-to-high transitions since creation.
    pub fn assertions(&self) -> u64 {
        self.assertions
    }
}

const SIGNAL_MASK: u32 = 0x1ff;
const HOLD_US_MASK: u32 = 0x3f_ffff;

/// A logical peripheral output changing level.
///
/// `hold_us` is how long the level is expected to stay before the next edge,
/// letting downstream consumers (servo or LED models) decode the waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SignalEvent {
    pub signal: u16,
    pub level: DigitalLevel,
    pub hold_us: u32,
}

impl SignalEvent {
    /// Packs the event as `signal * 2 + level + (hold_us << 10)`.
    pub fn pack(&self) -> u32 {
        ((u32::from(self.signal) & SIGNAL_MASK) << 1)
            | self.level.bit()
            | ((self.hold_us & HOLD_US_MASK) << 10)
    }

    pub fn unpack(raw: u32) -> Self {
        Self {
            signal: ((raw >> 1) & SIGNAL_MASK) as u16,
            level: DigitalLevel::from_bit(raw),
            hold_us: raw >> 10,
        }
    }
}

/// A physical pin changing level at a point in virtual time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PinEvent {
    pub pin: u8,
    pub level: DigitalLevel,
    pub hold_us: u32,
    pub time_ns: u64,
}

/// Receives every pin level change produced on the bus.
pub trait PinObserver: std::fmt::Debug + Send + Sync {
    fn on_pin_event(&self, event: &PinEvent);
}

/// Far side of a serial or streaming transfer (LED strip, display, ...).
pub trait TransferSink: std::fmt::Debug + Send {
    /// Consumes one word and returns the word clocked back in.
    fn transfer(&mut self, word: u32) -> u32;
}

/// A sink that records every word it receives. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct WordCapture {
    words: Arc<Mutex<Vec<u32>>>,
}

impl WordCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn words(&self) -> Vec<u32> {
        self.words.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl TransferSink for WordCapture {
    fn transfer(&mut self, word: u32) -> u32 {
        if let Ok(mut words) = self.words.lock() {
            words.push(word);
        }
        0
    }
}

/// Memory-to-peripheral DMA channel feeding a streaming peripheral.
pub trait DmaSource: std::fmt::Debug + Send {
    /// Bytes the current descriptor chain still holds.
    fn pending_bytes(&self) -> usize;
    /// Copies up to `buf.len()` bytes out; returns how many were copied.
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// A byte queue standing in for a configured DMA channel. Clones share the queue.
#[derive(Debug, Clone, Default)]
pub struct DmaBuffer {
    bytes: Arc<Mutex<VecDeque<u8>>>,
}

impl DmaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, data: &[u8]) {
        if let Ok(mut bytes) = self.bytes.lock() {
            bytes.extend(data.iter().copied());
        }
    }
}

impl DmaSource for DmaBuffer {
    fn pending_bytes(&self) -> usize {
        self.bytes.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let Ok(mut bytes) = self.bytes.lock() else {
            return 0;
        };
        let n = buf.len().min(bytes.len());
        for (dst, src) in buf.iter_mut().zip(bytes.drain(..n)) {
            *dst = src;
        }
        n
    }
}
