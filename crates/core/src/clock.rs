// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Virtual time.
//!
//! Time is a monotonic count of guest nanoseconds. Peripherals never hold a
//! reference to the clock; they arm timers through a [`TimerToken`] naming the
//! device and the per-device timer index, and the bus routes the callback back
//! to that exact instance.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::DeviceId;

/// Handle identifying one timer channel of one peripheral instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken {
    pub device: DeviceId,
    pub timer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub deadline_ns: u64,
    pub token: TimerToken,
}

/// Scheduling seam between peripherals and whatever drives time forward.
///
/// A token has at most one outstanding deadline: scheduling it again replaces
/// the previous one.
pub trait VirtualClock {
    fn now(&self) -> u64;
    fn schedule_at(&mut self, deadline_ns: u64, token: TimerToken);
    /// Returns true if a pending callback was removed.
    fn cancel(&mut self, token: TimerToken) -> bool;
    fn deadline(&self, token: TimerToken) -> Option<u64>;
}

/// Deterministic event queue ordered by deadline, then by scheduling order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    now_ns: u64,
    next_seq: u64,
    heap: BinaryHeap<Reverse<(u64, u64, TimerToken)>>,
    armed: HashMap<TimerToken, (u64, u64)>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn next_deadline(&mut self) -> Option<u64> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Removes and returns the earliest callback due at or before `until_ns`,
    /// advancing the clock to its deadline.
    pub fn pop_due(&mut self, until_ns: u64) -> Option<TimerEvent> {
        self.discard_stale();
        let Reverse((deadline_ns, _, token)) = *self.heap.peek()?;
        if deadline_ns > until_ns {
            return None;
        }
        self.heap.pop();
        self.armed.remove(&token);
        self.now_ns = self.now_ns.max(deadline_ns);
        Some(TimerEvent { deadline_ns, token })
    }

    /// Moves time forward without firing anything. Time never goes backwards.
    pub fn advance_to(&mut self, t_ns: u64) {
        self.now_ns = self.now_ns.max(t_ns);
    }

    pub fn cancel_device(&mut self, device: DeviceId) {
        self.armed.retain(|token, _| token.device != device);
    }

    pub fn clear(&mut self) {
        self.armed.clear();
        self.heap.clear();
    }

    /// Heap size (live plus superseded entries).
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    /// Rebuilds the heap from the armed set, dropping superseded entries.
    fn compact(&mut self) {
        self.heap = self
            .armed
            .iter()
            .map(|(token, (deadline, seq))| Reverse((*deadline, *seq, *token)))
            .collect();
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse((deadline, seq, token))) = self.heap.peek() {
            if self.armed.get(token) == Some(&(*deadline, *seq)) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl VirtualClock for TimerQueue {
    fn now(&self) -> u64 {
        self.now_ns
    }

    fn schedule_at(&mut self, deadline_ns: u64, token: TimerToken) {
        let deadline_ns = deadline_ns.max(self.now_ns);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.armed.insert(token, (deadline_ns, seq));
        self.heap.push(Reverse((deadline_ns, seq, token)));
        if self.heap.len() > 2 * self.armed.len() {
            self.compact();
        }
    }

    fn cancel(&mut self, token: TimerToken) -> bool {
        self.armed.remove(&token).is_some()
    }

    fn deadline(&self, token: TimerToken) -> Option<u64> {
        self.armed.get(&token).map(|(deadline, _)| *deadline)
    }
}
