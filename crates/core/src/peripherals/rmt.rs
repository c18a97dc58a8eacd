// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! ESP32-S3 remote control transmitter.
//!
//! Each TX channel drains period pairs from the shared RAM in bursts of
//! `TX_LIM` words. A burst is held back while the channel's own TX_END or
//! TX_THR interrupt is pending and resumes as soon as firmware clears it.

use bitflags::bitflags;

use crate::interrupt::{InterruptLatch, LatchLayout};
use crate::regs::{field, word_offset, RegisterArray};
use crate::signals::{InterruptLine, TransferSink};
use crate::{DeviceContext, Peripheral, SimResult};

pub const TX_CHANNELS: usize = 4;
pub const RAM_WORDS: usize = 512;
pub const BLOCK_WORDS: usize = 48;

const CONF0_REGS: RegisterArray = RegisterArray::new(0x20, 4, TX_CHANNELS);
const RX_CONF_REGS: RegisterArray = RegisterArray::new(0x30, 4, 8);
const TX_LIM_REGS: RegisterArray = RegisterArray::new(0xA0, 4, TX_CHANNELS);
const RAM: RegisterArray = RegisterArray::new(0x800, 4, RAM_WORDS);
const SYS_CONF: u64 = 0xC0;

const LATCH: LatchLayout = LatchLayout {
    raw: 0x70,
    status: 0x74,
    enable: 0x78,
    clear: 0x7C,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxConf0: u32 {
        const TX_START = 1 << 0;
        const MEM_RD_RST = 1 << 1;
    }
}

fn tx_end_bit(ch: usize) -> u32 {
    1 << ch
}

fn tx_thr_bit(ch: usize) -> u32 {
    1 << (ch + 8)
}

/// One RAM word: two (duration, level) items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulsePair {
    pub duration0: u16,
    pub level0: bool,
    pub duration1: u16,
    pub level1: bool,
}

impl PulsePair {
    const DURATION_MASK: u32 = 0x7fff;

    pub fn from_word(word: u32) -> Self {
        Self {
            duration0: (word & Self::DURATION_MASK) as u16,
            level0: word & (1 << 15) != 0,
            duration1: ((word >> 16) & Self::DURATION_MASK) as u16,
            level1: word & (1 << 31) != 0,
        }
    }

    pub fn to_word(self) -> u32 {
        u32::from(self.duration0)
            | (u32::from(self.level0) << 15)
            | (u32::from(self.duration1) << 16)
            | (u32::from(self.level1) << 31)
    }

    /// Both durations zero terminates a transmission.
    pub fn is_end_marker(&self) -> bool {
        self.duration0 == 0 && self.duration1 == 0
    }

    /// Rescales durations by `div / 8`, saturating at the field width.
    pub fn scaled(self, div: u32) -> Self {
        let scale = |d: u16| ((u32::from(d) * div / 8).min(Self::DURATION_MASK)) as u16;
        Self {
            duration0: scale(self.duration0),
            duration1: scale(self.duration1),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
struct TxChannel {
    conf0: u32,
    tx_lim: u32,
    cursor: usize,
    pending: bool,
    words_sent: u64,
}

impl TxChannel {
    fn flags(&self) -> TxConf0 {
        TxConf0::from_bits_retain(self.conf0)
    }

    fn divider(&self) -> u32 {
        field(self.conf0, 8, 8)
    }

    fn mem_words(&self) -> usize {
        field(self.conf0, 16, 4) as usize * BLOCK_WORDS
    }

    fn limit(&self) -> u32 {
        field(self.tx_lim, 0, 9)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct Rmt {
    channels: [TxChannel; TX_CHANNELS],
    rx_conf: [u32; 8],
    #[serde(skip)]
    ram: Vec<u32>,
    sys_conf: u32,
    latch: InterruptLatch,
    irq: InterruptLine,
    word_time_ns: u64,
    #[serde(skip)]
    sinks: [Option<Box<dyn TransferSink>>; TX_CHANNELS],
}

impl Default for Rmt {
    fn default() -> Self {
        Self::new(1_250)
    }
}

impl Rmt {
    pub fn new(word_time_ns: u64) -> Self {
        Self {
            channels: [TxChannel::default(); TX_CHANNELS],
            rx_conf: [0; 8],
            ram: vec![0; RAM_WORDS],
            sys_conf: 0,
            latch: InterruptLatch::new(32),
            irq: InterruptLine::new(),
            word_time_ns,
            sinks: Default::default(),
        }
    }

    /// Connects the consumer of `channel`'s words (e.g. an LED strip model).
    pub fn attach_sink(&mut self, channel: usize, sink: Box<dyn TransferSink>) {
        if let Some(slot) = self.sinks.get_mut(channel) {
            *slot = Some(sink);
        }
    }

    pub fn is_pending(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(|c| c.pending)
    }

    pub fn cursor(&self, channel: usize) -> usize {
        self.channels.get(channel).map(|c| c.cursor).unwrap_or(0)
    }

    pub fn words_sent(&self, channel: usize) -> u64 {
        self.channels.get(channel).map(|c| c.words_sent).unwrap_or(0)
    }

    fn update_irq(&mut self) {
        let pending = self.latch.pending();
        if self.irq.set(pending) {
            tracing::debug!("RMT irq -> {}", pending);
        }
    }

    fn burst_delay(&self, ch: usize) -> u64 {
        u64::from(self.channels[ch].limit()) * self.word_time_ns
    }

    fn arm(&mut self, ch: usize, ctx: &mut DeviceContext<'_>) {
        let c = &self.channels[ch];
        if c.divider() == 0 || c.limit() == 0 || c.mem_words() == 0 {
            tracing::warn!(
                "RMT ch{} start ignored: div={} tx_lim={} mem_words={}",
                ch,
                c.divider(),
                c.limit(),
                c.mem_words()
            );
            ctx.cancel(ch);
            return;
        }
        ctx.schedule_in(ch, self.burst_delay(ch));
    }

    fn transfer(&mut self, ch: usize, word: u32) {
        self.channels[ch].words_sent += 1;
        match self.sinks[ch].as_mut() {
            Some(sink) => {
                sink.transfer(word);
            }
            None if self.channels[ch].words_sent == 1 => {
                tracing::warn!("RMT ch{} has no transfer sink attached; words dropped", ch);
            }
            None => {}
        }
    }

    fn send_burst(&mut self, ch: usize, ctx: &mut DeviceContext<'_>) {
        if self.latch.status() & (tx_end_bit(ch) | tx_thr_bit(ch)) != 0 {
            tracing::debug!("RMT ch{} burst deferred until interrupt clear", ch);
            self.channels[ch].pending = true;
            return;
        }
        self.channels[ch].pending = false;

        let c = self.channels[ch];
        let mem_words = c.mem_words();
        if mem_words == 0 || c.divider() == 0 || c.limit() == 0 {
            return;
        }
        for i in 0..c.limit() as usize {
            let idx = ((c.cursor + i) % mem_words + ch * BLOCK_WORDS) % RAM_WORDS;
            // A word whose periods scale to zero ends the transmission.
            let pair = PulsePair::from_word(self.ram[idx]).scaled(c.divider());
            if pair.is_end_marker() {
                self.finish(ch, ctx);
                return;
            }
            self.transfer(ch, pair.to_word());
        }
        self.channels[ch].cursor += c.limit() as usize;
        self.latch.latch(tx_thr_bit(ch));
        self.update_irq();
        ctx.schedule_in(ch, self.burst_delay(ch));
    }

    fn finish(&mut self, ch: usize, ctx: &mut DeviceContext<'_>) {
        tracing::debug!("RMT ch{} transmission end", ch);
        self.latch.latch(tx_end_bit(ch));
        self.latch.release(tx_thr_bit(ch));
        let c = &mut self.channels[ch];
        c.cursor = 0;
        c.pending = false;
        c.conf0 &= !TxConf0::TX_START.bits();
        ctx.cancel(ch);
        self.update_irq();
    }

    fn read_reg(&self, offset: u64) -> u32 {
        if let Some(v) = self.latch.read_reg(&LATCH, offset) {
            return v;
        }
        if offset == SYS_CONF {
            return self.sys_conf;
        }
        if let Some((ch, 0)) = CONF0_REGS.decode(offset) {
            return self.channels[ch].conf0;
        }
        if let Some((i, 0)) = RX_CONF_REGS.decode(offset) {
            return self.rx_conf[i];
        }
        if let Some((ch, 0)) = TX_LIM_REGS.decode(offset) {
            return self.channels[ch].tx_lim;
        }
        if let Some((i, 0)) = RAM.decode(offset) {
            return self.ram[i];
        }
        0
    }

    fn write_reg(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) {
        if offset == LATCH.clear {
            self.latch.clear(value);
            self.update_irq();
            for ch in 0..TX_CHANNELS {
                let c = &self.channels[ch];
                if c.pending && c.flags().contains(TxConf0::TX_START) {
                    self.send_burst(ch, ctx);
                }
            }
            return;
        }
        if self.latch.write_reg(&LATCH, offset, value) {
            self.update_irq();
            return;
        }
        if offset == SYS_CONF {
            self.sys_conf = value;
        } else if let Some((ch, 0)) = CONF0_REGS.decode(offset) {
            self.channels[ch].conf0 = value;
            let flags = TxConf0::from_bits_retain(value);
            if flags.contains(TxConf0::MEM_RD_RST) {
                self.channels[ch].cursor = 0;
            }
            if flags.contains(TxConf0::TX_START) {
                self.arm(ch, ctx);
            }
        } else if let Some((i, 0)) = RX_CONF_REGS.decode(offset) {
            self.rx_conf[i] = value;
        } else if let Some((ch, 0)) = TX_LIM_REGS.decode(offset) {
            self.channels[ch].tx_lim = value;
        } else if let Some((i, 0)) = RAM.decode(offset) {
            self.ram[i] = value;
        }
    }
}

impl Peripheral for Rmt {
    fn read(&self, offset: u64) -> SimResult<u32> {
        Ok(self.read_reg(word_offset(offset)))
    }

    fn write(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        self.write_reg(word_offset(offset), value, ctx);
        Ok(())
    }

    fn on_timer(&mut self, channel: usize, ctx: &mut DeviceContext<'_>) {
        let Some(c) = self.channels.get(channel) else {
            return;
        };
        if c.flags().contains(TxConf0::TX_START) {
            self.send_burst(channel, ctx);
        }
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        for ch in 0..TX_CHANNELS {
            ctx.cancel(ch);
        }
        self.channels = [TxChannel::default(); TX_CHANNELS];
        self.rx_conf = [0; 8];
        self.sys_conf = 0;
        self.latch.reset();
        self.irq.set(false);
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
