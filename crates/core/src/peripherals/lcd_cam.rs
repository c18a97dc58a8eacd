// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! ESP32-S3 LCD_CAM in i80 LCD mode, reduced to a word streamer: a command
//! word followed by the DMA payload is pushed into the attached sink.

use crate::interrupt::{InterruptLatch, LatchLayout};
use crate::regs::word_offset;
use crate::signals::{DigitalLevel, DmaSource, InterruptLine, TransferSink};
use crate::{DeviceContext, Peripheral, SimResult};

const LCD_CLOCK: u64 = 0x00;
const LCD_USER: u64 = 0x14;
const LCD_CMD_VAL: u64 = 0x28;

const LATCH: LatchLayout = LatchLayout {
    raw: 0x68,
    status: 0x6C,
    enable: 0x64,
    clear: 0x70,
};

pub const LCD_START: u32 = 1 << 27;
/// A command length field of all ones sends the command word only.
const CMD_ONLY: u32 = 0x3fff;
pub const LCD_TRANS_DONE: u32 = 1 << 1;

/// Transfers up to this many bytes complete within the start write.
const INSTANT_TRANSFER_BYTES: usize = 32;

const DONE_TIMER: usize = 0;

#[derive(Debug, serde::Serialize)]
pub struct LcdCam {
    clock: u32,
    user: u32,
    cmd_val: u32,
    latch: InterruptLatch,
    irq: InterruptLine,
    byte_time_ns: u64,
    /// Data/command select line, low while the command word is on the bus.
    cmd_pin: Option<u8>,
    transfers: u64,
    words_sent: u64,
    #[serde(skip)]
    sink: Option<Box<dyn TransferSink>>,
    #[serde(skip)]
    dma: Option<Box<dyn DmaSource>>,
}

impl Default for LcdCam {
    fn default() -> Self {
        Self::new(150)
    }
}

impl LcdCam {
    pub fn new(byte_time_ns: u64) -> Self {
        Self {
            clock: 0,
            user: 0,
            cmd_val: 0,
            latch: InterruptLatch::new(32),
            irq: InterruptLine::new(),
            byte_time_ns,
            cmd_pin: None,
            transfers: 0,
            words_sent: 0,
            sink: None,
            dma: None,
        }
    }

    pub fn with_cmd_pin(mut self, pin: u8) -> Self {
        self.cmd_pin = Some(pin);
        self
    }

    pub fn attach_sink(&mut self, sink: Box<dyn TransferSink>) {
        self.sink = Some(sink);
    }

    pub fn attach_dma(&mut self, dma: Box<dyn DmaSource>) {
        self.dma = Some(dma);
    }

    pub fn is_busy(&self) -> bool {
        self.user & LCD_START != 0
    }

    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    fn update_irq(&mut self) {
        let pending = self.latch.pending();
        if self.irq.set(pending) {
            tracing::debug!("LCD_CAM irq -> {}", pending);
        }
    }

    fn send(&mut self, word: u32) {
        self.words_sent += 1;
        match self.sink.as_mut() {
            Some(sink) => {
                sink.transfer(word);
            }
            None if self.words_sent == 1 => {
                tracing::warn!("LCD_CAM has no transfer sink attached; words dropped");
            }
            None => {}
        }
    }

    fn complete(&mut self) {
        self.user &= !LCD_START;
        self.latch.latch(LCD_TRANS_DONE);
        self.update_irq();
    }

    fn start(&mut self, value: u32, ctx: &mut DeviceContext<'_>) {
        let Some(dma) = self.dma.as_mut() else {
            tracing::warn!("LCD_CAM start requested but no DMA channel is attached");
            self.user = value & !LCD_START;
            return;
        };

        let wanted = if value & CMD_ONLY == CMD_ONLY {
            0
        } else {
            dma.pending_bytes()
        };
        let mut payload = vec![0u8; wanted.div_ceil(4) * 4];
        let len = dma.read(&mut payload[..wanted]);
        payload.truncate(len.div_ceil(4) * 4);

        tracing::debug!(
            "LCD_CAM transfer: cmd {:#x}, {} payload bytes",
            self.cmd_val,
            len
        );
        self.transfers += 1;
        if let Some(pin) = self.cmd_pin {
            ctx.emit_pin(pin, DigitalLevel::Low, 0);
        }
        self.send(self.cmd_val);
        if let Some(pin) = self.cmd_pin {
            ctx.emit_pin(pin, DigitalLevel::High, 0);
        }
        for chunk in payload.chunks_exact(4) {
            self.send(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        self.user = value;
        if len > INSTANT_TRANSFER_BYTES {
            ctx.schedule_in(DONE_TIMER, len as u64 * self.byte_time_ns);
        } else {
            self.complete();
        }
    }
}

impl Peripheral for LcdCam {
    fn read(&self, offset: u64) -> SimResult<u32> {
        let offset = word_offset(offset);
        if let Some(v) = self.latch.read_reg(&LATCH, offset) {
            return Ok(v);
        }
        Ok(match offset {
            LCD_CLOCK => self.clock,
            LCD_USER => self.user,
            LCD_CMD_VAL => self.cmd_val,
            _ => 0,
        })
    }

    fn write(&mut self, offset: u64, value: u32, ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        let offset = word_offset(offset);
        if self.latch.write_reg(&LATCH, offset, value) {
            self.update_irq();
            return Ok(());
        }
        match offset {
            LCD_CLOCK => self.clock = value,
            LCD_CMD_VAL => self.cmd_val = value,
            LCD_USER if value & LCD_START != 0 => self.start(value, ctx),
            LCD_USER => self.user = value,
            _ => {}
        }
        Ok(())
    }

    fn on_timer(&mut self, timer: usize, _ctx: &mut DeviceContext<'_>) {
        if timer == DONE_TIMER {
            self.complete();
        }
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel(DONE_TIMER);
        self.clock = 0;
        self.user = 0;
        self.cmd_val = 0;
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
