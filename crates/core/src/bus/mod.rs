// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use espsim_config::{parse_size, ChipDescriptor, PeripheralConfig};

use crate::clock::{TimerQueue, VirtualClock};
use crate::interrupt::InterruptController;
use crate::peripherals::gpio::{GpioMatrix, GpioVariant};
use crate::peripherals::lcd_cam::LcdCam;
use crate::peripherals::ledc::{Ledc, LedcVariant};
use crate::peripherals::mcpwm::{Mcpwm, DEFAULT_FUNC_SIG_START};
use crate::peripherals::rmt::Rmt;
use crate::signals::{DigitalLevel, DmaSource, PinEvent, PinObserver, SignalEvent, TransferSink};
use crate::{
    DeviceContext, DeviceId, EngineConfig, Peripheral, SimResult, SimulationError,
};

const DEFAULT_WINDOW: u64 = 0x1000;

#[derive(Debug)]
pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub irq: Option<u32>,
    pub dev: Box<dyn Peripheral>,
}

impl PeripheralEntry {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }
}

/// Memory-mapped peripherals sharing one virtual clock.
///
/// Peripheral outputs announced as logical signals are fanned out to pins by
/// the first GPIO matrix on the bus; every resulting pin event is handed to
/// the attached observers.
#[derive(Debug)]
pub struct SystemBus {
    pub peripherals: Vec<PeripheralEntry>,
    clock: TimerQueue,
    config: EngineConfig,
    observers: Vec<Arc<dyn PinObserver>>,
    interrupt_controller: Option<Arc<dyn InterruptController>>,
    irq_levels: Vec<bool>,
    matrix: Option<usize>,
    events_fired: u64,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBus {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            peripherals: Vec::new(),
            clock: TimerQueue::new(),
            config,
            observers: Vec::new(),
            interrupt_controller: None,
            irq_levels: Vec::new(),
            matrix: None,
            events_fired: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn from_config(chip: &ChipDescriptor, config: EngineConfig) -> anyhow::Result<Self> {
        let mut bus = Self::with_config(config);

        for p_cfg in &chip.peripherals {
            let dev: Box<dyn Peripheral> = match p_cfg.r#type.as_str() {
                "gpio" => Box::new(GpioMatrix::new_with_variant(variant_option(
                    p_cfg,
                    GpioVariant::Esp32,
                )?)),
                "ledc" => Box::new(Ledc::new_with_variant(variant_option(
                    p_cfg,
                    LedcVariant::Esp32,
                )?)),
                "mcpwm" => {
                    let start = match p_cfg.config.get("func_sig_start") {
                        Some(v) => v
                            .as_u64()
                            .and_then(|n| u16::try_from(n).ok())
                            .ok_or_else(|| {
                                anyhow::anyhow!(
                                    "Field 'func_sig_start' of '{}' must be a signal number",
                                    p_cfg.id
                                )
                            })?,
                        None => DEFAULT_FUNC_SIG_START,
                    };
                    Box::new(Mcpwm::new(start))
                }
                "rmt" => Box::new(Rmt::new(bus.config.rmt_word_time_ns)),
                "lcd_cam" => {
                    let mut lcd = LcdCam::new(bus.config.lcd_byte_time_ns);
                    if let Some(v) = p_cfg.config.get("cmd_pin") {
                        let pin = v.as_u64().and_then(|n| u8::try_from(n).ok()).ok_or_else(|| {
                            anyhow::anyhow!("Field 'cmd_pin' of '{}' must be a pin number", p_cfg.id)
                        })?;
                        lcd = lcd.with_cmd_pin(pin);
                    }
                    Box::new(lcd)
                }
                other => {
                    tracing::warn!(
                        "Unsupported peripheral type '{}' for id '{}'; skipping",
                        other,
                        p_cfg.id
                    );
                    continue;
                }
            };

            let size = match &p_cfg.size {
                Some(size) => parse_size(size)
                    .with_context(|| format!("Invalid size for peripheral '{}'", p_cfg.id))?,
                None => DEFAULT_WINDOW,
            };

            tracing::info!(
                "Mapped {} ({}) at {:#x}..{:#x}",
                p_cfg.id,
                p_cfg.r#type,
                p_cfg.base_address,
                p_cfg.base_address + size
            );
            bus.add_peripheral(&p_cfg.id, p_cfg.base_address, size, p_cfg.irq, dev);
        }

        Ok(bus)
    }

    pub fn add_peripheral(
        &mut self,
        name: &str,
        base: u64,
        size: u64,
        irq: Option<u32>,
        dev: Box<dyn Peripheral>,
    ) -> DeviceId {
        let index = self.peripherals.len();
        let is_matrix = dev
            .as_any()
            .is_some_and(|any| any.downcast_ref::<GpioMatrix>().is_some());
        if is_matrix && self.matrix.is_none() {
            self.matrix = Some(index);
        }
        self.peripherals.push(PeripheralEntry {
            name: name.to_string(),
            base,
            size,
            irq,
            dev,
        });
        self.irq_levels.push(false);
        DeviceId(index)
    }

    pub fn attach_observer(&mut self, observer: Arc<dyn PinObserver>) {
        self.observers.push(observer);
    }

    pub fn attach_interrupt_controller(&mut self, controller: Arc<dyn InterruptController>) {
        self.interrupt_controller = Some(controller);
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now()
    }

    /// Timer callbacks fired since the bus was created.
    pub fn events_fired(&self) -> u64 {
        self.events_fired
    }

    fn find(&self, addr: u64) -> Option<usize> {
        self.peripherals.iter().position(|p| p.contains(addr))
    }

    pub fn read_u32(&self, addr: u64) -> SimResult<u32> {
        let index = self.find(addr).ok_or(SimulationError::MemoryViolation(addr))?;
        let p = &self.peripherals[index];
        p.dev.read(addr - p.base)
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        let index = self.find(addr).ok_or(SimulationError::MemoryViolation(addr))?;
        let offset = addr - self.peripherals[index].base;
        tracing::debug!(
            "{} <- {:#010x} @ {:#x}",
            self.peripherals[index].name,
            value,
            offset
        );
        self.with_device(index, |dev, ctx| dev.write(offset, value, ctx))
    }

    /// Drives an external level onto a GPIO pad. Returns true if the change
    /// fired a GPIO interrupt.
    pub fn set_pin_level(&mut self, pin: u8, level: DigitalLevel) -> bool {
        let Some(index) = self.matrix else {
            tracing::warn!("set_pin_level({}) ignored: no GPIO matrix on the bus", pin);
            return false;
        };
        let event = PinEvent {
            pin,
            level,
            hold_us: 0,
            time_ns: self.clock.now(),
        };
        self.notify(&event);
        self.with_device(index, |dev, _ctx| {
            dev.as_any_mut()
                .and_then(|any| any.downcast_mut::<GpioMatrix>())
                .is_some_and(|gpio| gpio.set_input(usize::from(pin), level))
        })
    }

    /// Fires every timer callback due at or before `t_ns`, in deadline order,
    /// then parks the clock at `t_ns`. Returns the number of callbacks fired.
    pub fn run_until(&mut self, t_ns: u64) -> SimResult<u64> {
        let budget = self.config.max_events_per_run;
        let mut fired = 0u64;
        while self.clock.next_deadline().is_some_and(|d| d <= t_ns) {
            if fired >= budget {
                self.events_fired += fired;
                return Err(SimulationError::EventBudgetExhausted {
                    budget,
                    until_ns: t_ns,
                });
            }
            let Some(event) = self.clock.pop_due(t_ns) else {
                break;
            };
            fired += 1;
            let index = event.token.device.0;
            if index >= self.peripherals.len() {
                continue;
            }
            self.with_device(index, |dev, ctx| dev.on_timer(event.token.timer, ctx));
        }
        self.clock.advance_to(t_ns);
        self.events_fired += fired;
        Ok(fired)
    }

    pub fn run_for(&mut self, dt_ns: u64) -> SimResult<u64> {
        self.run_until(self.clock.now().saturating_add(dt_ns))
    }

    /// Returns every peripheral to its reset state. Virtual time keeps running.
    pub fn reset(&mut self) {
        for index in 0..self.peripherals.len() {
            self.clock.cancel_device(DeviceId(index));
            self.with_device(index, |dev, ctx| dev.reset(ctx));
        }
    }

    /// The GPIO matrix routing peripheral outputs, if the bus has one.
    pub fn gpio_matrix(&self) -> Option<&GpioMatrix> {
        self.matrix
            .and_then(|i| self.peripherals[i].dev.as_any())
            .and_then(|any| any.downcast_ref::<GpioMatrix>())
    }

    pub fn peek_peripheral(&self, name: &str) -> Option<&dyn Peripheral> {
        self.peripherals
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.dev.as_ref())
    }

    pub fn device<T: 'static>(&self, name: &str) -> Option<&T> {
        self.peek_peripheral(name)?.as_any()?.downcast_ref::<T>()
    }

    pub fn device_mut<T: 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.peripherals
            .iter_mut()
            .find(|p| p.name == name)?
            .dev
            .as_any_mut()?
            .downcast_mut::<T>()
    }

    /// Connects the word consumer of an RMT channel or of the LCD controller.
    /// `channel` is ignored for the LCD controller.
    pub fn attach_transfer_sink(
        &mut self,
        name: &str,
        channel: usize,
        sink: Box<dyn TransferSink>,
    ) -> anyhow::Result<()> {
        if let Some(rmt) = self.device_mut::<Rmt>(name) {
            rmt.attach_sink(channel, sink);
            return Ok(());
        }
        if let Some(lcd) = self.device_mut::<LcdCam>(name) {
            lcd.attach_sink(sink);
            return Ok(());
        }
        anyhow::bail!("Peripheral '{}' does not stream words", name)
    }

    pub fn attach_dma_source(&mut self, name: &str, source: Box<dyn DmaSource>) -> anyhow::Result<()> {
        let lcd = self
            .device_mut::<LcdCam>(name)
            .with_context(|| format!("Peripheral '{}' is not an LCD controller", name))?;
        lcd.attach_dma(source);
        Ok(())
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let peripherals: serde_json::Map<String, serde_json::Value> = self
            .peripherals
            .iter()
            .map(|p| (p.name.clone(), p.dev.snapshot()))
            .collect();
        serde_json::json!({
            "time_ns": self.clock.now(),
            "events_fired": self.events_fired,
            "peripherals": peripherals,
        })
    }

    fn with_device<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut dyn Peripheral, &mut DeviceContext<'_>) -> R,
    ) -> R {
        let mut signals = Vec::new();
        let mut pins = Vec::new();
        let result = {
            let entry = &mut self.peripherals[index];
            let mut ctx = DeviceContext::new(
                DeviceId(index),
                &mut self.clock,
                &mut signals,
                &mut pins,
            );
            f(entry.dev.as_mut(), &mut ctx)
        };
        self.dispatch(&signals, pins);
        self.sync_irqs();
        result
    }

    fn dispatch(&self, signals: &[SignalEvent], mut pins: Vec<PinEvent>) {
        if !signals.is_empty() {
            let now = self.clock.now();
            match self.gpio_matrix() {
                Some(gpio) => {
                    for ev in signals {
                        pins.extend(gpio.route_signal(ev, now));
                    }
                }
                None => tracing::debug!(
                    "{} signal events dropped: no GPIO matrix on the bus",
                    signals.len()
                ),
            }
        }
        for ev in &pins {
            self.notify(ev);
        }
    }

    fn notify(&self, event: &PinEvent) {
        for observer in &self.observers {
            observer.on_pin_event(event);
        }
    }

    fn sync_irqs(&mut self) {
        for (index, p) in self.peripherals.iter().enumerate() {
            let level = p.dev.irq_level();
            if level == self.irq_levels[index] {
                continue;
            }
            self.irq_levels[index] = level;
            let Some(irq) = p.irq else {
                continue;
            };
            tracing::debug!("{} irq {} -> {}", p.name, irq, level);
            if let Some(controller) = &self.interrupt_controller {
                controller.set_interrupt_level(irq, level);
            }
        }
    }
}

fn variant_option<V>(cfg: &PeripheralConfig, default: V) -> anyhow::Result<V>
where
    V: FromStr<Err = String>,
{
    match cfg.config.get("variant") {
        None => Ok(default),
        Some(value) => {
            let name = value.as_str().ok_or_else(|| {
                anyhow::anyhow!("Field 'variant' of '{}' must be a string", cfg.id)
            })?;
            name.parse::<V>()
                .map_err(|e| anyhow::anyhow!("Peripheral '{}': {}", cfg.id, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::IrqRecorder;
    use crate::metrics::PinTrace;

    const GPIO_BASE: u64 = 0x3FF4_4000;
    const LEDC_BASE: u64 = 0x3FF5_9000;

    fn bus_with_gpio_and_ledc() -> SystemBus {
        let mut bus = SystemBus::new();
        bus.add_peripheral("gpio", GPIO_BASE, 0x1000, Some(22), Box::new(GpioMatrix::new()));
        bus.add_peripheral("ledc", LEDC_BASE, 0x1000, Some(45), Box::new(Ledc::new()));
        bus
    }

    #[test]
    fn test_unmapped_access_is_a_violation() {
        let mut bus = bus_with_gpio_and_ledc();
        assert!(matches!(
            bus.read_u32(0x1000),
            Err(SimulationError::MemoryViolation(0x1000))
        ));
        assert!(bus.write_u32(LEDC_BASE + 0x1000, 1).is_err());
    }

    #[test]
    fn test_ledc_output_reaches_routed_pin() {
        let mut bus = bus_with_gpio_and_ledc();
        let trace = Arc::new(PinTrace::new());
        bus.attach_observer(trace.clone());

        // LEDC HS channel 0 (signal 71) on pin 18.
        bus.write_u32(GPIO_BASE + 0x530 + 18 * 4, 71).unwrap();
        bus.write_u32(LEDC_BASE + 0x140, 10 | (256 << 5)).unwrap();
        bus.write_u32(LEDC_BASE + 0x08, 512 << 4).unwrap();
        bus.run_until(1_024_000).unwrap();

        let edges: Vec<_> = trace
            .for_pin(18)
            .iter()
            .map(|e| (e.time_ns, e.level))
            .collect();
        assert_eq!(
            edges,
            vec![
                (0, DigitalLevel::High),
                (512_000, DigitalLevel::Low),
                (1_024_000, DigitalLevel::High),
            ]
        );
        assert_eq!(bus.now_ns(), 1_024_000);
    }

    #[test]
    fn test_gpio_interrupt_forwarded_to_controller() {
        let mut bus = bus_with_gpio_and_ledc();
        let recorder = Arc::new(IrqRecorder::new());
        bus.attach_interrupt_controller(recorder.clone());

        // Rising edge on pin 4, APP context.
        bus.write_u32(GPIO_BASE + 0x88 + 4 * 4, (1 << 7) | (1 << 13)).unwrap();
        assert!(bus.set_pin_level(4, DigitalLevel::High));
        assert!(recorder.is_interrupt_active(22));

        bus.write_u32(GPIO_BASE + 0x4C, 1 << 4).unwrap();
        assert!(!recorder.is_interrupt_active(22));
        assert_eq!(recorder.assertions(22), 1);
    }

    #[test]
    fn test_event_budget_is_enforced() {
        let mut bus = SystemBus::with_config(EngineConfig {
            max_events_per_run: 3,
            ..EngineConfig::default()
        });
        bus.add_peripheral("ledc", LEDC_BASE, 0x1000, None, Box::new(Ledc::new()));
        bus.write_u32(LEDC_BASE + 0x140, 10 | (256 << 5)).unwrap();
        bus.write_u32(LEDC_BASE + 0x08, 512 << 4).unwrap();
        assert!(matches!(
            bus.run_until(10_000_000),
            Err(SimulationError::EventBudgetExhausted { budget: 3, .. })
        ));
        assert_eq!(bus.events_fired(), 3);
    }

    #[test]
    fn test_reset_cancels_pending_timers() {
        let mut bus = bus_with_gpio_and_ledc();
        bus.write_u32(LEDC_BASE + 0x140, 10 | (256 << 5)).unwrap();
        bus.write_u32(LEDC_BASE + 0x08, 512 << 4).unwrap();
        bus.reset();
        assert_eq!(bus.run_for(5_000_000).unwrap(), 0);
        assert_eq!(bus.read_u32(LEDC_BASE + 0x140).unwrap(), 0);
    }

    #[test]
    fn test_snapshot_lists_peripherals() {
        let bus = bus_with_gpio_and_ledc();
        let snap = bus.snapshot();
        assert_eq!(snap["time_ns"], 0);
        assert!(snap["peripherals"]["gpio"].is_object());
        assert!(snap["peripherals"]["ledc"].is_object());
        assert!(bus.device::<Ledc>("ledc").is_some());
        assert!(bus.device::<Rmt>("ledc").is_none());
    }
}
