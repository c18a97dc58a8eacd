// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: String, // "gpio", "ledc", "mcpwm", "rmt", "lcd_cam"
    pub base_address: u64,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub irq: Option<u32>,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChipDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub peripherals: Vec<PeripheralConfig>,
}

impl ChipDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chip descriptor at {:?}", path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let chip: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Chip Descriptor YAML")?;
        chip.validate()?;
        Ok(chip)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for p in &self.peripherals {
            if !seen.insert(p.id.as_str()) {
                anyhow::bail!("Duplicate peripheral id '{}' in chip '{}'", p.id, self.name);
            }
        }
        Ok(())
    }

    pub fn peripheral(&self, id: &str) -> Option<&PeripheralConfig> {
        self.peripherals.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ScenarioLimits {
    /// Overrides the engine's timer callback budget per run step.
    #[serde(default)]
    pub max_events: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WriteDetails {
    pub address: u64,
    pub value: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WriteStep {
    pub write: WriteDetails,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PinDetails {
    pub pin: u8,
    pub level: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SetPinStep {
    pub set_pin: PinDetails,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunForStep {
    pub run_for_ns: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunUntilStep {
    pub run_until_ns: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReadDetails {
    pub address: u64,
    pub value: u32,
    #[serde(default)]
    pub mask: Option<u32>,
}

impl ReadDetails {
    pub fn matches(&self, actual: u32) -> bool {
        let mask = self.mask.unwrap_or(u32::MAX);
        actual & mask == self.value & mask
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExpectReadStep {
    pub expect_read: ReadDetails,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ScenarioStep {
    Write(WriteStep),
    SetPin(SetPinStep),
    RunFor(RunForStep),
    RunUntil(RunUntilStep),
    ExpectRead(ExpectReadStep),
}

/// Register-level stimulus script replayed against a chip descriptor.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub schema_version: String,
    #[serde(default)]
    pub limits: ScenarioLimits,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open scenario at {:?}", path.as_ref()))?;
        let scenario: Self = serde_yaml::from_reader(f).context("Failed to parse Scenario YAML")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.steps.is_empty() {
            anyhow::bail!("Scenario must contain at least one step");
        }

        if self.limits.max_events == Some(0) {
            anyhow::bail!("Limit 'max_events' must be greater than zero");
        }

        for (i, step) in self.steps.iter().enumerate() {
            if let ScenarioStep::SetPin(s) = step {
                if s.set_pin.level > 1 {
                    anyhow::bail!("Step {}: pin level must be 0 or 1", i);
                }
            }
        }

        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
