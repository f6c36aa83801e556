use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

/// Overrides [`MachineConfig::steps_per_tick`] when set to a positive integer.
pub const STEPS_PER_TICK_ENV: &str = "ESP32EMU_STEPS_PER_TICK";

pub const DEFAULT_STEPS_PER_TICK: u32 = 280;
pub const DEFAULT_ADC_VALUE: i64 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenGeometry {
    pub width: u16,
    pub height: u16,
    pub line_height: u16,
    pub glyph_advance: u16,
    /// Baseline the cursor returns to after a clear.
    pub top_line: u16,
}

impl Default for ScreenGeometry {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            line_height: 20,
            glyph_advance: 10,
            top_line: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Steps executed per host tick (one animation frame in a browser host).
    pub steps_per_tick: u32,
    /// Value returned by the ADC until the host installs its own source.
    pub adc_default: i64,
    pub screen: ScreenGeometry,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            steps_per_tick: DEFAULT_STEPS_PER_TICK,
            adc_default: DEFAULT_ADC_VALUE,
            screen: ScreenGeometry::default(),
        }
    }
}

impl MachineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Apply environment overrides on top of the current values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = env::var(STEPS_PER_TICK_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(steps) if steps > 0 => self.steps_per_tick = steps,
                _ => warn!(value = %raw, "ignoring invalid {STEPS_PER_TICK_ENV}"),
            }
        }
        self
    }
}
