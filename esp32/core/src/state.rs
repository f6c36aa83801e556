use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const REGISTER_COUNT: usize = 16;
pub const GPIO_PINS: usize = 40;

/// Sixteen independent 8-bit registers. Arithmetic wraps modulo 256.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Registers([u8; REGISTER_COUNT]);

impl Registers {
    /// Callers pass indices that already went through decode validation.
    pub fn get(&self, reg: u8) -> u8 {
        self.0[reg as usize]
    }

    pub fn set(&mut self, reg: u8, value: u8) {
        self.0[reg as usize] = value;
    }

    pub fn add(&mut self, dst: u8, src: u8) {
        let value = self.get(dst).wrapping_add(self.get(src));
        self.set(dst, value);
    }

    pub fn sub(&mut self, dst: u8, src: u8) {
        let value = self.get(dst).wrapping_sub(self.get(src));
        self.set(dst, value);
    }

    pub fn compare(&self, lhs: u8, rhs: u8) -> Ordering {
        self.get(lhs).cmp(&self.get(rhs))
    }

    pub fn clear(&mut self) {
        self.0 = [0; REGISTER_COUNT];
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Render the compare flag as the -1/0/+1 value the ISA documents.
pub fn flag_value(flag: Ordering) -> i8 {
    match flag {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinMode {
    #[default]
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GpioPin {
    pub level: u8,
    pub mode: PinMode,
}

/// Forty single-bit pins. Out-of-range indices are ignored rather than
/// faulting, matching how firmware for the board has always behaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioBank {
    pins: [GpioPin; GPIO_PINS],
}

impl Default for GpioBank {
    fn default() -> Self {
        Self {
            pins: [GpioPin::default(); GPIO_PINS],
        }
    }
}

impl GpioBank {
    pub fn level(&self, pin: u8) -> Option<u8> {
        self.pins.get(pin as usize).map(|p| p.level)
    }

    /// Latch bit 0 of `value`. Returns false when the pin does not exist.
    pub fn write(&mut self, pin: u8, value: u8) -> bool {
        match self.pins.get_mut(pin as usize) {
            Some(p) => {
                p.level = value & 1;
                true
            }
            None => false,
        }
    }

    pub fn set_mode(&mut self, pin: u8, mode: PinMode) -> bool {
        match self.pins.get_mut(pin as usize) {
            Some(p) => {
                p.mode = mode;
                true
            }
            None => false,
        }
    }

    pub fn pins(&self) -> &[GpioPin] {
        &self.pins
    }
}

impl fmt::Display for GpioBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, pin) in self.pins.iter().enumerate() {
            writeln!(f, "GPIO{index}: {}", pin.level)?;
        }
        Ok(())
    }
}
