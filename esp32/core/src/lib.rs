//! Pure-Rust core for the toy ESP32 microcontroller.
//!
//! The crate owns the instruction encoding, the machine state (flash, RAM,
//! registers, GPIO, peripheral buffers) and the fetch/decode/execute loop.
//! Side effects that a host needs to render are reported through a
//! [`PeripheralSink`]; nothing here draws or prints on its own.

use thiserror::Error;

pub mod config;
pub mod exec;
pub mod isa;
pub mod memory;
pub mod peripherals;
pub mod screen;
pub mod state;

pub use config::{MachineConfig, ScreenGeometry, STEPS_PER_TICK_ENV};
pub use exec::{Machine, MachineView, StepOutcome, TickReport};
pub use isa::{disassemble, Instruction, Listing, Opcode};
pub use memory::{MemoryImage, FLASH_SIZE, ORIGIN, RAM_SIZE};
pub use peripherals::{Forward, NullSink, PeripheralEvent, PeripheralSink};
pub use screen::Screen;
pub use state::{GpioBank, GpioPin, PinMode, Registers, GPIO_PINS, REGISTER_COUNT};

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("firmware of {len} bytes exceeds flash capacity of {capacity} bytes")]
    CapacityExceeded { len: usize, capacity: usize },
    #[error("unknown opcode 0x{opcode:02X} at pc 0x{pc:08X}")]
    UnknownOpcode { opcode: u8, pc: u32 },
    #[error("opcode 0x{opcode:02X} at pc 0x{pc:08X} needs {needed} operand bytes, found {available}")]
    TruncatedInstruction {
        opcode: u8,
        pc: u32,
        needed: usize,
        available: usize,
    },
    #[error("opcode 0x{opcode:02X} at pc 0x{pc:08X} names register R{reg}")]
    InvalidRegister { opcode: u8, pc: u32, reg: u8 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// Opcode/address pair for execution faults; `None` for load or config errors.
    pub fn fault_site(&self) -> Option<(u8, u32)> {
        match self {
            CoreError::UnknownOpcode { opcode, pc }
            | CoreError::TruncatedInstruction { opcode, pc, .. }
            | CoreError::InvalidRegister { opcode, pc, .. } => Some((*opcode, *pc)),
            _ => None,
        }
    }
}
