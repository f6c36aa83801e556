//! Instruction encoding for the toy ESP32 core.
//!
//! Every record is `[opcode][length][operand; length]`. The length byte is
//! authoritative for advancing the program counter; decoders only require
//! that it covers the operands an opcode consumes and ignore any surplus.

use std::fmt;

use serde::Serialize;

use crate::state::REGISTER_COUNT;
use crate::CoreError;

/// Bytes taken by the opcode and length fields.
pub const HEADER_LEN: usize = 2;

/// Closed set of opcodes understood by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Opcode {
    LoadImm = 0x01,
    StoreGpio = 0x02,
    LoadGpio = 0x03,
    Jump = 0x04,
    SerialWrite = 0x05,
    Add = 0x11,
    Sub = 0x12,
    Compare = 0x13,
    JumpEq = 0x14,
    JumpNeq = 0x15,
    Delay = 0x16,
    ReadAdc = 0x17,
    SpiWrite = 0x18,
    ScreenPrint = 0x19,
    ScreenClear = 0x1A,
    DrawPixel = 0x1B,
    MoveX = 0x1C,
    MoveY = 0x1D,
    JumpGt = 0x1E,
    JumpLt = 0x1F,
}

impl Opcode {
    pub const ALL: [Opcode; 20] = [
        Opcode::LoadImm,
        Opcode::StoreGpio,
        Opcode::LoadGpio,
        Opcode::Jump,
        Opcode::SerialWrite,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Compare,
        Opcode::JumpEq,
        Opcode::JumpNeq,
        Opcode::Delay,
        Opcode::ReadAdc,
        Opcode::SpiWrite,
        Opcode::ScreenPrint,
        Opcode::ScreenClear,
        Opcode::DrawPixel,
        Opcode::MoveX,
        Opcode::MoveY,
        Opcode::JumpGt,
        Opcode::JumpLt,
    ];

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::LoadImm => "LDI",
            Opcode::StoreGpio => "STG",
            Opcode::LoadGpio => "LDG",
            Opcode::Jump => "JMP",
            Opcode::SerialWrite => "SER",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Compare => "CMP",
            Opcode::JumpEq => "JEQ",
            Opcode::JumpNeq => "JNE",
            Opcode::Delay => "DLY",
            Opcode::ReadAdc => "ADC",
            Opcode::SpiWrite => "SPI",
            Opcode::ScreenPrint => "SCR",
            Opcode::ScreenClear => "CLS",
            Opcode::DrawPixel => "PIX",
            Opcode::MoveX => "MOVX",
            Opcode::MoveY => "MOVY",
            Opcode::JumpGt => "JG",
            Opcode::JumpLt => "JL",
        }
    }

    /// Operand bytes consumed by the opcode (the canonical `length` field).
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::ScreenClear => 0,
            Opcode::Jump
            | Opcode::SerialWrite
            | Opcode::JumpEq
            | Opcode::JumpNeq
            | Opcode::ReadAdc
            | Opcode::SpiWrite
            | Opcode::ScreenPrint
            | Opcode::MoveX
            | Opcode::MoveY
            | Opcode::JumpGt
            | Opcode::JumpLt => 1,
            Opcode::LoadImm
            | Opcode::StoreGpio
            | Opcode::LoadGpio
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Compare
            | Opcode::Delay
            | Opcode::DrawPixel => 2,
        }
    }

    /// Canonical encoded size of the record, header included.
    pub fn encoded_len(self) -> usize {
        HEADER_LEN + self.operand_count()
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.byte() == value)
            .ok_or(value)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Reasons a record cannot be turned into an [`Instruction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnknownOpcode(u8),
    Truncated {
        opcode: u8,
        needed: usize,
        available: usize,
    },
    InvalidRegister { opcode: u8, reg: u8 },
}

impl DecodeError {
    /// Attach the faulting program counter.
    pub fn at(self, pc: u32) -> CoreError {
        match self {
            DecodeError::UnknownOpcode(opcode) => CoreError::UnknownOpcode { opcode, pc },
            DecodeError::Truncated {
                opcode,
                needed,
                available,
            } => CoreError::TruncatedInstruction {
                opcode,
                pc,
                needed,
                available,
            },
            DecodeError::InvalidRegister { opcode, reg } => {
                CoreError::InvalidRegister { opcode, pc, reg }
            }
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownOpcode(op) => write!(f, "unknown opcode 0x{op:02X}"),
            DecodeError::Truncated {
                opcode,
                needed,
                available,
            } => write!(
                f,
                "opcode 0x{opcode:02X} needs {needed} operand bytes, found {available}"
            ),
            DecodeError::InvalidRegister { opcode, reg } => {
                write!(f, "opcode 0x{opcode:02X} names register R{reg}")
            }
        }
    }
}

/// A decoded instruction with typed operands.
///
/// Jump targets are single-byte offsets from [`crate::ORIGIN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    LoadImm { reg: u8, value: u8 },
    StoreGpio { reg: u8, pin: u8 },
    LoadGpio { reg: u8, pin: u8 },
    Jump { target: u8 },
    SerialWrite { reg: u8 },
    Add { dst: u8, src: u8 },
    Sub { dst: u8, src: u8 },
    Compare { lhs: u8, rhs: u8 },
    JumpEq { target: u8 },
    JumpNeq { target: u8 },
    Delay { cycles: u16 },
    ReadAdc { reg: u8 },
    SpiWrite { reg: u8 },
    ScreenPrint { reg: u8 },
    ScreenClear,
    DrawPixel { x_reg: u8, y_reg: u8 },
    MoveX { reg: u8 },
    MoveY { reg: u8 },
    JumpGt { target: u8 },
    JumpLt { target: u8 },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::LoadImm { .. } => Opcode::LoadImm,
            Instruction::StoreGpio { .. } => Opcode::StoreGpio,
            Instruction::LoadGpio { .. } => Opcode::LoadGpio,
            Instruction::Jump { .. } => Opcode::Jump,
            Instruction::SerialWrite { .. } => Opcode::SerialWrite,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Sub { .. } => Opcode::Sub,
            Instruction::Compare { .. } => Opcode::Compare,
            Instruction::JumpEq { .. } => Opcode::JumpEq,
            Instruction::JumpNeq { .. } => Opcode::JumpNeq,
            Instruction::Delay { .. } => Opcode::Delay,
            Instruction::ReadAdc { .. } => Opcode::ReadAdc,
            Instruction::SpiWrite { .. } => Opcode::SpiWrite,
            Instruction::ScreenPrint { .. } => Opcode::ScreenPrint,
            Instruction::ScreenClear => Opcode::ScreenClear,
            Instruction::DrawPixel { .. } => Opcode::DrawPixel,
            Instruction::MoveX { .. } => Opcode::MoveX,
            Instruction::MoveY { .. } => Opcode::MoveY,
            Instruction::JumpGt { .. } => Opcode::JumpGt,
            Instruction::JumpLt { .. } => Opcode::JumpLt,
        }
    }

    /// Decode a record from its opcode byte and operand slice.
    pub fn decode(opcode: u8, operands: &[u8]) -> Result<Self, DecodeError> {
        let op = Opcode::try_from(opcode).map_err(DecodeError::UnknownOpcode)?;
        let needed = op.operand_count();
        if operands.len() < needed {
            return Err(DecodeError::Truncated {
                opcode,
                needed,
                available: operands.len(),
            });
        }
        let reg = |index: usize| -> Result<u8, DecodeError> {
            let reg = operands[index];
            if (reg as usize) < REGISTER_COUNT {
                Ok(reg)
            } else {
                Err(DecodeError::InvalidRegister { opcode, reg })
            }
        };
        let instr = match op {
            Opcode::LoadImm => Instruction::LoadImm {
                reg: reg(0)?,
                value: operands[1],
            },
            Opcode::StoreGpio => Instruction::StoreGpio {
                reg: reg(0)?,
                pin: operands[1],
            },
            Opcode::LoadGpio => Instruction::LoadGpio {
                reg: reg(0)?,
                pin: operands[1],
            },
            Opcode::Jump => Instruction::Jump {
                target: operands[0],
            },
            Opcode::SerialWrite => Instruction::SerialWrite { reg: reg(0)? },
            Opcode::Add => Instruction::Add {
                dst: reg(0)?,
                src: reg(1)?,
            },
            Opcode::Sub => Instruction::Sub {
                dst: reg(0)?,
                src: reg(1)?,
            },
            Opcode::Compare => Instruction::Compare {
                lhs: reg(0)?,
                rhs: reg(1)?,
            },
            Opcode::JumpEq => Instruction::JumpEq {
                target: operands[0],
            },
            Opcode::JumpNeq => Instruction::JumpNeq {
                target: operands[0],
            },
            Opcode::Delay => Instruction::Delay {
                cycles: u16::from_le_bytes([operands[0], operands[1]]),
            },
            Opcode::ReadAdc => Instruction::ReadAdc { reg: reg(0)? },
            Opcode::SpiWrite => Instruction::SpiWrite { reg: reg(0)? },
            Opcode::ScreenPrint => Instruction::ScreenPrint { reg: reg(0)? },
            Opcode::ScreenClear => Instruction::ScreenClear,
            Opcode::DrawPixel => Instruction::DrawPixel {
                x_reg: reg(0)?,
                y_reg: reg(1)?,
            },
            Opcode::MoveX => Instruction::MoveX { reg: reg(0)? },
            Opcode::MoveY => Instruction::MoveY { reg: reg(0)? },
            Opcode::JumpGt => Instruction::JumpGt {
                target: operands[0],
            },
            Opcode::JumpLt => Instruction::JumpLt {
                target: operands[0],
            },
        };
        Ok(instr)
    }

    /// Operand bytes in canonical order.
    pub fn operands(&self) -> Vec<u8> {
        match *self {
            Instruction::LoadImm { reg, value } => vec![reg, value],
            Instruction::StoreGpio { reg, pin } | Instruction::LoadGpio { reg, pin } => {
                vec![reg, pin]
            }
            Instruction::Jump { target }
            | Instruction::JumpEq { target }
            | Instruction::JumpNeq { target }
            | Instruction::JumpGt { target }
            | Instruction::JumpLt { target } => vec![target],
            Instruction::Add { dst, src } | Instruction::Sub { dst, src } => vec![dst, src],
            Instruction::Compare { lhs, rhs } => vec![lhs, rhs],
            Instruction::Delay { cycles } => cycles.to_le_bytes().to_vec(),
            Instruction::SerialWrite { reg }
            | Instruction::ReadAdc { reg }
            | Instruction::SpiWrite { reg }
            | Instruction::ScreenPrint { reg }
            | Instruction::MoveX { reg }
            | Instruction::MoveY { reg } => vec![reg],
            Instruction::ScreenClear => Vec::new(),
            Instruction::DrawPixel { x_reg, y_reg } => vec![x_reg, y_reg],
        }
    }

    /// Append the canonical record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let operands = self.operands();
        out.push(self.opcode().byte());
        out.push(operands.len() as u8);
        out.extend_from_slice(&operands);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.opcode().encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Target offset for jumps, `None` for everything else.
    pub fn jump_target(&self) -> Option<u8> {
        match *self {
            Instruction::Jump { target }
            | Instruction::JumpEq { target }
            | Instruction::JumpNeq { target }
            | Instruction::JumpGt { target }
            | Instruction::JumpLt { target } => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.opcode().mnemonic();
        match *self {
            Instruction::LoadImm { reg, value } => write!(f, "{mnemonic} R{reg}, 0x{value:02X}"),
            Instruction::StoreGpio { reg, pin } | Instruction::LoadGpio { reg, pin } => {
                write!(f, "{mnemonic} R{reg}, GPIO{pin}")
            }
            Instruction::Add { dst, src } | Instruction::Sub { dst, src } => {
                write!(f, "{mnemonic} R{dst}, R{src}")
            }
            Instruction::Compare { lhs, rhs } => write!(f, "{mnemonic} R{lhs}, R{rhs}"),
            Instruction::Delay { cycles } => write!(f, "{mnemonic} {cycles}"),
            Instruction::DrawPixel { x_reg, y_reg } => write!(f, "{mnemonic} R{x_reg}, R{y_reg}"),
            Instruction::ScreenClear => f.write_str(mnemonic),
            Instruction::SerialWrite { reg }
            | Instruction::ReadAdc { reg }
            | Instruction::SpiWrite { reg }
            | Instruction::ScreenPrint { reg }
            | Instruction::MoveX { reg }
            | Instruction::MoveY { reg } => write!(f, "{mnemonic} R{reg}"),
            Instruction::Jump { target }
            | Instruction::JumpEq { target }
            | Instruction::JumpNeq { target }
            | Instruction::JumpGt { target }
            | Instruction::JumpLt { target } => write!(f, "{mnemonic} 0x{target:02X}"),
        }
    }
}

/// Result of walking a firmware image record by record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Offset from the origin and the decoded instruction at that offset.
    pub entries: Vec<(usize, Instruction)>,
    /// First record that failed to decode, if the walk stopped early.
    pub error: Option<(usize, DecodeError)>,
}

impl Listing {
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.entries.iter().map(|(_, instr)| instr)
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (offset, instr) in &self.entries {
            writeln!(f, "0x{offset:04X}: {instr}")?;
        }
        if let Some((offset, err)) = &self.error {
            writeln!(f, "0x{offset:04X}: <{err}>")?;
        }
        Ok(())
    }
}

/// Walk `image` from offset 0 using each record's length byte.
pub fn disassemble(image: &[u8]) -> Listing {
    let mut listing = Listing::default();
    let mut offset = 0usize;
    while offset < image.len() {
        let opcode = image[offset];
        let Some(&length) = image.get(offset + 1) else {
            listing.error = Some((
                offset,
                DecodeError::Truncated {
                    opcode,
                    needed: 1,
                    available: 0,
                },
            ));
            break;
        };
        let start = offset + HEADER_LEN;
        let end = (start + length as usize).min(image.len());
        match Instruction::decode(opcode, &image[start..end]) {
            Ok(instr) => listing.entries.push((offset, instr)),
            Err(err) => {
                listing.error = Some((offset, err));
                break;
            }
        }
        offset = start + length as usize;
    }
    listing
}
