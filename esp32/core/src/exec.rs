use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::MachineConfig;
use crate::isa::{DecodeError, Instruction, Opcode, HEADER_LEN};
use crate::memory::{flash_offset, MemoryImage, ORIGIN};
use crate::peripherals::{PeripheralEvent, PeripheralSink};
use crate::screen::Screen;
use crate::state::{flag_value, GpioBank, GpioPin, PinMode, Registers};
use crate::{CoreError, Result};

/// Highest reading the 12-bit converter can report.
pub const ADC_MAX: i64 = 4095;

/// What a single call to [`Machine::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The machine is stopped (or ran off the end of flash); nothing happened.
    Halted,
    /// A delay cycle was consumed without fetching.
    Delayed { remaining: u16 },
    /// `instr` at `pc` executed; `jumped` is true when it repointed pc.
    Executed {
        pc: u32,
        instr: Instruction,
        jumped: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TickReport {
    pub steps: u32,
    pub running: bool,
}

enum Flow {
    Next,
    Jump,
}

type AdcSource = Box<dyn FnMut() -> i64>;

/// The emulated microcontroller: memory, registers, peripherals and the
/// fetch/decode/execute loop. Driven entirely by the host.
pub struct Machine {
    config: MachineConfig,
    memory: MemoryImage,
    registers: Registers,
    pc: u32,
    compare: Ordering,
    gpio: GpioBank,
    serial: String,
    spi: String,
    screen: Screen,
    delay: u16,
    running: bool,
    fault: Option<CoreError>,
    adc: AdcSource,
    instructions_executed: u64,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &format_args!("0x{:08X}", self.pc))
            .field("registers", &self.registers)
            .field("compare", &self.compare)
            .field("delay", &self.delay)
            .field("running", &self.running)
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let adc_default = config.adc_default;
        Self {
            memory: MemoryImage::new(),
            registers: Registers::default(),
            pc: ORIGIN,
            compare: Ordering::Equal,
            gpio: GpioBank::default(),
            serial: String::new(),
            spi: String::new(),
            screen: Screen::new(config.screen),
            delay: 0,
            running: false,
            fault: None,
            adc: Box::new(move || adc_default),
            instructions_executed: 0,
            config,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Install the function READ_ADC samples. It is called once per
    /// executed READ_ADC and never cached.
    pub fn set_adc_input<F>(&mut self, source: F)
    where
        F: FnMut() -> i64 + 'static,
    {
        self.adc = Box::new(source);
    }

    /// Copy `firmware` into flash and reset the execution state.
    ///
    /// GPIO levels and modes survive a reload. On `CapacityExceeded` nothing
    /// changes. Loading does not start the machine.
    pub fn load_firmware(&mut self, firmware: &[u8]) -> Result<()> {
        self.memory.load_flash(firmware)?;
        self.pc = ORIGIN;
        self.registers.clear();
        self.compare = Ordering::Equal;
        self.delay = 0;
        self.fault = None;
        self.serial.clear();
        self.spi.clear();
        self.screen.reset_cursor();
        self.instructions_executed = 0;
        debug!(bytes = firmware.len(), "firmware loaded");
        Ok(())
    }

    pub fn start(&mut self) {
        if !self.running {
            info!(pc = self.pc, "machine started");
        }
        self.running = true;
    }

    pub fn stop(&mut self) {
        if self.running {
            info!(pc = self.pc, "machine stopped");
        }
        self.running = false;
    }

    /// Execute one step. Execution faults stop the machine, are kept in
    /// [`Machine::fault`] and returned; later steps report `Halted`.
    pub fn step<S: PeripheralSink>(&mut self, sink: &mut S) -> Result<StepOutcome> {
        let offset = match flash_offset(self.pc) {
            Some(offset) if self.running && offset < self.memory.flash_len() => offset,
            _ => {
                self.running = false;
                return Ok(StepOutcome::Halted);
            }
        };

        if self.delay > 0 {
            self.delay -= 1;
            return Ok(StepOutcome::Delayed {
                remaining: self.delay,
            });
        }

        let pc = self.pc;
        let (instr, length) = match self.fetch(offset) {
            Ok(fetched) => fetched,
            Err(err) => {
                let fault = err.at(pc);
                warn!(%fault, "execution halted");
                self.running = false;
                self.fault = Some(err.at(pc));
                return Err(fault);
            }
        };
        trace!(pc, %instr, "execute");

        let jumped = match self.execute(instr, sink) {
            Flow::Jump => true,
            Flow::Next => {
                self.pc = self.pc.wrapping_add((HEADER_LEN + length) as u32);
                false
            }
        };
        self.instructions_executed += 1;
        Ok(StepOutcome::Executed { pc, instr, jumped })
    }

    fn fetch(&self, offset: usize) -> std::result::Result<(Instruction, usize), DecodeError> {
        // Offset is in range; the caller checked it against the flash length.
        let opcode = self.memory.read_flash(offset).unwrap_or_default();
        Opcode::try_from(opcode).map_err(DecodeError::UnknownOpcode)?;
        let Some(length) = self.memory.read_flash(offset + 1) else {
            return Err(DecodeError::Truncated {
                opcode,
                needed: 1,
                available: 0,
            });
        };
        let length = length as usize;
        let operands = self.memory.flash_window(offset + HEADER_LEN, length);
        let instr = Instruction::decode(opcode, operands)?;
        Ok((instr, length))
    }

    fn execute<S: PeripheralSink>(&mut self, instr: Instruction, sink: &mut S) -> Flow {
        match instr {
            Instruction::LoadImm { reg, value } => self.registers.set(reg, value),
            Instruction::StoreGpio { reg, pin } => {
                self.gpio.write(pin, self.registers.get(reg));
            }
            Instruction::LoadGpio { reg, pin } => {
                if let Some(level) = self.gpio.level(pin) {
                    self.registers.set(reg, level);
                }
            }
            Instruction::Jump { target } => return self.jump(target),
            Instruction::SerialWrite { reg } => {
                let byte = self.registers.get(reg);
                self.serial.push(char::from(byte));
                sink.emit(PeripheralEvent::SerialByte { byte });
            }
            Instruction::Add { dst, src } => self.registers.add(dst, src),
            Instruction::Sub { dst, src } => self.registers.sub(dst, src),
            Instruction::Compare { lhs, rhs } => self.compare = self.registers.compare(lhs, rhs),
            Instruction::JumpEq { target } => return self.jump_if(Ordering::is_eq, target),
            Instruction::JumpNeq { target } => return self.jump_if(Ordering::is_ne, target),
            Instruction::JumpGt { target } => return self.jump_if(Ordering::is_gt, target),
            Instruction::JumpLt { target } => return self.jump_if(Ordering::is_lt, target),
            Instruction::Delay { cycles } => self.delay = cycles,
            Instruction::ReadAdc { reg } => {
                let sample = (self.adc)().min(ADC_MAX);
                // The register is 8 bits wide; the 12-bit sample is truncated.
                self.registers.set(reg, sample as u8);
            }
            Instruction::SpiWrite { reg } => {
                let byte = self.registers.get(reg);
                self.spi.push(char::from(byte));
                sink.emit(PeripheralEvent::SpiByte { byte });
            }
            Instruction::ScreenPrint { reg } => self.screen.print(self.registers.get(reg), sink),
            Instruction::ScreenClear => self.screen.clear(sink),
            Instruction::DrawPixel { x_reg, y_reg } => sink.emit(PeripheralEvent::DrawPixel {
                x: self.registers.get(x_reg),
                y: self.registers.get(y_reg),
            }),
            Instruction::MoveX { reg } => self.screen.move_x(self.registers.get(reg), sink),
            Instruction::MoveY { reg } => self.screen.move_y(self.registers.get(reg), sink),
        }
        Flow::Next
    }

    fn jump(&mut self, target: u8) -> Flow {
        self.pc = ORIGIN + target as u32;
        Flow::Jump
    }

    fn jump_if(&mut self, taken: fn(Ordering) -> bool, target: u8) -> Flow {
        if taken(self.compare) {
            self.jump(target)
        } else {
            Flow::Next
        }
    }

    /// Run one host tick: up to `steps_per_tick` steps while running.
    pub fn tick<S: PeripheralSink>(&mut self, sink: &mut S) -> Result<TickReport> {
        self.run_for(self.config.steps_per_tick, sink)
    }

    /// Run at most `steps` steps, checking the running flag before each.
    pub fn run_for<S: PeripheralSink>(&mut self, steps: u32, sink: &mut S) -> Result<TickReport> {
        let mut report = TickReport::default();
        while report.steps < steps && self.running {
            self.step(sink)?;
            report.steps += 1;
        }
        report.running = self.running;
        Ok(report)
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Host-side register access, used by test benches and debuggers.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn pc_offset(&self) -> usize {
        flash_offset(self.pc).unwrap_or(usize::MAX)
    }

    pub fn compare_flag(&self) -> i8 {
        flag_value(self.compare)
    }

    pub fn delay_counter(&self) -> u16 {
        self.delay
    }

    pub fn gpio(&self) -> &GpioBank {
        &self.gpio
    }

    /// Drive a pin from outside, as a button or sensor would.
    pub fn set_gpio_level(&mut self, pin: u8, level: u8) -> bool {
        self.gpio.write(pin, level)
    }

    pub fn set_gpio_mode(&mut self, pin: u8, mode: PinMode) -> bool {
        self.gpio.set_mode(pin, mode)
    }

    pub fn serial_output(&self) -> &str {
        &self.serial
    }

    pub fn spi_output(&self) -> &str {
        &self.spi
    }

    pub fn cursor(&self) -> (u16, u16) {
        self.screen.cursor()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn fault(&self) -> Option<&CoreError> {
        self.fault.as_ref()
    }

    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed
    }

    pub fn flash(&self) -> &[u8] {
        self.memory.flash()
    }

    pub fn ram(&self) -> &[u8] {
        self.memory.ram()
    }

    pub fn memory(&self) -> &MemoryImage {
        &self.memory
    }

    /// Read-only snapshot for status displays.
    pub fn view(&self) -> MachineView {
        MachineView {
            pc: self.pc,
            registers: self.registers,
            compare_flag: self.compare_flag(),
            delay_counter: self.delay,
            running: self.running,
            cursor: self.screen.cursor(),
            gpio: self.gpio.pins().to_vec(),
            serial: self.serial.clone(),
            spi: self.spi.clone(),
            instructions_executed: self.instructions_executed,
            fault: self.fault.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineView {
    pub pc: u32,
    pub registers: Registers,
    pub compare_flag: i8,
    pub delay_counter: u16,
    pub running: bool,
    pub cursor: (u16, u16),
    pub gpio: Vec<GpioPin>,
    pub serial: String,
    pub spi: String,
    pub instructions_executed: u64,
    pub fault: Option<String>,
}
