//! One emulator session: a machine plus the compiler entry points a host
//! UI drives it with.

use tracing::debug;

use esp32_core::{Machine, MachineConfig, PeripheralEvent, PeripheralSink, TickReport};

use crate::codegen::{compile_json, CompileReport};
use crate::Result;

#[derive(Debug, Default)]
pub struct Emulator {
    machine: Machine,
    last_firmware: Option<Vec<u8>>,
}

impl Emulator {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            machine: Machine::new(config),
            last_firmware: None,
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// Compile grammar JSON. The register file is cleared first, whether or
    /// not compilation succeeds; the firmware is kept but not loaded.
    pub fn compile_code(&mut self, ast_json: &str) -> CompileReport {
        self.machine.registers_mut().clear();
        let report = CompileReport::from(compile_json(ast_json));
        debug!(
            success = report.success,
            diagnostics = report.diagnostics.len(),
            "compile request"
        );
        if let Some(firmware) = &report.firmware {
            self.last_firmware = Some(firmware.clone());
        }
        report
    }

    pub fn last_firmware(&self) -> Option<&[u8]> {
        self.last_firmware.as_deref()
    }

    /// Load `firmware` and blank the display. `ClearScreen` reaches the sink
    /// only when the load succeeds.
    pub fn load_firmware<S: PeripheralSink>(
        &mut self,
        firmware: &[u8],
        sink: &mut S,
    ) -> Result<()> {
        self.machine.load_firmware(firmware)?;
        sink.emit(PeripheralEvent::ClearScreen);
        Ok(())
    }

    /// Load whatever the last successful `compile_code` produced.
    /// Returns `false` when nothing has been compiled yet.
    pub fn load_compiled<S: PeripheralSink>(&mut self, sink: &mut S) -> Result<bool> {
        let Some(firmware) = self.last_firmware.take() else {
            return Ok(false);
        };
        let loaded = self.load_firmware(&firmware, sink);
        self.last_firmware = Some(firmware);
        loaded?;
        Ok(true)
    }

    pub fn start(&mut self) {
        self.machine.start();
    }

    pub fn stop(&mut self) {
        self.machine.stop();
    }

    pub fn tick<S: PeripheralSink>(&mut self, sink: &mut S) -> Result<TickReport> {
        Ok(self.machine.tick(sink)?)
    }

    /// One `GPIO{n}: {level}` line per pin.
    pub fn gpio_status(&self) -> String {
        self.machine.gpio().to_string()
    }

    /// `Serial: …` and `SPI: …` lines.
    pub fn serial_status(&self) -> String {
        format!(
            "Serial: {}\nSPI: {}\n",
            self.machine.serial_output(),
            self.machine.spi_output()
        )
    }
}
