use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use esp32_compiler::{compile_json, Diagnostic};
use esp32_core::{disassemble, Forward, Machine, MachineConfig, PeripheralEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "esp32emu",
    about = "Compile a DSL program (grammar JSON) and run it on the toy ESP32 core."
)]
struct Args {
    /// Grammar AST as JSON; `-` reads stdin.
    #[arg(long, value_name = "PATH", conflicts_with = "firmware")]
    ast: Option<PathBuf>,

    /// Raw firmware image to load instead of compiling.
    #[arg(long, value_name = "PATH")]
    firmware: Option<PathBuf>,

    /// Write the compiled firmware here.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Print a disassembly of the firmware to stdout.
    #[arg(long, default_value_t = false)]
    disasm: bool,

    /// Number of ticks to run after loading (0 = do not start the machine).
    #[arg(long, default_value_t = 0)]
    ticks: u32,

    /// Override the configured steps per tick.
    #[arg(long, value_name = "N")]
    steps_per_tick: Option<u32>,

    /// Machine configuration file (JSON).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Fixed ADC reading to feed the machine.
    #[arg(long, value_name = "VALUE")]
    adc: Option<i64>,

    /// Print peripheral events as JSON lines while running.
    #[arg(long, default_value_t = false)]
    events: bool,
}

fn read_ast(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer);
    }
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_config(args: &Args) -> anyhow::Result<MachineConfig> {
    let mut config = match &args.config {
        Some(path) => MachineConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MachineConfig::default(),
    }
    .with_env_overrides();
    if let Some(steps) = args.steps_per_tick {
        config.steps_per_tick = steps;
    }
    Ok(config)
}

fn firmware(args: &Args) -> anyhow::Result<Vec<u8>> {
    if let Some(path) = &args.firmware {
        return fs::read(path).with_context(|| format!("reading {}", path.display()));
    }
    let Some(path) = &args.ast else {
        bail!("either --ast or --firmware is required");
    };
    let output = compile_json(&read_ast(path)?)?;
    for diagnostic in &output.diagnostics {
        match diagnostic {
            Diagnostic::UnsupportedConstruct { statement, detail } => {
                warn!(statement, %detail, "skipped unsupported construct")
            }
            Diagnostic::AddressOverflow { at, target } => {
                warn!(at, target, "jump target wrapped to one byte")
            }
        }
    }
    info!(bytes = output.firmware.len(), "compiled");
    Ok(output.firmware)
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let image = firmware(&args)?;

    if let Some(path) = &args.output {
        fs::write(path, &image).with_context(|| format!("writing {}", path.display()))?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.disasm {
        write!(out, "{}", disassemble(&image))?;
    }
    if args.ticks == 0 {
        return Ok(());
    }

    let mut machine = Machine::new(config);
    if let Some(value) = args.adc {
        machine.set_adc_input(move || value);
    }
    machine.load_firmware(&image)?;
    machine.start();

    let mut write_error = None;
    let mut sink = Forward(|event: PeripheralEvent| {
        if !args.events || write_error.is_some() {
            return;
        }
        let line = serde_json::to_string(&event).map_err(io::Error::from);
        if let Err(err) = line.and_then(|line| writeln!(out, "{line}")) {
            write_error = Some(err);
        }
    });
    for _ in 0..args.ticks {
        match machine.tick(&mut sink) {
            Ok(report) if !report.running => break,
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "machine halted");
                break;
            }
        }
    }
    drop(sink);
    if let Some(err) = write_error {
        return Err(err.into());
    }

    serde_json::to_writer_pretty(&mut out, &machine.view())?;
    writeln!(out)?;
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}
