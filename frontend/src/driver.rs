//! `EmulatorDriver` (§4.6): coordinates the `CalcState` lock, the
//! speed-limit loop, and screenshot/memdump capture. The headless runner
//! holds `CalcState` for its entire process lifetime rather than behind a
//! separate mutex — there is no concurrent debugger UI thread in this
//! binary — so "coordinates the CalcState lock" here means owning it
//! outright and mediating every mutation through this struct's methods,
//! matching §5's "only the engine thread may mutate CalcState" rule trivially.

use std::path::Path;
use std::time::{Duration, Instant};

use calc_core::calc::CalcState;
use calc_core::engine;
use calc_core::mapper::MemoryMapper;
use calc_core::trace::TraceWriter;
use calc_hardware::MacroTarget;

/// `--headless-delay`/`advance_time` run the engine in frame-sized chunks
/// rather than one `run_time` call so that real-time mode's sleep-to-match
/// granularity (§4.6: "sleep between 30ms frames") stays bounded even for a
/// long advance.
const FRAME_USEC: u64 = 30_000;

#[derive(Clone, Copy, Debug)]
pub enum MemRegion {
    Rom,
    Ram,
    Lcd,
    All,
    RamLogical,
}

impl MemRegion {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "rom" => Self::Rom,
            "ram" => Self::Ram,
            "lcd" => Self::Lcd,
            "all" => Self::All,
            "ram-logical" => Self::RamLogical,
            _ => return None,
        })
    }
}

/// CLI flags merged with any `config.toml` defaults, consolidated into one
/// value threaded through the driver rather than left as the loose
/// `Args`/`FileConfig` fields `main.rs` otherwise resolves ad hoc at each use
/// site (spec.md §9 DESIGN NOTES: "global option state... must be lifted
/// into an explicit `RunOptions` struct threaded into `EmulatorDriver::new`").
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// The resolved model id (after `--model`/state-file/config-file
    /// fallback), kept for introspection — `CalcState::hw` is already the
    /// authority the emulator itself reads from.
    pub model: Option<String>,
    pub full_speed: bool,
    pub trace_limit: Option<u64>,
    pub trace_backtrace_limit: Option<usize>,
}

pub struct EmulatorDriver {
    pub calc: CalcState,
    pub options: RunOptions,
}

impl EmulatorDriver {
    pub fn new(calc: CalcState, options: RunOptions) -> Self {
        Self { calc, options }
    }

    pub fn attach_trace(&mut self, trace: TraceWriter) {
        self.calc.trace = Some(trace);
    }

    pub fn take_trace(&mut self) -> Option<TraceWriter> {
        self.calc.trace.take()
    }

    pub fn press_key(&mut self, group: usize, bit: u8) {
        self.calc.press_key(group, bit);
    }

    pub fn release_key(&mut self, group: usize, bit: u8) {
        self.calc.release_key(group, bit);
    }

    /// Advances virtual time by `seconds`. Full-speed mode runs the engine
    /// back to back with no throttling; normal-speed mode sleeps off any gap
    /// between a chunk's wall-clock cost and its virtual duration so the
    /// emulation tracks real time (§4.6).
    pub fn advance_time(&mut self, seconds: f64) {
        let mut remaining_usec = (seconds * 1_000_000.0).round().max(0.0) as u64;
        while remaining_usec > 0 {
            let chunk = remaining_usec.min(FRAME_USEC);
            let frame_start = Instant::now();
            engine::run_time(&mut self.calc, chunk);
            if !self.options.full_speed {
                let target = Duration::from_micros(chunk);
                let elapsed = frame_start.elapsed();
                if elapsed < target {
                    std::thread::sleep(target - elapsed);
                }
            }
            remaining_usec -= chunk;
        }
    }

    /// Renders the LCD controller's raw memory as a 1bpp bitmap PNG — these
    /// calculators' LCD controllers are column-major monochrome (matching
    /// the real T6A04/T6963-family controllers the hardware uses), and
    /// pixel-accurate rendering beyond that raw bit layout is an explicit
    /// Non-goal (§1), so this is the simplest faithful opaque sink.
    pub fn screenshot(&self, path: &Path) -> std::io::Result<()> {
        let hw = self.calc.hw;
        let lcd_start = (hw.rom_size + hw.ram_size) as usize;
        let lcd_end = lcd_start + hw.lcd_mem_size as usize;
        let lcd_mem = &self.calc.mem[lcd_start..lcd_end];
        write_png(path, hw.lcd_width, hw.lcd_height, lcd_mem)
    }

    pub fn memdump(&self, path: &Path, region: MemRegion) -> std::io::Result<()> {
        let hw = self.calc.hw;
        let rom_end = hw.rom_size as usize;
        let ram_end = rom_end + hw.ram_size as usize;
        let bytes: Vec<u8> = match region {
            MemRegion::Rom => self.calc.mem[..rom_end].to_vec(),
            MemRegion::Ram => self.calc.mem[rom_end..ram_end].to_vec(),
            MemRegion::Lcd => self.calc.mem[ram_end..].to_vec(),
            MemRegion::All => self.calc.mem.clone(),
            // Reads the RAM range (0x8000-0xFFFF, matching trace::parse_range("ram"))
            // through the mapper rather than copying physical bytes directly,
            // so a banked model's dump reflects whatever page is currently
            // switched in, the way the ROM itself would see it.
            MemRegion::RamLogical => (0x8000u32..=0xFFFF).map(|a| self.calc.read_byte_logical(a as u16)).collect(),
        };
        std::fs::write(path, bytes)
    }
}

impl MacroTarget for EmulatorDriver {
    fn press_key(&mut self, group: usize, bit: u8) {
        EmulatorDriver::press_key(self, group, bit);
    }
    fn release_key(&mut self, group: usize, bit: u8) {
        EmulatorDriver::release_key(self, group, bit);
    }
    fn advance_time(&mut self, seconds: f64) {
        EmulatorDriver::advance_time(self, seconds);
    }
}

fn write_png(path: &Path, width: u16, height: u16, lcd_mem: &[u8]) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    let mut encoder = png::Encoder::new(writer, width as u32, height as u32);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().map_err(encoding_to_io)?;

    let bytes_per_row = (width as usize).div_ceil(8);
    let mut pixels = vec![0xFFu8; width as usize * height as usize];
    for row in 0..height as usize {
        for col in 0..width as usize {
            let byte_idx = row * bytes_per_row + col / 8;
            let Some(&byte) = lcd_mem.get(byte_idx) else { continue };
            let bit_idx = 7 - (col % 8);
            if (byte >> bit_idx) & 1 != 0 {
                pixels[row * width as usize + col] = 0x00;
            }
        }
    }
    writer.write_image_data(&pixels).map_err(encoding_to_io)
}

fn encoding_to_io(e: png::EncodingError) -> std::io::Error {
    std::io::Error::other(e.to_string())
}
