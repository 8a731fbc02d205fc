//! Binary instruction/memory/key-event trace writer.
//!
//! Two modes share one record format: linear mode appends to a file up to a
//! byte limit; ring mode ("backtrace") keeps only the most recent N bytes in
//! memory, patching an in-memory snapshot as `MemWrite` records are evicted
//! so the file flushed at `close` always reconstructs the traced region's
//! current contents.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::mapper::MemoryMapper;

#[derive(Debug)]
pub enum TraceError {
    Io(std::io::Error),
    ParseRange,
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "trace I/O error: {e}"),
            Self::ParseRange => write!(f, "invalid trace range"),
        }
    }
}

impl std::error::Error for TraceError {}

impl From<std::io::Error> for TraceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

const MAGIC: &[u8; 4] = b"TLMT";
const VERSION: u16 = 2;
const FLAGS_ALL: u16 = 0x0007;

const TAG_INSTR: u8 = 0x01;
const TAG_MEM_WRITE: u8 = 0x02;
const TAG_KEY_EVENT: u8 = 0x03;

const INSTR_LEN: usize = 64;
const MEM_WRITE_LEN: usize = 6;
const KEY_EVENT_LEN: usize = 9;

fn record_len_for_tag(tag: u8) -> Option<usize> {
    match tag {
        TAG_INSTR => Some(INSTR_LEN),
        TAG_MEM_WRITE => Some(MEM_WRITE_LEN),
        TAG_KEY_EVENT => Some(KEY_EVENT_LEN),
        _ => None,
    }
}

/// Z80 register file at the start of an instruction, as captured for an
/// `Instr` record. `wz_prime` has no hardware counterpart — real Z80 silicon
/// keeps a single internal MEMPTR register, not a banked pair — and is
/// always encoded as 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegSnapshot {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub ir: u16,
    pub wz: u16,
    pub wz_prime: u16,
    pub af_prime: u16,
    pub bc_prime: u16,
    pub de_prime: u16,
    pub hl_prime: u16,
    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    pub r7: u8,
    pub halted: bool,
}

/// Parses `"ram"`, `"all"`, or `"START-END"` (C-style integer literals,
/// hex with or without a `0x` prefix) into an inclusive `(start, end)`
/// logical-address range with `start <= end <= 0xFFFF`.
pub fn parse_range(spec: &str) -> Result<(u32, u32), TraceError> {
    match spec {
        "ram" => return Ok((0x8000, 0xFFFF)),
        "all" => return Ok((0x0000, 0xFFFF)),
        _ => {}
    }
    let mut parts = spec.splitn(2, '-');
    let start = parts.next().ok_or(TraceError::ParseRange)?;
    let end = parts.next().ok_or(TraceError::ParseRange)?;
    let start = parse_int(start)?;
    let end = parse_int(end)?;
    if start > end || end > 0xFFFF {
        return Err(TraceError::ParseRange);
    }
    Ok((start, end))
}

fn parse_int(token: &str) -> Result<u32, TraceError> {
    let token = token.trim();
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).map_err(|_| TraceError::ParseRange);
    }
    token
        .parse::<u32>()
        .or_else(|_| u32::from_str_radix(token, 16))
        .map_err(|_| TraceError::ParseRange)
}

fn build_header(range_start: u32, range_end: u32, init_size: u32) -> [u8; 20] {
    let mut header = [0u8; 20];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6..8].copy_from_slice(&FLAGS_ALL.to_le_bytes());
    header[8..12].copy_from_slice(&range_start.to_le_bytes());
    header[12..16].copy_from_slice(&range_end.to_le_bytes());
    header[16..20].copy_from_slice(&init_size.to_le_bytes());
    header
}

fn snapshot_bytes<M: MemoryMapper>(calc: &M, range_start: u32, range_end: u32) -> Vec<u8> {
    (range_start..=range_end).map(|a| calc.read_byte_logical(a as u16)).collect()
}

fn encode_instr(pc: u16, opcode: u8, clock: u32, regs: &RegSnapshot) -> [u8; INSTR_LEN] {
    let mut b = [0u8; INSTR_LEN];
    b[0] = TAG_INSTR;
    b[1..5].copy_from_slice(&(pc as u32).to_le_bytes());
    b[5..9].copy_from_slice(&(opcode as u32).to_le_bytes());
    b[9..13].copy_from_slice(&clock.to_le_bytes());
    let pairs = [
        regs.af, regs.bc, regs.de, regs.hl, regs.ix, regs.iy, regs.sp, regs.pc, regs.ir, regs.wz,
        regs.wz_prime, regs.af_prime, regs.bc_prime, regs.de_prime, regs.hl_prime,
    ];
    let mut off = 13;
    for r in pairs {
        b[off..off + 2].copy_from_slice(&r.to_le_bytes());
        off += 2;
    }
    b[off] = regs.iff1 as u8;
    b[off + 1] = regs.iff2 as u8;
    b[off + 2] = regs.im;
    b[off + 3] = regs.r7;
    b[off + 4] = regs.halted as u8;
    // Remaining bytes (off+5..64) stay zero-filled reserved padding.
    b
}

fn encode_mem_write(addr: u32, value: u8) -> [u8; MEM_WRITE_LEN] {
    let mut b = [0u8; MEM_WRITE_LEN];
    b[0] = TAG_MEM_WRITE;
    b[1..5].copy_from_slice(&addr.to_le_bytes());
    b[5] = value;
    b
}

fn encode_key_event(pressed: bool, key: u8, clock: u32, pc: u16) -> [u8; KEY_EVENT_LEN] {
    let mut b = [0u8; KEY_EVENT_LEN];
    b[0] = TAG_KEY_EVENT;
    b[1] = pressed as u8;
    b[2] = key;
    b[3..7].copy_from_slice(&clock.to_le_bytes());
    b[7..9].copy_from_slice(&pc.to_le_bytes());
    b
}

enum Mode {
    Linear {
        file: File,
        bytes_written: u64,
        limit_bytes: u64,
        enabled: bool,
        warned: bool,
    },
    Ring {
        buf: Vec<u8>,
        start: usize,
        used: usize,
        capacity: usize,
        header: [u8; 20],
        snapshot: Vec<u8>,
        path: PathBuf,
    },
}

/// Default linear trace byte limit per §6 (`--trace-limit`'s default).
pub const DEFAULT_LINEAR_LIMIT_BYTES: u64 = 500 * 1024 * 1024 * 1024;
/// Default ring ("backtrace") byte limit per §6 (`--trace-backtrace-limit`'s default).
pub const DEFAULT_RING_LIMIT_BYTES: usize = 1024 * 1024 * 1024;

pub struct TraceWriter {
    range_start: u32,
    range_end: u32,
    mode: Mode,
}

impl TraceWriter {
    /// Linear mode: opens `path`, writes the 20-byte header plus the
    /// initial-contents snapshot immediately, and appends records up to
    /// `limit_bytes` thereafter.
    pub fn init<M: MemoryMapper>(
        calc: &M,
        path: &Path,
        range_spec: &str,
        limit_bytes: u64,
    ) -> Result<Self, TraceError> {
        let (range_start, range_end) = parse_range(range_spec)?;
        let init_size = range_end - range_start + 1;
        let header = build_header(range_start, range_end, init_size);
        let snapshot = snapshot_bytes(calc, range_start, range_end);

        let mut file = File::create(path)?;
        file.write_all(&header)?;
        file.write_all(&snapshot)?;

        Ok(Self {
            range_start,
            range_end,
            mode: Mode::Linear { file, bytes_written: 0, limit_bytes, enabled: true, warned: false },
        })
    }

    /// Ring mode: header and snapshot are kept in memory and only written
    /// to `path` on `close`.
    pub fn init_ring<M: MemoryMapper>(
        calc: &M,
        path: PathBuf,
        range_spec: &str,
        capacity: usize,
    ) -> Result<Self, TraceError> {
        let (range_start, range_end) = parse_range(range_spec)?;
        let init_size = range_end - range_start + 1;
        let header = build_header(range_start, range_end, init_size);
        let snapshot = snapshot_bytes(calc, range_start, range_end);

        Ok(Self {
            range_start,
            range_end,
            mode: Mode::Ring { buf: vec![0u8; capacity.max(1)], start: 0, used: 0, capacity: capacity.max(1), header, snapshot, path },
        })
    }

    pub fn instr<M: MemoryMapper>(&mut self, calc: &M, pc: u16, opcode: u8, clock: u32, regs: &RegSnapshot) {
        let bytes = encode_instr(pc, opcode, clock, regs);
        self.append(calc, &bytes);
    }

    /// Only emitted when `range_start <= addr <= range_end`.
    pub fn mem_write<M: MemoryMapper>(&mut self, calc: &M, addr: u32, value: u8) {
        if addr < self.range_start || addr > self.range_end {
            return;
        }
        let bytes = encode_mem_write(addr, value);
        self.append(calc, &bytes);
    }

    pub fn key_event<M: MemoryMapper>(&mut self, calc: &M, pressed: bool, key: u8, clock: u32, pc: u16) {
        let bytes = encode_key_event(pressed, key, clock, pc);
        self.append(calc, &bytes);
    }

    fn append<M: MemoryMapper>(&mut self, calc: &M, bytes: &[u8]) {
        match &mut self.mode {
            Mode::Linear { file, bytes_written, limit_bytes, enabled, warned } => {
                if !*enabled {
                    return;
                }
                if *bytes_written + bytes.len() as u64 > *limit_bytes {
                    if !*warned {
                        eprintln!("trace: limit reached, disabling writer");
                        *warned = true;
                    }
                    *enabled = false;
                    return;
                }
                match file.write_all(bytes) {
                    Ok(()) => *bytes_written += bytes.len() as u64,
                    Err(e) => {
                        if !*warned {
                            eprintln!("trace: write failed ({e}), disabling writer");
                            *warned = true;
                        }
                        *enabled = false;
                    }
                }
            }
            Mode::Ring { buf, start, used, capacity, header, snapshot, .. } => {
                let needs_resync = append_ring(buf, start, used, *capacity, snapshot, self.range_start, bytes);
                if needs_resync {
                    *snapshot = snapshot_bytes(calc, self.range_start, self.range_end);
                    *header = build_header(self.range_start, self.range_end, snapshot.len() as u32);
                    *start = 0;
                    *used = 0;
                    eprintln!("trace: ring buffer resynchronized after corrupt record tag");
                }
            }
        }
    }

    /// Flushes a ring-mode trace to its file. A no-op for linear mode
    /// (already on disk record by record).
    pub fn close(self) -> Result<(), TraceError> {
        match self.mode {
            Mode::Linear { .. } => Ok(()),
            Mode::Ring { buf, start, used, capacity, header, snapshot, path } => {
                let mut file = File::create(&path)?;
                file.write_all(&header)?;
                file.write_all(&snapshot)?;
                let first_len = (capacity - start).min(used);
                file.write_all(&buf[start..start + first_len])?;
                let remaining = used - first_len;
                if remaining > 0 {
                    file.write_all(&buf[..remaining])?;
                }
                Ok(())
            }
        }
    }
}

/// Evicts whole records from the front of the ring until `bytes` fits,
/// patching `snapshot` for every evicted `MemWrite`, then appends `bytes`.
/// Returns true if a corrupt tag was encountered (caller must resync).
fn append_ring(buf: &mut [u8], start: &mut usize, used: &mut usize, capacity: usize, snapshot: &mut [u8], range_start: u32, bytes: &[u8]) -> bool {
    if bytes.len() > capacity {
        eprintln!("trace: record larger than ring capacity, dropping");
        return false;
    }
    while *used + bytes.len() > capacity {
        let tag = buf[*start];
        let rec_len = match record_len_for_tag(tag) {
            Some(n) => n,
            None => return true,
        };
        if tag == TAG_MEM_WRITE {
            let addr = read_u32_ring(buf, (*start + 1) % capacity, capacity);
            let value = buf[(*start + 5) % capacity];
            if addr >= range_start {
                let offset = (addr - range_start) as usize;
                if offset < snapshot.len() {
                    snapshot[offset] = value;
                }
            }
        }
        *start = (*start + rec_len) % capacity;
        *used -= rec_len;
    }
    for &b in bytes {
        let pos = (*start + *used) % capacity;
        buf[pos] = b;
        *used += 1;
    }
    false
}

fn read_u32_ring(buf: &[u8], pos: usize, capacity: usize) -> u32 {
    let mut bytes = [0u8; 4];
    for (i, slot) in bytes.iter_mut().enumerate() {
        *slot = buf[(pos + i) % capacity];
    }
    u32::from_le_bytes(bytes)
}
