//! Canonical calculator state: Z80 registers, flat memory, keypad latches,
//! the virtual clock, and the hardware descriptor that parameterizes all of
//! the above for a given model.

use crate::breakpoint::{mode, BreakpointKind, BreakpointTable, DispatchPhase, ExecContext};
use crate::core::bus::{Bus, BusMaster, InterruptState};
use crate::core::component::BusMasterComponent;
use crate::cpu::Cpu;
use crate::cpu::z80::Z80;
use crate::mapper::MemoryMapper;
use crate::trace::{RegSnapshot, TraceWriter};

/// Per-model constants. One `&'static HardwareDescriptor` is shared by every
/// `CalcState` created for that model; `calc-hardware` owns the concrete
/// tables (TI-73/76/81/82/83/83+/84+), this crate only defines the shape.
pub struct HardwareDescriptor {
    pub model_id: &'static str,
    pub rom_size: u32,
    pub ram_size: u32,
    pub lcd_mem_size: u32,
    pub ram_page_mask: u8,
    pub lcd_width: u16,
    pub lcd_height: u16,
    pub key_names: [&'static str; 64],
    pub mem_ltop: fn(&CalcState, u16) -> u32,
    /// Z80 clock rate in Hz, used by `engine::run_time` to convert the
    /// caller's microsecond budget into T-states. Not specified by name in
    /// the source description of these models; taken from the documented
    /// hardware clock of each calculator (see DESIGN.md).
    pub clock_hz: u32,
}

/// Active-low column scan keypad. Group selects which of up to 7 column
/// groups are being read; each bit of `keys_down[group]` is 1 while the
/// corresponding key is held.
#[derive(Clone, Copy, Debug, Default)]
pub struct Keypad {
    pub group: u8,
    pub keys_down: [u8; 7],
}

pub const KEYPAD_GROUP_PORT: u8 = 0x01;
pub const KEYPAD_READ_PORT: u8 = 0x01;
const ON_KEY_GROUP: usize = 0;
const ON_KEY_BIT: u8 = 0x01;

/// Canonical mutable calculator state. `CalcState` owns the breakpoint table
/// and the trace writer directly (rather than the source's cyclic
/// calc<->writer pointers and a sibling breakpoint structure under the same
/// lock) since Rust's borrow checker makes "one owner, everything else
/// borrows" the natural shape for what the source modeled with a shared
/// lock across separate objects — see DESIGN.md.
pub struct CalcState {
    pub hw: &'static HardwareDescriptor,
    pub mem: Vec<u8>,
    pub z80: Z80,
    pub keypad: Keypad,
    /// Paging registers for banked models: window 0 (0x4000-0x7FFF) and
    /// window 1 (0x8000-0xBFFF). Ignored by non-banked descriptors.
    pub banks: [u8; 2],
    pub clock: u64,
    pub trace: Option<TraceWriter>,
    pub breakpoints: BreakpointTable,
    halt_requested: bool,
}

impl CalcState {
    pub fn new(hw: &'static HardwareDescriptor) -> Self {
        let total = hw.rom_size + hw.ram_size + hw.lcd_mem_size;
        Self {
            hw,
            mem: vec![0u8; total as usize],
            z80: Z80::new(),
            keypad: Keypad::default(),
            banks: [0, 0],
            clock: 0,
            trace: None,
            breakpoints: BreakpointTable::new(),
            halt_requested: false,
        }
    }

    pub fn load_rom(&mut self, rom: &[u8]) {
        let n = rom.len().min(self.hw.rom_size as usize);
        self.mem[..n].copy_from_slice(&rom[..n]);
    }

    pub fn reset(&mut self) {
        self.z80.reset();
        self.banks = [0, 0];
        self.keypad = Keypad::default();
        self.clock = 0;
        self.halt_requested = false;
    }

    pub fn press_key(&mut self, group: usize, bit: u8) {
        self.keypad.keys_down[group] |= bit;
        self.nudge_rom();
        self.trace_key_event(true, ((group as u8) << 3) | bit.trailing_zeros() as u8);
    }

    pub fn release_key(&mut self, group: usize, bit: u8) {
        self.keypad.keys_down[group] &= !bit;
        self.nudge_rom();
        self.trace_key_event(false, ((group as u8) << 3) | bit.trailing_zeros() as u8);
    }

    /// Takes `self.trace` out for the duration of the call so it can observe
    /// `self` (as a `MemoryMapper`) without aliasing `self.trace` itself,
    /// then restores it — the source's trace hook takes the calc pointer by
    /// value for the same reason.
    fn trace_key_event(&mut self, pressed: bool, key: u8) {
        if let Some(mut trace) = self.trace.take() {
            trace.key_event(self, pressed, key, self.clock as u32, self.z80.pc);
            self.trace = Some(trace);
        }
    }

    fn trace_mem_write(&mut self, addr: u32, value: u8) {
        if let Some(mut trace) = self.trace.take() {
            trace.mem_write(self, addr, value);
            self.trace = Some(trace);
        }
    }

    /// Called by `engine::run_time` at each instruction boundary, before the
    /// instruction executes.
    pub fn trace_instr(&mut self, pc: u16, opcode: u8) {
        if let Some(mut trace) = self.trace.take() {
            let regs = self.snapshot_regs();
            trace.instr(self, pc, opcode, self.clock as u32, &regs);
            self.trace = Some(trace);
        }
    }

    pub fn snapshot_regs(&self) -> RegSnapshot {
        let z = &self.z80;
        RegSnapshot {
            af: z.get_af(),
            bc: z.get_bc(),
            de: z.get_de(),
            hl: z.get_hl(),
            ix: z.ix,
            iy: z.iy,
            sp: z.sp,
            pc: z.pc,
            ir: ((z.i as u16) << 8) | z.r as u16,
            wz: z.memptr,
            wz_prime: 0,
            af_prime: ((z.a_prime as u16) << 8) | z.f_prime as u16,
            bc_prime: ((z.b_prime as u16) << 8) | z.c_prime as u16,
            de_prime: ((z.d_prime as u16) << 8) | z.e_prime as u16,
            hl_prime: ((z.h_prime as u16) << 8) | z.l_prime as u16,
            iff1: z.iff1,
            iff2: z.iff2,
            im: z.im,
            r7: z.r & 0x7F,
            halted: z.halted,
        }
    }

    /// Advances the clock by one tick so the ROM's next keypad poll (or
    /// interrupt handler) can observe the edge, per §4.5's "advances the
    /// Z80 by a small fixed quantum" requirement.
    fn nudge_rom(&mut self) {
        self.clock = self.clock.wrapping_add(1);
    }

    /// Takes and clears the breakpoint-halt flag raised synchronously
    /// during the last memory access. Consumed by `engine::run_time`.
    pub fn take_halt_request(&mut self) -> bool {
        std::mem::replace(&mut self.halt_requested, false)
    }

    pub fn exec_context(&self, opcode: u8) -> ExecContext {
        let ints = self.check_interrupts(BusMaster::Cpu(0));
        ExecContext {
            pc: self.z80.pc,
            opcode,
            opcode2: 0,
            sp: self.z80.sp,
            flags: self.z80.f,
            iff1: self.z80.iff1,
            interrupt_pending: ints.nmi || ints.irq,
        }
    }

    fn physical_in_rom(&self, physical: u32) -> bool {
        physical < self.hw.rom_size
    }

    fn physical_in_ram(&self, physical: u32) -> bool {
        physical >= self.hw.rom_size && physical < self.hw.rom_size + self.hw.ram_size
    }

    /// Executes one Z80 clock cycle. The CPU lives inside the same struct
    /// that implements `Bus`, so a raw pointer aliases `self` as the bus for
    /// the duration of the call — the same trick the teacher's
    /// `SimpleZ80System::tick` uses for the identical shape.
    pub fn tick(&mut self) -> bool {
        let bus_ptr: *mut Self = self;
        let boundary = unsafe {
            let bus = &mut *bus_ptr as &mut dyn Bus<Address = u16, Data = u8>;
            self.z80.tick_with_bus(bus, BusMaster::Cpu(0))
        };
        self.clock = self.clock.wrapping_add(1);
        boundary
    }
}

impl MemoryMapper for CalcState {
    fn logical_to_physical(&self, addr: u16) -> u32 {
        (self.hw.mem_ltop)(self, addr)
    }

    fn read_byte_physical(&self, addr: u32) -> u8 {
        if addr >= self.hw.rom_size + self.hw.ram_size {
            return 0;
        }
        self.mem.get(addr as usize).copied().unwrap_or(0)
    }
}

impl Bus for CalcState {
    type Address = u16;
    type Data = u8;

    fn read(&mut self, _master: BusMaster, addr: u16) -> u8 {
        let physical = self.logical_to_physical(addr);
        let value = self.read_byte_physical(physical);
        let ctx = ExecContext { pc: self.z80.pc, sp: self.z80.sp, flags: self.z80.f, iff1: self.z80.iff1, opcode: 0, opcode2: 0, interrupt_pending: false };
        let halt = self.breakpoints.dispatch(BreakpointKind::Logical, mode::READ, addr as u32, DispatchPhase::PreExecute, &ctx)
            | self.breakpoints.dispatch(BreakpointKind::Physical, mode::READ, physical, DispatchPhase::PreExecute, &ctx);
        if halt {
            self.halt_requested = true;
        }
        value
    }

    fn write(&mut self, _master: BusMaster, addr: u16, data: u8) {
        let physical = self.logical_to_physical(addr);
        if self.physical_in_ram(physical) {
            self.mem[physical as usize] = data;
        } else if !self.physical_in_rom(physical) {
            // Beyond rom+ram: LCD memory is not logically addressable on
            // these models (accessed only through the port handlers below);
            // a write reaching here through a mapper bug is simply dropped.
        }

        let ctx = ExecContext { pc: self.z80.pc, sp: self.z80.sp, flags: self.z80.f, iff1: self.z80.iff1, opcode: 0, opcode2: 0, interrupt_pending: false };
        let halt = self.breakpoints.dispatch(BreakpointKind::Logical, mode::WRITE, addr as u32, DispatchPhase::PreExecute, &ctx)
            | self.breakpoints.dispatch(BreakpointKind::Physical, mode::WRITE, physical, DispatchPhase::PreExecute, &ctx);
        if halt {
            self.halt_requested = true;
        }

        self.trace_mem_write(addr as u32, data);
    }

    fn io_read(&mut self, _master: BusMaster, addr: u16) -> u8 {
        let port = addr as u8;
        let value = if port == KEYPAD_READ_PORT {
            let mut result = 0xFFu8;
            for g in 0..7 {
                if self.keypad.group & (1 << g) == 0 {
                    result &= !self.keypad.keys_down[g];
                }
            }
            result
        } else {
            0xFF
        };
        let ctx = self.exec_context(0);
        if self.breakpoints.dispatch(BreakpointKind::Port, mode::READ, port as u32, DispatchPhase::PreExecute, &ctx) {
            self.halt_requested = true;
        }
        value
    }

    fn io_write(&mut self, _master: BusMaster, addr: u16, data: u8) {
        let port = addr as u8;
        match port {
            KEYPAD_GROUP_PORT => self.keypad.group = data,
            0x06 => self.banks[0] = data,
            0x07 => self.banks[1] = data,
            _ => {}
        }
        let ctx = self.exec_context(0);
        if self.breakpoints.dispatch(BreakpointKind::Port, mode::WRITE, port as u32, DispatchPhase::PreExecute, &ctx) {
            self.halt_requested = true;
        }
    }

    fn is_halted_for(&self, _master: BusMaster) -> bool {
        self.z80.is_sleeping()
    }

    fn check_interrupts(&self, _target: BusMaster) -> InterruptState {
        let on_key_down = self.keypad.keys_down[ON_KEY_GROUP] & ON_KEY_BIT != 0;
        InterruptState { nmi: on_key_down, irq: false, irq_vector: 0 }
    }
}
