//! Breakpoint registration and dispatch.
//!
//! Conditions are modeled as a tagged enum rather than a boxed closure: the
//! source's C callbacks carry an opaque `void*` context, which Rust has no
//! need to reproduce. Step/step-over/finish are each one transient
//! `Execute` breakpoint whose `Condition` variant drives the engine.

/// Bit positions for `Breakpoint::mode`. A breakpoint may watch more than
/// one access kind at once (e.g. `READ | WRITE`).
pub mod mode {
    pub const EXECUTE: u8 = 1;
    pub const WRITE: u8 = 2;
    pub const READ: u8 = 4;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakpointKind {
    Logical,
    Physical,
    Port,
    Opcode,
}

/// What makes a breakpoint's condition fire, beyond the address/mode match
/// the table already performed. `AlwaysFire` is the default for
/// user-registered breakpoints; the other three back step/step-over/finish.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Condition {
    AlwaysFire,
    /// Fires on the very next instruction fetch, unless it is a HALT
    /// parked waiting on a masked interrupt (in which case the engine
    /// should keep running rather than stop on a spinning HALT).
    ExecStep,
    /// Always fires once dispatched. `next_addr` records the address this
    /// breakpoint was armed at for introspection; the table entry's own
    /// `start`/`end` (set by `engine::step_over`, which already resolved
    /// CALL/RST to their post-instruction address and everything else to
    /// the plain next-fetch address) is what actually gates when that
    /// happens.
    ExecStepOver { next_addr: u16 },
    /// Fires once the stack pointer has unwound past the frame that was
    /// active when `finish` was requested and the instruction that just
    /// retired was a RET/RETN/JP(HL)/JP(IX)/JP(IY) (or a conditional RET
    /// whose flag predicate held).
    ExecFinish { entry_sp: u16 },
}

/// One registered watch. `ids` holds the up-to-three engine handles created
/// when `mode` carries more than one bit — `set`/`unset` always act on the
/// logical breakpoint, not the individual per-mode handles.
#[derive(Clone, Debug)]
pub struct Breakpoint {
    pub id: u32,
    pub kind: BreakpointKind,
    pub mode: u8,
    pub start: u32,
    pub end: u32,
    pub mask: u32,
    pub disabled: bool,
    pub condition: Condition,
}

impl Breakpoint {
    fn matches(&self, kind: BreakpointKind, mode_bit: u8, addr: u32) -> bool {
        if self.disabled || self.kind != kind || self.mode & mode_bit == 0 {
            return false;
        }
        let masked = addr & self.mask;
        masked >= self.start && masked <= self.end
    }
}

/// Context passed to the engine's dispatch call: the minimal facts a
/// condition needs without borrowing `CalcState` (keeps the breakpoint
/// table's `&mut self` dispatch free of aliasing conflicts with the calc
/// state that owns it).
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecContext {
    pub pc: u16,
    pub opcode: u8,
    /// Second opcode byte when `opcode == 0xED` (0 otherwise); needed to
    /// recognize `RETN`/`RETI` for `ExecFinish` (see `is_return_opcode`).
    pub opcode2: u8,
    pub sp: u16,
    pub flags: u8,
    pub iff1: bool,
    pub interrupt_pending: bool,
}

/// Distinguishes when a dispatch call happens relative to the instruction
/// at the matched address: `PreExecute` gates whether that instruction runs
/// at all (user breakpoints, step, step-over), `PostExecute` inspects what
/// just retired (finish — spec.md §4.3 requires "the just-executed opcode",
/// which is only known once the instruction has run).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchPhase {
    PreExecute,
    PostExecute,
}

const FLAG_C: u8 = 0x01;
const FLAG_PV: u8 = 0x04;
const FLAG_Z: u8 = 0x40;
const FLAG_S: u8 = 0x80;

/// Registration table plus dispatch. One table is shared by the debugger
/// and the step/step-over/finish helpers; `CalcState` owns it so the Z80
/// Engine's bus callbacks can consult it without extra indirection.
#[derive(Default)]
pub struct BreakpointTable {
    entries: Vec<Breakpoint>,
    next_id: u32,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        kind: BreakpointKind,
        mode: u8,
        start: u32,
        end: u32,
        mask: u32,
        condition: Condition,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Breakpoint {
            id,
            kind,
            mode,
            start: start & mask,
            end: end & mask,
            mask,
            disabled: false,
            condition,
        });
        id
    }

    pub fn remove(&mut self, id: u32) {
        self.entries.retain(|bp| bp.id != id);
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Breakpoint> {
        self.entries.iter_mut().find(|bp| bp.id == id)
    }

    /// Toggles a single `Execute`-mode breakpoint at `addr` on logical
    /// addressing: adds it if absent, removes it if present. Two calls in a
    /// row are a no-op by construction.
    pub fn toggle_exec_bp(&mut self, addr: u16) {
        if let Some(bp) = self
            .entries
            .iter()
            .find(|bp| bp.kind == BreakpointKind::Logical && bp.mode == mode::EXECUTE && bp.start == addr as u32 && bp.end == addr as u32)
        {
            let id = bp.id;
            self.remove(id);
        } else {
            self.add(BreakpointKind::Logical, mode::EXECUTE, addr as u32, addr as u32, 0xFFFF, Condition::AlwaysFire);
        }
    }

    /// Dispatches every matching breakpoint for `kind`/`mode_bit` at `addr`
    /// whose condition is meaningful in `phase`. Returns true if any
    /// condition fired (the engine should halt).
    pub fn dispatch(&self, kind: BreakpointKind, mode_bit: u8, addr: u32, phase: DispatchPhase, ctx: &ExecContext) -> bool {
        let mut halt = false;
        for bp in &self.entries {
            if !bp.matches(kind, mode_bit, addr) {
                continue;
            }
            if Self::fires(&bp.condition, phase, ctx) {
                halt = true;
            }
        }
        halt
    }

    fn fires(condition: &Condition, phase: DispatchPhase, ctx: &ExecContext) -> bool {
        match (phase, condition) {
            (DispatchPhase::PreExecute, Condition::AlwaysFire) => true,
            (DispatchPhase::PreExecute, Condition::ExecStep) => {
                let halted_on_masked_int = ctx.opcode == 0x76 && !(ctx.interrupt_pending && ctx.iff1);
                !halted_on_masked_int
            }
            // Address matching already gated this dispatch to the single
            // address `engine::step_over` resolved before arming the
            // breakpoint (CALL/RST to their post-instruction address,
            // everything else to the plain next-fetch address).
            (DispatchPhase::PreExecute, Condition::ExecStepOver { .. }) => true,
            // Finish only makes sense once the candidate return instruction
            // has actually retired (spec.md §4.3): `ctx` here carries the
            // opcode that just executed and the post-execution sp/flags,
            // supplied by the engine's post-tick dispatch call.
            (DispatchPhase::PostExecute, Condition::ExecFinish { entry_sp }) => {
                ctx.sp > *entry_sp && is_return_opcode(ctx.opcode, ctx.opcode2, ctx.flags)
            }
            _ => false,
        }
    }
}

/// True for opcodes that complete a subroutine return: `RET`, `RET cc`
/// (conditional on `flags`), `JP (HL)`, and the `ED`-prefixed `RETN`/`RETI`
/// (`opcode2` is the second byte of an `ED`-prefixed instruction; ignored
/// otherwise). `RETN`/`RETI` matter here because these calculators' ON-key
/// NMI handler, like any Z80 ISR, returns via one of them rather than a
/// plain `RET`.
fn is_return_opcode(opcode: u8, opcode2: u8, flags: u8) -> bool {
    match opcode {
        0xC9 => true,       // RET
        0xE9 => true,       // JP (HL)
        0xED => matches!(opcode2, 0x45 | 0x4D), // RETN / RETI
        0xDD | 0xFD => false, // prefix byte alone never completes a return
        op if (op & 0xC7) == 0xC0 => {
            // RET cc — conditional return; decode the 3-bit condition field.
            let cc = (op >> 3) & 0x07;
            match cc {
                0 => flags & FLAG_Z == 0,
                1 => flags & FLAG_Z != 0,
                2 => flags & FLAG_C == 0,
                3 => flags & FLAG_C != 0,
                4 => flags & FLAG_PV == 0,
                5 => flags & FLAG_PV != 0,
                6 => flags & FLAG_S == 0,
                7 => flags & FLAG_S != 0,
                _ => unreachable!(),
            }
        }
        _ => false,
    }
}
