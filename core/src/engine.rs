//! The Z80 Engine: drives `CalcState` through whole instructions, firing the
//! trace and breakpoint hooks at each instruction boundary, and the
//! step/step-over/finish helpers built on top of a single transient Execute
//! breakpoint (see `breakpoint::Condition`).

use crate::breakpoint::{mode, BreakpointKind, Condition, DispatchPhase, ExecContext};
use crate::calc::CalcState;
use crate::mapper::MemoryMapper;

/// Runs whole instructions until the virtual clock has advanced by at least
/// `usec_budget`, or an Execute/Opcode breakpoint halts the run early.
/// Returns the under-run microseconds (0 unless a breakpoint fired before
/// the budget was spent).
///
/// Memory Write/Read/Port breakpoints are evaluated inline as the CPU
/// accesses the bus (`CalcState::read`/`write`/`io_read`/`io_write`) and
/// surface here via `take_halt_request`; Execute/Opcode breakpoints and the
/// trace's `instr` record are evaluated once per instruction, right here,
/// before the instruction's first tick. `Finish` is the one exception
/// (spec.md §4.3: "the just-executed opcode"): it is dispatched again after
/// the instruction retires, against the opcode/sp/flags that instruction
/// left behind, not the next one about to be fetched.
pub fn run_time(calc: &mut CalcState, usec_budget: u64) -> u64 {
    let cycles_budget = usec_to_cycles(calc.hw.clock_hz, usec_budget);
    let start_clock = calc.clock;

    loop {
        if calc.clock.wrapping_sub(start_clock) >= cycles_budget {
            break;
        }

        let pc = calc.z80.pc;
        let opcode = calc.read_byte_logical(pc);
        calc.trace_instr(pc, opcode);
        // Peeked now (before the instruction runs) so self-modifying code
        // cannot change what `is_return_opcode` sees for this instruction.
        let opcode2 = if opcode == 0xED { calc.read_byte_logical(pc.wrapping_add(1)) } else { 0 };

        let ctx = calc.exec_context(opcode);
        let halted_before_running = calc.breakpoints.dispatch(BreakpointKind::Logical, mode::EXECUTE, pc as u32, DispatchPhase::PreExecute, &ctx)
            | calc.breakpoints.dispatch(BreakpointKind::Opcode, mode::EXECUTE, opcode as u32, DispatchPhase::PreExecute, &ctx);
        if halted_before_running {
            break;
        }

        loop {
            let boundary = calc.tick();
            if calc.take_halt_request() {
                return usec_budget.saturating_sub(cycles_to_usec(calc.hw.clock_hz, calc.clock.wrapping_sub(start_clock)));
            }
            if boundary {
                break;
            }
        }

        let post_ctx = ExecContext {
            pc,
            opcode,
            opcode2,
            sp: calc.z80.sp,
            flags: calc.z80.f,
            iff1: calc.z80.iff1,
            interrupt_pending: false,
        };
        if calc.breakpoints.dispatch(BreakpointKind::Logical, mode::EXECUTE, pc as u32, DispatchPhase::PostExecute, &post_ctx) {
            break;
        }
    }

    let elapsed = calc.clock.wrapping_sub(start_clock);
    usec_budget.saturating_sub(cycles_to_usec(calc.hw.clock_hz, elapsed))
}

fn usec_to_cycles(clock_hz: u32, usec: u64) -> u64 {
    (usec * clock_hz as u64) / 1_000_000
}

fn cycles_to_usec(clock_hz: u32, cycles: u64) -> u64 {
    (cycles * 1_000_000) / clock_hz.max(1) as u64
}

/// Arms a step breakpoint covering every logical address: fires on the very
/// next instruction fetch unless it is a HALT parked on a masked interrupt.
/// Returns the breakpoint id; the caller removes it after `run_time` returns.
pub fn step(calc: &mut CalcState) -> u32 {
    calc.breakpoints.add(BreakpointKind::Logical, mode::EXECUTE, 0x0000, 0xFFFF, 0xFFFF, Condition::ExecStep)
}

/// Arms a step-over breakpoint. The break address is resolved once, here,
/// by peeking the current opcode's operand bytes and registers — never by
/// retargeting the breakpoint while the engine runs:
/// - CALL/RST (and their conditional forms): the post-instruction address,
///   per the CALL scenario in the test suite (the called routine runs to
///   completion and returns).
/// - JP nn / JR e and their conditional forms: the literal jump target if
///   the condition (evaluated against the *current* flags, which cannot
///   change before this instruction executes) would be taken, otherwise
///   the post-instruction address.
/// - RET / RET cc: the return address peeked off the stack, following the
///   same current-flags rule for the conditional forms.
/// - JP (HL)/(IX)/(IY): the register's current value — treated as a branch
///   per the indirect-jump design note, not as a fallthrough.
pub fn step_over(calc: &mut CalcState) -> u32 {
    let pc = calc.z80.pc;
    let opcode = calc.read_byte_logical(pc);
    let target = resolve_step_over_target(calc, pc, opcode);
    calc.breakpoints.add(
        BreakpointKind::Logical,
        mode::EXECUTE,
        target as u32,
        target as u32,
        0xFFFF,
        Condition::ExecStepOver { next_addr: target },
    )
}

/// Arms a finish breakpoint covering every logical address: fires once the
/// stack has unwound past `entry_sp` on a return-shaped opcode.
pub fn finish(calc: &mut CalcState) -> u32 {
    let entry_sp = calc.z80.sp;
    calc.breakpoints.add(BreakpointKind::Logical, mode::EXECUTE, 0x0000, 0xFFFF, 0xFFFF, Condition::ExecFinish { entry_sp })
}

fn resolve_step_over_target(calc: &CalcState, pc: u16, opcode: u8) -> u16 {
    let fallthrough = next_instruction_addr(calc, pc);
    match opcode {
        // CALL nn, CALL cc,nn, RST p: always skip to the post-instruction address.
        0xCD => fallthrough,
        op if (op & 0xC7) == 0xC4 => fallthrough,
        op if (op & 0xC7) == 0xC7 => fallthrough,

        // JP nn, JR e: unconditional, literal operand.
        0xC3 => calc.read_word_logical(pc.wrapping_add(1)),
        0x18 => jr_target(calc, pc),

        // JP cc,nn / JR cc,e: literal operand if the flag predicate holds now.
        op if (op & 0xC7) == 0xC2 => {
            if condition_holds(cc_field(op), calc.z80.f) { calc.read_word_logical(pc.wrapping_add(1)) } else { fallthrough }
        }
        op if (op & 0xE7) == 0x20 => {
            if condition_holds(jr_cc_field(op), calc.z80.f) { jr_target(calc, pc) } else { fallthrough }
        }

        // RET: peek the return address off the stack.
        0xC9 => calc.read_word_logical(calc.z80.sp),
        op if (op & 0xC7) == 0xC0 => {
            if condition_holds((op >> 3) & 0x07, calc.z80.f) { calc.read_word_logical(calc.z80.sp) } else { fallthrough }
        }

        // JP (HL)/(IX)/(IY): the prefix selects the register; treated as a
        // branch to its current value, per the indirect-jump design note.
        0xE9 => indexed_register_value(calc, pc),
        0xDD | 0xFD if calc.read_byte_logical(pc.wrapping_add(1)) == 0xE9 => indexed_register_value(calc, pc),

        _ => fallthrough,
    }
}

fn jr_target(calc: &CalcState, pc: u16) -> u16 {
    let disp = calc.read_byte_logical(pc.wrapping_add(1)) as i8;
    pc.wrapping_add(2).wrapping_add(disp as i16 as u16)
}

fn indexed_register_value(calc: &CalcState, pc: u16) -> u16 {
    match calc.read_byte_logical(pc) {
        0xDD => calc.z80.ix,
        0xFD => calc.z80.iy,
        _ => calc.z80.get_hl(),
    }
}

fn cc_field(opcode: u8) -> u8 {
    (opcode >> 3) & 0x07
}

fn jr_cc_field(opcode: u8) -> u8 {
    // JR cc,e only encodes NZ/Z/NC/C at bits 3-4 (0x20/0x28/0x30/0x38).
    (opcode >> 3) & 0x03
}

fn condition_holds(cc: u8, flags: u8) -> bool {
    const FLAG_C: u8 = 0x01;
    const FLAG_PV: u8 = 0x04;
    const FLAG_Z: u8 = 0x40;
    const FLAG_S: u8 = 0x80;
    match cc {
        0 => flags & FLAG_Z == 0,
        1 => flags & FLAG_Z != 0,
        2 => flags & FLAG_C == 0,
        3 => flags & FLAG_C != 0,
        4 => flags & FLAG_PV == 0,
        5 => flags & FLAG_PV != 0,
        6 => flags & FLAG_S == 0,
        7 => flags & FLAG_S != 0,
        _ => unreachable!("condition field is 3 bits"),
    }
}

/// Given `pc`, returns the address of the instruction that follows —
/// the disassembly length hook the step-over logic needs (§9's
/// "external collaborator" disassembler is for the debugger UI; this is
/// the minimal internal table the core needs for itself). Falls back to
/// `pc + 1` if the computed length would not advance `pc` (defends against
/// the wraparound case called out in the design notes).
pub fn next_instruction_addr(calc: &CalcState, pc: u16) -> u16 {
    let len = instruction_length(calc, pc);
    let end = pc.wrapping_add(len as u16);
    if end <= pc {
        pc.wrapping_add(1)
    } else {
        end
    }
}

fn instruction_length(calc: &CalcState, pc: u16) -> u8 {
    match calc.read_byte_logical(pc) {
        0xCB => 2,
        0xED => {
            let op2 = calc.read_byte_logical(pc.wrapping_add(1));
            match op2 {
                0x43 | 0x4B | 0x53 | 0x5B | 0x63 | 0x6B | 0x73 | 0x7B => 4,
                _ => 2,
            }
        }
        0xDD | 0xFD => {
            let op2 = calc.read_byte_logical(pc.wrapping_add(1));
            if op2 == 0xCB {
                4
            } else {
                1 + base_length(op2) + if references_hl_indirect(op2) { 1 } else { 0 }
            }
        }
        op => base_length(op),
    }
}

fn base_length(op: u8) -> u8 {
    match op {
        0x01 | 0x11 | 0x21 | 0x31 => 3,
        0x22 | 0x2A | 0x32 | 0x3A => 3,
        0xC2 | 0xC3 | 0xC4 | 0xCA | 0xCC | 0xCD | 0xD2 | 0xD4 | 0xDA | 0xDC | 0xE2 | 0xE4 | 0xEA | 0xEC | 0xF2 | 0xF4 | 0xFA | 0xFC => 3,
        0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E | 0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE | 0x10 | 0x18 | 0x20
        | 0x28 | 0x30 | 0x38 | 0xD3 | 0xDB => 2,
        _ => 1,
    }
}

/// True for opcodes whose operand is `(HL)` in the unprefixed form — these
/// gain a displacement byte when reached through a DD/FD prefix (`(IX+d)`
/// / `(IY+d)`).
fn references_hl_indirect(op: u8) -> bool {
    match op {
        0x34 | 0x35 | 0x36 => true,
        0x76 => false, // HALT, not LD (HL),(HL)
        op if (op & 0xC0) == 0x40 && (op & 0x07 == 0x06 || (op >> 3) & 0x07 == 0x06) => true,
        op if (op & 0xC0) == 0x80 && (op & 0x07) == 0x06 => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::HardwareDescriptor;
    use crate::core::bus::{Bus, BusMaster};
    use crate::mapper::map_flat;

    fn flat_ltop(_calc: &CalcState, logical: u16) -> u32 {
        map_flat(logical)
    }

    fn test_descriptor() -> &'static HardwareDescriptor {
        Box::leak(Box::new(HardwareDescriptor {
            model_id: "TEST",
            rom_size: 0x8000,
            ram_size: 0x8000,
            lcd_mem_size: 0x400,
            ram_page_mask: 0,
            lcd_width: 96,
            lcd_height: 64,
            key_names: [""; 64],
            mem_ltop: flat_ltop,
            clock_hz: 1_000_000,
        }))
    }

    fn poke(calc: &mut CalcState, addr: u16, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            calc.write(BusMaster::Cpu(0), addr.wrapping_add(i as u16), b);
        }
    }

    #[test]
    fn step_over_call_breaks_at_post_instruction_address() {
        let mut calc = CalcState::new(test_descriptor());
        calc.z80.pc = 0x9000;
        poke(&mut calc, 0x9000, &[0xCD, 0x00, 0xA0]); // CALL 0xA000
        let id = step_over(&mut calc);
        let bp = calc.breakpoints.get_mut(id).unwrap();
        assert_eq!(bp.start, 0x9003);
        assert_eq!(bp.end, 0x9003);
    }

    #[test]
    fn step_over_unconditional_jr_targets_branch() {
        let mut calc = CalcState::new(test_descriptor());
        calc.z80.pc = 0x9000;
        poke(&mut calc, 0x9000, &[0x18, 0x05]); // JR +5
        let id = step_over(&mut calc);
        let bp = calc.breakpoints.get_mut(id).unwrap();
        assert_eq!(bp.start, 0x9007);
    }

    #[test]
    fn step_over_ret_peeks_stack() {
        let mut calc = CalcState::new(test_descriptor());
        calc.z80.pc = 0x9000;
        calc.z80.sp = 0xFF00;
        poke(&mut calc, 0x9000, &[0xC9]); // RET
        poke(&mut calc, 0xFF00, &[0x34, 0x12]); // return address 0x1234
        let id = step_over(&mut calc);
        let bp = calc.breakpoints.get_mut(id).unwrap();
        assert_eq!(bp.start, 0x1234);
    }

    #[test]
    fn run_time_halts_on_execute_breakpoint_before_running_it() {
        let mut calc = CalcState::new(test_descriptor());
        calc.z80.pc = 0x9000;
        poke(&mut calc, 0x9000, &[0x00, 0x00]); // two NOPs
        calc.breakpoints.add(BreakpointKind::Logical, mode::EXECUTE, 0x9000, 0x9000, 0xFFFF, Condition::AlwaysFire);
        let remainder = run_time(&mut calc, 1_000_000);
        assert_eq!(calc.z80.pc, 0x9000);
        assert_eq!(remainder, 1_000_000);
    }

    #[test]
    fn run_time_drains_budget_when_no_breakpoint_fires() {
        let mut calc = CalcState::new(test_descriptor());
        calc.z80.pc = 0x9000;
        poke(&mut calc, 0x9000, &[0x00; 16]); // a run of NOPs
        let remainder = run_time(&mut calc, 4);
        assert_eq!(remainder, 0);
        assert!(calc.z80.pc > 0x9000);
    }

    #[test]
    fn finish_halts_right_after_the_ret_that_unwinds_past_entry_sp() {
        let mut calc = CalcState::new(test_descriptor());
        // Already inside the callee: sp points at the return address CALL
        // pushed, pc is the callee's first instruction, a plain RET.
        calc.z80.sp = 0xFEFE;
        calc.z80.pc = 0x9010;
        poke(&mut calc, 0xFEFE, &[0x03, 0x90]); // return address 0x9003
        poke(&mut calc, 0x9010, &[0xC9]); // RET
        let id = finish(&mut calc);

        let remainder = run_time(&mut calc, 1_000_000);

        // Finish must fire on the instruction boundary right after the RET
        // retires, not on whatever opcode happens to sit at 0x9003.
        assert_eq!(calc.z80.pc, 0x9003);
        assert_eq!(calc.z80.sp, 0xFF00);
        assert!(remainder > 0);
        calc.breakpoints.remove(id);
    }

    #[test]
    fn finish_recognizes_retn_ending_an_interrupt_handler() {
        let mut calc = CalcState::new(test_descriptor());
        calc.z80.sp = 0xFEFE;
        calc.z80.pc = 0x9010;
        poke(&mut calc, 0xFEFE, &[0x03, 0x90]);
        poke(&mut calc, 0x9010, &[0xED, 0x45]); // RETN
        let id = finish(&mut calc);

        let remainder = run_time(&mut calc, 1_000_000);

        assert_eq!(calc.z80.pc, 0x9003);
        assert!(remainder > 0);
        calc.breakpoints.remove(id);
    }

    #[test]
    fn next_instruction_addr_handles_prefixed_forms() {
        let mut calc = CalcState::new(test_descriptor());
        poke(&mut calc, 0x9000, &[0xCB, 0x00]); // RLC B
        assert_eq!(next_instruction_addr(&calc, 0x9000), 0x9002);
        poke(&mut calc, 0x9010, &[0xDD, 0x36, 0x05, 0x10]); // LD (IX+5),0x10
        assert_eq!(next_instruction_addr(&calc, 0x9010), 0x9014);
    }
}
