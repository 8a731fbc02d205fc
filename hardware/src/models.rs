//! Per-model `HardwareDescriptor` tables for the TI-73/76/81/82/83/83+/84+
//! family named in §1. Non-banked models (73/76/81/82/83) map logical
//! addresses 1:1 onto `CalcState::mem` via [`calc_core::mapper::map_flat`];
//! banked models (83+/84+) page two 16K windows via
//! [`calc_core::mapper::map_paged`] (see DESIGN.md for the paging layout
//! decision).

use calc_core::calc::{CalcState, HardwareDescriptor};
use calc_core::mapper::{map_flat, map_paged};

/// Key layout shared by every model in the family: the printed ALPHA legends
/// (§4.5's letter table) are identical across these calculators, so one
/// matrix serves all of them. Index = `group * 8 + bit_index`; unused slots
/// (groups 7+ and any bit the real keyboard doesn't wire) are `""`.
///
/// `key_names[5]` (group 0, bit 5) is `ENTER` and `key_names[0]` is `ON` to
/// match the §8 scenario 5 fixture (`key ENTER` presses key code `0x05`) and
/// `CalcState`'s hardwired ON-key NMI source (group 0, bit 0).
const KEY_NAMES: [&str; 64] = {
    let mut names = [""; 64];
    names[0x00] = "ON";
    names[0x01] = "DOWN";
    names[0x02] = "LEFT";
    names[0x03] = "RIGHT";
    names[0x04] = "UP";
    names[0x05] = "ENTER";
    names[0x06] = "PLUS";
    names[0x07] = "SUB";

    names[0x08] = "MUL";
    names[0x09] = "DIV";
    names[0x0A] = "POWER";
    names[0x0B] = "CLEAR";
    names[0x0C] = "LOG";
    names[0x0D] = "7";
    names[0x0E] = "8";
    names[0x0F] = "9";

    names[0x10] = "RECIP";
    names[0x11] = "SIN";
    names[0x12] = "COS";
    names[0x13] = "TAN";
    names[0x14] = "SQUARE";
    names[0x15] = "COMMA";
    names[0x16] = "LPAREN";
    names[0x17] = "RPAREN";

    names[0x18] = "DOT";
    names[0x19] = "4";
    names[0x1A] = "5";
    names[0x1B] = "6";
    names[0x1C] = "LN";
    names[0x1D] = "STORE";
    names[0x1E] = "1";
    names[0x1F] = "2";

    names[0x20] = "0";
    names[0x21] = "3";
    names[0x22] = "NEGATE";
    names[0x23] = "MATH";
    names[0x24] = "MATRIX";
    names[0x25] = "PRGM";
    names[0x26] = "VARS";
    names[0x27] = "STAT";

    names[0x28] = "DEL";
    names[0x29] = "ALPHA";
    names[0x2A] = "GRAPH";
    names[0x2B] = "TABLE";
    names[0x2C] = "YEQU";
    names[0x2D] = "WINDOW";
    names[0x2E] = "ZOOM";
    names[0x2F] = "TRACE";

    names[0x30] = "SECOND";
    names[0x31] = "MODE";
    names[0x32] = "APPS";
    names[0x33] = "XTTHETAN";

    names
};

fn flat_ltop(_calc: &CalcState, logical: u16) -> u32 {
    map_flat(logical)
}

fn paged_ltop(calc: &CalcState, logical: u16) -> u32 {
    map_paged(logical, calc.banks, calc.hw.rom_size, calc.hw.ram_size, calc.hw.ram_page_mask)
}

/// Non-banked model: ROM occupies the low half of the logical/physical
/// space, RAM the high half, so `map_flat`'s identity mapping lands every
/// RAM address in `[rom_size, rom_size+ram_size)` by construction.
const fn non_banked(model_id: &'static str, ram_size: u32, lcd_width: u16, lcd_height: u16) -> HardwareDescriptor {
    HardwareDescriptor {
        model_id,
        rom_size: 0x8000,
        ram_size,
        lcd_mem_size: 0x400,
        ram_page_mask: 0,
        lcd_width,
        lcd_height,
        key_names: KEY_NAMES,
        mem_ltop: flat_ltop,
        clock_hz: 6_000_000,
    }
}

const fn banked(model_id: &'static str, rom_size: u32, ram_size: u32, ram_page_mask: u8, clock_hz: u32) -> HardwareDescriptor {
    HardwareDescriptor {
        model_id,
        rom_size,
        ram_size,
        lcd_mem_size: 0x400,
        ram_page_mask,
        lcd_width: 96,
        lcd_height: 64,
        key_names: KEY_NAMES,
        mem_ltop: paged_ltop,
        clock_hz,
    }
}

static TI73: HardwareDescriptor = non_banked("TI73", 0x8000, 96, 64);
static TI76: HardwareDescriptor = non_banked("TI76", 0x8000, 96, 64);
static TI81: HardwareDescriptor = non_banked("TI81", 0x8000, 96, 64);
static TI82: HardwareDescriptor = non_banked("TI82", 0x8000, 96, 64);
static TI83: HardwareDescriptor = non_banked("TI83", 0x8000, 96, 64);
// 512K ROM / 32K RAM, 3-bit RAM page (matches the 83+'s four 8K RAM pages
// addressed through the single top bit + 2 low bits of the page register).
static TI83_PLUS: HardwareDescriptor = banked("TI83Plus", 0x80000, 0x8000, 0x03, 6_000_000);
// 2M ROM / 64K RAM, 4-bit RAM page; clocked faster than the base 83+.
static TI84_PLUS: HardwareDescriptor = banked("TI84Plus", 0x200000, 0x10000, 0x07, 15_000_000);

/// Every model named in §1, keyed by the name `--model` expects.
pub const MODELS: &[(&str, &HardwareDescriptor)] = &[
    ("TI73", &TI73),
    ("TI76", &TI76),
    ("TI81", &TI81),
    ("TI82", &TI82),
    ("TI83", &TI83),
    ("TI83Plus", &TI83_PLUS),
    ("TI84Plus", &TI84_PLUS),
];

/// Case-insensitive model lookup for `--model NAME` and the state-file's
/// `MODEL = NAME` line.
pub fn lookup(name: &str) -> Option<&'static HardwareDescriptor> {
    MODELS
        .iter()
        .find(|(id, _)| id.eq_ignore_ascii_case(name))
        .map(|(_, hw)| *hw)
}
