//! ROM and state-file loading for `load_calc` (§3 `CalcState` lifecycle,
//! §6 "State file").
//!
//! Grounded on the teacher's `RomLoadError` idiom (hand-rolled enum, manual
//! `Display`/`Error`/`From<io::Error>`) but restructured for this domain:
//! calculator ROMs are a single flat file rather than a MAME-style set of
//! named regions, so the teacher's `RomSet`/`RomRegion`/`RomEntry` machinery
//! has no counterpart here and was dropped (see DESIGN.md).

use std::fs;
use std::path::{Path, PathBuf};

use calc_core::calc::{CalcState, HardwareDescriptor};

use crate::models;

#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    NoRom,
    UnknownModel(String),
    BadFormat(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::NoRom => write!(f, "no ROM file given"),
            Self::UnknownModel(name) => write!(f, "unknown calculator model: {name}"),
            Self::BadFormat(msg) => write!(f, "malformed state file: {msg}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Resolves the state-file path for a ROM, absent an explicit `--state-file`:
/// the ROM's path with its extension replaced by `.sav`.
pub fn default_state_file(rom_path: &Path) -> PathBuf {
    rom_path.with_extension("sav")
}

/// Reads the `MODEL = NAME` placeholder line a prior run left behind, if
/// any. Returns `Ok(None)` if the file does not exist; a malformed existing
/// file is a `BadFormat` error rather than silently falling through, since a
/// present-but-unreadable state file most likely indicates a real save the
/// caller should not clobber.
fn read_model_from_state_file(path: &Path) -> Result<Option<String>, LoadError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let first_line = contents.lines().next().unwrap_or("");
    let mut parts = first_line.splitn(2, '=');
    let key = parts.next().unwrap_or("").trim();
    let value = parts.next();
    match (key, value) {
        ("MODEL", Some(name)) => Ok(Some(name.trim().to_string())),
        _ => Err(LoadError::BadFormat(format!("expected 'MODEL = NAME', got {first_line:?}"))),
    }
}

/// Writes the one-line `MODEL = NAME\n` placeholder (§6) when no state file
/// is present yet, so a subsequent run without `--model` can recover it.
fn write_placeholder_state_file(path: &Path, model_id: &str) -> Result<(), LoadError> {
    fs::write(path, format!("MODEL = {model_id}\n"))?;
    Ok(())
}

/// Loads a ROM file into a freshly constructed `CalcState`, resolving the
/// hardware model from `--model` if given, else from an existing state
/// file's `MODEL = NAME` line. If no state file exists yet, writes the
/// placeholder (§6); full state restoration is left to the external
/// save/load collaborator named in §6 — this function only seeds `CalcState`
/// from the ROM image.
pub fn load_calc(
    rom_path: &Path,
    state_file: Option<&Path>,
    model: Option<&str>,
) -> Result<(CalcState, &'static HardwareDescriptor), LoadError> {
    let rom = fs::read(rom_path)?;
    if rom.is_empty() {
        return Err(LoadError::NoRom);
    }

    let state_path = state_file.map(Path::to_path_buf).unwrap_or_else(|| default_state_file(rom_path));
    let existing_model = read_model_from_state_file(&state_path)?;
    let model_name = model
        .map(str::to_string)
        .or(existing_model)
        .ok_or_else(|| LoadError::UnknownModel("(none given; pass --model)".to_string()))?;

    let hw = models::lookup(&model_name).ok_or_else(|| LoadError::UnknownModel(model_name.clone()))?;

    if !state_path.exists() {
        write_placeholder_state_file(&state_path, hw.model_id)?;
    }

    let mut calc = CalcState::new(hw);
    calc.load_rom(&rom);
    calc.reset();
    Ok((calc, hw))
}
