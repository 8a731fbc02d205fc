//! Macro scripting language (§4.5): a small line-oriented script that drives
//! the virtual keypad with deterministic hold/delay semantics.

use calc_core::calc::HardwareDescriptor;

#[derive(Debug)]
pub struct MacroError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for MacroError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "macro line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for MacroError {}

impl MacroError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self { line, message: message.into() }
    }
}

/// Current `key_hold`/`key_delay`, mutable via `set key_hold T` / `set
/// key_delay T`. Defaults match the §8 scenario 5 fixture (`key ENTER`'s
/// default hold is 0.05s).
#[derive(Clone, Copy, Debug)]
pub struct MacroScriptSettings {
    pub key_hold: f64,
    pub key_delay: f64,
}

impl Default for MacroScriptSettings {
    fn default() -> Self {
        Self { key_hold: 0.05, key_delay: 0.05 }
    }
}

/// The key-input/time-advance interface the macro engine drives. Implemented
/// by `calc-headless`'s `EmulatorDriver` over a locked `CalcState` + Z80
/// Engine; kept as a trait here so this crate does not need to depend on the
/// engine's run loop directly.
pub trait MacroTarget {
    fn press_key(&mut self, group: usize, bit: u8);
    fn release_key(&mut self, group: usize, bit: u8);
    /// Advances virtual time by `seconds`, running the Z80 engine in chunks
    /// as needed (§5: `advance_time` is the macro engine's only way to make
    /// the ROM observe the passage of time).
    fn advance_time(&mut self, seconds: f64);
}

/// Case-insensitive key name resolution, including the aliases §4.5 names.
/// Returns `(group, bit_mask)` ready for `MacroTarget::press_key`.
fn resolve_key(hw: &HardwareDescriptor, name: &str) -> Option<(usize, u8)> {
    let upper = name.to_ascii_uppercase();
    let canonical = match upper.as_str() {
        "RETURN" => "ENTER",
        "2ND" => "SECOND",
        "ADD" => "PLUS",
        "MINUS" => "SUB",
        "MULTIPLY" | "TIMES" => "MUL",
        "DIVIDE" => "DIV",
        "Y=" => "YEQU",
        other => other,
    };
    hw.key_names
        .iter()
        .position(|n| n.eq_ignore_ascii_case(canonical))
        .map(|idx| (idx / 8, 1u8 << (idx % 8)))
}

/// Letter→key table for `type`'s ALPHA-prefixed characters (§4.5), matching
/// the calculator's printed ALPHA legends.
fn letter_key_name(c: char) -> Option<&'static str> {
    Some(match c.to_ascii_uppercase() {
        'A' => "MATH",
        'B' => "MATRIX",
        'C' => "PRGM",
        'D' => "VARS",
        'E' => "POWER",
        'F' => "RECIP",
        'G' => "SIN",
        'H' => "COS",
        'I' => "TAN",
        'J' => "SQUARE",
        'K' => "COMMA",
        'L' => "LPAREN",
        'M' => "RPAREN",
        'N' => "DIV",
        'O' => "LOG",
        'P' => "7",
        'Q' => "8",
        'R' => "9",
        'S' => "MUL",
        'T' => "LN",
        'U' => "4",
        'V' => "5",
        'W' => "6",
        'X' => "SUB",
        'Y' => "1",
        'Z' => "2",
        _ => return None,
    })
}

fn digit_key_name(c: char) -> Option<&'static str> {
    Some(match c {
        '0' => "0",
        '1' => "1",
        '2' => "2",
        '3' => "3",
        '4' => "4",
        '5' => "5",
        '6' => "6",
        '7' => "7",
        '8' => "8",
        '9' => "9",
        _ => return None,
    })
}

fn punctuation_key_name(c: char) -> Option<&'static str> {
    Some(match c {
        '.' => "DOT",
        ',' => "COMMA",
        '+' => "PLUS",
        '-' => "SUB",
        '*' => "MUL",
        '/' => "DIV",
        '(' => "LPAREN",
        ')' => "RPAREN",
        '^' => "POWER",
        _ => return None,
    })
}

pub struct MacroEngine {
    pub settings: MacroScriptSettings,
}

impl MacroEngine {
    pub fn new() -> Self {
        Self { settings: MacroScriptSettings::default() }
    }

    /// Runs every line of `script` against `target`. The first failing line
    /// aborts with a line-number-tagged error; any keys left pressed by a
    /// `press` command with no matching `release` are released first (§7).
    pub fn run(&mut self, script: &str, hw: &HardwareDescriptor, target: &mut dyn MacroTarget) -> Result<(), MacroError> {
        let mut held: Vec<(usize, u8)> = Vec::new();
        let result = self.run_inner(script, hw, target, &mut held);
        if result.is_err() {
            for (group, bit) in held.drain(..) {
                target.release_key(group, bit);
            }
        }
        result
    }

    fn run_inner(
        &mut self,
        script: &str,
        hw: &HardwareDescriptor,
        target: &mut dyn MacroTarget,
        held: &mut Vec<(usize, u8)>,
    ) -> Result<(), MacroError> {
        for (lineno, raw_line) in script.lines().enumerate() {
            let line_no = lineno + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            self.run_line(line_no, line, hw, target, held)?;
        }
        Ok(())
    }

    fn run_line(
        &mut self,
        line_no: usize,
        line: &str,
        hw: &HardwareDescriptor,
        target: &mut dyn MacroTarget,
        held: &mut Vec<(usize, u8)>,
    ) -> Result<(), MacroError> {
        let (command, rest) = split_first_token(line);
        match command.to_ascii_lowercase().as_str() {
            "wait" | "sleep" | "pause" => {
                let seconds = parse_duration(line_no, rest)?;
                target.advance_time(seconds);
            }
            "set" => {
                let (setting, value) = split_first_token(rest);
                let seconds = parse_duration(line_no, value)?;
                match setting.to_ascii_lowercase().as_str() {
                    "key_hold" => self.settings.key_hold = seconds,
                    "key_delay" => self.settings.key_delay = seconds,
                    other => return Err(MacroError::new(line_no, format!("unknown setting '{other}'"))),
                }
            }
            "key" => {
                let (name, tail) = split_first_token(rest);
                let hold = if tail.trim().is_empty() {
                    self.settings.key_hold
                } else {
                    let (kw, t) = split_first_token(tail);
                    if !kw.eq_ignore_ascii_case("hold") {
                        return Err(MacroError::new(line_no, format!("expected 'hold', got '{kw}'")));
                    }
                    parse_duration(line_no, t)?
                };
                let (group, bit) = resolve_key(hw, name).ok_or_else(|| MacroError::new(line_no, format!("unknown key '{name}'")))?;
                target.press_key(group, bit);
                target.advance_time(hold);
                target.release_key(group, bit);
            }
            "press" => {
                let (group, bit) = resolve_key(hw, rest.trim())
                    .ok_or_else(|| MacroError::new(line_no, format!("unknown key '{}'", rest.trim())))?;
                target.press_key(group, bit);
                held.push((group, bit));
            }
            "release" => {
                let (group, bit) = resolve_key(hw, rest.trim())
                    .ok_or_else(|| MacroError::new(line_no, format!("unknown key '{}'", rest.trim())))?;
                target.release_key(group, bit);
                held.retain(|&k| k != (group, bit));
            }
            "type" => {
                let text = parse_type_argument(rest);
                self.type_text(line_no, &text, hw, target)?;
            }
            other => return Err(MacroError::new(line_no, format!("unknown command '{other}'"))),
        }
        Ok(())
    }

    fn type_text(&mut self, line_no: usize, text: &str, hw: &HardwareDescriptor, target: &mut dyn MacroTarget) -> Result<(), MacroError> {
        let mut chars = text.chars().peekable();
        let mut first = true;
        while let Some(c) = chars.next() {
            if !first {
                target.advance_time(self.settings.key_delay);
            }
            first = false;

            if c == '\n' {
                self.tap(hw, target, "ENTER", line_no)?;
                continue;
            }
            if c.is_ascii_alphabetic() {
                let alpha = resolve_key(hw, "ALPHA").ok_or_else(|| MacroError::new(line_no, "ALPHA key not defined"))?;
                target.press_key(alpha.0, alpha.1);
                target.release_key(alpha.0, alpha.1);
                let name = letter_key_name(c).expect("is_ascii_alphabetic implies a letter mapping");
                self.tap(hw, target, name, line_no)?;
                continue;
            }
            if let Some(name) = digit_key_name(c) {
                self.tap(hw, target, name, line_no)?;
                continue;
            }
            if let Some(name) = punctuation_key_name(c) {
                self.tap(hw, target, name, line_no)?;
                continue;
            }
            return Err(MacroError::new(line_no, format!("no key mapping for character '{c}'")));
        }
        Ok(())
    }

    fn tap(&self, hw: &HardwareDescriptor, target: &mut dyn MacroTarget, name: &str, line_no: usize) -> Result<(), MacroError> {
        let (group, bit) = resolve_key(hw, name).ok_or_else(|| MacroError::new(line_no, format!("unknown key '{name}'")))?;
        target.press_key(group, bit);
        target.release_key(group, bit);
        Ok(())
    }
}

impl Default for MacroEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b'#' if !in_quotes => return &line[..i],
            b'/' if !in_quotes && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
        i += 1;
    }
    line
}

fn split_first_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], s[idx..].trim_start()),
        None => (s, ""),
    }
}

/// Parses `N`, `N s`, or `N ms` into seconds.
fn parse_duration(line_no: usize, s: &str) -> Result<f64, MacroError> {
    let s = s.trim();
    let (number, unit) = split_first_token(s);
    let value: f64 = number.parse().map_err(|_| MacroError::new(line_no, format!("invalid duration '{s}'")))?;
    match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" => Ok(value),
        "ms" => Ok(value / 1000.0),
        other => Err(MacroError::new(line_no, format!("invalid duration unit '{other}'"))),
    }
}

/// Strips a `"..."` quoted literal if present, else returns the rest of the
/// line verbatim (§4.5: `type TEXT` or `type "TEXT"`).
fn parse_type_argument(rest: &str) -> String {
    let trimmed = rest.trim();
    if let Some(stripped) = trimmed.strip_prefix('"')
        && let Some(end) = stripped.rfind('"')
    {
        return stripped[..end].to_string();
    }
    trimmed.to_string()
}
