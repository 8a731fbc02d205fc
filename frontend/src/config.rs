//! Ambient configuration file: an optional `config.toml` supplying defaults
//! for `--model`/speed/trace-limit flags, read the way the teacher's
//! frontend persists skin/window settings, narrowed to headless-relevant
//! fields (§9: "global option state" lifted into an explicit struct rather
//! than process-wide variables). CLI flags always override these defaults.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub model: Option<String>,
    pub full_speed: Option<bool>,
    pub trace_limit: Option<u64>,
    pub trace_backtrace_limit: Option<usize>,
}

impl FileConfig {
    /// Reads `<config_dir>/calc-headless/config.toml`. A missing file is not
    /// an error — every field simply stays `None` and the CLI's own
    /// defaults apply. A present-but-malformed file prints a diagnostic and
    /// falls back to the same empty defaults rather than aborting the run;
    /// this config is a convenience layer, not a required input.
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                eprintln!("config: failed to read {}: {e}", path.display());
                return Self::default();
            }
        };
        toml::from_str(&text).unwrap_or_else(|e| {
            eprintln!("config: failed to parse {}: {e}", path.display());
            Self::default()
        })
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("calc-headless").join("config.toml"))
}
