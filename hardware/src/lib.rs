pub mod macro_engine;
pub mod models;
pub mod rom_loader;

pub use macro_engine::{MacroEngine, MacroError, MacroScriptSettings, MacroTarget};
pub use models::{lookup as lookup_model, MODELS};
pub use rom_loader::{load_calc, LoadError};
