pub mod breakpoint;
pub mod calc;
pub mod core;
pub mod cpu;
pub mod engine;
pub mod mapper;
pub mod trace;

pub mod prelude {
    pub use crate::breakpoint::{mode, Breakpoint, BreakpointKind, BreakpointTable, Condition};
    pub use crate::calc::{CalcState, HardwareDescriptor, Keypad};
    pub use crate::core::{bus::InterruptState, Bus, BusMaster, BusMasterComponent, Component};
    pub use crate::cpu::Cpu;
    pub use crate::engine::run_time;
    pub use crate::mapper::MemoryMapper;
    pub use crate::trace::TraceWriter;
}
