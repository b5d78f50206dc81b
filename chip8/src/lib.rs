mod bytecode;
mod clock;
pub mod constants;
mod cpu;
mod devices;
mod disasm;
mod error;
mod gate;
mod scheduler;
mod vm;

pub use self::{
    bytecode::Opcode,
    devices::{Audio, Display, Headless, Input, KeyCode, KeyEvent},
    error::{Access, Chip8Error, Chip8Result},
    gate::ExecState,
    scheduler::{Scheduler, StopHandle},
    vm::{Flow, Hz},
};

/// Version of this interpreter implementation.
pub const IMPL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use super::{
        disasm::Disassembler,
        error::{Chip8Error, Chip8Result},
        scheduler::Scheduler,
        vm::{Chip8Conf, Chip8Vm, Flow},
    };
}
