//! Result and errors.
use std::fmt::{self, Display, Formatter};

pub type Chip8Result<T> = std::result::Result<T, Chip8Error>;

#[derive(Debug)]
pub enum Chip8Error {
    /// Instruction bits did not match any known operation.
    UnknownOpcode { opcode: u16, pc: usize },
    /// Program counter, address register or stack pointer left its storage.
    OutOfBounds {
        access: Access,
        address: usize,
        pc: usize,
    },
    /// Input source supplied a key index outside 0x0-0xF.
    InvalidKey(u8),
    /// Attempt to load a bytecode program that can't fit in memory.
    LargeProgram { size: usize },
    /// Configuration could not be read.
    Config(String),
    Io(std::io::Error),
    Fmt(fmt::Error),
}

/// The kind of storage access that went out of bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Instruction fetch at the program counter.
    Fetch,
    /// Memory read or write relative to the address register.
    Memory,
    /// Subroutine call with a full call stack.
    StackOverflow,
    /// Return with an empty call stack.
    StackUnderflow,
}

impl Chip8Error {
    /// Whether this error halts the interpreter.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownOpcode { .. } | Self::OutOfBounds { .. })
    }
}

impl Display for Chip8Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { opcode, pc } => {
                write!(f, "unknown opcode {opcode:04X} at {pc:04X}")
            }
            Self::OutOfBounds {
                access,
                address,
                pc,
            } => write!(
                f,
                "{access} out of bounds at address {address:04X}, instruction {pc:04X}"
            ),
            Self::InvalidKey(key) => write!(f, "invalid key index {key}, must be 0-15"),
            Self::LargeProgram { size } => write!(
                f,
                "program of {size} bytes too large for VM memory, limit is {}",
                crate::constants::MAX_PROGRAM_SIZE
            ),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Fmt(err) => write!(f, "{err}"),
        }
    }
}

impl Display for Access {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "instruction fetch"),
            Self::Memory => write!(f, "memory access"),
            Self::StackOverflow => write!(f, "call stack overflow"),
            Self::StackUnderflow => write!(f, "call stack underflow"),
        }
    }
}

impl std::error::Error for Chip8Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Fmt(err) => Some(err),
            _ => None,
        }
    }
}

impl From<fmt::Error> for Chip8Error {
    fn from(err: fmt::Error) -> Self {
        Chip8Error::Fmt(err)
    }
}

impl From<std::io::Error> for Chip8Error {
    fn from(err: std::io::Error) -> Self {
        Chip8Error::Io(err)
    }
}
