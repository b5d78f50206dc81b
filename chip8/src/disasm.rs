//! Disassembler.
use std::fmt::{self, Write as FmtWrite};

use crate::{bytecode::Opcode, constants::MEM_START};

pub struct Disassembler<'a> {
    bytecode: &'a [u8],
    /// Address the first byte is loaded at.
    origin: usize,
}

impl<'a> Disassembler<'a> {
    /// Disassembler for a program loaded at the usual start of memory.
    pub fn new(bytecode: &'a [u8]) -> Self {
        Self {
            bytecode,
            origin: MEM_START,
        }
    }

    /// Iterate the address and instruction of each 2-byte word.
    ///
    /// A trailing odd byte is padded with zero.
    pub fn instructions(&self) -> impl Iterator<Item = (usize, Opcode)> + 'a {
        let origin = self.origin;
        self.bytecode.chunks(2).enumerate().map(move |(i, pair)| {
            let b = pair.get(1).copied().unwrap_or(0);
            (origin + i * 2, Opcode(u16::from_be_bytes([pair[0], b])))
        })
    }

    /// Write the whole listing, one instruction per line.
    pub fn disassemble<W: FmtWrite>(&self, w: &mut W) -> fmt::Result {
        for (address, op) in self.instructions() {
            writeln!(w, "0x{address:04X} {:04X}  {op}", op.code())?;
        }
        Ok(())
    }

    pub fn print_bytecode(&self) -> fmt::Result {
        let mut s = String::new();
        self.disassemble(&mut s)?;
        print!("{s}");
        Ok(())
    }
}
