//! Helpers for extracting data from opcodes.
use std::fmt::{self, Display, Formatter};

use crate::error::{Access, Chip8Error, Chip8Result};

/// A single 16-bit instruction word.
///
/// Instructions are stored big-endian, with the opcode identity in the
/// first 4-bit nibble and the operands packed into the remaining 12 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub u16);

impl Opcode {
    /// Read the instruction at the cursor.
    ///
    /// Fails when the instruction would extend past the end of the buffer.
    #[inline]
    pub fn fetch(bytecode: &[u8], cursor: usize) -> Chip8Result<Self> {
        match (bytecode.get(cursor), bytecode.get(cursor.wrapping_add(1))) {
            (Some(&a), Some(&b)) => Ok(Self(u16::from_be_bytes([a, b]))),
            _ => Err(Chip8Error::OutOfBounds {
                access: Access::Fetch,
                address: cursor,
                pc: cursor,
            }),
        }
    }

    /// The raw instruction word.
    #[inline(always)]
    pub fn code(self) -> u16 {
        self.0
    }

    /// Operation family identified by the first nibble.
    #[inline(always)]
    pub fn op(self) -> u8 {
        (self.0 >> 12) as u8
    }

    /// Operand X, the second nibble.
    #[inline(always)]
    pub fn x(self) -> u8 {
        ((self.0 >> 8) & 0xF) as u8
    }

    /// Operand Y, the third nibble.
    #[inline(always)]
    pub fn y(self) -> u8 {
        ((self.0 >> 4) & 0xF) as u8
    }

    /// Operand N, the last nibble.
    #[inline(always)]
    pub fn n(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    /// Operand NN, the lower byte.
    #[inline(always)]
    pub fn nn(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Operand NNN, the lower 12 bits.
    #[inline(always)]
    pub fn nnn(self) -> u16 {
        self.0 & 0xFFF
    }
}

impl From<u16> for Opcode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

/// Formats the instruction as an assembly mnemonic.
impl Display for Opcode {
    #[rustfmt::skip]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (x, y, n, nn, nnn) = (self.x(), self.y(), self.n(), self.nn(), self.nnn());

        match (self.op(), n, nn) {
            (0x0, _, _) if self.0 == 0x00E0 => write!(f, "CLS"),
            (0x0, _, _) if self.0 == 0x00EE => write!(f, "RET"),
            (0x1, _, _) => write!(f, "JP 0x{nnn:03X}"),
            (0x2, _, _) => write!(f, "CALL 0x{nnn:03X}"),
            (0x3, _, _) => write!(f, "SE V{x:X}, 0x{nn:02X}"),
            (0x4, _, _) => write!(f, "SNE V{x:X}, 0x{nn:02X}"),
            (0x5, _, _) => write!(f, "SE V{x:X}, V{y:X}"),
            (0x6, _, _) => write!(f, "LD V{x:X}, 0x{nn:02X}"),
            (0x7, _, _) => write!(f, "ADD V{x:X}, 0x{nn:02X}"),
            (0x8, 0x0, _) => write!(f, "LD V{x:X}, V{y:X}"),
            (0x8, 0x1, _) => write!(f, "OR V{x:X}, V{y:X}"),
            (0x8, 0x2, _) => write!(f, "AND V{x:X}, V{y:X}"),
            (0x8, 0x3, _) => write!(f, "XOR V{x:X}, V{y:X}"),
            (0x8, 0x4, _) => write!(f, "ADD V{x:X}, V{y:X}"),
            (0x8, 0x5, _) => write!(f, "SUB V{x:X}, V{y:X}"),
            (0x8, 0x6, _) => write!(f, "SHR V{x:X}"),
            (0x8, 0x7, _) => write!(f, "SUBN V{x:X}, V{y:X}"),
            (0x8, 0xE, _) => write!(f, "SHL V{x:X}"),
            (0x9, _, _) => write!(f, "SNE V{x:X}, V{y:X}"),
            (0xA, _, _) => write!(f, "LD I, 0x{nnn:03X}"),
            (0xB, _, _) => write!(f, "JP V0, 0x{nnn:03X}"),
            (0xC, _, _) => write!(f, "RND V{x:X}, 0x{nn:02X}"),
            (0xD, _, _) => write!(f, "DRW V{x:X}, V{y:X}, {n}"),
            (0xE, _, 0x9E) => write!(f, "SKP V{x:X}"),
            (0xE, _, 0xA1) => write!(f, "SKNP V{x:X}"),
            (0xF, _, 0x07) => write!(f, "LD V{x:X}, DT"),
            (0xF, _, 0x0A) => write!(f, "LD V{x:X}, K"),
            (0xF, _, 0x15) => write!(f, "LD DT, V{x:X}"),
            (0xF, _, 0x18) => write!(f, "LD ST, V{x:X}"),
            (0xF, _, 0x1E) => write!(f, "ADD I, V{x:X}"),
            (0xF, _, 0x29) => write!(f, "LD F, V{x:X}"),
            (0xF, _, 0x33) => write!(f, "LD B, V{x:X}"),
            (0xF, _, 0x55) => write!(f, "LD [I], V{x:X}"),
            (0xF, _, 0x65) => write!(f, "LD V{x:X}, [I]"),
            // Not an instruction, most likely sprite data.
            _ => write!(f, "DW 0x{:04X}", self.0),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_operand_fields() {
        let op = Opcode(0xD12F);
        assert_eq!(op.op(), 0xD);
        assert_eq!(op.x(), 0x1);
        assert_eq!(op.y(), 0x2);
        assert_eq!(op.n(), 0xF);
        assert_eq!(op.nn(), 0x2F);
        assert_eq!(op.nnn(), 0x12F);
    }

    #[test]
    fn test_fetch_big_endian() {
        let ram = [0x00, 0xA2, 0x3C, 0x00];
        assert_eq!(Opcode::fetch(&ram, 1).unwrap(), Opcode(0xA23C));
    }

    #[test]
    fn test_fetch_out_of_bounds() {
        let ram = [0x00, 0xE0, 0x12];
        assert!(Opcode::fetch(&ram, 0).is_ok());
        match Opcode::fetch(&ram, 2) {
            Err(Chip8Error::OutOfBounds {
                access: Access::Fetch,
                address: 2,
                ..
            }) => {}
            other => panic!("unexpected fetch result: {other:?}"),
        }
        assert!(Opcode::fetch(&ram, usize::MAX).is_err());
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(Opcode(0x00E0).to_string(), "CLS");
        assert_eq!(Opcode(0x00EE).to_string(), "RET");
        assert_eq!(Opcode(0x1234).to_string(), "JP 0x234");
        assert_eq!(Opcode(0x6A42).to_string(), "LD VA, 0x42");
        assert_eq!(Opcode(0x8126).to_string(), "SHR V1");
        assert_eq!(Opcode(0xD015).to_string(), "DRW V0, V1, 5");
        assert_eq!(Opcode(0xF30A).to_string(), "LD V3, K");
        assert_eq!(Opcode(0x8008).to_string(), "DW 0x8008");
    }
}
