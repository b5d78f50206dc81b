//! CPU and memory state.
use std::ops::Range;

use crate::{
    constants::*,
    devices::KeyCode,
    error::{Access, Chip8Error, Chip8Result},
    gate::ExecState,
};

/// Core state for a chip8 interpreter.
pub(crate) struct Chip8Cpu {
    // ------------------------------------------------------------------------
    // Registers
    /// Program counter pointing to the current position in the bytecode.
    pub(crate) pc: usize,
    /// Stack pointer, indicating the next free slot of the stack.
    pub(crate) sp: usize,
    /// General purpose registers for temporary values.
    ///
    /// Register 16 (VF) is used for either the carry flag or borrow switch depending on opcode.
    pub(crate) registers: [u8; REGISTER_COUNT],
    /// Pointer register used for temporarily storing an address.
    ///
    /// Only the lowest 12 bits address memory, but the register is 16 bits wide
    /// and `Fx1E` wraps at 16 bits.
    pub(crate) address: Address,
    /// (DT) Delay timer that counts down to 0.
    pub(crate) delay_timer: u8,
    /// (ST) Sound timer that counts down to 0. When it has a non-zero value, a beep is played.
    pub(crate) sound_timer: u8,
    /// Whether the machine is suspended on `Fx0A`.
    pub(crate) exec_state: ExecState,
    /// Keyboard input state. Pressed is a 1 bit, released is a 0 bit.
    pub(crate) key_state: u16,

    // ------------------------------------------------------------------------
    // Memory
    /// Main memory storage space.
    pub(crate) ram: Box<[u8; MEM_SIZE]>,
    /// Stack of return pointers used for jumping when a routine call finishes.
    pub(crate) stack: [Address; STACK_SIZE],
    /// Screen buffer that is drawn too.
    pub(crate) display: Box<Framebuffer>,
}

impl Default for Chip8Cpu {
    fn default() -> Self {
        Self {
            pc: MEM_START,
            sp: 0,
            registers: [0; REGISTER_COUNT],
            address: 0,
            delay_timer: 0,
            sound_timer: 0,
            exec_state: ExecState::Running,
            key_state: 0,

            ram: Box::new([0; MEM_SIZE]),
            stack: [0; STACK_SIZE],
            display: Box::new([false; DISPLAY_BUFFER_SIZE]),
        }
    }
}

impl Chip8Cpu {
    pub fn new() -> Self {
        Default::default()
    }

    /// Put every register and memory buffer back into its power-on state.
    pub(crate) fn reset(&mut self) {
        self.pc = MEM_START;
        self.sp = 0;
        self.registers = [0; REGISTER_COUNT];
        self.address = 0;
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.exec_state = ExecState::Running;
        self.key_state = 0;

        self.ram.fill(0);
        self.stack.fill(0);
        self.display.fill(false);
    }

    pub fn clear_display(&mut self) {
        self.display.fill(false);
    }

    pub fn set_key_state(&mut self, key: KeyCode, state: bool) {
        let key_id = key.as_u8();
        if state {
            self.key_state |= 1 << key_id;
        } else {
            self.key_state &= !(1 << key_id);
        }
    }

    /// Whether the key is pressed down.
    ///
    /// Indices outside the keypad are never pressed.
    pub fn key_state(&self, key_id: u8) -> bool {
        if key_id < KEY_COUNT {
            self.key_state & (1 << key_id) > 0
        } else {
            false
        }
    }

    /// Check whether any key is pressed down.
    #[inline(always)]
    pub fn any_key(&self) -> bool {
        self.key_state > 0
    }

    /// Count down the delay timer.
    #[inline]
    pub fn tick_delay(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
    }

    #[inline]
    pub fn tick_sound(&mut self) {
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    /// Push a return address onto the call stack.
    pub(crate) fn push(&mut self, address: Address, pc: usize) -> Chip8Result<()> {
        let slot = self
            .stack
            .get_mut(self.sp)
            .ok_or(Chip8Error::OutOfBounds {
                access: Access::StackOverflow,
                address: self.sp,
                pc,
            })?;
        *slot = address;
        self.sp += 1;
        Ok(())
    }

    /// Pop a return address off the call stack.
    pub(crate) fn pop(&mut self, pc: usize) -> Chip8Result<Address> {
        let sp = self.sp.checked_sub(1).ok_or(Chip8Error::OutOfBounds {
            access: Access::StackUnderflow,
            address: 0,
            pc,
        })?;
        self.sp = sp;
        Ok(self.stack[sp])
    }

    /// Memory range of `len` bytes starting at the address register.
    ///
    /// Fails instead of wrapping when the range runs past the end of memory.
    pub(crate) fn address_range(&self, len: usize, pc: usize) -> Chip8Result<Range<usize>> {
        let start = self.address as usize;
        let end = start + len;
        if end > MEM_SIZE {
            return Err(Chip8Error::OutOfBounds {
                access: Access::Memory,
                address: end - 1,
                pc,
            });
        }
        Ok(start..end)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_state() {
        let mut cpu = Chip8Cpu::default();

        cpu.set_key_state(KeyCode::Key0, true);
        assert_eq!(cpu.key_state, 0b00000000_00000001);
        assert!(cpu.key_state(0));
        assert!(!cpu.key_state(1));
        assert!(!cpu.key_state(7));

        cpu.set_key_state(KeyCode::Key7, true);
        assert_eq!(cpu.key_state, 0b00000000_10000001);
        assert!(cpu.key_state(0));
        assert!(!cpu.key_state(1));
        assert!(cpu.key_state(7));

        cpu.set_key_state(KeyCode::Key0, false);
        assert_eq!(cpu.key_state, 0b00000000_10000000);
        assert!(!cpu.key_state(0));
        assert!(!cpu.key_state(1));
        assert!(cpu.key_state(7));

        cpu.set_key_state(KeyCode::KeyF, true);
        assert_eq!(cpu.key_state, 0b10000000_10000000);
        assert!(cpu.key_state(7));
        assert!(cpu.key_state(15));
        assert!(!cpu.key_state(16));
        assert!(!cpu.key_state(0xFF));
    }

    #[test]
    fn test_stack_bounds() {
        let mut cpu = Chip8Cpu::default();
        assert!(matches!(
            cpu.pop(0x200),
            Err(Chip8Error::OutOfBounds {
                access: Access::StackUnderflow,
                ..
            })
        ));

        for i in 0..STACK_SIZE {
            cpu.push(0x200 + i as u16 * 2, 0x200).unwrap();
        }
        assert!(matches!(
            cpu.push(0x300, 0x200),
            Err(Chip8Error::OutOfBounds {
                access: Access::StackOverflow,
                ..
            })
        ));
        assert_eq!(cpu.sp, STACK_SIZE);
        assert_eq!(cpu.pop(0x200).unwrap(), 0x200 + (STACK_SIZE as u16 - 1) * 2);
    }

    #[test]
    fn test_timers_stop_at_zero() {
        let mut cpu = Chip8Cpu::default();
        cpu.delay_timer = 1;
        cpu.tick_delay();
        cpu.tick_delay();
        cpu.tick_sound();
        assert_eq!(cpu.delay_timer, 0);
        assert_eq!(cpu.sound_timer, 0);
    }

    #[test]
    fn test_address_range() {
        let mut cpu = Chip8Cpu::default();
        cpu.address = 0xFFD;
        assert_eq!(cpu.address_range(3, 0x200).unwrap(), 0xFFD..0x1000);
        assert!(cpu.address_range(4, 0x200).is_err());

        cpu.address = 0xFFFF;
        assert!(cpu.address_range(1, 0x200).is_err());
    }
}
