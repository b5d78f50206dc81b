//! Virtual machine.
use std::{
    fmt::{self, Write},
    time::Duration,
};

use log::{debug, error, info, trace};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    bytecode::Opcode,
    constants::*,
    cpu::Chip8Cpu,
    devices::KeyCode,
    error::{Chip8Error, Chip8Result},
    gate::ExecState,
};

pub struct Chip8Vm {
    cpu: Chip8Cpu,
    rng: StdRng,
    /// Set when the interpreter hit a fatal error.
    ///
    /// Only a fresh load clears it.
    halted: bool,
    conf: Chip8Conf,
}

impl Chip8Vm {
    pub fn new(conf: Chip8Conf) -> Self {
        Chip8Vm {
            cpu: Chip8Cpu::new(),
            rng: seed_rng(conf.seed),
            halted: false,
            conf,
        }
    }

    /// Configuration that was used to instantiate the VM.
    pub fn config(&self) -> &Chip8Conf {
        &self.conf
    }

    pub fn load_builtin_font(&mut self) {
        let start = FONTSET_START as usize;
        self.cpu.ram[start..start + FONTSET_DATA_LENGTH].copy_from_slice(&FONTSET);
    }

    /// Load a program into memory, ready to execute from the start.
    ///
    /// Registers, timers, stack, keys and the display are reset, and the
    /// built-in font is written to the bottom of memory.
    pub fn load_bytecode(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        if !check_program_size(bytecode) {
            return Err(Chip8Error::LargeProgram {
                size: bytecode.len(),
            });
        }

        // Start with clean memory to avoid leaking previous program.
        self.cpu.reset();
        self.halted = false;

        // Reset fonts
        self.load_builtin_font();

        // Load program into virtual RAM
        self.cpu.ram[MEM_START..MEM_START + bytecode.len()].copy_from_slice(bytecode);

        debug!("loaded program of {} bytes", bytecode.len());

        Ok(())
    }

    pub fn display_buffer(&self) -> &Framebuffer {
        &self.cpu.display
    }
}

#[inline]
fn check_program_size(bytecode: &[u8]) -> bool {
    bytecode.len() <= MAX_PROGRAM_SIZE
}

fn seed_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Outcome of a single interpreter cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Ok,
    /// Program counter has jumped to a new address.
    ///
    /// This is returned when the interpreter encounters:
    ///
    /// - 1nnn (`JP addr`)
    /// - 2nnn (`CALL addr`)
    /// - 00EE (`RET`)
    /// - Bnnn (`JP V0, addr`)
    Jump,
    /// The display buffer changed and must be flushed to the screen.
    Draw,
    /// Wait for a keypress.
    ///
    /// This is triggered by the opcode `Fx0A` (`LD Vx, K`), which stops
    /// execution until a key is pressed, and loads the key value into `Vx`.
    /// Returned for every cycle attempted while the wait is pending.
    KeyWait,
    /// The interpreter stopped on a fatal error and will not execute again.
    Halt,
}

impl Flow {
    /// Whether the display must be redrawn after this cycle.
    #[inline(always)]
    pub fn is_dirty(&self) -> bool {
        matches!(self, Flow::Draw)
    }

    /// Whether the CPU loop must yield instead of running more cycles.
    #[inline(always)]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Flow::KeyWait | Flow::Halt)
    }
}

/// VM Configuration Parameters.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(default))]
pub struct Chip8Conf {
    /// Pause between batches of CPU cycles, in milliseconds.
    ///
    /// Zero runs the CPU as fast as the host allows.
    pub tickrate_ms: u64,
    /// Number of instructions in a batch.
    pub cycles_per_tick: usize,
    /// Frequency the delay and sound timers count down at.
    pub timer_frequency: Hz,
    /// Seed for the random number instruction. Seeded from the OS when empty.
    pub seed: Option<u64>,
}

impl Default for Chip8Conf {
    fn default() -> Self {
        Self {
            tickrate_ms: 0,
            cycles_per_tick: CYCLES_PER_TICK,
            timer_frequency: Hz(DELAY_FREQUENCY),
            seed: None,
        }
    }
}

impl Chip8Conf {
    pub fn tickrate(&self) -> Duration {
        Duration::from_millis(self.tickrate_ms)
    }
}

/// Clock frequency, in hertz (per second)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(transparent))]
pub struct Hz(pub u64);

impl From<Hz> for Duration {
    fn from(freq: Hz) -> Self {
        if freq.0 == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(NANOS_IN_SECOND / freq.0)
        }
    }
}

/// Input
impl Chip8Vm {
    /// Sets the keyboard key input state.
    ///
    /// If the VM is waiting for keyboard input, a key press is written
    /// to the waiting register and execution can resume.
    pub fn set_key(&mut self, key: KeyCode, pressed: bool) {
        self.cpu.set_key_state(key, pressed);

        if pressed {
            if let Some(register) = self.cpu.exec_state.resume() {
                self.cpu.registers[register as usize] = key.as_u8();
                info!("key {key} resumed execution, stored in V{register:X}");
            }
        }
    }

    /// Key press from the host, by raw keypad index.
    pub fn key_down(&mut self, key_id: u8) -> Chip8Result<()> {
        let key = KeyCode::try_from(key_id)?;
        self.set_key(key, true);
        Ok(())
    }

    /// Key release from the host, by raw keypad index.
    pub fn key_up(&mut self, key_id: u8) -> Chip8Result<()> {
        let key = KeyCode::try_from(key_id)?;
        self.set_key(key, false);
        Ok(())
    }
}

/// Interpreter
impl Chip8Vm {
    /// Count down the delay and sound timers by one tick.
    ///
    /// Returns whether the buzzer should be sounding during this tick.
    pub fn tick_timers(&mut self) -> bool {
        let buzz = self.cpu.sound_timer > 0;
        self.cpu.tick_sound();
        self.cpu.tick_delay();
        buzz
    }

    /// Whether the interpreter stopped on a fatal error.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Execute instructions until the step count is reached, or the
    /// interpreter blocks on a key wait or halts.
    pub fn run_steps(&mut self, step_count: usize) -> Chip8Result<Flow> {
        let mut flow = Flow::Ok;

        for _ in 0..step_count {
            flow = self.cycle()?;
            if flow.is_blocked() {
                break;
            }
        }

        Ok(flow)
    }

    /// Decode and execute the instruction at the program counter.
    ///
    /// Errors are fatal. The VM is halted and will not dispatch again
    /// until a new program is loaded.
    pub fn cycle(&mut self) -> Chip8Result<Flow> {
        if self.halted {
            return Ok(Flow::Halt);
        }

        if self.cpu.exec_state.is_waiting() {
            return Ok(Flow::KeyWait);
        }

        let pc = self.cpu.pc;
        self.step(pc).map_err(|err| {
            error!("interpreter halted: {err}");
            self.halted = true;
            err
        })
    }

    fn step(&mut self, pc: usize) -> Chip8Result<Flow> {
        // Each instruction is two bytes, with the opcode identity in the first 4-bit nibble.
        let op = Opcode::fetch(&*self.cpu.ram, pc)?;
        trace!("{pc:04X}: {op}");

        let vx = op.x() as usize;
        let vy = op.y() as usize;
        let nn = op.nn();
        let nnn = op.nnn();

        self.cpu.pc = pc + 2;

        let mut control_flow = Flow::Ok;

        match op.op() {
            // Miscellaneous instructions identified by nn
            0x0 | 0xE | 0xF => control_flow = self.exec_misc(op, pc)?,
            // 1NNN (JP addr)
            //
            // Jump to address.
            0x1 => {
                self.cpu.pc = nnn as usize;
                control_flow = Flow::Jump;
            }
            // 2NNN (CALL addr)
            //
            // Call subroutine at NNN.
            0x2 => {
                self.cpu.push(self.cpu.pc as Address, pc)?;
                self.cpu.pc = nnn as usize;
                control_flow = Flow::Jump;
            }
            // 3XNN (SE Vx, byte)
            //
            // Skip the next instruction if register VX equals value NN.
            0x3 => {
                if self.cpu.registers[vx] == nn {
                    self.cpu.pc += 2;
                }
            }
            // 4XNN (SNE Vx, byte)
            //
            // Skip the next instruction if register VX does not equal value NN.
            0x4 => {
                if self.cpu.registers[vx] != nn {
                    self.cpu.pc += 2;
                }
            }
            // 5XY0 (SE Vx, Vy)
            //
            // Skip the next instruction if register VX equals value VY.
            0x5 => {
                if self.cpu.registers[vx] == self.cpu.registers[vy] {
                    self.cpu.pc += 2;
                }
            }
            // 6XNN (LD Vx, byte)
            //
            // Set register VX to value NN.
            0x6 => {
                self.cpu.registers[vx] = nn;
            }
            // 7xnn (ADD Vx, byte)
            //
            // Add value NN to register VX. Carry flag is not set.
            0x7 => {
                self.cpu.registers[vx] = self.cpu.registers[vx].wrapping_add(nn);
            }
            // Arithmetic instructions indentified by n
            0x8 => self.exec_math(op, pc)?,
            // 9xy0 (SNE Vx, Vy)
            //
            // Skip next instruction if Vx != Vy.
            0x9 => {
                if self.cpu.registers[vx] != self.cpu.registers[vy] {
                    self.cpu.pc += 2;
                }
            }
            // Annn (LD I, addr)
            //
            // Set address register I to value NNN.
            0xA => {
                self.cpu.address = nnn;
            }
            // Bnnn (JP V0, addr)
            //
            // Jump to address NNN offset by register V0.
            0xB => {
                self.cpu.pc = self.cpu.registers[0] as usize + nnn as usize;
                control_flow = Flow::Jump;
            }
            // CXNN (RND Vx, byte)
            //
            // Generate random number.
            // Set register VX to the result of bitwise AND between a random number and NN.
            0xC => {
                self.cpu.registers[vx] = nn & self.rng.gen::<u8>();
            }
            // Dxyn (DRW Vx, Vy, nibble)
            //
            // Draw sprite to the display buffer, at coordinate as per registers Vx and Vy.
            // Sprite is encoded as 8 pixels wide, N pixels high, stored in bits located in
            // memory pointed to by address register I.
            //
            // Pixels are addressed linearly with a 64 pixel stride, so a sprite running
            // off the right edge continues on the next row, and off the bottom edge
            // continues at the top.
            //
            // If the drawing operation erases existing pixels in the display buffer, register VF is set to
            // 1, and set to 0 if no display bits are unset. This is used for collision detection.
            0xD => {
                let rows = self.cpu.address_range(op.n() as usize, pc)?;

                // Flag is cleared before the coordinates are read, so drawing at VF uses 0.
                self.cpu.registers[FLAG_REGISTER] = 0;

                let cpu = &mut self.cpu;
                let (x, y) = (cpu.registers[vx] as usize, cpu.registers[vy] as usize);

                for (r, &sprite) in cpu.ram[rows].iter().enumerate() {
                    // Each row is 8 bits representing the 8 pixels of the sprite.
                    for c in 0..SPRITE_WIDTH {
                        if sprite & (0x80u8 >> c) == 0 {
                            continue;
                        }

                        let d = (x + c + (y + r) * DISPLAY_WIDTH) % DISPLAY_BUFFER_SIZE;

                        // XOR erases a pixel when both the old and new values are both 1.
                        if cpu.display[d] {
                            cpu.registers[FLAG_REGISTER] = 1;
                        }
                        cpu.display[d] ^= true;
                    }
                }

                control_flow = Flow::Draw;
            }
            _ => unreachable!("opcode family is a single nibble"),
        }

        Ok(control_flow)
    }

    /// Execute an arithmetic instruction
    ///
    /// The flag register is written after the result for addition, so `8FY4`
    /// leaves the carry in VF. The other operations decide the flag from the
    /// operands, write it, then compute the result from the registers as they
    /// are after that write. This matters when X or Y is F.
    #[inline]
    fn exec_math(&mut self, op: Opcode, pc: usize) -> Chip8Result<()> {
        debug_assert_eq!(op.op(), 0x8);

        let (vx, vy) = (op.x() as usize, op.y() as usize);
        let (x, y) = (self.cpu.registers[vx], self.cpu.registers[vy]);
        let regs = &mut self.cpu.registers;

        match op.n() {
            // 8XY0 (LD Vx, Vy)
            //
            // Store the value of register VY in register VX.
            0x0 => regs[vx] = y,
            // 8XY1 (OR Vx, Vy)
            0x1 => regs[vx] = x | y,
            // 8XY2 (AND Vx, Vy)
            0x2 => regs[vx] = x & y,
            // 8XY3 (XOR Vx, Vy)
            0x3 => regs[vx] = x ^ y,
            // 8XY4 (ADD Vx, Vy)
            //
            // ADDs VX to VY, and stores the result in VX.
            // Overflow is wrapped.
            // If overflow, set VF to 1, else 0.
            0x4 => {
                let (result, carry) = x.overflowing_add(y);
                regs[vx] = result;
                regs[FLAG_REGISTER] = carry as u8;
            }
            // 8XY5 (SUB Vx, Vy)
            //
            // Subtracts VY from VX, and stores the result in VX.
            // VF is set to 1 when VX is strictly greater than VY, otherwise 0.
            0x5 => {
                regs[FLAG_REGISTER] = (x > y) as u8;
                regs[vx] = regs[vx].wrapping_sub(regs[vy]);
            }
            // 8XY6 (SHR Vx)
            //
            // VF is set to the least-significant bit of Vx.
            // Shift VX right by 1.
            // VY is unused.
            0x6 => {
                regs[FLAG_REGISTER] = x & 1;
                regs[vx] >>= 1;
            }
            // 8XY7 (SUBN Vx, Vy)
            //
            // Subtracts VX from VY, and stores the result in VX.
            // VF is set to 1 when VY is strictly greater than VX, otherwise 0.
            0x7 => {
                regs[FLAG_REGISTER] = (y > x) as u8;
                regs[vx] = regs[vy].wrapping_sub(regs[vx]);
            }
            // 8XYE (SHL Vx)
            //
            // VF is set to the most-significant bit of Vx.
            // Shift VX left by 1.
            // VY is unused.
            0xE => {
                regs[FLAG_REGISTER] = (x >> 7) & 1;
                regs[vx] <<= 1;
            }
            // ----------------------------------------------------------------
            // Unsupported operation.
            _ => {
                return Err(Chip8Error::UnknownOpcode {
                    opcode: op.code(),
                    pc,
                })
            }
        }

        Ok(())
    }

    /// Execute a miscellaneous instruction
    #[inline]
    fn exec_misc(&mut self, op: Opcode, pc: usize) -> Chip8Result<Flow> {
        let vx = op.x() as usize;

        let mut control_flow = Flow::Ok;

        match (op.op(), op.nn()) {
            // ----------------------------------------------------------------
            // 00E0 (CLS)
            //
            // Clear display
            (0x0, 0xE0) if op.code() == 0x00E0 => {
                self.cpu.clear_display();
                control_flow = Flow::Draw;
            }
            // 00EE (RET)
            //
            // Return from a subroutine.
            // Subtract 1 from the stack pointer.
            // Set the program counter to the value at the top of the stack.
            (0x0, 0xEE) if op.code() == 0x00EE => {
                self.cpu.pc = self.cpu.pop(pc)? as usize;
                control_flow = Flow::Jump;
            }
            // ----------------------------------------------------------------
            // Ex9E (SKP Vx)
            (0xE, 0x9E) => {
                if self.cpu.key_state(self.cpu.registers[vx]) {
                    self.cpu.pc += 2;
                }
            }
            // ExA1 (SKNP Vx)
            (0xE, 0xA1) => {
                if !self.cpu.key_state(self.cpu.registers[vx]) {
                    self.cpu.pc += 2;
                }
            }
            // ----------------------------------------------------------------
            // Fx07 (LD Vx, DT)
            //
            // Set Vx = delay timer value.
            (0xF, 0x07) => {
                self.cpu.registers[vx] = self.cpu.delay_timer;
            }
            // Fx0A (LD Vx, K)
            //
            // Wait for a key press, store the value of the key in Vx.
            // All execution stops until a key is pressed, then the value of that key is stored in Vx.
            // The program counter has already moved past this instruction.
            (0xF, 0x0A) => {
                self.cpu.exec_state.suspend(vx as u8);
                info!("waiting for key press into V{vx:X}");
                control_flow = Flow::KeyWait;
            }
            // Fx15 (LD DT, Vx)
            //
            // Set delay timer = Vx.
            (0xF, 0x15) => {
                self.cpu.delay_timer = self.cpu.registers[vx];
            }
            // Fx18 (LD ST, Vx)
            //
            // Set sound timer = Vx.
            (0xF, 0x18) => {
                self.cpu.sound_timer = self.cpu.registers[vx];
            }
            // Fx1E (ADD I, Vx)
            //
            // Add Vx to I, wrapping at 16 bits.
            (0xF, 0x1E) => {
                let x = self.cpu.registers[vx] as u16;
                self.cpu.address = self.cpu.address.wrapping_add(x);
            }
            // Fx29 (LD F, Vx)
            //
            // Set I = location of sprite for digit Vx.
            (0xF, 0x29) => {
                let x = self.cpu.registers[vx] as u16;
                self.cpu.address = FONTSET_START + x * FONTSET_HEIGHT as u16;
            }
            // Fx33 (LD B, Vx)
            //
            // Store the binary-coded decimal representation of Vx
            // in the memory locations I, I+1, and I+2.
            (0xF, 0x33) => {
                let range = self.cpu.address_range(3, pc)?;
                let x = self.cpu.registers[vx];
                self.cpu.ram[range].copy_from_slice(&[x / 100, x / 10 % 10, x % 10]);
            }
            // Fx55 (LD [I], Vx)
            //
            // Store registers V0 through Vx in memory starting at location I.
            (0xF, 0x55) => {
                let range = self.cpu.address_range(vx + 1, pc)?;
                self.cpu.ram[range].copy_from_slice(&self.cpu.registers[0..=vx]);
            }
            // Fx65 (LD Vx, [I])
            //
            // Read registers V0 through Vx from memory starting at location I.
            (0xF, 0x65) => {
                let range = self.cpu.address_range(vx + 1, pc)?;
                self.cpu.registers[0..=vx].copy_from_slice(&self.cpu.ram[range]);
            }
            // ----------------------------------------------------------------
            // Unsupported operation.
            _ => {
                return Err(Chip8Error::UnknownOpcode {
                    opcode: op.code(),
                    pc,
                })
            }
        }

        Ok(control_flow)
    }
}

/// Troubleshooting
impl Chip8Vm {
    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.cpu.registers
    }

    /// Address register I.
    pub fn index(&self) -> Address {
        self.cpu.address
    }

    pub fn pc(&self) -> usize {
        self.cpu.pc
    }

    pub fn sp(&self) -> usize {
        self.cpu.sp
    }

    /// Return addresses currently on the call stack, oldest first.
    pub fn stack(&self) -> &[Address] {
        &self.cpu.stack[..self.cpu.sp]
    }

    pub fn memory(&self) -> &[u8; MEM_SIZE] {
        &self.cpu.ram
    }

    pub fn delay_timer(&self) -> u8 {
        self.cpu.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.cpu.sound_timer
    }

    pub fn exec_state(&self) -> ExecState {
        self.cpu.exec_state
    }

    /// Returns the contents of the memory as a human readable string.
    ///
    /// Lists `count` bytes from the start of the program area as 2-byte words.
    /// An odd count is rounded up to a whole word.
    pub fn dump_ram(&self, count: usize) -> Result<String, fmt::Error> {
        let iter = self
            .cpu
            .ram
            .iter()
            .enumerate()
            .skip(MEM_START)
            .take(count)
            .step_by(2);
        let mut buf = String::new();

        for (i, op) in iter {
            let lo = self.cpu.ram.get(i + 1).copied().unwrap_or(0);
            writeln!(buf, "{:04X}: {:02X}{:02X}", i, op, lo)?;
        }

        Ok(buf)
    }

    pub fn dump_display(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                if self.cpu.display[x + y * DISPLAY_WIDTH] {
                    write!(buf, "#")?;
                } else {
                    write!(buf, ".")?;
                }
            }
            writeln!(buf)?;
        }

        Ok(buf)
    }

    pub fn dump_registers(&self) -> Result<String, fmt::Error> {
        let cpu = &self.cpu;
        let mut buf = String::new();

        writeln!(buf, "PC: {:04X} SP: {:02X} I: {:04X}", cpu.pc, cpu.sp, cpu.address)?;
        writeln!(buf, "DT: {:03} ST: {:03}", cpu.delay_timer, cpu.sound_timer)?;
        for (i, v) in cpu.registers.iter().enumerate() {
            write!(buf, "V{i:X}={v:02X}")?;
            buf.push(if i % 8 == 7 { '\n' } else { ' ' });
        }
        write!(buf, "stack:")?;
        for address in self.stack() {
            write!(buf, " {address:04X}")?;
        }
        writeln!(buf)?;

        Ok(buf)
    }

    pub fn dump_keys(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        if self.cpu.any_key() {
            write!(buf, "keys: ")?;
            for i in 0..KEY_COUNT {
                if self.cpu.key_state(i) {
                    write!(buf, "k{i:x}")?;
                }
            }
        }

        Ok(buf)
    }
}
