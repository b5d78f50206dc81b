use std::{collections::VecDeque, time::Instant};

use chip8::{prelude::*, Headless, KeyEvent};

fn load(program: &[u8]) -> Chip8Vm {
    let mut vm = Chip8Vm::new(Chip8Conf {
        seed: Some(1),
        ..Chip8Conf::default()
    });
    vm.load_bytecode(program).unwrap();
    vm
}

#[test]
#[rustfmt::skip]
fn test_draw_font_glyph() {
    let mut vm = load(&[
        0x60, 0x00, // LD v0, 0
        0xA0, 0x00, // LD I, 0
        0xF0, 0x29, // LD F, v0
        0xD0, 0x05, // DRW v0, v0, 5
    ]);
    assert_eq!(vm.run_steps(4).unwrap(), Flow::Draw);

    let dump = vm.dump_display().unwrap();
    let rows: Vec<&str> = dump.lines().take(6).map(|line| &line[..8]).collect();
    assert_eq!(
        rows,
        vec![
            "####....",
            "#..#....",
            "#..#....",
            "#..#....",
            "####....",
            "........",
        ]
    );
    assert_eq!(vm.registers()[0xF], 0);
}

#[test]
#[rustfmt::skip]
fn test_counting_loop_with_subroutine() {
    // Count v0 up to 123, then store its decimal digits at 0x300
    // from a subroutine, and read them back into v0..v2.
    let mut vm = load(&[
        0x70, 0x01, // 200: ADD v0, 1
        0x30, 0x7B, // 202: SE v0, 123
        0x12, 0x00, // 204: JP 0x200
        0x22, 0x0C, // 206: CALL 0x20C
        0xF2, 0x65, // 208: LD v2, [I]
        0x12, 0x0A, // 20A: JP 0x20A
        0xA3, 0x00, // 20C: LD I, 0x300
        0xF0, 0x33, // 20E: LD B, v0
        0x00, 0xEE, // 210: RET
    ]);
    vm.run_steps(123 * 3 - 1 + 6).unwrap();

    assert_eq!(&vm.memory()[0x300..0x303], &[1, 2, 3]);
    assert_eq!(&vm.registers()[0..3], &[1, 2, 3]);
    assert_eq!(vm.pc(), 0x20A);
    assert_eq!(vm.sp(), 0);
}

#[test]
#[rustfmt::skip]
fn test_arithmetic_flags() {
    let mut vm = load(&[
        0x60, 0xC8, // LD v0, 200
        0x61, 0x64, // LD v1, 100
        0x80, 0x14, // ADD v0, v1   ; 300 wraps to 44, carry
        0x82, 0xF0, // LD v2, vF
        0x80, 0x15, // SUB v0, v1   ; 44 - 100 borrows
        0x83, 0xF0, // LD v3, vF
        0x80, 0x0E, // SHL v0       ; 200 << 1, high bit out
        0x84, 0xF0, // LD v4, vF
        0x80, 0x06, // SHR v0
        0x85, 0xF0, // LD v5, vF
    ]);
    vm.run_steps(10).unwrap();

    let regs = vm.registers();
    assert_eq!(regs[2], 1);
    assert_eq!(regs[3], 0);
    assert_eq!(regs[4], 1);
    assert_eq!(regs[5], 0);
    assert_eq!(regs[0], 0x48);
}

#[test]
fn test_unknown_opcode_halts_with_diagnostic() {
    let mut vm = load(&[0x60, 0x01, 0x80, 0x1F]);
    let err = vm.run_steps(10).unwrap_err();

    assert_eq!(err.to_string(), "unknown opcode 801F at 0202");
    assert!(vm.is_halted());
}

#[test]
#[rustfmt::skip]
fn test_scheduler_key_wait() {
    let mut vm = Chip8Vm::new(Chip8Conf::default());
    vm.load_bytecode(&[
        0xF5, 0x0A, // 200: LD v5, K
        0xE5, 0x9E, // 202: SKP v5
        0x12, 0x02, // 204: JP 0x202
        0x12, 0x06, // 206: JP 0x206
    ]).unwrap();

    let mut sched = Scheduler::new(vm, Headless, Headless, VecDeque::new());
    let now = Instant::now();
    sched.activate(now);

    sched.poll(now);
    assert!(sched.vm().exec_state().is_waiting());
    assert_eq!(sched.vm().pc(), 0x202);

    sched.input_mut().push_back(KeyEvent::Down(0x4));
    sched.poll(now);
    assert_eq!(sched.vm().registers()[5], 0x4);
    assert_eq!(sched.vm().pc(), 0x206);

    let vm = sched.destroy();
    assert!(!vm.is_halted());
}

#[test]
fn test_disassemble_listing() {
    let mut listing = String::new();
    Disassembler::new(&[0x60, 0x0A, 0xF0, 0x29, 0xD0, 0x05])
        .disassemble(&mut listing)
        .unwrap();

    assert_eq!(
        listing,
        "0x0200 600A  LD V0, 0x0A\n0x0202 F029  LD F, V0\n0x0204 D005  DRW V0, V0, 5\n"
    );
}
