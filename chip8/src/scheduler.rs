//! Cooperative scheduling of the CPU and timer loops.
//!
//! Both loops run on the calling thread. The CPU loop executes a batch of
//! instructions and then yields for the configured tickrate. The timer loop
//! counts down the delay and sound timers at a fixed frequency, independent
//! of how fast the CPU runs. Only one loop body runs at a time, and each
//! observes a stop request at its next yield point.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    clock::{wait_until, Clock},
    devices::{Audio, Display, Input, KeyEvent},
    error::{Chip8Error, Chip8Result},
    vm::Chip8Vm,
};

/// Request to stop both loops, shareable with other threads.
#[derive(Debug, Default, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One of the cooperative loops.
struct Task {
    active: bool,
    clock: Clock,
}

impl Task {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            active: false,
            clock: Clock::new(interval, now),
        }
    }

    #[inline]
    fn is_due(&self, now: Instant) -> bool {
        self.active && self.clock.is_due(now)
    }

    fn deadline(&self) -> Option<Instant> {
        self.active.then(|| self.clock.deadline())
    }
}

pub struct Scheduler<D, A, I> {
    vm: Chip8Vm,
    display: D,
    audio: A,
    input: I,
    cpu: Task,
    timers: Task,
    stop: StopHandle,
    /// Fatal error that halted the CPU loop.
    error: Option<Chip8Error>,
}

impl<D, A, I> Scheduler<D, A, I>
where
    D: Display,
    A: Audio,
    I: Input,
{
    pub fn new(vm: Chip8Vm, display: D, audio: A, input: I) -> Self {
        let now = Instant::now();
        let conf = vm.config();
        let cpu = Task::new(conf.tickrate(), now);
        let timers = Task::new(conf.timer_frequency.into(), now);

        Self {
            vm,
            display,
            audio,
            input,
            cpu,
            timers,
            stop: StopHandle::default(),
            error: None,
        }
    }

    /// Load a program into the machine. The loops are not started.
    pub fn load(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        self.vm.load_bytecode(bytecode)?;
        self.error = None;
        Ok(())
    }

    /// Activate both loops, due immediately.
    pub fn activate(&mut self, now: Instant) {
        debug!("starting loops");

        self.stop.clear();
        self.cpu.active = !self.vm.is_halted();
        self.cpu.clock.reset(now);
        self.timers.active = true;
        self.timers.clock.reset(now);
    }

    /// Start both loops, and run them until stopped.
    pub fn start(&mut self) -> Chip8Result<()> {
        self.run_until(None)
    }

    /// Start both loops, and run them until stopped or the deadline passes.
    ///
    /// If the CPU loop halted on a fatal error, the error is handed to the
    /// caller once the timer loop has stopped as well.
    pub fn run_until(&mut self, deadline: Option<Instant>) -> Chip8Result<()> {
        self.activate(Instant::now());

        loop {
            let now = Instant::now();
            if deadline.map_or(false, |deadline| now >= deadline) {
                self.stop();
            }

            let next = match self.poll(now) {
                Some(next) => next,
                None => break,
            };

            let wake = deadline.map_or(next, |deadline| next.min(deadline));
            if wake > now {
                wait_until(wake);
            } else {
                thread::yield_now();
            }
        }

        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run every loop body that is due at the given instant.
    ///
    /// Pending input is applied first. Loops run in deadline order, the
    /// CPU first when both are due at the same time. Returns the deadline
    /// of the next due loop, or `None` when both loops are stopped.
    pub fn poll(&mut self, now: Instant) -> Option<Instant> {
        if self.stop.is_stopped() {
            self.stop();
        }

        self.apply_input();

        let timers_first = self.timers.clock.deadline() < self.cpu.clock.deadline();
        if timers_first {
            self.poll_timers(now);
            self.poll_cpu(now);
        } else {
            self.poll_cpu(now);
            self.poll_timers(now);
        }

        match (self.cpu.deadline(), self.timers.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn poll_cpu(&mut self, now: Instant) {
        if self.cpu.is_due(now) {
            self.run_cpu_batch();
            self.cpu.clock.advance(now);
        }
    }

    fn poll_timers(&mut self, now: Instant) {
        if self.timers.is_due(now) {
            self.run_timer_tick();
            self.timers.clock.advance(now);
        }
    }

    /// CPU loop body. Executes one batch of instructions, flushing the
    /// display after every cycle that drew.
    fn run_cpu_batch(&mut self) {
        for _ in 0..self.vm.config().cycles_per_tick {
            match self.vm.cycle() {
                Ok(flow) => {
                    if flow.is_dirty() {
                        self.display.flush(self.vm.display_buffer());
                    }
                    if flow.is_blocked() {
                        self.cpu.active = !self.vm.is_halted();
                        break;
                    }
                }
                Err(err) => {
                    debug!("CPU loop stopped at {:04X}", self.vm.pc());
                    self.cpu.active = false;
                    self.error = Some(err);
                    break;
                }
            }
        }
    }

    /// Timer loop body.
    fn run_timer_tick(&mut self) {
        if self.vm.tick_timers() {
            self.audio.start();
        } else {
            self.audio.stop();
        }
    }

    /// Drain the input source into the machine.
    ///
    /// Events with an invalid key index are dropped.
    fn apply_input(&mut self) {
        while let Some(event) = self.input.poll() {
            if let Err(err) = self.apply_key_event(event) {
                warn!("dropped input event {event:?}: {err}");
            }
        }
    }

    fn apply_key_event(&mut self, event: KeyEvent) -> Chip8Result<()> {
        match event {
            KeyEvent::Down(key_id) => self.vm.key_down(key_id),
            KeyEvent::Up(key_id) => self.vm.key_up(key_id),
        }
    }

    /// Stop both loops at their next yield point.
    pub fn stop(&mut self) {
        if self.is_running() {
            debug!("stopping loops");
        }
        self.cpu.active = false;
        self.timers.active = false;
    }

    /// Stop both loops, silence the buzzer, and hand back the machine.
    pub fn destroy(mut self) -> Chip8Vm {
        self.stop();
        self.audio.stop();
        self.vm
    }

    /// Handle that stops the loops from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        self.cpu.active || self.timers.active
    }

    pub fn is_cpu_running(&self) -> bool {
        self.cpu.active
    }

    pub fn is_timer_running(&self) -> bool {
        self.timers.active
    }

    /// Fatal error that halted the CPU loop, if any.
    pub fn error(&self) -> Option<&Chip8Error> {
        self.error.as_ref()
    }

    pub fn key_down(&mut self, key_id: u8) -> Chip8Result<()> {
        self.vm.key_down(key_id)
    }

    pub fn key_up(&mut self, key_id: u8) -> Chip8Result<()> {
        self.vm.key_up(key_id)
    }

    pub fn vm(&self) -> &Chip8Vm {
        &self.vm
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }

    pub fn input_mut(&mut self) -> &mut I {
        &mut self.input
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;

    use super::*;
    use crate::{
        constants::*,
        devices::Headless,
        vm::{Chip8Conf, Hz},
    };

    #[derive(Default)]
    struct Frames {
        flushes: usize,
        last: Option<Box<Framebuffer>>,
    }

    impl Display for Frames {
        fn set_pixel(&mut self, _x: usize, _y: usize, _on: bool) {}

        fn flush(&mut self, display: &Framebuffer) {
            self.flushes += 1;
            self.last = Some(Box::new(*display));
        }
    }

    #[derive(Default)]
    struct Buzzer {
        on: bool,
        starts: usize,
    }

    impl Audio for Buzzer {
        fn start(&mut self) {
            self.on = true;
            self.starts += 1;
        }

        fn stop(&mut self) {
            self.on = false;
        }
    }

    type TestScheduler = Scheduler<Frames, Buzzer, VecDeque<KeyEvent>>;

    fn scheduler(conf: Chip8Conf, program: &[u8]) -> TestScheduler {
        let mut sched = Scheduler::new(
            Chip8Vm::new(conf),
            Frames::default(),
            Buzzer::default(),
            VecDeque::new(),
        );
        sched.load(program).unwrap();
        sched
    }

    fn timer_interval() -> Duration {
        Hz(DELAY_FREQUENCY).into()
    }

    #[test]
    #[rustfmt::skip]
    fn test_cpu_runs_in_batches() {
        let mut sched = scheduler(Chip8Conf::default(), &[
            0x70, 0x01, // 200: ADD v0, 1
            0x12, 0x00, // 202: JP 0x200
        ]);
        let t0 = Instant::now();
        sched.activate(t0);

        sched.poll(t0);
        assert_eq!(sched.vm().registers()[0], 5);

        // Tickrate of zero makes the CPU due again right away.
        sched.poll(t0);
        assert_eq!(sched.vm().registers()[0], 10);
    }

    #[test]
    #[rustfmt::skip]
    fn test_cpu_tickrate() {
        let conf = Chip8Conf {
            tickrate_ms: 5,
            cycles_per_tick: 4,
            ..Chip8Conf::default()
        };
        let mut sched = scheduler(conf, &[
            0x70, 0x01, // 200: ADD v0, 1
            0x12, 0x00, // 202: JP 0x200
        ]);
        let t0 = Instant::now();
        sched.activate(t0);

        let next = sched.poll(t0).unwrap();
        assert_eq!(sched.vm().registers()[0], 2);
        assert_eq!(next, t0 + Duration::from_millis(5));

        sched.poll(t0 + Duration::from_millis(1));
        assert_eq!(sched.vm().registers()[0], 2);

        sched.poll(t0 + Duration::from_millis(5));
        assert_eq!(sched.vm().registers()[0], 4);
    }

    #[test]
    #[rustfmt::skip]
    fn test_display_flushed_when_dirty() {
        let mut sched = scheduler(Chip8Conf::default(), &[
            0x00, 0xE0, // 200: CLS
            0x12, 0x00, // 202: JP 0x200
        ]);
        let t0 = Instant::now();
        sched.activate(t0);

        sched.poll(t0);
        assert_eq!(sched.display().flushes, 5);

        let mut sched = scheduler(Chip8Conf::default(), &[
            0xF0, 0x29, // 200: LD F, v0
            0xD0, 0x05, // 202: DRW v0, v0, 5
            0x12, 0x04, // 204: JP 0x204
        ]);
        sched.activate(t0);
        sched.poll(t0);
        assert_eq!(sched.display().flushes, 1);
        let frame = sched.display().last.as_ref().unwrap();
        assert_eq!(&frame[..], &sched.vm().display_buffer()[..]);
        assert!(frame[0]);
    }

    #[test]
    #[rustfmt::skip]
    fn test_timers_drive_buzzer() {
        let mut sched = scheduler(Chip8Conf::default(), &[
            0x60, 0x03, // 200: LD v0, 3
            0xF0, 0x18, // 202: LD ST, v0
            0xF0, 0x15, // 204: LD DT, v0
            0x12, 0x06, // 206: JP 0x206
        ]);
        let t0 = Instant::now();
        sched.activate(t0);

        // CPU goes first, so the timers see the new values on the first tick.
        sched.poll(t0);
        assert!(sched.audio().on);
        assert_eq!(sched.vm().sound_timer(), 2);
        assert_eq!(sched.vm().delay_timer(), 2);

        let tick = timer_interval();
        sched.poll(t0 + tick);
        sched.poll(t0 + tick * 2);
        assert!(sched.audio().on);
        assert_eq!(sched.audio().starts, 3);
        assert_eq!(sched.vm().sound_timer(), 0);
        assert_eq!(sched.vm().delay_timer(), 0);

        sched.poll(t0 + tick * 3);
        assert!(!sched.audio().on);
        assert_eq!(sched.audio().starts, 3);
    }

    #[test]
    fn test_timers_independent_of_cpu() {
        let conf = Chip8Conf {
            tickrate_ms: 1000,
            ..Chip8Conf::default()
        };
        // LD v0, 0xFF; LD DT, v0; JP 0x204
        let mut sched = scheduler(conf, &[0x60, 0xFF, 0xF0, 0x15, 0x12, 0x04]);
        let t0 = Instant::now();
        sched.activate(t0);
        sched.poll(t0);

        let tick = timer_interval();
        let mut now = t0;
        for _ in 0..10 {
            now += tick;
            sched.poll(now);
        }
        assert_eq!(sched.vm().delay_timer(), 0xFF - 11);
    }

    #[test]
    #[rustfmt::skip]
    fn test_key_wait_resumes_on_input() {
        let mut sched = scheduler(Chip8Conf::default(), &[
            0xF3, 0x0A, // 200: LD v3, K
            0x61, 0x42, // 202: LD v1, 0x42
            0x12, 0x04, // 204: JP 0x204
        ]);
        let t0 = Instant::now();
        sched.activate(t0);

        sched.poll(t0);
        assert!(sched.vm().exec_state().is_waiting());
        sched.poll(t0);
        assert_eq!(sched.vm().registers()[1], 0);
        assert!(sched.is_cpu_running());

        sched.input_mut().push_back(KeyEvent::Down(0x10));
        sched.input_mut().push_back(KeyEvent::Down(0xB));
        sched.input_mut().push_back(KeyEvent::Up(0xB));
        sched.poll(t0);

        assert!(!sched.vm().exec_state().is_waiting());
        assert_eq!(sched.vm().registers()[3], 0xB);
        assert_eq!(sched.vm().registers()[1], 0x42);
        assert!(sched.input_mut().is_empty());
    }

    #[test]
    fn test_halt_keeps_timers_running() {
        // LD v0, 9; LD ST, v0; unknown
        let mut sched = scheduler(Chip8Conf::default(), &[0x60, 0x09, 0xF0, 0x18, 0xFF, 0xFF]);
        let t0 = Instant::now();
        sched.activate(t0);

        let next = sched.poll(t0);
        assert!(!sched.is_cpu_running());
        assert!(sched.is_timer_running());
        assert_eq!(next, Some(t0 + timer_interval()));
        assert!(matches!(
            sched.error(),
            Some(Chip8Error::UnknownOpcode {
                opcode: 0xFFFF,
                pc: 0x204
            })
        ));
        assert!(sched.audio().on);

        sched.stop();
        assert!(!sched.is_running());
        assert_eq!(sched.poll(t0 + timer_interval()), None);

        // A halted machine does not restart the CPU loop.
        sched.activate(t0);
        assert!(!sched.is_cpu_running());
    }

    #[test]
    fn test_stop_handle() {
        let mut sched = scheduler(Chip8Conf::default(), &[0x12, 0x00]);
        let t0 = Instant::now();
        sched.activate(t0);
        assert!(sched.poll(t0).is_some());

        let handle = sched.stop_handle();
        thread::spawn(move || handle.stop()).join().unwrap();

        assert_eq!(sched.poll(t0), None);
        assert!(!sched.is_running());
    }

    #[test]
    fn test_run_until_deadline() {
        let mut sched = Scheduler::new(
            Chip8Vm::new(Chip8Conf::default()),
            Headless,
            Headless,
            Headless,
        );
        sched.load(&[0x70, 0x01, 0x12, 0x00]).unwrap();

        let start = Instant::now();
        sched
            .run_until(Some(start + Duration::from_millis(20)))
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!sched.is_running());
    }

    #[test]
    fn test_run_until_returns_halt_error() {
        let mut sched = scheduler(Chip8Conf::default(), &[0x00, 0xEE]);

        let deadline = Instant::now() + Duration::from_millis(20);
        match sched.run_until(Some(deadline)) {
            Err(Chip8Error::OutOfBounds { .. }) => {}
            other => panic!("expected stack underflow, got {other:?}"),
        }
        assert!(sched.error().is_none());
    }

    #[test]
    fn test_destroy_returns_machine() {
        let mut sched = scheduler(Chip8Conf::default(), &[0x60, 0xFF, 0xF0, 0x18, 0x12, 0x04]);
        let t0 = Instant::now();
        sched.activate(t0);
        sched.poll(t0);
        assert!(sched.audio().on);

        let vm = sched.destroy();
        assert_eq!(vm.sound_timer(), 0xFE);
    }
}
