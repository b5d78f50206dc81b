//! Entrypoint for CLI
use std::{
    env,
    error::Error,
    fs,
    time::{Duration, Instant},
};

use chip8::{
    constants::*,
    prelude::*,
    Audio, Display, Headless, IMPL_VERSION,
};
use log::{debug, error, info};

static USAGE: &str = r#"
usage: chip8 CMD FILE [SECONDS] [--config CONF]

commands:
    run     Run the target ROM file headless for a number of seconds (default 5),
            then print the display and registers
    dis     Disassemble the the target ROM into readable assembly

options:
    --config CONF   YAML file with interpreter settings

examples:
    chip8 run breakout.rom
    chip8 run breakout.rom 10 --config slow.yaml
    chip8 dis breakout.rom
"#;

const DEFAULT_SECONDS: u64 = 5;

/// Display sink that only counts frames. The final frame is printed from the VM.
#[derive(Default)]
struct FrameCounter {
    frames: usize,
}

impl Display for FrameCounter {
    fn set_pixel(&mut self, _x: usize, _y: usize, _on: bool) {}

    fn flush(&mut self, _display: &Framebuffer) {
        self.frames += 1;
    }
}

/// Audio sink that reports the buzzer switching on and off.
#[derive(Default)]
struct LogBuzzer {
    on: bool,
}

impl Audio for LogBuzzer {
    fn start(&mut self) {
        if !self.on {
            info!("buzzer on");
            self.on = true;
        }
    }

    fn stop(&mut self) {
        if self.on {
            info!("buzzer off");
            self.on = false;
        }
    }
}

fn load_config(filepath: Option<&str>) -> Chip8Result<Chip8Conf> {
    match filepath {
        Some(filepath) => {
            let source = fs::read_to_string(filepath)?;
            let conf: Chip8Conf = serde_yaml::from_str(&source)
                .map_err(|err| Chip8Error::Config(format!("{filepath}: {err}")))?;
            debug!("loaded {conf:?}");
            Ok(conf)
        }
        None => Ok(Chip8Conf::default()),
    }
}

fn run_bytecode(filepath: &str, seconds: u64, conf: Chip8Conf) -> Chip8Result<()> {
    info!("running {filepath} for {seconds}s");

    let bytecode = fs::read(filepath)?;

    let mut sched = Scheduler::new(
        Chip8Vm::new(conf),
        FrameCounter::default(),
        LogBuzzer::default(),
        Headless,
    );
    sched.load(bytecode.as_slice())?;

    let start = Instant::now();
    let result = sched.run_until(Some(start + Duration::from_secs(seconds)));
    let frames = sched.display().frames;
    let vm = sched.destroy();

    info!("{frames} frames drawn in {}ms", start.elapsed().as_millis());
    println!("{}", vm.dump_display()?);
    println!("{}", vm.dump_registers()?);

    result
}

fn run_disassembler(filepath: &str) -> Chip8Result<()> {
    let bytecode = fs::read(filepath)?;
    Disassembler::new(bytecode.as_slice()).print_bytecode()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new().env().init()?;

    let result = match parse_args(env::args().skip(1)) {
        Some(Cmd::Run {
            filepath,
            seconds,
            config,
        }) => load_config(config.as_deref())
            .and_then(|conf| run_bytecode(&filepath, seconds, conf)),
        Some(Cmd::Dis { filepath }) => run_disassembler(&filepath),
        None => {
            print_usage();
            // FreeBSD EX_USAGE (64)
            std::process::exit(64)
        }
    };

    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }

    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<Cmd> {
    let mut positional = Vec::new();
    let mut config = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(args.next()?),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    match positional.next()?.as_str() {
        "run" => Some(Cmd::Run {
            filepath: positional.next()?,
            seconds: match positional.next() {
                Some(seconds) => seconds.parse().ok()?,
                None => DEFAULT_SECONDS,
            },
            config,
        }),
        "dis" => Some(Cmd::Dis {
            filepath: positional.next()?,
        }),
        _ => None,
    }
}

fn print_usage() {
    println!("Chip8 v{IMPL_VERSION}");
    println!("{USAGE}");
}

#[derive(Debug, PartialEq, Eq)]
enum Cmd {
    /// Run file
    Run {
        filepath: String,
        seconds: u64,
        config: Option<String>,
    },
    /// Disassemble
    Dis { filepath: String },
}
