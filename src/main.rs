//! Command line driver: runs a flat RV64I binary and dumps the final state.

use std::path::PathBuf;
use std::{fs, process};

use clap::{ArgAction, Parser};
use env_logger::Env;

use rv64emu::platform::{DRAM_BASE, DRAM_SIZE};
use rv64emu::{Config, Emulator, StopReason, Uxlen};

#[derive(Parser, Debug)]
#[command(name = "rv64emu", version, about = "RV64I emulator for flat binary images")]
struct Cli {
    /// Raw program image, loaded at the start of DRAM.
    image: PathBuf,

    /// Physical address DRAM and the program start at.
    #[arg(long, value_parser = parse_number, default_value_t = DRAM_BASE)]
    dram_base: Uxlen,

    /// DRAM size in bytes.
    #[arg(long, value_parser = parse_number, default_value_t = DRAM_SIZE as Uxlen)]
    dram_size: Uxlen,

    /// Stop after this many instructions.
    #[arg(long)]
    max_steps: Option<u64>,

    /// More logging, repeat for more detail (-vvv traces every instruction).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Don't print the final register dump.
    #[arg(short, long)]
    quiet: bool,
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_number(arg: &str) -> Result<Uxlen, String> {
    let arg = arg.replace('_', "");
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => Uxlen::from_str_radix(hex, 16),
        None => arg.parse(),
    };
    parsed.map_err(|e| format!("`{arg}` is not a number: {e}"))
}

fn exit_code(reason: &StopReason) -> i32 {
    match reason {
        StopReason::EndOfProgram | StopReason::EnvironmentCall | StopReason::Breakpoint => 0,
        StopReason::Fault(_) => 2,
        StopReason::StepLimitReached => 3,
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let image = match fs::read(&cli.image) {
        Ok(image) => image,
        Err(e) => {
            log::error!("Can't read {}: {e}", cli.image.display());
            process::exit(1);
        }
    };

    let Ok(dram_size) = usize::try_from(cli.dram_size) else {
        log::error!("DRAM size {:#x} is not addressable on this host", cli.dram_size);
        process::exit(1);
    };
    let config = Config {
        dram_base: cli.dram_base,
        dram_size,
        step_limit: cli.max_steps,
    };

    let mut emulator = match Emulator::new(config, &image) {
        Ok(emulator) => emulator,
        Err(e) => {
            log::error!("Can't load {}: {e}", cli.image.display());
            process::exit(1);
        }
    };

    let reason = emulator.run();
    match &reason {
        StopReason::Fault(e) => eprintln!("Stopped: {e}"),
        StopReason::StepLimitReached => eprintln!("Stopped: step limit reached"),
        _ => {}
    }
    if !cli.quiet {
        print!("{emulator}");
    }

    process::exit(exit_code(&reason));
}
