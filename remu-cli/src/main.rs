//! `remu` — run a raw RV32IMA kernel image on the emulated virt platform.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use thiserror::Error;

use remu_core::board::{map, Board, BoardError};
use remu_core::core::{Config, Cpu};
use remu_core::loader::{self, LoadError};
use remu_core::simulator::Simulator;

/// Default guest memory size: 128 MiB.
const DEFAULT_MEM_SIZE: &str = "128M";

#[derive(Parser, Debug)]
#[command(name = "remu", version, about = "RV32IMA virt-platform emulator")]
struct Args {
    /// Kernel image to load at the start of RAM.
    #[arg(short = 'k', long = "kernel")]
    kernel: PathBuf,

    /// Guest memory size: decimal bytes, or a value with a K/M/G suffix
    /// (case-insensitive, powers of 1024).
    #[arg(short = 'm', long = "mem-size", default_value = DEFAULT_MEM_SIZE,
          value_parser = parse_mem_size)]
    mem_size: u64,

    /// Device tree blob to place in the DTB window after RAM.
    #[arg(short = 'd', long = "dtb")]
    dtb: Option<PathBuf>,

    /// Stop after this many retired instructions (0 means no limit).
    #[arg(long = "max-instructions", default_value_t = 0)]
    max_instructions: u64,

    /// Treat a retired ECALL/EBREAK as a stop condition instead of letting
    /// it trap (debugging shortcut).
    #[arg(long = "halt-on-ecall")]
    halt_on_ecall: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            // Argument failures exit with code 1, like load failures.
            // --help and --version are not failures.
            return match err.use_stderr() {
                true => ExitCode::FAILURE,
                false => ExitCode::SUCCESS,
            };
        }
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), CliError> {
    let mem_size =
        u32::try_from(args.mem_size).map_err(|_| CliError::MemSizeTooLarge(args.mem_size))?;
    let mut board = Board::new(mem_size)?;

    loader::load_file(board.bus_mut(), map::RAM_BASE, &args.kernel)?;
    if let Some(dtb) = &args.dtb {
        let dtb_base = board.dtb_base();
        loader::load_file(board.bus_mut(), dtb_base, dtb)?;
    }

    let cpu = Cpu::new(Config {
        hart_id: 0,
        reset_vector: map::RAM_BASE,
        dtb_address: board.dtb_base(),
    });
    let mut simulator = Simulator::new(board, cpu);
    simulator.set_halt_on_ecall(args.halt_on_ecall);

    let result = simulator.run(args.max_instructions);
    info!(
        "stopped: {} after {} instructions (pc = {:#010x})",
        result.reason, result.instructions, result.last_pc
    );
    Ok(())
}

/// Parse a memory size: plain decimal bytes, or a K/M/G suffixed value
/// (case-insensitive, powers of 1024).
fn parse_mem_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty memory size".into());
    }
    let (number, multiplier) = match s.chars().last() {
        Some(suffix) if suffix.is_ascii_alphabetic() => {
            let multiplier: u64 = match suffix.to_ascii_uppercase() {
                'K' => 1 << 10,
                'M' => 1 << 20,
                'G' => 1 << 30,
                other => return Err(format!("unknown size suffix '{other}'")),
            };
            (&s[..s.len() - 1], multiplier)
        }
        _ => (s, 1),
    };
    let base: u64 = number
        .parse()
        .map_err(|_| format!("invalid memory size '{s}'"))?;
    let bytes = base
        .checked_mul(multiplier)
        .ok_or_else(|| format!("memory size '{s}' overflows"))?;
    if bytes == 0 {
        return Err("memory size must be nonzero".into());
    }
    Ok(bytes)
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("memory size {0:#x} does not fit in the 32-bit guest address space")]
    MemSizeTooLarge(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mem_size() {
        assert_eq!(Ok(134217728), parse_mem_size("134217728"));
        assert_eq!(Ok(128 << 20), parse_mem_size("128M"));
        assert_eq!(Ok(128 << 20), parse_mem_size("128m"));
        assert_eq!(Ok(64 << 10), parse_mem_size("64K"));
        assert_eq!(Ok(1 << 30), parse_mem_size("1G"));
        assert!(parse_mem_size("").is_err());
        assert!(parse_mem_size("M").is_err());
        assert!(parse_mem_size("12T").is_err());
        assert!(parse_mem_size("0").is_err());
        assert!(parse_mem_size("abc").is_err());
    }

    #[test]
    fn test_default_mem_size_parses_to_128_mib() {
        assert_eq!(Ok(128 << 20), parse_mem_size(DEFAULT_MEM_SIZE));
    }
}
