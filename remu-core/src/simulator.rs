//! The simulator loop driving the platform and the hart.

use log::{debug, trace};
use thiserror::Error;

use crate::board::Board;
use crate::core::{execute, Cpu, Execution, Fault};
use crate::instruction::{Instruction, Kind};

/// Upper bound on how many ticks a WFI may idle-advance time while waiting
/// for an interrupt to become deliverable. When no source can ever fire,
/// execution simply continues past the WFI once the budget is exhausted, so
/// the guest keeps making progress instead of livelocking the simulator.
const WFI_IDLE_BUDGET: u32 = 100_000;

/// Why a run stopped.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum StopReason {
    /// Clean stop at the configured maximum instruction count.
    #[error("instruction limit reached")]
    InstructionLimit,
    /// Instruction fetch landed outside any mapped region.
    #[error("instruction fetch faulted on the bus")]
    BusFaultFetch,
    /// The decoder returned an illegal encoding.
    #[error("illegal instruction")]
    IllegalInstruction,
    /// The executor reported an unrecoverable condition.
    #[error("execution failed: {0}")]
    ExecuteFailed(Fault),
    /// An ECALL or EBREAK retired while the halt-on-ecall debugging
    /// shortcut is enabled.
    #[error("environment call or breakpoint")]
    EcallOrEbreak,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub reason: StopReason,
    /// Instructions retired during this run (including those that retired
    /// into a trap).
    pub instructions: u64,
    pub last_pc: u32,
}

/// Interpreter loop over one hart and the virt board.
///
/// Each step performs, in order: device tick (with mip refresh and mcycle
/// increment), interrupt check, fetch, decode, execute. The tick-first
/// ordering guarantees that a timer whose deadline has just passed fires
/// before the next instruction retires, and interrupts only ever preempt at
/// instruction boundaries.
#[derive(Debug)]
pub struct Simulator {
    board: Board,
    cpu: Cpu,
    /// Debugging shortcut: when set, a retired ECALL/EBREAK stops the run
    /// with [`StopReason::EcallOrEbreak`] instead of entering the trap path.
    halt_on_ecall: bool,
    instructions: u64,
}

impl Simulator {
    pub fn new(board: Board, cpu: Cpu) -> Self {
        Self {
            board,
            cpu,
            halt_on_ecall: false,
            instructions: 0,
        }
    }

    /// Enable or disable the ECALL/EBREAK halt shortcut.
    pub fn set_halt_on_ecall(&mut self, enabled: bool) {
        self.halt_on_ecall = enabled;
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    /// Instructions retired since construction.
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Advance the simulation by one step. Returns `None` to keep going, or
    /// the reason to stop.
    ///
    /// A step that delivers an interrupt performs no fetch: the trap entry
    /// is the whole step.
    pub fn step(&mut self) -> Option<StopReason> {
        self.tick();

        if self.cpu.check_and_take_interrupt() {
            return None;
        }

        let pc = self.cpu.registers().pc();
        let raw = match self.board.bus().read32(pc) {
            Ok(raw) => raw,
            Err(error) => {
                debug!("fetch at {pc:#010x} failed: {error}");
                return Some(StopReason::BusFaultFetch);
            }
        };

        let instruction = Instruction::decode(raw);
        if instruction.kind == Kind::Illegal {
            debug!("illegal instruction {raw:#010x} at {pc:#010x}");
            return Some(StopReason::IllegalInstruction);
        }

        match execute(&mut self.cpu, self.board.bus_mut(), instruction) {
            Execution::Retired => {
                self.retire();
                None
            }
            Execution::TrapRaised => {
                // The faulting instruction retires into the trap; epc is its
                // own address since the executor left the PC untouched.
                self.retire();
                if self.halt_on_ecall {
                    if let Some((exception, _)) = self.cpu.pending_exception() {
                        if exception.is_environment_call_or_breakpoint() {
                            return Some(StopReason::EcallOrEbreak);
                        }
                    }
                }
                self.cpu.take_pending_exception();
                None
            }
            Execution::Wfi => {
                self.retire();
                self.idle_until_interrupt();
                None
            }
            Execution::Fault(fault) => {
                debug!("execution fault at {pc:#010x}: {fault}");
                Some(StopReason::ExecuteFailed(fault))
            }
        }
    }

    /// Run until a stop condition, or until `max_instructions` have retired
    /// (0 means no limit).
    pub fn run(&mut self, max_instructions: u64) -> RunResult {
        let reason = loop {
            if max_instructions != 0 && self.instructions >= max_instructions {
                break StopReason::InstructionLimit;
            }
            if let Some(reason) = self.step() {
                break reason;
            }
        };
        RunResult {
            reason,
            instructions: self.instructions,
            last_pc: self.cpu.registers().pc(),
        }
    }

    fn tick(&mut self) {
        self.board.tick(&mut self.cpu);
        self.cpu.counters_mut().increment_cycle();
    }

    fn retire(&mut self) {
        self.instructions += 1;
        self.cpu.counters_mut().increment_instret();
    }

    /// Advance time in place of executing instructions until an interrupt is
    /// deliverable, bounded by [`WFI_IDLE_BUDGET`].
    fn idle_until_interrupt(&mut self) {
        for spent in 0..WFI_IDLE_BUDGET {
            if self.cpu.interrupt_deliverable() {
                trace!("wfi: interrupt deliverable after {spent} idle ticks");
                return;
            }
            self.tick();
        }
        trace!("wfi: idle budget exhausted, continuing");
    }
}
