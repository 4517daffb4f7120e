//! A single RV32IMA hart.

pub mod control;
pub mod counters;
pub mod csr;
mod execute;
pub mod interrupts;
pub mod status;
pub mod trap;

use crate::registers::{Registers, Specifier};
use crate::PrivilegeLevel;
use control::Control;
use counters::Counters;
use interrupts::Interrupts;
use status::Status;
use trap::Trap;

pub use csr::{CsrError, CsrSpecifier};
pub use execute::{execute, Execution, Fault};

/// Hart configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// > The mhartid CSR is an MXLEN-bit read-only register containing the
    /// > integer ID of the hardware thread running the code. This register
    /// > must be readable in any implementation. [...] at least one hart must
    /// > have a hart ID of zero.
    pub hart_id: u32,
    /// Address to which the hart's PC register is reset.
    pub reset_vector: u32,
    /// Address of the device tree blob, passed to the guest in `a1` at reset.
    pub dtb_address: u32,
}

/// Architectural state of a single hart: program counter and `x` registers,
/// current privilege mode, the CSR bank (split into the component structs
/// that own related registers), the LR/SC reservation, and the staging slot
/// for a synchronous exception raised by the executor and delivered by the
/// trap logic.
///
/// As hardware multithreading is not modeled, the hart and its core are one
/// and the same.
#[derive(Debug)]
pub struct Cpu {
    config: Config,
    registers: Registers,
    privilege_mode: PrivilegeLevel,
    status: Status,
    interrupts: Interrupts,
    control: Control,
    counters: Counters,
    trap: Trap,
    /// Live LR/SC reservation, if any. Holds the address of the last LR.W;
    /// cleared by any SC.W or AMO, and at reset.
    reservation: Option<u32>,
    /// A synchronous exception raised during execution, waiting for the trap
    /// logic to deliver it. The executor stages `(cause, tval)` here instead
    /// of threading them through its return value.
    pending_exception: Option<(Exception, u32)>,
}

impl Cpu {
    /// The misa CSR value: MXL=RV32 with extensions I, M, and A.
    ///
    /// > The misa CSR is a WARL read-write register reporting the ISA
    /// > supported by the hart. This register must be readable in any
    /// > implementation, but a value of zero can be returned to indicate the
    /// > misa register has not been implemented.
    pub const MISA: u32 = (1 << 30) | (1 << 8) | (1 << 12) | 1;
    /// The mvendorid CSR is 0 to indicate a non-commercial implementation.
    pub const MVENDORID: u32 = 0;
    /// The marchid CSR is 0 to indicate it is not implemented.
    pub const MARCHID: u32 = 0;
    /// The mimpid CSR is 0 to indicate it is not implemented.
    pub const MIMPID: u32 = 0;

    /// Create a new hart in its reset state.
    pub fn new(config: Config) -> Self {
        let mut cpu = Self {
            config,
            registers: Registers::new(0),
            privilege_mode: PrivilegeLevel::Machine,
            status: Status::new(),
            interrupts: Interrupts::new(),
            control: Control::new(),
            counters: Counters::new(),
            trap: Trap::new(),
            reservation: None,
            pending_exception: None,
        };
        cpu.reset();
        cpu
    }

    /// Force this hart to its reset state: pc at the reset vector, privilege
    /// Machine, and the boot convention `a0` = hart id, `a1` = dtb address.
    pub fn reset(&mut self) {
        self.registers = Registers::new(self.config.reset_vector);
        self.registers.set_x(Specifier::A0, self.config.hart_id);
        self.registers.set_x(Specifier::A1, self.config.dtb_address);
        self.privilege_mode = PrivilegeLevel::Machine;
        self.status = Status::new();
        self.interrupts = Interrupts::new();
        self.control = Control::new();
        self.counters = Counters::new();
        self.trap = Trap::new();
        self.reservation = None;
        self.pending_exception = None;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// Returns the current privilege mode the hart is in.
    pub fn privilege_mode(&self) -> PrivilegeLevel {
        self.privilege_mode
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    pub fn interrupts(&self) -> &Interrupts {
        &self.interrupts
    }

    pub fn interrupts_mut(&mut self) -> &mut Interrupts {
        &mut self.interrupts
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    /// Stage a synchronous exception for the trap logic to deliver after the
    /// current instruction. The PC is left untouched, so the staged `epc` is
    /// the address of the instruction that raised the exception.
    pub fn stage_exception(&mut self, exception: Exception, tval: u32) {
        self.pending_exception = Some((exception, tval));
    }

    /// The staged exception, if any. It stays staged until
    /// [`take_pending_exception`](Self::take_pending_exception) consumes it.
    pub fn pending_exception(&self) -> Option<(Exception, u32)> {
        self.pending_exception
    }
}

/// Synchronous exceptions, with their architectural cause codes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a four-byte aligned boundary in memory.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    pub const fn code(&self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreOrAmoAddressMisaligned => 6,
            Self::StoreOrAmoAccessFault => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::EnvironmentCallFromMMode => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StoreOrAmoPageFault => 15,
        }
    }

    /// Returns `true` for the causes the environment may treat as a halt
    /// request when the ECALL/EBREAK debugging shortcut is enabled.
    pub fn is_environment_call_or_breakpoint(&self) -> bool {
        matches!(
            self,
            Self::Breakpoint
                | Self::EnvironmentCallFromUMode
                | Self::EnvironmentCallFromSMode
                | Self::EnvironmentCallFromMMode
        )
    }
}

/// Interrupt sources, with their architectural cause codes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Interrupt {
    SupervisorSoftwareInterrupt,
    MachineSoftwareInterrupt,
    SupervisorTimerInterrupt,
    MachineTimerInterrupt,
    SupervisorExternalInterrupt,
    MachineExternalInterrupt,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt, without the
    /// interrupt bit.
    pub const fn code(&self) -> u32 {
        match self {
            Self::SupervisorSoftwareInterrupt => 1,
            Self::MachineSoftwareInterrupt => 3,
            Self::SupervisorTimerInterrupt => 5,
            Self::MachineTimerInterrupt => 7,
            Self::SupervisorExternalInterrupt => 9,
            Self::MachineExternalInterrupt => 11,
        }
    }
}
