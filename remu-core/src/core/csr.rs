//! Specifiers and access dispatch for the supported CSRs.
//!
//! Debug-mode CSRs and the hypervisor extension are not supported.

use thiserror::Error;

use super::Cpu;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// General 12-bit value representing a CSR specifier. Note that this can
/// hold any 12-bit value, even if the value represents an unsupported or
/// non-existent CSR.
pub type CsrSpecifier = u16;

//
// Supervisor trap setup (`0x100`, `0x104..=0x105`).
//
/// Supervisor status register; a restricted view of [`MSTATUS`].
pub const SSTATUS: CsrSpecifier = 0x100;
/// Supervisor interrupt-enable register; a restricted view of [`MIE`].
pub const SIE: CsrSpecifier = 0x104;
/// Supervisor trap handler base address.
pub const STVEC: CsrSpecifier = 0x105;

//
// Supervisor trap handling (`0x140..=0x144`).
//
/// Scratch register for supervisor trap handling.
pub const SSCRATCH: CsrSpecifier = 0x140;
/// Supervisor exception program counter.
pub const SEPC: CsrSpecifier = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: CsrSpecifier = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: CsrSpecifier = 0x143;
/// Supervisor interrupt pending; a restricted view of [`MIP`].
pub const SIP: CsrSpecifier = 0x144;

//
// Supervisor protection and translation (`0x180`).
//
/// Supervisor address translation and protection. Plain storage; no
/// translation is performed.
pub const SATP: CsrSpecifier = 0x180;

//
// Machine trap setup (`0x300..=0x305`).
//
/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions. Read-only in this implementation.
pub const MISA: CsrSpecifier = 0x301;
/// Machine exception delegation register.
pub const MEDELEG: CsrSpecifier = 0x302;
/// Machine interrupt delegation register.
pub const MIDELEG: CsrSpecifier = 0x303;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap handler base address.
pub const MTVEC: CsrSpecifier = 0x305;

//
// Machine trap handling (`0x340..=0x344`).
//
/// Scratch register for machine trap handling.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

//
// Machine memory protection (`0x3A0`, `0x3B0`). Plain storage; protection is
// not enforced.
//
pub const PMPCFG0: CsrSpecifier = 0x3A0;
pub const PMPADDR0: CsrSpecifier = 0x3B0;

//
// Machine counters (`0xB00`, `0xB02`, `0xB80`, `0xB82`).
//
/// Machine cycle counter, low half.
pub const MCYCLE: CsrSpecifier = 0xB00;
/// Machine instructions-retired counter, low half.
pub const MINSTRET: CsrSpecifier = 0xB02;
/// Upper 32 bits of [`MCYCLE`], RV32 only.
pub const MCYCLEH: CsrSpecifier = 0xB80;
/// Upper 32 bits of [`MINSTRET`], RV32 only.
pub const MINSTRETH: CsrSpecifier = 0xB82;

//
// Unprivileged counter shadows (`0xC00`, `0xC02`, `0xC80`, `0xC82`).
//
/// Cycle counter for the RDCYCLE pseudoinstruction; read-only shadow of
/// [`MCYCLE`].
pub const CYCLE: CsrSpecifier = 0xC00;
/// Instructions-retired counter; read-only shadow of [`MINSTRET`].
pub const INSTRET: CsrSpecifier = 0xC02;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;

//
// Machine information registers (`0xF11..=0xF14`).
//
/// Vendor ID.
pub const MVENDORID: CsrSpecifier = 0xF11;
/// Architecture ID.
pub const MARCHID: CsrSpecifier = 0xF12;
/// Implementation ID.
pub const MIMPID: CsrSpecifier = 0xF13;
/// Hardware thread ID.
pub const MHARTID: CsrSpecifier = 0xF14;

/// Returns `true` if the specifier addresses a read-only CSR.
///
/// > The top two bits (csr\[11:10]) indicate whether the register is
/// > read/write (00, 01, or 10) or read-only (11).
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    specifier >> 10 == 0b11
}

/// The lowest privilege level that may access this CSR.
///
/// > The next two bits (csr\[9:8]) encode the lowest privilege level that
/// > can access the CSR.
pub fn required_privilege_level(specifier: CsrSpecifier) -> RawPrivilegeLevel {
    RawPrivilegeLevel::from_u2((specifier >> 8) as u8 & 0b11)
}

/// Errors that can occur when attempting to access a CSR.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CsrError {
    #[error("unsupported CSR: {0:#05X}")]
    Unsupported(CsrSpecifier),
    /// Attempt to access a CSR that requires a higher privilege level.
    #[error(
        "cannot access CSR {specifier:#05X} from privilege level {actual_level}, \
         since it requires privilege level {required_level}"
    )]
    Privileged {
        specifier: CsrSpecifier,
        required_level: RawPrivilegeLevel,
        actual_level: PrivilegeLevel,
    },
    /// Attempt to write to a read-only register.
    #[error("writing to read-only CSR {0:#05X} is invalid")]
    WriteToReadOnly(CsrSpecifier),
}

impl Cpu {
    /// Read the value of a CSR by its specifier, at the hart's current
    /// privilege level.
    pub fn read_csr(&self, specifier: CsrSpecifier) -> Result<u32, CsrError> {
        self.check_csr_access(specifier)?;
        match specifier {
            SSTATUS => Ok(self.status.read_sstatus()),
            SIE => Ok(self.interrupts.read_sie()),
            STVEC => Ok(self.control.stvec.read()),
            SSCRATCH => Ok(self.trap.read_sscratch()),
            SEPC => Ok(self.trap.read_sepc()),
            SCAUSE => Ok(self.trap.read_scause()),
            STVAL => Ok(self.trap.read_stval()),
            SIP => Ok(self.interrupts.read_sip()),
            SATP => Ok(self.control.satp),

            MSTATUS => Ok(self.status.read_mstatus()),
            MISA => Ok(Self::MISA),
            MEDELEG => Ok(self.control.medeleg.read()),
            MIDELEG => Ok(self.interrupts.read_mideleg()),
            MIE => Ok(self.interrupts.read_mie()),
            MTVEC => Ok(self.control.mtvec.read()),
            MSCRATCH => Ok(self.trap.read_mscratch()),
            MEPC => Ok(self.trap.read_mepc()),
            MCAUSE => Ok(self.trap.read_mcause()),
            MTVAL => Ok(self.trap.read_mtval()),
            MIP => Ok(self.interrupts.read_mip()),
            PMPCFG0 => Ok(self.control.pmpcfg0),
            PMPADDR0 => Ok(self.control.pmpaddr0),

            MCYCLE | CYCLE => Ok(self.counters.read_mcycle()),
            MCYCLEH | CYCLEH => Ok(self.counters.read_mcycleh()),
            MINSTRET | INSTRET => Ok(self.counters.read_minstret()),
            MINSTRETH | INSTRETH => Ok(self.counters.read_minstreth()),

            MVENDORID => Ok(Self::MVENDORID),
            MARCHID => Ok(Self::MARCHID),
            MIMPID => Ok(Self::MIMPID),
            MHARTID => Ok(self.config.hart_id),

            _ => Err(CsrError::Unsupported(specifier)),
        }
    }

    /// Write `value & mask` into the masked bits of a CSR, performing the
    /// register's side effects (view merging, WARL clamping).
    pub fn write_csr(
        &mut self,
        specifier: CsrSpecifier,
        value: u32,
        mask: u32,
    ) -> Result<(), CsrError> {
        self.check_csr_access(specifier)?;
        if is_read_only(specifier) {
            return Err(CsrError::WriteToReadOnly(specifier));
        }
        match specifier {
            SSTATUS => self.status.write_sstatus(value, mask),
            SIE => self.interrupts.write_sie(value, mask),
            STVEC => self.control.stvec.write(value, mask),
            SSCRATCH => self.trap.write_sscratch(value, mask),
            SEPC => self.trap.write_sepc(value, mask),
            SCAUSE => self.trap.write_scause(value, mask),
            STVAL => self.trap.write_stval(value, mask),
            SIP => self.interrupts.write_sip(value, mask),
            SATP => self.control.satp = self.control.satp & !mask | value & mask,

            MSTATUS => self.status.write_mstatus(value, mask),
            // misa is WARL and this implementation ignores writes entirely.
            MISA => {}
            MEDELEG => self.control.medeleg.write(value, mask),
            MIDELEG => self.interrupts.write_mideleg(value, mask),
            MIE => self.interrupts.write_mie(value, mask),
            MTVEC => self.control.mtvec.write(value, mask),
            MSCRATCH => self.trap.write_mscratch(value, mask),
            MEPC => self.trap.write_mepc(value, mask),
            MCAUSE => self.trap.write_mcause(value, mask),
            MTVAL => self.trap.write_mtval(value, mask),
            MIP => self.interrupts.write_mip(value, mask),
            PMPCFG0 => self.control.pmpcfg0 = self.control.pmpcfg0 & !mask | value & mask,
            PMPADDR0 => self.control.pmpaddr0 = self.control.pmpaddr0 & !mask | value & mask,

            MCYCLE => self.counters.write_mcycle(value, mask),
            MCYCLEH => self.counters.write_mcycleh(value, mask),
            MINSTRET => self.counters.write_minstret(value, mask),
            MINSTRETH => self.counters.write_minstreth(value, mask),

            _ => return Err(CsrError::Unsupported(specifier)),
        }
        Ok(())
    }

    fn check_csr_access(&self, specifier: CsrSpecifier) -> Result<(), CsrError> {
        let required_level = required_privilege_level(specifier);
        if self.privilege_mode() < required_level {
            return Err(CsrError::Privileged {
                specifier,
                required_level,
                actual_level: self.privilege_mode(),
            });
        }
        Ok(())
    }
}
