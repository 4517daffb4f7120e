//! Instruction semantics for RV32IMA + Zicsr.

use thiserror::Error;

use super::csr::{CsrError, CsrSpecifier};
use super::{Cpu, Exception};
use crate::bus::{AccessError, Bus};
use crate::instruction::{Instruction, Kind};
use crate::registers::{Registers, Specifier};
use crate::PrivilegeLevel;

/// Outcome of executing one instruction.
///
/// Exceptions never travel through this value: the executor stages them on
/// the CPU ([`Cpu::stage_exception`]) and reports only the `TrapRaised`
/// discriminator, leaving the PC at the faulting instruction so the trap
/// logic can use it as the epc.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Execution {
    /// Normal retirement; the PC has been updated.
    Retired,
    /// A synchronous exception is staged on the CPU; the PC still points at
    /// the faulting instruction.
    TrapRaised,
    /// A WFI instruction; the PC has already advanced past it.
    Wfi,
    /// An unrecoverable simulator condition. The guest state is no longer
    /// trustworthy and the run should stop.
    Fault(Fault),
}

/// Unrecoverable simulator conditions discovered during execution.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Fault {
    #[error("data-side bus failure: {0}")]
    Bus(#[from] AccessError),
    #[error("write to unimplemented CSR {0:#05X}")]
    UnimplementedCsr(CsrSpecifier),
    #[error("illegal encoding reached the executor")]
    IllegalEncoding,
}

/// Why an instruction did not retire normally. Internal to the executor;
/// [`execute`] folds this into [`Execution`].
enum Abort {
    Exception(Exception, u32),
    Fault(Fault),
}

impl From<AccessError> for Abort {
    fn from(error: AccessError) -> Self {
        Self::Fault(Fault::Bus(error))
    }
}

type ExecutionResult = Result<(), Abort>;

/// Execute one decoded instruction against `cpu` and `bus`.
pub fn execute(cpu: &mut Cpu, bus: &mut Bus, instruction: Instruction) -> Execution {
    let mut executor = Executor {
        cpu: &mut *cpu,
        bus: &mut *bus,
    };
    let Instruction {
        kind,
        rd,
        rs1,
        rs2,
        imm,
        length,
        ..
    } = instruction;

    let result = match kind {
        Kind::Illegal => return Execution::Fault(Fault::IllegalEncoding),
        Kind::Wfi => {
            // WFI retires immediately; the simulator decides how long to
            // idle. The PC must already point past the instruction.
            let registers = executor.cpu.registers_mut();
            *registers.pc_mut() = registers.pc().wrapping_add(length);
            return Execution::Wfi;
        }

        Kind::Lui => executor.lui(rd, imm),
        Kind::Auipc => executor.auipc(rd, imm),
        Kind::Jal => executor.jal(rd, imm),
        Kind::Jalr => executor.jalr(rd, rs1, imm),

        Kind::Beq => executor.cond_branch(rs1, rs2, imm, |a, b| a == b),
        Kind::Bne => executor.cond_branch(rs1, rs2, imm, |a, b| a != b),
        Kind::Blt => executor.cond_branch(rs1, rs2, imm, |a, b| (a as i32) < (b as i32)),
        Kind::Bge => executor.cond_branch(rs1, rs2, imm, |a, b| (a as i32) >= (b as i32)),
        Kind::Bltu => executor.cond_branch(rs1, rs2, imm, |a, b| a < b),
        Kind::Bgeu => executor.cond_branch(rs1, rs2, imm, |a, b| a >= b),

        Kind::Lb => executor.load_op(rd, rs1, imm, |bus, address| {
            bus.read8(address).map(|v| v as i8 as u32)
        }),
        Kind::Lbu => executor.load_op(rd, rs1, imm, |bus, address| {
            bus.read8(address).map(|v| v as u32)
        }),
        Kind::Lh => executor.load_op(rd, rs1, imm, |bus, address| {
            bus.read16(address).map(|v| v as i16 as u32)
        }),
        Kind::Lhu => executor.load_op(rd, rs1, imm, |bus, address| {
            bus.read16(address).map(|v| v as u32)
        }),
        Kind::Lw => executor.load_op(rd, rs1, imm, |bus, address| bus.read32(address)),

        Kind::Sb => executor.store_op(rs1, rs2, imm, |bus, address, value| {
            bus.write8(address, value as u8)
        }),
        Kind::Sh => executor.store_op(rs1, rs2, imm, |bus, address, value| {
            bus.write16(address, value as u16)
        }),
        Kind::Sw => executor.store_op(rs1, rs2, imm, |bus, address, value| {
            bus.write32(address, value)
        }),

        Kind::Addi => executor.reg_imm_op(rd, rs1, imm, |s, imm| s.wrapping_add_signed(imm)),
        Kind::Slti => executor.reg_imm_op(rd, rs1, imm, |s, imm| ((s as i32) < imm) as u32),
        Kind::Sltiu => executor.reg_imm_op(rd, rs1, imm, |s, imm| (s < imm as u32) as u32),
        Kind::Xori => executor.reg_imm_op(rd, rs1, imm, |s, imm| s ^ imm as u32),
        Kind::Ori => executor.reg_imm_op(rd, rs1, imm, |s, imm| s | imm as u32),
        Kind::Andi => executor.reg_imm_op(rd, rs1, imm, |s, imm| s & imm as u32),
        // The decoder guarantees the immediate of a shift is in `0..32`.
        Kind::Slli => executor.reg_imm_op(rd, rs1, imm, |s, shamt| s << shamt),
        Kind::Srli => executor.reg_imm_op(rd, rs1, imm, |s, shamt| s >> shamt),
        Kind::Srai => executor.reg_imm_op(rd, rs1, imm, |s, shamt| ((s as i32) >> shamt) as u32),

        Kind::Add => executor.reg_reg_op(rd, rs1, rs2, |a, b| a.wrapping_add(b)),
        Kind::Sub => executor.reg_reg_op(rd, rs1, rs2, |a, b| a.wrapping_sub(b)),
        Kind::Sll => executor.reg_reg_op(rd, rs1, rs2, |a, b| a << (b & 0x1F)),
        Kind::Slt => executor.reg_reg_op(rd, rs1, rs2, |a, b| ((a as i32) < (b as i32)) as u32),
        Kind::Sltu => executor.reg_reg_op(rd, rs1, rs2, |a, b| (a < b) as u32),
        Kind::Xor => executor.reg_reg_op(rd, rs1, rs2, |a, b| a ^ b),
        Kind::Srl => executor.reg_reg_op(rd, rs1, rs2, |a, b| a >> (b & 0x1F)),
        Kind::Sra => executor.reg_reg_op(rd, rs1, rs2, |a, b| ((a as i32) >> (b & 0x1F)) as u32),
        Kind::Or => executor.reg_reg_op(rd, rs1, rs2, |a, b| a | b),
        Kind::And => executor.reg_reg_op(rd, rs1, rs2, |a, b| a & b),

        Kind::Mul => executor.reg_reg_op(rd, rs1, rs2, |a, b| a.wrapping_mul(b)),
        Kind::Mulh => executor.reg_reg_op(rd, rs1, rs2, |a, b| {
            ((a as i32 as i64).wrapping_mul(b as i32 as i64) >> 32) as u32
        }),
        Kind::Mulhsu => executor.reg_reg_op(rd, rs1, rs2, |a, b| {
            // rs1 sign-extends to 64 bits, rs2 zero-extends.
            ((a as i32 as i64).wrapping_mul(b as i64) >> 32) as u32
        }),
        Kind::Mulhu => executor.reg_reg_op(rd, rs1, rs2, |a, b| {
            ((a as u64 * b as u64) >> 32) as u32
        }),
        Kind::Div => executor.reg_reg_op(rd, rs1, rs2, div),
        Kind::Divu => executor.reg_reg_op(rd, rs1, rs2, divu),
        Kind::Rem => executor.reg_reg_op(rd, rs1, rs2, rem),
        Kind::Remu => executor.reg_reg_op(rd, rs1, rs2, remu),

        Kind::Fence => executor.fence(),
        Kind::Ecall => executor.ecall(),
        Kind::Ebreak => executor.ebreak(),
        Kind::Mret => executor.mret(),
        Kind::Sret => executor.sret(),

        Kind::Csrrw => executor.csr_reg_op(CsrOp::ReadWrite, rd, instruction.csr(), rs1),
        Kind::Csrrs => executor.csr_reg_op(CsrOp::ReadSet, rd, instruction.csr(), rs1),
        Kind::Csrrc => executor.csr_reg_op(CsrOp::ReadClear, rd, instruction.csr(), rs1),
        Kind::Csrrwi => {
            executor.csr_imm_op(CsrOp::ReadWrite, rd, instruction.csr(), u32::from(rs1))
        }
        Kind::Csrrsi => executor.csr_imm_op(CsrOp::ReadSet, rd, instruction.csr(), u32::from(rs1)),
        Kind::Csrrci => {
            executor.csr_imm_op(CsrOp::ReadClear, rd, instruction.csr(), u32::from(rs1))
        }

        Kind::LrW => executor.lr_w(rd, rs1),
        Kind::ScW => executor.sc_w(rd, rs1, rs2),
        Kind::AmoswapW => executor.amo_op(rd, rs1, rs2, |_, src| src),
        Kind::AmoaddW => executor.amo_op(rd, rs1, rs2, |old, src| old.wrapping_add(src)),
        Kind::AmoxorW => executor.amo_op(rd, rs1, rs2, |old, src| old ^ src),
        Kind::AmoandW => executor.amo_op(rd, rs1, rs2, |old, src| old & src),
        Kind::AmoorW => executor.amo_op(rd, rs1, rs2, |old, src| old | src),
        Kind::AmominW => executor.amo_op(rd, rs1, rs2, |old, src| {
            (old as i32).min(src as i32) as u32
        }),
        Kind::AmomaxW => executor.amo_op(rd, rs1, rs2, |old, src| {
            (old as i32).max(src as i32) as u32
        }),
        Kind::AmominuW => executor.amo_op(rd, rs1, rs2, |old, src| old.min(src)),
        Kind::AmomaxuW => executor.amo_op(rd, rs1, rs2, |old, src| old.max(src)),
    };

    match result {
        Ok(()) => Execution::Retired,
        Err(Abort::Exception(exception, tval)) => {
            cpu.stage_exception(exception, tval);
            Execution::TrapRaised
        }
        Err(Abort::Fault(fault)) => Execution::Fault(fault),
    }
}

/// RV32M signed division.
///
/// > The quotient of division by zero has all bits set. Signed division
/// > overflow occurs only when the most-negative integer is divided by −1;
/// > the quotient [...] is equal to the dividend.
fn div(a: u32, b: u32) -> u32 {
    let (a, b) = (a as i32, b as i32);
    if b == 0 {
        u32::MAX
    } else if a == i32::MIN && b == -1 {
        i32::MIN as u32
    } else {
        (a / b) as u32
    }
}

fn divu(a: u32, b: u32) -> u32 {
    if b == 0 {
        u32::MAX
    } else {
        a / b
    }
}

/// > The remainder of division by zero equals the dividend. [...] the
/// > remainder of signed division overflow is zero.
fn rem(a: u32, b: u32) -> u32 {
    let (a, b) = (a as i32, b as i32);
    if b == 0 {
        a as u32
    } else if a == i32::MIN && b == -1 {
        0
    } else {
        (a % b) as u32
    }
}

fn remu(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        a % b
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CsrOp {
    ReadWrite,
    ReadSet,
    ReadClear,
}

#[derive(Debug)]
struct Executor<'a> {
    cpu: &'a mut Cpu,
    bus: &'a mut Bus,
}

impl Executor<'_> {
    /// > LUI (load upper immediate) [...] places the U-immediate value in
    /// > the top 20 bits of the destination register rd, filling in the
    /// > lowest 12 bits with zeros.
    fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        let registers = self.cpu.registers_mut();
        registers.set_x(dest, immediate as u32);
        increment_pc(registers);
        Ok(())
    }

    /// > AUIPC (add upper immediate to pc) [...] forms a 32-bit offset from
    /// > the 20-bit U-immediate, filling in the lowest 12 bits with zeros,
    /// > adds this offset to the address of the AUIPC instruction, then
    /// > places the result in register rd.
    fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        let registers = self.cpu.registers_mut();
        let result = registers.pc().wrapping_add_signed(immediate);
        registers.set_x(dest, result);
        increment_pc(registers);
        Ok(())
    }

    fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        self.jump_op(dest, |registers| registers.pc().wrapping_add_signed(offset))
    }

    /// > The target address is obtained by adding the sign-extended 12-bit
    /// > I-immediate to the register rs1, then setting the least-significant
    /// > bit of the result to zero.
    fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.jump_op(dest, |registers| {
            registers.x(base).wrapping_add_signed(offset) & !1
        })
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Registers) -> u32,
    {
        let registers = self.cpu.registers_mut();
        let target = compute_target(registers);
        let link = registers.pc().wrapping_add(4);
        *registers.pc_mut() = target;
        registers.set_x(dest, link);
        Ok(())
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u32, u32) -> bool,
    {
        let registers = self.cpu.registers_mut();
        if predicate(registers.x(src1), registers.x(src2)) {
            *registers.pc_mut() = registers.pc().wrapping_add_signed(offset);
        } else {
            increment_pc(registers);
        }
        Ok(())
    }

    fn load_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        offset: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&mut Bus, u32) -> Result<u32, AccessError>,
    {
        let address = self.cpu.registers().x(base).wrapping_add_signed(offset);
        let value = op(self.bus, address)?;
        let registers = self.cpu.registers_mut();
        registers.set_x(dest, value);
        increment_pc(registers);
        Ok(())
    }

    fn store_op<F>(
        &mut self,
        base: Specifier,
        src: Specifier,
        offset: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&mut Bus, u32, u32) -> Result<(), AccessError>,
    {
        let registers = self.cpu.registers();
        let address = registers.x(base).wrapping_add_signed(offset);
        let value = registers.x(src);
        op(self.bus, address, value)?;
        increment_pc(self.cpu.registers_mut());
        Ok(())
    }

    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let registers = self.cpu.registers_mut();
        registers.set_x(dest, op(registers.x(src), immediate));
        increment_pc(registers);
        Ok(())
    }

    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = self.cpu.registers_mut();
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        increment_pc(registers);
        Ok(())
    }

    /// Since only one hart is modeled and every access completes before the
    /// next instruction starts, FENCE has nothing to order.
    fn fence(&mut self) -> ExecutionResult {
        increment_pc(self.cpu.registers_mut());
        Ok(())
    }

    /// Stage an environment call for the current privilege mode. The PC is
    /// left at the ECALL itself so it becomes the epc.
    fn ecall(&mut self) -> ExecutionResult {
        let cause = match self.cpu.privilege_mode() {
            PrivilegeLevel::User => Exception::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Exception::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Exception::EnvironmentCallFromMMode,
        };
        Err(Abort::Exception(cause, 0))
    }

    fn ebreak(&mut self) -> ExecutionResult {
        Err(Abort::Exception(Exception::Breakpoint, 0))
    }

    /// > MRET [...] To return after handling a trap, there are separate trap
    /// > return instructions per privilege level. An xRET instruction can be
    /// > executed in privilege mode x or higher.
    fn mret(&mut self) -> ExecutionResult {
        if self.cpu.privilege_mode() < PrivilegeLevel::Machine {
            return Err(Abort::Exception(Exception::IllegalInstruction, 0));
        }
        self.cpu.leave_machine_trap();
        Ok(())
    }

    fn sret(&mut self) -> ExecutionResult {
        if self.cpu.privilege_mode() < PrivilegeLevel::Supervisor {
            return Err(Abort::Exception(Exception::IllegalInstruction, 0));
        }
        self.cpu.leave_supervisor_trap();
        Ok(())
    }

    fn csr_reg_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    ) -> ExecutionResult {
        let source = (op == CsrOp::ReadWrite || src != Specifier::X0)
            .then(|| self.cpu.registers().x(src));
        self.csr_op(op, dest, csr, source)
    }

    fn csr_imm_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        let source = (op == CsrOp::ReadWrite || immediate != 0).then_some(immediate);
        self.csr_op(op, dest, csr, source)
    }

    /// Common CSR read-then-write. The read is always performed, including
    /// for CSRRW/CSRRWI with rd = x0; the old value only lands in rd when
    /// rd is not x0. A set/clear with a zero source (`src_value` of `None`)
    /// skips the write and all of its side effects.
    ///
    /// An unsupported or privileged read, and any non-write-capable
    /// destination, is an illegal-instruction condition; a write to a CSR
    /// the simulator does not implement at all is a [`Fault`], since guest
    /// state can no longer be trusted past that point.
    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src_value: Option<u32>,
    ) -> ExecutionResult {
        let old_value = self
            .cpu
            .read_csr(csr)
            .map_err(|_| Abort::Exception(Exception::IllegalInstruction, 0))?;
        if let Some(src_value) = src_value {
            let (value, mask) = match op {
                CsrOp::ReadWrite => (src_value, 0xFFFF_FFFF),
                CsrOp::ReadSet => (0xFFFF_FFFF, src_value),
                CsrOp::ReadClear => (0x0000_0000, src_value),
            };
            match self.cpu.write_csr(csr, value, mask) {
                Ok(()) => {}
                Err(CsrError::Unsupported(specifier)) => {
                    return Err(Abort::Fault(Fault::UnimplementedCsr(specifier)));
                }
                Err(_) => return Err(Abort::Exception(Exception::IllegalInstruction, 0)),
            }
        }
        let registers = self.cpu.registers_mut();
        registers.set_x(dest, old_value);
        increment_pc(registers);
        Ok(())
    }

    /// > LR.W loads a word from the address in rs1, places the sign-extended
    /// > value in rd, and registers a reservation set [...]
    fn lr_w(&mut self, dest: Specifier, base: Specifier) -> ExecutionResult {
        let address = self.cpu.registers().x(base);
        let value = self.bus.read32(address)?;
        self.cpu.reservation = Some(address);
        let registers = self.cpu.registers_mut();
        registers.set_x(dest, value);
        increment_pc(registers);
        Ok(())
    }

    /// > SC.W conditionally writes a word in rs2 to the address in rs1 [...]
    /// > SC.W writes zero to rd on success or a nonzero code on failure.
    ///
    /// The store succeeds only against the reservation established by the
    /// last LR.W at the same address; success or failure, the reservation is
    /// gone afterwards.
    fn sc_w(&mut self, dest: Specifier, base: Specifier, src: Specifier) -> ExecutionResult {
        let registers = self.cpu.registers();
        let address = registers.x(base);
        let value = registers.x(src);
        let matched = self.cpu.reservation == Some(address);
        self.cpu.reservation = None;
        if matched {
            self.bus.write32(address, value)?;
        }
        let registers = self.cpu.registers_mut();
        registers.set_x(dest, !matched as u32);
        increment_pc(registers);
        Ok(())
    }

    /// Atomic read-modify-write. Atomicity is trivial: the interpreter is
    /// the only agent, so no access can interleave. Every AMO invalidates
    /// the LR/SC reservation.
    fn amo_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        src: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = self.cpu.registers();
        let address = registers.x(base);
        let source = registers.x(src);
        let old = self.bus.read32(address)?;
        self.bus.write32(address, op(old, source))?;
        self.cpu.reservation = None;
        let registers = self.cpu.registers_mut();
        registers.set_x(dest, old);
        increment_pc(registers);
        Ok(())
    }
}

fn increment_pc(registers: &mut Registers) {
    let pc = registers.pc_mut();
    *pc = pc.wrapping_add(4);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{csr, Config};
    use crate::instruction::Instruction;
    use crate::memory::Memory;

    const RAM_BASE: u32 = 0x8000_0000;

    fn cpu() -> Cpu {
        Cpu::new(Config {
            hart_id: 0,
            reset_vector: RAM_BASE,
            dtb_address: 0x8800_0000,
        })
    }

    fn bus() -> Bus {
        let mut bus = Bus::new();
        bus.map_ram(Memory::new(RAM_BASE, 0x1000).unwrap());
        bus
    }

    fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    fn run(cpu: &mut Cpu, bus: &mut Bus, raw: u32) -> Execution {
        execute(cpu, bus, Instruction::decode(raw))
    }

    #[test]
    fn test_addi_nop() {
        let (mut cpu, mut bus) = (cpu(), bus());
        // addi x0, x0, 0 at the reset vector
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0000_0013));
        assert_eq!(0x8000_0004, cpu.registers().pc());
        // All registers still hold their reset values.
        for i in 0..32 {
            let expected = if i == 11 { 0x8800_0000 } else { 0 };
            assert_eq!(expected, cpu.registers().x(x(i)));
        }
    }

    #[test]
    fn test_add() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 5);
        cpu.registers_mut().set_x(x(2), 7);
        // add x3, x1, x2
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x002081B3));
        assert_eq!(12, cpu.registers().x(x(3)));
        assert_eq!(0x8000_0004, cpu.registers().pc());
    }

    #[test]
    fn test_auipc() {
        let (mut cpu, mut bus) = (cpu(), bus());
        // auipc x5, 0x1 — rd = pc + 0x1000
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0000_1297));
        assert_eq!(0x8000_1000, cpu.registers().x(x(5)));
    }

    #[test]
    fn test_jal() {
        let (mut cpu, mut bus) = (cpu(), bus());
        // jal x1, +8
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0080_00EF));
        assert_eq!(0x8000_0004, cpu.registers().x(x(1)));
        assert_eq!(0x8000_0008, cpu.registers().pc());
    }

    #[test]
    fn test_jalr_clears_low_bit() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 0x8000_0101);
        // jalr x2, 0(x1)
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0000_8167));
        assert_eq!(0x8000_0100, cpu.registers().pc());
        assert_eq!(0x8000_0004, cpu.registers().x(x(2)));
    }

    #[test]
    fn test_branch_taken_and_not_taken() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 5);
        cpu.registers_mut().set_x(x(2), 5);
        // beq x1, x2, +16
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0020_8863));
        assert_eq!(0x8000_0010, cpu.registers().pc());
        // blt x1, x2, +16 — not taken, 5 < 5 is false
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0020_C863));
        assert_eq!(0x8000_0014, cpu.registers().pc());
    }

    #[test]
    fn test_branch_signedness() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 0xFFFF_FFFF); // -1 signed, huge unsigned
        cpu.registers_mut().set_x(x(2), 1);
        // blt x1, x2, +16: signed -1 < 1, taken
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0020_C863));
        assert_eq!(0x8000_0010, cpu.registers().pc());
        // bltu x1, x2, +16: unsigned max < 1 is false, not taken
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0020_E863));
        assert_eq!(0x8000_0014, cpu.registers().pc());
    }

    #[test]
    fn test_loads_extend_correctly() {
        let (mut cpu, mut bus) = (cpu(), bus());
        bus.write32(RAM_BASE + 0x100, 0xFFFF_FF80).unwrap();
        cpu.registers_mut().set_x(x(1), RAM_BASE + 0x100);
        // lb x2, 0(x1) — sign-extends 0x80
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0000_8103));
        assert_eq!(0xFFFF_FF80, cpu.registers().x(x(2)));
        // lbu x2, 0(x1) — zero-extends 0x80
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0000_C103));
        assert_eq!(0x0000_0080, cpu.registers().x(x(2)));
        // lhu x2, 0(x1)
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0000_D103));
        assert_eq!(0x0000_FF80, cpu.registers().x(x(2)));
    }

    #[test]
    fn test_store_then_load_round_trip() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), RAM_BASE + 0x200);
        cpu.registers_mut().set_x(x(2), 0xDEAD_BEEF);
        // sw x2, 0(x1)
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0020_A023));
        // lw x3, 0(x1)
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0000_A183));
        assert_eq!(0xDEAD_BEEF, cpu.registers().x(x(3)));
    }

    #[test]
    fn test_load_outside_any_region_is_a_fault() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 0x4000_0000);
        // lw x2, 0(x1)
        let Execution::Fault(Fault::Bus(_)) = run(&mut cpu, &mut bus, 0x0000_A103) else {
            panic!("expected a bus fault");
        };
        // PC unchanged: the instruction did not retire.
        assert_eq!(RAM_BASE, cpu.registers().pc());
    }

    #[test]
    fn test_shifts_use_low_five_bits() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 0x8000_0000);
        cpu.registers_mut().set_x(x(2), 33); // only the low 5 bits count
        // srl x3, x1, x2 — shift by 1
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0020_D1B3));
        assert_eq!(0x4000_0000, cpu.registers().x(x(3)));
        // sra x3, x1, x2 — arithmetic shift by 1
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x4020_D1B3));
        assert_eq!(0xC000_0000, cpu.registers().x(x(3)));
    }

    #[test]
    fn test_mul_high_halves() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 0xFFFF_FFFF);
        cpu.registers_mut().set_x(x(2), 0xFFFF_FFFF);
        // mul x3, x1, x2: (-1) * (-1) = 1
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_81B3));
        assert_eq!(1, cpu.registers().x(x(3)));
        // mulh x3, x1, x2: high half of 1 is 0
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_91B3));
        assert_eq!(0, cpu.registers().x(x(3)));
        // mulhu x3, x1, x2: high half of 0xFFFFFFFE_00000001
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_B1B3));
        assert_eq!(0xFFFF_FFFE, cpu.registers().x(x(3)));
        // mulhsu x3, x1, x2: (-1) * 0xFFFFFFFF = -0xFFFFFFFF, high half
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_A1B3));
        assert_eq!(0xFFFF_FFFF, cpu.registers().x(x(3)));
    }

    #[test]
    fn test_division_edge_cases() {
        let (mut cpu, mut bus) = (cpu(), bus());
        // Signed overflow: INT32_MIN / -1.
        cpu.registers_mut().set_x(x(1), 0x8000_0000);
        cpu.registers_mut().set_x(x(2), 0xFFFF_FFFF);
        // div x3, x1, x2
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_C1B3));
        assert_eq!(0x8000_0000, cpu.registers().x(x(3)));
        // rem x3, x1, x2
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_E1B3));
        assert_eq!(0, cpu.registers().x(x(3)));

        // Division by zero.
        cpu.registers_mut().set_x(x(1), 42);
        cpu.registers_mut().set_x(x(2), 0);
        // div x3, x1, x2 — all ones
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_C1B3));
        assert_eq!(u32::MAX, cpu.registers().x(x(3)));
        // divu x3, x1, x2 — all ones
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_D1B3));
        assert_eq!(u32::MAX, cpu.registers().x(x(3)));
        // rem x3, x1, x2 — the dividend
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_E1B3));
        assert_eq!(42, cpu.registers().x(x(3)));
        // remu x3, x1, x2 — the dividend
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0220_F1B3));
        assert_eq!(42, cpu.registers().x(x(3)));
    }

    #[test]
    fn test_lr_sc_reservation_law() {
        let (mut cpu, mut bus) = (cpu(), bus());
        let address = RAM_BASE + 0x40;
        bus.write32(address, 123).unwrap();
        cpu.registers_mut().set_x(x(1), address);
        cpu.registers_mut().set_x(x(3), 456);
        // lr.w x2, (x1)
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x1000_A12F));
        assert_eq!(123, cpu.registers().x(x(2)));
        // sc.w x2, x3, (x1) — succeeds, rd = 0
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x1830_A12F));
        assert_eq!(0, cpu.registers().x(x(2)));
        assert_eq!(Ok(456), bus.read32(address));
        // A second sc.w always fails: the reservation is gone.
        cpu.registers_mut().set_x(x(3), 789);
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x1830_A12F));
        assert_eq!(1, cpu.registers().x(x(2)));
        assert_eq!(Ok(456), bus.read32(address));
    }

    #[test]
    fn test_amo_breaks_reservation() {
        let (mut cpu, mut bus) = (cpu(), bus());
        let address = RAM_BASE + 0x40;
        bus.write32(address, 10).unwrap();
        cpu.registers_mut().set_x(x(1), address);
        cpu.registers_mut().set_x(x(3), 5);
        // lr.w x2, (x1)
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x1000_A12F));
        // amoadd.w x2, x3, (x1) — rd gets the old value
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0030_A12F));
        assert_eq!(10, cpu.registers().x(x(2)));
        assert_eq!(Ok(15), bus.read32(address));
        // sc.w x2, x3, (x1) fails: the AMO cleared the reservation.
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x1830_A12F));
        assert_eq!(1, cpu.registers().x(x(2)));
        assert_eq!(Ok(15), bus.read32(address));
    }

    #[test]
    fn test_sc_to_different_address_fails() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), RAM_BASE + 0x40);
        cpu.registers_mut().set_x(x(3), 1);
        // lr.w x2, (x1)
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x1000_A12F));
        // Move the base: sc.w to another address must fail.
        cpu.registers_mut().set_x(x(1), RAM_BASE + 0x80);
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x1830_A12F));
        assert_eq!(1, cpu.registers().x(x(2)));
    }

    #[test]
    fn test_csrrw_swaps() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 0x8000_0040);
        // csrrw x2, mtvec, x1
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x3050_9173));
        assert_eq!(0, cpu.registers().x(x(2)));
        assert_eq!(Ok(0x8000_0040), cpu.read_csr(csr::MTVEC));
    }

    #[test]
    fn test_csrrs_with_x0_skips_the_write() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.write_csr(csr::MSCRATCH, 0xAAAA_AAAA, !0).unwrap();
        // csrrs x2, mscratch, x0 — pure read
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x3400_2173));
        assert_eq!(0xAAAA_AAAA, cpu.registers().x(x(2)));
        assert_eq!(Ok(0xAAAA_AAAA), cpu.read_csr(csr::MSCRATCH));
    }

    #[test]
    fn test_csrrci_clears_bits() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.write_csr(csr::MSCRATCH, 0xFF, !0).unwrap();
        // csrrci x2, mscratch, 0x15
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x340A_F173));
        assert_eq!(0xFF, cpu.registers().x(x(2)));
        assert_eq!(Ok(0xEA), cpu.read_csr(csr::MSCRATCH));
    }

    #[test]
    fn test_csr_read_of_unimplemented_raises_illegal_instruction() {
        let (mut cpu, mut bus) = (cpu(), bus());
        // csrrs x2, 0x345, x0
        assert_eq!(Execution::TrapRaised, run(&mut cpu, &mut bus, 0x3450_2173));
        assert_eq!(
            Some((Exception::IllegalInstruction, 0)),
            cpu.pending_exception()
        );
        assert_eq!(RAM_BASE, cpu.registers().pc());
    }

    #[test]
    fn test_csr_write_of_unimplemented_is_a_fault() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 1);
        // csrrw x0, 0x345, x1
        assert_eq!(
            Execution::Fault(Fault::UnimplementedCsr(0x345)),
            run(&mut cpu, &mut bus, 0x3450_9073)
        );
    }

    #[test]
    fn test_ecall_cause_tracks_privilege() {
        let (mut cpu, mut bus) = (cpu(), bus());
        assert_eq!(Execution::TrapRaised, run(&mut cpu, &mut bus, 0x0000_0073));
        assert_eq!(
            Some((Exception::EnvironmentCallFromMMode, 0)),
            cpu.pending_exception()
        );
        // The PC still points at the ECALL.
        assert_eq!(RAM_BASE, cpu.registers().pc());
        cpu.take_pending_exception();

        // From U-mode the cause changes.
        cpu.status_mut().set_mpp(crate::RawPrivilegeLevel::User);
        cpu.leave_machine_trap();
        assert_eq!(Execution::TrapRaised, run(&mut cpu, &mut bus, 0x0000_0073));
        assert_eq!(
            Some((Exception::EnvironmentCallFromUMode, 0)),
            cpu.pending_exception()
        );
    }

    #[test]
    fn test_mret_restores_interrupt_state() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.write_csr(csr::MEPC, 0x8000_0200, !0).unwrap();
        cpu.status_mut().set_mpie(true);
        cpu.status_mut().set_mpp(crate::RawPrivilegeLevel::Supervisor);
        // mret
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x3020_0073));
        assert!(cpu.status().mie());
        assert!(cpu.status().mpie());
        assert_eq!(PrivilegeLevel::User, cpu.status().mpp());
        assert_eq!(PrivilegeLevel::Supervisor, cpu.privilege_mode());
        assert_eq!(0x8000_0200, cpu.registers().pc());
    }

    #[test]
    fn test_sret_uses_spp() {
        let (mut cpu, mut bus) = (cpu(), bus());
        // Get to S-mode.
        cpu.status_mut().set_mpp(crate::RawPrivilegeLevel::Supervisor);
        cpu.leave_machine_trap();
        assert_eq!(PrivilegeLevel::Supervisor, cpu.privilege_mode());
        cpu.write_csr(csr::SEPC, 0x8000_0300, !0).unwrap();
        cpu.status_mut().set_spie(true);
        // sret with SPP = 0 returns to U-mode.
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x1020_0073));
        assert_eq!(PrivilegeLevel::User, cpu.privilege_mode());
        assert!(cpu.status().sie());
        assert_eq!(0x8000_0300, cpu.registers().pc());
    }

    #[test]
    fn test_mret_from_user_mode_is_illegal() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.status_mut().set_mpp(crate::RawPrivilegeLevel::User);
        cpu.leave_machine_trap();
        assert_eq!(Execution::TrapRaised, run(&mut cpu, &mut bus, 0x3020_0073));
        assert_eq!(
            Some((Exception::IllegalInstruction, 0)),
            cpu.pending_exception()
        );
    }

    #[test]
    fn test_wfi_advances_pc() {
        let (mut cpu, mut bus) = (cpu(), bus());
        assert_eq!(Execution::Wfi, run(&mut cpu, &mut bus, 0x1050_0073));
        assert_eq!(RAM_BASE + 4, cpu.registers().pc());
    }

    #[test]
    fn test_fence_is_a_nop() {
        let (mut cpu, mut bus) = (cpu(), bus());
        // fence rw, rw
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0330_000F));
        assert_eq!(RAM_BASE + 4, cpu.registers().pc());
    }

    #[test]
    fn test_x0_is_never_written() {
        let (mut cpu, mut bus) = (cpu(), bus());
        cpu.registers_mut().set_x(x(1), 5);
        cpu.registers_mut().set_x(x(2), 7);
        // add x0, x1, x2
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0020_8033));
        assert_eq!(0, cpu.registers().x(Specifier::X0));
        // jal x0, +8 — plain jump, no link written
        assert_eq!(Execution::Retired, run(&mut cpu, &mut bus, 0x0080_006F));
        assert_eq!(0, cpu.registers().x(Specifier::X0));
    }
}
