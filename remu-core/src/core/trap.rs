//! Trap CSRs and the interrupt/exception delivery logic.

use log::trace;

use super::{Cpu, Interrupt};
use crate::PrivilegeLevel;

/// The interrupt bit of mcause/scause.
pub const CAUSE_INTERRUPT_BIT: u32 = 0x8000_0000;

/// The machine- and supervisor-mode trap handling registers.
#[derive(Debug, Clone)]
pub struct Trap {
    mscratch: u32,
    mepc: u32,
    mcause: u32,
    mtval: u32,

    sscratch: u32,
    sepc: u32,
    scause: u32,
    stval: u32,
}

impl Default for Trap {
    fn default() -> Self {
        Self::new()
    }
}

impl Trap {
    pub fn new() -> Self {
        Self {
            mscratch: 0,
            mepc: 0,
            mcause: 0,
            mtval: 0,

            sscratch: 0,
            sepc: 0,
            scause: 0,
            stval: 0,
        }
    }

    pub fn read_mscratch(&self) -> u32 {
        self.mscratch
    }

    pub fn write_mscratch(&mut self, value: u32, mask: u32) {
        self.mscratch = self.mscratch & !mask | value & mask;
    }

    pub fn read_mepc(&self) -> u32 {
        self.mepc
    }

    pub fn write_mepc(&mut self, value: u32, mask: u32) {
        self.mepc = self.mepc & !mask | value & mask;
        self.mepc &= !0b1;
    }

    pub fn read_mcause(&self) -> u32 {
        self.mcause
    }

    pub fn write_mcause(&mut self, value: u32, mask: u32) {
        self.mcause = self.mcause & !mask | value & mask;
    }

    pub fn read_mtval(&self) -> u32 {
        self.mtval
    }

    pub fn write_mtval(&mut self, value: u32, mask: u32) {
        self.mtval = self.mtval & !mask | value & mask;
    }

    pub fn read_sscratch(&self) -> u32 {
        self.sscratch
    }

    pub fn write_sscratch(&mut self, value: u32, mask: u32) {
        self.sscratch = self.sscratch & !mask | value & mask;
    }

    pub fn read_sepc(&self) -> u32 {
        self.sepc
    }

    pub fn write_sepc(&mut self, value: u32, mask: u32) {
        self.sepc = self.sepc & !mask | value & mask;
        self.sepc &= !0b1;
    }

    pub fn read_scause(&self) -> u32 {
        self.scause
    }

    pub fn write_scause(&mut self, value: u32, mask: u32) {
        self.scause = self.scause & !mask | value & mask;
    }

    pub fn read_stval(&self) -> u32 {
        self.stval
    }

    pub fn write_stval(&mut self, value: u32, mask: u32) {
        self.stval = self.stval & !mask | value & mask;
    }
}

impl Cpu {
    /// Consulted at the top of every simulator step: if an interrupt is
    /// pending, enabled, and deliverable under the current privilege mode,
    /// enter the target mode's trap and return `true`.
    ///
    /// Delivery rules:
    /// - A source not delegated by mideleg targets M-mode and is deliverable
    ///   iff `mstatus.MIE` is set or the current privilege is below Machine.
    /// - A delegated source targets S-mode and is deliverable iff the
    ///   current privilege is below Supervisor, or is Supervisor with
    ///   `mstatus.SIE` set. (M-mode never takes delegated interrupts.)
    ///
    /// Machine-targeted sources always outrank supervisor-targeted ones;
    /// within each target the order is external, software, timer.
    pub fn check_and_take_interrupt(&mut self) -> bool {
        let Some((interrupt, target)) = self.deliverable_interrupt() else {
            return false;
        };
        let cause = CAUSE_INTERRUPT_BIT | interrupt.code();
        trace!(
            "taking interrupt {interrupt:?} to {target}-mode at pc {:#010x}",
            self.registers.pc()
        );
        match target {
            PrivilegeLevel::Supervisor => self.enter_supervisor_trap(cause, 0),
            _ => self.enter_machine_trap(cause, 0),
        }
        true
    }

    /// The interrupt the next trap entry would deliver, together with the
    /// privilege mode that receives it.
    fn deliverable_interrupt(&self) -> Option<(Interrupt, PrivilegeLevel)> {
        let mode = self.privilege_mode;

        if self.status.mie() || mode < PrivilegeLevel::Machine {
            if let Some(interrupt) = self.interrupts.highest_priority_m_ready() {
                return Some((interrupt, PrivilegeLevel::Machine));
            }
        }

        let s_deliverable = mode < PrivilegeLevel::Supervisor
            || (mode == PrivilegeLevel::Supervisor && self.status.sie());
        if s_deliverable {
            if let Some(interrupt) = self.interrupts.highest_priority_s_ready() {
                return Some((interrupt, PrivilegeLevel::Supervisor));
            }
        }

        None
    }

    /// Returns `true` if an interrupt could be delivered right now. Used by
    /// the simulator to bound the WFI idle loop.
    pub fn interrupt_deliverable(&self) -> bool {
        self.deliverable_interrupt().is_some()
    }

    /// Deliver the exception staged by the executor, if any.
    ///
    /// Routes to S-mode iff the current privilege is below Machine and the
    /// cause's medeleg bit is set, else to M-mode. Clears the staging slot.
    pub fn take_pending_exception(&mut self) {
        let Some((exception, tval)) = self.pending_exception.take() else {
            return;
        };
        let delegated = self.privilege_mode < PrivilegeLevel::Machine
            && self.control.medeleg.should_delegate(exception);
        trace!(
            "taking exception {exception:?} (tval {tval:#010x}) to {}-mode at pc {:#010x}",
            if delegated { "S" } else { "M" },
            self.registers.pc()
        );
        if delegated {
            self.enter_supervisor_trap(exception.code(), tval);
        } else {
            self.enter_machine_trap(exception.code(), tval);
        }
    }

    /// Enter a machine-mode trap: save pc to mepc, record the cause and
    /// tval, push MIE onto MPIE and clear it, record the previous privilege
    /// in MPP, and vector to mtvec.
    fn enter_machine_trap(&mut self, cause: u32, tval: u32) {
        let pc = self.registers.pc();
        self.trap.write_mepc(pc, !0);
        self.trap.write_mcause(cause, !0);
        self.trap.write_mtval(tval, !0);

        let mie = self.status.mie();
        self.status.set_mpie(mie);
        self.status.set_mie(false);
        self.status.set_mpp(self.privilege_mode.into());

        self.privilege_mode = PrivilegeLevel::Machine;
        *self.registers.pc_mut() = self.control.mtvec.trap_base();
    }

    /// Enter a supervisor-mode trap, symmetric to
    /// [`enter_machine_trap`](Self::enter_machine_trap) using the SIE/SPIE/
    /// SPP stack and sepc/scause/stval/stvec.
    fn enter_supervisor_trap(&mut self, cause: u32, tval: u32) {
        let pc = self.registers.pc();
        self.trap.write_sepc(pc, !0);
        self.trap.write_scause(cause, !0);
        self.trap.write_stval(tval, !0);

        let sie = self.status.sie();
        self.status.set_spie(sie);
        self.status.set_sie(false);
        self.status.set_spp(self.privilege_mode.into());

        self.privilege_mode = PrivilegeLevel::Supervisor;
        *self.registers.pc_mut() = self.control.stvec.trap_base();
    }

    /// Return from a machine-mode trap: `MIE ← MPIE`, `MPIE ← 1`, privilege
    /// restored from MPP, MPP cleared to User, `pc ← mepc`.
    pub(super) fn leave_machine_trap(&mut self) {
        let mpie = self.status.mpie();
        self.status.set_mie(mpie);
        self.status.set_mpie(true);
        self.privilege_mode = self.status.mpp();
        self.status.set_mpp(crate::RawPrivilegeLevel::User);
        *self.registers.pc_mut() = self.trap.read_mepc();
    }

    /// Return from a supervisor-mode trap, symmetric to
    /// [`leave_machine_trap`](Self::leave_machine_trap) using SPIE/SIE/SPP
    /// and sepc.
    pub(super) fn leave_supervisor_trap(&mut self) {
        let spie = self.status.spie();
        self.status.set_sie(spie);
        self.status.set_spie(true);
        self.privilege_mode = self.status.spp();
        self.status.set_spp(crate::RawPrivilegeLevel::User);
        *self.registers.pc_mut() = self.trap.read_sepc();
    }
}
