use bitvec::{array::BitArray, field::BitField, order::Lsb0};
use log::trace;

use super::Interrupt;

const SUPERVISOR_SOFTWARE_INTERRUPT: usize = Interrupt::SupervisorSoftwareInterrupt.code() as usize;
const MACHINE_SOFTWARE_INTERRUPT: usize = Interrupt::MachineSoftwareInterrupt.code() as usize;
const SUPERVISOR_TIMER_INTERRUPT: usize = Interrupt::SupervisorTimerInterrupt.code() as usize;
const MACHINE_TIMER_INTERRUPT: usize = Interrupt::MachineTimerInterrupt.code() as usize;
const SUPERVISOR_EXTERNAL_INTERRUPT: usize = Interrupt::SupervisorExternalInterrupt.code() as usize;
const MACHINE_EXTERNAL_INTERRUPT: usize = Interrupt::MachineExternalInterrupt.code() as usize;

#[allow(clippy::identity_op)]
const VALID_INTERRUPTS_MASK: u16 = 0
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << MACHINE_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << MACHINE_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT)
    | (1 << MACHINE_EXTERNAL_INTERRUPT);

// Only the supervisor-level sources can be delegated.
#[allow(clippy::identity_op)]
const DELEGATABLE_INTERRUPTS_MASK: u16 = 0
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT);

/// Supervisor view of mie/mip: the SSIP, STIP, and SEIP bits.
#[allow(clippy::identity_op)]
const SUPERVISOR_INTERRUPTS_MASK: u16 = 0
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT);

/// The mip, mie, and mideleg registers, and the pending/enabled/delegated
/// interrupt selection logic built on them.
///
/// The machine-level pending bits (MSIP, MTIP, MEIP) are owned by the
/// platform: MSIP and MTIP follow the CLINT, MEIP follows the PLIC, and the
/// platform refreshes them through the `set_m_*` methods every tick. Guest
/// writes to those bits are ignored.
#[derive(Debug, Clone)]
pub struct Interrupts {
    /// For each bit index matching an interrupt's code, whether handling
    /// that interrupt is delegated to S-mode (if not taken in M-mode).
    delegate: BitArray<[u16; 1], Lsb0>,
    /// The mip register as visible from guest software.
    mip: BitArray<[u16; 1], Lsb0>,
    /// The mie register.
    mie: BitArray<[u16; 1], Lsb0>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            delegate: BitArray::new([0x0000]),
            mip: BitArray::new([0x0000]),
            mie: BitArray::new([0x0000]),
        }
    }

    pub fn should_delegate(&self, interrupt: Interrupt) -> bool {
        self.delegate[interrupt.code() as usize]
    }

    /// Indicate whether an M-level external interrupt is pending (MEIP).
    ///
    /// Controlled by the PLIC.
    pub fn set_m_external(&mut self, value: bool) {
        if self.mip[MACHINE_EXTERNAL_INTERRUPT] != value {
            trace!("mip.MEIP <- {value}");
        }
        self.mip.set(MACHINE_EXTERNAL_INTERRUPT, value);
    }

    /// Indicate whether an M-level timer interrupt is pending (MTIP).
    ///
    /// Controlled by the CLINT's mtime/mtimecmp comparison.
    pub fn set_m_timer(&mut self, value: bool) {
        if self.mip[MACHINE_TIMER_INTERRUPT] != value {
            trace!("mip.MTIP <- {value}");
        }
        self.mip.set(MACHINE_TIMER_INTERRUPT, value);
    }

    /// Indicate whether an M-level software interrupt is pending (MSIP).
    ///
    /// Controlled by the CLINT's memory-mapped msip register.
    pub fn set_m_soft(&mut self, value: bool) {
        if self.mip[MACHINE_SOFTWARE_INTERRUPT] != value {
            trace!("mip.MSIP <- {value}");
        }
        self.mip.set(MACHINE_SOFTWARE_INTERRUPT, value);
    }

    /// Returns the highest-priority interrupt that would trap to M-mode: one
    /// that is pending in mip, enabled by mie, and not delegated by mideleg.
    ///
    /// The priority order is the architectural one: machine external,
    /// software, timer, then the supervisor sources in the same order.
    pub fn highest_priority_m_ready(&self) -> Option<Interrupt> {
        let ready = self.mip & self.mie & !self.delegate;
        [
            Interrupt::MachineExternalInterrupt,
            Interrupt::MachineSoftwareInterrupt,
            Interrupt::MachineTimerInterrupt,
            Interrupt::SupervisorExternalInterrupt,
            Interrupt::SupervisorSoftwareInterrupt,
            Interrupt::SupervisorTimerInterrupt,
        ]
        .into_iter()
        .find(|&i| ready[i.code() as usize])
    }

    /// Returns the highest-priority interrupt that would trap to S-mode: one
    /// that is pending in mip, enabled by mie, and delegated by mideleg.
    pub fn highest_priority_s_ready(&self) -> Option<Interrupt> {
        let ready = self.mip & self.mie & self.delegate;
        [
            Interrupt::SupervisorExternalInterrupt,
            Interrupt::SupervisorSoftwareInterrupt,
            Interrupt::SupervisorTimerInterrupt,
        ]
        .into_iter()
        .find(|&i| ready[i.code() as usize])
    }

    pub fn read_mideleg(&self) -> u32 {
        self.delegate.load_le::<u16>() as u32
    }

    /// The mideleg register is **WARL**: only the supervisor-level sources
    /// are delegatable.
    pub fn write_mideleg(&mut self, value: u32, mask: u32) {
        let mask = mask as u16 & DELEGATABLE_INTERRUPTS_MASK;
        let updated = self.delegate.load_le::<u16>() & !mask | value as u16 & mask;
        self.delegate.store_le(updated);
    }

    pub fn read_mip(&self) -> u32 {
        self.mip.load_le::<u16>() as u32
    }

    /// Writes to MEIP, MTIP, and MSIP are ignored: those bits are managed by
    /// the platform (PLIC and CLINT). The supervisor-level pending bits are
    /// writable from M-mode.
    pub fn write_mip(&mut self, value: u32, mask: u32) {
        let mask = mask as u16 & SUPERVISOR_INTERRUPTS_MASK;
        let updated = self.mip.load_le::<u16>() & !mask | value as u16 & mask;
        self.mip.store_le(updated);
    }

    pub fn read_mie(&self) -> u32 {
        self.mie.load_le::<u16>() as u32
    }

    pub fn write_mie(&mut self, value: u32, mask: u32) {
        let mask = mask as u16 & VALID_INTERRUPTS_MASK;
        let updated = self.mie.load_le::<u16>() & !mask | value as u16 & mask;
        self.mie.store_le(updated);
    }

    /// sip is the supervisor view of mip: only SSIP, STIP, and SEIP are
    /// visible.
    pub fn read_sip(&self) -> u32 {
        self.read_mip() & SUPERVISOR_INTERRUPTS_MASK as u32
    }

    /// Writes through sip merge only the supervisor-visible bits into mip.
    pub fn write_sip(&mut self, value: u32, mask: u32) {
        self.write_mip(value, mask & SUPERVISOR_INTERRUPTS_MASK as u32);
    }

    /// sie is the supervisor view of mie: only SSIE, STIE, and SEIE are
    /// visible.
    pub fn read_sie(&self) -> u32 {
        self.read_mie() & SUPERVISOR_INTERRUPTS_MASK as u32
    }

    /// Writes through sie merge only the supervisor-visible bits into mie.
    pub fn write_sie(&mut self, value: u32, mask: u32) {
        self.write_mie(value, mask & SUPERVISOR_INTERRUPTS_MASK as u32);
    }
}
