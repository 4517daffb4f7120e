use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// Mask to be applied to mstatus to get sstatus: the SIE, SPIE, and SPP
/// fields are the supervisor-visible subset of the hart status.
pub const SSTATUS_MASK: u32 = (1 << idx::SIE) | (1 << idx::SPIE) | (1 << idx::SPP);

/// Provides the mstatus register and its sstatus view.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The
/// > mstatus register keeps track of and controls the hart’s current
/// > operating state. A restricted view of mstatus appears as the sstatus
/// > register in the S-level ISA.
///
/// Only the interrupt-enable stack (xIE/xPIE/xPP) is implemented; the
/// remaining fields read as zero and ignore writes. mstatus is the single
/// source of truth — sstatus is a masked projection of it, never separate
/// storage.
#[derive(Debug, Clone)]
pub struct Status {
    mstatus: u32,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        Self {
            mstatus: 0x0000_0000,
        }
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the SIE (S-mode Interrupt Enable) bit is set.
    pub fn sie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SIE]
    }

    /// Sets the SIE (S-mode Interrupt Enable) bit to `value`.
    pub fn set_sie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is
    /// set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns `true` if the SPIE (S-mode Previous Interrupt Enable) bit is
    /// set.
    pub fn spie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SPIE]
    }

    /// Sets the SPIE (S-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_spie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous
    /// Privilege level) field.
    ///
    /// The MPP field is **WARL**.
    pub fn mpp(&self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        )
        .try_into()
        .unwrap()
    }

    /// Sets the MPP (M-mode Previous Privilege level) field to `value`.
    ///
    /// The MPP field is **WARL**; the reserved level is ignored.
    pub fn set_mpp(&mut self, value: RawPrivilegeLevel) {
        let Ok(value) = PrivilegeLevel::try_from(value) else {
            return;
        };
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value as u8);
    }

    /// Returns the privilege level encoded by the SPP (S-mode Previous
    /// Privilege level) field: `0` → User, `1` → Supervisor.
    pub fn spp(&self) -> PrivilegeLevel {
        match self.mstatus.view_bits::<Lsb0>()[idx::SPP] {
            false => PrivilegeLevel::User,
            true => PrivilegeLevel::Supervisor,
        }
    }

    /// Sets the SPP (S-mode Previous Privilege level) field to `value`.
    ///
    /// The SPP field is **WARL**; levels above Supervisor are ignored.
    pub fn set_spp(&mut self, value: RawPrivilegeLevel) {
        match PrivilegeLevel::try_from(value) {
            Ok(value) if value <= PrivilegeLevel::Supervisor => {
                let bit = value == PrivilegeLevel::Supervisor;
                self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
            }
            _ => {}
        }
    }

    pub fn read_mstatus(&self) -> u32 {
        self.mstatus
    }

    /// Masked write to mstatus, updating each implemented field through its
    /// setter so WARL fields are treated correctly. The remaining WPRI bits
    /// are ignored.
    pub fn write_mstatus(&mut self, value: u32, mask: u32) {
        let mask_bits = mask.view_bits::<Lsb0>();
        let updated = self.mstatus & !mask | value & mask;
        let updated_bits = updated.view_bits::<Lsb0>();

        let sie = updated_bits[idx::SIE];
        let mie = updated_bits[idx::MIE];
        let spie = updated_bits[idx::SPIE];
        let mpie = updated_bits[idx::MPIE];
        let spp = updated_bits[idx::SPP] as u8;
        let mpp = updated_bits[idx::MPP..(idx::MPP + 2)].load_le::<u8>();

        if mask_bits[idx::SIE] {
            self.set_sie(sie);
        }
        if mask_bits[idx::MIE] {
            self.set_mie(mie);
        }
        if mask_bits[idx::SPIE] {
            self.set_spie(spie);
        }
        if mask_bits[idx::MPIE] {
            self.set_mpie(mpie);
        }
        if mask_bits[idx::SPP] {
            self.set_spp(RawPrivilegeLevel::from_u2(spp));
        }
        if mask_bits[idx::MPP] | mask_bits[idx::MPP + 1] {
            self.set_mpp(RawPrivilegeLevel::from_u2(mpp));
        }
    }

    pub fn read_sstatus(&self) -> u32 {
        self.mstatus & SSTATUS_MASK
    }

    /// Masked write through the sstatus view: only the supervisor-visible
    /// bits reach mstatus, all others are left unchanged.
    pub fn write_sstatus(&mut self, value: u32, mask: u32) {
        self.write_mstatus(value, mask & SSTATUS_MASK);
    }
}

/// Bit indices into the mstatus register.
mod idx {
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11;
}
