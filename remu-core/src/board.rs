//! The virt platform: memory map, devices, and the per-tick device/interrupt
//! plumbing.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use thiserror::Error;

use crate::bus::Bus;
use crate::core::Cpu;
use crate::devices::{Clint, Plic, Uart};
use crate::memory::Memory;

/// Guest-physical memory map of the virt platform.
pub mod map {
    pub const CLINT_BASE: u32 = 0x0200_0000;
    pub const CLINT_SIZE: u32 = 0x0001_0000;
    pub const PLIC_BASE: u32 = 0x0C00_0000;
    pub const PLIC_SIZE: u32 = 0x0400_0000;
    pub const UART_BASE: u32 = 0x1000_0000;
    pub const UART_SIZE: u32 = 0x0000_0100;
    pub const RAM_BASE: u32 = 0x8000_0000;
    /// The DTB window sits directly after RAM.
    pub const DTB_SIZE: u32 = 0x0020_0000;
    /// PLIC source number of the UART on the virt platform.
    pub const UART_IRQ: u32 = 10;
}

/// A single-core board wiring RAM, the DTB window, and the CLINT/PLIC/UART
/// onto one bus.
///
/// > A RISC-V hardware platform can contain one or more RISC-V-compatible
/// > processing cores together with other non-RISC-V-compatible cores,
/// > fixed-function accelerators, various physical memory structures, I/O
/// > devices, and an interconnect structure to allow the components to
/// > communicate.
///
/// The devices live behind shared handles: the bus routes guest accesses to
/// them, while the board keeps driving them from the outside (time ticks,
/// interrupt-line queries, byte injection). Every tick the board advances
/// the CLINT and refreshes the hart's machine-level interrupt-pending bits
/// from the device state, closing the loop between device time and the
/// trap path.
#[derive(Debug)]
pub struct Board {
    bus: Bus,
    clint: Rc<RefCell<Clint>>,
    plic: Rc<RefCell<Plic>>,
    uart: Rc<RefCell<Uart>>,
    dtb_base: u32,
}

impl Board {
    /// Build the platform with `mem_size` bytes of RAM at
    /// [`map::RAM_BASE`], followed by the 2 MiB DTB window.
    pub fn new(mem_size: u32) -> Result<Self, BoardError> {
        let ram = Memory::new(map::RAM_BASE, mem_size)
            .ok_or(BoardError::InvalidMemorySize { size: mem_size })?;
        let dtb_base = map::RAM_BASE
            .checked_add(mem_size)
            .filter(|base| base.checked_add(map::DTB_SIZE - 1).is_some())
            .ok_or(BoardError::InvalidMemorySize { size: mem_size })?;
        let dtb = Memory::new(dtb_base, map::DTB_SIZE).unwrap();

        let clint = Rc::new(RefCell::new(Clint::new()));
        let plic = Rc::new(RefCell::new(Plic::new()));
        let uart = Rc::new(RefCell::new(Uart::new()));

        let mut bus = Bus::new();
        bus.map_ram(ram);
        bus.map_ram(dtb);
        bus.map_mmio(map::CLINT_BASE, map::CLINT_SIZE, clint.clone());
        bus.map_mmio(map::PLIC_BASE, map::PLIC_SIZE, plic.clone());
        bus.map_mmio(map::UART_BASE, map::UART_SIZE, uart.clone());

        debug!(
            "virt board: {mem_size:#x} bytes of RAM at {:#010x}, dtb at {dtb_base:#010x}",
            map::RAM_BASE
        );

        Ok(Self {
            bus,
            clint,
            plic,
            uart,
            dtb_base,
        })
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Guest-physical address of the DTB window.
    pub fn dtb_base(&self) -> u32 {
        self.dtb_base
    }

    /// Advance device time by one tick and refresh the hart's
    /// machine-level interrupt-pending bits from the device state: MSIP and
    /// MTIP follow the CLINT, MEIP follows the PLIC.
    pub fn tick(&mut self, cpu: &mut Cpu) {
        let mut clint = self.clint.borrow_mut();
        clint.tick(1);

        let interrupts = cpu.interrupts_mut();
        interrupts.set_m_soft(clint.msip_pending());
        interrupts.set_m_timer(clint.mtip_pending());
        interrupts.set_m_external(self.plic.borrow().has_pending());
    }

    /// Feed one received byte into the UART and pull the UART's interrupt
    /// line at the PLIC.
    pub fn inject_uart_byte(&mut self, byte: u8) {
        self.uart.borrow_mut().inject_byte(byte);
        self.plic.borrow_mut().raise_irq(map::UART_IRQ);
    }
}

#[derive(Error, Debug, Clone)]
pub enum BoardError {
    /// RAM must be at least one byte and, together with the DTB window,
    /// fit below the top of the 32-bit address space.
    #[error("invalid guest memory size: {size:#x} bytes")]
    InvalidMemorySize { size: u32 },
}
