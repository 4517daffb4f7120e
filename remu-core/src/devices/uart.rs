//! NS16550-subset UART.

use crate::bus::MmioDevice;
use std::io;
use std::io::{Stdout, Write};

// Standard 16550 byte register offsets.
const RBR_THR_DLL: u32 = 0x00;
const IER_DLM: u32 = 0x01;
const IIR_FCR: u32 = 0x02;
const LCR: u32 = 0x03;
const MCR: u32 = 0x04;
const LSR: u32 = 0x05;
const MSR: u32 = 0x06;
const SCR: u32 = 0x07;

// Line status bits.
const LSR_DR: u8 = 1 << 0;
const LSR_THRE: u8 = 1 << 5;
const LSR_TEMT: u8 = 1 << 6;

// FCR bit 1 clears the receive FIFO.
const FCR_CLEAR_RX: u8 = 1 << 1;

// LCR bit 7 is the Divisor Latch Access Bit.
const LCR_DLAB: u8 = 1 << 7;

/// Character-output UART modeled after the NS16550, reduced to what a guest
/// kernel's earlycon path touches.
///
/// The transmitter is always ready: writing THR emits the byte to the host's
/// standard output immediately and THRE/TEMT stay set. Receive data enters
/// through [`Uart::inject_byte`], which latches one byte in RBR and sets DR;
/// reading RBR clears DR again. LCR bit 7 (DLAB) switches offsets 0 and 1 to
/// the divisor latch pair, which is stored but otherwise ignored.
///
/// Multi-byte bus accesses decompose into little-endian byte operations, so
/// a 32-bit read of offset 0 observes RBR/IER/IIR/LCR at once the way real
/// hardware on a byte lane would.
#[derive(Debug)]
pub struct Uart {
    rbr: u8,
    ier: u8,
    iir: u8,
    fcr: u8,
    lcr: u8,
    mcr: u8,
    lsr: u8,
    msr: u8,
    scr: u8,
    dll: u8,
    dlm: u8,
    stdout: Stdout,
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}

impl Uart {
    pub fn new() -> Self {
        Self {
            rbr: 0,
            ier: 0,
            // No interrupt pending.
            iir: 0x01,
            fcr: 0,
            lcr: 0,
            mcr: 0,
            // Transmitter empty and ready.
            lsr: LSR_THRE | LSR_TEMT,
            msr: 0,
            scr: 0,
            dll: 0,
            dlm: 0,
            stdout: io::stdout(),
        }
    }

    fn dlab(&self) -> bool {
        self.lcr & LCR_DLAB != 0
    }

    /// Returns `true` if the Data Ready bit of the line status register is
    /// set, i.e. an injected byte is waiting in RBR.
    pub fn data_ready(&self) -> bool {
        self.lsr & LSR_DR != 0
    }

    /// Latch a received byte in RBR and set DR.
    ///
    /// A byte injected while the previous one has not been read yet simply
    /// overwrites it; there is no receive FIFO in this model.
    pub fn inject_byte(&mut self, byte: u8) {
        self.rbr = byte;
        self.lsr |= LSR_DR;
    }

    fn transmit(&mut self, byte: u8) {
        let _ = self.stdout.write_all(&[byte]);
        let _ = self.stdout.flush();
        // TX is always ready in this model.
        self.lsr |= LSR_THRE | LSR_TEMT;
    }

    fn read8(&mut self, offset: u32) -> u8 {
        match offset & 0x7 {
            RBR_THR_DLL => {
                if self.dlab() {
                    self.dll
                } else {
                    self.lsr &= !LSR_DR;
                    self.rbr
                }
            }
            IER_DLM => {
                if self.dlab() {
                    self.dlm
                } else {
                    self.ier
                }
            }
            IIR_FCR => self.iir,
            LCR => self.lcr,
            MCR => self.mcr,
            LSR => {
                self.lsr |= LSR_THRE | LSR_TEMT;
                self.lsr
            }
            MSR => self.msr,
            SCR => self.scr,
            _ => unreachable!("offset is masked to 3 bits"),
        }
    }

    fn write8(&mut self, offset: u32, value: u8) {
        match offset & 0x7 {
            RBR_THR_DLL => {
                if self.dlab() {
                    self.dll = value;
                } else {
                    self.transmit(value);
                }
            }
            IER_DLM => {
                if self.dlab() {
                    self.dlm = value;
                } else {
                    self.ier = value;
                }
            }
            IIR_FCR => {
                self.fcr = value;
                if value & FCR_CLEAR_RX != 0 {
                    self.lsr &= !LSR_DR;
                }
            }
            LCR => self.lcr = value,
            MCR => self.mcr = value,
            // LSR and MSR are read-only.
            LSR => {}
            MSR => {}
            SCR => self.scr = value,
            _ => unreachable!("offset is masked to 3 bits"),
        }
    }
}

impl MmioDevice for Uart {
    fn read(&mut self, offset: u32, width: u32) -> Option<u32> {
        if !matches!(width, 1 | 2 | 4) {
            return None;
        }
        let mut value = 0;
        for i in 0..width {
            value |= (self.read8(offset + i) as u32) << (8 * i);
        }
        Some(value)
    }

    fn write(&mut self, offset: u32, width: u32, value: u32) -> Option<()> {
        if !matches!(width, 1 | 2 | 4) {
            return None;
        }
        for i in 0..width {
            self.write8(offset + i, (value >> (8 * i)) as u8);
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmitter_always_ready() {
        let mut uart = Uart::new();
        let lsr = uart.read8(LSR);
        assert_ne!(0, lsr & LSR_THRE);
        assert_ne!(0, lsr & LSR_TEMT);
        uart.write8(RBR_THR_DLL, b'x');
        let lsr = uart.read8(LSR);
        assert_ne!(0, lsr & LSR_THRE);
        assert_ne!(0, lsr & LSR_TEMT);
    }

    #[test]
    fn test_reading_rbr_clears_data_ready() {
        let mut uart = Uart::new();
        assert!(!uart.data_ready());
        uart.inject_byte(b'a');
        assert!(uart.data_ready());
        assert_ne!(0, uart.read8(LSR) & LSR_DR);
        assert_eq!(b'a', uart.read8(RBR_THR_DLL));
        assert!(!uart.data_ready());
        assert_eq!(0, uart.read8(LSR) & LSR_DR);
    }

    #[test]
    fn test_dlab_selects_divisor_latches() {
        let mut uart = Uart::new();
        uart.write8(LCR, LCR_DLAB);
        uart.write8(RBR_THR_DLL, 0x34);
        uart.write8(IER_DLM, 0x12);
        assert_eq!(0x34, uart.read8(RBR_THR_DLL));
        assert_eq!(0x12, uart.read8(IER_DLM));
        // With DLAB clear again, IER is untouched and reads as zero.
        uart.write8(LCR, 0);
        assert_eq!(0, uart.read8(IER_DLM));
        assert_eq!(0x34, uart.dll);
        assert_eq!(0x12, uart.dlm);
    }

    #[test]
    fn test_fcr_rx_clear_drops_pending_byte() {
        let mut uart = Uart::new();
        uart.inject_byte(b'q');
        uart.write8(IIR_FCR, FCR_CLEAR_RX);
        assert!(!uart.data_ready());
    }

    #[test]
    fn test_multi_byte_access_decomposes_little_endian() {
        let mut uart = Uart::new();
        uart.write8(LCR, LCR_DLAB);
        // One 16-bit write programs both divisor latches at once.
        MmioDevice::write(&mut uart, RBR_THR_DLL, 2, 0x1234).unwrap();
        assert_eq!(0x34, uart.dll);
        assert_eq!(0x12, uart.dlm);
        assert_eq!(Some(0x1234), MmioDevice::read(&mut uart, RBR_THR_DLL, 2));
    }

    #[test]
    fn test_scratch_register() {
        let mut uart = Uart::new();
        uart.write8(SCR, 0x5A);
        assert_eq!(0x5A, uart.read8(SCR));
    }
}
