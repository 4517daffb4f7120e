//! Memory-mapped peripherals of the virt platform.

pub mod clint;
pub mod plic;
pub mod uart;

pub use clint::Clint;
pub use plic::Plic;
pub use uart::Uart;
