//! ROM write protection.
//!
//! The ROM contents live in the shared memory image like everything else; the
//! `RomGuard` is registered as the write handler for the ROM range and refuses
//! writes unless a writable-ROM scope is open.

use super::{BusError, Device, DeviceContext};
use std::any::Any;

/// Write handler protecting a read-only address range.
///
/// Outside a writable scope every write fails with `BusError::ReadOnlyMemory`
/// carrying the absolute address and the attempted value, and the image is not
/// touched. Inside the scope writes land in the image unchanged.
///
/// # Examples
///
/// ```rust
/// use burisim::{BusError, Device, DeviceContext, InterruptAggregator, MemoryImage, RomGuard};
///
/// let mut memory = MemoryImage::new();
/// let mut irq = InterruptAggregator::new();
/// let line = irq.register_line("rom");
/// let mut ctx = DeviceContext::new(&mut memory, &mut irq, line, None);
///
/// let mut rom = RomGuard::new(0xE000, 0x2000);
/// assert_eq!(
///     rom.write(0x10, 0xAA, &mut ctx),
///     Err(BusError::ReadOnlyMemory { address: 0xE010, value: 0xAA })
/// );
///
/// rom.set_writable(true);
/// rom.write(0x10, 0xAA, &mut ctx).unwrap();
/// assert_eq!(ctx.memory().read(0xE010), 0xAA);
/// ```
#[derive(Debug, Clone)]
pub struct RomGuard {
    base: u16,
    len: u16,
    writable: bool,
}

impl RomGuard {
    /// Protects `len` bytes starting at `base`.
    pub fn new(base: u16, len: u16) -> Self {
        Self {
            base,
            len,
            writable: false,
        }
    }

    /// First protected address.
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Number of protected bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the guard protects nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `addr` falls inside the protected range.
    pub fn contains(&self, addr: u16) -> bool {
        addr >= self.base && ((addr - self.base) as usize) < self.len()
    }

    /// Lifts or restores the protection.
    pub fn set_writable(&mut self, writable: bool) {
        self.writable = writable;
    }

    /// Whether a writable scope is currently open.
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl Device for RomGuard {
    fn name(&self) -> &'static str {
        "rom"
    }

    fn size(&self) -> u16 {
        self.len
    }

    fn read(&mut self, offset: u16, ctx: &mut DeviceContext<'_>) -> Result<u8, BusError> {
        Ok(ctx.memory().read(self.base.wrapping_add(offset)))
    }

    fn write(
        &mut self,
        offset: u16,
        value: u8,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), BusError> {
        let address = self.base.wrapping_add(offset);
        if !self.writable {
            return Err(BusError::ReadOnlyMemory { address, value });
        }
        ctx.memory_mut().write(address, value);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::interrupts::InterruptAggregator;
    use crate::memory::MemoryImage;

    #[test]
    fn test_rom_write_refused() {
        let mut memory = MemoryImage::new();
        memory.write(0xE000, 0xEA);
        let mut irq = InterruptAggregator::new();
        let line = irq.register_line("rom");
        let mut ctx = DeviceContext::new(&mut memory, &mut irq, line, None);

        let mut rom = RomGuard::new(0xE000, 0x2000);
        let err = rom.write(0, 0xFF, &mut ctx).unwrap_err();
        assert_eq!(
            err,
            BusError::ReadOnlyMemory {
                address: 0xE000,
                value: 0xFF
            }
        );
        assert_eq!(ctx.memory().read(0xE000), 0xEA);
    }

    #[test]
    fn test_rom_writable_scope() {
        let mut memory = MemoryImage::new();
        let mut irq = InterruptAggregator::new();
        let line = irq.register_line("rom");
        let mut ctx = DeviceContext::new(&mut memory, &mut irq, line, None);

        let mut rom = RomGuard::new(0xE000, 0x2000);
        rom.set_writable(true);
        rom.write(0x1FFF, 0x42, &mut ctx).unwrap();
        assert_eq!(rom.read(0x1FFF, &mut ctx).unwrap(), 0x42);

        rom.set_writable(false);
        assert!(rom.write(0x1FFF, 0x43, &mut ctx).is_err());
        assert_eq!(ctx.memory().read(0xFFFF), 0x42);
    }

    #[test]
    fn test_rom_range() {
        let rom = RomGuard::new(0xE000, 0x2000);
        assert_eq!(rom.len(), 0x2000);
        assert!(rom.contains(0xE000));
        assert!(rom.contains(0xFFFF));
        assert!(!rom.contains(0xDFFF));
        assert!(!rom.is_empty());
    }
}
