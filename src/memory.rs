//! # Memory Bus Abstraction
//!
//! This module provides the `MemoryBus` trait that decouples the processor engine
//! from the machine's address decoding, and `MemoryImage`, the single 64KB store
//! of machine state.
//!
//! ## Design Principles
//!
//! - Reads take `&mut self`: device registers may change when read (the ACIA
//!   clears RDRF and its IRQ bit on read)
//! - Writes may be refused: a write into protected ROM is reported back to the
//!   engine as a `BusError`, and only that access is aborted
//! - `peek`/`poke` bypass dispatch entirely and never have side effects

use crate::devices::BusError;

/// Number of addressable bytes on the 16-bit bus.
pub const ADDRESS_SPACE: usize = 0x10000;

/// Memory bus seen by the processor engine.
///
/// The engine routes every memory access it performs through this trait. The
/// machine's `AddressDispatcher` implements it, forwarding each access to the
/// device registered for that address or falling back to the raw image.
///
/// # Examples
///
/// ```
/// use burisim::{MemoryBus, MemoryImage};
///
/// let mut mem = MemoryImage::new();
/// let bus: &mut dyn MemoryBus = &mut mem;
/// bus.write(0x1234, 0x42).unwrap();
/// assert_eq!(bus.read(0x1234), 0x42);
/// assert_eq!(bus.peek(0x1234), 0x42);
/// ```
pub trait MemoryBus {
    /// Reads a byte, triggering any read side effects of the mapped device.
    fn read(&mut self, addr: u16) -> u8;

    /// Writes a byte.
    ///
    /// # Errors
    ///
    /// Returns a `BusError` when the handler for `addr` refuses the write
    /// (for example a protected ROM address). The memory image is left
    /// untouched in that case.
    fn write(&mut self, addr: u16, value: u8) -> Result<(), BusError>;

    /// Notifies the bus that control is being transferred to `addr`
    /// (JSR/JMP target). The default does nothing.
    fn call(&mut self, _addr: u16) {}

    /// Reads the raw image byte without dispatching.
    fn peek(&self, addr: u16) -> u8;

    /// Writes the raw image byte without dispatching.
    fn poke(&mut self, addr: u16, value: u8);
}

/// The 64KB memory image backing the whole address space.
///
/// All bytes start at zero. `MemoryImage` also implements `MemoryBus` directly,
/// which makes it a convenient flat bus for engine tests.
#[derive(Clone)]
pub struct MemoryImage {
    data: Box<[u8; ADDRESS_SPACE]>,
}

impl MemoryImage {
    /// Creates a zero-filled image.
    pub fn new() -> Self {
        Self {
            data: Box::new([0; ADDRESS_SPACE]),
        }
    }

    /// Returns the byte at `addr`.
    #[inline]
    pub fn read(&self, addr: u16) -> u8 {
        self.data[addr as usize]
    }

    /// Stores `value` at `addr`.
    #[inline]
    pub fn write(&mut self, addr: u16, value: u8) {
        self.data[addr as usize] = value;
    }

    /// Read-only view of the whole image, for memory monitors.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Copies `bytes` into the image starting at `addr`.
    ///
    /// Returns `false` without writing anything if the copy would run past
    /// the end of the address space.
    pub fn load(&mut self, addr: u16, bytes: &[u8]) -> bool {
        let start = addr as usize;
        let Some(end) = start.checked_add(bytes.len()) else {
            return false;
        };
        if end > ADDRESS_SPACE {
            return false;
        }
        self.data[start..end].copy_from_slice(bytes);
        true
    }
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImage")
            .field("len", &ADDRESS_SPACE)
            .finish()
    }
}

impl MemoryBus for MemoryImage {
    fn read(&mut self, addr: u16) -> u8 {
        MemoryImage::read(self, addr)
    }

    fn write(&mut self, addr: u16, value: u8) -> Result<(), BusError> {
        MemoryImage::write(self, addr, value);
        Ok(())
    }

    fn peek(&self, addr: u16) -> u8 {
        MemoryImage::read(self, addr)
    }

    fn poke(&mut self, addr: u16, value: u8) {
        MemoryImage::write(self, addr, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_read_write() {
        let mut mem = MemoryImage::new();

        // Initially all zeros
        assert_eq!(mem.read(0x0000), 0x00);
        assert_eq!(mem.read(0xFFFF), 0x00);

        mem.write(0x1234, 0x42);
        assert_eq!(mem.read(0x1234), 0x42);

        // Neighbours unchanged
        assert_eq!(mem.read(0x1233), 0x00);
        assert_eq!(mem.read(0x1235), 0x00);
    }

    #[test]
    fn test_image_load_bounds() {
        let mut mem = MemoryImage::new();

        assert!(mem.load(0xFFFE, &[0x01, 0x02]));
        assert_eq!(mem.read(0xFFFE), 0x01);
        assert_eq!(mem.read(0xFFFF), 0x02);

        // One byte too many: nothing is written
        assert!(!mem.load(0xFFFE, &[0xAA, 0xBB, 0xCC]));
        assert_eq!(mem.read(0xFFFE), 0x01);
    }

    #[test]
    fn test_image_as_bus() {
        let mut mem = MemoryImage::new();
        let bus: &mut dyn MemoryBus = &mut mem;

        bus.write(0x0200, 0x99).unwrap();
        bus.poke(0x0201, 0x98);
        bus.call(0x0200);

        assert_eq!(bus.read(0x0200), 0x99);
        assert_eq!(bus.peek(0x0201), 0x98);
        assert_eq!(mem.as_bytes().len(), ADDRESS_SPACE);
    }
}
