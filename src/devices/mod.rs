//! Memory-mapped device support for the buri machine.
//!
//! This module provides the `Device` trait implemented by everything the
//! `AddressDispatcher` can route accesses to: the 6551 ACIA, the ROM write
//! guard, the HD44780 LCD controller, and any device a front-end adds.
//!
//! # Architecture
//!
//! - **Device trait**: register-level interface, offset based
//! - **DeviceContext**: what a device may touch while handling an access (the
//!   memory image for register mirroring, and its own interrupt line)
//! - **BusError**: faults a device reports back through the bus
//!
//! # Example
//!
//! ```rust
//! use burisim::{AccessKind, AddressDispatcher, MemoryBus, RomGuard};
//!
//! let mut bus = AddressDispatcher::new();
//! let guard = bus.attach(RomGuard::new(0xE000, 0x2000));
//! bus.register_handler(0xE000, 0x2000, AccessKind::Write, guard).unwrap();
//!
//! // Writes into the protected range are refused
//! assert!(bus.write(0xE123, 0x42).is_err());
//! assert_eq!(bus.peek(0xE123), 0x00);
//! ```

use crate::devices::interrupts::{InterruptAggregator, LineId};
use crate::memory::MemoryImage;
use std::any::Any;
use thiserror::Error;

pub mod interrupts;
pub mod lcd;
pub mod rom;
pub mod uart;

pub use lcd::{DisplaySnapshot, Hd44780};
pub use rom::RomGuard;
pub use uart::Acia6551;

/// Fault raised by a device while servicing a bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// Write into read-only memory outside a writable-ROM scope.
    #[error("illegal attempt to write ${value:02X} to ${address:04X}")]
    ReadOnlyMemory {
        /// Absolute address of the refused write
        address: u16,
        /// Value the write attempted to store
        value: u8,
    },

    /// Access to a register index the device does not have. This only
    /// happens when a device is mapped over more bytes than it decodes.
    #[error("{device} has no register {index}")]
    NoSuchRegister {
        /// Device name
        device: &'static str,
        /// Offending register index
        index: u16,
    },
}

impl BusError {
    /// Configuration faults cannot be recovered from by retrying or
    /// continuing; they mean the address map itself is wrong.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::NoSuchRegister { .. })
    }
}

/// View of the machine handed to a device for the duration of one callback.
pub struct DeviceContext<'a> {
    memory: &'a mut MemoryImage,
    interrupts: &'a mut InterruptAggregator,
    line: LineId,
    base: Option<u16>,
}

impl<'a> DeviceContext<'a> {
    /// Builds a context for the device owning `line`, mapped at `base`.
    pub fn new(
        memory: &'a mut MemoryImage,
        interrupts: &'a mut InterruptAggregator,
        line: LineId,
        base: Option<u16>,
    ) -> Self {
        Self {
            memory,
            interrupts,
            line,
            base,
        }
    }

    /// Drives this device's interrupt line.
    pub fn set_irq(&mut self, asserted: bool) {
        self.interrupts.set_line(self.line, asserted);
    }

    /// Current state of this device's interrupt line.
    pub fn irq_asserted(&self) -> bool {
        self.interrupts.line(self.line)
    }

    /// Home base address of the device, if it has been mapped.
    pub fn base(&self) -> Option<u16> {
        self.base
    }

    /// Copies a register value into the memory image at `base + offset`, so
    /// raw memory views show the live register file. No-op for unmapped devices.
    pub fn mirror(&mut self, offset: u16, value: u8) {
        if let Some(base) = self.base {
            self.memory.write(base.wrapping_add(offset), value);
        }
    }

    /// The machine's memory image.
    pub fn memory(&self) -> &MemoryImage {
        &*self.memory
    }

    /// The machine's memory image, mutably.
    pub fn memory_mut(&mut self) -> &mut MemoryImage {
        &mut *self.memory
    }
}

/// Abstract interface for memory-mapped hardware devices.
///
/// The dispatcher calls these methods with the address relative to the start
/// of the registered range, so a device never needs to know where it is mapped.
///
/// # Design
///
/// - **Offset-based**: device receives `addr - range_start`, not the absolute address
/// - **No panics**: faults are reported as `BusError`
/// - **Mutable read**: reads may have side effects (clear-on-read flags)
/// - **Send**: the machine is driven from the runner thread
///
/// # Examples
///
/// ```rust
/// use burisim::{BusError, Device, DeviceContext};
/// use std::any::Any;
///
/// struct Latch {
///     value: u8,
/// }
///
/// impl Device for Latch {
///     fn name(&self) -> &'static str {
///         "latch"
///     }
///
///     fn size(&self) -> u16 {
///         1
///     }
///
///     fn read(&mut self, _offset: u16, _ctx: &mut DeviceContext<'_>) -> Result<u8, BusError> {
///         Ok(self.value)
///     }
///
///     fn write(&mut self, _offset: u16, value: u8, _ctx: &mut DeviceContext<'_>) -> Result<(), BusError> {
///         self.value = value;
///         Ok(())
///     }
///
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
///
///     fn as_any_mut(&mut self) -> &mut dyn Any {
///         self
///     }
/// }
/// ```
pub trait Device: Send + 'static {
    /// Short device name used in logs and fault reports.
    fn name(&self) -> &'static str;

    /// Number of bytes the device decodes, used by `map_device`.
    fn size(&self) -> u16;

    /// Read byte at offset relative to the registered range start.
    fn read(&mut self, offset: u16, ctx: &mut DeviceContext<'_>) -> Result<u8, BusError>;

    /// Write byte at offset relative to the registered range start.
    fn write(&mut self, offset: u16, value: u8, ctx: &mut DeviceContext<'_>)
        -> Result<(), BusError>;

    /// Control transferred to offset (JSR/JMP target inside the range).
    fn call(&mut self, _offset: u16, _ctx: &mut DeviceContext<'_>) {}

    /// Periodic service hook, called once per machine step.
    fn poll(&mut self, _ctx: &mut DeviceContext<'_>) {}

    /// Hardware reset.
    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
